//! Local files to upload
//!
//! An [`UploadFile`] is either a whole file or one part of a file too large
//! to send in one piece. Both variants are read through the same bounded
//! reader, so the sender never needs to know which one it holds.

mod media;
mod source;
mod split;

pub use media::{probe_video, PreparedThumbnail, Thumbnail, VideoProbe};
pub use source::{
    collect_upload_files, expand_directories, is_valid_file, CollectOptions, DirectoryMode,
    LargeFileMode,
};
pub use split::{part_name, split_file, FilePart, SplitFileSet, SplitPart, PART_INDEX_WIDTH};

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// A unit of upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadFile {
    /// A file sent as-is
    Whole(FilePart),
    /// One range of a file that was split
    Part(FilePart),
}

impl UploadFile {
    /// Describe a whole file on disk
    pub fn whole(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let size = std::fs::metadata(&path)?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidFile(format!("\"{}\" has no file name.", path.display())))?;
        Ok(UploadFile::Whole(FilePart::whole(path, name, size)))
    }

    fn range(&self) -> &FilePart {
        match self {
            UploadFile::Whole(range) | UploadFile::Part(range) => range,
        }
    }

    /// Name used on Telegram
    pub fn name(&self) -> &str {
        self.range().name()
    }

    /// Number of bytes that will be sent
    pub fn size(&self) -> u64 {
        self.range().size()
    }

    /// The file on disk the bytes are read from
    pub fn path(&self) -> &Path {
        self.range().owner()
    }

    pub fn is_part(&self) -> bool {
        matches!(self, UploadFile::Part(_))
    }

    /// Whether this is the last (or only) unit of its owner file
    pub fn completes_owner(&self) -> bool {
        self.range().is_last()
    }

    /// Default caption: the name without its last extension, or the full
    /// part name for split parts
    pub fn short_name(&self) -> &str {
        match self {
            UploadFile::Part(part) => part.name(),
            UploadFile::Whole(whole) => {
                let name = whole.name();
                match name.rfind('.') {
                    Some(dot) if dot > 0 => &name[..dot],
                    _ => name,
                }
            }
        }
    }

    /// Open a blocking reader over the bytes to send
    pub fn open(&self) -> std::io::Result<SplitPart<std::fs::File>> {
        self.range().open()
    }

    /// Open an async reader over the bytes to send
    pub async fn open_async(&self) -> std::io::Result<SplitPart<tokio::fs::File>> {
        self.range().open_async().await
    }
}

/// Guess a MIME type from the file extension
pub fn guess_mime(path: &Path) -> Option<String> {
    mime_guess::from_path(path).first().map(|mime| mime.essence_str().to_string())
}

/// Whether the extension marks the file as a video
pub fn is_video(path: &Path) -> bool {
    mime_guess::from_path(path)
        .first()
        .is_some_and(|mime| mime.type_() == mime_guess::mime::VIDEO)
}
