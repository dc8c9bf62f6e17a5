//! Downloading files from a chat
//!
//! Remote messages are wrapped as [`DownloadFile`]s by the [`DownloadFiles`]
//! iterator. In [`SplitFileMode::Join`] the iterator also groups consecutive
//! parts (`name.00`, `name.01`, ...) into bundles and joins each bundle once
//! the next unrelated file, or the end of the stream, shows up.
//!
//! Parts of one file must arrive back to back. An unrelated file between two
//! parts closes the first bundle early, and it is then left unjoined.

mod join;

pub use join::{
    get_join_strategy, pipe_file, JoinOutcome, JoinStrategy, JoinStrategyEntry,
    UnionJoinStrategy, CHUNK_FILE_SIZE, JOIN_STRATEGIES,
};

use crate::caption::FileSize;
use crate::error::{Error, Result};
use crate::progress::TransferProgress;
use crate::retry::{retry_transfer, Attempt, FileOutcome, RetryPolicy};
use crate::telegram::{Peer, RemoteMessage, Transport};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Declared name used when a document carries no filename attribute
pub const UNKNOWN_FILE_NAME: &str = "Unknown";

/// A remote document about to be downloaded
#[derive(Debug, Clone)]
pub struct DownloadFile<M> {
    message: M,
    file_name: String,
    size: u64,
    downloaded: Option<PathBuf>,
}

impl<M: RemoteMessage> DownloadFile<M> {
    pub fn new(message: M) -> Self {
        // Only the final component, so a declared name never leaves the
        // download directory
        let file_name = message
            .document_file_name()
            .as_deref()
            .map(Path::new)
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNKNOWN_FILE_NAME.to_string());
        let size = message.document_size().unwrap_or(0);
        DownloadFile {
            message,
            file_name,
            size,
            downloaded: None,
        }
    }
}

impl<M> DownloadFile<M> {
    pub fn message(&self) -> &M {
        &self.message
    }

    /// Final path component of the name declared by the document
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Text after the last dot, or `""`
    pub fn extension(&self) -> &str {
        self.file_name
            .rsplit_once('.')
            .map_or("", |(_, ext)| ext)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Where the file was written, once downloaded
    pub fn downloaded_path(&self) -> Option<&Path> {
        self.downloaded.as_deref()
    }

    pub fn set_downloaded_path(&mut self, path: PathBuf) {
        self.downloaded = Some(path);
    }
}

impl<M> PartialEq for DownloadFile<M> {
    fn eq(&self, other: &Self) -> bool {
        self.file_name == other.file_name
    }
}

/// What to do with downloaded split parts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SplitFileMode {
    /// Leave the parts as they are
    #[default]
    Keep,
    /// Concatenate complete bundles and remove the parts
    Join,
}

/// Iterator over the files to download
///
/// Every message is yielded as soon as it is pulled. Call
/// [`DownloadFiles::mark_downloaded`] after writing a file so that its bundle
/// knows where the part lives.
pub struct DownloadFiles<I: Iterator> {
    messages: I,
    mode: SplitFileMode,
    registry: &'static [JoinStrategyEntry],
    open: Option<JoinStrategy>,
    joined: Vec<JoinOutcome>,
    finished: bool,
}

impl<I> DownloadFiles<I>
where
    I: Iterator,
    I::Item: RemoteMessage,
{
    pub fn new(messages: I, mode: SplitFileMode) -> Self {
        DownloadFiles {
            messages,
            mode,
            registry: JOIN_STRATEGIES,
            open: None,
            joined: Vec::new(),
            finished: false,
        }
    }

    /// Outcomes of every bundle closed so far
    pub fn join_outcomes(&self) -> &[JoinOutcome] {
        &self.joined
    }

    pub fn mark_downloaded(&mut self, file: &DownloadFile<I::Item>) {
        if let (Some(bundle), Some(path)) = (self.open.as_mut(), file.downloaded_path()) {
            bundle.set_downloaded(file.file_name(), path);
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(bundle) = self.open.take() {
            let outcome = bundle.join()?;
            self.joined.push(outcome);
        }
        Ok(())
    }

    fn classify(&mut self, file: &DownloadFile<I::Item>) -> Result<()> {
        if self.mode == SplitFileMode::Keep {
            return Ok(());
        }
        if let Some(bundle) = self.open.as_mut() {
            if bundle.is_part(file) {
                bundle.add(file);
                return Ok(());
            }
            self.close()?;
        }
        self.open = get_join_strategy(self.registry, file);
        Ok(())
    }
}

impl<I> Iterator for DownloadFiles<I>
where
    I: Iterator,
    I::Item: RemoteMessage,
{
    type Item = Result<DownloadFile<I::Item>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.messages.next() {
            Some(message) => {
                let file = DownloadFile::new(message);
                Some(self.classify(&file).map(|()| file))
            }
            None if !self.finished => {
                self.finished = true;
                self.close().err().map(Err)
            }
            None => None,
        }
    }
}

/// Free bytes available to unprivileged users on the filesystem of `path`
pub fn free_disk_usage(path: &Path) -> Result<u64> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(std::io::Error::from)?;
    Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
}

fn check_free_space(directory: &Path, file_name: &str, size: u64) -> Result<()> {
    let free = free_disk_usage(directory)?;
    if size > free {
        return Err(Error::NoSpace(format!(
            "There is no disk space to download \"{}\". Space required: {}",
            file_name,
            FileSize(size - free).for_humans()
        )));
    }
    Ok(())
}

/// Options for [`download_files`]
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub directory: PathBuf,
    pub split_files: SplitFileMode,
    /// Delete each message once its document is on disk
    pub delete_on_success: bool,
    pub retry: RetryPolicy,
    pub show_progress: bool,
}

/// Download `messages` in order, joining split files per the options
///
/// A file whose retry budget runs out is reported as failed and the batch
/// moves on. Running out of disk space stops the batch.
pub async fn download_files<T: Transport>(
    transport: &T,
    peer: &Peer,
    messages: Vec<T::Message>,
    options: &DownloadOptions,
    cancel: &AtomicBool,
) -> Result<Vec<FileOutcome<PathBuf>>> {
    std::fs::create_dir_all(&options.directory)?;

    let mut files = DownloadFiles::new(messages.into_iter(), options.split_files);
    let mut outcomes = Vec::new();

    while let Some(next) = files.next() {
        let mut file = next?;
        if cancel.load(Ordering::Relaxed) {
            warn!("Interrupted, skipping the remaining downloads");
            break;
        }

        check_free_space(&options.directory, file.file_name(), file.size())?;

        let progress = TransferProgress::new(
            "Downloading",
            file.file_name(),
            file.size(),
            options.show_progress,
        );
        let destination = options.directory.join(file.file_name());
        let attempt = retry_transfer(&options.retry, file.file_name(), || {
            transport.download_media(file.message(), &destination, &progress)
        })
        .await;
        progress.finish();

        let path = match attempt? {
            Attempt::Done(path) => path,
            Attempt::GaveUp(err) => {
                outcomes.push(FileOutcome::Failed {
                    name: file.file_name().to_string(),
                    reason: err.to_string(),
                });
                continue;
            }
        };
        info!("Downloaded \"{}\" to {:?}", file.file_name(), path);
        file.set_downloaded_path(path.clone());
        files.mark_downloaded(&file);

        if options.delete_on_success {
            let id = file.message().id();
            transport.delete_messages(peer, &[id]).await?;
            debug!("Deleted message {}", id);
        }

        outcomes.push(FileOutcome::Completed {
            name: file.file_name().to_string(),
            output: path,
        });
    }

    for outcome in files.join_outcomes() {
        if let JoinOutcome::Incomplete { present, expected } = outcome {
            warn!(
                "A split file was left in parts: {} of {} parts downloaded",
                present, expected
            );
        }
    }
    Ok(outcomes)
}
