//! Turning command-line paths into upload units

use super::{split_file, UploadFile};
use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// What to do with a directory given as input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DirectoryMode {
    /// Reject it
    #[default]
    Fail,
    /// Upload every regular file below it
    Recursive,
}

/// What to do with a file larger than the account limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LargeFileMode {
    /// Reject it
    #[default]
    Fail,
    /// Upload it as numbered parts
    Split,
}

/// Whether `path` names an existing, non-empty file
///
/// Directories count as valid here; [`expand_directories`] deals with them.
pub fn is_valid_file(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Err(_) => {
            warn!("File \"{}\" does not exist.", path.display());
            false
        }
        Ok(meta) if meta.is_file() && meta.len() == 0 => {
            warn!("File \"{}\" is empty.", path.display());
            false
        }
        Ok(_) => true,
    }
}

/// Replace directories by the files they contain, per `mode`
pub fn expand_directories(paths: &[PathBuf], mode: DirectoryMode) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if !path.is_dir() {
            files.push(path.clone());
            continue;
        }

        match mode {
            DirectoryMode::Fail => {
                return Err(Error::InvalidFile(format!(
                    "\"{}\" is a directory.",
                    path.display()
                )));
            }
            DirectoryMode::Recursive => {
                for entry in WalkDir::new(path).follow_links(true).sort_by_file_name() {
                    let entry = entry.map_err(|e| {
                        Error::InvalidFile(format!("Cannot walk \"{}\": {}", path.display(), e))
                    })?;
                    if entry.file_type().is_file() {
                        files.push(entry.into_path());
                    }
                }
            }
        }
    }
    Ok(files)
}

/// Compare names so that `file2` sorts before `file10`
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = a.chars().peekable();
    let mut b = b.chars().peekable();
    loop {
        match (a.peek().copied(), b.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let left: String = std::iter::from_fn(|| a.next_if(char::is_ascii_digit)).collect();
                let right: String = std::iter::from_fn(|| b.next_if(char::is_ascii_digit)).collect();
                let left_trimmed = left.trim_start_matches('0');
                let right_trimmed = right.trim_start_matches('0');
                let ord = left_trimmed
                    .len()
                    .cmp(&right_trimmed.len())
                    .then_with(|| left_trimmed.cmp(right_trimmed))
                    .then_with(|| left.len().cmp(&right.len()));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                a.next();
                b.next();
            }
        }
    }
}

/// Options for [`collect_upload_files`]
#[derive(Debug, Clone)]
pub struct CollectOptions {
    pub directories: DirectoryMode,
    pub large_files: LargeFileMode,
    /// Account limit for a single document
    pub max_file_size: u64,
    /// Sort the files by name before uploading
    pub sort: bool,
}

/// Expand, validate and split `paths` into upload units, in upload order
pub fn collect_upload_files(paths: &[PathBuf], options: &CollectOptions) -> Result<Vec<UploadFile>> {
    let valid: Vec<PathBuf> = paths.iter().filter(|p| is_valid_file(p)).cloned().collect();
    let mut files = expand_directories(&valid, options.directories)?;
    files.retain(|p| is_valid_file(p));

    if options.sort {
        files.sort_by(|a, b| natural_cmp(&a.to_string_lossy(), &b.to_string_lossy()));
    }

    let mut units = Vec::with_capacity(files.len());
    for path in files {
        let size = std::fs::metadata(&path)?.len();
        if size <= options.max_file_size {
            units.push(UploadFile::whole(path)?);
            continue;
        }

        match options.large_files {
            LargeFileMode::Fail => {
                return Err(Error::InvalidFile(format!(
                    "\"{}\" file is too large for Telegram.",
                    path.display()
                )));
            }
            LargeFileMode::Split => {
                let parts = split_file(&path, options.max_file_size)?;
                debug!("{:?} will be sent as {} parts", path, parts.len());
                units.extend(parts.into_iter().map(UploadFile::Part));
            }
        }
    }
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options(large_files: LargeFileMode, max_file_size: u64) -> CollectOptions {
        CollectOptions {
            directories: DirectoryMode::Fail,
            large_files,
            max_file_size,
            sort: false,
        }
    }

    #[test]
    fn test_is_valid_file() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("empty.txt");
        let full = dir.path().join("full.txt");
        std::fs::write(&empty, b"").unwrap();
        std::fs::write(&full, b"data").unwrap();

        assert!(!is_valid_file(&dir.path().join("missing.txt")));
        assert!(!is_valid_file(&empty));
        assert!(is_valid_file(&full));
        assert!(is_valid_file(dir.path()));
    }

    #[test]
    fn test_directory_rejected_in_fail_mode() {
        let dir = TempDir::new().unwrap();
        let err = expand_directories(&[dir.path().to_path_buf()], DirectoryMode::Fail).unwrap_err();
        assert_eq!(err.to_string(), format!("\"{}\" is a directory.", dir.path().display()));
    }

    #[test]
    fn test_directory_walked_in_recursive_mode() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("sub").join("b.txt"), b"b").unwrap();

        let files = expand_directories(&[dir.path().to_path_buf()], DirectoryMode::Recursive).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_large_file_rejected_without_split() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        std::fs::write(&path, vec![1u8; 100]).unwrap();

        let err = collect_upload_files(&[path.clone()], &options(LargeFileMode::Fail, 40)).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("\"{}\" file is too large for Telegram.", path.display())
        );
    }

    #[test]
    fn test_large_file_split() {
        let dir = TempDir::new().unwrap();
        let small = dir.path().join("small.bin");
        let big = dir.path().join("big.bin");
        std::fs::write(&small, vec![1u8; 10]).unwrap();
        std::fs::write(&big, vec![1u8; 100]).unwrap();

        let units = collect_upload_files(&[small, big], &options(LargeFileMode::Split, 40)).unwrap();
        let names: Vec<_> = units.iter().map(|u| u.name().to_string()).collect();
        assert_eq!(names, vec!["small.bin", "big.bin.00", "big.bin.01", "big.bin.02"]);
        assert_eq!(units[3].size(), 20);
    }

    #[test]
    fn test_invalid_inputs_skipped() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.txt");
        std::fs::write(&good, b"ok").unwrap();

        let units = collect_upload_files(
            &[dir.path().join("missing.txt"), good],
            &options(LargeFileMode::Fail, 1000),
        )
        .unwrap();
        assert_eq!(units.len(), 1);
    }

    #[test]
    fn test_natural_sort() {
        let mut names = vec!["file10.txt", "file2.txt", "file1.txt", "File0.txt"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["File0.txt", "file1.txt", "file2.txt", "file10.txt"]);
    }
}
