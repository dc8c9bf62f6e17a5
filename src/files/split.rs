//! Splitting a large file into bounded parts
//!
//! A file larger than the account limit is exposed as a sequence of
//! [`FilePart`]s. Nothing is copied: every part opens the owner file and reads
//! its own byte range through a [`SplitPart`] reader, which refuses to read
//! past the end of the range.
//!
//! Part `i` of `movie.mkv` is named `movie.mkv.{i:02}`, and joining the parts in
//! index order reproduces the original bytes.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncSeekExt, ReadBuf};
use tracing::debug;

/// Width of the zero-padded part index in part names
pub const PART_INDEX_WIDTH: usize = 2;

/// Name of part `index` of a file called `file_name`
pub fn part_name(file_name: &str, index: usize) -> String {
    format!("{}.{:0width$}", file_name, index, width = PART_INDEX_WIDTH)
}

/// A byte range of an owner file, addressed as an upload unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    owner: PathBuf,
    name: String,
    index: usize,
    count: usize,
    offset: u64,
    size: u64,
}

impl FilePart {
    /// Describe the whole of `owner` as a single range
    pub(crate) fn whole(owner: PathBuf, name: String, size: u64) -> Self {
        FilePart {
            owner,
            name,
            index: 0,
            count: 1,
            offset: 0,
            size,
        }
    }

    pub fn owner(&self) -> &Path {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Zero-based index of this part
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of parts the owner was split into
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 == self.count
    }

    /// Absolute offset of the first byte in the owner file
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Open a blocking reader positioned at the start of the part
    pub fn open(&self) -> io::Result<SplitPart<File>> {
        let file = File::open(&self.owner)?;
        let mut part = SplitPart::new(self.clone(), file);
        part.raw_seek(SeekFrom::Start(self.offset))?;
        Ok(part)
    }

    /// Open an async reader positioned at the start of the part
    pub async fn open_async(&self) -> io::Result<SplitPart<tokio::fs::File>> {
        let mut file = tokio::fs::File::open(&self.owner).await?;
        file.seek(SeekFrom::Start(self.offset)).await?;
        Ok(SplitPart::new(self.clone(), file))
    }
}

/// Reader over one [`FilePart`]
///
/// `remaining` always equals `size - position`, where the position is relative
/// to the start of the part.
#[derive(Debug)]
pub struct SplitPart<F> {
    part: FilePart,
    remaining: u64,
    file: F,
}

impl<F> SplitPart<F> {
    fn new(part: FilePart, file: F) -> Self {
        let remaining = part.size;
        SplitPart {
            part,
            remaining,
            file,
        }
    }

    pub fn part(&self) -> &FilePart {
        &self.part
    }

    /// Bytes left before the end of the part
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Upper bound for the next read given a buffer of `len` bytes
    fn read_limit(&self, len: usize) -> usize {
        usize::try_from(self.remaining).map_or(len, |remaining| remaining.min(len))
    }
}

impl<F: Seek> SplitPart<F> {
    /// Move the underlying cursor to an absolute offset of the owner file
    /// without touching the read budget
    pub fn raw_seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl<F: Read> SplitPart<F> {
    /// Read the remainder of the part into memory
    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl<F: Read> Read for SplitPart<F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = self.read_limit(buf.len());
        if limit == 0 {
            return Ok(0);
        }
        let n = self.file.read(&mut buf[..limit])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Seeks are relative to the part: `SeekFrom::Start(0)` is the first byte of
/// the part and `SeekFrom::End(0)` is one past its last byte.
impl<F: Seek> Seek for SplitPart<F> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let size = self.part.size;
        let current = size - self.remaining;
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => size.checked_add_signed(delta),
            SeekFrom::Current(delta) => current.checked_add_signed(delta),
        }
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )
        })?;

        let clamped = target.min(size);
        self.file
            .seek(SeekFrom::Start(self.part.offset + clamped))?;
        self.remaining = size - clamped;
        Ok(clamped)
    }
}

impl<F: AsyncRead + Unpin> AsyncRead for SplitPart<F> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let limit = this.read_limit(buf.remaining());
        if limit == 0 {
            return Poll::Ready(Ok(()));
        }

        let mut limited = ReadBuf::new(buf.initialize_unfilled_to(limit));
        match Pin::new(&mut this.file).poll_read(cx, &mut limited) {
            Poll::Ready(Ok(())) => {
                let n = limited.filled().len();
                buf.advance(n);
                this.remaining -= n as u64;
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

/// The ordered parts of a file split at `max_part_size` bytes
#[derive(Debug, Clone)]
pub struct SplitFileSet {
    path: PathBuf,
    file_name: String,
    total_size: u64,
    max_part_size: u64,
}

impl SplitFileSet {
    pub fn new(path: impl Into<PathBuf>, max_part_size: u64) -> Result<Self> {
        if max_part_size == 0 {
            return Err(Error::InvalidConfig(
                "Part size must be greater than 0".to_string(),
            ));
        }

        let path = path.into();
        let total_size = std::fs::metadata(&path)?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidFile(format!("\"{}\" has no file name.", path.display())))?;

        Ok(SplitFileSet {
            path,
            file_name,
            total_size,
            max_part_size,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// `ceil(total / max)`, and at least one part
    pub fn part_count(&self) -> usize {
        let count = self.total_size.div_ceil(self.max_part_size).max(1);
        usize::try_from(count).unwrap_or(usize::MAX)
    }

    pub fn parts(&self) -> Vec<FilePart> {
        let count = self.part_count();
        (0..count)
            .map(|index| {
                let offset = self.max_part_size * index as u64;
                let size = self.max_part_size.min(self.total_size - offset);
                FilePart {
                    owner: self.path.clone(),
                    name: part_name(&self.file_name, index),
                    index,
                    count,
                    offset,
                    size,
                }
            })
            .collect()
    }
}

/// Split `path` into parts of at most `max_part_size` bytes
pub fn split_file(path: &Path, max_part_size: u64) -> Result<Vec<FilePart>> {
    let set = SplitFileSet::new(path, max_part_size)?;
    let parts = set.parts();
    debug!(
        "Split {:?} ({} bytes) into {} parts",
        path,
        set.total_size(),
        parts.len()
    );
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(data).unwrap();
        path
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_part_name_padding() {
        assert_eq!(part_name("movie.mkv", 0), "movie.mkv.00");
        assert_eq!(part_name("movie.mkv", 7), "movie.mkv.07");
        assert_eq!(part_name("movie.mkv", 123), "movie.mkv.123");
    }

    #[test]
    fn test_part_count_and_sizes() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "data.bin", &sample(2500));

        let parts = split_file(&path, 1000).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(
            parts.iter().map(FilePart::size).collect::<Vec<_>>(),
            vec![1000, 1000, 500]
        );
        assert_eq!(parts.iter().map(FilePart::size).sum::<u64>(), 2500);
        assert_eq!(parts[2].name(), "data.bin.02");
        assert_eq!(parts[2].offset(), 2000);
        assert!(parts[2].is_last());
        assert!(!parts[0].is_last());
    }

    #[test]
    fn test_exact_multiple_has_no_empty_tail() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "data.bin", &sample(2000));

        let parts = split_file(&path, 1000).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].size(), 1000);
    }

    #[test]
    fn test_zero_part_size_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "data.bin", b"abc");
        assert!(matches!(
            split_file(&path, 0),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let result = split_file(&dir.path().join("gone.bin"), 10);
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_read_stops_at_part_boundary() {
        let dir = TempDir::new().unwrap();
        let data = sample(2500);
        let path = write_file(&dir, "data.bin", &data);
        let parts = split_file(&path, 1000).unwrap();

        let mut reader = parts[0].open().unwrap();
        let mut buf = vec![0u8; 4096];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(n, 1000);
        assert_eq!(&buf[..n], &data[..1000]);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_read_all_returns_exact_part() {
        let dir = TempDir::new().unwrap();
        let data = sample(2500);
        let path = write_file(&dir, "data.bin", &data);
        let parts = split_file(&path, 1000).unwrap();

        let middle = parts[1].open().unwrap().read_all().unwrap();
        assert_eq!(middle, &data[1000..2000]);
        let tail = parts[2].open().unwrap().read_all().unwrap();
        assert_eq!(tail, &data[2000..]);
    }

    #[test]
    fn test_seek_is_relative_to_part() {
        let dir = TempDir::new().unwrap();
        let data = sample(2500);
        let path = write_file(&dir, "data.bin", &data);
        let parts = split_file(&path, 1000).unwrap();

        let mut reader = parts[1].open().unwrap();
        assert_eq!(reader.seek(SeekFrom::Start(900)).unwrap(), 900);
        assert_eq!(reader.remaining(), 100);
        let rest = reader.read_all().unwrap();
        assert_eq!(rest, &data[1900..2000]);

        reader.seek(SeekFrom::End(-10)).unwrap();
        assert_eq!(reader.remaining(), 10);
        reader.seek(SeekFrom::Current(-90)).unwrap();
        assert_eq!(reader.remaining(), 100);

        reader.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(reader.read_all().unwrap(), &data[1000..2000]);

        assert!(reader.seek(SeekFrom::Current(-5000)).is_err());
    }

    #[test]
    fn test_seek_past_end_reports_clamped_position() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "data.bin", &sample(2500));
        let parts = split_file(&path, 1000).unwrap();

        let mut reader = parts[0].open().unwrap();
        assert_eq!(reader.seek(SeekFrom::Start(5000)).unwrap(), 1000);
        assert_eq!(reader.seek(SeekFrom::Current(0)).unwrap(), 1000);
        assert_eq!(reader.remaining(), 0);
        assert!(reader.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_raw_seek_keeps_budget() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "data.bin", &sample(2500));
        let parts = split_file(&path, 1000).unwrap();

        let mut reader = parts[0].open().unwrap();
        reader.raw_seek(SeekFrom::Start(2400)).unwrap();
        assert_eq!(reader.remaining(), 1000);
        assert_eq!(reader.read_all().unwrap().len(), 100);
    }

    #[tokio::test]
    async fn test_async_reader_matches_blocking_reader() {
        let dir = TempDir::new().unwrap();
        let data = sample(2500);
        let path = write_file(&dir, "data.bin", &data);
        let parts = split_file(&path, 1000).unwrap();

        for part in &parts {
            let mut reader = part.open_async().await.unwrap();
            let mut buf = Vec::new();
            tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buf)
                .await
                .unwrap();
            let start = part.offset() as usize;
            assert_eq!(buf, &data[start..start + part.size() as usize]);
        }
    }
}
