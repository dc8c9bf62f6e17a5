//! Reassembling split files after download
//!
//! A run of downloaded files called `name.00`, `name.01`, ... forms a bundle.
//! When the bundle is closed its parts are concatenated in index order into
//! `name` next to them and the parts are removed.

use super::DownloadFile;
use crate::error::Result;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Copy buffer size used when concatenating parts
pub const CHUNK_FILE_SIZE: usize = 1024 * 1024;

/// Append all of `source` to `target` in [`CHUNK_FILE_SIZE`] chunks
pub fn pipe_file(source: &Path, target: &mut impl Write) -> io::Result<u64> {
    let mut input = File::open(source)?;
    let mut buf = vec![0u8; CHUNK_FILE_SIZE];
    let mut copied = 0u64;
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            return Ok(copied);
        }
        target.write_all(&buf[..n])?;
        copied += n as u64;
    }
}

/// Result of closing a bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Parts were concatenated into `path` and removed
    Joined { path: PathBuf, parts: usize },
    /// Some parts are missing; nothing was touched
    Incomplete { present: usize, expected: usize },
}

#[derive(Debug, Clone)]
struct BundleMember {
    file_name: String,
    index: u64,
    downloaded: Option<PathBuf>,
}

/// Joins `base.00`, `base.01`, ... back into `base`
#[derive(Debug, Clone, Default)]
pub struct UnionJoinStrategy {
    base_name: Option<String>,
    members: Vec<BundleMember>,
}

impl UnionJoinStrategy {
    /// Files whose last extension is a run of ASCII digits
    pub fn is_applicable(file_name: &str) -> bool {
        part_index(file_name).is_some()
    }

    /// `file.tar.gz` gives `file.tar`; a name without a dot is its own base
    pub fn base_name(file_name: &str) -> &str {
        match file_name.rfind('.') {
            Some(dot) => &file_name[..dot],
            None => file_name,
        }
    }

    pub fn bundle_name(&self) -> Option<&str> {
        self.base_name.as_deref()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether `file` continues this bundle
    pub fn is_part<M>(&self, file: &DownloadFile<M>) -> bool {
        let name = file.file_name();
        Self::is_applicable(name) && self.base_name.as_deref() == Some(Self::base_name(name))
    }

    /// Add `file`; the first file fixes the bundle's base name and repeated
    /// names are ignored
    pub fn add<M>(&mut self, file: &DownloadFile<M>) {
        let name = file.file_name();
        let Some(index) = part_index(name) else {
            return;
        };
        if self.base_name.is_none() {
            self.base_name = Some(Self::base_name(name).to_string());
        }
        if self.members.iter().any(|m| m.file_name == name) {
            return;
        }
        self.members.push(BundleMember {
            file_name: name.to_string(),
            index,
            downloaded: file.downloaded_path().map(Path::to_path_buf),
        });
    }

    /// Record where a member was written
    pub fn set_downloaded(&mut self, file_name: &str, path: &Path) {
        if let Some(member) = self.members.iter_mut().find(|m| m.file_name == file_name) {
            member.downloaded = Some(path.to_path_buf());
        }
    }

    /// Concatenate the bundle if every part up to the highest index is on disk
    ///
    /// The output is written to a hidden temporary file and renamed into
    /// place, so a failed join leaves the parts and no partial output.
    pub fn join(mut self) -> Result<JoinOutcome> {
        self.members.sort_by_key(|m| m.index);
        let present: Vec<(u64, PathBuf)> = self
            .members
            .iter()
            .filter_map(|m| {
                let path = m.downloaded.as_ref()?;
                path.symlink_metadata().ok()?;
                Some((m.index, path.clone()))
            })
            .collect();

        let expected = match present.last() {
            Some((index, _)) => index.checked_add(1),
            None => Some(0),
        };
        let complete = !present.is_empty()
            && expected.is_some_and(|count| u64::try_from(present.len()) == Ok(count));
        if !complete {
            let expected = expected
                .and_then(|count| usize::try_from(count).ok())
                .unwrap_or(usize::MAX);
            debug!(
                "Not joining {:?}: {} of {} parts present",
                self.base_name,
                present.len(),
                expected
            );
            return Ok(JoinOutcome::Incomplete {
                present: present.len(),
                expected,
            });
        }

        let base_name = match &self.base_name {
            Some(name) => name.clone(),
            None => {
                return Ok(JoinOutcome::Incomplete {
                    present: 0,
                    expected: 0,
                })
            }
        };
        let directory = present[0]
            .1
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let target = directory.join(&base_name);
        let temp = directory.join(format!(".{}.joining", base_name));

        if let Err(e) = write_joined(&temp, &present) {
            let _ = std::fs::remove_file(&temp);
            return Err(e.into());
        }
        if let Err(e) = std::fs::rename(&temp, &target) {
            let _ = std::fs::remove_file(&temp);
            return Err(e.into());
        }

        for (_, part) in &present {
            if let Err(e) = std::fs::remove_file(part) {
                warn!("Could not remove part {:?}: {}", part, e);
            }
        }
        info!("Joined {} parts into {:?}", present.len(), target);
        Ok(JoinOutcome::Joined {
            path: target,
            parts: present.len(),
        })
    }
}

fn write_joined(temp: &Path, parts: &[(u64, PathBuf)]) -> io::Result<()> {
    let mut output = io::BufWriter::new(File::create(temp)?);
    for (_, part) in parts {
        pipe_file(part, &mut output)?;
    }
    output.flush()?;
    output.get_ref().sync_all()
}

fn part_index(file_name: &str) -> Option<u64> {
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() || !ext.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    ext.parse().ok()
}

/// An open bundle, for whichever strategy claimed it
#[derive(Debug, Clone)]
pub enum JoinStrategy {
    Union(UnionJoinStrategy),
}

impl JoinStrategy {
    pub fn is_part<M>(&self, file: &DownloadFile<M>) -> bool {
        match self {
            JoinStrategy::Union(s) => s.is_part(file),
        }
    }

    pub fn add<M>(&mut self, file: &DownloadFile<M>) {
        match self {
            JoinStrategy::Union(s) => s.add(file),
        }
    }

    pub fn set_downloaded(&mut self, file_name: &str, path: &Path) {
        match self {
            JoinStrategy::Union(s) => s.set_downloaded(file_name, path),
        }
    }

    pub fn join(self) -> Result<JoinOutcome> {
        match self {
            JoinStrategy::Union(s) => s.join(),
        }
    }
}

/// A registered strategy: when it applies and how to open a bundle
pub struct JoinStrategyEntry {
    pub name: &'static str,
    pub is_applicable: fn(&str) -> bool,
    pub start: fn() -> JoinStrategy,
}

fn start_union() -> JoinStrategy {
    JoinStrategy::Union(UnionJoinStrategy::default())
}

/// Strategies tried in order against each downloaded file
pub static JOIN_STRATEGIES: &[JoinStrategyEntry] = &[JoinStrategyEntry {
    name: "union",
    is_applicable: UnionJoinStrategy::is_applicable,
    start: start_union,
}];

/// Open a bundle for `file` with the first strategy that accepts it
pub fn get_join_strategy<M>(
    registry: &[JoinStrategyEntry],
    file: &DownloadFile<M>,
) -> Option<JoinStrategy> {
    registry
        .iter()
        .find(|entry| (entry.is_applicable)(file.file_name()))
        .map(|entry| {
            debug!("{} starts a {} bundle", file.file_name(), entry.name);
            let mut strategy = (entry.start)();
            strategy.add(file);
            strategy
        })
}
