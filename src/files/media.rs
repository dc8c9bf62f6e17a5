//! Video probing and thumbnail generation through ffmpeg

use super::{is_video, UploadFile};
use crate::error::{Error, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

/// Edge length in pixels of the long side of generated thumbnails
pub const THUMBNAIL_SIZE: u32 = 200;

/// ffmpeg binary, overridable through `FFMPEG_COMMAND`
fn ffmpeg_command() -> String {
    std::env::var("FFMPEG_COMMAND").unwrap_or_else(|_| "ffmpeg".to_string())
}

/// Thumbnail policy for an upload
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Thumbnail {
    /// Generate one from the middle of video files
    #[default]
    Auto,
    Disabled,
    /// Use this image; it is never deleted
    Custom(PathBuf),
}

/// A thumbnail ready to be attached to one upload
#[derive(Debug)]
pub struct PreparedThumbnail {
    path: PathBuf,
    generated: bool,
}

impl PreparedThumbnail {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the image if it was generated for this upload
    pub fn cleanup(self) {
        if !self.generated {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!("Could not remove thumbnail {:?}: {}", self.path, e);
        }
    }
}

impl Thumbnail {
    /// Resolve the policy for `file`
    ///
    /// A missing custom thumbnail is an error. Failing to generate one is
    /// logged and the file goes out without a thumbnail.
    pub async fn prepare(&self, file: &UploadFile, force_document: bool) -> Result<Option<PreparedThumbnail>> {
        match self {
            Thumbnail::Disabled => Ok(None),
            Thumbnail::Custom(path) => {
                if !path.is_file() {
                    return Err(Error::InvalidFile(format!(
                        "Thumbnail \"{}\" does not exist.",
                        path.display()
                    )));
                }
                Ok(Some(PreparedThumbnail {
                    path: path.clone(),
                    generated: false,
                }))
            }
            Thumbnail::Auto => {
                if file.is_part() || force_document || !is_video(file.path()) {
                    return Ok(None);
                }
                match generate_thumbnail(file.path()).await {
                    Ok(path) => Ok(Some(PreparedThumbnail {
                        path,
                        generated: true,
                    })),
                    Err(e) => {
                        warn!("{}", e);
                        Ok(None)
                    }
                }
            }
        }
    }
}

/// What ffmpeg reports about a video
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoProbe {
    pub duration_secs: u64,
    pub width: u32,
    pub height: u32,
}

async fn ffmpeg_output(args: &[&std::ffi::OsStr]) -> Result<std::process::Output> {
    Command::new(ffmpeg_command())
        .args(args)
        .output()
        .await
        .map_err(|e| {
            Error::Thumbnail(format!(
                "ffmpeg command is not available. Thumbnails for videos are not available! ({})",
                e
            ))
        })
}

/// Read duration and frame size of `path` from `ffmpeg -i`
pub async fn probe_video(path: &Path) -> Result<VideoProbe> {
    let output = ffmpeg_output(&["-i".as_ref(), path.as_os_str()]).await?;
    let stderr = String::from_utf8_lossy(&output.stderr);
    let (width, height) = parse_dimensions(&stderr)
        .ok_or_else(|| Error::Thumbnail("Video ratio is not available.".to_string()))?;
    Ok(VideoProbe {
        duration_secs: parse_duration(&stderr).unwrap_or(0),
        width,
        height,
    })
}

/// Extract a frame from the middle of `path` into a temporary jpg
async fn generate_thumbnail(path: &Path) -> Result<PathBuf> {
    let probe = probe_video(path).await?;
    let (width, height) = if probe.width > probe.height {
        (THUMBNAIL_SIZE as i64, -1)
    } else {
        (-1, THUMBNAIL_SIZE as i64)
    };

    let output = std::env::temp_dir().join(format!("tgtransfer-thumb-{}.jpg", uuid::Uuid::new_v4()));
    let seek = (probe.duration_secs / 2).to_string();
    let scale = format!("scale={}:{}", width, height);
    let result = ffmpeg_output(&[
        "-ss".as_ref(),
        seek.as_ref(),
        "-i".as_ref(),
        path.as_os_str(),
        "-filter:v".as_ref(),
        scale.as_ref(),
        "-vframes:v".as_ref(),
        "1".as_ref(),
        output.as_os_str(),
    ])
    .await?;

    if !result.status.success() || !output.exists() {
        let _ = std::fs::remove_file(&output);
        return Err(Error::Thumbnail(format!(
            "ffmpeg could not create a thumbnail for \"{}\"",
            path.display()
        )));
    }
    debug!("Generated thumbnail {:?} for {:?}", output, path);
    Ok(output)
}

/// `Duration: HH:MM:SS.cc` from ffmpeg's banner, in whole seconds
fn parse_duration(stderr: &str) -> Option<u64> {
    let re = Regex::new(r"Duration: (\d+):(\d{2}):(\d{2})").ok()?;
    let caps = re.captures(stderr)?;
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
    Some(field(1)? * 3600 + field(2)? * 60 + field(3)?)
}

/// `WIDTHxHEIGHT` from the first video stream line
fn parse_dimensions(stderr: &str) -> Option<(u32, u32)> {
    let line_re = Regex::new(r": Video: ([^\n]+)").ok()?;
    let line = line_re.captures(stderr)?.get(1)?.as_str();
    let size_re = Regex::new(r"(\d{2,6})x(\d{2,6})").ok()?;
    let caps = size_re.captures(line)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}
