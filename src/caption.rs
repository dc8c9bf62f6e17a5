//! Caption templates
//!
//! A caption template is plain text with `{file.FIELD}` placeholders that are
//! filled from the file being uploaded, for example
//! `"{file.stem} ({file.size.for_humans})"`.
//!
//! Supported fields:
//! - `name`, `stem`, `suffix`, `parent`, `absolute`
//! - `size`, `size.for_humans`, `size.as_kilobytes`, `size.as_megabytes`,
//!   `size.as_gigabytes`, `size.as_kibibytes`, `size.as_mebibytes`,
//!   `size.as_gibibytes`
//! - `mtime`, `ctime`, `atime` and `now`, as local `%Y-%m-%d %H:%M:%S`
//! - `mimetype`, `crc32`, `sha224`, `sha256`, `sha384`, `sha512`
//! - `media.duration`, `media.duration.for_humans`, `media.width`,
//!   `media.height` for videos probed with ffmpeg
//!
//! Unknown fields are left in place untouched, and a template with unbalanced
//! braces is returned as-is. `{{` and `}}` produce literal braces.

use crate::files::{guess_mime, UploadFile, VideoProbe};
use chrono::{DateTime, Local};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

const HASH_CHUNK_SIZE: usize = 64 * 1024;
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A byte count with human-friendly renderings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSize(pub u64);

impl FileSize {
    pub fn as_kilobytes(self) -> u64 {
        self.0 / 1000
    }

    pub fn as_megabytes(self) -> u64 {
        self.as_kilobytes() / 1000
    }

    pub fn as_gigabytes(self) -> u64 {
        self.as_megabytes() / 1000
    }

    pub fn as_kibibytes(self) -> u64 {
        self.0 / 1024
    }

    pub fn as_mebibytes(self) -> u64 {
        self.as_kibibytes() / 1024
    }

    pub fn as_gibibytes(self) -> u64 {
        self.as_mebibytes() / 1024
    }

    /// Binary units with one decimal, e.g. `"1.1 GiB"`
    pub fn for_humans(self) -> String {
        let mut num = self.0 as f64;
        for unit in ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "Zi"] {
            if num < 1024.0 {
                return format!("{:3.1} {}B", num, unit);
            }
            num /= 1024.0;
        }
        format!("{:.1} YiB", num)
    }
}

/// A number of seconds with a human-friendly rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Duration(pub u64);

impl Duration {
    /// E.g. `"1 hour and 5 seconds"`, or `"now"` for zero
    pub fn for_humans(self) -> String {
        if self.0 == 0 {
            return "now".to_string();
        }

        let (m, s) = (self.0 / 60, self.0 % 60);
        let (h, m) = (m / 60, m % 60);
        let (d, h) = (h / 24, h % 24);
        let (y, d) = (d / 365, d % 365);

        let words: Vec<String> = [(y, "year"), (d, "day"), (h, "hour"), (m, "minute"), (s, "second")]
            .into_iter()
            .filter(|(n, _)| *n > 0)
            .map(|(n, word)| {
                if n == 1 {
                    format!("{} {}", n, word)
                } else {
                    format!("{} {}s", n, word)
                }
            })
            .collect();

        match words.split_last() {
            Some((last, [])) => last.clone(),
            Some((last, rest)) => format!("{} and {}", rest.join(", "), last),
            None => "now".to_string(),
        }
    }
}

/// Renders caption templates for one file
pub struct CaptionFormatter {
    path: PathBuf,
    media: Option<VideoProbe>,
}

enum Token<'a> {
    Text(&'a str),
    Field(&'a str),
}

/// Split a template into text and fields, or `None` if braces are unbalanced
fn tokenize(template: &str) -> Option<Vec<Token<'_>>> {
    let mut tokens = Vec::new();
    let mut rest = template;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("{{") {
            tokens.push(Token::Text("{"));
            rest = after;
        } else if let Some(after) = rest.strip_prefix("}}") {
            tokens.push(Token::Text("}"));
            rest = after;
        } else if let Some(after) = rest.strip_prefix('{') {
            let end = after.find(['{', '}'])?;
            if !after[end..].starts_with('}') {
                return None;
            }
            tokens.push(Token::Field(&after[..end]));
            rest = &after[end + 1..];
        } else if rest.starts_with('}') {
            return None;
        } else {
            let end = rest.find(['{', '}']).unwrap_or(rest.len());
            tokens.push(Token::Text(&rest[..end]));
            rest = &rest[end..];
        }
    }
    Some(tokens)
}

fn format_time(time: io::Result<SystemTime>) -> Option<String> {
    let time: DateTime<Local> = time.ok()?.into();
    Some(time.format(TIME_FORMAT).to_string())
}

fn digest_file<D: Digest>(path: &Path) -> io::Result<String> {
    let mut hasher = D::new();
    stream_file(path, |chunk| hasher.update(chunk))?;
    Ok(hex::encode(hasher.finalize()))
}

fn stream_file(path: &Path, mut sink: impl FnMut(&[u8])) -> io::Result<()> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        sink(&buf[..n]);
    }
}

fn crc32_file(path: &Path) -> io::Result<String> {
    let mut hasher = crc32fast::Hasher::new();
    stream_file(path, |chunk| hasher.update(chunk))?;
    Ok(format!("{:08X}", hasher.finalize()))
}

impl CaptionFormatter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CaptionFormatter {
            path: path.into(),
            media: None,
        }
    }

    /// Provide video metadata for the `media.*` fields
    pub fn with_media(mut self, media: VideoProbe) -> Self {
        self.media = Some(media);
        self
    }

    /// Render `template`, leaving unknown placeholders as written
    pub fn format(&self, template: &str) -> String {
        let Some(tokens) = tokenize(template) else {
            debug!("Caption template has unbalanced braces, using it verbatim");
            return template.to_string();
        };

        let mut out = String::with_capacity(template.len());
        for token in tokens {
            match token {
                Token::Text(text) => out.push_str(text),
                Token::Field(field) => match self.resolve(field) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('{');
                        out.push_str(field);
                        out.push('}');
                    }
                },
            }
        }
        out
    }

    fn resolve(&self, field: &str) -> Option<String> {
        let field = field.trim().strip_prefix("file.")?;
        if field.split('.').any(|segment| segment.starts_with('_')) {
            return None;
        }

        let path = self.path.as_path();
        let value = match field {
            "name" => path.file_name()?.to_string_lossy().into_owned(),
            "stem" => path.file_stem()?.to_string_lossy().into_owned(),
            "suffix" => path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default(),
            "parent" => path.parent()?.to_string_lossy().into_owned(),
            "absolute" => std::path::absolute(path).ok()?.to_string_lossy().into_owned(),
            "mimetype" => guess_mime(path)?,
            "crc32" => crc32_file(path).ok()?,
            "sha224" => digest_file::<Sha224>(path).ok()?,
            "sha256" => digest_file::<Sha256>(path).ok()?,
            "sha384" => digest_file::<Sha384>(path).ok()?,
            "sha512" => digest_file::<Sha512>(path).ok()?,
            "mtime" => format_time(std::fs::metadata(path).ok()?.modified())?,
            "ctime" => format_time(std::fs::metadata(path).ok()?.created())?,
            "atime" => format_time(std::fs::metadata(path).ok()?.accessed())?,
            "now" => Local::now().format(TIME_FORMAT).to_string(),
            size if size == "size" || size.starts_with("size.") => {
                let size = FileSize(std::fs::metadata(path).ok()?.len());
                match field.strip_prefix("size").unwrap_or_default() {
                    "" => size.0.to_string(),
                    ".for_humans" => size.for_humans(),
                    ".as_kilobytes" => size.as_kilobytes().to_string(),
                    ".as_megabytes" => size.as_megabytes().to_string(),
                    ".as_gigabytes" => size.as_gigabytes().to_string(),
                    ".as_kibibytes" => size.as_kibibytes().to_string(),
                    ".as_mebibytes" => size.as_mebibytes().to_string(),
                    ".as_gibibytes" => size.as_gibibytes().to_string(),
                    _ => return None,
                }
            }
            media if media.starts_with("media.") => {
                let probe = self.media?;
                match media {
                    "media.duration" => probe.duration_secs.to_string(),
                    "media.duration.for_humans" => Duration(probe.duration_secs).for_humans(),
                    "media.width" => probe.width.to_string(),
                    "media.height" => probe.height.to_string(),
                    _ => return None,
                }
            }
            _ => return None,
        };
        Some(value)
    }
}

/// Whether `template` refers to any `media.*` field
pub fn needs_media(template: &str) -> bool {
    template.contains("file.media.")
}

/// Cut `text` to at most `limit` characters, ending in `...` when cut
pub fn truncate_caption(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let keep = limit.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Caption for `file`: the rendered template, or its short name
///
/// Split parts always use their part name.
pub fn caption_for(
    file: &UploadFile,
    template: Option<&str>,
    media: Option<VideoProbe>,
    limit: usize,
) -> String {
    let text = match template {
        Some(template) if !file.is_part() => {
            let mut formatter = CaptionFormatter::new(file.path());
            if let Some(media) = media {
                formatter = formatter.with_media(media);
            }
            formatter.format(template)
        }
        _ => file.short_name().to_string(),
    };
    truncate_caption(&text, limit)
}
