//! Transfer progress reporting

use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Receives `(bytes done, bytes total)` updates during a transfer
pub trait ProgressSink {
    fn update(&self, current: u64, total: u64);
}

impl<F> ProgressSink for F
where
    F: Fn(u64, u64),
{
    fn update(&self, current: u64, total: u64) {
        self(current, total)
    }
}

/// A terminal progress bar for one file
///
/// Updates that move backwards (a retried upload restarting from zero, for
/// instance) are ignored so the bar never jumps back.
pub struct TransferProgress {
    bar: ProgressBar,
    last: AtomicU64,
}

impl TransferProgress {
    /// Create a bar labelled `"{action} {name}"`; hidden bars draw nothing
    pub fn new(action: &str, name: &str, total: u64, visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(total)
        } else {
            ProgressBar::hidden()
        };

        if let Ok(style) = ProgressStyle::default_bar().template(
            "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        ) {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_message(format!("{} {}", action, name));

        TransferProgress {
            bar,
            last: AtomicU64::new(0),
        }
    }

    /// Last accepted position
    pub fn position(&self) -> u64 {
        self.last.load(Ordering::Relaxed)
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for TransferProgress {
    fn update(&self, current: u64, total: u64) {
        let previous = self.last.fetch_max(current, Ordering::Relaxed);
        if current < previous {
            return;
        }
        if self.bar.length() != Some(total) {
            self.bar.set_length(total);
        }
        self.bar.set_position(current);
    }
}

/// Wraps a reader and reports every byte that passes through it
pub struct ProgressReader<'a, R> {
    inner: R,
    read: u64,
    total: u64,
    sink: &'a dyn ProgressSink,
}

impl<'a, R> ProgressReader<'a, R> {
    pub fn new(inner: R, total: u64, sink: &'a dyn ProgressSink) -> Self {
        ProgressReader {
            inner,
            read: 0,
            total,
            sink,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.read
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<'_, R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let n = buf.filled().len() - before;
                if n > 0 {
                    this.read += n as u64;
                    this.sink.update(this.read, this.total);
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}
