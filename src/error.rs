//! Error types for tgtransfer

use crate::telegram::TransportError;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while preparing, sending or receiving files
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input rejected before any transfer started
    #[error("{0}")]
    InvalidFile(String),

    #[error("{0}")]
    MissingFile(String),

    /// The remote document does not match what was uploaded
    #[error("Remote document size: {remote} bytes (local file size: {local} bytes)")]
    DataLoss { remote: u64, local: u64 },

    #[error("No space left on device: {0}")]
    NoSpace(String),

    #[error("Not authorized with Telegram. Run 'tgtransfer login' first")]
    TelegramAuthRequired,

    #[error("Telegram client error: {0}")]
    TelegramClient(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Thumbnail error: {0}")]
    Thumbnail(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
