//! tgtransfer - Upload and download files through Telegram
//!
//! Files larger than the account limit are split into numbered parts on
//! upload and joined back together on download. Every transfer goes through
//! a retry layer that honors Telegram flood waits.

pub mod caption;
pub mod config;
pub mod download;
pub mod error;
pub mod files;
pub mod progress;
pub mod retry;
pub mod telegram;
pub mod upload;

pub use config::Config;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::files::UploadFile;
    pub use crate::retry::{FileOutcome, RetryPolicy};
    pub use crate::telegram::{Peer, Transport};
}
