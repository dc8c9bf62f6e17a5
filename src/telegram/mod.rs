//! Telegram transport module
//!
//! Everything that talks to Telegram goes through the [`Transport`] trait:
//! - Sending a file (whole or one split part) as a message
//! - Downloading the document attached to a message
//! - Deleting and forwarding messages
//!
//! [`TelegramClient`] implements it on top of grammers. Transfer logic in
//! `upload` and `download` only depends on the trait.

mod client;
#[cfg(test)]
pub(crate) mod mock;

pub use client::{LoginToken, PasswordToken, TelegramClient, TelegramMessage};

use crate::files::UploadFile;
use crate::progress::ProgressSink;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Largest upload accepted from a regular account
pub const MAX_FILE_SIZE: u64 = 2_097_152_000;

/// Largest upload accepted from a premium account
pub const PREMIUM_MAX_FILE_SIZE: u64 = 4_194_304_000;

/// Largest upload accepted from a bot account
pub const BOT_MAX_FILE_SIZE: u64 = 52_428_800;

/// Caption length for regular and bot accounts
pub const CAPTION_MAX_LENGTH: usize = 1024;

/// Caption length for premium accounts
pub const PREMIUM_CAPTION_MAX_LENGTH: usize = 2048;

/// Kind of account the session is logged into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    User,
    Premium,
    Bot,
}

impl AccountKind {
    /// Maximum size of a single uploaded document
    pub fn max_file_size(self) -> u64 {
        match self {
            AccountKind::User => MAX_FILE_SIZE,
            AccountKind::Premium => PREMIUM_MAX_FILE_SIZE,
            AccountKind::Bot => BOT_MAX_FILE_SIZE,
        }
    }

    /// Maximum caption length in characters
    pub fn max_caption_length(self) -> usize {
        match self {
            AccountKind::Premium => PREMIUM_CAPTION_MAX_LENGTH,
            AccountKind::User | AccountKind::Bot => CAPTION_MAX_LENGTH,
        }
    }
}

/// A chat that files are sent to or read from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Peer {
    /// The account's own "Saved Messages"
    Me,
    /// A chat id
    Id(i64),
    /// A public username, without the leading `@`
    Username(String),
}

impl Peer {
    /// Parse a command-line entity: `me`/`self`, a numeric id, or a username
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if input.is_empty() || input.eq_ignore_ascii_case("me") || input.eq_ignore_ascii_case("self")
        {
            return Peer::Me;
        }
        if let Ok(id) = input.parse::<i64>() {
            return Peer::Id(id);
        }
        Peer::Username(input.trim_start_matches('@').to_string())
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::Me => write!(f, "me"),
            Peer::Id(id) => write!(f, "{}", id),
            Peer::Username(name) => write!(f, "@{}", name),
        }
    }
}

/// Failures reported by a transport call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The server asked us to wait before trying again
    #[error("flood wait of {seconds} seconds required")]
    FloodWait { seconds: u32 },

    /// A server or network error worth retrying
    #[error("{name}: {message}")]
    Rpc { name: String, message: String },

    /// Anything that retrying will not fix
    #[error("transport failure: {0}")]
    Fatal(String),
}

/// A message as seen by the transfer logic
pub trait RemoteMessage {
    /// Message id within its chat
    fn id(&self) -> i32;

    /// Size of the attached document, if the message carries one
    fn document_size(&self) -> Option<u64>;

    /// Filename attribute of the attached document
    fn document_file_name(&self) -> Option<String>;
}

/// Per-file metadata passed along with a send
#[derive(Debug, Clone, Copy)]
pub struct SendRequest<'a> {
    pub caption: &'a str,
    pub force_document: bool,
    pub thumbnail: Option<&'a Path>,
}

/// One file of a media group
#[derive(Debug, Clone, Copy)]
pub struct AlbumItem<'a> {
    pub file: &'a UploadFile,
    pub request: SendRequest<'a>,
}

/// The operations the transfer logic needs from a Telegram client
#[allow(async_fn_in_trait)]
pub trait Transport {
    type Message: RemoteMessage;

    /// Upload `file` and post it to `peer`, reporting bytes sent to `progress`
    async fn send_file(
        &self,
        peer: &Peer,
        file: &UploadFile,
        request: &SendRequest<'_>,
        progress: &dyn ProgressSink,
    ) -> std::result::Result<Self::Message, TransportError>;

    /// Upload every item and post them to `peer` as a single media group
    ///
    /// Messages are returned in the order of `items`.
    async fn send_album(
        &self,
        peer: &Peer,
        items: &[AlbumItem<'_>],
        progress: &dyn ProgressSink,
    ) -> std::result::Result<Vec<Self::Message>, TransportError>;

    /// Download the document attached to `message` into the file `destination`
    ///
    /// Returns the path of the written file.
    async fn download_media(
        &self,
        message: &Self::Message,
        destination: &Path,
        progress: &dyn ProgressSink,
    ) -> std::result::Result<PathBuf, TransportError>;

    async fn delete_messages(
        &self,
        peer: &Peer,
        message_ids: &[i32],
    ) -> std::result::Result<(), TransportError>;

    /// Forward `message_id` from `source` to `destination`
    async fn forward_message(
        &self,
        destination: &Peer,
        source: &Peer,
        message_id: i32,
    ) -> std::result::Result<(), TransportError>;
}
