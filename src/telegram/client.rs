//! Telegram client implementation
//!
//! Uses grammers to talk to Telegram. The session is stored in a SQLite file
//! so that logging in is only needed once.

use super::{AlbumItem, Peer, RemoteMessage, SendRequest, Transport, TransportError};
use crate::config::TelegramConfig;
use crate::error::{Error, Result};
use crate::files::UploadFile;
use crate::progress::{ProgressReader, ProgressSink};

use grammers_client::types::media::Uploaded;
use grammers_client::types::Media;
use grammers_client::{Client, InputMedia, InputMessage, SignInError};
use grammers_mtsender::{InvocationError, SenderPool, SenderPoolHandle};
use grammers_session::defs::PeerRef;
use grammers_session::storages::SqliteSession;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A message returned by Telegram
#[derive(Debug, Clone)]
pub struct TelegramMessage {
    inner: grammers_client::types::Message,
}

impl TelegramMessage {
    /// Size and filename attribute of the attached document
    fn document(&self) -> Option<(u64, String)> {
        match self.inner.media() {
            Some(Media::Document(doc)) => Some((doc.size() as u64, doc.name().to_string())),
            _ => None,
        }
    }
}

impl RemoteMessage for TelegramMessage {
    fn id(&self) -> i32 {
        self.inner.id()
    }

    fn document_size(&self) -> Option<u64> {
        self.document().map(|(size, _)| size)
    }

    fn document_file_name(&self) -> Option<String> {
        self.document()
            .map(|(_, name)| name)
            .filter(|name| !name.is_empty())
    }
}

/// Login token returned by [`TelegramClient::request_login_code`]
pub struct LoginToken {
    inner: grammers_client::types::LoginToken,
}

/// Token required to finish a login protected by a cloud password
pub struct PasswordToken {
    inner: grammers_client::types::PasswordToken,
}

struct ClientState {
    client: Client,
    #[allow(dead_code)]
    session: Arc<SqliteSession>,
    pool_handle: SenderPoolHandle,
    _pool_task: tokio::task::JoinHandle<()>,
}

/// grammers-backed [`Transport`]
pub struct TelegramClient {
    config: TelegramConfig,
    state: RwLock<Option<ClientState>>,
    peers: parking_lot::Mutex<HashMap<Peer, PeerRef>>,
}

/// Seconds from a `FLOOD_WAIT_X` style message
fn parse_flood_wait_seconds(message: &str) -> Option<u32> {
    if !message.to_ascii_lowercase().contains("flood") {
        return None;
    }
    message
        .split(|ch: char| !ch.is_ascii_digit())
        .find_map(|part| (!part.is_empty()).then(|| part.parse::<u32>().ok()).flatten())
}

/// Classify a grammers error for the retry loop
fn map_invocation_error(err: InvocationError) -> TransportError {
    match err {
        InvocationError::Rpc(rpc) => {
            let message = rpc.to_string();
            classify_rpc(rpc.code, &rpc.name, rpc.value, message)
        }
        other => TransportError::Rpc {
            name: "NETWORK".to_string(),
            message: other.to_string(),
        },
    }
}

/// 420 is a flood wait, 5xx is a server hiccup, any other code is a
/// request Telegram will keep refusing
fn classify_rpc(code: i32, name: &str, value: Option<u32>, message: String) -> TransportError {
    let flood = code == 420 || name.starts_with("FLOOD_WAIT") || name.starts_with("FLOOD_PREMIUM_WAIT");
    match (flood, value) {
        (true, Some(seconds)) => TransportError::FloodWait { seconds },
        _ if code >= 500 || code <= 0 || flood => TransportError::Rpc {
            name: name.to_string(),
            message,
        },
        _ => TransportError::Fatal(message),
    }
}

/// Classify an I/O error raised while streaming an upload
fn map_upload_error(err: std::io::Error) -> TransportError {
    let message = err.to_string();
    match parse_flood_wait_seconds(&message) {
        Some(seconds) => TransportError::FloodWait { seconds },
        None => TransportError::Rpc {
            name: "UPLOAD".to_string(),
            message,
        },
    }
}

/// Upload a file and its optional thumbnail
async fn upload_item(
    client: &Client,
    file: &UploadFile,
    request: &SendRequest<'_>,
    progress: &dyn ProgressSink,
) -> std::result::Result<(Uploaded, Option<Uploaded>), TransportError> {
    let stream = file
        .open_async()
        .await
        .map_err(|e| TransportError::Fatal(format!("Cannot read {:?}: {}", file.path(), e)))?;
    let size = usize::try_from(file.size())
        .map_err(|_| TransportError::Fatal(format!("{} is too large", file.name())))?;
    let mut reader = ProgressReader::new(stream, file.size(), progress);
    let uploaded = client
        .upload_stream(&mut reader, size, file.name().to_string())
        .await
        .map_err(map_upload_error)?;

    let thumbnail = match request.thumbnail {
        Some(path) => Some(client.upload_file(path).await.map_err(map_upload_error)?),
        None => None,
    };
    Ok((uploaded, thumbnail))
}

fn not_connected() -> TransportError {
    TransportError::Fatal("Not connected".to_string())
}

impl TelegramClient {
    pub fn new(config: TelegramConfig) -> Self {
        TelegramClient {
            config,
            state: RwLock::new(None),
            peers: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Open the session file and start the connection pool
    pub async fn connect(&self) -> Result<()> {
        let session_path = self.config.session_file.clone();
        if let Some(parent) = session_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Config(format!("Failed to create session directory: {}", e))
            })?;
        }

        let session = Arc::new(SqliteSession::open(&session_path).map_err(|e| {
            Error::TelegramClient(format!("Failed to open session: {}", e))
        })?);

        let pool = SenderPool::new(Arc::clone(&session), self.config.api_id);
        let client = Client::new(&pool);
        let SenderPool { runner, handle, .. } = pool;
        let pool_task = tokio::spawn(runner.run());

        *self.state.write().await = Some(ClientState {
            client,
            session,
            pool_handle: handle,
            _pool_task: pool_task,
        });
        debug!("Connected to Telegram using {:?}", session_path);
        Ok(())
    }

    async fn client(&self) -> std::result::Result<Client, TransportError> {
        let state = self.state.read().await;
        state
            .as_ref()
            .map(|s| s.client.clone())
            .ok_or_else(not_connected)
    }

    pub async fn is_authorized(&self) -> Result<bool> {
        let client = self.client().await?;
        client.is_authorized().await.map_err(|e| {
            Error::TelegramClient(format!("Failed to check authorization: {}", e))
        })
    }

    pub async fn request_login_code(&self, phone: &str) -> Result<LoginToken> {
        let client = self.client().await?;
        let token = client
            .request_login_code(phone, &self.config.api_hash)
            .await
            .map_err(|e| Error::TelegramClient(format!("Failed to request login code: {}", e)))?;
        Ok(LoginToken { inner: token })
    }

    /// Sign in with the received code; a password token is returned when the
    /// account has two-step verification
    pub async fn sign_in(&self, token: &LoginToken, code: &str) -> Result<Option<PasswordToken>> {
        let client = self.client().await?;
        match client.sign_in(&token.inner, code).await {
            Ok(_) => {
                info!("Successfully signed in");
                Ok(None)
            }
            Err(SignInError::PasswordRequired(password_token)) => Ok(Some(PasswordToken {
                inner: password_token,
            })),
            Err(e) => Err(Error::TelegramClient(format!("Sign in failed: {}", e))),
        }
    }

    pub async fn check_password(&self, token: PasswordToken, password: &str) -> Result<()> {
        let client = self.client().await?;
        client
            .check_password(token.inner, password)
            .await
            .map_err(|e| Error::TelegramClient(format!("Password check failed: {}", e)))?;
        info!("Successfully signed in with two-step verification");
        Ok(())
    }

    pub async fn bot_sign_in(&self, bot_token: &str) -> Result<()> {
        let client = self.client().await?;
        client
            .bot_sign_in(bot_token, &self.config.api_hash)
            .await
            .map_err(|e| Error::TelegramClient(format!("Bot sign in failed: {}", e)))?;
        info!("Successfully signed in as bot");
        Ok(())
    }

    async fn resolve_peer(&self, peer: &Peer) -> std::result::Result<PeerRef, TransportError> {
        if let Some(cached) = self.peers.lock().get(peer) {
            return Ok(cached.clone());
        }

        let client = self.client().await?;
        let resolved = match peer {
            Peer::Me => {
                let me = client.get_me().await.map_err(map_invocation_error)?;
                PeerRef::from(me.raw)
            }
            Peer::Id(id) => {
                let mut dialogs = client.iter_dialogs();
                let mut found = None;
                while let Some(dialog) = dialogs.next().await.map_err(map_invocation_error)? {
                    let candidate = dialog.peer();
                    if candidate.id().bare_id() == *id {
                        found = Some(PeerRef::from(candidate));
                        break;
                    }
                }
                found.ok_or_else(|| {
                    TransportError::Fatal(format!("Chat {} not found in your dialogs", id))
                })?
            }
            Peer::Username(name) => {
                let found = client
                    .resolve_username(name)
                    .await
                    .map_err(map_invocation_error)?
                    .ok_or_else(|| TransportError::Fatal(format!("Username @{} not found", name)))?;
                PeerRef::from(&found)
            }
        };

        self.peers.lock().insert(peer.clone(), resolved.clone());
        Ok(resolved)
    }

    /// Documents at the end of the chat, oldest first
    ///
    /// Walks back from the newest message and stops at the first message
    /// without a document.
    pub async fn find_files(&self, peer: &Peer) -> Result<Vec<TelegramMessage>> {
        let target = self.resolve_peer(peer).await?;
        let client = self.client().await?;

        let mut messages = Vec::new();
        let mut iter = client.iter_messages(target);
        while let Some(message) = iter.next().await.map_err(|e| {
            Error::TelegramClient(format!("Failed to iterate messages: {}", e))
        })? {
            let message = TelegramMessage { inner: message };
            if message.document().is_none() {
                break;
            }
            messages.push(message);
        }
        messages.reverse();
        debug!("Found {} files in {}", messages.len(), peer);
        Ok(messages)
    }

    /// Stop the connection pool
    pub async fn disconnect(&self) {
        if let Some(state) = self.state.write().await.take() {
            state.pool_handle.quit();
            info!("Disconnected from Telegram");
        }
    }
}

impl Transport for TelegramClient {
    type Message = TelegramMessage;

    async fn send_file(
        &self,
        peer: &Peer,
        file: &UploadFile,
        request: &SendRequest<'_>,
        progress: &dyn ProgressSink,
    ) -> std::result::Result<TelegramMessage, TransportError> {
        let target = self.resolve_peer(peer).await?;
        let client = self.client().await?;
        let (uploaded, thumbnail) = upload_item(&client, file, request, progress).await?;

        let mut message = InputMessage::new().text(request.caption);
        if let Some(thumb) = thumbnail {
            message = message.thumbnail(thumb);
        }
        message = if request.force_document {
            message.document(uploaded)
        } else {
            message.file(uploaded)
        };

        let sent = client
            .send_message(target, message)
            .await
            .map_err(map_invocation_error)?;
        Ok(TelegramMessage { inner: sent })
    }

    async fn send_album(
        &self,
        peer: &Peer,
        items: &[AlbumItem<'_>],
        progress: &dyn ProgressSink,
    ) -> std::result::Result<Vec<TelegramMessage>, TransportError> {
        let target = self.resolve_peer(peer).await?;
        let client = self.client().await?;

        let mut media = Vec::with_capacity(items.len());
        for item in items {
            let (uploaded, thumbnail) = upload_item(&client, item.file, &item.request, progress).await?;
            let mut input = InputMedia::default().caption(item.request.caption);
            if let Some(thumb) = thumbnail {
                input = input.thumbnail(thumb);
            }
            input = if item.request.force_document {
                input.document(uploaded)
            } else {
                input.file(uploaded)
            };
            media.push(input);
        }

        let sent = client
            .send_album(target, media)
            .await
            .map_err(map_invocation_error)?;
        let messages = sent
            .into_iter()
            .zip(items)
            .map(|(message, item)| {
                message
                    .map(|inner| TelegramMessage { inner })
                    .ok_or_else(|| {
                        TransportError::Fatal(format!("No message returned for {}", item.file.name()))
                    })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        debug!("Sent album of {} files to {}", messages.len(), peer);
        Ok(messages)
    }

    async fn download_media(
        &self,
        message: &TelegramMessage,
        destination: &Path,
        progress: &dyn ProgressSink,
    ) -> std::result::Result<PathBuf, TransportError> {
        let client = self.client().await?;
        let media = message
            .inner
            .media()
            .ok_or_else(|| TransportError::Fatal(format!("Message {} has no media", message.id())))?;
        let total = message.document_size().unwrap_or(0);
        let path = destination.to_path_buf();

        let io_error = |e: std::io::Error| TransportError::Fatal(format!("Cannot write {:?}: {}", path, e));
        let mut output = tokio::fs::File::create(&path).await.map_err(io_error)?;
        let mut download = client.iter_download(&media);
        let mut written = 0u64;
        while let Some(chunk) = download.next().await.map_err(map_invocation_error)? {
            output.write_all(&chunk).await.map_err(io_error)?;
            written += chunk.len() as u64;
            progress.update(written, total);
        }
        output.flush().await.map_err(io_error)?;
        Ok(path)
    }

    async fn delete_messages(
        &self,
        peer: &Peer,
        message_ids: &[i32],
    ) -> std::result::Result<(), TransportError> {
        let target = self.resolve_peer(peer).await?;
        let client = self.client().await?;
        client
            .delete_messages(target, message_ids)
            .await
            .map_err(map_invocation_error)?;
        Ok(())
    }

    async fn forward_message(
        &self,
        destination: &Peer,
        source: &Peer,
        message_id: i32,
    ) -> std::result::Result<(), TransportError> {
        let to = self.resolve_peer(destination).await?;
        let from = self.resolve_peer(source).await?;
        let client = self.client().await?;
        client
            .forward_messages(to, &[message_id], from)
            .await
            .map_err(map_invocation_error)?;
        debug!("Forwarded message {} to {}", message_id, destination);
        Ok(())
    }
}
