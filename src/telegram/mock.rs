//! Scripted in-memory transport for tests

use super::{AlbumItem, Peer, RemoteMessage, SendRequest, Transport, TransportError};
use crate::files::UploadFile;
use crate::progress::ProgressSink;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockMessage {
    pub id: i32,
    pub file_name: Option<String>,
    pub size: Option<u64>,
    pub content: Vec<u8>,
}

impl MockMessage {
    pub fn document(id: i32, name: &str, content: Vec<u8>) -> Self {
        MockMessage {
            id,
            file_name: Some(name.to_string()),
            size: Some(content.len() as u64),
            content,
        }
    }

    pub fn unnamed(id: i32, content: Vec<u8>) -> Self {
        MockMessage {
            id,
            file_name: None,
            size: Some(content.len() as u64),
            content,
        }
    }
}

impl RemoteMessage for MockMessage {
    fn id(&self) -> i32 {
        self.id
    }

    fn document_size(&self) -> Option<u64> {
        self.size
    }

    fn document_file_name(&self) -> Option<String> {
        self.file_name.clone()
    }
}

/// What the next send should do instead of succeeding normally
pub enum SendScript {
    Fail(TransportError),
    /// Succeed but report this remote size
    ReportSize(u64),
}

#[derive(Debug, Clone)]
pub struct SentFile {
    pub peer: Peer,
    pub name: String,
    pub caption: String,
    pub force_document: bool,
    pub thumbnail: Option<PathBuf>,
    pub content: Vec<u8>,
}

pub struct ScriptedTransport {
    send_script: Mutex<VecDeque<SendScript>>,
    download_script: Mutex<VecDeque<TransportError>>,
    send_calls: AtomicUsize,
    next_id: AtomicI32,
    sent: Mutex<Vec<SentFile>>,
    albums: Mutex<Vec<Vec<String>>>,
    deleted: Mutex<Vec<i32>>,
    forwarded: Mutex<Vec<(Peer, i32)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        ScriptedTransport {
            send_script: Mutex::new(VecDeque::new()),
            download_script: Mutex::new(VecDeque::new()),
            send_calls: AtomicUsize::new(0),
            next_id: AtomicI32::new(1),
            sent: Mutex::new(Vec::new()),
            albums: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            forwarded: Mutex::new(Vec::new()),
        }
    }

    pub fn script_sends(&self, script: Vec<SendScript>) {
        self.send_script.lock().extend(script);
    }

    pub fn fail_downloads(&self, errors: Vec<TransportError>) {
        self.download_script.lock().extend(errors);
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<SentFile> {
        self.sent.lock().clone()
    }

    /// Messages for everything sent so far, oldest first
    pub fn sent_messages(&self) -> Vec<MockMessage> {
        self.sent
            .lock()
            .iter()
            .enumerate()
            .map(|(i, f)| MockMessage::document(i as i32 + 1, &f.name, f.content.clone()))
            .collect()
    }

    /// File names of every album sent, one entry per media group
    pub fn albums(&self) -> Vec<Vec<String>> {
        self.albums.lock().clone()
    }

    pub fn deleted(&self) -> Vec<i32> {
        self.deleted.lock().clone()
    }

    pub fn forwarded(&self) -> Vec<(Peer, i32)> {
        self.forwarded.lock().clone()
    }
}

impl ScriptedTransport {
    /// Count a send call and apply the next scripted behavior
    fn next_send(&self) -> Result<Option<u64>, TransportError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        match self.send_script.lock().pop_front() {
            Some(SendScript::Fail(err)) => Err(err),
            Some(SendScript::ReportSize(size)) => Ok(Some(size)),
            None => Ok(None),
        }
    }

    fn record(
        &self,
        peer: &Peer,
        file: &UploadFile,
        request: &SendRequest<'_>,
        reported_size: Option<u64>,
    ) -> Result<MockMessage, TransportError> {
        let content = file
            .open()
            .and_then(|mut reader| reader.read_all())
            .map_err(|e| TransportError::Fatal(e.to_string()))?;

        let mut message = MockMessage::document(
            self.next_id.fetch_add(1, Ordering::SeqCst),
            file.name(),
            content.clone(),
        );
        if reported_size.is_some() {
            message.size = reported_size;
        }

        self.sent.lock().push(SentFile {
            peer: peer.clone(),
            name: file.name().to_string(),
            caption: request.caption.to_string(),
            force_document: request.force_document,
            thumbnail: request.thumbnail.map(Path::to_path_buf),
            content,
        });
        Ok(message)
    }
}

impl Transport for ScriptedTransport {
    type Message = MockMessage;

    async fn send_file(
        &self,
        peer: &Peer,
        file: &UploadFile,
        request: &SendRequest<'_>,
        progress: &dyn ProgressSink,
    ) -> Result<MockMessage, TransportError> {
        let reported_size = self.next_send()?;
        let message = self.record(peer, file, request, reported_size)?;
        progress.update(file.size(), file.size());
        Ok(message)
    }

    async fn send_album(
        &self,
        peer: &Peer,
        items: &[AlbumItem<'_>],
        progress: &dyn ProgressSink,
    ) -> Result<Vec<MockMessage>, TransportError> {
        let reported_size = self.next_send()?;
        let mut messages = Vec::with_capacity(items.len());
        for item in items {
            messages.push(self.record(peer, item.file, &item.request, reported_size)?);
        }
        self.albums
            .lock()
            .push(items.iter().map(|item| item.file.name().to_string()).collect());
        let total = items.iter().map(|item| item.file.size()).sum();
        progress.update(total, total);
        Ok(messages)
    }

    async fn download_media(
        &self,
        message: &MockMessage,
        destination: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<PathBuf, TransportError> {
        if let Some(err) = self.download_script.lock().pop_front() {
            return Err(err);
        }
        std::fs::write(destination, &message.content)
            .map_err(|e| TransportError::Fatal(e.to_string()))?;
        progress.update(message.content.len() as u64, message.content.len() as u64);
        Ok(destination.to_path_buf())
    }

    async fn delete_messages(&self, _peer: &Peer, message_ids: &[i32]) -> Result<(), TransportError> {
        self.deleted.lock().extend_from_slice(message_ids);
        Ok(())
    }

    async fn forward_message(
        &self,
        destination: &Peer,
        _source: &Peer,
        message_id: i32,
    ) -> Result<(), TransportError> {
        self.forwarded.lock().push((destination.clone(), message_id));
        Ok(())
    }
}
