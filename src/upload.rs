//! Sending files to a chat
//!
//! [`Uploader::send_files`] sends a batch of [`UploadFile`]s one at a time, or
//! in albums of up to [`ALBUM_FILES`] when [`UploadOptions::album`] is set.
//! Each send goes through [`retry_transfer`]; a send whose retry budget runs
//! out is reported as failed and the batch carries on. A remote document whose
//! size differs from the local one aborts the batch.

use crate::caption::{caption_for, needs_media};
use crate::error::{Error, Result};
use crate::files::{probe_video, PreparedThumbnail, Thumbnail, UploadFile};
use crate::progress::TransferProgress;
use crate::retry::{retry_transfer, Attempt, FileOutcome, RetryPolicy};
use crate::telegram::{
    AlbumItem, Peer, RemoteMessage, SendRequest, Transport, CAPTION_MAX_LENGTH,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Most files Telegram accepts in one media group
pub const ALBUM_FILES: usize = 10;

/// How files are sent
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Caption template; the file's short name when unset
    pub caption: Option<String>,
    /// Send media as plain documents
    pub force_document: bool,
    pub thumbnail: Thumbnail,
    /// Group files into albums of up to [`ALBUM_FILES`]
    pub album: bool,
    /// Chats that get a copy of every uploaded message
    pub forward: Vec<Peer>,
    /// Remove local files once fully uploaded
    pub delete_on_success: bool,
    pub print_file_id: bool,
    pub caption_limit: usize,
    pub retry: RetryPolicy,
    pub show_progress: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        UploadOptions {
            caption: None,
            force_document: false,
            thumbnail: Thumbnail::Auto,
            album: false,
            forward: Vec::new(),
            delete_on_success: false,
            print_file_id: false,
            caption_limit: CAPTION_MAX_LENGTH,
            retry: RetryPolicy::default(),
            show_progress: true,
        }
    }
}

/// Caption and thumbnail computed for one file before sending
struct Prepared {
    caption: String,
    force_document: bool,
    thumbnail: Option<PreparedThumbnail>,
}

impl Prepared {
    fn request(&self) -> SendRequest<'_> {
        SendRequest {
            caption: &self.caption,
            force_document: self.force_document,
            thumbnail: self.thumbnail.as_ref().map(|t| t.path()),
        }
    }

    fn cleanup(self) {
        if let Some(thumbnail) = self.thumbnail {
            thumbnail.cleanup();
        }
    }
}

/// Sends files through a [`Transport`]
pub struct Uploader<'a, T: Transport> {
    transport: &'a T,
    options: &'a UploadOptions,
}

impl<'a, T: Transport> Uploader<'a, T> {
    pub fn new(transport: &'a T, options: &'a UploadOptions) -> Self {
        Uploader { transport, options }
    }

    /// Send `files` to `peer` in order
    pub async fn send_files(
        &self,
        peer: &Peer,
        files: Vec<UploadFile>,
        cancel: &AtomicBool,
    ) -> Result<Vec<FileOutcome<T::Message>>> {
        if files.is_empty() {
            return Err(Error::MissingFile("Files do not exist.".to_string()));
        }

        let group_size = if self.options.album { ALBUM_FILES } else { 1 };
        let mut outcomes = Vec::with_capacity(files.len());
        let mut incomplete_owners: HashSet<PathBuf> = HashSet::new();

        for group in files.chunks(group_size) {
            if cancel.load(Ordering::Relaxed) {
                warn!("Interrupted, skipping the remaining uploads");
                break;
            }

            let sent = match group {
                [file] => vec![self.send_one(peer, file).await?],
                _ => self.send_album(peer, group).await?,
            };
            for (file, outcome) in group.iter().zip(sent) {
                self.record(file, &outcome, &mut incomplete_owners)?;
                outcomes.push(outcome);
            }
        }
        Ok(outcomes)
    }

    fn record(
        &self,
        file: &UploadFile,
        outcome: &FileOutcome<T::Message>,
        incomplete_owners: &mut HashSet<PathBuf>,
    ) -> Result<()> {
        match outcome {
            FileOutcome::Failed { .. } => {
                incomplete_owners.insert(file.path().to_path_buf());
            }
            FileOutcome::Completed { output, .. } => {
                if self.options.print_file_id {
                    println!(
                        "Uploaded successfully \"{}\" (message id {})",
                        file.name(),
                        output.id()
                    );
                }
                if self.options.delete_on_success
                    && file.completes_owner()
                    && !incomplete_owners.contains(file.path())
                {
                    std::fs::remove_file(file.path())?;
                    debug!("Removed {:?} after upload", file.path());
                }
            }
        }
        Ok(())
    }

    async fn prepare(&self, file: &UploadFile) -> Result<Prepared> {
        let options = self.options;
        let force_document = options.force_document || file.is_part();

        let media = match options.caption.as_deref() {
            Some(template) if needs_media(template) && !file.is_part() => {
                match probe_video(file.path()).await {
                    Ok(probe) => Some(probe),
                    Err(e) => {
                        debug!("No media info for {:?}: {}", file.path(), e);
                        None
                    }
                }
            }
            _ => None,
        };
        let caption = caption_for(file, options.caption.as_deref(), media, options.caption_limit);
        let thumbnail = options.thumbnail.prepare(file, force_document).await?;
        Ok(Prepared {
            caption,
            force_document,
            thumbnail,
        })
    }

    /// Send one file, retrying transient failures
    pub async fn send_one(&self, peer: &Peer, file: &UploadFile) -> Result<FileOutcome<T::Message>> {
        let options = self.options;
        let prepared = self.prepare(file).await?;
        let request = prepared.request();
        let progress = TransferProgress::new("Uploading", file.name(), file.size(), options.show_progress);

        let transport = self.transport;
        let attempt = retry_transfer(&options.retry, file.name(), || {
            transport.send_file(peer, file, &request, &progress)
        })
        .await;
        progress.finish();
        prepared.cleanup();

        match attempt? {
            Attempt::Done(message) => self.finish(peer, file, message).await,
            Attempt::GaveUp(err) => Ok(FileOutcome::Failed {
                name: file.name().to_string(),
                reason: err.to_string(),
            }),
        }
    }

    /// Send `files` as one media group; the whole group shares a retry budget
    pub async fn send_album(
        &self,
        peer: &Peer,
        files: &[UploadFile],
    ) -> Result<Vec<FileOutcome<T::Message>>> {
        let options = self.options;
        let mut prepared = Vec::with_capacity(files.len());
        for file in files {
            prepared.push(self.prepare(file).await?);
        }
        let items: Vec<AlbumItem<'_>> = files
            .iter()
            .zip(&prepared)
            .map(|(file, p)| AlbumItem {
                file,
                request: p.request(),
            })
            .collect();

        let label = format!("album of {} files", files.len());
        let total = files.iter().map(UploadFile::size).sum::<u64>();
        let progress = TransferProgress::new("Uploading", &label, total, options.show_progress);

        let transport = self.transport;
        let attempt = retry_transfer(&options.retry, &label, || {
            transport.send_album(peer, &items, &progress)
        })
        .await;
        progress.finish();
        drop(items);
        for p in prepared {
            p.cleanup();
        }

        let messages = match attempt? {
            Attempt::Done(messages) => messages,
            Attempt::GaveUp(err) => {
                let reason = err.to_string();
                return Ok(files
                    .iter()
                    .map(|file| FileOutcome::Failed {
                        name: file.name().to_string(),
                        reason: reason.clone(),
                    })
                    .collect());
            }
        };

        let mut outcomes = Vec::with_capacity(files.len());
        for (file, message) in files.iter().zip(messages) {
            outcomes.push(self.finish(peer, file, message).await?);
        }
        Ok(outcomes)
    }

    /// Verify the remote size and forward a sent message
    async fn finish(
        &self,
        peer: &Peer,
        file: &UploadFile,
        message: T::Message,
    ) -> Result<FileOutcome<T::Message>> {
        let options = self.options;
        if let Some(remote) = message.document_size() {
            if remote != file.size() {
                return Err(Error::DataLoss {
                    remote,
                    local: file.size(),
                });
            }
        }
        info!("Uploaded \"{}\" as message {}", file.name(), message.id());

        let transport = self.transport;
        for destination in &options.forward {
            let id = message.id();
            let forwarded = retry_transfer(&options.retry, file.name(), || {
                transport.forward_message(destination, peer, id)
            })
            .await?;
            if let Attempt::GaveUp(err) = forwarded {
                warn!("Could not forward \"{}\" to {}: {}", file.name(), destination, err);
            }
        }

        Ok(FileOutcome::Completed {
            name: file.name().to_string(),
            output: message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::{download_files, DownloadOptions, SplitFileMode};
    use crate::files::split_file;
    use crate::telegram::mock::{ScriptedTransport, SendScript};
    use crate::telegram::TransportError;
    use tempfile::TempDir;

    fn options() -> UploadOptions {
        UploadOptions {
            thumbnail: Thumbnail::Disabled,
            retry: RetryPolicy {
                max_retries: 3,
                base_delay_ms: 100,
            },
            show_progress: false,
            ..UploadOptions::default()
        }
    }

    fn transient() -> TransportError {
        TransportError::Rpc {
            name: "RPC_CALL_FAIL".to_string(),
            message: "timeout".to_string(),
        }
    }

    fn write(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[tokio::test]
    async fn test_empty_batch_is_missing_file() {
        let transport = ScriptedTransport::new();
        let opts = options();
        let result = Uploader::new(&transport, &opts)
            .send_files(&Peer::Me, Vec::new(), &AtomicBool::new(false))
            .await;
        assert!(matches!(result, Err(Error::MissingFile(_))));
        assert_eq!(transport.send_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let dir = TempDir::new().unwrap();
        let file = UploadFile::whole(write(&dir, "a.txt", b"hello")).unwrap();
        let transport = ScriptedTransport::new();
        transport.script_sends(vec![SendScript::Fail(transient()), SendScript::Fail(transient())]);
        let opts = options();

        let outcomes = Uploader::new(&transport, &opts)
            .send_files(&Peer::Me, vec![file], &AtomicBool::new(false))
            .await
            .unwrap();

        assert_eq!(transport.send_calls(), 3);
        assert!(!outcomes[0].is_failed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flood_wait_with_zero_budget() {
        let dir = TempDir::new().unwrap();
        let file = UploadFile::whole(write(&dir, "a.txt", b"hello")).unwrap();
        let transport = ScriptedTransport::new();
        transport.script_sends(vec![SendScript::Fail(TransportError::FloodWait { seconds: 2 })]);
        let mut opts = options();
        opts.retry.max_retries = 0;

        let start = tokio::time::Instant::now();
        let outcomes = Uploader::new(&transport, &opts)
            .send_files(&Peer::Me, vec![file], &AtomicBool::new(false))
            .await
            .unwrap();

        assert!(start.elapsed() >= std::time::Duration::from_secs(2));
        assert_eq!(transport.send_calls(), 2);
        assert!(!outcomes[0].is_failed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_fails_only_that_file() {
        let dir = TempDir::new().unwrap();
        let first = UploadFile::whole(write(&dir, "a.txt", b"a")).unwrap();
        let second = UploadFile::whole(write(&dir, "b.txt", b"b")).unwrap();
        let transport = ScriptedTransport::new();
        transport.script_sends(vec![SendScript::Fail(transient()), SendScript::Fail(transient())]);
        let mut opts = options();
        opts.retry.max_retries = 1;

        let outcomes = Uploader::new(&transport, &opts)
            .send_files(&Peer::Me, vec![first, second], &AtomicBool::new(false))
            .await
            .unwrap();

        assert!(outcomes[0].is_failed());
        assert_eq!(outcomes[1].name(), "b.txt");
        assert!(!outcomes[1].is_failed());
        assert_eq!(transport.send_calls(), 3);
    }

    #[tokio::test]
    async fn test_size_mismatch_is_data_loss() {
        let dir = TempDir::new().unwrap();
        let file = UploadFile::whole(write(&dir, "a.txt", b"hello")).unwrap();
        let transport = ScriptedTransport::new();
        transport.script_sends(vec![SendScript::ReportSize(3)]);
        let opts = options();

        let result = Uploader::new(&transport, &opts)
            .send_files(&Peer::Me, vec![file], &AtomicBool::new(false))
            .await;

        assert!(matches!(result, Err(Error::DataLoss { remote: 3, local: 5 })));
        assert_eq!(transport.send_calls(), 1);
    }

    #[tokio::test]
    async fn test_caption_and_forwarding() {
        let dir = TempDir::new().unwrap();
        let file = UploadFile::whole(write(&dir, "report.pdf", b"%PDF")).unwrap();
        let transport = ScriptedTransport::new();
        let mut opts = options();
        opts.caption = Some("{file.stem}: {file.size} bytes".to_string());
        opts.forward = vec![Peer::Username("backup".to_string())];

        let outcomes = Uploader::new(&transport, &opts)
            .send_files(&Peer::Id(42), vec![file], &AtomicBool::new(false))
            .await
            .unwrap();

        let sent = transport.sent();
        assert_eq!(sent[0].caption, "report: 4 bytes");
        assert_eq!(sent[0].peer, Peer::Id(42));
        assert!(!sent[0].force_document);
        match &outcomes[0] {
            FileOutcome::Completed { output, .. } => {
                assert_eq!(
                    transport.forwarded(),
                    vec![(Peer::Username("backup".to_string()), output.id)]
                );
            }
            FileOutcome::Failed { reason, .. } => panic!("upload failed: {}", reason),
        }
    }

    #[tokio::test]
    async fn test_caption_is_truncated() {
        let dir = TempDir::new().unwrap();
        let file = UploadFile::whole(write(&dir, "a.txt", b"x")).unwrap();
        let transport = ScriptedTransport::new();
        let mut opts = options();
        opts.caption = Some("x".repeat(50));
        opts.caption_limit = 10;

        Uploader::new(&transport, &opts)
            .send_files(&Peer::Me, vec![file], &AtomicBool::new(false))
            .await
            .unwrap();
        assert_eq!(transport.sent()[0].caption, "xxxxxxx...");
    }

    #[tokio::test]
    async fn test_delete_on_success_waits_for_last_part() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "big.bin", &[9u8; 25]);
        let parts: Vec<UploadFile> = split_file(&path, 10)
            .unwrap()
            .into_iter()
            .map(UploadFile::Part)
            .collect();
        let transport = ScriptedTransport::new();
        let mut opts = options();
        opts.delete_on_success = true;

        let uploader = Uploader::new(&transport, &opts);
        let cancel = AtomicBool::new(false);
        uploader
            .send_files(&Peer::Me, parts[..2].to_vec(), &cancel)
            .await
            .unwrap();
        assert!(path.exists());

        uploader
            .send_files(&Peer::Me, parts[2..].to_vec(), &cancel)
            .await
            .unwrap();
        assert!(!path.exists());
        assert!(transport.sent().iter().all(|s| s.force_document));
        assert_eq!(transport.sent()[1].caption, "big.bin.01");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_part_keeps_owner() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "big.bin", &[9u8; 25]);
        let parts: Vec<UploadFile> = split_file(&path, 10)
            .unwrap()
            .into_iter()
            .map(UploadFile::Part)
            .collect();
        let transport = ScriptedTransport::new();
        transport.script_sends(vec![SendScript::Fail(transient())]);
        let mut opts = options();
        opts.delete_on_success = true;
        opts.retry.max_retries = 0;

        let outcomes = Uploader::new(&transport, &opts)
            .send_files(&Peer::Me, parts, &AtomicBool::new(false))
            .await
            .unwrap();
        assert!(outcomes[0].is_failed());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_album_sends_groups_of_ten() {
        let dir = TempDir::new().unwrap();
        let files: Vec<UploadFile> = (0..12)
            .map(|i| UploadFile::whole(write(&dir, &format!("photo{:02}.jpg", i), b"jpg")).unwrap())
            .collect();
        let transport = ScriptedTransport::new();
        let mut opts = options();
        opts.album = true;
        opts.caption = Some("{file.stem}".to_string());

        let outcomes = Uploader::new(&transport, &opts)
            .send_files(&Peer::Me, files, &AtomicBool::new(false))
            .await
            .unwrap();

        let albums = transport.albums();
        assert_eq!(albums.iter().map(Vec::len).collect::<Vec<_>>(), vec![10, 2]);
        assert_eq!(albums[1], vec!["photo10.jpg", "photo11.jpg"]);
        assert_eq!(transport.send_calls(), 2);
        assert_eq!(outcomes.len(), 12);
        assert!(outcomes.iter().all(|o| !o.is_failed()));
        assert_eq!(transport.sent()[3].caption, "photo03");
    }

    #[tokio::test(start_paused = true)]
    async fn test_album_gave_up_fails_every_file_in_group() {
        let dir = TempDir::new().unwrap();
        let files: Vec<UploadFile> = ["a.jpg", "b.jpg", "c.jpg"]
            .iter()
            .map(|name| UploadFile::whole(write(&dir, name, b"jpg")).unwrap())
            .collect();
        let transport = ScriptedTransport::new();
        transport.script_sends(vec![SendScript::Fail(transient())]);
        let mut opts = options();
        opts.album = true;
        opts.retry.max_retries = 0;

        let outcomes = Uploader::new(&transport, &opts)
            .send_files(&Peer::Me, files, &AtomicBool::new(false))
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.is_failed()));
        assert!(transport.albums().is_empty());
    }

    #[tokio::test]
    async fn test_split_upload_then_join_download_round_trip() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source");
        let target = dir.path().join("target");
        std::fs::create_dir_all(&source).unwrap();
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 256) as u8).collect();
        let path = source.join("archive.tar");
        std::fs::write(&path, &data).unwrap();

        let parts: Vec<UploadFile> = split_file(&path, 300)
            .unwrap()
            .into_iter()
            .map(UploadFile::Part)
            .collect();
        assert_eq!(parts.len(), 4);

        let transport = ScriptedTransport::new();
        let opts = options();
        Uploader::new(&transport, &opts)
            .send_files(&Peer::Me, parts, &AtomicBool::new(false))
            .await
            .unwrap();

        let download = DownloadOptions {
            directory: target.clone(),
            split_files: SplitFileMode::Join,
            delete_on_success: false,
            retry: opts.retry,
            show_progress: false,
        };
        download_files(
            &transport,
            &Peer::Me,
            transport.sent_messages(),
            &download,
            &AtomicBool::new(false),
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read(target.join("archive.tar")).unwrap(), data);
        assert!(!target.join("archive.tar.00").exists());
    }
}
