//! Filesystem-backed work queue.
//!
//! Each queue is a directory under the spool root; each message is one file
//! named `<message-id>.json` holding the body verbatim. Message ids sort in
//! enqueue order, so a directory listing is the queue.
//!
//! Writes are crash-safe: the body goes to `<id>.json.tmp`, is fsynced,
//! renamed into place, and the directory is fsynced. A crash therefore leaves
//! either no message or a complete one; stray `.tmp` files are ignored.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::MessageId;

use super::{QueueReceiver, QueueUrl, ReceivedMessage, TransportError, WorkQueue};

const MESSAGE_EXTENSION: &str = "json";
const QUARANTINE_EXTENSION: &str = "bad";

/// Errors specific to the spool layout.
#[derive(Debug, Error)]
pub enum SpoolQueueError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid queue name: {0}")]
    InvalidQueueName(String),

    #[error("invalid message id: {0}")]
    InvalidMessageId(String),
}

impl From<SpoolQueueError> for TransportError {
    fn from(e: SpoolQueueError) -> Self {
        match e {
            SpoolQueueError::Io(e) => TransportError::Io(e),
            SpoolQueueError::InvalidQueueName(name) => TransportError::QueueNotFound(name),
            other => TransportError::Other(other.to_string()),
        }
    }
}

/// Rejects names that could escape the spool root or collide with temp files.
fn validate_component(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
}

/// Moves an unreadable message out of the listing as `<id>.json.bad`.
fn quarantine(path: &Path) -> io::Result<()> {
    let bad = path.with_extension(format!("{MESSAGE_EXTENSION}.{QUARANTINE_EXTENSION}"));
    std::fs::rename(path, &bad)?;
    if let Some(dir) = path.parent() {
        fsync_dir(dir)?;
    }
    Ok(())
}

fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

fn fsync_dir(dir: &Path) -> io::Result<()> {
    OpenOptions::new().read(true).open(dir)?.sync_all()
}

/// A work queue stored as files under a root directory.
#[derive(Debug)]
pub struct SpoolQueue {
    root: PathBuf,
    sequence: AtomicU64,
}

impl SpoolQueue {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SpoolQueue {
            root: root.into(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the directory for a queue. Idempotent.
    pub fn create_queue(&self, name: &str) -> Result<QueueUrl, SpoolQueueError> {
        let dir = self.queue_dir(name)?;
        std::fs::create_dir_all(&dir)?;
        fsync_dir(&self.root)?;
        Ok(QueueUrl(dir.to_string_lossy().into_owned()))
    }

    fn queue_dir(&self, name: &str) -> Result<PathBuf, SpoolQueueError> {
        if !validate_component(name) {
            return Err(SpoolQueueError::InvalidQueueName(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    fn dir_for(&self, url: &QueueUrl) -> Result<PathBuf, SpoolQueueError> {
        let dir = PathBuf::from(&url.0);
        if dir.parent() != Some(self.root.as_path()) || !dir.is_dir() {
            return Err(SpoolQueueError::InvalidQueueName(url.0.clone()));
        }
        Ok(dir)
    }

    /// Ids sort lexicographically in enqueue order within one process and
    /// across restarts (timestamp first, then a per-process sequence).
    fn next_message_id(&self) -> MessageId {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.9fZ").to_string().replace('.', "");
        MessageId::new(format!("{stamp}-{seq:08}"))
    }

    fn write_message(&self, dir: &Path, body: &str) -> Result<MessageId, SpoolQueueError> {
        let id = self.next_message_id();
        let path = dir.join(format!("{id}.{MESSAGE_EXTENSION}"));
        let temp = path.with_extension("json.tmp");

        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp)?;
            file.write_all(body.as_bytes())?;
            fsync_file(&file)?;
        }
        std::fs::rename(&temp, &path)?;
        fsync_dir(dir)?;

        Ok(id)
    }

    fn read_messages(&self, dir: &Path, max: usize) -> Result<Vec<ReceivedMessage>, SpoolQueueError> {
        let mut ids: Vec<String> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(MESSAGE_EXTENSION) {
                    return None;
                }
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
            })
            .collect();
        ids.sort();

        let mut messages = Vec::with_capacity(ids.len().min(max));
        for id in ids.into_iter().take(max) {
            let path = dir.join(format!("{id}.{MESSAGE_EXTENSION}"));
            match std::fs::read(&path) {
                // Undecodable bodies are still handed out so the receiver can
                // reject and delete them instead of leaving them at the head.
                Ok(bytes) => messages.push(ReceivedMessage {
                    id: MessageId::new(id),
                    body: String::from_utf8_lossy(&bytes).into_owned(),
                }),
                // Deleted by another consumer between listing and reading.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to read spooled message; quarantining");
                    quarantine(&path)?;
                }
            }
        }
        Ok(messages)
    }

    fn remove_message(&self, dir: &Path, id: &MessageId) -> Result<(), SpoolQueueError> {
        if !validate_component(id.as_str()) {
            return Err(SpoolQueueError::InvalidMessageId(id.to_string()));
        }
        let path = dir.join(format!("{id}.{MESSAGE_EXTENSION}"));
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        fsync_dir(dir)?;
        Ok(())
    }
}

#[async_trait]
impl WorkQueue for SpoolQueue {
    async fn queue_url(&self, queue_name: &str) -> Result<QueueUrl, TransportError> {
        let dir = self.queue_dir(queue_name)?;
        if !dir.is_dir() {
            return Err(TransportError::QueueNotFound(queue_name.to_string()));
        }
        Ok(QueueUrl(dir.to_string_lossy().into_owned()))
    }

    async fn send_message(
        &self,
        queue: &QueueUrl,
        body: &str,
        delay: Duration,
    ) -> Result<MessageId, TransportError> {
        if !delay.is_zero() {
            return Err(TransportError::Other(
                "delayed delivery is not supported by the spool queue".to_string(),
            ));
        }
        let dir = self.dir_for(queue)?;
        let id = self.write_message(&dir, body)?;
        debug!(queue = %queue.0, message_id = %id, "Spooled message");
        Ok(id)
    }
}

#[async_trait]
impl QueueReceiver for SpoolQueue {
    async fn receive_messages(
        &self,
        queue: &QueueUrl,
        max: usize,
    ) -> Result<Vec<ReceivedMessage>, TransportError> {
        let dir = self.dir_for(queue)?;
        Ok(self.read_messages(&dir, max)?)
    }

    async fn delete_message(
        &self,
        queue: &QueueUrl,
        id: &MessageId,
    ) -> Result<(), TransportError> {
        let dir = self.dir_for(queue)?;
        Ok(self.remove_message(&dir, id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_queue_directory_is_not_found() {
        let root = tempdir().unwrap();
        let queue = SpoolQueue::new(root.path());
        let err = queue.queue_url("results").await.unwrap_err();
        assert!(matches!(err, TransportError::QueueNotFound(_)));
    }

    #[tokio::test]
    async fn send_receive_delete() {
        let root = tempdir().unwrap();
        let queue = SpoolQueue::new(root.path());
        queue.create_queue("results").unwrap();
        let url = queue.queue_url("results").await.unwrap();

        let first = queue.send_message(&url, r#"{"n":1}"#, Duration::ZERO).await.unwrap();
        let second = queue.send_message(&url, r#"{"n":2}"#, Duration::ZERO).await.unwrap();

        let received = queue.receive_messages(&url, 10).await.unwrap();
        assert_eq!(
            received,
            vec![
                ReceivedMessage { id: first.clone(), body: r#"{"n":1}"#.to_string() },
                ReceivedMessage { id: second.clone(), body: r#"{"n":2}"#.to_string() },
            ]
        );

        queue.delete_message(&url, &first).await.unwrap();
        let remaining = queue.receive_messages(&url, 10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, second);
    }

    #[tokio::test]
    async fn messages_survive_reopen() {
        let root = tempdir().unwrap();
        {
            let queue = SpoolQueue::new(root.path());
            queue.create_queue("results").unwrap();
            let url = queue.queue_url("results").await.unwrap();
            queue.send_message(&url, "persisted", Duration::ZERO).await.unwrap();
        }

        let queue = SpoolQueue::new(root.path());
        let url = queue.queue_url("results").await.unwrap();
        let received = queue.receive_messages(&url, 10).await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].body, "persisted");
    }

    #[tokio::test]
    async fn temp_files_are_ignored() {
        let root = tempdir().unwrap();
        let queue = SpoolQueue::new(root.path());
        queue.create_queue("results").unwrap();
        std::fs::write(root.path().join("results/partial.json.tmp"), "half").unwrap();

        let url = queue.queue_url("results").await.unwrap();
        assert!(queue.receive_messages(&url, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn undecodable_messages_are_still_received() {
        let root = tempdir().unwrap();
        let queue = SpoolQueue::new(root.path());
        queue.create_queue("results").unwrap();
        let dir = root.path().join("results");
        for n in 0..3 {
            std::fs::write(dir.join(format!("0000-bad-{n}.json")), [0xff, 0xfe, 0x00]).unwrap();
        }
        let url = queue.queue_url("results").await.unwrap();
        let good = queue.send_message(&url, r#"{"n":1}"#, Duration::ZERO).await.unwrap();

        let received = queue.receive_messages(&url, 2).await.unwrap();
        assert_eq!(received.len(), 2);
        assert!(received.iter().all(|m| m.id != good));

        for message in &received {
            queue.delete_message(&url, &message.id).await.unwrap();
        }
        let received = queue.receive_messages(&url, 2).await.unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[1].id, good);
        assert_eq!(received[1].body, r#"{"n":1}"#);
    }

    #[tokio::test]
    async fn unreadable_messages_are_quarantined() {
        let root = tempdir().unwrap();
        let queue = SpoolQueue::new(root.path());
        queue.create_queue("results").unwrap();
        let dir = root.path().join("results");
        // A directory with a message name cannot be read as a file.
        std::fs::create_dir(dir.join("0000-unreadable.json")).unwrap();
        let url = queue.queue_url("results").await.unwrap();
        let good = queue.send_message(&url, "ok", Duration::ZERO).await.unwrap();

        let received = queue.receive_messages(&url, 1).await.unwrap();
        assert!(received.is_empty());
        assert!(dir.join("0000-unreadable.json.bad").exists());

        let received = queue.receive_messages(&url, 1).await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].id, good);
    }

    #[tokio::test]
    async fn deleting_twice_is_ok() {
        let root = tempdir().unwrap();
        let queue = SpoolQueue::new(root.path());
        queue.create_queue("results").unwrap();
        let url = queue.queue_url("results").await.unwrap();
        let id = queue.send_message(&url, "x", Duration::ZERO).await.unwrap();

        queue.delete_message(&url, &id).await.unwrap();
        queue.delete_message(&url, &id).await.unwrap();
    }

    #[test]
    fn unsafe_queue_names_are_rejected() {
        let root = tempdir().unwrap();
        let queue = SpoolQueue::new(root.path());
        for name in ["", "..", "../escape", "a/b", ".hidden"] {
            assert!(
                matches!(queue.create_queue(name), Err(SpoolQueueError::InvalidQueueName(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn foreign_queue_url_is_rejected() {
        let root = tempdir().unwrap();
        let queue = SpoolQueue::new(root.path());
        let url = QueueUrl("/tmp".to_string());
        assert!(queue.send_message(&url, "x", Duration::ZERO).await.is_err());
    }
}
