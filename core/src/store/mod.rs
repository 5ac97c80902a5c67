//! Durable storage for documents and postings.
//!
//! Callers talk to [`DocumentStore`]; which backend sits behind it (the remote
//! column store or the local JSON fallback) is decided once in
//! [`DocumentStore::connect`] and never changes for the life of the instance.

mod local;
mod remote;
mod rest;

pub use local::{LocalPaths, LocalStore};
pub use remote::{ColumnTransport, RawRow, RemoteStore, Tables};
pub use rest::RestTransport;

use crate::config::StoreConfig;
use crate::document::{doc_id_for, DocId, Document};
use crate::index::PostingRecord;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection-level failure: refused, reset, timed out.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered but rejected the request.
    #[error("backend error: {0}")]
    Backend(String),

    /// A stored row could not be decoded.
    #[error("corrupt row {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{op} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        op: &'static str,
        attempts: u32,
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    /// Worth a reconnect and another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Backend(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Bounded retry: how many attempts, and how long to wait before reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, backoff_ms: u64) -> Self {
        Self { max_attempts, backoff_ms }
    }

    /// At least one attempt is always made.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Remote,
    Local,
}

/// Capability set shared by the remote and local backends.
pub trait DocumentBackend: Send {
    fn mode(&self) -> StoreMode;
    fn put_document(&mut self, row_key: &str, doc: &Document) -> StoreResult<()>;
    fn get_document(&mut self, row_key: &str) -> StoreResult<Option<Document>>;
    /// Best-effort full read; never fails, corrupt rows are skipped.
    fn all_documents(&mut self, limit: Option<usize>) -> Vec<Document>;
    fn put_index(&mut self, record: &PostingRecord) -> StoreResult<()>;
    fn get_index(&mut self, term: &str) -> StoreResult<Option<PostingRecord>>;
    fn close(&mut self);
}

/// Row key for a document save: first 8 hex chars of md5(url), `_`, epoch millis.
///
/// Not the doc id: saving the same URL twice yields two rows.
pub fn row_key_for(url: &str, millis: i128) -> String {
    format!("{}_{}", &doc_id_for(url)[..8], millis)
}

pub struct DocumentStore {
    backend: Box<dyn DocumentBackend>,
    /// Last millis stamped into a row key; keys from one store never repeat.
    last_millis: i128,
}

impl DocumentStore {
    /// Connect to the remote column store, falling back to local files when it is unreachable.
    pub fn connect(config: &StoreConfig) -> Result<Self> {
        match RestTransport::new(config) {
            Ok(transport) => Self::connect_with(Box::new(transport), config),
            Err(e) => {
                tracing::warn!(error = %e, "could not build store transport");
                Self::fallback(config)
            }
        }
    }

    /// Same as [`connect`](Self::connect) with a caller-supplied transport.
    pub fn connect_with(transport: Box<dyn ColumnTransport>, config: &StoreConfig) -> Result<Self> {
        match RemoteStore::open(transport, config) {
            Ok(remote) => {
                tracing::info!(host = %config.host, port = config.port, "column store connection established");
                Ok(Self { backend: Box::new(remote), last_millis: 0 })
            }
            Err(e) => {
                tracing::warn!(error = %e, "column store connection failed");
                Self::fallback(config)
            }
        }
    }

    pub fn local<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        let local = LocalStore::open(root).with_context(|| format!("opening local storage at {}", root.display()))?;
        Ok(Self { backend: Box::new(local), last_millis: 0 })
    }

    fn fallback(config: &StoreConfig) -> Result<Self> {
        tracing::warn!(path = %config.local_path.display(), "column store not available, using local storage");
        Self::local(&config.local_path)
    }

    pub fn mode(&self) -> StoreMode {
        self.backend.mode()
    }

    /// Current epoch millis, bumped past the previous save when the clock has not moved.
    fn next_millis(&mut self) -> i128 {
        let now = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        self.last_millis = now.max(self.last_millis + 1);
        self.last_millis
    }

    pub fn save_document(&mut self, doc: &Document) -> StoreResult<String> {
        let millis = self.next_millis();
        let row_key = row_key_for(&doc.url, millis);
        self.backend.put_document(&row_key, doc)?;
        tracing::debug!(%row_key, url = %doc.url, "saved document");
        Ok(row_key)
    }

    pub fn get_document(&mut self, row_key: &str) -> StoreResult<Option<Document>> {
        self.backend.get_document(row_key)
    }

    pub fn get_all_documents(&mut self, limit: Option<usize>) -> Vec<Document> {
        self.backend.all_documents(limit)
    }

    pub fn save_index(&mut self, term: &str, doc_ids: &[DocId], term_freq: &HashMap<DocId, u32>) -> StoreResult<()> {
        let record = PostingRecord::new(term, doc_ids.to_vec(), term_freq.clone());
        self.backend.put_index(&record)
    }

    pub fn get_index(&mut self, term: &str) -> StoreResult<Option<PostingRecord>> {
        self.backend.get_index(term)
    }

    /// Release the connection. Safe to call more than once.
    pub fn close(&mut self) {
        self.backend.close();
    }
}

impl Drop for DocumentStore {
    fn drop(&mut self) {
        self.backend.close();
    }
}
