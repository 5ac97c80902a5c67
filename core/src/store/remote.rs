use super::{DocumentBackend, RetryPolicy, StoreError, StoreMode, StoreResult};
use crate::config::StoreConfig;
use crate::document::Document;
use crate::index::PostingRecord;
use std::collections::{BTreeMap, HashMap};
use std::thread::sleep;

const INFO_FAMILY: &str = "info";
const INDEX_DOC_IDS: &str = "index:doc_ids";
const INDEX_TERM_FREQ: &str = "index:term_freq";
const INDEX_DOC_COUNT: &str = "index:doc_count";

/// One row as the column store sees it. Cells are keyed by `family:qualifier`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    pub key: String,
    pub cells: BTreeMap<String, Vec<u8>>,
}

impl RawRow {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into(), cells: BTreeMap::new() }
    }

    pub fn with_cell(mut self, column: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.cells.insert(column.into(), value.into());
        self
    }
}

/// Wire access to a column-oriented store.
///
/// Every call may fail mid-flight; [`RemoteStore`] owns the retry and reconnect policy.
pub trait ColumnTransport: Send {
    /// Lightweight metadata call, also used as the reachability probe.
    fn list_tables(&mut self) -> StoreResult<Vec<String>>;
    fn create_table(&mut self, table: &str, families: &[&str]) -> StoreResult<()>;
    fn put(&mut self, table: &str, row: &RawRow) -> StoreResult<()>;
    fn get(&mut self, table: &str, key: &str) -> StoreResult<Option<RawRow>>;
    /// Stream every row to `visit` until it returns `false`. Rows the transport cannot decode
    /// arrive as `Err` so the caller can count them. An error can end the scan after some rows were delivered.
    fn scan(&mut self, table: &str, visit: &mut dyn FnMut(StoreResult<RawRow>) -> bool) -> StoreResult<()>;
    fn reconnect(&mut self) -> StoreResult<()>;
    fn close(&mut self);
}

#[derive(Debug, Clone)]
pub struct Tables {
    pub documents: String,
    pub index: String,
}

pub struct RemoteStore {
    transport: Box<dyn ColumnTransport>,
    tables: Tables,
    save_retry: RetryPolicy,
    scan_retry: RetryPolicy,
    min_scan_rows: usize,
}

impl RemoteStore {
    /// Probe the store and make sure both tables exist.
    pub fn open(mut transport: Box<dyn ColumnTransport>, config: &StoreConfig) -> StoreResult<Self> {
        let existing = match transport.list_tables() {
            Ok(tables) => tables,
            Err(e) => {
                transport.close();
                return Err(e);
            }
        };
        let tables = Tables { documents: config.table_name.clone(), index: config.index_table_name.clone() };
        ensure_table(transport.as_mut(), &existing, &tables.documents, &[INFO_FAMILY, "file"]);
        ensure_table(transport.as_mut(), &existing, &tables.index, &["index"]);
        Ok(Self {
            transport,
            tables,
            save_retry: config.save_retry,
            scan_retry: config.scan_retry,
            min_scan_rows: config.min_scan_rows,
        })
    }

    fn recover(&mut self, policy: RetryPolicy) {
        self.transport.close();
        sleep(policy.backoff());
        if let Err(e) = self.transport.reconnect() {
            tracing::warn!(error = %e, "reconnection failed");
        }
    }

    fn with_retry<T>(
        &mut self,
        op: &'static str,
        policy: RetryPolicy,
        mut call: impl FnMut(&mut dyn ColumnTransport, &Tables) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let attempts = policy.attempts();
        let mut last = StoreError::Unavailable("no attempt made".into());
        for attempt in 1..=attempts {
            match call(self.transport.as_mut(), &self.tables) {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    tracing::warn!(op, attempt, attempts, error = %e, "remote store call failed");
                    last = e;
                    if attempt < attempts {
                        self.recover(policy);
                    }
                }
            }
        }
        Err(StoreError::RetriesExhausted { op, attempts, source: Box::new(last) })
    }

    fn scan_documents(&mut self, limit: Option<usize>) -> Vec<Document> {
        let policy = self.scan_retry;
        let attempts = policy.attempts();
        for attempt in 1..=attempts {
            let last_attempt = attempt == attempts;
            let mut docs: Vec<Document> = Vec::new();
            let mut skipped = 0usize;
            let mut capped = false;
            let result = self.transport.scan(&self.tables.documents, &mut |row: StoreResult<RawRow>| {
                if limit.is_some_and(|max| docs.len() >= max) {
                    capped = true;
                    return false;
                }
                match row.and_then(|row| decode_document(&row)) {
                    Ok(doc) => docs.push(doc),
                    Err(e) => {
                        skipped += 1;
                        tracing::debug!(error = %e, "skipping row");
                    }
                }
                if docs.len() % 1000 == 0 && !docs.is_empty() {
                    tracing::info!(loaded = docs.len(), "scanning documents");
                }
                true
            });
            if skipped > 0 {
                tracing::warn!(skipped, "skipped corrupt document rows");
            }
            match result {
                Ok(()) => {
                    if !capped && docs.len() < self.min_scan_rows && !last_attempt {
                        tracing::warn!(loaded = docs.len(), attempt, attempts, "scan looks incomplete, rescanning");
                        self.recover(policy);
                        continue;
                    }
                    tracing::info!(loaded = docs.len(), skipped, "loaded documents from column store");
                    return docs;
                }
                Err(e) if last_attempt => {
                    tracing::warn!(loaded = docs.len(), error = %e, "scan failed on final attempt, returning partial result");
                    return docs;
                }
                Err(e) => {
                    tracing::warn!(loaded = docs.len(), attempt, attempts, error = %e, "scan interrupted, rescanning from the start");
                    self.recover(policy);
                }
            }
        }
        Vec::new()
    }
}

fn ensure_table(transport: &mut dyn ColumnTransport, existing: &[String], table: &str, families: &[&str]) {
    if existing.iter().any(|t| t == table) {
        return;
    }
    match transport.create_table(table, families) {
        Ok(()) => tracing::info!(table, "created table"),
        // Losing a creation race to another process is fine.
        Err(e) => tracing::warn!(table, error = %e, "could not create table"),
    }
}

fn encode_document(row_key: &str, doc: &Document) -> RawRow {
    let mut row = RawRow::new(row_key);
    for (field, value) in doc.to_fields() {
        if !value.is_empty() {
            row.cells.insert(format!("{INFO_FAMILY}:{field}"), value.into_bytes());
        }
    }
    row
}

fn decode_document(row: &RawRow) -> StoreResult<Document> {
    let corrupt = |reason: String| StoreError::Corrupt { key: row.key.clone(), reason };
    let mut fields = BTreeMap::new();
    for (column, value) in &row.cells {
        let Some((family, qualifier)) = column.split_once(':') else {
            return Err(corrupt(format!("malformed column {column:?}")));
        };
        if family != INFO_FAMILY {
            continue;
        }
        let value = String::from_utf8(value.clone()).map_err(|e| corrupt(e.to_string()))?;
        fields.insert(qualifier.to_string(), value);
    }
    Document::from_fields(&fields).map_err(|e| corrupt(e.to_string()))
}

fn encode_posting(record: &PostingRecord) -> StoreResult<RawRow> {
    let term_freq = serde_json::to_string(&record.term_freq)?;
    Ok(RawRow::new(record.term.as_str())
        .with_cell(INDEX_DOC_IDS, record.doc_ids.join(","))
        .with_cell(INDEX_TERM_FREQ, term_freq)
        .with_cell(INDEX_DOC_COUNT, record.doc_ids.len().to_string()))
}

fn decode_posting(term: &str, row: &RawRow) -> StoreResult<PostingRecord> {
    let text = |column: &str| -> StoreResult<String> {
        let bytes = row.cells.get(column).cloned().unwrap_or_default();
        String::from_utf8(bytes).map_err(|e| StoreError::Corrupt { key: row.key.clone(), reason: e.to_string() })
    };
    let doc_ids: Vec<String> = text(INDEX_DOC_IDS)?
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    let raw_freq = text(INDEX_TERM_FREQ)?;
    let term_freq: HashMap<String, u32> = if raw_freq.is_empty() {
        HashMap::new()
    } else {
        serde_json::from_str(&raw_freq).unwrap_or_else(|e| {
            tracing::warn!(term, error = %e, "unreadable term frequencies");
            HashMap::new()
        })
    };
    Ok(PostingRecord::new(term, doc_ids, term_freq))
}

impl DocumentBackend for RemoteStore {
    fn mode(&self) -> StoreMode {
        StoreMode::Remote
    }

    fn put_document(&mut self, row_key: &str, doc: &Document) -> StoreResult<()> {
        let row = encode_document(row_key, doc);
        let policy = self.save_retry;
        self.with_retry("save_document", policy, |t, tables| t.put(&tables.documents, &row))
    }

    fn get_document(&mut self, row_key: &str) -> StoreResult<Option<Document>> {
        let policy = self.scan_retry;
        let row = self.with_retry("get_document", policy, |t, tables| t.get(&tables.documents, row_key))?;
        row.map(|r| decode_document(&r)).transpose()
    }

    fn all_documents(&mut self, limit: Option<usize>) -> Vec<Document> {
        self.scan_documents(limit)
    }

    fn put_index(&mut self, record: &PostingRecord) -> StoreResult<()> {
        let row = encode_posting(record)?;
        let policy = self.save_retry;
        self.with_retry("save_index", policy, |t, tables| t.put(&tables.index, &row))
    }

    fn get_index(&mut self, term: &str) -> StoreResult<Option<PostingRecord>> {
        let policy = self.scan_retry;
        let row = self.with_retry("get_index", policy, |t, tables| t.get(&tables.index, term))?;
        row.map(|r| decode_posting(term, &r)).transpose()
    }

    fn close(&mut self) {
        self.transport.close();
    }
}
