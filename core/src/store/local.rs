use super::{DocumentBackend, StoreError, StoreMode, StoreResult};
use crate::document::{DocId, Document};
use crate::index::PostingRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{create_dir_all, read_dir, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// On-disk posting file: `index/<term>.json`.
#[derive(Debug, Serialize, Deserialize)]
struct PostingFile {
    term: String,
    doc_ids: Vec<DocId>,
    #[serde(default)]
    term_freq: HashMap<DocId, u32>,
}

pub struct LocalPaths {
    pub root: PathBuf,
}

impl LocalPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn documents_dir(&self) -> PathBuf { self.root.join("documents") }
    pub fn index_dir(&self) -> PathBuf { self.root.join("index") }
    fn document(&self, row_key: &str) -> PathBuf { self.documents_dir().join(format!("{row_key}.json")) }
    fn posting(&self, term: &str) -> PathBuf { self.index_dir().join(format!("{term}.json")) }
}

/// Keys become file names, so anything that could escape the directory is refused.
fn checked_key(key: &str) -> StoreResult<&str> {
    if key.is_empty() || key == "." || key == ".." || key.contains(['/', '\\', '\0']) {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(key)
}

fn read_text(path: &Path) -> StoreResult<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut f = File::open(path)?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    Ok(Some(buf))
}

fn write_text(path: &Path, text: &str) -> StoreResult<()> {
    let mut f = File::create(path)?;
    f.write_all(text.as_bytes())?;
    Ok(())
}

fn load_document(path: &Path, key: &str) -> StoreResult<Option<Document>> {
    let Some(text) = read_text(path)? else { return Ok(None) };
    let corrupt = |reason: String| StoreError::Corrupt { key: key.to_string(), reason };
    let value: serde_json::Value = serde_json::from_str(&text).map_err(|e| corrupt(e.to_string()))?;
    Document::from_json(&value).map(Some).map_err(|e| corrupt(e.to_string()))
}

/// Fallback backend: one pretty-printed JSON file per document, one per term.
pub struct LocalStore {
    paths: LocalPaths,
}

impl LocalStore {
    pub fn open<P: AsRef<Path>>(root: P) -> StoreResult<Self> {
        let paths = LocalPaths::new(root);
        create_dir_all(paths.documents_dir())?;
        create_dir_all(paths.index_dir())?;
        Ok(Self { paths })
    }

    pub fn paths(&self) -> &LocalPaths {
        &self.paths
    }
}

impl DocumentBackend for LocalStore {
    fn mode(&self) -> StoreMode {
        StoreMode::Local
    }

    fn put_document(&mut self, row_key: &str, doc: &Document) -> StoreResult<()> {
        let path = self.paths.document(checked_key(row_key)?);
        let json = serde_json::to_string_pretty(&doc.to_fields())?;
        write_text(&path, &json)
    }

    fn get_document(&mut self, row_key: &str) -> StoreResult<Option<Document>> {
        load_document(&self.paths.document(checked_key(row_key)?), row_key)
    }

    fn all_documents(&mut self, limit: Option<usize>) -> Vec<Document> {
        let entries = match read_dir(self.paths.documents_dir()) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "cannot list local documents");
                return Vec::new();
            }
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("json"))
            .collect();
        files.sort();

        let mut docs = Vec::new();
        let mut skipped = 0usize;
        for path in files {
            if limit.is_some_and(|max| docs.len() >= max) {
                break;
            }
            let key = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_string();
            match load_document(&path, &key) {
                Ok(Some(doc)) => docs.push(doc),
                Ok(None) => {}
                Err(e) => {
                    skipped += 1;
                    tracing::debug!(error = %e, "skipping document file");
                }
            }
        }
        if skipped > 0 {
            tracing::warn!(skipped, "skipped corrupt document files");
        }
        tracing::info!(loaded = docs.len(), skipped, "loaded documents from local storage");
        docs
    }

    fn put_index(&mut self, record: &PostingRecord) -> StoreResult<()> {
        let path = self.paths.posting(checked_key(&record.term)?);
        let file = PostingFile {
            term: record.term.clone(),
            doc_ids: record.doc_ids.clone(),
            term_freq: record.term_freq.clone(),
        };
        write_text(&path, &serde_json::to_string(&file)?)
    }

    fn get_index(&mut self, term: &str) -> StoreResult<Option<PostingRecord>> {
        let Some(text) = read_text(&self.paths.posting(checked_key(term)?))? else { return Ok(None) };
        let file: PostingFile = serde_json::from_str(&text)
            .map_err(|e| StoreError::Corrupt { key: term.to_string(), reason: e.to_string() })?;
        Ok(Some(PostingRecord::new(file.term, file.doc_ids, file.term_freq)))
    }

    fn close(&mut self) {}
}
