use crate::document::{DocId, Document};
use crate::store::DocumentStore;
use crate::tokenizer::Tokenizer;
use anyhow::{bail, Result};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

/// A term's postings as persisted and read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct PostingRecord {
    pub term: String,
    pub doc_ids: Vec<DocId>,
    pub term_freq: HashMap<DocId, u32>,
    pub doc_count: usize,
}

impl PostingRecord {
    pub fn new(term: impl Into<String>, doc_ids: Vec<DocId>, term_freq: HashMap<DocId, u32>) -> Self {
        let doc_count = doc_ids.len();
        Self { term: term.into(), doc_ids, term_freq, doc_count }
    }
}

/// term -> {doc_id -> occurrences of the term in that document}
#[derive(Debug, Default)]
pub struct InvertedIndex {
    postings: HashMap<String, HashMap<DocId, u32>>,
}

impl InvertedIndex {
    pub fn new() -> Self { Self::default() }

    /// Merge one document's token stream. Re-adding a doc id replaces its counts.
    pub fn add_document(&mut self, doc_id: &DocId, tokens: &[String]) {
        let mut counts: HashMap<&str, u32> = HashMap::new();
        for token in tokens {
            *counts.entry(token.as_str()).or_insert(0) += 1;
        }
        for (term, tf) in counts {
            self.postings.entry(term.to_string()).or_default().insert(doc_id.clone(), tf);
        }
    }

    pub fn get(&self, term: &str) -> Option<&HashMap<DocId, u32>> { self.postings.get(term) }
    pub fn len(&self) -> usize { self.postings.len() }
    pub fn is_empty(&self) -> bool { self.postings.is_empty() }

    /// Terms in sorted order, for reproducible persistence.
    pub fn sorted_terms(&self) -> Vec<&String> {
        let mut terms: Vec<&String> = self.postings.keys().collect();
        terms.sort();
        terms
    }
}

/// Collapse rows that share a URL, keeping the newest crawl (later rows win ties)
/// at the position where the URL was first seen.
pub fn collapse_duplicates(docs: Vec<Document>) -> Vec<(DocId, Document)> {
    let mut out: Vec<(DocId, Document)> = Vec::with_capacity(docs.len());
    let mut position: HashMap<DocId, usize> = HashMap::new();
    for doc in docs {
        let doc_id = doc.doc_id();
        match position.entry(doc_id) {
            Entry::Occupied(slot) => {
                let existing = &mut out[*slot.get()].1;
                if doc.crawl_time >= existing.crawl_time {
                    *existing = doc;
                }
            }
            Entry::Vacant(slot) => {
                out.push((slot.key().clone(), doc));
                slot.insert(out.len() - 1);
            }
        }
    }
    out
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub documents_loaded: usize,
    pub documents_indexed: usize,
    pub documents_skipped: usize,
    pub duplicates_collapsed: usize,
    pub terms: usize,
    pub terms_written: usize,
    pub terms_failed: usize,
}

/// Offline batch job: whole corpus in, postings out.
pub struct IndexBuilder {
    tokenizer: Arc<Tokenizer>,
    documents: HashMap<DocId, Document>,
    doc_tokens: HashMap<DocId, Vec<String>>,
    index: InvertedIndex,
}

impl IndexBuilder {
    pub fn new(tokenizer: Arc<Tokenizer>) -> Self {
        Self { tokenizer, documents: HashMap::new(), doc_tokens: HashMap::new(), index: InvertedIndex::new() }
    }

    pub fn build(&mut self, store: &mut DocumentStore, limit: Option<usize>) -> BuildReport {
        let loaded = store.get_all_documents(limit);
        let mut report = BuildReport { documents_loaded: loaded.len(), ..Default::default() };
        tracing::info!(documents = loaded.len(), "loaded corpus");

        let corpus = collapse_duplicates(loaded);
        report.duplicates_collapsed = report.documents_loaded - corpus.len();
        let total = corpus.len();
        for (idx, (doc_id, doc)) in corpus.into_iter().enumerate() {
            if idx % 100 == 0 {
                tracing::info!(processed = idx, total, "indexing documents");
            }
            match self.index_document(doc_id, doc) {
                Ok(()) => report.documents_indexed += 1,
                Err(e) => {
                    report.documents_skipped += 1;
                    tracing::warn!(error = %e, "skipping document");
                }
            }
        }
        report.terms = self.index.len();
        tracing::info!(terms = report.terms, "index built");

        for term in self.index.sorted_terms() {
            let Some(postings) = self.index.get(term) else { continue };
            let mut doc_ids: Vec<DocId> = postings.keys().cloned().collect();
            doc_ids.sort();
            match store.save_index(term, &doc_ids, postings) {
                Ok(()) => report.terms_written += 1,
                Err(e) => {
                    report.terms_failed += 1;
                    tracing::warn!(%term, error = %e, "failed to save postings");
                }
            }
        }
        tracing::info!(written = report.terms_written, failed = report.terms_failed, "index saved");
        report
    }

    fn index_document(&mut self, doc_id: DocId, doc: Document) -> Result<()> {
        if doc.url.trim().is_empty() {
            bail!("document {:?} has no url", doc.title);
        }
        let mut tokens = self.tokenizer.tokenize_title(&doc.title);
        tokens.extend(self.tokenizer.tokenize_content(&doc.content));
        self.index.add_document(&doc_id, &tokens);
        self.doc_tokens.insert(doc_id.clone(), tokens);
        self.documents.insert(doc_id, doc);
        Ok(())
    }

    pub fn documents(&self) -> &HashMap<DocId, Document> { &self.documents }
    pub fn doc_tokens(&self) -> &HashMap<DocId, Vec<String>> { &self.doc_tokens }
    pub fn inverted_index(&self) -> &InvertedIndex { &self.index }
}
