use crate::config::SearchConfig;
use crate::document::{DocId, Document};
use crate::index::collapse_duplicates;
use crate::ranking::{title_weight, RankingAlgorithm, Ranker, Scorer};
use crate::store::DocumentStore;
use crate::tokenizer::Tokenizer;
use once_cell::sync::OnceCell;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit<'a> {
    pub doc_id: &'a str,
    pub document: &'a Document,
    pub score: f64,
}

/// Token sequences for every hydrated document, parallel to `Searcher::documents`.
struct Snapshot {
    tokens: Vec<Vec<String>>,
    title_tokens: Vec<Vec<String>>,
}

/// In-memory query engine over a corpus hydrated once from the store.
///
/// Tokenizing the corpus happens exactly once, either through [`warm`](Self::warm)
/// before serving or on the first query; concurrent first queries wait on the same
/// initialization instead of racing it.
pub struct Searcher {
    tokenizer: Arc<Tokenizer>,
    settings: SearchConfig,
    documents: Vec<(DocId, Document)>,
    snapshot: OnceCell<Snapshot>,
}

impl Searcher {
    pub fn from_store(store: &mut DocumentStore, tokenizer: Arc<Tokenizer>, settings: SearchConfig) -> Self {
        tracing::info!("loading documents from storage");
        let docs = store.get_all_documents(None);
        Self::from_documents(docs, tokenizer, settings)
    }

    pub fn from_documents(docs: Vec<Document>, tokenizer: Arc<Tokenizer>, settings: SearchConfig) -> Self {
        let loaded = docs.len();
        let documents = collapse_duplicates(docs);
        tracing::info!(loaded, documents = documents.len(), "hydrated documents");
        Self { tokenizer, settings, documents, snapshot: OnceCell::new() }
    }

    /// Tokenize the corpus now rather than on the first query.
    pub fn warm(&self) {
        self.snapshot();
    }

    fn snapshot(&self) -> &Snapshot {
        self.snapshot.get_or_init(|| {
            tracing::info!(documents = self.documents.len(), "building document tokens");
            let mut tokens = Vec::with_capacity(self.documents.len());
            let mut title_tokens = Vec::with_capacity(self.documents.len());
            for (_, doc) in &self.documents {
                let title = self.tokenizer.tokenize_title(&doc.title);
                let mut all = title.clone();
                all.extend(self.tokenizer.tokenize_content(&doc.content));
                tokens.push(all);
                title_tokens.push(title);
            }
            tracing::info!("document tokens built");
            Snapshot { tokens, title_tokens }
        })
    }

    pub fn len(&self) -> usize { self.documents.len() }
    pub fn is_empty(&self) -> bool { self.documents.is_empty() }
    pub fn algorithm(&self) -> RankingAlgorithm { self.settings.ranking_algorithm }
    pub fn default_max_results(&self) -> usize { self.settings.max_results }
    pub fn tokenizer(&self) -> &Tokenizer { &self.tokenizer }

    /// Ranked hits for `query`; `None` or `Some(0)` means the configured default limit.
    pub fn search(&self, query: &str, max_results: Option<usize>) -> Vec<SearchHit<'_>> {
        let limit = self.limit(max_results);
        let mut hits = self.rank(query);
        hits.truncate(limit);
        hits
    }

    /// Like [`search`](Self::search), keeping only documents whose source contains `source`.
    /// The filter runs after ranking over the full result list.
    pub fn search_by_source(&self, query: &str, source: &str, max_results: Option<usize>) -> Vec<SearchHit<'_>> {
        let limit = self.limit(max_results);
        self.rank(query)
            .into_iter()
            .filter(|hit| hit.document.source.contains(source))
            .take(limit)
            .collect()
    }

    /// Distinct non-empty sources, sorted.
    pub fn sources(&self) -> Vec<&str> {
        let set: BTreeSet<&str> = self
            .documents
            .iter()
            .map(|(_, d)| d.source.as_str())
            .filter(|s| !s.is_empty())
            .collect();
        set.into_iter().collect()
    }

    fn limit(&self, max_results: Option<usize>) -> usize {
        match max_results {
            Some(n) if n > 0 => n,
            _ => self.settings.max_results,
        }
    }

    fn rank(&self, query: &str) -> Vec<SearchHit<'_>> {
        if query.trim().is_empty() {
            return Vec::new();
        }
        let query_tokens = self.tokenizer.tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }
        let snapshot = self.snapshot();

        // Substring match against title, content, or any of the document's own tokens,
        // so partial and compound words still find their documents.
        let candidates: Vec<usize> = self
            .documents
            .iter()
            .enumerate()
            .filter(|(i, (_, doc))| {
                query_tokens.iter().any(|q| {
                    doc.title.contains(q.as_str())
                        || doc.content.contains(q.as_str())
                        || snapshot.tokens[*i].iter().any(|t| t.contains(q.as_str()))
                })
            })
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let candidate_tokens: Vec<&[String]> = candidates.iter().map(|&i| snapshot.tokens[i].as_slice()).collect();
        let ranker = Ranker::build(self.settings.ranking_algorithm, self.settings.bm25, &candidate_tokens);

        let mut hits: Vec<SearchHit<'_>> = candidates
            .iter()
            .map(|&i| {
                let (doc_id, document) = &self.documents[i];
                let base = ranker.score(&snapshot.tokens[i], &query_tokens);
                let score = base * title_weight(&snapshot.title_tokens[i], &query_tokens);
                SearchHit { doc_id: doc_id.as_str(), document, score }
            })
            .collect();
        // Stable: equal scores keep corpus order.
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        tracing::debug!(query, candidates = candidates.len(), "ranked query");
        hits
    }
}
