pub mod config;
pub mod document;
pub mod index;
pub mod ranking;
pub mod searcher;
pub mod store;
pub mod tokenizer;

pub use config::{Config, SearchConfig, StoreConfig, TokenizerConfig};
pub use document::{doc_id_for, DocId, Document, DocumentError, FileType};
pub use index::{BuildReport, IndexBuilder, InvertedIndex, PostingRecord};
pub use ranking::{title_weight, Bm25, Bm25Params, Ranker, RankingAlgorithm, Scorer, TfIdf};
pub use searcher::{SearchHit, Searcher};
pub use store::{DocumentStore, RetryPolicy, StoreError, StoreMode, StoreResult};
pub use tokenizer::Tokenizer;
