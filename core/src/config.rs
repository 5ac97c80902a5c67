use crate::ranking::{Bm25Params, RankingAlgorithm};
use crate::store::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Process-wide settings, read once at startup and handed to each component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub search: SearchConfig,
    pub tokenizer: TokenizerConfig,
}

impl Config {
    /// Read a JSON config file. Missing keys take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut f = File::open(path).with_context(|| format!("opening config {}", path.display()))?;
        let mut buf = String::new();
        f.read_to_string(&mut buf)?;
        let config: Config =
            serde_json::from_str(&buf).with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Column store REST gateway host.
    pub host: String,
    pub port: u16,
    pub table_name: String,
    pub index_table_name: String,
    /// Root of the local-file fallback.
    pub local_path: PathBuf,
    pub timeout_ms: u64,
    /// Clean scans shorter than this are treated as truncated and rescanned while attempts remain.
    pub min_scan_rows: usize,
    pub save_retry: RetryPolicy,
    pub scan_retry: RetryPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8080,
            table_name: "ustc_documents".into(),
            index_table_name: "ustc_index".into(),
            local_path: PathBuf::from("./data/storage"),
            timeout_ms: 5000,
            min_scan_rows: 100,
            save_retry: RetryPolicy::new(5, 1000),
            scan_retry: RetryPolicy::new(3, 1000),
        }
    }
}

impl StoreConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub ranking_algorithm: RankingAlgorithm,
    pub max_results: usize,
    pub bm25: Bm25Params,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { ranking_algorithm: RankingAlgorithm::Bm25, max_results: 50, bm25: Bm25Params::default() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    /// Words injected on top of the built-in campus vocabulary.
    pub extra_words: Vec<String>,
    /// Optional jieba-format user dictionary (`word [freq] [tag]` per line).
    pub user_dict: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: Config = serde_json::from_str(r#"{"search": {"ranking_algorithm": "tfidf"}, "store": {"port": 9000}}"#).unwrap();
        assert_eq!(cfg.search.ranking_algorithm, RankingAlgorithm::TfIdf);
        assert_eq!(cfg.search.max_results, 50);
        assert_eq!(cfg.store.port, 9000);
        assert_eq!(cfg.store.save_retry.max_attempts, 5);
        assert_eq!(cfg.store.scan_retry.max_attempts, 3);
        assert_eq!(cfg.store.base_url(), "http://localhost:9000/");
    }
}
