//! Relevance models scored over a per-query candidate set.
//!
//! Corpus statistics (document frequency, average length) are computed over
//! the candidates of the current query only, not the whole corpus. Scores are
//! therefore only comparable within one result list.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RankingAlgorithm {
    #[serde(rename = "tfidf")]
    TfIdf,
    #[default]
    #[serde(rename = "bm25")]
    Bm25,
}

impl FromStr for RankingAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tfidf" | "tf-idf" => Ok(RankingAlgorithm::TfIdf),
            "bm25" => Ok(RankingAlgorithm::Bm25),
            other => Err(format!("unknown ranking algorithm {other:?} (expected tfidf or bm25)")),
        }
    }
}

impl fmt::Display for RankingAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RankingAlgorithm::TfIdf => "tfidf",
            RankingAlgorithm::Bm25 => "bm25",
        })
    }
}

pub trait Scorer {
    fn score(&self, doc_tokens: &[String], query_tokens: &[String]) -> f64;
}

/// Number of candidates containing each term at least once.
fn document_frequencies(candidates: &[&[String]]) -> HashMap<String, usize> {
    let mut df: HashMap<String, usize> = HashMap::new();
    for tokens in candidates {
        let unique: HashSet<&String> = tokens.iter().collect();
        for token in unique {
            *df.entry(token.clone()).or_insert(0) += 1;
        }
    }
    df
}

fn term_counts(tokens: &[String]) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    for t in tokens {
        *counts.entry(t.as_str()).or_insert(0) += 1;
    }
    counts
}

pub struct TfIdf {
    idf: HashMap<String, f64>,
}

impl TfIdf {
    pub fn new(candidates: &[&[String]]) -> Self {
        let n = candidates.len() as f64;
        let idf = document_frequencies(candidates)
            .into_iter()
            // ln(N/(df+1)) goes negative once every candidate has the term; clamp so scores stay >= 0.
            .map(|(term, df)| (term, (n / (df as f64 + 1.0)).ln().max(0.0)))
            .collect();
        Self { idf }
    }

    pub fn idf(&self, term: &str) -> f64 {
        self.idf.get(term).copied().unwrap_or(0.0)
    }
}

impl Scorer for TfIdf {
    fn score(&self, doc_tokens: &[String], query_tokens: &[String]) -> f64 {
        if doc_tokens.is_empty() || query_tokens.is_empty() {
            return 0.0;
        }
        let counts = term_counts(doc_tokens);
        let len = doc_tokens.len() as f64;
        query_tokens
            .iter()
            .filter_map(|q| counts.get(q.as_str()).map(|&c| (c as f64 / len) * self.idf(q)))
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f64,
    /// Length normalization.
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

pub struct Bm25 {
    params: Bm25Params,
    avg_doc_len: f64,
    idf: HashMap<String, f64>,
}

impl Bm25 {
    pub fn new(candidates: &[&[String]], params: Bm25Params) -> Self {
        let n = candidates.len();
        let total: usize = candidates.iter().map(|t| t.len()).sum();
        let avg_doc_len = total as f64 / n.max(1) as f64;
        let idf = document_frequencies(candidates)
            .into_iter()
            .map(|(term, df)| {
                let (n, df) = (n as f64, df as f64);
                (term, ((n - df + 0.5) / (df + 0.5) + 1.0).ln())
            })
            .collect();
        Self { params, avg_doc_len, idf }
    }

    pub fn idf(&self, term: &str) -> f64 {
        self.idf.get(term).copied().unwrap_or(0.0)
    }

    pub fn avg_doc_len(&self) -> f64 {
        self.avg_doc_len
    }
}

impl Scorer for Bm25 {
    fn score(&self, doc_tokens: &[String], query_tokens: &[String]) -> f64 {
        if doc_tokens.is_empty() || query_tokens.is_empty() {
            return 0.0;
        }
        let Bm25Params { k1, b } = self.params;
        let counts = term_counts(doc_tokens);
        let len_ratio = doc_tokens.len() as f64 / self.avg_doc_len.max(1.0);
        let mut score = 0.0;
        for q in query_tokens {
            let Some(&tf) = counts.get(q.as_str()) else { continue };
            let tf = tf as f64;
            let numerator = self.idf(q) * tf * (k1 + 1.0);
            let denominator = tf + k1 * (1.0 - b + b * len_ratio);
            score += numerator / denominator.max(1.0);
        }
        score
    }
}

/// A scoring model built fresh for one query's candidate set.
pub enum Ranker {
    TfIdf(TfIdf),
    Bm25(Bm25),
}

impl Ranker {
    pub fn build(algorithm: RankingAlgorithm, params: Bm25Params, candidates: &[&[String]]) -> Self {
        match algorithm {
            RankingAlgorithm::TfIdf => Ranker::TfIdf(TfIdf::new(candidates)),
            RankingAlgorithm::Bm25 => Ranker::Bm25(Bm25::new(candidates, params)),
        }
    }
}

impl Scorer for Ranker {
    fn score(&self, doc_tokens: &[String], query_tokens: &[String]) -> f64 {
        match self {
            Ranker::TfIdf(m) => m.score(doc_tokens, query_tokens),
            Ranker::Bm25(m) => m.score(doc_tokens, query_tokens),
        }
    }
}

/// Boost for documents whose title covers the query.
///
/// A query token counts as matched when some title token contains it.
/// `>= 0.8` of the query matched gives 2.0, `>= 0.5` gives 1.5, else 1.0.
pub fn title_weight(title_tokens: &[String], query_tokens: &[String]) -> f64 {
    if title_tokens.is_empty() || query_tokens.is_empty() {
        return 1.0;
    }
    let matched = query_tokens
        .iter()
        .filter(|q| title_tokens.iter().any(|t| t.contains(q.as_str())))
        .count();
    let ratio = matched as f64 / query_tokens.len() as f64;
    if ratio >= 0.8 {
        2.0
    } else if ratio >= 0.5 {
        1.5
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn bm25_single_candidate_matches_formula() {
        let doc = toks(&["下载", "文件", "下载"]);
        let bm25 = Bm25::new(&[doc.as_slice()], Bm25Params::default());
        let idf = ((1.0 - 1.0 + 0.5) / (1.0 + 0.5) + 1.0f64).ln();
        // |doc| == avgdl, so the length term is 1: denominator = 2 + 1.5
        let expected = idf * 2.0 * 2.5 / 3.5;
        assert!((bm25.score(&doc, &toks(&["下载"])) - expected).abs() < 1e-12);
        assert!(bm25.score(&doc, &toks(&["下载"])) > 0.0);
    }

    #[test]
    fn bm25_denominator_is_floored() {
        let short = toks(&["ab"]);
        let long: Vec<String> = (0..50).map(|i| format!("t{i}")).collect();
        let params = Bm25Params { k1: 0.1, b: 2.0 };
        let bm25 = Bm25::new(&[short.as_slice(), long.as_slice()], params);
        // 1 + 0.1 * (1 - 2 + 2 / 25.5) < 1, floored to 1
        let expected = bm25.idf("ab") * 1.0 * 1.1;
        assert!((bm25.score(&short, &toks(&["ab"])) - expected).abs() < 1e-12);
    }

    #[test]
    fn tfidf_is_never_negative() {
        let a = toks(&["通知", "教务处"]);
        let b = toks(&["通知", "财务处"]);
        let tfidf = TfIdf::new(&[a.as_slice(), b.as_slice()]);
        assert_eq!(tfidf.idf("通知"), 0.0);
        assert!(tfidf.score(&a, &toks(&["通知", "教务处"])) >= 0.0);
        let c = toks(&["其他"]);
        let tfidf = TfIdf::new(&[a.as_slice(), b.as_slice(), c.as_slice()]);
        // idf(教务处) = ln(3/2)
        let expected = 0.5 * (1.5f64).ln();
        assert!((tfidf.score(&a, &toks(&["教务处"])) - expected).abs() < 1e-12);
    }

    #[test]
    fn empty_inputs_score_zero() {
        let doc = toks(&["通知"]);
        let ranker = Ranker::build(RankingAlgorithm::Bm25, Bm25Params::default(), &[doc.as_slice()]);
        assert_eq!(ranker.score(&[], &doc), 0.0);
        assert_eq!(ranker.score(&doc, &[]), 0.0);
        assert_eq!(ranker.score(&doc, &toks(&["缺失"])), 0.0);
    }

    #[test]
    fn title_weight_tiers() {
        let title = toks(&["教务处", "通知"]);
        assert_eq!(title_weight(&title, &toks(&["教务处", "通知"])), 2.0);
        assert_eq!(title_weight(&title, &toks(&["教务", "通知"])), 2.0);
        assert_eq!(title_weight(&title, &toks(&["教务处", "下载"])), 1.5);
        assert_eq!(title_weight(&title, &toks(&["下载", "文件", "通知"])), 1.0);
        assert_eq!(title_weight(&title, &toks(&["下载"])), 1.0);
        assert_eq!(title_weight(&[], &toks(&["下载"])), 1.0);
    }

    #[test]
    fn algorithm_names() {
        assert_eq!("tfidf".parse::<RankingAlgorithm>().unwrap(), RankingAlgorithm::TfIdf);
        assert_eq!("BM25".parse::<RankingAlgorithm>().unwrap(), RankingAlgorithm::Bm25);
        assert!("pagerank".parse::<RankingAlgorithm>().is_err());
        assert_eq!(RankingAlgorithm::TfIdf.to_string(), "tfidf");
    }
}
