use crate::config::TokenizerConfig;
use anyhow::{Context, Result};
use jieba_rs::Jieba;
use lazy_static::lazy_static;
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "的","了","在","是","我","有","和","就","不","人","都","一","一个","上","也","很",
            "到","说","要","去","你","会","着","没有","看","好","自己","这",
        ];
        words.iter().copied().collect()
    };
}

/// Campus vocabulary that must never be split.
pub const DOMAIN_WORDS: &[&str] = &[
    "中科大", "科大", "USTC", "中国科学技术大学",
    "教务处", "财务处", "学工处", "招生办",
    "计算机学院", "数学学院", "物理学院",
    "下载中心", "文件下载",
];

fn is_stopword(token: &str) -> bool { STOPWORDS.contains(token) }

/// Word segmenter for mixed Chinese/Latin text.
///
/// Title and content go through the same pipeline; they keep separate entry
/// points so callers do not have to change if the two ever diverge.
pub struct Tokenizer {
    jieba: Jieba,
}

impl Tokenizer {
    pub fn new(config: &TokenizerConfig) -> Result<Self> {
        let mut jieba = Jieba::new();
        if let Some(path) = &config.user_dict {
            let f = File::open(path).with_context(|| format!("opening user dictionary {}", path.display()))?;
            jieba
                .load_dict(&mut BufReader::new(f))
                .with_context(|| format!("loading user dictionary {}", path.display()))?;
        }
        for word in DOMAIN_WORDS.iter().copied().chain(config.extra_words.iter().map(String::as_str)) {
            jieba.add_word(word, None, None);
        }
        tracing::debug!(extra = config.extra_words.len(), "tokenizer ready");
        Ok(Self { jieba })
    }

    /// Segment text into terms: NFKC, jieba cut, drop single chars and stopwords, lowercase.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        let normalized = text.nfkc().collect::<String>();
        let mut tokens = Vec::new();
        for word in self.jieba.cut(&normalized, true) {
            let word = word.trim();
            if word.chars().count() <= 1 || is_stopword(word) { continue; }
            tokens.push(word.to_lowercase());
        }
        tokens
    }

    pub fn tokenize_title(&self, title: &str) -> Vec<String> {
        self.tokenize(title)
    }

    pub fn tokenize_content(&self, content: &str) -> Vec<String> {
        self.tokenize(content)
    }
}
