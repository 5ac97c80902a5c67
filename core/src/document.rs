use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Stable identity of a document for indexing: hex md5 of its URL.
pub type DocId = String;

pub fn doc_id_for(url: &str) -> DocId {
    let mut hasher = Md5::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("document record is not a JSON object")]
    NotAnObject,
    #[error("invalid value for field {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FileType {
    Html,
    Pdf,
    Doc,
    Xls,
    Txt,
    #[default]
    Unknown,
}

impl FileType {
    /// Lenient parse: extension aliases collapse onto their family, anything else is `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "html" | "htm" => FileType::Html,
            "pdf" => FileType::Pdf,
            "doc" | "docx" => FileType::Doc,
            "xls" | "xlsx" => FileType::Xls,
            "txt" | "text" => FileType::Txt,
            _ => FileType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Html => "html",
            FileType::Pdf => "pdf",
            FileType::Doc => "doc",
            FileType::Xls => "xls",
            FileType::Txt => "txt",
            FileType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A crawled page or file. Immutable once built; `url` is the identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub url: String,
    pub title: String,
    pub content: String,
    pub file_type: FileType,
    pub file_size: u64,
    /// Origin domain.
    pub source: String,
    pub crawl_time: OffsetDateTime,
    pub file_path: Option<String>,
}

impl Document {
    pub fn new(url: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            content: content.into(),
            file_type: FileType::Html,
            file_size: 0,
            source: String::new(),
            crawl_time: OffsetDateTime::now_utc(),
            file_path: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_file_type(mut self, file_type: FileType) -> Self {
        self.file_type = file_type;
        self
    }

    pub fn with_file_size(mut self, file_size: u64) -> Self {
        self.file_size = file_size;
        self
    }

    pub fn with_file_path(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    pub fn with_crawl_time(mut self, crawl_time: OffsetDateTime) -> Self {
        self.crawl_time = crawl_time;
        self
    }

    pub fn doc_id(&self) -> DocId {
        doc_id_for(&self.url)
    }

    /// String-encoded field map, the shape used for store columns and fallback files.
    pub fn to_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("url".to_string(), self.url.clone());
        fields.insert("title".to_string(), self.title.clone());
        fields.insert("content".to_string(), self.content.clone());
        fields.insert("file_type".to_string(), self.file_type.to_string());
        fields.insert("file_size".to_string(), self.file_size.to_string());
        fields.insert("source".to_string(), self.source.clone());
        fields.insert("crawl_time".to_string(), self.crawl_time.format(&Rfc3339).unwrap_or_default());
        fields.insert("file_path".to_string(), self.file_path.clone().unwrap_or_default());
        fields
    }

    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self, DocumentError> {
        let text = |key: &str| fields.get(key).cloned().unwrap_or_default();
        let file_size = match fields.get("file_size").map(|s| s.trim()) {
            None | Some("") => 0,
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|_| DocumentError::InvalidField { field: "file_size", value: raw.to_string() })?,
        };
        let crawl_time = fields
            .get("crawl_time")
            .and_then(|s| parse_timestamp(s))
            .unwrap_or_else(OffsetDateTime::now_utc);
        let file_path = fields.get("file_path").filter(|p| !p.is_empty()).cloned();

        Ok(Self {
            url: text("url"),
            title: text("title"),
            content: text("content"),
            file_type: FileType::parse(&text("file_type")),
            file_size,
            source: text("source"),
            crawl_time,
            file_path,
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.to_fields()).unwrap_or(serde_json::Value::Null)
    }

    /// Accepts the field map as a JSON object; non-string scalars are stringified.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, DocumentError> {
        let obj = value.as_object().ok_or(DocumentError::NotAnObject)?;
        let mut fields = BTreeMap::new();
        for (k, v) in obj {
            let s = match v {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            fields.insert(k.clone(), s);
        }
        Self::from_fields(&fields)
    }
}

/// RFC 3339, or naive ISO-8601 taken as UTC.
fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(t) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(t);
    }
    let naive = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]");
    PrimitiveDateTime::parse(raw, naive).ok().map(|p| p.assume_utc())
}
