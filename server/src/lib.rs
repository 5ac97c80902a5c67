use axum::{extract::{Query, State}, routing::get, Json, Router};
use search_core::{Document, Searcher};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

const SNIPPET_CHARS: usize = 200;

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub source: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub query: String,
    pub count: usize,
    pub took_s: f64,
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Serialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub source: String,
    pub file_type: String,
    pub file_size: u64,
    pub score: f64,
    pub file_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SourcesResponse {
    pub success: bool,
    pub sources: Vec<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub searcher: Arc<Searcher>,
}

pub fn build_app(searcher: Arc<Searcher>) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/sources", get(sources_handler))
        .with_state(AppState { searcher })
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn search_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Json<SearchResponse> {
    let start = std::time::Instant::now();
    let query = params.q.trim().to_string();
    if query.is_empty() {
        return Json(SearchResponse::failed(query, "query must not be empty", start));
    }

    let searcher = state.searcher.clone();
    let q = query.clone();
    let outcome = off_thread(move || run_search(&searcher, &q, params.source.as_deref(), params.limit)).await;
    let results = match outcome {
        Ok(results) => results,
        Err(e) => {
            tracing::error!(%query, error = %e, "search task failed");
            return Json(SearchResponse::failed(query, "search failed, please try again", start));
        }
    };

    let elapsed = start.elapsed();
    tracing::info!(%query, hits = results.len(), took_ms = elapsed.as_millis() as u64, "search");
    Json(SearchResponse {
        success: true,
        message: None,
        query,
        count: results.len(),
        took_s: elapsed.as_secs_f64(),
        results,
    })
}

impl SearchResponse {
    fn failed(query: String, message: &str, start: std::time::Instant) -> Self {
        Self {
            success: false,
            message: Some(message.to_string()),
            query,
            count: 0,
            took_s: start.elapsed().as_secs_f64(),
            results: vec![],
        }
    }
}

/// Tokenizing and scoring are CPU-bound; run them on the blocking pool.
/// A panic in `work` comes back as `Err` instead of tearing down the request.
async fn off_thread<F>(work: F) -> Result<Vec<SearchHit>, tokio::task::JoinError>
where
    F: FnOnce() -> Vec<SearchHit> + Send + 'static,
{
    tokio::task::spawn_blocking(work).await
}

pub async fn sources_handler(State(state): State<AppState>) -> Json<SourcesResponse> {
    let sources = state.searcher.sources().into_iter().map(str::to_string).collect();
    Json(SourcesResponse { success: true, sources })
}

fn run_search(searcher: &Searcher, query: &str, source: Option<&str>, limit: Option<usize>) -> Vec<SearchHit> {
    let hits = match source.map(str::trim).filter(|s| !s.is_empty()) {
        Some(source) => searcher.search_by_source(query, source, limit),
        None => searcher.search(query, limit),
    };
    let terms = searcher.tokenizer().tokenize(query);
    hits.into_iter().map(|hit| to_response_hit(hit.document, hit.score, &terms)).collect()
}

fn to_response_hit(doc: &Document, score: f64, terms: &[String]) -> SearchHit {
    SearchHit {
        url: doc.url.clone(),
        title: doc.title.clone(),
        snippet: highlight_terms(&make_snippet(&doc.content), terms),
        source: doc.source.clone(),
        file_type: doc.file_type.as_str().to_string(),
        file_size: doc.file_size,
        score,
        file_path: doc.file_path.clone(),
    }
}

/// Leading slice of the content, marked with `...` when cut.
pub fn make_snippet(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(SNIPPET_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Wrap every case-insensitive occurrence of a term in `<em>`.
pub fn highlight_terms(snippet: &str, terms: &[String]) -> String {
    let mut terms: Vec<&str> = terms.iter().map(String::as_str).filter(|t| !t.trim().is_empty()).collect();
    if terms.is_empty() {
        return snippet.to_string();
    }
    // Longest first so a term never splits a longer overlapping one.
    terms.sort_by_key(|t| std::cmp::Reverse(t.chars().count()));
    terms.dedup();
    let alternation = terms.iter().map(|t| regex::escape(t)).collect::<Vec<_>>().join("|");
    match regex::RegexBuilder::new(&alternation).case_insensitive(true).build() {
        Ok(pat) => pat.replace_all(snippet, "<em>$0</em>").into_owned(),
        Err(e) => {
            tracing::warn!(error = %e, "highlight pattern rejected");
            snippet.to_string()
        }
    }
}
