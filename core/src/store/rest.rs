//! Column store access over the HBase REST gateway.
//!
//! Keys, column names and values travel base64-encoded inside JSON `CellSet`s.
//! Scans go through a server-side scanner resource that is paged until the
//! gateway answers `204 No Content`.

use super::remote::{ColumnTransport, RawRow};
use super::{StoreError, StoreResult};
use crate::config::StoreConfig;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::blocking::{Client, Response};
use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const SCAN_BATCH: u32 = 100;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CellSet {
    #[serde(rename = "Row", default)]
    rows: Vec<RowJson>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RowJson {
    key: String,
    #[serde(rename = "Cell", default)]
    cells: Vec<CellJson>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CellJson {
    column: String,
    #[serde(rename = "$")]
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct TableList {
    #[serde(default)]
    table: Vec<TableName>,
}

#[derive(Debug, Deserialize)]
struct TableName {
    name: String,
}

#[derive(Debug, Serialize)]
struct TableSchema<'a> {
    name: &'a str,
    #[serde(rename = "ColumnSchema")]
    column_schema: Vec<ColumnSchema<'a>>,
}

#[derive(Debug, Serialize)]
struct ColumnSchema<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct ScannerRequest {
    batch: u32,
}

pub struct RestTransport {
    base: Url,
    timeout: Duration,
    client: Option<Client>,
}

fn unavailable(e: reqwest::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn build_client(timeout: Duration) -> StoreResult<Client> {
    Client::builder().timeout(timeout).build().map_err(unavailable)
}

fn expect_success(resp: Response, what: &str) -> StoreResult<Response> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(StoreError::Backend(format!("{what}: HTTP {}", resp.status())))
    }
}

fn b64_text(encoded: &str, key: &str) -> StoreResult<String> {
    let bytes = b64_bytes(encoded, key)?;
    String::from_utf8(bytes).map_err(|e| StoreError::Corrupt { key: key.to_string(), reason: e.to_string() })
}

fn b64_bytes(encoded: &str, key: &str) -> StoreResult<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .map_err(|e| StoreError::Corrupt { key: key.to_string(), reason: e.to_string() })
}

fn decode_row(row: RowJson) -> StoreResult<RawRow> {
    let key = b64_text(&row.key, &row.key)?;
    let mut raw = RawRow::new(key.as_str());
    for cell in row.cells {
        let column = b64_text(&cell.column, &key)?;
        let value = b64_bytes(&cell.value, &key)?;
        raw.cells.insert(column, value);
    }
    Ok(raw)
}

fn encode_row(row: &RawRow) -> CellSet {
    let cells = row
        .cells
        .iter()
        .map(|(column, value)| CellJson { column: STANDARD.encode(column), value: STANDARD.encode(value) })
        .collect();
    CellSet { rows: vec![RowJson { key: STANDARD.encode(&row.key), cells }] }
}

impl RestTransport {
    pub fn new(config: &StoreConfig) -> StoreResult<Self> {
        let base = Url::parse(&config.base_url())
            .map_err(|e| StoreError::Unavailable(format!("bad store address {}: {e}", config.base_url())))?;
        let timeout = Duration::from_millis(config.timeout_ms);
        let client = build_client(timeout)?;
        Ok(Self { base, timeout, client: Some(client) })
    }

    fn client(&mut self) -> StoreResult<Client> {
        match &self.client {
            Some(c) => Ok(c.clone()),
            None => {
                let c = build_client(self.timeout)?;
                self.client = Some(c.clone());
                Ok(c)
            }
        }
    }

    /// Join path segments onto the base address, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> StoreResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Unavailable(format!("store address {} cannot take a path", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn scan_pages(
        &self,
        client: &Client,
        scanner: &Url,
        visit: &mut dyn FnMut(StoreResult<RawRow>) -> bool,
    ) -> StoreResult<()> {
        loop {
            let resp = client
                .get(scanner.clone())
                .header(header::ACCEPT, "application/json")
                .send()
                .map_err(unavailable)?;
            if resp.status() == StatusCode::NO_CONTENT {
                return Ok(());
            }
            let page: CellSet = expect_success(resp, "scanner page")?.json().map_err(unavailable)?;
            if page.rows.is_empty() {
                return Ok(());
            }
            for row in page.rows {
                if !visit(decode_row(row)) {
                    return Ok(());
                }
            }
        }
    }
}

impl ColumnTransport for RestTransport {
    fn list_tables(&mut self) -> StoreResult<Vec<String>> {
        let client = self.client()?;
        let resp = client
            .get(self.base.clone())
            .header(header::ACCEPT, "application/json")
            .send()
            .map_err(unavailable)?;
        let list: TableList = expect_success(resp, "list tables")?.json().map_err(unavailable)?;
        Ok(list.table.into_iter().map(|t| t.name).collect())
    }

    fn create_table(&mut self, table: &str, families: &[&str]) -> StoreResult<()> {
        let client = self.client()?;
        let schema = TableSchema { name: table, column_schema: families.iter().map(|name| ColumnSchema { name }).collect() };
        let resp = client
            .put(self.url(&[table, "schema"])?)
            .header(header::ACCEPT, "application/json")
            .json(&schema)
            .send()
            .map_err(unavailable)?;
        expect_success(resp, "create table").map(|_| ())
    }

    fn put(&mut self, table: &str, row: &RawRow) -> StoreResult<()> {
        let client = self.client()?;
        let resp = client
            .put(self.url(&[table, &row.key])?)
            .header(header::ACCEPT, "application/json")
            .json(&encode_row(row))
            .send()
            .map_err(unavailable)?;
        expect_success(resp, "put row").map(|_| ())
    }

    fn get(&mut self, table: &str, key: &str) -> StoreResult<Option<RawRow>> {
        let client = self.client()?;
        let resp = client
            .get(self.url(&[table, key])?)
            .header(header::ACCEPT, "application/json")
            .send()
            .map_err(unavailable)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let set: CellSet = expect_success(resp, "get row")?.json().map_err(unavailable)?;
        match set.rows.into_iter().next() {
            Some(row) => decode_row(row).map(Some),
            None => Ok(None),
        }
    }

    fn scan(&mut self, table: &str, visit: &mut dyn FnMut(StoreResult<RawRow>) -> bool) -> StoreResult<()> {
        let client = self.client()?;
        let resp = client
            .post(self.url(&[table, "scanner"])?)
            .header(header::ACCEPT, "application/json")
            .json(&ScannerRequest { batch: SCAN_BATCH })
            .send()
            .map_err(unavailable)?;
        let resp = expect_success(resp, "open scanner")?;
        let location = resp
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| StoreError::Backend("scanner created without a location".into()))?;
        let scanner = self
            .base
            .join(location)
            .map_err(|e| StoreError::Backend(format!("bad scanner location {location}: {e}")))?;

        let result = self.scan_pages(&client, &scanner, visit);
        if let Err(e) = client.delete(scanner.clone()).send() {
            tracing::debug!(error = %e, "could not release scanner");
        }
        result
    }

    fn reconnect(&mut self) -> StoreResult<()> {
        self.client = Some(build_client(self.timeout)?);
        self.list_tables().map(|_| ())
    }

    fn close(&mut self) {
        self.client = None;
    }
}
