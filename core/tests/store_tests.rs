use parking_lot::Mutex;
use search_core::store::{ColumnTransport, RawRow, StoreMode};
use search_core::{Document, DocumentStore, FileType, RetryPolicy, StoreConfig, StoreError, StoreResult};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tempfile::tempdir;

#[derive(Default)]
struct FakeState {
    reachable: bool,
    tables: Vec<String>,
    rows: HashMap<String, BTreeMap<String, RawRow>>,
    put_failures: u32,
    reject_puts: bool,
    scan_failures: u32,
    fail_after: usize,
    puts: u32,
    scans: u32,
    reconnects: u32,
    closes: u32,
}

/// In-process stand-in for the column store with scriptable failures.
#[derive(Clone, Default)]
struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    fn reachable() -> Self {
        let t = Self::default();
        t.state.lock().reachable = true;
        t
    }

    fn insert_raw(&self, table: &str, row: RawRow) {
        self.state.lock().rows.entry(table.to_string()).or_default().insert(row.key.clone(), row);
    }

    fn row_count(&self, table: &str) -> usize {
        self.state.lock().rows.get(table).map_or(0, |r| r.len())
    }
}

fn down() -> StoreError {
    StoreError::Unavailable("connection reset by peer".into())
}

impl ColumnTransport for FakeTransport {
    fn list_tables(&mut self) -> StoreResult<Vec<String>> {
        let s = self.state.lock();
        if !s.reachable {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(s.tables.clone())
    }

    fn create_table(&mut self, table: &str, _families: &[&str]) -> StoreResult<()> {
        self.state.lock().tables.push(table.to_string());
        Ok(())
    }

    fn put(&mut self, table: &str, row: &RawRow) -> StoreResult<()> {
        let mut s = self.state.lock();
        s.puts += 1;
        if s.reject_puts {
            return Err(StoreError::InvalidKey(row.key.clone()));
        }
        if s.put_failures > 0 {
            s.put_failures -= 1;
            return Err(down());
        }
        s.rows.entry(table.to_string()).or_default().insert(row.key.clone(), row.clone());
        Ok(())
    }

    fn get(&mut self, table: &str, key: &str) -> StoreResult<Option<RawRow>> {
        Ok(self.state.lock().rows.get(table).and_then(|r| r.get(key)).cloned())
    }

    fn scan(&mut self, table: &str, visit: &mut dyn FnMut(StoreResult<RawRow>) -> bool) -> StoreResult<()> {
        let mut s = self.state.lock();
        s.scans += 1;
        let failing = s.scan_failures > 0;
        if failing {
            s.scan_failures -= 1;
        }
        let rows: Vec<RawRow> = s.rows.get(table).map(|r| r.values().cloned().collect()).unwrap_or_default();
        let fail_after = s.fail_after;
        drop(s);
        for (i, row) in rows.into_iter().enumerate() {
            if failing && i == fail_after {
                return Err(down());
            }
            if !visit(Ok(row)) {
                return Ok(());
            }
        }
        Ok(())
    }

    fn reconnect(&mut self) -> StoreResult<()> {
        self.state.lock().reconnects += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().closes += 1;
    }
}

fn config(local: &std::path::Path) -> StoreConfig {
    StoreConfig {
        local_path: local.to_path_buf(),
        save_retry: RetryPolicy::new(5, 0),
        scan_retry: RetryPolicy::new(3, 0),
        min_scan_rows: 0,
        ..StoreConfig::default()
    }
}

fn doc(n: usize) -> Document {
    Document::new(format!("https://www.ustc.edu.cn/notice/{n}"), format!("教务处通知{n}"), "关于课程安排的通知")
        .with_source("www.ustc.edu.cn")
}

fn remote_with(fake: &FakeTransport, cfg: &StoreConfig) -> DocumentStore {
    let store = DocumentStore::connect_with(Box::new(fake.clone()), cfg).unwrap();
    assert_eq!(store.mode(), StoreMode::Remote);
    store
}

#[test]
fn unreachable_store_falls_back_to_local() {
    let dir = tempdir().unwrap();
    let mut store = DocumentStore::connect_with(Box::new(FakeTransport::default()), &config(dir.path())).unwrap();
    assert_eq!(store.mode(), StoreMode::Local);

    let original = doc(1).with_file_type(FileType::Pdf).with_file_size(1024).with_file_path("pdf/1.pdf");
    let key = store.save_document(&original).unwrap();
    assert_eq!(store.get_document(&key).unwrap(), Some(original));
    assert!(dir.path().join("documents").join(format!("{key}.json")).exists());
}

#[test]
fn refused_connection_falls_back_to_local() {
    let dir = tempdir().unwrap();
    let cfg = StoreConfig { host: "127.0.0.1".into(), port: 1, timeout_ms: 500, ..config(dir.path()) };
    let mut store = DocumentStore::connect(&cfg).unwrap();
    assert_eq!(store.mode(), StoreMode::Local);
    let key = store.save_document(&doc(2)).unwrap();
    assert_eq!(store.get_document(&key).unwrap().map(|d| d.url), Some(doc(2).url));
}

#[test]
fn connect_creates_missing_tables() {
    let dir = tempdir().unwrap();
    let fake = FakeTransport::reachable();
    let _store = remote_with(&fake, &config(dir.path()));
    let tables = fake.state.lock().tables.clone();
    assert_eq!(tables, vec!["ustc_documents".to_string(), "ustc_index".to_string()]);
}

#[test]
fn save_retries_with_reconnect() {
    let dir = tempdir().unwrap();
    let fake = FakeTransport::reachable();
    let mut store = remote_with(&fake, &config(dir.path()));
    fake.state.lock().put_failures = 3;

    let key = store.save_document(&doc(1)).unwrap();
    let s = fake.state.lock();
    assert_eq!(s.puts, 4);
    assert_eq!(s.reconnects, 3);
    drop(s);
    assert_eq!(store.get_document(&key).unwrap().unwrap().title, "教务处通知1");
}

#[test]
fn save_gives_up_after_five_attempts() {
    let dir = tempdir().unwrap();
    let fake = FakeTransport::reachable();
    let mut store = remote_with(&fake, &config(dir.path()));
    fake.state.lock().put_failures = 100;

    let err = store.save_document(&doc(1)).unwrap_err();
    assert!(matches!(err, StoreError::RetriesExhausted { attempts: 5, .. }), "{err}");
    assert_eq!(fake.state.lock().puts, 5);

    let err = store.save_index("通知", &["d1".to_string()], &HashMap::new()).unwrap_err();
    assert!(matches!(err, StoreError::RetriesExhausted { op: "save_index", .. }));
}

#[test]
fn same_url_saved_twice_makes_two_rows() {
    let dir = tempdir().unwrap();
    let fake = FakeTransport::reachable();
    let mut store = remote_with(&fake, &config(dir.path()));
    let first = store.save_document(&doc(1)).unwrap();
    let second = store.save_document(&doc(1)).unwrap();
    assert_ne!(first, second);
    assert_eq!(first[..8], second[..8]);
    assert_eq!(fake.row_count("ustc_documents"), 2);
}

#[test]
fn back_to_back_saves_never_share_a_row() {
    let dir = tempdir().unwrap();
    let mut store = DocumentStore::local(dir.path()).unwrap();
    let keys: Vec<String> = (0..20).map(|_| store.save_document(&doc(7)).unwrap()).collect();

    let distinct: std::collections::HashSet<&String> = keys.iter().collect();
    assert_eq!(distinct.len(), 20);
    let millis: Vec<i128> = keys.iter().map(|k| k.split_once('_').unwrap().1.parse().unwrap()).collect();
    assert!(millis.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(std::fs::read_dir(dir.path().join("documents")).unwrap().count(), 20);
    assert_eq!(store.get_all_documents(None).len(), 20);
}

#[test]
fn rejected_write_is_not_retried() {
    let dir = tempdir().unwrap();
    let fake = FakeTransport::reachable();
    let mut store = remote_with(&fake, &config(dir.path()));
    fake.state.lock().reject_puts = true;

    let err = store.save_document(&doc(1)).unwrap_err();
    assert!(matches!(err, StoreError::InvalidKey(_)), "{err}");
    let s = fake.state.lock();
    assert_eq!(s.puts, 1);
    assert_eq!(s.reconnects, 0);
}

#[test]
fn interrupted_scan_is_restarted() {
    let dir = tempdir().unwrap();
    let fake = FakeTransport::reachable();
    let mut store = remote_with(&fake, &config(dir.path()));
    for n in 0..5 {
        store.save_document(&doc(n)).unwrap();
    }
    {
        let mut s = fake.state.lock();
        s.scan_failures = 1;
        s.fail_after = 2;
    }
    let docs = store.get_all_documents(None);
    assert_eq!(docs.len(), 5);
    assert_eq!(fake.state.lock().scans, 2);
}

#[test]
fn final_attempt_returns_partial_scan() {
    let dir = tempdir().unwrap();
    let fake = FakeTransport::reachable();
    let mut store = remote_with(&fake, &config(dir.path()));
    for n in 0..5 {
        store.save_document(&doc(n)).unwrap();
    }
    {
        let mut s = fake.state.lock();
        s.scan_failures = 100;
        s.fail_after = 2;
    }
    let docs = store.get_all_documents(None);
    assert_eq!(docs.len(), 2);
    assert_eq!(fake.state.lock().scans, 3);
}

#[test]
fn short_scan_is_retried_then_accepted() {
    let dir = tempdir().unwrap();
    let fake = FakeTransport::reachable();
    let cfg = StoreConfig { min_scan_rows: 10, ..config(dir.path()) };
    let mut store = remote_with(&fake, &cfg);
    for n in 0..3 {
        store.save_document(&doc(n)).unwrap();
    }
    assert_eq!(store.get_all_documents(None).len(), 3);
    assert_eq!(fake.state.lock().scans, 3);
}

#[test]
fn limit_caps_scan_without_rescanning() {
    let dir = tempdir().unwrap();
    let fake = FakeTransport::reachable();
    let cfg = StoreConfig { min_scan_rows: 100, ..config(dir.path()) };
    let mut store = remote_with(&fake, &cfg);
    for n in 0..5 {
        store.save_document(&doc(n)).unwrap();
    }
    assert_eq!(store.get_all_documents(Some(2)).len(), 2);
    assert_eq!(fake.state.lock().scans, 1);
}

#[test]
fn corrupt_rows_are_skipped() {
    let dir = tempdir().unwrap();
    let fake = FakeTransport::reachable();
    let mut store = remote_with(&fake, &config(dir.path()));
    store.save_document(&doc(1)).unwrap();
    fake.insert_raw("ustc_documents", RawRow::new("bad_utf8").with_cell("info:title", vec![0xc3, 0x28]));
    fake.insert_raw(
        "ustc_documents",
        RawRow::new("bad_size").with_cell("info:url", "https://x").with_cell("info:file_size", "big"),
    );
    let docs = store.get_all_documents(None);
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].url, doc(1).url);
}

#[test]
fn remote_index_round_trip() {
    let dir = tempdir().unwrap();
    let fake = FakeTransport::reachable();
    let mut store = remote_with(&fake, &config(dir.path()));
    let ids = vec!["a1".to_string(), "b2".to_string()];
    let tf: HashMap<String, u32> = [("a1".to_string(), 2), ("b2".to_string(), 1)].into_iter().collect();
    store.save_index("下载", &ids, &tf).unwrap();

    let record = store.get_index("下载").unwrap().unwrap();
    assert_eq!(record.doc_ids, ids);
    assert_eq!(record.doc_count, 2);
    assert_eq!(record.term_freq, tf);
    assert!(store.get_index("缺失").unwrap().is_none());
}

#[test]
fn local_index_round_trip_and_bad_terms() {
    let dir = tempdir().unwrap();
    let mut store = DocumentStore::local(dir.path()).unwrap();
    let ids = vec!["a1".to_string()];
    let tf: HashMap<String, u32> = [("a1".to_string(), 3)].into_iter().collect();
    store.save_index("财务处", &ids, &tf).unwrap();

    let record = store.get_index("财务处").unwrap().unwrap();
    assert_eq!(record.term, "财务处");
    assert_eq!(record.term_freq["a1"], 3);
    assert!(dir.path().join("index").join("财务处.json").exists());
    assert!(matches!(store.save_index("a/b", &ids, &tf), Err(StoreError::InvalidKey(_))));
    assert!(store.get_index("没有").unwrap().is_none());
}

#[test]
fn local_scan_skips_corrupt_files_and_honors_limit() {
    let dir = tempdir().unwrap();
    let mut store = DocumentStore::local(dir.path()).unwrap();
    for n in 0..3 {
        store.save_document(&doc(n)).unwrap();
    }
    std::fs::write(dir.path().join("documents").join("zzzz_0.json"), "{not json").unwrap();
    std::fs::write(dir.path().join("documents").join("notes.txt"), "ignored").unwrap();

    assert_eq!(store.get_all_documents(None).len(), 3);
    assert_eq!(store.get_all_documents(Some(2)).len(), 2);
    assert!(store.get_document("missing_1").unwrap().is_none());
}

#[test]
fn close_is_idempotent() {
    let dir = tempdir().unwrap();
    let fake = FakeTransport::reachable();
    let mut store = remote_with(&fake, &config(dir.path()));
    store.close();
    store.close();
    drop(store);
    assert_eq!(fake.state.lock().closes, 3);
}
