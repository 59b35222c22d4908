//! Template, locate and region-write scenarios against fault-injecting stores

use chrono::NaiveDateTime;
use gridstore_core::time::parse_datetime;
use gridstore_core::{Coordinate, Dataset, Error, MemDataset, Region, Result, Variable};
use gridstore_engine::{locate, Converter, ConverterConfig, MemorySource, ProcessOptions};
use gridstore_storage::format::{decode_chunk, encode_chunk, ChunkCompression};
use gridstore_storage::{Archive, MemoryStore, Store, StoreRef};
use ndarray::{ArrayD, IxDyn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

// ============================================================================
// Fixtures
// ============================================================================

fn days(start: &str, n: usize) -> Vec<NaiveDateTime> {
    let start = parse_datetime(start).unwrap();
    (0..n).map(|i| start + chrono::Duration::days(i as i64)).collect()
}

/// `hs(time, lat)` counting up from `offset`, plus static `depth(lat)`
fn fragment(start: &str, n: usize, offset: f64) -> MemDataset {
    let mut ds = MemDataset::new();
    ds.add_coordinate(Coordinate::time("time", days(start, n))).unwrap();
    ds.add_coordinate(Coordinate::numeric("lat", vec![-5.0, 0.0, 5.0])).unwrap();
    let values: Vec<f64> = (0..n * 3).map(|i| offset + i as f64).collect();
    let hs = ArrayD::from_shape_vec(IxDyn(&[n, 3]), values).unwrap();
    ds.add_variable(Variable::new("hs", vec!["time".into(), "lat".into()], hs))
        .unwrap();
    let depth = ArrayD::from_shape_vec(IxDyn(&[3]), vec![100.0, 200.0, 300.0]).unwrap();
    ds.add_variable(Variable::new("depth", vec!["lat".into()], depth))
        .unwrap();
    ds
}

/// 20 daily entries from 2000-01-01, chunked five entries at a time
fn template_config(retries: u32) -> ConverterConfig {
    let mut config = ConverterConfig::default();
    config.time.global_start = Some("2000-01-01".into());
    config.time.global_end = Some("2000-01-20".into());
    config.chunking = "time:5,lat:3".parse().unwrap();
    config.missing_data.retries_on_missing = retries;
    config.missing_data.retry_backoff_ms = 0;
    config
}

fn template(store: StoreRef, retries: u32) -> Converter {
    let converter = Converter::new(template_config(retries)).unwrap();
    converter
        .create_template(&MemorySource::new(fragment("2000-01-01", 3, 0.0)), store, false)
        .unwrap();
    converter
}

fn is_variable_chunk(key: &str) -> bool {
    key.starts_with("vars/") && key.contains("/c/")
}

/// Store whose variable chunk writes silently lose their missing values
#[derive(Debug, Default)]
struct NanDroppingStore {
    inner: MemoryStore,
    lossy: bool,
}

impl Store for NanDroppingStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }
    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        if self.lossy && is_variable_chunk(key) {
            let (dtype, mut values) = decode_chunk(value)?;
            values.iter_mut().filter(|v| v.is_nan()).for_each(|v| *v = 0.0);
            return self.inner.set(key, &encode_chunk(&values, dtype, ChunkCompression::None)?);
        }
        self.inner.set(key, value)
    }
    fn erase(&self, key: &str) -> Result<()> {
        self.inner.erase(key)
    }
    fn erase_prefix(&self, prefix: &str) -> Result<()> {
        self.inner.erase_prefix(prefix)
    }
    fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list_prefix(prefix)
    }
    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.inner.key_lock(key)
    }
}

/// Store that fails the first `failures` variable chunk writes and the first
/// `root_failures` reads of the archive root
#[derive(Debug, Default)]
struct FlakyStore {
    inner: MemoryStore,
    failures: AtomicU32,
    root_failures: AtomicU32,
}

fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl Store for FlakyStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if key == "archive.json" && take(&self.root_failures) {
            return Err(Error::Storage("injected transient read failure".into()));
        }
        self.inner.get(key)
    }
    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        if is_variable_chunk(key) && take(&self.failures) {
            return Err(Error::Storage(format!("injected failure writing {}", key)));
        }
        self.inner.set(key, value)
    }
    fn erase(&self, key: &str) -> Result<()> {
        self.inner.erase(key)
    }
    fn erase_prefix(&self, prefix: &str) -> Result<()> {
        self.inner.erase_prefix(prefix)
    }
    fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list_prefix(prefix)
    }
    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.inner.key_lock(key)
    }
}

// ============================================================================
// Template and locate
// ============================================================================

#[test]
fn test_template_spans_global_extent_without_data() {
    let store: StoreRef = Arc::new(MemoryStore::new());
    template(store.clone(), 0);

    let archive = Archive::open(store).unwrap();
    let time = archive.read_coordinate("time").unwrap();
    assert_eq!(time.len(), 20);
    let hs = archive.variable("hs").unwrap();
    assert_eq!(hs.shape(), &[20, 3]);
    assert_eq!(hs.chunks(), &[5, 3]);
    assert_eq!(hs.stored_chunk_count().unwrap(), 0);

    // Static variables are materialized by the template itself
    let depth = archive.read_variable("depth", &Region::new()).unwrap();
    assert_eq!(depth.as_slice().unwrap(), &[100.0, 200.0, 300.0]);
}

#[test]
fn test_locate_fragment_in_template() {
    let store: StoreRef = Arc::new(MemoryStore::new());
    template(store.clone(), 0);
    let archive = Archive::open(store).unwrap();

    let region = locate(&fragment("2000-01-06", 5, 0.0), &archive, "time").unwrap();
    assert_eq!(region.get("time"), Some(5..10));
    assert_eq!(region.get("lat"), Some(0..3));

    let err = locate(&fragment("2000-01-18", 5, 0.0), &archive, "time").unwrap_err();
    assert!(matches!(err, Error::OutOfExtent(_)));
}

// ============================================================================
// Region writes
// ============================================================================

#[test]
fn test_region_write_fills_only_its_slice() {
    let store: StoreRef = Arc::new(MemoryStore::new());
    let converter = template(store.clone(), 0);

    let summary = converter
        .write_region(
            &MemorySource::new(fragment("2000-01-06", 5, 1000.0)),
            store.clone(),
            None,
            &ProcessOptions::new(),
        )
        .unwrap();
    assert_eq!(summary.attempts, 1);
    assert_eq!(summary.region.get("time"), Some(5..10));
    assert_eq!(summary.variables, vec!["hs".to_string()]);

    let archive = Archive::open(store).unwrap();
    let hs = archive.read_variable("hs", &Region::new()).unwrap();
    assert_eq!(hs[[5, 0]], 1000.0);
    assert_eq!(hs[[9, 2]], 1014.0);
    assert!(hs[[4, 0]].is_nan());
    assert!(hs[[10, 0]].is_nan());
}

#[test]
fn test_region_write_is_idempotent() {
    let store: StoreRef = Arc::new(MemoryStore::new());
    let converter = template(store.clone(), 0);
    let source = MemorySource::new(fragment("2000-01-11", 5, 7.0));

    converter
        .write_region(&source, store.clone(), None, &ProcessOptions::new())
        .unwrap();
    let once = Archive::open(store.clone()).unwrap().load(&Region::new()).unwrap();
    converter
        .write_region(&source, store.clone(), None, &ProcessOptions::new())
        .unwrap();
    let twice = Archive::open(store).unwrap().load(&Region::new()).unwrap();

    let a = once.variable("hs").unwrap().data.clone();
    let b = twice.variable("hs").unwrap().data.clone();
    assert_eq!(a.shape(), b.shape());
    for (x, y) in a.iter().zip(b.iter()) {
        assert!(x == y || (x.is_nan() && y.is_nan()));
    }
}

#[test]
fn test_explicit_region_shape_mismatch_not_retried() {
    let store: StoreRef = Arc::new(MemoryStore::new());
    let converter = template(store.clone(), 3);
    let err = converter
        .write_region(
            &MemorySource::new(fragment("2000-01-06", 5, 0.0)),
            store,
            Some(Region::new().with("time", 0..4)),
            &ProcessOptions::new(),
        )
        .unwrap_err();
    assert!(err.is_contract_violation(), "unexpected error: {}", err);
    assert_eq!(err.attempts(), None);
}

#[test]
fn test_lost_missing_values_exhaust_retries() {
    let store: StoreRef = Arc::new(NanDroppingStore {
        inner: MemoryStore::new(),
        lossy: true,
    });
    let converter = template(store.clone(), 2);

    let mut ds = fragment("2000-01-06", 5, 0.0);
    ds.variable_mut("hs").unwrap().data[[2, 1]] = f64::NAN;

    let err = converter
        .write_region(&MemorySource::new(ds), store, None, &ProcessOptions::new())
        .unwrap_err();
    match err {
        Error::MissingDataRegression { attempts, detail } => {
            assert_eq!(attempts, 3);
            assert!(detail.contains("hs"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_lost_missing_values_ignored_when_check_disabled() {
    let store: StoreRef = Arc::new(NanDroppingStore {
        inner: MemoryStore::new(),
        lossy: true,
    });
    let mut config = template_config(2);
    config.missing_data.missing_check_vars = "none".parse().unwrap();
    let converter = Converter::new(config).unwrap();
    converter
        .create_template(&MemorySource::new(fragment("2000-01-01", 3, 0.0)), store.clone(), false)
        .unwrap();

    let mut ds = fragment("2000-01-06", 5, 0.0);
    ds.variable_mut("hs").unwrap().data[[0, 0]] = f64::NAN;
    let summary = converter
        .write_region(&MemorySource::new(ds), store, None, &ProcessOptions::new())
        .unwrap();
    assert_eq!(summary.attempts, 1);
}

#[test]
fn test_transient_failure_recovers_within_budget() {
    let flaky = Arc::new(FlakyStore::default());
    let store: StoreRef = flaky.clone();
    let converter = template(store.clone(), 2);
    flaky.failures.store(1, Ordering::SeqCst);

    let summary = converter
        .write_region(
            &MemorySource::new(fragment("2000-01-06", 5, 0.0)),
            store.clone(),
            None,
            &ProcessOptions::new(),
        )
        .unwrap();
    assert_eq!(summary.attempts, 2);

    let hs = Archive::open(store).unwrap().read_variable("hs", &Region::new()).unwrap();
    assert_eq!(hs[[5, 0]], 0.0);
    assert_eq!(hs[[9, 2]], 14.0);
}

#[test]
fn test_persistent_failure_reports_attempts() {
    let flaky = Arc::new(FlakyStore::default());
    let store: StoreRef = flaky.clone();
    let converter = template(store.clone(), 1);
    flaky.failures.store(u32::MAX, Ordering::SeqCst);

    let err = converter
        .write_region(
            &MemorySource::new(fragment("2000-01-06", 5, 0.0)),
            store,
            None,
            &ProcessOptions::new(),
        )
        .unwrap_err();
    match err {
        Error::TransientWrite { attempts, source } => {
            assert_eq!(attempts, 2);
            assert!(matches!(*source, Error::Storage(_)));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_transient_archive_open_recovers_within_budget() {
    let flaky = Arc::new(FlakyStore::default());
    let store: StoreRef = flaky.clone();
    let converter = template(store.clone(), 2);
    flaky.root_failures.store(1, Ordering::SeqCst);

    let summary = converter
        .write_region(
            &MemorySource::new(fragment("2000-01-11", 5, 50.0)),
            store.clone(),
            None,
            &ProcessOptions::new(),
        )
        .unwrap();
    assert_eq!(summary.attempts, 2);
    assert_eq!(summary.region.get("time"), Some(10..15));

    let hs = Archive::open(store).unwrap().read_variable("hs", &Region::new()).unwrap();
    assert_eq!(hs[[10, 0]], 50.0);
}

#[test]
fn test_unordered_fragment_not_retried() {
    let store: StoreRef = Arc::new(MemoryStore::new());
    let converter = template(store.clone(), 3);
    let d = days("2000-01-06", 4);
    let mut ds = fragment("2000-01-06", 4, 0.0);
    ds.add_coordinate(Coordinate::time("time", vec![d[0], d[2], d[1], d[3]]))
        .unwrap();

    let err = converter
        .write_region(&MemorySource::new(ds), store.clone(), None, &ProcessOptions::new())
        .unwrap_err();
    assert!(matches!(err, Error::StructuralMismatch(_)), "unexpected error: {}", err);
    assert_eq!(err.attempts(), None);

    let hs = Archive::open(store).unwrap().variable("hs").unwrap();
    assert_eq!(hs.stored_chunk_count().unwrap(), 0);
}
