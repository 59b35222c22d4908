//! Write-with-retry controller
//!
//! Every write goes through the same per-invocation state machine:
//!
//! ```text
//! OPEN -> PROCESS -> WRITE -> VERIFY -> DONE
//!                      ^         |
//!                      +- RETRY -+--> FAILED
//! ```
//!
//! Each attempt re-opens the destination archive and the source,
//! re-processes the source, writes the whole target region and reads it
//! back. Errors while opening are classified like any other failure of the
//! attempt. Facts the first successful open establishes, such as the
//! existing length of the append axis, are kept for the rest of the call so
//! a retry rewrites the same region. [`WriteOutcome`] tags the result of an
//! attempt; the retry loop matches on it:
//!
//! | Outcome | Next |
//! |---------|------|
//! | `Written` | done |
//! | `Regressed` | retry, or [`Error::MissingDataRegression`] once the budget is spent |
//! | `Failed` with a retryable cause | retry, or [`Error::TransientWrite`] once the budget is spent |
//! | `Failed` with a contract violation | returned immediately |
//!
//! A controller makes at most `max_retries + 1` attempts per call. Retry `n`
//! sleeps `n` backoff units first. The attempt counter lives in a
//! [`RetryContext`] created by each call, so one controller can serve many
//! threads.
//!
//! The controller does not coordinate writers: concurrent region writes are
//! only safe when callers partition the sequence axis so that their regions
//! do not overlap. Nothing records or checks which regions have been claimed.

use crate::config::{ConverterConfig, MissingDataConfig};
use crate::converter::plan_layout;
use crate::encoding::VariableEncoder;
use crate::locator::locate;
use crate::processing::{align_for_append, process, ProcessOptions};
use crate::source::DatasetSource;
use chrono::NaiveDateTime;
use gridstore_core::time::format_datetime;
use gridstore_core::{Dataset, Error, MemDataset, MissingCheckSpec, Region, Result, Variable};
use gridstore_storage::{Archive, Array, StoreRef};
use ndarray::{ArrayD, IxDyn};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What a write does to the archive
#[derive(Debug, Clone, PartialEq)]
pub enum WriteMode {
    /// Create the archive from the fragment
    Convert {
        /// Replace an existing archive instead of failing
        overwrite: bool,
    },
    /// Extend the archive past its current end along the append dimension
    Append,
    /// Overwrite one region of an existing archive
    Region {
        /// Target region; located from the fragment's coordinates when `None`
        region: Option<Region>,
    },
}

impl WriteMode {
    fn name(&self) -> &'static str {
        match self {
            WriteMode::Convert { .. } => "convert",
            WriteMode::Append => "append",
            WriteMode::Region { .. } => "write-region",
        }
    }
}

/// Retry bound and linear backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed after the first one
    pub max_retries: u32,
    /// Sleep unit; retry `n` sleeps `n` units
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&MissingDataConfig::default())
    }
}

impl RetryPolicy {
    /// Policy with `max_retries` retries and `backoff` per retry
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Policy from the verification section of a config
    pub fn from_config(config: &MissingDataConfig) -> Self {
        Self::new(
            config.retries_on_missing,
            Duration::from_millis(config.retry_backoff_ms),
        )
    }

    /// Total attempts allowed
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Sleep before retry number `retry` (1-based)
    pub fn delay(&self, retry: u32) -> Duration {
        self.backoff * retry
    }
}

/// Attempt counter of one controller call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryContext {
    /// Attempts started so far
    pub attempt: u32,
}

/// Result of a successful write
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteSummary {
    /// Attempts it took
    pub attempts: u32,
    /// Region written; empty for a full convert
    pub region: Region,
    /// Variables written
    pub variables: Vec<String>,
    /// Entries written along the sequence or append dimension
    pub entries: usize,
}

/// Outcome of a single WRITE + VERIFY attempt
#[derive(Debug)]
pub enum WriteOutcome {
    /// Written and verified
    Written(WriteSummary),
    /// Written, but these variables read back with a different missingness mask
    Regressed(Vec<String>),
    /// The attempt raised an error
    Failed(Error),
}

/// Why an attempt will be retried
enum RetryCause {
    Regressed(Vec<String>),
    Failed(Error),
}

impl RetryCause {
    fn exhausted(self, attempts: u32) -> Error {
        match self {
            RetryCause::Regressed(vars) => Error::MissingDataRegression {
                attempts,
                detail: format!("missing values introduced in: {}", vars.join(", ")),
            },
            RetryCause::Failed(e) => Error::TransientWrite {
                attempts,
                source: Box::new(e),
            },
        }
    }
}

impl fmt::Display for RetryCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryCause::Regressed(vars) => write!(f, "missing data in {}", vars.join(", ")),
            RetryCause::Failed(e) => write!(f, "{}", e),
        }
    }
}

/// Destination opened for one attempt
enum Target {
    Convert,
    Append {
        archive: Archive,
        base: usize,
        last: NaiveDateTime,
    },
    Region {
        archive: Archive,
        region: Option<Region>,
    },
}

/// Append position before the call's first write
#[derive(Debug, Clone, Copy)]
struct AppendBase {
    len: usize,
    last: NaiveDateTime,
}

/// Facts fixed by the first successful open of a call
#[derive(Debug, Default)]
struct OpenState {
    /// Convert destination checked for an existing archive
    checked: bool,
    append: Option<AppendBase>,
}

/// Data written by one attempt, handed to VERIFY
struct AttemptOutput {
    archive: Archive,
    dataset: MemDataset,
    region: Region,
    variables: Vec<String>,
    entries: usize,
}

/// Runs writes with verification and bounded retries
#[derive(Debug, Clone)]
pub struct WriteController {
    config: ConverterConfig,
    encoder: VariableEncoder,
    policy: RetryPolicy,
    layout_planning: bool,
}

impl WriteController {
    /// Controller using `config` and the given storage layout
    pub fn new(config: ConverterConfig, encoder: VariableEncoder) -> Self {
        let policy = RetryPolicy::from_config(&config.missing_data);
        Self {
            config,
            encoder,
            policy,
            layout_planning: false,
        }
    }

    /// Controller laid out by the configured chunking
    pub fn from_config(config: ConverterConfig) -> Result<Self> {
        let encoder = VariableEncoder::from_config(&config, config.chunking.clone())?;
        Ok(Self::new(config, encoder))
    }

    /// Replace the retry policy, builder style
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Plan the chunk layout of a convert from each attempt's processed
    /// data instead of using the encoder's plan, builder style
    pub fn with_layout_planning(mut self, enabled: bool) -> Self {
        self.layout_planning = enabled;
        self
    }

    /// Retry policy in use
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Write `source` into `store`
    pub fn run(
        &self,
        source: &dyn DatasetSource,
        store: StoreRef,
        mode: WriteMode,
        options: &ProcessOptions,
    ) -> Result<WriteSummary> {
        let mut state = OpenState::default();
        let mut ctx = RetryContext::default();
        loop {
            ctx.attempt += 1;
            let outcome = match self.open_target(&store, &mode, &mut state) {
                Ok(target) => self.attempt(source, &store, &target, options),
                Err(e) => WriteOutcome::Failed(e),
            };
            let cause = match outcome {
                WriteOutcome::Written(mut summary) => {
                    summary.attempts = ctx.attempt;
                    info!(
                        mode = mode.name(),
                        source = %source.describe(),
                        attempts = ctx.attempt,
                        region = %summary.region,
                        entries = summary.entries,
                        "write complete"
                    );
                    return Ok(summary);
                }
                WriteOutcome::Failed(e) if !e.is_retryable() => {
                    error!(mode = mode.name(), attempt = ctx.attempt, error = %e, "write rejected");
                    return Err(e);
                }
                WriteOutcome::Failed(e) => RetryCause::Failed(e),
                WriteOutcome::Regressed(vars) => RetryCause::Regressed(vars),
            };

            if ctx.attempt > self.policy.max_retries {
                let e = cause.exhausted(ctx.attempt);
                error!(mode = mode.name(), attempts = ctx.attempt, error = %e, "retry limit exceeded");
                return Err(e);
            }
            warn!(
                mode = mode.name(),
                attempt = ctx.attempt,
                max_retries = self.policy.max_retries,
                reason = %cause,
                "write attempt failed, retrying"
            );
            std::thread::sleep(self.policy.delay(ctx.attempt));
        }
    }

    fn open_target(&self, store: &StoreRef, mode: &WriteMode, state: &mut OpenState) -> Result<Target> {
        match mode {
            WriteMode::Convert { overwrite } => {
                // Later attempts find the archive the first one started
                if !state.checked {
                    if !overwrite && Archive::exists(store)? {
                        return Err(Error::ArchiveExists(
                            "an archive exists at the destination; pass overwrite to replace it".into(),
                        ));
                    }
                    state.checked = true;
                }
                Ok(Target::Convert)
            }
            WriteMode::Append => {
                let archive = Archive::open(store.clone())?;
                let base = match state.append {
                    Some(base) => base,
                    None => {
                        let base = self.append_base(&archive)?;
                        state.append = Some(base);
                        base
                    }
                };
                Ok(Target::Append {
                    archive,
                    base: base.len,
                    last: base.last,
                })
            }
            WriteMode::Region { region } => Ok(Target::Region {
                archive: Archive::open(store.clone())?,
                region: region.clone(),
            }),
        }
    }

    fn append_base(&self, archive: &Archive) -> Result<AppendBase> {
        let dim = &self.config.time.append_dim;
        let coord = archive.read_coordinate(dim)?;
        let times = coord.as_time().ok_or_else(|| {
            Error::StructuralMismatch(format!("archive coordinate '{}' is not a time axis", dim))
        })?;
        let last = times.last().copied().ok_or_else(|| {
            Error::StructuralMismatch(format!("archive axis '{}' is empty", dim))
        })?;
        debug!(dim = %dim, base = times.len(), last = %format_datetime(&last), "append base");
        Ok(AppendBase {
            len: times.len(),
            last,
        })
    }

    fn attempt(
        &self,
        source: &dyn DatasetSource,
        store: &StoreRef,
        target: &Target,
        options: &ProcessOptions,
    ) -> WriteOutcome {
        let written = source
            .open()
            .and_then(|ds| process(ds, &self.config, options))
            .and_then(|ds| match target {
                Target::Convert => self.write_convert(ds, store),
                Target::Append { archive, base, last } => self.write_append(ds, archive, *base, *last),
                Target::Region { archive, region } => self.write_region(ds, archive, region.as_ref()),
            });
        let written = match written {
            Ok(w) => w,
            Err(e) => return WriteOutcome::Failed(e),
        };
        match self.verify(&written) {
            Ok(regressed) if regressed.is_empty() => WriteOutcome::Written(WriteSummary {
                attempts: 0,
                region: written.region,
                variables: written.variables,
                entries: written.entries,
            }),
            Ok(regressed) => WriteOutcome::Regressed(regressed),
            Err(e) => WriteOutcome::Failed(e),
        }
    }

    fn write_convert(&self, ds: MemDataset, store: &StoreRef) -> Result<AttemptOutput> {
        let planned;
        let encoder = if self.layout_planning {
            let plan = plan_layout(&self.config, &ds, &ds.dimensions())?;
            planned = VariableEncoder::from_config(&self.config, plan)?;
            &planned
        } else {
            &self.encoder
        };
        let mut archive = Archive::create(store.clone(), ds.attributes().clone(), true)?;
        for coord in ds.coordinates() {
            archive.write_coordinate(coord)?;
        }
        let mut variables = Vec::new();
        for var in ds.variables() {
            let meta = encoder.metadata(var, var.shape().to_vec())?;
            let array = archive.create_variable(&var.name, meta)?;
            let ranges: Vec<_> = var.shape().iter().map(|&n| 0..n).collect();
            array.write_region(&ranges, var.data.view())?;
            variables.push(var.name.clone());
        }
        let entries = ds.dimension_length(&self.config.time.dim).unwrap_or(0);
        Ok(AttemptOutput {
            archive,
            dataset: ds,
            region: Region::new(),
            variables,
            entries,
        })
    }

    fn write_append(&self, mut ds: MemDataset, archive: &Archive, base: usize, last: NaiveDateTime) -> Result<AttemptOutput> {
        let dim = self.config.time.append_dim.as_str();
        let n = align_for_append(&mut ds, dim, last)?;
        let region = Region::new().with(dim, base..base + n);
        if n == 0 {
            info!(dim, "nothing newer than the archive, skipping append");
            return Ok(AttemptOutput {
                archive: archive.clone(),
                dataset: ds,
                region,
                variables: Vec::new(),
                entries: 0,
            });
        }

        for var in ds.variables() {
            let array = self.matching_array(archive, var)?;
            if !array.dimension_names().iter().any(|d| d == dim) {
                return Err(Error::StructuralMismatch(format!(
                    "variable '{}' does not span append dimension '{}'",
                    var.name, dim
                )));
            }
        }

        let coord = ds
            .coordinate(dim)
            .ok_or_else(|| Error::StructuralMismatch(format!("fragment has no coordinate '{}'", dim)))?;
        let mut coord_array = archive.coordinate_array(dim)?;
        coord_array.resize(vec![base + n])?;
        let values = ArrayD::from_shape_vec(IxDyn(&[n]), coord.to_numeric())?;
        coord_array.write_region(&[base..base + n], values.view())?;

        let mut variables = Vec::new();
        for name in archive.variable_names() {
            let mut array = archive.variable(name)?;
            let Some(axis) = array.dimension_names().iter().position(|d| d == dim) else {
                continue;
            };
            let mut shape = array.shape().to_vec();
            shape[axis] = base + n;
            array.resize(shape)?;
            if let Some(var) = ds.variable(name) {
                let ranges = region.ranges_for(array.dimension_names(), array.shape())?;
                array.write_region(&ranges, var.data.view())?;
                variables.push(name.clone());
            }
        }
        Ok(AttemptOutput {
            archive: archive.clone(),
            dataset: ds,
            region,
            variables,
            entries: n,
        })
    }

    fn write_region(&self, ds: MemDataset, archive: &Archive, region: Option<&Region>) -> Result<AttemptOutput> {
        let dim = self.config.time.dim.as_str();
        let region = match region {
            Some(r) => r.clone(),
            None => locate(&ds, archive, dim)?,
        };
        let mut variables = Vec::new();
        for var in ds.variables() {
            if var.axis_of(dim).is_none() {
                debug!(variable = %var.name, "skipping variable without sequence dimension");
                continue;
            }
            let array = self.matching_array(archive, var)?;
            let ranges = region.ranges_for(array.dimension_names(), array.shape())?;
            array.write_region(&ranges, var.data.view())?;
            variables.push(var.name.clone());
        }
        let entries = region.get(dim).map(|r| r.len()).unwrap_or(0);
        Ok(AttemptOutput {
            archive: archive.clone(),
            dataset: ds,
            region,
            variables,
            entries,
        })
    }

    fn matching_array(&self, archive: &Archive, var: &Variable) -> Result<Array> {
        if !archive.variable_names().iter().any(|v| *v == var.name) {
            return Err(Error::StructuralMismatch(format!(
                "variable '{}' is not in the archive",
                var.name
            )));
        }
        let array = archive.variable(&var.name)?;
        if array.dimension_names() != var.dims.as_slice() {
            return Err(Error::StructuralMismatch(format!(
                "variable '{}' has dimensions {:?}, archive has {:?}",
                var.name,
                var.dims,
                array.dimension_names()
            )));
        }
        Ok(array)
    }

    /// Names of checked variables whose missingness differs after the write
    fn verify(&self, written: &AttemptOutput) -> Result<Vec<String>> {
        let checked: Vec<&str> = match &self.config.missing_data.missing_check_vars {
            MissingCheckSpec::Disabled => return Ok(Vec::new()),
            MissingCheckSpec::All => written.variables.iter().map(String::as_str).collect(),
            MissingCheckSpec::Variables(names) => names.iter().map(String::as_str).collect(),
        };
        let mut regressed = Vec::new();
        for name in checked {
            let Some(input) = written.dataset.variable(name) else {
                warn!(variable = name, "checked variable not in fragment, skipping");
                continue;
            };
            if !written.variables.iter().any(|v| v == name) {
                debug!(variable = name, "checked variable was not written, skipping");
                continue;
            }
            let stored = written.archive.read_variable(name, &written.region)?;
            let same_mask = stored.shape() == input.data.shape()
                && stored
                    .iter()
                    .zip(input.data.iter())
                    .all(|(s, i)| s.is_nan() == i.is_nan());
            if !same_mask {
                debug!(variable = name, region = %written.region, "missingness differs after write");
                regressed.push(name.to_string());
            }
        }
        Ok(regressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use gridstore_core::time::parse_datetime;
    use gridstore_core::Coordinate;
    use gridstore_storage::{MemoryStore, Store};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn days(start: &str, n: usize) -> Vec<NaiveDateTime> {
        let start = parse_datetime(start).unwrap();
        (0..n).map(|i| start + chrono::Duration::days(i as i64)).collect()
    }

    fn fragment(start: &str, n: usize) -> MemDataset {
        let mut ds = MemDataset::new();
        ds.add_coordinate(Coordinate::time("time", days(start, n))).unwrap();
        ds.add_coordinate(Coordinate::numeric("lat", vec![0.0, 1.0])).unwrap();
        let values: Vec<f64> = (0..n * 2).map(|i| i as f64).collect();
        let data = ArrayD::from_shape_vec(IxDyn(&[n, 2]), values).unwrap();
        ds.add_variable(Variable::new("hs", vec!["time".into(), "lat".into()], data))
            .unwrap();
        ds
    }

    fn config(retries: u32) -> ConverterConfig {
        let mut config = ConverterConfig::default();
        config.missing_data.retries_on_missing = retries;
        config.missing_data.retry_backoff_ms = 0;
        config
    }

    fn controller(retries: u32) -> WriteController {
        WriteController::from_config(config(retries)).unwrap()
    }

    struct CountingSource {
        inner: MemorySource,
        opens: AtomicU32,
        fail_first: u32,
    }

    impl CountingSource {
        fn new(ds: MemDataset, fail_first: u32) -> Self {
            Self {
                inner: MemorySource::new(ds),
                opens: AtomicU32::new(0),
                fail_first,
            }
        }
    }

    impl DatasetSource for CountingSource {
        fn open(&self) -> Result<MemDataset> {
            let n = self.opens.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(Error::Storage("source unavailable".into()));
            }
            self.inner.open()
        }

        fn describe(&self) -> String {
            "counting".into()
        }
    }

    #[test]
    fn test_policy_delay_is_linear() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(3), Duration::from_millis(300));
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(RetryPolicy::default().max_retries, 0);
    }

    #[test]
    fn test_convert_then_refuse_existing() {
        let store: StoreRef = Arc::new(MemoryStore::new());
        let source = MemorySource::new(fragment("2000-01-01", 3));
        let summary = controller(0)
            .run(&source, store.clone(), WriteMode::Convert { overwrite: false }, &ProcessOptions::new())
            .unwrap();
        assert_eq!(summary.attempts, 1);
        assert_eq!(summary.entries, 3);

        let err = controller(3)
            .run(&source, store.clone(), WriteMode::Convert { overwrite: false }, &ProcessOptions::new())
            .unwrap_err();
        assert!(matches!(err, Error::ArchiveExists(_)));

        controller(0)
            .run(&source, store, WriteMode::Convert { overwrite: true }, &ProcessOptions::new())
            .unwrap();
    }

    #[test]
    fn test_transient_source_failures_are_retried() {
        let store: StoreRef = Arc::new(MemoryStore::new());
        let source = CountingSource::new(fragment("2000-01-01", 2), 2);
        let summary = controller(2)
            .run(&source, store, WriteMode::Convert { overwrite: false }, &ProcessOptions::new())
            .unwrap();
        assert_eq!(summary.attempts, 3);
        assert_eq!(source.opens.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_transient_failures_exhaust_budget() {
        let store: StoreRef = Arc::new(MemoryStore::new());
        let source = CountingSource::new(fragment("2000-01-01", 2), u32::MAX);
        let err = controller(1)
            .run(&source, store, WriteMode::Convert { overwrite: false }, &ProcessOptions::new())
            .unwrap_err();
        assert!(matches!(err, Error::TransientWrite { attempts: 2, .. }));
        assert_eq!(source.opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_contract_violation_is_not_retried() {
        let store: StoreRef = Arc::new(MemoryStore::new());
        let ctl = controller(5);
        ctl.run(
            &MemorySource::new(fragment("2000-01-01", 10)),
            store.clone(),
            WriteMode::Convert { overwrite: false },
            &ProcessOptions::new(),
        )
        .unwrap();
        let late = CountingSource::new(fragment("2000-02-01", 2), 0);
        let err = ctl
            .run(&late, store, WriteMode::Region { region: None }, &ProcessOptions::new())
            .unwrap_err();
        assert!(matches!(err, Error::OutOfExtent(_)));
        assert_eq!(late.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_region_write_located() {
        let store: StoreRef = Arc::new(MemoryStore::new());
        let ctl = controller(0);
        let mut base = fragment("2000-01-01", 10);
        base.variable_mut("hs").unwrap().data.fill(f64::NAN);
        ctl.run(&MemorySource::new(base), store.clone(), WriteMode::Convert { overwrite: false }, &ProcessOptions::new())
            .unwrap();

        let summary = ctl
            .run(
                &MemorySource::new(fragment("2000-01-06", 5)),
                store.clone(),
                WriteMode::Region { region: None },
                &ProcessOptions::new(),
            )
            .unwrap();
        assert_eq!(summary.region.get("time"), Some(5..10));
        assert_eq!(summary.variables, vec!["hs".to_string()]);

        let archive = Archive::open(store).unwrap();
        let hs = archive.read_variable("hs", &Region::new()).unwrap();
        assert!(hs[[4, 1]].is_nan());
        assert_eq!(hs[[5, 0]], 0.0);
        assert_eq!(hs[[9, 1]], 9.0);
    }

    #[test]
    fn test_region_shape_mismatch() {
        let store: StoreRef = Arc::new(MemoryStore::new());
        let ctl = controller(2);
        ctl.run(
            &MemorySource::new(fragment("2000-01-01", 10)),
            store.clone(),
            WriteMode::Convert { overwrite: false },
            &ProcessOptions::new(),
        )
        .unwrap();
        let region = Region::new().with("time", 0..3);
        let err = ctl
            .run(
                &MemorySource::new(fragment("2000-01-01", 2)),
                store,
                WriteMode::Region { region: Some(region) },
                &ProcessOptions::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::StructuralMismatch(_)));
    }

    #[test]
    fn test_append_extends_and_skips_known_entries() {
        let store: StoreRef = Arc::new(MemoryStore::new());
        let ctl = controller(0);
        ctl.run(
            &MemorySource::new(fragment("2000-01-01", 3)),
            store.clone(),
            WriteMode::Convert { overwrite: false },
            &ProcessOptions::new(),
        )
        .unwrap();

        let summary = ctl
            .run(
                &MemorySource::new(fragment("2000-01-03", 3)),
                store.clone(),
                WriteMode::Append,
                &ProcessOptions::new(),
            )
            .unwrap();
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.region.get("time"), Some(3..5));

        let archive = Archive::open(store.clone()).unwrap();
        let time = archive.read_coordinate("time").unwrap();
        assert_eq!(time.as_time().unwrap(), days("2000-01-01", 5).as_slice());
        let hs = archive.read_variable("hs", &Region::new()).unwrap();
        assert_eq!(hs.shape(), &[5, 2]);
        assert_eq!(hs[[3, 0]], 2.0);

        let again = ctl
            .run(
                &MemorySource::new(fragment("2000-01-02", 2)),
                store,
                WriteMode::Append,
                &ProcessOptions::new(),
            )
            .unwrap();
        assert_eq!(again.entries, 0);
    }

    #[test]
    fn test_append_without_archive() {
        let store: StoreRef = Arc::new(MemoryStore::new());
        let err = controller(3)
            .run(
                &MemorySource::new(fragment("2000-01-01", 3)),
                store,
                WriteMode::Append,
                &ProcessOptions::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    /// Store that drops every chunk write under `vars/`
    #[derive(Debug, Default)]
    struct DroppingStore {
        inner: MemoryStore,
    }

    impl Store for DroppingStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(key)
        }
        fn set(&self, key: &str, value: &[u8]) -> Result<()> {
            if key.starts_with("vars/") && key.contains("/c/") {
                return Ok(());
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
        fn key_lock(&self, key: &str) -> Arc<parking_lot::Mutex<()>> {
            self.inner.key_lock(key)
        }
    }

    /// Store failing the first `root_reads` reads of the archive root and the
    /// first `chunk_writes` variable chunk writes
    #[derive(Debug, Default)]
    struct BlipStore {
        inner: MemoryStore,
        root_reads: AtomicU32,
        chunk_writes: AtomicU32,
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    impl Store for BlipStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            if key == "archive.json" && take(&self.root_reads) {
                return Err(Error::Storage("injected root read failure".into()));
            }
            self.inner.get(key)
        }
        fn set(&self, key: &str, value: &[u8]) -> Result<()> {
            if key.starts_with("vars/") && key.contains("/c/") && take(&self.chunk_writes) {
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
        fn key_lock(&self, key: &str) -> Arc<parking_lot::Mutex<()>> {
            self.inner.key_lock(key)
        }
    }

    fn seeded(days_stored: usize) -> (Arc<BlipStore>, StoreRef) {
        let blip = Arc::new(BlipStore::default());
        let store: StoreRef = blip.clone();
        controller(0)
            .run(
                &MemorySource::new(fragment("2000-01-01", days_stored)),
                store.clone(),
                WriteMode::Convert { overwrite: false },
                &ProcessOptions::new(),
            )
            .unwrap();
        (blip, store)
    }

    #[test]
    fn test_transient_archive_open_is_retried() {
        let (blip, store) = seeded(3);
        blip.root_reads.store(1, Ordering::SeqCst);
        let summary = controller(2)
            .run(
                &MemorySource::new(fragment("2000-01-04", 2)),
                store.clone(),
                WriteMode::Append,
                &ProcessOptions::new(),
            )
            .unwrap();
        assert_eq!(summary.attempts, 2);
        assert_eq!(summary.region.get("time"), Some(3..5));

        blip.root_reads.store(1, Ordering::SeqCst);
        let summary = controller(2)
            .run(
                &MemorySource::new(fragment("2000-01-02", 2)),
                store,
                WriteMode::Region { region: None },
                &ProcessOptions::new(),
            )
            .unwrap();
        assert_eq!(summary.attempts, 2);
        assert_eq!(summary.region.get("time"), Some(1..3));
    }

    #[test]
    fn test_archive_open_failures_exhaust_budget() {
        let (blip, store) = seeded(3);
        blip.root_reads.store(u32::MAX, Ordering::SeqCst);
        let source = CountingSource::new(fragment("2000-01-02", 2), 0);
        let err = controller(1)
            .run(&source, store, WriteMode::Region { region: None }, &ProcessOptions::new())
            .unwrap_err();
        match err {
            Error::TransientWrite { attempts, source } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*source, Error::Storage(_)));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(source.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_append_retry_keeps_base() {
        let (blip, store) = seeded(3);
        // The first attempt extends the axis before its chunk write fails
        blip.chunk_writes.store(1, Ordering::SeqCst);
        let summary = controller(2)
            .run(
                &MemorySource::new(fragment("2000-01-04", 2)),
                store.clone(),
                WriteMode::Append,
                &ProcessOptions::new(),
            )
            .unwrap();
        assert_eq!(summary.attempts, 2);
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.region.get("time"), Some(3..5));

        let archive = Archive::open(store).unwrap();
        let time = archive.read_coordinate("time").unwrap();
        assert_eq!(time.as_time().unwrap(), days("2000-01-01", 5).as_slice());
        let hs = archive.read_variable("hs", &Region::new()).unwrap();
        assert_eq!(hs.shape(), &[5, 2]);
        assert_eq!(hs[[3, 0]], 0.0);
        assert_eq!(hs[[4, 1]], 3.0);
    }

    #[test]
    fn test_existing_archive_checked_once_per_convert() {
        let blip = Arc::new(BlipStore::default());
        let store: StoreRef = blip.clone();
        blip.chunk_writes.store(1, Ordering::SeqCst);
        let summary = controller(1)
            .run(
                &MemorySource::new(fragment("2000-01-01", 3)),
                store,
                WriteMode::Convert { overwrite: false },
                &ProcessOptions::new(),
            )
            .unwrap();
        assert_eq!(summary.attempts, 2);
    }

    #[test]
    fn test_regression_retried_to_bound() {
        let store: StoreRef = Arc::new(DroppingStore::default());
        let source = CountingSource::new(fragment("2000-01-01", 3), 0);
        let err = controller(2)
            .run(&source, store, WriteMode::Convert { overwrite: false }, &ProcessOptions::new())
            .unwrap_err();
        match err {
            Error::MissingDataRegression { attempts, detail } => {
                assert_eq!(attempts, 3);
                assert!(detail.contains("hs"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(source.opens.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_disabled_check_accepts_dropped_writes() {
        let store: StoreRef = Arc::new(DroppingStore::default());
        let mut config = config(2);
        config.missing_data.missing_check_vars = MissingCheckSpec::Disabled;
        let summary = WriteController::from_config(config)
            .unwrap()
            .run(
                &MemorySource::new(fragment("2000-01-01", 3)),
                store,
                WriteMode::Convert { overwrite: false },
                &ProcessOptions::new(),
            )
            .unwrap();
        assert_eq!(summary.attempts, 1);
    }

    #[test]
    fn test_named_check_skips_unknown_variables() {
        let store: StoreRef = Arc::new(DroppingStore::default());
        let mut config = config(0);
        config.missing_data.missing_check_vars = MissingCheckSpec::Variables(vec!["tp".into()]);
        let summary = WriteController::from_config(config)
            .unwrap()
            .run(
                &MemorySource::new(fragment("2000-01-01", 3)),
                store,
                WriteMode::Convert { overwrite: false },
                &ProcessOptions::new(),
            )
            .unwrap();
        assert_eq!(summary.attempts, 1);
    }
}
