//! Archive template builder
//!
//! A template is an archive whose sequence axis already spans the full
//! eventual extent while no sequence-dependent data has been written. Every
//! variable array is declared with its final shape and chunking, so
//! independent writers can fill disjoint regions later without any
//! structural change to the archive.
//!
//! | Piece | Written by the template |
//! |-------|-------------------------|
//! | Sequence coordinate | Full generated axis |
//! | Other coordinates | Copied from the sample |
//! | Variables spanning the sequence dimension | Metadata only |
//! | Variables without it | Metadata and data |
//! | Attributes | Copied from the sample |
//!
//! # Example
//!
//! ```no_run
//! use gridstore_engine::template::TemplateBuilder;
//! use gridstore_core::time::parse_datetime;
//! # fn run(sample: &gridstore_core::MemDataset, store: gridstore_storage::StoreRef) -> gridstore_core::Result<()> {
//! let archive = TemplateBuilder::new("time")
//!     .global_start(parse_datetime("2000-01-01")?)
//!     .global_end(parse_datetime("2000-12-31")?)
//!     .build(sample, store, false)?;
//! # Ok(()) }
//! ```

use crate::config::ConverterConfig;
use crate::encoding::VariableEncoder;
use chrono::NaiveDateTime;
use gridstore_core::time::{date_range, format_datetime};
use gridstore_core::{Coordinate, Dataset, DimensionSpec, Error, Frequency, MemDataset, Result};
use gridstore_storage::{Archive, StoreRef};
use std::ops::Range;
use tracing::{debug, info};

/// Resolved sequence axis of a template
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateAxis {
    /// Axis entries from start to end inclusive
    pub values: Vec<NaiveDateTime>,
    /// Step between entries
    pub freq: Frequency,
    /// Whether the step came from the configured default
    pub defaulted: bool,
}

/// Builds template archives from a sample dataset
#[derive(Debug, Clone)]
pub struct TemplateBuilder {
    sequence_dim: String,
    global_start: Option<NaiveDateTime>,
    global_end: Option<NaiveDateTime>,
    freq: Option<Frequency>,
    default_freq: Frequency,
    encoder: VariableEncoder,
}

impl TemplateBuilder {
    /// Builder for a template along `sequence_dim`
    pub fn new(sequence_dim: impl Into<String>) -> Self {
        Self {
            sequence_dim: sequence_dim.into(),
            global_start: None,
            global_end: None,
            freq: None,
            default_freq: Frequency::DAILY,
            encoder: VariableEncoder::default(),
        }
    }

    /// Builder taking every setting from `config`
    pub fn from_config(config: &ConverterConfig) -> Result<Self> {
        Ok(Self {
            sequence_dim: config.time.dim.clone(),
            global_start: config.global_start()?,
            global_end: config.global_end()?,
            freq: config.time.freq,
            default_freq: config.time.default_freq,
            encoder: VariableEncoder::from_config(config, config.chunking.clone())?,
        })
    }

    /// First axis entry; the sample's first entry when unset
    pub fn global_start(mut self, start: NaiveDateTime) -> Self {
        self.global_start = Some(start);
        self
    }

    /// Last axis entry (inclusive); the sample's last entry when unset
    pub fn global_end(mut self, end: NaiveDateTime) -> Self {
        self.global_end = Some(end);
        self
    }

    /// Axis step; inferred from the sample when unset
    pub fn freq(mut self, freq: Frequency) -> Self {
        self.freq = Some(freq);
        self
    }

    /// Step used when none is given and the sample has fewer than two entries
    pub fn default_freq(mut self, freq: Frequency) -> Self {
        self.default_freq = freq;
        self
    }

    /// Storage layout for variables
    pub fn encoder(mut self, encoder: VariableEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    /// Resolve the full sequence axis for `sample`
    pub fn axis(&self, sample: &MemDataset) -> Result<TemplateAxis> {
        let times = sample
            .coordinate(&self.sequence_dim)
            .and_then(|c| c.as_time())
            .ok_or_else(|| {
                Error::StructuralMismatch(format!(
                    "sample has no time coordinate '{}'",
                    self.sequence_dim
                ))
            })?;
        let start = self.global_start.or_else(|| times.first().copied());
        let end = self.global_end.or_else(|| times.last().copied());
        let (Some(start), Some(end)) = (start, end) else {
            return Err(Error::Planning(format!(
                "sample '{}' axis is empty and no global extent was given",
                self.sequence_dim
            )));
        };
        let (freq, defaulted) = match self.freq.or_else(|| Frequency::infer(times)) {
            Some(freq) => (freq, false),
            None => {
                info!(
                    dim = %self.sequence_dim,
                    freq = %self.default_freq,
                    "cannot infer frequency from sample, using default"
                );
                (self.default_freq, true)
            }
        };
        let values = date_range(start, end, freq)?;
        Ok(TemplateAxis {
            values,
            freq,
            defaulted,
        })
    }

    /// Dimensions of the template built from `sample`
    pub fn dimensions(&self, sample: &MemDataset) -> Result<Vec<DimensionSpec>> {
        let axis = self.axis(sample)?;
        Ok(sample
            .dimensions()
            .into_iter()
            .map(|d| {
                if d.name == self.sequence_dim {
                    DimensionSpec::new(d.name, axis.values.len())
                } else {
                    d
                }
            })
            .collect())
    }

    /// Create the template archive in `store`
    pub fn build(&self, sample: &MemDataset, store: StoreRef, overwrite: bool) -> Result<Archive> {
        let axis = self.axis(sample)?;
        let full_len = axis.values.len();
        let mut archive = Archive::create(store, sample.attributes().clone(), overwrite)?;

        for coord in sample.coordinates() {
            if coord.name == self.sequence_dim {
                let full = Coordinate::time(coord.name.clone(), axis.values.clone())
                    .with_attrs(coord.attrs.clone());
                archive.write_coordinate(&full)?;
            } else {
                archive.write_coordinate(coord)?;
            }
        }

        for var in sample.variables() {
            let shape: Vec<usize> = var
                .dims
                .iter()
                .zip(var.shape())
                .map(|(dim, &len)| if *dim == self.sequence_dim { full_len } else { len })
                .collect();
            let meta = self.encoder.metadata(var, shape)?;
            let array = archive.create_variable(&var.name, meta)?;
            if var.axis_of(&self.sequence_dim).is_none() {
                let ranges: Vec<Range<usize>> = var.shape().iter().map(|&n| 0..n).collect();
                array.write_region(&ranges, var.data.view())?;
                debug!(variable = %var.name, "wrote static variable");
            } else {
                debug!(variable = %var.name, chunks = ?array.chunks(), "declared variable");
            }
        }

        info!(
            dim = %self.sequence_dim,
            start = %axis.values.first().map(format_datetime).unwrap_or_default(),
            end = %axis.values.last().map(format_datetime).unwrap_or_default(),
            entries = full_len,
            freq = %axis.freq,
            "created template archive"
        );
        Ok(archive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridstore_core::time::parse_datetime;
    use gridstore_core::{ChunkPlan, Region, Variable};
    use gridstore_storage::{Compression, MemoryStore};
    use ndarray::{ArrayD, IxDyn};
    use std::sync::Arc;

    fn t(s: &str) -> NaiveDateTime {
        parse_datetime(s).unwrap()
    }

    fn sample(times: &[&str]) -> MemDataset {
        let mut ds = MemDataset::new();
        ds.attributes_mut().insert("title".into(), "sample".into());
        ds.add_coordinate(Coordinate::time("time", times.iter().map(|s| t(s)).collect()))
            .unwrap();
        ds.add_coordinate(Coordinate::numeric("lat", vec![0.0, 1.0, 2.0])).unwrap();
        let n = times.len();
        let data = ArrayD::from_shape_vec(IxDyn(&[n, 3]), (0..n * 3).map(|i| i as f64).collect()).unwrap();
        ds.add_variable(Variable::new("hs", vec!["time".into(), "lat".into()], data))
            .unwrap();
        let depth = ArrayD::from_shape_vec(IxDyn(&[3]), vec![10.0, 20.0, 30.0]).unwrap();
        ds.add_variable(Variable::new("depth", vec!["lat".into()], depth)).unwrap();
        ds
    }

    fn store() -> StoreRef {
        Arc::new(MemoryStore::new())
    }

    #[test]
    fn test_ten_day_axis() {
        let builder = TemplateBuilder::new("time")
            .global_start(t("2000-01-01"))
            .global_end(t("2000-01-10"));
        let axis = builder.axis(&sample(&["2000-01-01", "2000-01-02"])).unwrap();
        assert_eq!(axis.values.len(), 10);
        assert_eq!(axis.freq, Frequency::DAILY);
        assert!(!axis.defaulted);
    }

    #[test]
    fn test_frequency_inferred_from_sample() {
        let builder = TemplateBuilder::new("time").global_end(t("2000-01-02"));
        let axis = builder
            .axis(&sample(&["2000-01-01T00:00:00", "2000-01-01T06:00:00"]))
            .unwrap();
        assert_eq!(axis.freq.seconds(), 21_600);
        assert_eq!(axis.values.len(), 5);
    }

    #[test]
    fn test_single_point_sample_uses_default_frequency() {
        let builder = TemplateBuilder::new("time").global_end(t("2000-01-05"));
        let axis = builder.axis(&sample(&["2000-01-01"])).unwrap();
        assert!(axis.defaulted);
        assert_eq!(axis.freq, Frequency::DAILY);
        assert_eq!(axis.values.len(), 5);

        let hourly = Frequency::from_seconds(3_600).unwrap();
        let axis = builder.default_freq(hourly).axis(&sample(&["2000-01-01"])).unwrap();
        assert_eq!(axis.freq, hourly);
        assert_eq!(axis.values.len(), 97);
    }

    #[test]
    fn test_sample_without_time_coordinate() {
        let err = TemplateBuilder::new("step").axis(&sample(&["2000-01-01"])).unwrap_err();
        assert!(matches!(err, Error::StructuralMismatch(_)));
    }

    #[test]
    fn test_build_declares_full_shape_without_data() {
        let store = store();
        let builder = TemplateBuilder::new("time")
            .global_start(t("2000-01-01"))
            .global_end(t("2000-01-10"))
            .encoder(VariableEncoder::new(ChunkPlan::new().with("time", 4), Compression::None));
        let archive = builder
            .build(&sample(&["2000-01-01", "2000-01-02"]), store.clone(), false)
            .unwrap();

        let hs = archive.variable("hs").unwrap();
        assert_eq!(hs.shape(), &[10, 3]);
        assert_eq!(hs.chunks(), &[4, 3]);
        assert_eq!(hs.stored_chunk_count().unwrap(), 0);
        assert!(hs.read_all().unwrap().iter().all(|v| v.is_nan()));

        let depth = archive.read_variable("depth", &Region::new()).unwrap();
        assert_eq!(depth.as_slice().unwrap(), &[10.0, 20.0, 30.0]);

        let time = archive.read_coordinate("time").unwrap();
        assert_eq!(time.as_time().unwrap().last(), Some(&t("2000-01-10")));
        assert_eq!(archive.attributes()["title"], "sample");
        assert_eq!(
            builder.dimensions(&sample(&["2000-01-01"])).unwrap()[0],
            DimensionSpec::new("time", 10)
        );
    }

    #[test]
    fn test_build_refuses_existing_archive() {
        let store = store();
        let builder = TemplateBuilder::new("time");
        let ds = sample(&["2000-01-01", "2000-01-02"]);
        builder.build(&ds, store.clone(), false).unwrap();
        assert!(matches!(
            builder.build(&ds, store.clone(), false),
            Err(Error::ArchiveExists(_))
        ));
        assert!(builder.build(&ds, store, true).is_ok());
    }
}
