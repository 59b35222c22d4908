//! Chunk Advisor and Chunk Validator
//!
//! Both are pure functions over dimension lists; neither touches storage.
//!
//! # Advisor
//!
//! [`ChunkAdvisor::recommend`] starts from the full dimension lengths and
//! shrinks them geometrically until one chunk fits the byte budget. Each pass
//! divides every shrinkable dimension by `ratio^share`, where `ratio` is the
//! current overshoot and `share` is proportional to the inverse of the
//! dimension's weight, so heavily weighted dimensions keep longer chunks:
//!
//! | Pattern | Sequence weight | Extent weight |
//! |---------|-----------------|---------------|
//! | `temporal` | 4 | 1 |
//! | `spatial` | 1 | 4 |
//! | `balanced` | 1 | 1 |
//!
//! The loop is capped at [`MAX_SHRINK_ITERATIONS`] passes and usually settles
//! in one or two.
//!
//! # Validator
//!
//! [`ChunkValidator::validate`] measures a caller-supplied plan and reports
//! warnings and textual recommendations. It never alters the plan.
//!
//! # Default budget
//!
//! The default target is 50 MiB, overridable process-wide through the
//! `GRIDSTORE_TARGET_CHUNK_SIZE_MB` environment variable (read once) or
//! [`set_default_target_chunk_size_bytes`].

use gridstore_core::{AccessPattern, ChunkPlan, DimensionSpec, Error, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Bytes per MiB
pub const MIB: f64 = 1024.0 * 1024.0;

/// Built-in default chunk budget in MiB
pub const DEFAULT_TARGET_CHUNK_SIZE_MB: f64 = 50.0;

/// Environment variable overriding the default budget (MiB)
pub const TARGET_CHUNK_SIZE_ENV: &str = "GRIDSTORE_TARGET_CHUNK_SIZE_MB";

/// Upper bound on advisor shrink passes
pub const MAX_SHRINK_ITERATIONS: usize = 64;

/// Dimension names treated as the sequence axis when none is configured
pub const SEQUENCE_DIM_NAMES: &[&str] = &["time", "t", "valid_time", "datetime", "date"];

static ENV_DEFAULT_TARGET: Lazy<f64> = Lazy::new(|| {
    let fallback = DEFAULT_TARGET_CHUNK_SIZE_MB * MIB;
    match std::env::var(TARGET_CHUNK_SIZE_ENV) {
        Ok(raw) => match raw.trim().parse::<f64>() {
            Ok(mb) if mb.is_finite() && mb > 0.0 => mb * MIB,
            _ => {
                warn!(value = %raw, "ignoring invalid {}", TARGET_CHUNK_SIZE_ENV);
                fallback
            }
        },
        Err(_) => fallback,
    }
});

// 0 means "not overridden"
static DEFAULT_TARGET_OVERRIDE: AtomicU64 = AtomicU64::new(0);

/// Process-wide default chunk budget in bytes
pub fn default_target_chunk_size_bytes() -> f64 {
    match DEFAULT_TARGET_OVERRIDE.load(Ordering::Relaxed) {
        0 => *ENV_DEFAULT_TARGET,
        bytes => bytes as f64,
    }
}

/// Override the process-wide default budget; `0` restores the environment or
/// built-in value.
pub fn set_default_target_chunk_size_bytes(bytes: u64) {
    DEFAULT_TARGET_OVERRIDE.store(bytes, Ordering::Relaxed);
}

/// Advisor output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecommendation {
    /// Chunk length per dimension
    pub chunks: ChunkPlan,
    /// Realized bytes per chunk under `chunks`
    pub estimated_chunk_size_bytes: f64,
    /// Problems the caller should know about
    pub warnings: Vec<String>,
    /// Rationale for the chosen layout
    pub notes: Vec<String>,
}

impl ChunkRecommendation {
    /// Realized chunk size in MiB
    pub fn estimated_chunk_size_mb(&self) -> f64 {
        self.estimated_chunk_size_bytes / MIB
    }
}

/// Validator output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkValidation {
    /// Realized bytes per chunk
    pub chunk_size_bytes: f64,
    /// Detected problems
    pub warnings: Vec<String>,
    /// Suggested changes; the plan itself is left untouched
    pub recommendations: Vec<String>,
}

impl ChunkValidation {
    /// Realized chunk size in MiB
    pub fn chunk_size_mb(&self) -> f64 {
        self.chunk_size_bytes / MIB
    }

    /// Check whether nothing was flagged
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

fn check_dimensions(dims: &[DimensionSpec], dtype_size_bytes: usize) -> Result<()> {
    if dtype_size_bytes == 0 {
        return Err(Error::Planning("element size must be at least 1 byte".into()));
    }
    if let Some(d) = dims.iter().find(|d| d.length == 0) {
        return Err(Error::Planning(format!("dimension '{}' has zero length", d.name)));
    }
    for (i, d) in dims.iter().enumerate() {
        if dims[..i].iter().any(|o| o.name == d.name) {
            return Err(Error::Planning(format!("dimension '{}' listed twice", d.name)));
        }
    }
    Ok(())
}

fn check_target(target: f64) -> Result<()> {
    if !(target.is_finite() && target > 0.0) {
        return Err(Error::Planning(format!(
            "target chunk size must be positive, got {}",
            target
        )));
    }
    Ok(())
}

fn chunk_bytes(chunks: &[usize], dtype_size_bytes: usize) -> f64 {
    chunks.iter().map(|&c| c as f64).product::<f64>() * dtype_size_bytes as f64
}

/// Heuristic chunk sizing
#[derive(Debug, Clone, Default)]
pub struct ChunkAdvisor {
    sequence_dim: Option<String>,
}

impl ChunkAdvisor {
    /// Advisor recognising the sequence dimension by conventional names
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `name` as the sequence dimension, builder style
    pub fn with_sequence_dim(mut self, name: impl Into<String>) -> Self {
        self.sequence_dim = Some(name.into());
        self
    }

    fn is_sequence(&self, name: &str) -> bool {
        match &self.sequence_dim {
            Some(seq) => seq == name,
            None => SEQUENCE_DIM_NAMES.iter().any(|n| n.eq_ignore_ascii_case(name)),
        }
    }

    fn weight(&self, name: &str, pattern: AccessPattern) -> f64 {
        match (pattern, self.is_sequence(name)) {
            (AccessPattern::Temporal, true) | (AccessPattern::Spatial, false) => 4.0,
            _ => 1.0,
        }
    }

    fn pattern_note(&self, dims: &[DimensionSpec], pattern: AccessPattern) -> String {
        let (seq, extent): (Vec<&str>, Vec<&str>) = {
            let seq = dims.iter().filter(|d| self.is_sequence(&d.name)).map(|d| d.name.as_str());
            let extent = dims.iter().filter(|d| !self.is_sequence(&d.name)).map(|d| d.name.as_str());
            (seq.collect(), extent.collect())
        };
        match pattern {
            AccessPattern::Temporal => format!(
                "temporal access: long chunks along [{}] and short chunks along [{}] for time-series reads",
                seq.join(", "),
                extent.join(", ")
            ),
            AccessPattern::Spatial => format!(
                "spatial access: large chunks along [{}] and short chunks along [{}] for map reads",
                extent.join(", "),
                seq.join(", ")
            ),
            AccessPattern::Balanced => {
                "balanced access: all dimensions shrunk evenly toward the target".to_string()
            }
        }
    }

    /// Recommend a chunk plan
    ///
    /// `target_chunk_size_bytes` falls back to
    /// [`default_target_chunk_size_bytes`] when `None`.
    pub fn recommend(
        &self,
        dims: &[DimensionSpec],
        dtype_size_bytes: usize,
        pattern: AccessPattern,
        target_chunk_size_bytes: Option<f64>,
    ) -> Result<ChunkRecommendation> {
        check_dimensions(dims, dtype_size_bytes)?;
        let target = target_chunk_size_bytes.unwrap_or_else(default_target_chunk_size_bytes);
        check_target(target)?;

        let mut chunks: Vec<usize> = dims.iter().map(|d| d.length).collect();
        let mut notes = Vec::new();
        let mut warnings = Vec::new();

        if chunk_bytes(&chunks, dtype_size_bytes) <= target {
            notes.push(format!(
                "dataset fits within the {:.1} MiB target; using full dimension lengths",
                target / MIB
            ));
        } else {
            let weights: Vec<f64> = dims.iter().map(|d| self.weight(&d.name, pattern)).collect();
            for _ in 0..MAX_SHRINK_ITERATIONS {
                let bytes = chunk_bytes(&chunks, dtype_size_bytes);
                if bytes <= target {
                    break;
                }
                let shrinkable: Vec<usize> = (0..chunks.len()).filter(|&i| chunks[i] > 1).collect();
                if shrinkable.is_empty() {
                    break;
                }
                let ratio = bytes / target;
                let inverse_total: f64 = shrinkable.iter().map(|&i| 1.0 / weights[i]).sum();
                let mut changed = false;
                for &i in &shrinkable {
                    let share = (1.0 / weights[i]) / inverse_total;
                    let factor = ratio.powf(share);
                    let next = ((chunks[i] as f64 / factor).floor() as usize).clamp(1, chunks[i]);
                    changed |= next != chunks[i];
                    chunks[i] = next;
                }
                if !changed {
                    // Overshoot too small to move any dimension; trim the
                    // least-favoured longest chunk by one.
                    if let Some(&i) = shrinkable.iter().min_by(|&&a, &&b| {
                        weights[a]
                            .total_cmp(&weights[b])
                            .then(chunks[b].cmp(&chunks[a]))
                    }) {
                        chunks[i] -= 1;
                    }
                }
            }
            notes.push(self.pattern_note(dims, pattern));
            let bytes = chunk_bytes(&chunks, dtype_size_bytes);
            if bytes > target {
                warnings.push(format!(
                    "chunk size floor reached: {:.0} bytes per chunk exceeds the {:.0} byte target",
                    bytes, target
                ));
            }
        }

        let plan: ChunkPlan = dims
            .iter()
            .zip(&chunks)
            .map(|(d, &c)| (d.name.clone(), c))
            .collect();
        Ok(ChunkRecommendation {
            chunks: plan,
            estimated_chunk_size_bytes: chunk_bytes(&chunks, dtype_size_bytes),
            warnings,
            notes,
        })
    }
}

/// Diagnostics for caller-supplied chunk plans
#[derive(Debug, Clone)]
pub struct ChunkValidator {
    /// Chunks below this many bytes are flagged as too small
    pub min_chunk_bytes: f64,
    /// Chunks above this many bytes are flagged as too large
    pub max_chunk_bytes: f64,
    /// Chunk length 1 is flagged on dimensions at least this long
    pub granular_length: usize,
    /// Budget quoted in recommendations; the process default when `None`
    pub target_chunk_size_bytes: Option<f64>,
}

impl Default for ChunkValidator {
    fn default() -> Self {
        Self {
            min_chunk_bytes: MIB,
            max_chunk_bytes: 100.0 * MIB,
            granular_length: 100,
            target_chunk_size_bytes: None,
        }
    }
}

impl ChunkValidator {
    /// Validator with the 1 MiB / 100 MiB thresholds
    pub fn new() -> Self {
        Self::default()
    }

    /// Measure `plan` against `dims`
    pub fn validate(
        &self,
        plan: &ChunkPlan,
        dims: &[DimensionSpec],
        dtype_size_bytes: usize,
    ) -> Result<ChunkValidation> {
        check_dimensions(dims, dtype_size_bytes)?;
        if let Some((dim, _)) = plan.iter().find(|(_, len)| *len == 0) {
            return Err(Error::Planning(format!("chunk length along '{}' is zero", dim)));
        }
        let target = self
            .target_chunk_size_bytes
            .unwrap_or_else(default_target_chunk_size_bytes);

        let mut warnings = Vec::new();
        let mut recommendations: Vec<String> = Vec::new();
        let mut recommend = |text: String| {
            if !recommendations.contains(&text) {
                recommendations.push(text);
            }
        };

        for (dim, _) in plan.iter() {
            if !dims.iter().any(|d| d.name == dim) {
                warnings.push(format!("chunk length given for unknown dimension '{}'", dim));
            }
        }
        for d in dims {
            if let Some(len) = plan.get(&d.name) {
                if len > d.length {
                    warnings.push(format!(
                        "chunk length {} along '{}' exceeds dimension length {}; the full length is used",
                        len, d.name, d.length
                    ));
                }
            }
        }

        let chunks = plan.resolve(dims);
        let bytes = chunk_bytes(&chunks, dtype_size_bytes);

        if bytes < self.min_chunk_bytes {
            warnings.push(format!(
                "chunks too small ({:.3} MiB), high metadata overhead",
                bytes / MIB
            ));
            for (d, &c) in dims.iter().zip(&chunks) {
                if c < d.length {
                    recommend(format!(
                        "increase {} chunk length to approach the {:.1} MiB target",
                        d.name,
                        target / MIB
                    ));
                }
            }
        }
        if bytes > self.max_chunk_bytes {
            warnings.push(format!(
                "chunks too large ({:.1} MiB), may cause memory pressure",
                bytes / MIB
            ));
            for (d, &c) in dims.iter().zip(&chunks) {
                if c > 1 {
                    recommend(format!(
                        "decrease {} chunk length to approach the {:.1} MiB target",
                        d.name,
                        target / MIB
                    ));
                }
            }
        }
        for (d, &c) in dims.iter().zip(&chunks) {
            if c == 1 && d.length >= self.granular_length {
                warnings.push(format!("overly granular along {}, inefficient I/O", d.name));
                recommend(format!(
                    "increase {} chunk length to approach the {:.1} MiB target",
                    d.name,
                    target / MIB
                ));
            }
        }

        Ok(ChunkValidation {
            chunk_size_bytes: bytes,
            warnings,
            recommendations,
        })
    }
}

/// Recommend a plan with the default advisor
pub fn recommend_chunks(
    dims: &[DimensionSpec],
    dtype_size_bytes: usize,
    pattern: AccessPattern,
    target_chunk_size_bytes: Option<f64>,
) -> Result<ChunkRecommendation> {
    ChunkAdvisor::new().recommend(dims, dtype_size_bytes, pattern, target_chunk_size_bytes)
}

/// Validate a plan with the default thresholds
pub fn validate_chunks(
    plan: &ChunkPlan,
    dims: &[DimensionSpec],
    dtype_size_bytes: usize,
) -> Result<ChunkValidation> {
    ChunkValidator::new().validate(plan, dims, dtype_size_bytes)
}
