//! Dataset preparation before a write
//!
//! [`process`] applies, in order: variable selection, variable exclusion,
//! duplicate-timestamp removal along the sequence dimension, and global
//! attributes. Arguments passed with a call replace the configured values
//! for that call.

use crate::config::ConverterConfig;
use chrono::NaiveDateTime;
use gridstore_core::{Attributes, Dataset, Error, MemDataset, Result};
use std::collections::HashSet;
use tracing::{debug, info};

/// Per-call overrides for [`process`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOptions {
    /// Keep only these variables, replacing `variables.include`
    pub variables: Option<Vec<String>>,
    /// Drop these variables, replacing `variables.exclude`
    pub drop_variables: Option<Vec<String>>,
    /// Global attributes, replacing `attrs`
    pub attrs: Option<Attributes>,
}

impl ProcessOptions {
    /// No overrides
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only `names`, builder style
    pub fn variables(mut self, names: Vec<String>) -> Self {
        self.variables = Some(names);
        self
    }

    /// Drop `names`, builder style
    pub fn drop_variables(mut self, names: Vec<String>) -> Self {
        self.drop_variables = Some(names);
        self
    }

    /// Set global attributes, builder style
    pub fn attrs(mut self, attrs: Attributes) -> Self {
        self.attrs = Some(attrs);
        self
    }
}

/// Keep `include` (all when empty), then drop `exclude`
///
/// Naming a variable in `include` that the dataset lacks is a
/// [`Error::StructuralMismatch`]; unknown names in `exclude` are ignored.
pub fn select_variables(ds: &mut MemDataset, include: &[String], exclude: &[String]) -> Result<()> {
    if !include.is_empty() {
        if let Some(missing) = include.iter().find(|name| ds.variable(name).is_none()) {
            return Err(Error::StructuralMismatch(format!(
                "selected variable '{}' is not in the dataset",
                missing
            )));
        }
        ds.retain_variables(|name| include.iter().any(|i| i == name));
    }
    if !exclude.is_empty() {
        ds.retain_variables(|name| !exclude.iter().any(|e| e == name));
    }
    Ok(())
}

/// Drop repeated timestamps along `dim`, keeping first occurrences
///
/// Returns the number of entries removed. Datasets without a time
/// coordinate named `dim` are left alone.
pub fn remove_duplicates(ds: &mut MemDataset, dim: &str) -> Result<usize> {
    let Some(times) = ds.coordinate(dim).and_then(|c| c.as_time()) else {
        return Ok(0);
    };
    let mut seen = HashSet::with_capacity(times.len());
    let keep: Vec<usize> = times
        .iter()
        .enumerate()
        .filter(|(_, t)| seen.insert(**t))
        .map(|(i, _)| i)
        .collect();
    let removed = times.len() - keep.len();
    if removed > 0 {
        ds.select_along(dim, &keep)?;
        info!(dim, removed, "dropped duplicate timestamps");
    }
    Ok(removed)
}

/// Merge `attrs` into the dataset's global attributes
pub fn apply_attrs(ds: &mut MemDataset, attrs: &Attributes) {
    ds.attributes_mut()
        .extend(attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
}

/// Keep only entries strictly after `last` along `dim`
///
/// Returns the number of entries left. A dataset without a time coordinate
/// on `dim` is a [`Error::StructuralMismatch`].
pub fn align_for_append(ds: &mut MemDataset, dim: &str, last: NaiveDateTime) -> Result<usize> {
    let times = ds
        .coordinate(dim)
        .and_then(|c| c.as_time())
        .ok_or_else(|| Error::StructuralMismatch(format!("dataset has no time coordinate '{}'", dim)))?;
    let keep: Vec<usize> = times
        .iter()
        .enumerate()
        .filter(|(_, t)| **t > last)
        .map(|(i, _)| i)
        .collect();
    let dropped = times.len() - keep.len();
    if dropped > 0 {
        ds.select_along(dim, &keep)?;
        info!(dim, dropped, "dropped entries already present in the archive");
    }
    Ok(keep.len())
}

/// Prepare `ds` for writing
pub fn process(mut ds: MemDataset, config: &ConverterConfig, options: &ProcessOptions) -> Result<MemDataset> {
    let include = options.variables.as_ref().unwrap_or(&config.variables.include);
    let exclude = options
        .drop_variables
        .as_ref()
        .unwrap_or(&config.variables.exclude);
    select_variables(&mut ds, include, exclude)?;
    remove_duplicates(&mut ds, &config.time.dim)?;
    apply_attrs(&mut ds, options.attrs.as_ref().unwrap_or(&config.attrs));
    debug!(variables = ?ds.variable_names(), "processed dataset");
    Ok(ds)
}
