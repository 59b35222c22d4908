//! ArgMatches → CliAction conversion.
//!
//! Global `--config` is loaded first, then per-command flags override the
//! loaded values. Variable selection and attributes become
//! [`ProcessOptions`] so they replace the configured lists for the call.

use std::str::FromStr;

use clap::ArgMatches;
use gridstore_core::{
    AccessPattern, Attributes, ChunkPlan, DimensionSpec, Frequency, MissingCheckSpec, Region,
};
use gridstore_engine::{ConverterConfig, ProcessOptions};
use gridstore_storage::Compression;

/// The result of parsing the command line.
#[derive(Debug)]
pub enum CliAction {
    /// Create an archive from a dataset
    Convert {
        input: String,
        output: String,
        overwrite: bool,
        options: ProcessOptions,
    },
    /// Extend an archive along its append dimension
    Append {
        input: String,
        output: String,
        options: ProcessOptions,
    },
    /// Build a metadata-only archive from a sample
    CreateTemplate {
        input: String,
        output: String,
        overwrite: bool,
    },
    /// Write a fragment into an existing archive
    WriteRegion {
        input: String,
        output: String,
        region: Option<Region>,
        options: ProcessOptions,
    },
    /// Print a chunk recommendation
    RecommendChunks {
        dims: Vec<DimensionSpec>,
        dtype_size: usize,
    },
    /// Print a chunk plan assessment
    ValidateChunks {
        plan: ChunkPlan,
        dims: Vec<DimensionSpec>,
        dtype_size: usize,
    },
}

/// Parsed invocation: the effective configuration plus what to do with it.
#[derive(Debug)]
pub struct Invocation {
    pub config: ConverterConfig,
    pub action: CliAction,
}

/// Convert top-level matches into an [`Invocation`].
pub fn matches_to_action(matches: &ArgMatches) -> Result<Invocation, String> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => ConverterConfig::from_file(path).map_err(|e| e.to_string())?,
        None => ConverterConfig::default(),
    };

    let (name, sub) = matches
        .subcommand()
        .ok_or_else(|| "no command given".to_string())?;

    apply_overrides(&mut config, sub)?;

    let action = match name {
        "convert" => CliAction::Convert {
            input: required(sub, "input")?,
            output: required(sub, "output")?,
            overwrite: flag(sub, "overwrite"),
            options: process_options(sub)?,
        },
        "append" => CliAction::Append {
            input: required(sub, "input")?,
            output: required(sub, "output")?,
            options: process_options(sub)?,
        },
        "create-template" => CliAction::CreateTemplate {
            input: required(sub, "input")?,
            output: required(sub, "output")?,
            overwrite: flag(sub, "overwrite"),
        },
        "write-region" => CliAction::WriteRegion {
            input: required(sub, "input")?,
            output: required(sub, "output")?,
            region: opt_str(sub, "region").map(|s| parse_with::<Region>(s)).transpose()?,
            options: process_options(sub)?,
        },
        "recommend-chunks" => CliAction::RecommendChunks {
            dims: parse_dims(&required(sub, "dims")?)?,
            dtype_size: dtype_size(sub),
        },
        "validate-chunks" => CliAction::ValidateChunks {
            plan: parse_with::<ChunkPlan>(&required(sub, "chunking")?)?,
            dims: parse_dims(&required(sub, "dims")?)?,
            dtype_size: dtype_size(sub),
        },
        other => return Err(format!("unknown command '{}'", other)),
    };

    Ok(Invocation { config, action })
}

/// Apply whichever override flags the subcommand defines and the user set.
fn apply_overrides(config: &mut ConverterConfig, sub: &ArgMatches) -> Result<(), String> {
    if let Some(plan) = opt_str(sub, "chunking") {
        // validate-chunks takes the plan as its subject, not as configuration
        if sub.try_get_one::<String>("input").is_ok() {
            config.chunking = parse_with(plan)?;
        }
    }
    if let Some(method) = opt_str(sub, "compression") {
        config.compression.method = parse_with::<Compression>(method)?;
    }
    if flag(sub, "packing") {
        config.packing.enabled = true;
    }
    if let Ok(Some(bits)) = sub.try_get_one::<u8>("packing-bits") {
        config.packing.bits = *bits;
    }
    if let Some(dim) = opt_str(sub, "time-dim") {
        config.time.dim = dim.clone();
    }
    if let Some(dim) = opt_str(sub, "append-dim") {
        config.time.append_dim = dim.clone();
    }
    if let Some(mb) = opt_str(sub, "target-chunk-size-mb") {
        let mb = mb
            .parse::<f64>()
            .map_err(|_| format!("invalid --target-chunk-size-mb '{}'", mb))?;
        config.target_chunk_size_mb = Some(mb);
    }
    if let Some(pattern) = opt_str(sub, "access-pattern") {
        config.access_pattern = parse_with::<AccessPattern>(pattern)?;
    }
    if let Ok(Some(n)) = sub.try_get_one::<u32>("retries-on-missing") {
        config.missing_data.retries_on_missing = *n;
    }
    if let Some(spec) = opt_str(sub, "missing-check-vars") {
        config.missing_data.missing_check_vars = parse_with::<MissingCheckSpec>(spec)?;
    }
    if let Some(start) = opt_str(sub, "global-start") {
        config.time.global_start = Some(start.clone());
    }
    if let Some(end) = opt_str(sub, "global-end") {
        config.time.global_end = Some(end.clone());
    }
    if let Some(freq) = opt_str(sub, "freq") {
        config.time.freq = Some(parse_with::<Frequency>(freq)?);
    }
    Ok(())
}

fn process_options(sub: &ArgMatches) -> Result<ProcessOptions, String> {
    let mut options = ProcessOptions::new();
    if let Some(names) = opt_list(sub, "variables") {
        options = options.variables(names);
    }
    if let Some(names) = opt_list(sub, "drop-variables") {
        options = options.drop_variables(names);
    }
    if let Some(raw) = opt_str(sub, "attrs") {
        options = options.attrs(parse_attrs(raw)?);
    }
    Ok(options)
}

/// Parse `--attrs` as a JSON object.
pub fn parse_attrs(raw: &str) -> Result<Attributes, String> {
    serde_json::from_str::<Attributes>(raw)
        .map_err(|e| format!("--attrs must be a JSON object: {}", e))
}

/// Parse `name:len,name:len` into dimension specs, keeping order.
pub fn parse_dims(raw: &str) -> Result<Vec<DimensionSpec>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (name, len) = part
                .split_once(':')
                .ok_or_else(|| format!("expected name:length, got '{}'", part))?;
            let len = len
                .trim()
                .parse::<usize>()
                .map_err(|_| format!("invalid length for dimension '{}': '{}'", name.trim(), len))?;
            Ok(DimensionSpec::new(name.trim(), len))
        })
        .collect()
}

fn parse_with<T>(raw: &str) -> Result<T, String>
where
    T: FromStr<Err = gridstore_core::Error>,
{
    T::from_str(raw).map_err(|e| e.to_string())
}

// Lookups tolerate ids the subcommand does not define.

fn opt_str<'a>(sub: &'a ArgMatches, id: &str) -> Option<&'a String> {
    sub.try_get_one::<String>(id).ok().flatten()
}

fn opt_list(sub: &ArgMatches, id: &str) -> Option<Vec<String>> {
    sub.try_get_many::<String>(id)
        .ok()
        .flatten()
        .map(|values| values.cloned().collect())
}

fn flag(sub: &ArgMatches, id: &str) -> bool {
    sub.try_get_one::<bool>(id).ok().flatten().copied().unwrap_or(false)
}

fn required(sub: &ArgMatches, id: &str) -> Result<String, String> {
    opt_str(sub, id)
        .cloned()
        .ok_or_else(|| format!("missing required argument '{}'", id))
}

fn dtype_size(sub: &ArgMatches) -> usize {
    sub.try_get_one::<usize>("dtype-size")
        .ok()
        .flatten()
        .copied()
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::build_cli;

    fn parse(args: &[&str]) -> Result<Invocation, String> {
        let matches = build_cli()
            .try_get_matches_from(args)
            .map_err(|e| e.to_string())?;
        matches_to_action(&matches)
    }

    #[test]
    fn test_convert_overrides_config() {
        let inv = parse(&[
            "gridstore",
            "convert",
            "in.json",
            "out",
            "--chunking",
            "time:10,lat:5",
            "--compression",
            "none",
            "--retries-on-missing",
            "2",
            "--variables",
            "hs,tp",
            "--overwrite",
        ])
        .unwrap();
        assert_eq!(inv.config.chunking.get("time"), Some(10));
        assert_eq!(inv.config.chunking.get("lat"), Some(5));
        assert_eq!(inv.config.compression.method, Compression::None);
        assert_eq!(inv.config.missing_data.retries_on_missing, 2);
        match inv.action {
            CliAction::Convert { overwrite, options, .. } => {
                assert!(overwrite);
                assert_eq!(options.variables, Some(vec!["hs".to_string(), "tp".to_string()]));
                assert_eq!(options.drop_variables, None);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_validate_chunks_keeps_plan_out_of_config() {
        let inv = parse(&[
            "gridstore",
            "validate-chunks",
            "--chunking",
            "time:10",
            "--dims",
            "time:100,lat:20",
        ])
        .unwrap();
        assert!(inv.config.chunking.is_empty());
        match inv.action {
            CliAction::ValidateChunks { plan, dims, dtype_size } => {
                assert_eq!(plan.get("time"), Some(10));
                assert_eq!(dims, vec![DimensionSpec::new("time", 100), DimensionSpec::new("lat", 20)]);
                assert_eq!(dtype_size, 4);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_write_region_with_explicit_region() {
        let inv = parse(&["gridstore", "write-region", "part.json", "out", "--region", "time=5:10"]).unwrap();
        match inv.action {
            CliAction::WriteRegion { region, .. } => {
                assert_eq!(region.unwrap().get("time"), Some(5..10));
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_template_extent_flags() {
        let inv = parse(&[
            "gridstore",
            "create-template",
            "sample.json",
            "out",
            "--global-start",
            "2000-01-01",
            "--global-end",
            "2000-01-10",
            "--freq",
            "1D",
        ])
        .unwrap();
        assert_eq!(inv.config.time.global_start.as_deref(), Some("2000-01-01"));
        assert_eq!(inv.config.time.global_end.as_deref(), Some("2000-01-10"));
        assert_eq!(inv.config.time.freq.map(|f| f.seconds()), Some(86_400));
    }

    #[test]
    fn test_attrs_must_be_object() {
        assert!(parse_attrs(r#"{"title": "waves"}"#).is_ok());
        assert!(parse_attrs("[1, 2]").is_err());
        assert!(parse(&["gridstore", "convert", "a", "b", "--attrs", "nope"]).is_err());
    }

    #[test]
    fn test_parse_dims_errors() {
        assert!(parse_dims("time").is_err());
        assert!(parse_dims("time:x").is_err());
        assert_eq!(parse_dims("time:3, lat:4").unwrap().len(), 2);
    }
}
