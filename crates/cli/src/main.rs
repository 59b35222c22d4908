//! gridstore CLI: plan chunks, build templates and write archives.
//!
//! Every invocation runs a single command and exits:
//! - `0` on success
//! - `1` when the command fails
//! - `2` when the command line or configuration is rejected

mod commands;
mod format;
mod parse;

use std::process;

use gridstore_core::Error;
use gridstore_engine::{open_source, Converter};
use gridstore_storage::open_store;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use commands::build_cli;
use format::{
    format_error, format_recommendation, format_summary, format_template, format_validation,
    OutputMode,
};
use parse::{matches_to_action, CliAction, Invocation};

fn main() {
    let matches = build_cli().get_matches();

    init_logging(matches.get_count("verbose"));

    let output_mode = if matches.get_flag("json") {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let invocation = match matches_to_action(&matches) {
        Ok(inv) => inv,
        Err(e) => {
            eprintln!("(error) {}", e);
            process::exit(2);
        }
    };

    let converter = match Converter::new(invocation.config.clone()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", format_error(&e, output_mode));
            process::exit(2);
        }
    };

    match execute(&converter, invocation, output_mode) {
        Ok(text) => {
            println!("{}", text);
        }
        Err(e) => {
            eprintln!("{}", format_error(&e, output_mode));
            process::exit(1);
        }
    }
}

/// `RUST_LOG` wins; otherwise `-v` picks the level. Logs go to stderr.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
        .init();
}

fn execute(converter: &Converter, invocation: Invocation, mode: OutputMode) -> Result<String, Error> {
    debug!(action = ?invocation.action, "dispatching");
    match invocation.action {
        CliAction::Convert {
            input,
            output,
            overwrite,
            options,
        } => {
            let summary = converter.convert(open_source(&input).as_ref(), open_store(&output)?, overwrite, &options)?;
            Ok(format_summary("convert", &output, &summary, mode))
        }
        CliAction::Append { input, output, options } => {
            let summary = converter.append(open_source(&input).as_ref(), open_store(&output)?, &options)?;
            Ok(format_summary("append", &output, &summary, mode))
        }
        CliAction::CreateTemplate {
            input,
            output,
            overwrite,
        } => {
            let archive = converter.create_template(open_source(&input).as_ref(), open_store(&output)?, overwrite)?;
            Ok(format_template(&output, archive.variable_names(), mode))
        }
        CliAction::WriteRegion {
            input,
            output,
            region,
            options,
        } => {
            let summary = converter.write_region(open_source(&input).as_ref(), open_store(&output)?, region, &options)?;
            Ok(format_summary("write-region", &output, &summary, mode))
        }
        CliAction::RecommendChunks { dims, dtype_size } => {
            let rec = converter.recommend_chunks(&dims, dtype_size)?;
            Ok(format_recommendation(&rec, mode))
        }
        CliAction::ValidateChunks { plan, dims, dtype_size } => {
            let validation = converter.validate_chunks(&plan, &dims, dtype_size)?;
            Ok(format_validation(&validation, mode))
        }
    }
}
