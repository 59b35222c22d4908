//! Clap command tree.

use clap::{Arg, ArgAction, Command};

/// Build the `gridstore` command.
pub fn build_cli() -> Command {
    Command::new("gridstore")
        .about("Chunked archives for gridded datasets")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .global(true)
                .help("Raise log verbosity (-v info, -vv debug, -vvv trace)"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("JSON or TOML configuration file"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Print results as JSON"),
        )
        .subcommand(
            with_write_args(Command::new("convert").about("Create an archive from a dataset"))
                .arg(input_arg())
                .arg(output_arg())
                .arg(overwrite_arg()),
        )
        .subcommand(
            with_write_args(Command::new("append").about("Append a dataset past the end of an archive"))
                .arg(input_arg())
                .arg(output_arg()),
        )
        .subcommand(
            with_write_args(
                Command::new("create-template").about("Create a metadata-only archive spanning the full time range"),
            )
            .arg(input_arg().help("Sample dataset (JSON document or archive)"))
            .arg(output_arg())
            .arg(overwrite_arg())
            .arg(Arg::new("global-start").long("global-start").value_name("TIME"))
            .arg(Arg::new("global-end").long("global-end").value_name("TIME"))
            .arg(
                Arg::new("freq")
                    .long("freq")
                    .value_name("FREQ")
                    .help("Axis step such as 1D, 6H or 30min"),
            ),
        )
        .subcommand(
            with_write_args(Command::new("write-region").about("Write a dataset into a region of an archive"))
                .arg(input_arg())
                .arg(output_arg())
                .arg(
                    Arg::new("region")
                        .long("region")
                        .value_name("REGION")
                        .help("Target region such as time=0:10; located from the input when omitted"),
                ),
        )
        .subcommand(
            with_planning_args(Command::new("recommend-chunks").about("Recommend chunk lengths"))
                .arg(
                    Arg::new("access-pattern")
                        .long("access-pattern")
                        .value_name("PATTERN")
                        .help("temporal, spatial or balanced"),
                )
                .arg(
                    Arg::new("target-chunk-size-mb")
                        .long("target-chunk-size-mb")
                        .value_name("MB"),
                ),
        )
        .subcommand(
            with_planning_args(Command::new("validate-chunks").about("Check a chunk plan"))
                .arg(
                    Arg::new("chunking")
                        .long("chunking")
                        .value_name("PLAN")
                        .required(true)
                        .help("Chunk lengths such as time:100,lat:50"),
                ),
        )
}

fn input_arg() -> Arg {
    Arg::new("input").required(true).value_name("INPUT").help("Input dataset (JSON document or archive)")
}

fn output_arg() -> Arg {
    Arg::new("output").required(true).value_name("ARCHIVE").help("Archive directory")
}

fn overwrite_arg() -> Arg {
    Arg::new("overwrite")
        .long("overwrite")
        .action(ArgAction::SetTrue)
        .help("Replace an existing archive")
}

fn with_planning_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("dims")
            .long("dims")
            .value_name("DIMS")
            .required(true)
            .help("Dimension lengths such as time:1000,lat:500,lon:1000"),
    )
    .arg(
        Arg::new("dtype-size")
            .long("dtype-size")
            .value_name("BYTES")
            .default_value("4")
            .value_parser(clap::value_parser!(usize)),
    )
}

fn with_write_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("chunking")
            .long("chunking")
            .value_name("PLAN")
            .help("Chunk lengths such as time:100,lat:50"),
    )
    .arg(
        Arg::new("compression")
            .long("compression")
            .value_name("METHOD")
            .help("none, zstd or zstd:<level>"),
    )
    .arg(
        Arg::new("packing")
            .long("packing")
            .action(ArgAction::SetTrue)
            .help("Pack variables with valid_min/valid_max into integers"),
    )
    .arg(
        Arg::new("packing-bits")
            .long("packing-bits")
            .value_name("BITS")
            .value_parser(clap::value_parser!(u8)),
    )
    .arg(
        Arg::new("variables")
            .long("variables")
            .value_name("NAMES")
            .value_delimiter(',')
            .help("Only these variables"),
    )
    .arg(
        Arg::new("drop-variables")
            .long("drop-variables")
            .value_name("NAMES")
            .value_delimiter(',')
            .help("Skip these variables"),
    )
    .arg(
        Arg::new("attrs")
            .long("attrs")
            .value_name("JSON")
            .help("Global attributes as a JSON object"),
    )
    .arg(Arg::new("time-dim").long("time-dim").value_name("DIM"))
    .arg(Arg::new("append-dim").long("append-dim").value_name("DIM"))
    .arg(
        Arg::new("target-chunk-size-mb")
            .long("target-chunk-size-mb")
            .value_name("MB"),
    )
    .arg(
        Arg::new("access-pattern")
            .long("access-pattern")
            .value_name("PATTERN"),
    )
    .arg(
        Arg::new("retries-on-missing")
            .long("retries-on-missing")
            .value_name("N")
            .value_parser(clap::value_parser!(u32)),
    )
    .arg(
        Arg::new("missing-check-vars")
            .long("missing-check-vars")
            .value_name("VARS")
            .help("all, none, or a comma-separated list"),
    )
}
