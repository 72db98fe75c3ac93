//! wod-convert
//!
//! Converts World Ocean Database cast files between the binary container,
//! the legacy text variant, document JSON and CSV.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use wod_common::WodError;
use wod_convert::{
    decode_to_json, encode_file, inspect_file, load_engine_config, tabulate, write_output,
    EngineFlags, InputFormat,
};

#[derive(Parser, Debug)]
#[command(name = "wod-convert")]
#[command(about = "Convert World Ocean Database cast files")]
struct Cli {
    /// Engine configuration YAML
    #[arg(short, long, global = true, env = "WOD_CONFIG")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Keep masked observation samples as null instead of imputing
    #[arg(long, global = true)]
    no_impute: bool,

    /// Keep missing text-variant measurements as null
    #[arg(long, global = true)]
    no_impute_text: bool,

    /// Fail when later casts disagree with the first cast's field types
    #[arg(long, global = true)]
    strict_schema: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode a binary or text cast file to document JSON
    Decode {
        input: PathBuf,

        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Input format (default: from the extension)
        #[arg(short, long, value_enum)]
        format: Option<InputFormat>,
    },

    /// Encode interchange JSON to a binary cast file
    Encode {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Flatten any supported input to CSV
    Tabulate {
        input: PathBuf,

        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(short, long, value_enum)]
        format: Option<InputFormat>,
    },

    /// Print the dimensions, variables and subtype of a binary cast file
    Inspect { input: PathBuf },
}

fn main() {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    if let Err(err) = run(cli) {
        error!("Conversion failed: {:#}", err);
        eprintln!("Error: {:#}", err);
        let code = err
            .downcast_ref::<WodError>()
            .map(WodError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // Logs go to stderr so converted output can be piped from stdout
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(cli: Cli) -> Result<()> {
    let flags = EngineFlags {
        no_impute: cli.no_impute,
        no_impute_text: cli.no_impute_text,
        strict_schema: cli.strict_schema,
    };
    let config = load_engine_config(cli.config.as_deref(), &flags)?;

    match cli.command {
        Commands::Decode {
            input,
            output,
            format,
        } => {
            let format = InputFormat::resolve(&input, format)?;
            let json = decode_to_json(&input, format, &config)?;
            write_output(output.as_deref(), json.as_bytes())?;
        }
        Commands::Encode { input, output } => {
            let summary = encode_file(&input, &output, &config)?;
            info!(
                casts = summary.casts,
                bytes = summary.bytes,
                warnings = summary.warnings.len(),
                output = ?output,
                "Wrote binary cast file"
            );
        }
        Commands::Tabulate {
            input,
            output,
            format,
        } => {
            let format = InputFormat::resolve(&input, format)?;
            let mut csv = Vec::new();
            let rows = tabulate(&input, format, &config, &mut csv)?;
            write_output(output.as_deref(), &csv)?;
            info!(rows, "Wrote table");
        }
        Commands::Inspect { input } => {
            let inspection = inspect_file(&input)?;
            let json =
                serde_json::to_string_pretty(&inspection).context("Failed to render inspection")?;
            println!("{}", json);
        }
    }

    Ok(())
}
