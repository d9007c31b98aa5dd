//! sovd2uds - run SOVD operations against ECUs from the command line
//!
//! Loads a bridge configuration, builds a translation engine and executes
//! one operation. Without `--config` a built-in demo configuration with
//! two simulated ECUs is used.

mod commands;
mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sovd2uds::config::{LogFormat, LoggingConfig};
use sovd2uds::{BridgeConfig, TranslationEngine};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::output::{OutputContext, OutputFormat};

const DEMO_CONFIG: &str = include_str!("../../../config/bridge.toml");

#[derive(Parser)]
#[command(name = "sovd2uds")]
#[command(author, version, about = "SOVD to UDS diagnostics bridge")]
#[command(propagate_version = true)]
struct Cli {
    /// Bridge configuration file (TOML)
    #[arg(short, long, env = "SOVD2UDS_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List components, or the catalog of one component
    List {
        /// ECU component ID
        ecu: Option<String>,
    },

    /// Read data item(s)
    Read {
        /// ECU component ID
        ecu: String,

        /// Data item name(s)
        #[arg(required = true)]
        params: Vec<String>,
    },

    /// Write a data item
    Write {
        /// ECU component ID
        ecu: String,

        /// Data item name
        param: String,

        /// Value to write (JSON, hex string or plain text)
        value: String,
    },

    /// Read DTC information
    Dtc {
        /// ECU component ID
        ecu: String,

        /// Report: all, count, snapshot, extended
        #[arg(default_value = "all")]
        report: String,

        /// Status mask (all, count)
        #[arg(long, value_parser = parse_byte)]
        mask: Option<u8>,

        /// DTC code such as P0101 (snapshot, extended)
        #[arg(long)]
        dtc: Option<String>,

        /// Record number (snapshot, extended)
        #[arg(long, value_parser = parse_byte)]
        record: Option<u8>,
    },

    /// Clear DTCs
    Clear {
        /// ECU component ID
        ecu: String,

        /// 3-byte DTC group, e.g. 0xFFFFFF
        #[arg(long)]
        group: Option<String>,

        /// Only clear when these codes are stored (repeatable)
        #[arg(long = "dtc")]
        dtcs: Vec<String>,
    },

    /// Control an actuator
    Actuate {
        /// ECU component ID
        ecu: String,

        /// Actuator name
        actuator: String,

        /// Action: short_term_adjustment, return_control, reset_to_default, freeze
        #[arg(long)]
        action: Option<String>,

        /// Value for short_term_adjustment
        value: Option<String>,
    },

    /// Execute a routine
    Routine {
        /// ECU component ID
        ecu: String,

        /// Routine name
        routine: String,

        /// Action: start, stop, results
        #[arg(long, default_value = "start")]
        action: String,

        /// Routine option record as hex
        #[arg(long)]
        data: Option<String>,
    },

    /// Change diagnostic session
    Session {
        /// ECU component ID
        ecu: String,

        /// Session type: default, programming, extended, safety
        #[arg(value_name = "TYPE")]
        session_type: String,
    },

    /// Security access (unlock ECU)
    Unlock {
        /// ECU component ID
        ecu: String,

        /// Security level
        #[arg(long, default_value = "1")]
        level: u8,
    },

    /// Reset an ECU
    Reset {
        /// ECU component ID
        ecu: String,

        /// Reset type: hard, key_off_on, soft
        #[arg(value_name = "TYPE", default_value = "hard")]
        reset_type: String,
    },

    /// Run a raw request given as JSON and print the response envelope
    Exec {
        /// Request JSON
        request: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => BridgeConfig::from_toml_str(DEMO_CONFIG).context("Invalid demo config")?,
    };
    init_logging(&config.logging, cli.verbose);

    let ctx = OutputContext::new(cli.output, cli.no_color, cli.quiet);
    let targets = config.targets.len();
    let engine = TranslationEngine::builder(config)
        .build()
        .context("Failed to build translation engine")?;
    info!(targets, "Translation engine ready");

    let result = dispatch(&engine, &cli.command, &ctx).await;
    engine.shutdown().await;

    match result {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            ctx.error(&format!("Error: {e:#}"));
            std::process::exit(1);
        }
    }
}

/// Run the selected command; `Ok(false)` reports a failed exec envelope
async fn dispatch(engine: &TranslationEngine, command: &Commands, ctx: &OutputContext) -> Result<bool> {
    match command {
        Commands::List { ecu } => commands::list(engine, ecu.as_deref(), ctx).await?,

        Commands::Read { ecu, params } => commands::read(engine, ecu, params, ctx).await?,

        Commands::Write { ecu, param, value } => {
            commands::write(engine, ecu, param, value, ctx).await?
        }

        Commands::Dtc {
            ecu,
            report,
            mask,
            dtc,
            record,
        } => commands::dtc(engine, ecu, report, *mask, dtc.as_deref(), *record, ctx).await?,

        Commands::Clear { ecu, group, dtcs } => {
            commands::clear(engine, ecu, group.as_deref(), dtcs, ctx).await?
        }

        Commands::Actuate {
            ecu,
            actuator,
            action,
            value,
        } => {
            commands::actuate(engine, ecu, actuator, action.as_deref(), value.as_deref(), ctx)
                .await?
        }

        Commands::Routine {
            ecu,
            routine,
            action,
            data,
        } => commands::routine(engine, ecu, routine, action, data.as_deref(), ctx).await?,

        Commands::Session { ecu, session_type } => {
            commands::session(engine, ecu, session_type, ctx).await?
        }

        Commands::Unlock { ecu, level } => commands::unlock(engine, ecu, *level, ctx).await?,

        Commands::Reset { ecu, reset_type } => {
            commands::reset(engine, ecu, reset_type, ctx).await?
        }

        Commands::Exec { request } => return commands::exec(engine, request, ctx).await,
    }
    Ok(true)
}

/// `RUST_LOG` wins over the configured level; logs go to stderr so JSON
/// output on stdout stays parseable
fn init_logging(config: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sovd2uds={level}")));

    let (pretty, json) = match config.format {
        LogFormat::Pretty => (
            Some(fmt::layer().with_target(false).with_writer(std::io::stderr)),
            None,
        ),
        LogFormat::Json => (None, Some(fmt::layer().json().with_writer(std::io::stderr))),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json)
        .init();
}

/// Accept `0x2F` or `47`
fn parse_byte(s: &str) -> Result<u8, String> {
    sovd2uds::config::parse_number(s)
        .and_then(|n| u8::try_from(n).ok())
        .ok_or_else(|| format!("'{s}' is not a byte value"))
}
