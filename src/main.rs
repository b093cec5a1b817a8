//! CLI Entry Point for tempchar
//!
//! Runs one measurement sequence over the tabs of a bench configuration.
//!
//! # Usage
//!
//! ```bash
//! tempchar --config bench.toml sweep --tabs Item1,Item2
//! tempchar --config bench.toml vi --simulate
//! tempchar --config bench.toml validate delay
//! ```
//!
//! Ctrl-C cancels the running sequence. Every touched instrument is still
//! switched off and returned to local control, partial rows are written to
//! the abort file and the process exits with a non-zero status.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tempchar_daq::adapters::{MockTransport, Transport, VisaTransport};
use tempchar_daq::data::ResultRow;
use tempchar_daq::measurement::{MeasurementContext, Orchestrator, RunRequest};
use tempchar_daq::{BenchConfig, CancelToken, Fault};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tempchar")]
#[command(about = "Temperature-characteristic measurement sequencer", long_about = None)]
struct Cli {
    /// Bench configuration file
    #[arg(long, default_value = "bench.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Step a source or pulse level and read multimeters, or search trigger thresholds
    Sweep(RunArgs),

    /// Measure pulse-to-response delay with the oscilloscope
    Delay(RunArgs),

    /// Take one multimeter snapshot per tab
    Vi(RunArgs),

    /// Check the configuration for a measurement mode without touching hardware
    Validate {
        #[arg(value_enum)]
        mode: Mode,

        /// Comma-separated tab names (default: all tabs)
        #[arg(long, value_delimiter = ',')]
        tabs: Vec<String>,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Comma-separated tab names (default: all tabs)
    #[arg(long, value_delimiter = ',')]
    tabs: Vec<String>,

    /// Use a simulated bus instead of VISA
    #[arg(long)]
    simulate: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Sweep,
    Delay,
    Vi,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = BenchConfig::load_from(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.application.log_level)),
        )
        .init();
    info!(config = %cli.config.display(), name = %config.application.name, "configuration loaded");

    match cli.command {
        Commands::Sweep(args) => run(&config, Mode::Sweep, args).await,
        Commands::Delay(args) => run(&config, Mode::Delay, args).await,
        Commands::Vi(args) => run(&config, Mode::Vi, args).await,
        Commands::Validate { mode, tabs } => validate(&config, mode, tabs),
    }
}

fn request(config: &BenchConfig, tabs: Vec<String>) -> Result<RunRequest> {
    let mut request = RunRequest::new(config.instruments.clone(), config.tab_configs()?)
        .with_debug(config.debug);
    if !tabs.is_empty() {
        request = request.with_selected(tabs);
    }
    Ok(request)
}

async fn run(config: &BenchConfig, mode: Mode, args: RunArgs) -> Result<()> {
    let transport: Arc<dyn Transport> = if args.simulate {
        info!("using simulated bus");
        Arc::new(MockTransport::simulated())
    } else {
        Arc::new(VisaTransport::new())
    };
    let ctx = MeasurementContext::with_csv(config, transport);
    let request = request(config, args.tabs)?;

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling measurement");
            on_signal.cancel();
        }
    });

    let result = match mode {
        Mode::Sweep => Orchestrator::sweep(ctx).run(request, &cancel).await,
        Mode::Delay => Orchestrator::delay(ctx).run(request, &cancel).await,
        Mode::Vi => Orchestrator::vi(ctx).run(request, &cancel).await,
    };

    match result {
        Ok(rows) => {
            print_rows(&rows);
            Ok(())
        }
        Err(Fault::Cancelled) => bail!("measurement cancelled"),
        Err(fault) => bail!("measurement failed: {}", fault),
    }
}

fn validate(config: &BenchConfig, mode: Mode, tabs: Vec<String>) -> Result<()> {
    let ctx = MeasurementContext::from_config(
        config,
        Arc::new(MockTransport::simulated()),
        Arc::new(tempchar_daq::data::MemorySink::new()),
    );
    let request = request(config, tabs)?;
    let (messages, ok) = match mode {
        Mode::Sweep => Orchestrator::sweep(ctx).validate(&request),
        Mode::Delay => Orchestrator::delay(ctx).validate(&request),
        Mode::Vi => Orchestrator::vi(ctx).validate(&request),
    };
    for message in &messages {
        println!("{}", message);
    }
    if !ok {
        bail!("validation failed with {} problem(s)", messages.len());
    }
    println!("configuration OK");
    Ok(())
}

fn print_rows(rows: &[ResultRow]) {
    for row in rows {
        println!("{}", row);
    }
}
