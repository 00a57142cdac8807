mod scenario;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use voicegraph_core::{AppConfig, SampleDecoder, WavDecoder};

use crate::scenario::{Runner, Scenario};

fn main() -> voicegraph_core::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    init_tracing(config.log_filter.as_deref());

    match cli.command {
        Commands::Simulate { scenario } => run_simulate(&scenario, config),
        Commands::Inspect { input } => run_inspect(&input),
    }
}

fn run_simulate(path: &Path, config: AppConfig) -> voicegraph_core::Result<()> {
    tracing::info!(?path, "running scenario");

    let scenario = Scenario::load(path)?;
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let report = Runner::new(config.graph, base_dir)?.run(&scenario)?;

    tracing::info!(
        steps = scenario.steps.len(),
        sources = report.graph.sources.len(),
        submixes = report.graph.submixes.len(),
        "scenario finished"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_inspect(input: &Path) -> voicegraph_core::Result<()> {
    tracing::info!(?input, "inspecting sample");
    let sample = WavDecoder::new().load(input)?;
    let summary = serde_json::json!({
        "format": sample.format,
        "bytes": sample.data.len(),
        "frames": sample.format.frames_in(sample.data.len()),
        "duration_seconds": sample.duration_seconds(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn init_tracing(fallback: Option<&str>) {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(fallback.unwrap_or("info"))),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Drive a voice graph from the command line", long_about = None)]
struct Cli {
    /// JSON configuration file with graph limits and the log filter.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a JSON scenario against the simulated backend and print the
    /// resulting graph.
    Simulate {
        /// Scenario file; sample paths inside it are relative to its folder.
        scenario: PathBuf,
    },
    /// Decode a WAV file and print its format.
    Inspect {
        /// Path to the WAV file.
        input: PathBuf,
    },
}
