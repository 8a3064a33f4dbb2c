//! pipemux CLI: chain N copies of a filter between an input and an output.

use std::ffi::OsString;
use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use pipemux::config::DEFAULT_CHUNK_SIZE;
use pipemux::observability::init_metrics;
use pipemux::prelude::*;

#[derive(Parser, Debug)]
#[command(version, about)]
struct CliArgs {
    /// Filter program every stage runs
    program: OsString,

    /// Number of stages to chain (0 copies input straight to output)
    stages: usize,

    /// Arguments passed to every stage
    #[arg(last = true)]
    args: Vec<OsString>,

    /// Read input from a file instead of standard input
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Write output to a file instead of standard output
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Link buffer size in bytes
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Readiness timeout in milliseconds
    #[arg(long, default_value_t = 10)]
    timeout_ms: u64,

    /// Integrity checking: off, settled or strict
    #[arg(long, default_value_t = VerifyMode::Settled)]
    verify: VerifyMode,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl CliArgs {
    fn pipeline_config(&self) -> PipelineConfig {
        let filter = FilterCommand::new(&self.program).args(&self.args);
        PipelineConfig::new(filter, self.stages)
            .with_chunk_size(self.chunk_size)
            .with_poll_timeout(Duration::from_millis(self.timeout_ms))
            .with_verify(self.verify)
    }

    fn input(&self) -> std::io::Result<EndpointFd> {
        match &self.input {
            Some(path) => Ok(File::open(path)?.into()),
            None => Ok(EndpointFd::stdin()),
        }
    }

    fn output(&self) -> std::io::Result<EndpointFd> {
        match &self.output {
            Some(path) => Ok(File::create(path)?.into()),
            None => Ok(EndpointFd::stdout()),
        }
    }
}

/// Logs go to stderr; stdout carries pipeline data.
fn init_tracing(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();
}

fn main() -> ExitCode {
    let args = CliArgs::parse();
    init_tracing(&args.log_level);
    init_metrics();

    let config = args.pipeline_config();
    info!("Running {} stage(s) of `{}`", config.stages, config.filter);

    let input = match args.input() {
        Ok(input) => input,
        Err(e) => {
            error!("Failed to open input: {e}");
            return ExitCode::FAILURE;
        }
    };
    let output = match args.output() {
        Ok(output) => output,
        Err(e) => {
            error!("Failed to open output: {e}");
            return ExitCode::FAILURE;
        }
    };

    let report = match run_pipeline(&config, input, output) {
        Ok(report) => report,
        Err(e) => {
            error!("Pipeline failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        "Moved {} bytes in {:.3}s",
        report.bytes_out,
        report.elapsed.as_secs_f64()
    );

    match report.failed_stage() {
        Some(exit) => {
            warn!("{exit}");
            ExitCode::FAILURE
        }
        None => ExitCode::SUCCESS,
    }
}
