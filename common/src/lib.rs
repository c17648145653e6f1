//! Common library for the `rmirror` directory replication daemon
//!
//! Every cycle mirrors a source tree into a destination tree in four steps:
//! 1. [`snapshot`] walks the source, hashing files and making sure each source directory has a
//!    destination counterpart (resolving naming conflicts on the way)
//! 2. [`index`] records every destination file by content hash
//! 3. [`resolve`] places each source file: content already present anywhere in the destination
//!    is moved into place, everything else is copied; occupants of a needed path are renamed,
//!    never overwritten
//! 4. [`cleanup`] removes whatever the destination still holds without a source counterpart
//!
//! [`scheduler`] repeats cycles on a fixed period, with cycle starts aligned to multiples of the
//! period.
//!
//! # Logging
//!
//! Console output goes to stderr at a level picked by [`OutputConfig::verbose`] (ERROR, INFO,
//! DEBUG, TRACE), overridden by `RUST_LOG` when set. An optional log file always receives DEBUG
//! output.

pub mod cleanup;
pub mod config;
pub mod cycle;
pub mod entry;
pub mod index;
pub mod naming;
pub mod preserve;
pub mod resolve;
pub mod scheduler;
pub mod snapshot;
pub mod summary;
pub mod testutils;

pub use config::{OutputConfig, RuntimeConfig, SyncSettings, TracingConfig, Validated};
pub use cycle::sync_cycle;
pub use scheduler::run_scheduler;
pub use summary::Summary;

fn console_filter(output: &OutputConfig) -> tracing_subscriber::EnvFilter {
    if let Ok(filter) = tracing_subscriber::EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = match output.verbose {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::EnvFilter::new(level)
}

fn init_tracing(output: &OutputConfig, tracing: &TracingConfig) -> anyhow::Result<()> {
    use anyhow::Context;
    use tracing_subscriber::prelude::*;
    let console_layer = if output.quiet {
        None
    } else {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter(output)),
        )
    };
    let file_layer = match &tracing.log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("cannot create log file {:?}", &path))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file))
                    .with_filter(tracing_subscriber::filter::LevelFilter::DEBUG),
            )
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("failed to initialize logging")
}

/// Sets up logging and the tokio runtime, then runs `func` to completion.
///
/// Returns `None` if setup failed or `func` returned an error (both already reported), the
/// summary produced by `func` otherwise. With [`OutputConfig::print_summary`] the summary is
/// also printed to stdout.
pub fn run<Fut, Summary, Error>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    tracing: TracingConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Summary: std::fmt::Display,
    Error: std::fmt::Display,
    Fut: std::future::Future<Output = Result<Summary, Error>>,
{
    if let Err(error) = init_tracing(&output, &tracing) {
        if !output.quiet {
            eprintln!("{error:#}");
        }
        return None;
    }
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let runtime = match builder.build() {
        Ok(runtime) => runtime,
        Err(error) => {
            ::tracing::error!("failed to start tokio runtime: {}", &error);
            return None;
        }
    };
    match runtime.block_on(func()) {
        Ok(summary) => {
            if output.print_summary {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            ::tracing::error!("{}", &error);
            None
        }
    }
}
