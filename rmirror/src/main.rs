use anyhow::Result;
use clap::Parser;
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rmirror",
    version,
    about = "Keep a destination directory an exact mirror of a source directory",
    long_about = "`rmirror` periodically replicates a source directory tree into a destination directory.

Every cycle the destination is made to match the source: files whose content already exists
anywhere in the destination are moved into place instead of being copied again, missing files
are copied, and anything without a source counterpart is removed. Entries standing in the way of
a synced item are renamed with a time based suffix, never overwritten.

EXAMPLE:
    # Mirror /data into /backup/data every 5 minutes, logging to a file
    rmirror /data /backup/data --period 300 --log-file /var/log/rmirror.log

Note: The destination is fully owned by rmirror - anything in it that is not in the source
will be deleted."
)]
struct Args {
    // Sync options
    /// Seconds between the starts of consecutive sync cycles
    #[arg(long, value_name = "SECONDS", value_parser = clap::value_parser!(u64).range(1..), help_heading = "Sync options")]
    period: u64,

    /// Stop after N sync cycles, run until terminated if not specified
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..), help_heading = "Sync options")]
    cycles: Option<u64>,

    /// Block size used when hashing file contents
    ///
    /// This option accepts a human readable size, e.g. "64KiB", "1MiB" etc.
    #[arg(
        long,
        default_value = "64KiB",
        value_name = "SIZE",
        help_heading = "Sync options"
    )]
    chunk_size: bytesize::ByteSize,

    // Progress & output
    /// Log file, receives DEBUG level output regardless of -v; truncated on start
    ///
    /// Must not be located inside the source or destination directories.
    #[arg(long, value_name = "PATH", help_heading = "Progress & output")]
    log_file: Option<std::path::PathBuf>,

    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Log a summary after every cycle and print the combined summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,

    // ARGUMENTS
    /// Directory to replicate
    #[arg()]
    source: std::path::PathBuf,

    /// Directory to keep as a mirror of the source, created if missing
    #[arg()]
    destination: std::path::PathBuf,
}

#[instrument(skip(validated))]
async fn async_main(args: Args, validated: common::Validated) -> Result<common::Summary> {
    let settings = validated.settings;
    if validated.destination_created {
        tracing::info!(
            "destination {:?} did not exist and was created",
            &settings.destination
        );
    }
    tracing::info!(
        "replicating {:?} -> {:?} every {}",
        &settings.source,
        &settings.destination,
        humantime::format_duration(settings.period)
    );
    if let Some(log_file) = &args.log_file {
        tracing::info!("logging to {:?}", &log_file);
    }
    Ok(common::run_scheduler(&settings, args.cycles, args.summary).await)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let chunk_size = usize::try_from(args.chunk_size.as_u64())?;
    let validated = match common::SyncSettings::validate(
        &args.source,
        &args.destination,
        std::time::Duration::from_secs(args.period),
        chunk_size,
        args.log_file.as_deref(),
    ) {
        Ok(validated) => validated,
        Err(error) => {
            if !args.quiet {
                eprintln!("rmirror: {error:#}");
            }
            std::process::exit(1);
        }
    };
    let func = {
        let args = args.clone();
        || async_main(args, validated)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let tracing = common::TracingConfig {
        log_file: args.log_file.clone(),
    };
    let res = common::run(output, runtime, tracing, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
