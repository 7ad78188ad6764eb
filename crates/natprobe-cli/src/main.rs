//! natprobe CLI
//!
//! Detects the NAT type of the local network using classic STUN probes.

mod config;
mod progress;

use clap::Parser;
use console::style;
use natprobe_discovery::{NatDetector, SamplingReport};
use std::net::SocketAddrV4;
use std::path::PathBuf;

use config::Config;
use progress::{SampleProgress, format_share};

/// natprobe - NAT type detection over classic STUN
#[derive(Parser)]
#[command(name = "natprobe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of samples to take
    #[arg(short = 'n', long)]
    samples: Option<usize>,

    /// STUN server host (must support CHANGE-REQUEST)
    #[arg(short, long)]
    stun_host: Option<String>,

    /// STUN server port
    #[arg(short = 'p', long)]
    stun_port: Option<u16>,

    /// Local bind address (IPv4 ip:port)
    #[arg(short, long)]
    bind: Option<SocketAddrV4>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings; per-sample results are logged at debug level
    #[arg(short, long)]
    quiet: bool,

    /// Print the sampling report as JSON
    #[arg(long)]
    json: bool,

    /// Do not draw a progress bar
    #[arg(long)]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration; warnings raised before the configured subscriber
    // exists still reach stderr
    let bootstrap = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_writer(std::io::stderr)
        .finish();
    let config = tracing::subscriber::with_default(bootstrap, || match &cli.config {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    })?;
    config.validate()?;

    // Initialize logging
    let filter = if cli.verbose {
        "debug".to_string()
    } else if cli.quiet {
        "warn".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut options = config.detect_options()?;
    if let Some(samples) = cli.samples {
        if samples == 0 {
            anyhow::bail!("--samples must be at least 1");
        }
        options.sample_count = samples;
    }
    if let Some(host) = cli.stun_host {
        options.stun_host = host;
    }
    if let Some(port) = cli.stun_port {
        options.stun_port = port;
    }
    if let Some(bind) = cli.bind {
        options.bind_addr = bind;
    }
    options.logging_enabled = !cli.quiet;

    tracing::info!(
        "Probing {}:{} with {} samples",
        options.stun_host,
        options.stun_port,
        options.sample_count
    );

    let progress = if cli.no_progress || cli.json {
        SampleProgress::hidden()
    } else {
        SampleProgress::new(options.sample_count)
    };

    let detector = NatDetector::new(options);
    let report = match detector
        .detect_report_with_progress(|index, outcome| progress.record(index, outcome))
        .await
    {
        Ok(report) => report,
        Err(e) => {
            progress.abandon();
            return Err(e.into());
        }
    };
    progress.finish(report.nat_type);

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

/// Print the human-readable summary
fn print_report(report: &SamplingReport) {
    println!("NAT type: {}", style(report.nat_type).bold().green());

    match report.external_addr {
        Some(addr) => println!("External address: {addr}"),
        None => println!("External address: unknown"),
    }

    println!();
    println!("Samples:");
    let total = report.samples.len();
    for (nat_type, count) in report.histogram() {
        println!("  {}", format_share(nat_type, count, total));
    }

    if report.exhausted_slots > 0 {
        println!(
            "{}",
            style(format!(
                "{} of {} samples gave up after repeated transient results",
                report.exhausted_slots, total
            ))
            .yellow()
        );
    }
    println!("Classification runs: {}", report.runs);
}
