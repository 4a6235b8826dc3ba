//! vr-iosched: replay a block I/O trace through the V(R) scheduler and report
//! dispatch order, seek distance, and per-class latency.

use clap::Parser;
use tracing::info;

use vr_iosched::config::{Cli, Config};
use vr_iosched::replay::{Replay, Trace};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "vr_iosched=debug"
    } else {
        "vr_iosched=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!("vr-iosched v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration and apply command-line tunable overrides.
    let mut config = Config::load(&cli.config)?;
    for assignment in &cli.overrides {
        let (tunable, value) = config.scheduler.apply_assignment(assignment)?;
        info!(tunable = %tunable, value, "Tunable override");
    }

    info!(
        sync_read_expire = config.scheduler.sync_read_expire,
        sync_write_expire = config.scheduler.sync_write_expire,
        async_read_expire = config.scheduler.async_read_expire,
        async_write_expire = config.scheduler.async_write_expire,
        fifo_batch = config.scheduler.fifo_batch,
        writes_starved = config.scheduler.writes_starved,
        rev_penalty = config.scheduler.rev_penalty,
        "Configuration loaded"
    );

    let trace = Trace::load(&cli.trace).await?;
    info!(events = trace.events.len(), path = %cli.trace.display(), "Trace loaded");

    let report = Replay::new(&config).run(&trace)?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for record in &report.log {
        println!(
            "{:>8} ms  #{:<6} {:<5} {:<5} sector {:>10} +{:<6} seek {:>10}  wait {:>6} ms  ({})",
            record.at_ms,
            record.id,
            record.direction,
            record.sync,
            record.sector,
            record.count,
            record.seek,
            record.latency_ms,
            record.reason,
        );
    }

    let summary = &report.summary;
    println!();
    println!(
        "submitted {}  dispatched {}  merged {}  expired {}  forced writes {}",
        summary.submitted,
        summary.dispatched,
        summary.merged,
        summary.expired_dispatches,
        summary.forced_writes
    );
    println!(
        "total seek {} sectors  makespan {} ms",
        summary.total_seek, summary.makespan_ms
    );
    println!(
        "reads:  n={} mean {:.1} ms  max {} ms",
        summary.reads.count,
        summary.reads.mean_ms(),
        summary.reads.max_ms
    );
    println!(
        "writes: n={} mean {:.1} ms  max {} ms",
        summary.writes.count,
        summary.writes.mean_ms(),
        summary.writes.max_ms
    );

    Ok(())
}
