//! quicsync client: mirror a local directory onto a quicsyncd host

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use quicsync::cli::{init_logging, ClientOpts};
use quicsync::client::{sync, SyncOptions, SyncReport};
use quicsync::logger::{log_report, Logger, NoopLogger, TextLogger};
use quicsync::{tls, transport, url};

fn main() -> Result<()> {
    let opts = ClientOpts::parse();
    init_logging(opts.verbose);

    if !opts.source.is_dir() {
        anyhow::bail!("Error: Source is not a directory: {}", opts.source.display());
    }
    let dest = url::parse_remote_dest(&opts.destination)?;

    let logger: Box<dyn Logger> = match &opts.log_file {
        Some(p) => Box::new(
            TextLogger::new(p).with_context(|| format!("Failed to open log file {}", p.display()))?,
        ),
        None => Box::new(NoopLogger),
    };

    let sync_opts = SyncOptions {
        deadline: opts.timeout.map(Duration::from_secs),
        dry_run: opts.dry_run,
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let report = rt.block_on(run(&opts.source, &dest, &sync_opts))?;

    log_report(logger.as_ref(), &opts.source, &dest.path, &report);
    print_report(&report, opts.dry_run);

    if !report.is_success() {
        anyhow::bail!("{} path(s) failed", report.failures().count());
    }
    Ok(())
}

async fn run(source: &Path, dest: &url::RemoteDest, sync_opts: &SyncOptions) -> Result<SyncReport> {
    let tls_config = tls::build_client_config()?;
    let (endpoint, conn) = transport::connect(&dest.host, dest.port, tls_config)
        .await
        .with_context(|| format!("Failed to connect to {}:{}", dest.host, dest.port))?;

    let result = sync(Arc::new(conn.clone()), source, &dest.path, sync_opts).await;

    conn.close(0u32.into(), b"done");
    endpoint.wait_idle().await;
    result.context("Sync failed")
}

fn print_report(report: &SyncReport, dry_run: bool) {
    if dry_run {
        for path in &report.plan.to_send {
            println!("send   {}", path);
        }
        for path in &report.plan.to_delete {
            println!("delete {}", path);
        }
    }
    for failure in report.failures() {
        if let Some(e) = failure.error() {
            eprintln!("FAILED {}: {}", failure.path(), e);
        }
    }
    println!(
        "{} sent ({} bytes), {} deleted, {} unchanged, {} failed in {:.2}s",
        report.files_sent(),
        report.bytes_sent(),
        report.files_deleted(),
        report.plan.unchanged_files,
        report.failures().count(),
        report.elapsed.as_secs_f64()
    );
}
