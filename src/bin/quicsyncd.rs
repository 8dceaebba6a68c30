use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;

use quicsync::cli::{init_logging, DaemonOpts};
use quicsync::session::{Server, SessionConfig};
use quicsync::tls;

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();
    init_logging(opts.verbose);

    let bind: SocketAddr = opts
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address: {}", opts.bind))?;

    // Canonicalize the confinement root for better logging and prefix checks
    let root = match &opts.root {
        Some(root) => {
            if !root.is_dir() {
                anyhow::bail!("Error: Root path is not a directory: {}", root.display());
            }
            Some(
                std::fs::canonicalize(root)
                    .with_context(|| format!("Failed to canonicalize root path: {}", root.display()))?,
            )
        }
        None => None,
    };

    match &opts.tls_cert {
        Some(cert) => tracing::info!(cert = %cert.display(), "using certificate from disk"),
        None => tracing::info!("using a fresh self-signed certificate"),
    }
    if let Some(root) = &root {
        tracing::info!(root = %root.display(), "confining paths to root");
    }
    if opts.bind.starts_with("0.0.0.0") {
        tracing::warn!("binding to 0.0.0.0 exposes the daemon on all interfaces; peer identity is not verified");
    }

    let tls_config = tls::load_or_generate_server_config(opts.tls_cert, opts.tls_key)
        .context("Failed to set up TLS configuration")?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async move {
        let server = Server::bind(bind, tls_config, SessionConfig { root })
            .context("Failed to start server")?;
        server.run().await.context("Server stopped")
    })
}
