//! Command-line options for both binaries

use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::protocol::DEFAULT_BIND;

/// Daemon options for quicsyncd. Every option has a default, so it runs with no arguments.
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "quicsync daemon - receives mirrored trees over QUIC")]
pub struct DaemonOpts {
    /// Bind address (host:port)
    #[arg(long, default_value = DEFAULT_BIND)]
    pub bind: String,

    /// Confine every requested path to this directory
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// PEM certificate chain (requires --tls-key)
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key (requires --tls-cert)
    #[arg(long)]
    pub tls_key: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    pub verbose: bool,
}

/// Client options for quicsync
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "quicsync - mirror a directory onto a remote host over QUIC")]
pub struct ClientOpts {
    /// Local source directory
    pub source: PathBuf,

    /// Destination as host[:port]@remotePath
    pub destination: String,

    /// Abort the whole run after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Append a plain-text audit log of the run to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Show what would be sent and deleted, transfer nothing
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Debug logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    pub verbose: bool,
}

/// Install the tracing subscriber. RUST_LOG wins over the verbosity flag.
pub fn init_logging(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_runs_without_arguments() {
        let opts = DaemonOpts::try_parse_from(["quicsyncd"]).unwrap();
        assert_eq!(opts.bind, DEFAULT_BIND);
        assert!(opts.root.is_none());
    }

    #[test]
    fn test_client_arguments() {
        let opts = ClientOpts::try_parse_from([
            "quicsync",
            "./src",
            "host@/dest",
            "--timeout",
            "30",
            "-n",
        ])
        .unwrap();
        assert_eq!(opts.source, PathBuf::from("./src"));
        assert_eq!(opts.destination, "host@/dest");
        assert_eq!(opts.timeout, Some(30));
        assert!(opts.dry_run);
    }

    #[test]
    fn test_client_requires_destination() {
        assert!(ClientOpts::try_parse_from(["quicsync", "./src"]).is_err());
    }
}
