//! Error types for sync operations

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main error type for protocol, transfer and session operations.
///
/// Checksum mismatches are not represented here: a differing digest is normal
/// input to the reconciler, never a failure.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Connection or stream failure reported by the transport
    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("unknown packet type {0}")]
    UnknownPacketType(u32),

    #[error("malformed manifest: {0}")]
    MalformedManifest(String),

    #[error("malformed delete batch: {0}")]
    MalformedDeleteBatch(String),

    #[error("malformed file content header: {0}")]
    MalformedFileHeader(String),

    #[error("payload too large: {len} bytes (max: {max})")]
    PayloadTooLarge { len: u64, max: u64 },

    /// Local read/write/enumerate/delete failure
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The sender closed the stream before all declared bytes arrived
    #[error("incomplete transfer of {}: received {received} of {expected} bytes", path.display())]
    IncompleteTransfer {
        path: PathBuf,
        expected: u64,
        received: u64,
    },

    #[error("rejected by peer: {0}")]
    Rejected(String),

    #[error("peer closed the stream without acknowledgment")]
    MissingAck,

    #[error("path {} is outside the served root", .0.display())]
    PathOutsideRoot(PathBuf),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("sync run exceeded its deadline of {0:?}")]
    TimedOut(Duration),

    #[error("worker task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Wrap a local filesystem error together with the path it concerns
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        SyncError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Wrap a stream read/write error. Stream halves surface transport failures as io::Error.
    pub fn stream(source: io::Error) -> Self {
        SyncError::Transport(source.to_string())
    }
}

impl From<quinn::ConnectionError> for SyncError {
    fn from(e: quinn::ConnectionError) -> Self {
        SyncError::Transport(e.to_string())
    }
}

impl From<quinn::ConnectError> for SyncError {
    fn from(e: quinn::ConnectError) -> Self {
        SyncError::Transport(e.to_string())
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        SyncError::Task(e.to_string())
    }
}

impl From<rustls::Error> for SyncError {
    fn from(e: rustls::Error) -> Self {
        SyncError::Tls(e.to_string())
    }
}
