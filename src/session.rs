//! Server side: accept connections and streams, dispatch each stream by packet type
//!
//! Every accepted stream carries exactly one operation and is handled in its own
//! task. A failure is confined to the stream that produced it.

use crate::error::{Result, SyncError};
use crate::manifest::build_manifest;
use crate::protocol::CHUNK_SIZE;
use crate::protocol_core::{
    confine_under_root, decode_delete_batch, decode_file_content_header, decode_manifest_request,
    encode_delete_failures, encode_manifest, ensure_parent_exists, finish, read_header,
    read_payload, write_ack, write_all, write_rejection, DeleteFailure, Header, PacketType,
};
use crate::transport::server_endpoint;
use quinn::{Connection, ConnectionError, Endpoint};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Per-server settings shared by every stream handler
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// When set, every peer-supplied path must lie under this directory
    pub root: Option<PathBuf>,
}

impl SessionConfig {
    fn resolve(&self, requested: &str) -> Result<PathBuf> {
        let p = Path::new(requested);
        match &self.root {
            Some(root) => confine_under_root(root, p),
            None => Ok(p.to_path_buf()),
        }
    }
}

/// Handle one accepted stream to completion
pub async fn handle_stream<W, R>(mut send: W, mut recv: R, cfg: &SessionConfig) -> Result<()>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let header = read_header(&mut recv).await?;
    tracing::debug!(tag = header.tag, length = header.length, "stream header");

    match header.packet_type() {
        Some(PacketType::ManifestRequest) => {
            handle_manifest_request(&mut send, &mut recv, &header, cfg).await
        }
        Some(PacketType::FileContent) => {
            let result = receive_file(&mut recv, &header, cfg).await;
            acknowledge(&mut send, result).await
        }
        Some(PacketType::DeleteBatch) => {
            let result = delete_batch(&mut recv, &header, cfg).await;
            acknowledge(&mut send, result).await
        }
        // No action; the caller drops the stream
        None => Err(SyncError::UnknownPacketType(header.tag)),
    }
}

async fn acknowledge<W>(send: &mut W, result: Result<()>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match result {
        Ok(()) => write_ack(send).await,
        Err(e) => {
            let reason = match &e {
                SyncError::Rejected(reason) => reason.clone(),
                other => other.to_string(),
            };
            // Best effort: the peer may already be gone
            let _ = write_rejection(send, &reason).await;
            Err(e)
        }
    }
}

async fn handle_manifest_request<W, R>(
    send: &mut W,
    recv: &mut R,
    header: &Header,
    cfg: &SessionConfig,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let payload = read_payload(recv, header).await?;
    let requested = decode_manifest_request(&payload)?;
    let root = cfg.resolve(&requested)?;

    // A manifest is all-or-nothing: on failure nothing is written back
    let manifest = tokio::task::spawn_blocking(move || build_manifest(&root)).await??;
    tracing::info!(root = %requested, files = manifest.len(), "manifest built");

    let bytes = encode_manifest(&manifest.to_entries())?;
    write_all(send, &bytes).await?;
    finish(send).await
}

/// Receive one file, writing bytes through to disk as they arrive
async fn receive_file<R>(recv: &mut R, header: &Header, cfg: &SessionConfig) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let payload = read_payload(recv, header).await?;
    let file_header = decode_file_content_header(&payload)?;
    let dest = cfg.resolve(&file_header.dest_path)?;
    let expected = file_header.content_length;

    ensure_parent_exists(&dest).await?;
    let mut file = tokio::fs::File::create(&dest)
        .await
        .map_err(|e| SyncError::io(&dest, e))?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut received: u64 = 0;
    while received < expected {
        let want = (expected - received).min(CHUNK_SIZE as u64) as usize;
        let n = match recv.read(&mut buf[..want]).await {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => 0,
            Err(e) => return Err(SyncError::stream(e)),
        };
        if n == 0 {
            tracing::warn!(path = %dest.display(), expected, received, "sender closed early");
            return Err(SyncError::IncompleteTransfer {
                path: dest,
                expected,
                received,
            });
        }
        file.write_all(&buf[..n])
            .await
            .map_err(|e| SyncError::io(&dest, e))?;
        received += n as u64;
    }
    file.flush().await.map_err(|e| SyncError::io(&dest, e))?;

    tracing::info!(path = %dest.display(), bytes = received, "file received");
    Ok(())
}

/// Remove every listed path. Missing files are not an error; other failures are
/// collected so the rest of the batch still runs.
async fn delete_batch<R>(recv: &mut R, header: &Header, cfg: &SessionConfig) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let payload = read_payload(recv, header).await?;
    let paths = decode_delete_batch(&payload)?;

    let mut failures = Vec::new();
    for path in paths {
        let target = match cfg.resolve(&path) {
            Ok(t) => t,
            Err(e) => {
                failures.push(DeleteFailure::new(path, &e.to_string()));
                continue;
            }
        };
        match tokio::fs::remove_file(&target).await {
            Ok(()) => tracing::info!(path = %target.display(), "deleted"),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %target.display(), "already absent")
            }
            Err(e) => {
                tracing::warn!(path = %target.display(), error = %e, "delete failed");
                failures.push(DeleteFailure::new(path, &e.to_string()));
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(SyncError::Rejected(encode_delete_failures(&failures)?))
    }
}

/// Accept streams on one connection until the peer closes it
pub async fn handle_connection(conn: Connection, cfg: Arc<SessionConfig>) -> Result<()> {
    let remote = conn.remote_address();
    loop {
        let (send, recv) = match conn.accept_bi().await {
            Ok(s) => s,
            Err(ConnectionError::ApplicationClosed(_)) | Err(ConnectionError::LocallyClosed) => {
                tracing::info!(%remote, "connection closed");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let cfg = cfg.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_stream(send, recv, &cfg).await {
                tracing::warn!(%remote, error = %e, "stream failed");
            }
        });
    }
}

/// A bound QUIC server
pub struct Server {
    endpoint: Endpoint,
    config: Arc<SessionConfig>,
}

impl Server {
    pub fn bind(addr: SocketAddr, tls: rustls::ServerConfig, config: SessionConfig) -> Result<Self> {
        let endpoint = server_endpoint(addr, tls)?;
        Ok(Self {
            endpoint,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.endpoint
            .local_addr()
            .map_err(|e| SyncError::Transport(e.to_string()))
    }

    /// Accept connections until the endpoint is closed
    pub async fn run(self) -> Result<()> {
        tracing::info!(addr = ?self.endpoint.local_addr().ok(), "listening");
        while let Some(incoming) = self.endpoint.accept().await {
            let cfg = self.config.clone();
            tokio::spawn(async move {
                let conn = match incoming.await {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(error = %e, "handshake failed");
                        return;
                    }
                };
                tracing::info!(remote = %conn.remote_address(), "accepted connection");
                if let Err(e) = handle_connection(conn, cfg).await {
                    tracing::warn!(error = %e, "connection error");
                }
            });
        }
        Ok(())
    }
}
