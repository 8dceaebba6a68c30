//! QUIC endpoints and the stream-opening seam used by the transfer engine

use crate::error::{Result, SyncError};
use crate::protocol::MAX_CONCURRENT_STREAMS;
use async_trait::async_trait;
use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use quinn::{Connection, Endpoint, TransportConfig, VarInt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Anything that can open a fresh bidirectional stream on a shared connection.
///
/// Opening is safe from many tasks at once; each returned stream is owned
/// exclusively by the caller.
#[async_trait]
pub trait StreamOpener: Send + Sync {
    type Send: AsyncWrite + Unpin + Send + 'static;
    type Recv: AsyncRead + Unpin + Send + 'static;

    async fn open_stream(&self) -> Result<(Self::Send, Self::Recv)>;
}

#[async_trait]
impl StreamOpener for Connection {
    type Send = quinn::SendStream;
    type Recv = quinn::RecvStream;

    async fn open_stream(&self) -> Result<(Self::Send, Self::Recv)> {
        Ok(self.open_bi().await?)
    }
}

fn transport_config() -> Arc<TransportConfig> {
    let mut transport = TransportConfig::default();
    transport.max_concurrent_bidi_streams(VarInt::from_u32(MAX_CONCURRENT_STREAMS));
    Arc::new(transport)
}

/// Bind a server endpoint
pub fn server_endpoint(bind: SocketAddr, tls: rustls::ServerConfig) -> Result<Endpoint> {
    let crypto = QuicServerConfig::try_from(tls).map_err(|e| SyncError::Tls(e.to_string()))?;
    let mut cfg = quinn::ServerConfig::with_crypto(Arc::new(crypto));
    cfg.transport_config(transport_config());
    Endpoint::server(cfg, bind).map_err(|e| SyncError::Transport(format!("bind {}: {}", bind, e)))
}

/// Resolve `host:port` and open a connection to it.
///
/// The endpoint is returned alongside the connection so the caller can wait
/// for it to go idle before exiting.
pub async fn connect(host: &str, port: u16, tls: rustls::ClientConfig) -> Result<(Endpoint, Connection)> {
    let addr = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| SyncError::Transport(format!("resolve {}:{}: {}", host, port, e)))?
        .next()
        .ok_or_else(|| SyncError::Transport(format!("no address for {}:{}", host, port)))?;

    let local: SocketAddr = if addr.is_ipv6() {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    } else {
        (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
    };
    let mut endpoint =
        Endpoint::client(local).map_err(|e| SyncError::Transport(format!("client endpoint: {}", e)))?;

    let crypto = QuicClientConfig::try_from(tls).map_err(|e| SyncError::Tls(e.to_string()))?;
    let mut cfg = quinn::ClientConfig::new(Arc::new(crypto));
    cfg.transport_config(transport_config());
    endpoint.set_default_client_config(cfg);

    let conn = endpoint.connect(addr, host)?.await?;
    tracing::debug!(remote = %addr, "connected");
    Ok((endpoint, conn))
}
