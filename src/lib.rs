//! quicsync library
//!
//! Checksum-driven directory mirroring: the client compares its tree against a
//! manifest fetched from the server and sends or deletes only what differs, one
//! QUIC stream per file.

pub mod checksum;
pub mod cli;
pub mod client;
pub mod error;
pub mod fs_enum;
pub mod logger;
pub mod manifest;
pub mod protocol;
pub mod protocol_core;
pub mod reconcile;
pub mod session;
pub mod tls;
pub mod transfer;
pub mod transport;
pub mod url;

pub use error::{Result, SyncError};
