//! Content digests used to compare files across peers

use crate::error::{Result, SyncError};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Length of a rendered digest (hex SHA-256)
pub const DIGEST_HEX_LEN: usize = 64;

const READ_BUF: usize = 64 * 1024;

/// Digest the full content of a file, rendered as lowercase hex.
///
/// The algorithm is fixed for the protocol version; both peers must agree.
pub fn checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| SyncError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF];
    loop {
        let n = file.read(&mut buf).map_err(|e| SyncError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(to_hex(&hasher.finalize()))
}

/// Digest an in-memory buffer with the same algorithm as [`checksum`]
pub fn checksum_bytes(data: &[u8]) -> String {
    to_hex(&Sha256::digest(data))
}

fn to_hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect::<String>()
}
