//! Wire codec and framed stream I/O shared by the client and the server
//!
//! Every stream carries exactly one message: a 12-byte header (8-byte big-endian
//! payload length, 4-byte big-endian type tag) followed by `length` payload bytes.
//! A FileContent payload is only the extension header; the raw file bytes follow
//! it on the same stream and are not counted by `length`.

use crate::error::{Result, SyncError};
use crate::manifest::FileEntry;
use crate::protocol::{ack, packet, CONTENT_LEN_FIELD, HEADER_LEN, MAX_PAYLOAD_SIZE};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Known packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    ManifestRequest,
    FileContent,
    DeleteBatch,
}

impl PacketType {
    pub fn tag(self) -> u32 {
        match self {
            PacketType::ManifestRequest => packet::MANIFEST,
            PacketType::FileContent => packet::FILE_CONTENT,
            PacketType::DeleteBatch => packet::DELETE_BATCH,
        }
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            packet::MANIFEST => Some(PacketType::ManifestRequest),
            packet::FILE_CONTENT => Some(PacketType::FileContent),
            packet::DELETE_BATCH => Some(PacketType::DeleteBatch),
            _ => None,
        }
    }
}

/// Decoded fixed header. The raw tag is kept so unknown types survive decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub length: u64,
    pub tag: u32,
}

impl Header {
    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_tag(self.tag)
    }
}

/// FileContent extension header: where to write and how many raw bytes follow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContentHeader {
    pub dest_path: String,
    pub content_length: u64,
}

/// Build the 12-byte header
pub fn encode_header(length: u64, tag: u32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..8].copy_from_slice(&length.to_be_bytes());
    header[8..12].copy_from_slice(&tag.to_be_bytes());
    header
}

/// Parse the 12-byte header. Unknown tags are not an error at this layer.
pub fn decode_header(bytes: &[u8]) -> Result<Header> {
    if bytes.len() < HEADER_LEN {
        return Err(SyncError::MalformedHeader(format!(
            "need {} bytes, got {}",
            HEADER_LEN,
            bytes.len()
        )));
    }
    let mut len = [0u8; 8];
    len.copy_from_slice(&bytes[0..8]);
    let mut tag = [0u8; 4];
    tag.copy_from_slice(&bytes[8..12]);
    Ok(Header {
        length: u64::from_be_bytes(len),
        tag: u32::from_be_bytes(tag),
    })
}

fn framed(kind: PacketType, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&encode_header(payload.len() as u64, kind.tag()));
    out.extend_from_slice(payload);
    out
}

pub fn encode_manifest_request(root: &str) -> Vec<u8> {
    framed(PacketType::ManifestRequest, root.as_bytes())
}

/// The request path is the whole payload; its length is the header length.
pub fn decode_manifest_request(payload: &[u8]) -> Result<String> {
    String::from_utf8(payload.to_vec())
        .map_err(|_| SyncError::MalformedManifest("request path is not valid UTF-8".into()))
}

/// Manifest replies reuse the manifest-exchange tag with a JSON list payload.
pub fn encode_manifest(entries: &[FileEntry]) -> Result<Vec<u8>> {
    let body =
        serde_json::to_vec(entries).map_err(|e| SyncError::MalformedManifest(e.to_string()))?;
    Ok(framed(PacketType::ManifestRequest, &body))
}

pub fn decode_manifest(payload: &[u8]) -> Result<Vec<FileEntry>> {
    serde_json::from_slice(payload).map_err(|e| SyncError::MalformedManifest(e.to_string()))
}

/// Header length field = 8 + byte length of the destination path.
pub fn encode_file_content_header(dest_path: &str, content_length: u64) -> Vec<u8> {
    let mut payload = Vec::with_capacity(CONTENT_LEN_FIELD + dest_path.len());
    payload.extend_from_slice(&content_length.to_be_bytes());
    payload.extend_from_slice(dest_path.as_bytes());
    framed(PacketType::FileContent, &payload)
}

/// The destination path occupies whatever the header length leaves after the
/// fixed-width content length; there is no terminator.
pub fn decode_file_content_header(payload: &[u8]) -> Result<FileContentHeader> {
    if payload.len() < CONTENT_LEN_FIELD {
        return Err(SyncError::MalformedFileHeader(format!(
            "need at least {} bytes, got {}",
            CONTENT_LEN_FIELD,
            payload.len()
        )));
    }
    let mut len = [0u8; CONTENT_LEN_FIELD];
    len.copy_from_slice(&payload[..CONTENT_LEN_FIELD]);
    let dest_path = std::str::from_utf8(&payload[CONTENT_LEN_FIELD..])
        .map_err(|_| SyncError::MalformedFileHeader("destination path is not valid UTF-8".into()))?
        .to_string();
    if dest_path.is_empty() {
        return Err(SyncError::MalformedFileHeader("empty destination path".into()));
    }
    Ok(FileContentHeader {
        dest_path,
        content_length: u64::from_be_bytes(len),
    })
}

pub fn encode_delete_batch(paths: &[String]) -> Result<Vec<u8>> {
    let body =
        serde_json::to_vec(paths).map_err(|e| SyncError::MalformedDeleteBatch(e.to_string()))?;
    Ok(framed(PacketType::DeleteBatch, &body))
}

pub fn decode_delete_batch(payload: &[u8]) -> Result<Vec<String>> {
    serde_json::from_slice(payload).map_err(|e| SyncError::MalformedDeleteBatch(e.to_string()))
}

/// A path from a delete batch that the receiver could not remove
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    pub path: String,
    pub reason: String,
}

impl DeleteFailure {
    /// The reason is cut to [`ack::MAX_REASON_LEN`] bytes so the whole list
    /// stays within [`delete_ack_limit`].
    pub fn new(path: String, reason: &str) -> Self {
        let mut end = reason.len().min(ack::MAX_REASON_LEN);
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        Self {
            path,
            reason: reason[..end].to_string(),
        }
    }
}

/// Most acknowledgment bytes a receiver can legitimately send for a delete
/// batch of `count` paths whose framed encoding took `batch_len` bytes.
/// Every path failing, each with a maximal reason, still fits.
pub fn delete_ack_limit(batch_len: usize, count: usize) -> u64 {
    let full = ack::ACK_REJECT.len() + batch_len + count * ack::FAILURE_ENTRY_ALLOWANCE;
    full.max(ack::MAX_ACK_LEN) as u64
}

/// Rejection reason carried by a delete batch acknowledgment
pub fn encode_delete_failures(failures: &[DeleteFailure]) -> Result<String> {
    serde_json::to_string(failures).map_err(|e| SyncError::MalformedDeleteBatch(e.to_string()))
}

pub fn decode_delete_failures(reason: &str) -> Result<Vec<DeleteFailure>> {
    serde_json::from_str(reason).map_err(|e| SyncError::MalformedDeleteBatch(e.to_string()))
}

/// Read exactly one header from a stream
pub async fn read_header<R>(stream: &mut R) -> Result<Header>
where
    R: AsyncRead + Unpin,
{
    let mut hdr = [0u8; HEADER_LEN];
    match stream.read_exact(&mut hdr).await {
        Ok(_) => decode_header(&hdr),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(SyncError::MalformedHeader(
            "stream ended before a full header".into(),
        )),
        Err(e) => Err(SyncError::stream(e)),
    }
}

/// Read exactly `header.length` payload bytes. A short payload is a decode failure
/// of whatever message the header announced.
pub async fn read_payload<R>(stream: &mut R, header: &Header) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    validate_payload_size(header.length)?;
    let mut payload = vec![0u8; header.length as usize];
    if payload.is_empty() {
        return Ok(payload);
    }
    match stream.read_exact(&mut payload).await {
        Ok(_) => Ok(payload),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            let msg = format!("payload truncated, expected {} bytes", header.length);
            Err(match header.packet_type() {
                Some(PacketType::ManifestRequest) => SyncError::MalformedManifest(msg),
                Some(PacketType::DeleteBatch) => SyncError::MalformedDeleteBatch(msg),
                Some(PacketType::FileContent) => SyncError::MalformedFileHeader(msg),
                None => SyncError::MalformedHeader(msg),
            })
        }
        Err(e) => Err(SyncError::stream(e)),
    }
}

pub fn validate_payload_size(len: u64) -> Result<()> {
    if len > MAX_PAYLOAD_SIZE {
        return Err(SyncError::PayloadTooLarge {
            len,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    Ok(())
}

pub async fn write_all<W>(stream: &mut W, bytes: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(bytes).await.map_err(SyncError::stream)
}

/// Close our sending half so the peer observes end-of-stream
pub async fn finish<W>(stream: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    stream.shutdown().await.map_err(SyncError::stream)
}

/// Write a success acknowledgment and finish the stream
pub async fn write_ack<W>(stream: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_all(stream, ack::ACK_OK).await?;
    finish(stream).await
}

/// Write a rejection with its reason and finish the stream
pub async fn write_rejection<W>(stream: &mut W, reason: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut out = Vec::with_capacity(2 + reason.len());
    out.extend_from_slice(ack::ACK_REJECT);
    out.extend_from_slice(reason.as_bytes());
    write_all(stream, &out).await?;
    finish(stream).await
}

/// Outcome of an acknowledgment read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    Ok,
    Rejected(String),
}

pub fn parse_ack(bytes: &[u8]) -> Result<Ack> {
    if bytes == ack::ACK_OK {
        Ok(Ack::Ok)
    } else if let Some(reason) = bytes.strip_prefix(ack::ACK_REJECT) {
        Ok(Ack::Rejected(String::from_utf8_lossy(reason).into_owned()))
    } else {
        Err(SyncError::MissingAck)
    }
}

/// Read the peer's acknowledgment until it finishes the stream
pub async fn read_ack<R>(stream: &mut R) -> Result<Ack>
where
    R: AsyncRead + Unpin,
{
    read_ack_within(stream, ack::MAX_ACK_LEN as u64).await
}

/// Like [`read_ack`] with an explicit size bound. An acknowledgment longer than
/// `limit` is an error, never a truncated reason.
pub async fn read_ack_within<R>(stream: &mut R, limit: u64) -> Result<Ack>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    stream
        .take(limit + 1)
        .read_to_end(&mut buf)
        .await
        .map_err(SyncError::stream)?;
    if buf.len() as u64 > limit {
        return Err(SyncError::PayloadTooLarge {
            len: buf.len() as u64,
            max: limit,
        });
    }
    parse_ack(&buf)
}

/// Confine a peer-supplied path to `root`.
/// Rejects parent-directory components and NUL bytes, then requires the
/// result to lie under `root`. Relative paths are taken relative to `root`.
pub fn confine_under_root(root: &Path, p: &Path) -> Result<PathBuf> {
    use Component::{CurDir, Normal, ParentDir, Prefix, RootDir};

    if p.to_string_lossy().contains('\0') {
        return Err(SyncError::PathOutsideRoot(p.to_path_buf()));
    }

    let mut safe = PathBuf::new();
    for component in p.components() {
        match component {
            CurDir => {}
            Normal(s) => safe.push(s),
            RootDir | Prefix(_) => safe.push(component.as_os_str()),
            ParentDir => return Err(SyncError::PathOutsideRoot(p.to_path_buf())),
        }
    }

    let joined = if safe.is_absolute() {
        safe
    } else {
        root.join(safe)
    };
    if !joined.starts_with(root) {
        return Err(SyncError::PathOutsideRoot(p.to_path_buf()));
    }

    // Symlinks under the root may point anywhere: check where the path really lands
    let real_root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    match resolve_existing_prefix(&joined) {
        Some(real) if real.starts_with(&real_root) => Ok(joined),
        _ => Err(SyncError::PathOutsideRoot(p.to_path_buf())),
    }
}

/// Canonicalize the deepest ancestor of `path` that exists (the path itself
/// included) and re-append the components below it. `None` when that ancestor
/// cannot be resolved, e.g. a dangling symlink.
fn resolve_existing_prefix(path: &Path) -> Option<PathBuf> {
    for ancestor in path.ancestors() {
        if std::fs::symlink_metadata(ancestor).is_err() {
            continue;
        }
        let rest = path.strip_prefix(ancestor).ok()?;
        let real = ancestor.canonicalize().ok()?;
        return Some(if rest.as_os_str().is_empty() {
            real
        } else {
            real.join(rest)
        });
    }
    Some(path.to_path_buf())
}

/// Create parent directory if needed
pub async fn ensure_parent_exists(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::io(parent, e))?;
        }
    }
    Ok(())
}
