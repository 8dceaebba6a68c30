//! Concurrent per-file transfer orchestration
//!
//! One stream per file to send, plus one stream carrying the whole delete batch.
//! Every unit runs as its own task; the engine gathers a per-path outcome from
//! each of them and never cancels siblings when one fails.

use crate::error::{Result, SyncError};
use crate::protocol::{CHUNK_SIZE, MAX_CONCURRENT_STREAMS};
use crate::protocol_core::{
    decode_delete_failures, delete_ack_limit, encode_delete_batch, encode_file_content_header,
    finish, read_ack, read_ack_within, write_all, Ack,
};
use crate::reconcile::{remote_join, SyncPlan};
use crate::transport::StreamOpener;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Result for a single path of a sync run
#[derive(Debug)]
pub enum Outcome {
    Sent { path: String, bytes: u64 },
    SendFailed { path: String, error: SyncError },
    Deleted { path: String },
    DeleteFailed { path: String, error: SyncError },
}

impl Outcome {
    pub fn path(&self) -> &str {
        match self {
            Outcome::Sent { path, .. }
            | Outcome::SendFailed { path, .. }
            | Outcome::Deleted { path }
            | Outcome::DeleteFailed { path, .. } => path,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::SendFailed { .. } | Outcome::DeleteFailed { .. })
    }

    pub fn error(&self) -> Option<&SyncError> {
        match self {
            Outcome::SendFailed { error, .. } | Outcome::DeleteFailed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Send every planned file and the delete batch concurrently, then gather.
///
/// `dest_root` is joined with each relative path to form the destination the
/// receiver writes to. Outcomes for sends carry that destination path.
pub async fn transfer<O>(opener: Arc<O>, local_root: &Path, plan: &SyncPlan, dest_root: &str) -> Vec<Outcome>
where
    O: StreamOpener + 'static,
{
    let permits = Arc::new(Semaphore::new(MAX_CONCURRENT_STREAMS as usize));
    let mut units: Vec<(Vec<String>, bool, JoinHandle<Vec<Outcome>>)> = Vec::new();

    for rel in &plan.to_send {
        let src = local_root.join(rel);
        let dest = remote_join(dest_root, rel);
        let opener = opener.clone();
        let permits = permits.clone();
        let task_dest = dest.clone();
        let handle = tokio::spawn(async move {
            // Held for the life of the stream and its file handle
            let _permit = permits.acquire_owned().await;
            let outcome = match send_file(opener.as_ref(), &src, &task_dest).await {
                Ok(bytes) => {
                    tracing::debug!(path = %task_dest, bytes, "sent");
                    Outcome::Sent {
                        path: task_dest,
                        bytes,
                    }
                }
                Err(error) => {
                    tracing::warn!(path = %task_dest, error = %error, "send failed");
                    Outcome::SendFailed {
                        path: task_dest,
                        error,
                    }
                }
            };
            vec![outcome]
        });
        units.push((vec![dest], false, handle));
    }

    if !plan.to_delete.is_empty() {
        let paths: Vec<String> = plan.to_delete.iter().cloned().collect();
        let opener = opener.clone();
        let task_paths = paths.clone();
        let handle = tokio::spawn(async move { delete_remote(opener.as_ref(), task_paths).await });
        units.push((paths, true, handle));
    }

    let mut outcomes = Vec::with_capacity(plan.to_send.len() + plan.to_delete.len());
    for (paths, is_delete, handle) in units {
        match handle.await {
            Ok(done) => outcomes.extend(done),
            Err(e) => {
                // A unit that died still reports every path it owned
                tracing::warn!(error = %e, "transfer task failed");
                for path in paths {
                    let error = SyncError::Task(e.to_string());
                    outcomes.push(if is_delete {
                        Outcome::DeleteFailed { path, error }
                    } else {
                        Outcome::SendFailed { path, error }
                    });
                }
            }
        }
    }
    outcomes
}

/// Stream one local file to `dest` and wait for the receiver's acknowledgment.
/// Returns the number of content bytes sent.
pub async fn send_file<O>(opener: &O, src: &Path, dest: &str) -> Result<u64>
where
    O: StreamOpener + ?Sized,
{
    let file = tokio::fs::File::open(src)
        .await
        .map_err(|e| SyncError::io(src, e))?;
    let len = file
        .metadata()
        .await
        .map_err(|e| SyncError::io(src, e))?
        .len();
    send_contents(opener, file, len, src, dest).await
}

/// Declare `len` bytes for `dest`, then stream them from `contents`. `src`
/// names the local origin in errors.
async fn send_contents<O, C>(opener: &O, mut contents: C, len: u64, src: &Path, dest: &str) -> Result<u64>
where
    O: StreamOpener + ?Sized,
    C: AsyncRead + Unpin,
{
    let (mut send, mut recv) = opener.open_stream().await?;
    let sent = match stream_body(&mut send, &mut contents, src, dest, len).await {
        Ok(sent) => sent,
        Err(e @ SyncError::Transport(_)) => return Err(rejection_or(&mut recv, e).await),
        Err(e) => return Err(e),
    };

    if sent < len {
        // Declared more than we could read; the receiver will report it incomplete
        return Err(SyncError::io(
            src,
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("file shrank during transfer: read {} of {} bytes", sent, len),
            ),
        ));
    }

    match read_ack(&mut recv).await? {
        Ack::Ok => Ok(sent),
        Ack::Rejected(reason) => Err(SyncError::Rejected(reason)),
    }
}

// Header, then at most `len` content bytes in chunks, then end-of-stream
async fn stream_body<W, C>(send: &mut W, contents: &mut C, src: &Path, dest: &str, len: u64) -> Result<u64>
where
    W: AsyncWrite + Unpin,
    C: AsyncRead + Unpin,
{
    write_all(send, &encode_file_content_header(dest, len)).await?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut sent: u64 = 0;
    while sent < len {
        let want = (len - sent).min(CHUNK_SIZE as u64) as usize;
        let n = contents
            .read(&mut buf[..want])
            .await
            .map_err(|e| SyncError::io(src, e))?;
        if n == 0 {
            break;
        }
        write_all(send, &buf[..n]).await?;
        sent += n as u64;
    }
    finish(send).await?;
    Ok(sent)
}

// A receiver that refuses an operation stops reading; our write then fails.
// Prefer the reason it sent back over the bare transport error.
async fn rejection_or<R>(recv: &mut R, err: SyncError) -> SyncError
where
    R: AsyncRead + Unpin,
{
    match read_ack(recv).await {
        Ok(Ack::Rejected(reason)) => SyncError::Rejected(reason),
        _ => err,
    }
}

/// Send the delete batch on its own stream and map the acknowledgment to
/// per-path outcomes.
async fn delete_remote<O>(opener: &O, paths: Vec<String>) -> Vec<Outcome>
where
    O: StreamOpener + ?Sized,
{
    match send_delete_batch(opener, &paths).await {
        Ok(failed) => paths
            .into_iter()
            .map(|path| match failed.get(&path) {
                Some(reason) => Outcome::DeleteFailed {
                    error: SyncError::Rejected(reason.clone()),
                    path,
                },
                None => Outcome::Deleted { path },
            })
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, count = paths.len(), "delete batch failed");
            paths
                .into_iter()
                .map(|path| Outcome::DeleteFailed {
                    error: batch_error(&e),
                    path,
                })
                .collect()
        }
    }
}

/// Returns the paths the receiver failed to delete, with reasons
pub async fn send_delete_batch<O>(opener: &O, paths: &[String]) -> Result<HashMap<String, String>>
where
    O: StreamOpener + ?Sized,
{
    let payload = encode_delete_batch(paths)?;
    let (mut send, mut recv) = opener.open_stream().await?;
    let written = async {
        write_all(&mut send, &payload).await?;
        finish(&mut send).await
    }
    .await;
    if let Err(e) = written {
        return Err(rejection_or(&mut recv, e).await);
    }

    // Room for a reason naming every path of the batch
    let limit = delete_ack_limit(payload.len(), paths.len());
    match read_ack_within(&mut recv, limit).await? {
        Ack::Ok => Ok(HashMap::new()),
        Ack::Rejected(reason) => match decode_delete_failures(&reason) {
            Ok(failures) => Ok(failures.into_iter().map(|f| (f.path, f.reason)).collect()),
            // Not a per-path list: the whole batch was refused
            Err(_) => Err(SyncError::Rejected(reason)),
        },
    }
}

// Fan a batch-level error out to each path of the batch
fn batch_error(e: &SyncError) -> SyncError {
    match e {
        SyncError::Rejected(reason) => SyncError::Rejected(reason.clone()),
        SyncError::MissingAck => SyncError::MissingAck,
        other => SyncError::Transport(other.to_string()),
    }
}
