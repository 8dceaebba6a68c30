//! Client side of a sync run: manifest exchange, reconciliation, transfer

use crate::error::{Result, SyncError};
use crate::manifest::Manifest;
use crate::protocol_core::{
    decode_manifest, encode_manifest_request, finish, read_header, read_payload, write_all,
    PacketType,
};
use crate::reconcile::{reconcile, SyncPlan};
use crate::transfer::{transfer, Outcome};
use crate::transport::StreamOpener;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

/// Knobs for one sync run
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Abort the whole run after this long
    pub deadline: Option<Duration>,
    /// Reconcile only; transfer nothing
    pub dry_run: bool,
}

/// Aggregate result of a sync run: one outcome per acted-on path
#[derive(Debug)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub plan: SyncPlan,
    pub outcomes: Vec<Outcome>,
    pub elapsed: Duration,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| !o.is_failure())
    }

    pub fn failures(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }

    pub fn files_sent(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, Outcome::Sent { .. }))
            .count()
    }

    pub fn files_deleted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, Outcome::Deleted { .. }))
            .count()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|o| match o {
                Outcome::Sent { bytes, .. } => *bytes,
                _ => 0,
            })
            .sum()
    }
}

/// Ask the peer for the manifest of `dest_root` on a dedicated control stream
pub async fn fetch_manifest<O>(opener: &O, dest_root: &str) -> Result<Manifest>
where
    O: StreamOpener + ?Sized,
{
    let (mut send, mut recv) = opener.open_stream().await?;
    write_all(&mut send, &encode_manifest_request(dest_root)).await?;
    finish(&mut send).await?;

    let header = read_header(&mut recv).await.map_err(|e| match e {
        // The server writes nothing when it cannot build a complete manifest
        SyncError::MalformedHeader(_) => {
            SyncError::MalformedManifest(format!("no manifest returned for {}", dest_root))
        }
        other => other,
    })?;
    if header.packet_type() != Some(PacketType::ManifestRequest) {
        return Err(SyncError::MalformedManifest(format!(
            "unexpected reply type {}",
            header.tag
        )));
    }
    let payload = read_payload(&mut recv, &header).await?;
    Manifest::from_entries(decode_manifest(&payload)?)
}

/// Mirror `source` onto `dest_root` on the peer.
///
/// Failing to obtain the manifest aborts the run before any transfer. After
/// that, per-path failures are collected in the report instead.
pub async fn sync<O>(opener: Arc<O>, source: &Path, dest_root: &str, opts: &SyncOptions) -> Result<SyncReport>
where
    O: StreamOpener + 'static,
{
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("sync", run = %run_id);
    let fut = run(opener, source, dest_root, opts, run_id).instrument(span);

    match opts.deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| SyncError::TimedOut(limit))?,
        None => fut.await,
    }
}

async fn run<O>(opener: Arc<O>, source: &Path, dest_root: &str, opts: &SyncOptions, run_id: Uuid) -> Result<SyncReport>
where
    O: StreamOpener + 'static,
{
    let started = Instant::now();

    let manifest = fetch_manifest(opener.as_ref(), dest_root).await?;
    tracing::info!(remote_files = manifest.len(), "manifest received");

    // Computed once, immutable while transfers run
    let src = source.to_path_buf();
    let dest = dest_root.to_string();
    let plan = tokio::task::spawn_blocking(move || reconcile(&src, &manifest, &dest)).await??;
    tracing::info!(
        new = plan.new_files,
        changed = plan.changed_files,
        unchanged = plan.unchanged_files,
        stale = plan.to_delete.len(),
        "reconciled"
    );

    let outcomes = if opts.dry_run || plan.is_empty() {
        Vec::new()
    } else {
        transfer(opener, source, &plan, dest_root).await
    };

    Ok(SyncReport {
        run_id,
        plan,
        outcomes,
        elapsed: started.elapsed(),
    })
}
