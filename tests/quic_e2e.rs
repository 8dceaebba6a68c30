use anyhow::Result;
use quicsync::client::{fetch_manifest, sync, SyncOptions};
use quicsync::session::{Server, SessionConfig};
use quicsync::transfer::Outcome;
use quicsync::{tls, transport};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

/// Create `rel` under `root` holding `size` bytes of a repeating pattern.
/// Returns the bytes written.
fn put(root: &Path, rel: &str, size: usize) -> Result<Vec<u8>> {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap_or(root))?;
    let body: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, &body)?;
    Ok(body)
}

/// Start a real QUIC server on an ephemeral port
fn start_server(config: SessionConfig) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let tls_config = tls::load_or_generate_server_config(None, None)?;
    let server = Server::bind("127.0.0.1:0".parse()?, tls_config, config)?;
    let addr = server.local_addr()?;
    let task = tokio::spawn(async move {
        let _ = server.run().await;
    });
    Ok((addr, task))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quic_push_delete_and_resync() -> Result<()> {
    let srv_tmp = tempfile::tempdir()?;
    let cli_src = tempfile::tempdir()?;

    put(cli_src.path(), "a.txt", 8 * 1024)?;
    put(cli_src.path(), "dir1/b.bin", 256 * 1024)?;
    let big = put(cli_src.path(), "dir1/dir2/c.dat", 1_100_000)?;
    put(cli_src.path(), "empty.txt", 0)?;
    put(srv_tmp.path(), "dest/stale.txt", 10)?;

    let (addr, server_task) = start_server(SessionConfig::default())?;
    let (endpoint, conn) =
        transport::connect("127.0.0.1", addr.port(), tls::build_client_config()?).await?;
    let opener = Arc::new(conn.clone());
    let dest = srv_tmp.path().join("dest").to_string_lossy().to_string();

    let report = sync(opener.clone(), cli_src.path(), &dest, &SyncOptions::default()).await?;
    assert!(report.is_success(), "{:?}", report.outcomes);
    assert_eq!(report.files_sent(), 4);
    assert_eq!(report.files_deleted(), 1);
    assert_eq!(report.bytes_sent(), 8 * 1024 + 256 * 1024 + 1_100_000);

    assert_eq!(std::fs::read(srv_tmp.path().join("dest/dir1/dir2/c.dat"))?, big);
    assert!(srv_tmp.path().join("dest/empty.txt").exists());
    assert!(!srv_tmp.path().join("dest/stale.txt").exists());

    // Already synchronized: nothing left to do
    let again = sync(opener.clone(), cli_src.path(), &dest, &SyncOptions::default()).await?;
    assert!(again.plan.is_empty());
    assert!(again.outcomes.is_empty());

    // Change one byte of one file: only that file goes again
    std::fs::write(cli_src.path().join("a.txt"), b"changed")?;
    let third = sync(opener.clone(), cli_src.path(), &dest, &SyncOptions::default()).await?;
    assert_eq!(third.plan.changed_files, 1);
    assert!(matches!(&third.outcomes[..], [Outcome::Sent { bytes: 7, .. }]));

    conn.close(0u32.into(), b"done");
    endpoint.wait_idle().await;
    server_task.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quic_manifest_of_missing_root_is_empty() -> Result<()> {
    let srv_tmp = tempfile::tempdir()?;
    let (addr, server_task) = start_server(SessionConfig::default())?;
    let (endpoint, conn) =
        transport::connect("127.0.0.1", addr.port(), tls::build_client_config()?).await?;

    let missing = srv_tmp.path().join("nothing-here").to_string_lossy().to_string();
    let manifest = fetch_manifest(&conn, &missing).await?;
    assert!(manifest.is_empty());

    conn.close(0u32.into(), b"done");
    endpoint.wait_idle().await;
    server_task.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quic_confined_server_rejects_outside_paths() -> Result<()> {
    let srv_tmp = tempfile::tempdir()?;
    let cli_src = tempfile::tempdir()?;
    put(cli_src.path(), "a.txt", 16)?;

    let served = srv_tmp.path().join("served");
    std::fs::create_dir_all(&served)?;
    let (addr, server_task) = start_server(SessionConfig {
        root: Some(served.clone()),
    })?;
    let (endpoint, conn) =
        transport::connect("127.0.0.1", addr.port(), tls::build_client_config()?).await?;
    let opener = Arc::new(conn.clone());

    // Inside the root works
    let inside = served.join("mirror").to_string_lossy().to_string();
    let report = sync(opener.clone(), cli_src.path(), &inside, &SyncOptions::default()).await?;
    assert!(report.is_success());
    assert!(served.join("mirror/a.txt").exists());

    // Outside the root: no manifest, so the run aborts before any transfer
    let outside = srv_tmp.path().join("elsewhere").to_string_lossy().to_string();
    assert!(sync(opener, cli_src.path(), &outside, &SyncOptions::default())
        .await
        .is_err());
    assert!(!srv_tmp.path().join("elsewhere").exists());

    conn.close(0u32.into(), b"done");
    endpoint.wait_idle().await;
    server_task.abort();
    Ok(())
}
