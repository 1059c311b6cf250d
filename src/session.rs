// CLASSIFICATION: COMMUNITY
// Filename: session.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-07-25

//! Per-connection session orchestration.
//!
//! Each accepted client gets one thread that walks the pipeline: parse the
//! handshake, split the branch out of the username, materialize the branch
//! clone, spin up (or reuse) the backend, forward a rewritten startup
//! packet, then splice bytes until either side closes. A failure anywhere
//! before the forwarded startup closes the client with no reply.

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};

use crate::engine::Manager;
use crate::protocol;
use crate::storage::{self, BtrfsDriver, StorageError};

const DIAL_ATTEMPTS: u32 = 30;
const DIAL_TIMEOUT: Duration = Duration::from_secs(2);
const DIAL_RETRY_INTERVAL: Duration = Duration::from_millis(500);
const KEEPALIVE_PERIOD: Duration = Duration::from_secs(5);

/// Accept loop for the gateway endpoint. Spawns one session thread per
/// client connection; accept errors are logged and the loop keeps serving.
pub fn serve(listener: TcpListener, driver: Arc<BtrfsDriver>, manager: Arc<Manager>) -> Result<()> {
    for stream in listener.incoming() {
        match stream {
            Ok(client) => {
                let driver = Arc::clone(&driver);
                let manager = Arc::clone(&manager);
                thread::spawn(move || handle_connection(client, &driver, &manager));
            }
            Err(err) => error!("accept failed: {err}"),
        }
    }
    Ok(())
}

/// Drive one client session to completion, logging the outcome.
pub fn handle_connection(client: TcpStream, driver: &BtrfsDriver, manager: &Arc<Manager>) {
    let remote = client
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_owned());
    if let Err(err) = run_session(client, driver, manager) {
        error!("session failed remote={remote}: {err:#}");
    }
}

fn run_session(mut client: TcpStream, driver: &BtrfsDriver, manager: &Arc<Manager>) -> Result<()> {
    let message = protocol::parse_startup(&mut client).context("handshake failed")?;
    let (real_user, branch_id) = protocol::extract_branch(&message.user)?;
    info!("session start branch={branch_id} user={real_user}");

    // The snapshot may already exist from an earlier session; only an
    // actual tool failure is worth a warning, and even that is non-fatal
    // because the clone below is the authoritative step.
    match driver.create_snapshot(protocol::DEFAULT_BRANCH) {
        Ok(snapshot) => debug!("created snapshot {snapshot}"),
        Err(StorageError::SnapshotExists(snapshot)) => debug!("snapshot {snapshot} already present"),
        Err(err) => warn!("snapshot of {} failed: {err}", protocol::DEFAULT_BRANCH),
    }

    let snapshot = storage::snapshot_id(protocol::DEFAULT_BRANCH);
    let storage_path = driver
        .clone_branch(&snapshot, &branch_id)
        .context("branch clone failed")?;

    let address = manager
        .spin_up(&branch_id, &storage_path)
        .context("backend spin-up failed")?;

    let mut backend = dial_backend(address)?;

    // The rewritten startup must be the backend's very first bytes; the
    // splice only starts once this write has completed.
    backend
        .write_all(&protocol::encode_startup(&real_user, &message.database))
        .context("failed to forward startup")?;

    info!("proxying branch={branch_id} backend={address}");
    let _keepalive = Keepalive::spawn(Arc::clone(manager), branch_id.clone(), KEEPALIVE_PERIOD);
    splice(client, backend).context("splice setup failed")?;
    info!("session closed branch={branch_id}");
    Ok(())
}

/// Dial the backend with a bounded retry budget; a freshly started engine
/// may take a few seconds to accept connections.
fn dial_backend(address: SocketAddr) -> Result<TcpStream> {
    let mut last_error: Option<io::Error> = None;
    for attempt in 1..=DIAL_ATTEMPTS {
        debug!("dialing backend attempt={attempt} address={address}");
        match TcpStream::connect_timeout(&address, DIAL_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                last_error = Some(err);
                thread::sleep(DIAL_RETRY_INTERVAL);
            }
        }
    }
    Err(anyhow!(
        "backend unreachable at {address} after {DIAL_ATTEMPTS} attempts: {}",
        last_error.map(|err| err.to_string()).unwrap_or_default()
    ))
}

/// Ticker keeping a branch's registry entry fresh while its session lives.
///
/// The thread parks on the channel; dropping the handle disconnects it and
/// the ticker exits within one period, so long-running gateways do not
/// accumulate stray threads.
struct Keepalive {
    _stop: mpsc::Sender<()>,
}

impl Keepalive {
    fn spawn(manager: Arc<Manager>, branch_id: String, period: Duration) -> Self {
        let (stop, parked) = mpsc::channel::<()>();
        thread::spawn(move || loop {
            match parked.recv_timeout(period) {
                Err(RecvTimeoutError::Timeout) => manager.touch(&branch_id),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        Self { _stop: stop }
    }
}

/// Bidirectional byte copy between the client and backend sockets.
///
/// Each copy loop shuts down the socket it writes to when it ends; the
/// splicer returns once the first loop finishes and shuts down the peer,
/// which unblocks the other loop. No buffering beyond `io::copy`.
pub fn splice(client: TcpStream, backend: TcpStream) -> io::Result<()> {
    let (done, finished) = mpsc::channel::<()>();
    let forward = copy_loop(client.try_clone()?, backend.try_clone()?, done.clone());
    let reverse = copy_loop(backend.try_clone()?, client.try_clone()?, done);

    let _ = finished.recv();
    let _ = client.shutdown(Shutdown::Both);
    let _ = backend.shutdown(Shutdown::Both);
    let _ = forward.join();
    let _ = reverse.join();
    Ok(())
}

fn copy_loop(
    mut from: TcpStream,
    mut to: TcpStream,
    done: mpsc::Sender<()>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let _ = io::copy(&mut from, &mut to);
        let _ = to.shutdown(Shutdown::Both);
        let _ = done.send(());
    })
}
