// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-07-25

//! Backend lifecycle manager.
//!
//! Owns the liveness registry (branch id → last-active timestamp) and the
//! create-or-reuse protocol against the container runtime. Guarantees at
//! most one backend per branch: the backend's canonical name is the
//! uniqueness key in the runtime, and creation is serialized per branch.

mod docker;

pub use docker::DockerCli;

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};

use log::{error, info};

/// Port the database engine listens on inside its container.
pub const BACKEND_PORT: u16 = 5432;

/// Data directory of the database engine inside its container; the branch
/// clone is bind-mounted here.
pub const BACKEND_DATA_DIR: &str = "/var/lib/postgresql/data";

/// Default credentials and database name handed to new backends.
pub const BACKEND_ENV: [(&str, &str); 3] = [
    ("POSTGRES_USER", "postgres"),
    ("POSTGRES_PASSWORD", "password"),
    ("POSTGRES_DB", "postgres"),
];

/// Graceful timeout passed to the runtime when the reaper stops a backend.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// Settle time after starting a backend, allowing the port binding to
/// appear before the first dial.
const START_SETTLE: Duration = Duration::from_millis(100);

/// Canonical runtime name of the backend serving `branch_id`.
pub fn backend_name(branch_id: &str) -> String {
    format!("prism-{branch_id}")
}

/// Parameters for creating a backend container.
#[derive(Debug, Clone)]
pub struct BackendSpec {
    /// Canonical container name (`prism-<branch_id>`).
    pub name: String,
    /// Database image to run.
    pub image: String,
    /// Pre-existing isolation network to attach to.
    pub network: String,
    /// Branch clone bind-mounted to [`BACKEND_DATA_DIR`].
    pub data_source: PathBuf,
}

/// What the runtime knows about an existing backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendStatus {
    /// Opaque runtime instance id.
    pub id: String,
    /// Whether the instance is currently running.
    pub running: bool,
}

/// Errors reported by the backend manager and its runtime.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The runtime could not be reached or a query against it failed.
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),
    /// Creating a backend failed.
    #[error("backend create failed: {0}")]
    CreateFailed(String),
    /// Starting a backend failed.
    #[error("backend start failed: {0}")]
    StartFailed(String),
    /// A running backend exposes no host binding for [`BACKEND_PORT`].
    #[error("no host port binding for backend {0}")]
    NoPortBinding(String),
}

/// Contract against the external container runtime.
///
/// The production implementation shells out to the `docker` CLI; tests run
/// against an in-process fake so the orchestration logic is exercised
/// without a daemon.
pub trait ContainerRuntime: Send + Sync {
    /// Look a backend up by canonical name across all states.
    fn find_by_name(&self, name: &str) -> Result<Option<BackendStatus>, EngineError>;
    /// Create a backend per `spec` and return its instance id.
    fn create(&self, spec: &BackendSpec) -> Result<String, EngineError>;
    /// Start a created or stopped backend.
    fn start(&self, id: &str) -> Result<(), EngineError>;
    /// Stop a backend by canonical name with a graceful timeout.
    fn stop(&self, name: &str, grace: Duration) -> Result<(), EngineError>;
    /// Host port bound to [`BACKEND_PORT`], if any.
    fn host_port(&self, id: &str) -> Result<Option<u16>, EngineError>;
}

/// Backend manager: liveness registry plus create-or-reuse orchestration.
pub struct Manager {
    runtime: Box<dyn ContainerRuntime>,
    image: String,
    network: String,
    registry: Mutex<HashMap<String, SystemTime>>,
    creation_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Manager {
    /// Build a manager over `runtime` using `image` for new backends on
    /// `network`.
    pub fn new(
        runtime: Box<dyn ContainerRuntime>,
        image: impl Into<String>,
        network: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            image: image.into(),
            network: network.into(),
            registry: Mutex::new(HashMap::new()),
            creation_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Mark `branch_id` active now; inserts the entry if absent.
    pub fn touch(&self, branch_id: &str) {
        let mut registry = self.registry.lock().expect("registry lock poisoned");
        registry.insert(branch_id.to_owned(), SystemTime::now());
    }

    /// Independent copy of the registry; readers never observe partial
    /// updates.
    pub fn list_branches(&self) -> HashMap<String, SystemTime> {
        self.registry.lock().expect("registry lock poisoned").clone()
    }

    /// Ensure a running backend exists for `branch_id` bound to
    /// `storage_path` and return its loopback address.
    ///
    /// Reuses an existing backend (starting it first if stopped);
    /// otherwise creates one. Concurrent calls for the same branch are
    /// serialized, so exactly one of them creates.
    pub fn spin_up(&self, branch_id: &str, storage_path: &Path) -> Result<SocketAddr, EngineError> {
        self.touch(branch_id);
        let slot = self.creation_lock(branch_id);
        let _serialized = slot.lock().expect("branch lock poisoned");

        let name = backend_name(branch_id);
        if let Some(existing) = self.runtime.find_by_name(&name)? {
            if !existing.running {
                info!("restarting stopped backend name={name}");
                self.runtime.start(&existing.id)?;
                thread::sleep(START_SETTLE);
            }
            return self.bound_address(&existing.id, &name);
        }

        info!("creating backend name={name} data={}", storage_path.display());
        let spec = BackendSpec {
            name: name.clone(),
            image: self.image.clone(),
            network: self.network.clone(),
            data_source: storage_path.to_path_buf(),
        };
        let id = self.runtime.create(&spec)?;
        self.runtime.start(&id)?;
        thread::sleep(START_SETTLE);
        self.bound_address(&id, &name)
    }

    /// Spawn the periodic reaper thread.
    pub fn start_reaper(self: &Arc<Self>, interval: Duration, idle_threshold: Duration) {
        let manager = Arc::clone(self);
        thread::spawn(move || loop {
            thread::sleep(interval);
            manager.reap(idle_threshold);
        });
    }

    /// One reaper pass: stop and deregister backends idle beyond
    /// `idle_threshold`.
    ///
    /// Candidates are snapshotted under the registry lock, stops happen
    /// without it, and an entry is deleted only if its timestamp did not
    /// advance while the stop was in flight.
    fn reap(&self, idle_threshold: Duration) {
        let now = SystemTime::now();
        let candidates: Vec<(String, SystemTime)> = {
            let registry = self.registry.lock().expect("registry lock poisoned");
            registry
                .iter()
                .filter(|(_, last_active)| {
                    now.duration_since(**last_active)
                        .map(|idle| idle > idle_threshold)
                        .unwrap_or(false)
                })
                .map(|(branch, last_active)| (branch.clone(), *last_active))
                .collect()
        };

        for (branch, seen_at) in candidates {
            let name = backend_name(&branch);
            info!("reaper: stopping idle backend branch={branch}");
            match self.runtime.stop(&name, STOP_GRACE) {
                Ok(()) => {
                    let mut registry = self.registry.lock().expect("registry lock poisoned");
                    if registry.get(&branch) == Some(&seen_at) {
                        registry.remove(&branch);
                    }
                }
                Err(err) => error!("reaper: failed to stop branch={branch}: {err}"),
            }
        }
    }

    fn bound_address(&self, id: &str, name: &str) -> Result<SocketAddr, EngineError> {
        match self.runtime.host_port(id)? {
            Some(port) => Ok(SocketAddr::from((Ipv4Addr::LOCALHOST, port))),
            None => Err(EngineError::NoPortBinding(name.to_owned())),
        }
    }

    fn creation_lock(&self, branch_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.creation_locks.lock().expect("branch lock map poisoned");
        Arc::clone(locks.entry(branch_id.to_owned()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeState {
        backends: Mutex<HashMap<String, (BackendStatus, u16)>>,
        create_calls: AtomicUsize,
        start_calls: AtomicUsize,
        fail_stops: AtomicBool,
        stop_delay_ms: AtomicUsize,
        expose_ports: AtomicBool,
    }

    #[derive(Clone)]
    struct FakeRuntime {
        state: Arc<FakeState>,
    }

    impl FakeRuntime {
        fn new() -> Self {
            let state = FakeState::default();
            state.expose_ports.store(true, Ordering::SeqCst);
            Self { state: Arc::new(state) }
        }

        fn running(&self, name: &str) -> Option<bool> {
            let backends = self.state.backends.lock().unwrap();
            backends.get(name).map(|(status, _)| status.running)
        }
    }

    impl ContainerRuntime for FakeRuntime {
        fn find_by_name(&self, name: &str) -> Result<Option<BackendStatus>, EngineError> {
            let backends = self.state.backends.lock().unwrap();
            Ok(backends.get(name).map(|(status, _)| status.clone()))
        }

        fn create(&self, spec: &BackendSpec) -> Result<String, EngineError> {
            let ordinal = self.state.create_calls.fetch_add(1, Ordering::SeqCst);
            let id = format!("fake-{ordinal}");
            let port = 42_000 + ordinal as u16;
            let mut backends = self.state.backends.lock().unwrap();
            backends.insert(
                spec.name.clone(),
                (BackendStatus { id: id.clone(), running: false }, port),
            );
            Ok(id)
        }

        fn start(&self, id: &str) -> Result<(), EngineError> {
            self.state.start_calls.fetch_add(1, Ordering::SeqCst);
            let mut backends = self.state.backends.lock().unwrap();
            for (status, _) in backends.values_mut() {
                if status.id == id {
                    status.running = true;
                    return Ok(());
                }
            }
            Err(EngineError::StartFailed(format!("unknown id {id}")))
        }

        fn stop(&self, name: &str, _grace: Duration) -> Result<(), EngineError> {
            let delay = self.state.stop_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                thread::sleep(Duration::from_millis(delay as u64));
            }
            if self.state.fail_stops.load(Ordering::SeqCst) {
                return Err(EngineError::RuntimeUnavailable("stop refused".into()));
            }
            let mut backends = self.state.backends.lock().unwrap();
            match backends.get_mut(name) {
                Some((status, _)) => {
                    status.running = false;
                    Ok(())
                }
                None => Err(EngineError::RuntimeUnavailable(format!("unknown name {name}"))),
            }
        }

        fn host_port(&self, id: &str) -> Result<Option<u16>, EngineError> {
            if !self.state.expose_ports.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let backends = self.state.backends.lock().unwrap();
            Ok(backends
                .values()
                .find(|(status, _)| status.id == id)
                .map(|(_, port)| *port))
        }
    }

    fn manager_with(runtime: FakeRuntime) -> Arc<Manager> {
        Arc::new(Manager::new(
            Box::new(runtime),
            "postgres:15-alpine",
            "prism-net",
        ))
    }

    #[test]
    fn spin_up_creates_then_reuses() {
        let runtime = FakeRuntime::new();
        let manager = manager_with(runtime.clone());
        let data = Path::new("/mnt/prism_data/feature1");

        let first = manager.spin_up("feature1", data).expect("first spin-up");
        let second = manager.spin_up("feature1", data).expect("second spin-up");

        assert_eq!(first, second);
        assert_eq!(runtime.state.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.state.start_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn spin_up_restarts_stopped_backend() {
        let runtime = FakeRuntime::new();
        let manager = manager_with(runtime.clone());
        let data = Path::new("/mnt/prism_data/feature1");

        let first = manager.spin_up("feature1", data).expect("spin-up");
        runtime.stop(&backend_name("feature1"), STOP_GRACE).expect("stop");

        let second = manager.spin_up("feature1", data).expect("restart spin-up");
        assert_eq!(first, second);
        assert_eq!(runtime.state.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.state.start_calls.load(Ordering::SeqCst), 2);
        assert_eq!(runtime.running(&backend_name("feature1")), Some(true));
    }

    #[test]
    fn concurrent_spin_ups_create_once() {
        let runtime = FakeRuntime::new();
        let manager = manager_with(runtime.clone());

        let mut workers = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            workers.push(thread::spawn(move || {
                manager
                    .spin_up("feature1", Path::new("/mnt/prism_data/feature1"))
                    .expect("spin-up")
            }));
        }
        let addresses: Vec<SocketAddr> =
            workers.into_iter().map(|w| w.join().expect("join")).collect();

        assert_eq!(runtime.state.create_calls.load(Ordering::SeqCst), 1);
        assert!(addresses.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn spin_up_without_binding_fails() {
        let runtime = FakeRuntime::new();
        runtime.state.expose_ports.store(false, Ordering::SeqCst);
        let manager = manager_with(runtime);

        let err = manager
            .spin_up("feature1", Path::new("/mnt/prism_data/feature1"))
            .expect_err("no binding");
        assert!(matches!(err, EngineError::NoPortBinding(_)));
    }

    #[test]
    fn touch_registers_and_list_copies() {
        let manager = manager_with(FakeRuntime::new());
        manager.touch("master");

        let mut listed = manager.list_branches();
        assert!(listed.contains_key("master"));
        listed.clear();
        assert!(manager.list_branches().contains_key("master"));
    }

    #[test]
    fn reap_stops_and_deregisters_idle_backend() {
        let runtime = FakeRuntime::new();
        let manager = manager_with(runtime.clone());
        manager
            .spin_up("tmp", Path::new("/mnt/prism_data/tmp"))
            .expect("spin-up");

        thread::sleep(Duration::from_millis(60));
        manager.reap(Duration::from_millis(20));

        assert!(!manager.list_branches().contains_key("tmp"));
        assert_eq!(runtime.running(&backend_name("tmp")), Some(false));
    }

    #[test]
    fn reap_spares_active_branches() {
        let manager = manager_with(FakeRuntime::new());
        manager.touch("busy");
        manager.reap(Duration::from_secs(30));
        assert!(manager.list_branches().contains_key("busy"));
    }

    #[test]
    fn reap_failure_leaves_entry_for_retry() {
        let runtime = FakeRuntime::new();
        let manager = manager_with(runtime.clone());
        manager
            .spin_up("tmp", Path::new("/mnt/prism_data/tmp"))
            .expect("spin-up");
        runtime.state.fail_stops.store(true, Ordering::SeqCst);

        thread::sleep(Duration::from_millis(60));
        manager.reap(Duration::from_millis(20));

        assert!(manager.list_branches().contains_key("tmp"));
    }

    #[test]
    fn reap_keeps_entries_touched_mid_stop() {
        let runtime = FakeRuntime::new();
        let manager = manager_with(runtime.clone());
        manager
            .spin_up("tmp", Path::new("/mnt/prism_data/tmp"))
            .expect("spin-up");
        runtime.state.stop_delay_ms.store(80, Ordering::SeqCst);

        thread::sleep(Duration::from_millis(60));
        let reaper = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.reap(Duration::from_millis(20)))
        };
        // Touch while the stop is in flight; the entry must survive.
        thread::sleep(Duration::from_millis(30));
        manager.touch("tmp");
        reaper.join().expect("join");

        assert!(manager.list_branches().contains_key("tmp"));
    }

    #[test]
    fn backend_names_carry_branch_suffix() {
        assert_eq!(backend_name("master"), "prism-master");
        assert_eq!(backend_name("feature1"), "prism-feature1");
    }
}
