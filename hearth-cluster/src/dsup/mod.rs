//! Distributed supervisor: cluster-wide child placement and failover.
//!
//! Extends the local supervision model across nodes. Children are behaviors
//! referenced by name, placed through a node selector, registered in the
//! global registry under `dsup:{supervisor_id}:{child_id}`, and monitored
//! three ways: exit hooks for local children, `Down` notices for remote
//! children on surviving nodes, and membership node-loss events for
//! everything else.
//!
//! On node loss, each orphaned child is claimed through the global registry
//! before it is respawned elsewhere; a failed claim means another supervisor
//! owns the child (split-brain protection) and the local supervisor backs
//! off.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use chrono::Utc;
use rand::Rng;
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

// Layer 3: Internal module imports
use crate::cluster::{Cluster, RemoteDown, RemoteHandle};
use crate::error::ClusterError;
use crate::global::GlobalEntry;
use crate::membership::MembershipEvent;
use crate::node::NodeId;
use hearth_rt::{ExitReason, RestartWindow, Strategy, SupervisorError};

pub mod types;

pub use types::{
    DistChildInfo, DistChildSpec, DistSupervisorOptions, DsupEvent, NodeSelector, SelectorFn,
};

use types::registration_key;

/// Capacity of the supervisor event channel.
const DSUP_CHANNEL_CAPACITY: usize = 128;

/// Notification from a local child's exit hook.
struct LocalExit {
    child_id: String,
    server_id: Uuid,
    reason: ExitReason,
}

/// Bookkeeping for one distributed child.
struct DistEntry {
    spec: DistChildSpec,
    handle: RemoteHandle,
    restart_count: u32,
}

struct DsupState {
    entries: Vec<DistEntry>,
    window: RestartWindow,
    rr_counter: usize,
}

struct Shared {
    id: String,
    strategy: Strategy,
    default_selector: NodeSelector,
    cluster: Cluster,
    state: tokio::sync::Mutex<DsupState>,
    events: broadcast::Sender<DsupEvent>,
    internal_tx: mpsc::UnboundedSender<LocalExit>,
    running: AtomicBool,
    failure: parking_lot::Mutex<Option<String>>,
}

/// A supervisor whose children may live on any connected node.
pub struct DistributedSupervisor {
    shared: Arc<Shared>,
    monitor: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl DistributedSupervisor {
    /// Start a distributed supervisor on an already-started cluster.
    ///
    /// Static children are placed and started in declaration order; if any
    /// spawn fails, the children already started are torn down in reverse
    /// order and this call fails.
    pub async fn start(
        cluster: Cluster,
        options: DistSupervisorOptions,
    ) -> Result<Self, ClusterError> {
        options.validate()?;
        if cluster.local_id().is_none() {
            return Err(ClusterError::NotRunning {
                reason: "cluster not started".into(),
            });
        }

        let (events, _) = broadcast::channel(DSUP_CHANNEL_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            id: options.id.clone(),
            strategy: options.strategy,
            default_selector: options.default_selector.clone(),
            cluster,
            state: tokio::sync::Mutex::new(DsupState {
                entries: Vec::new(),
                window: RestartWindow::new(options.max_restarts, options.within),
                rr_counter: 0,
            }),
            events,
            internal_tx,
            running: AtomicBool::new(true),
            failure: parking_lot::Mutex::new(None),
        });

        {
            let mut state = shared.state.lock().await;
            for spec in options.children {
                match start_entry(&shared, &mut state, spec, None).await {
                    Ok(entry) => {
                        emit(
                            &shared,
                            DsupEvent::ChildStarted {
                                child_id: entry.spec.id.clone(),
                                node: entry.handle.node_id.clone(),
                            },
                        );
                        state.entries.push(entry);
                    }
                    Err(err) => {
                        while let Some(entry) = state.entries.pop() {
                            teardown_entry(&shared, &entry);
                        }
                        shared.running.store(false, Ordering::Release);
                        return Err(err);
                    }
                }
            }
        }

        let monitor = tokio::spawn(monitor_loop(Arc::clone(&shared), internal_rx));
        Ok(DistributedSupervisor {
            shared,
            monitor: parking_lot::Mutex::new(Some(monitor)),
        })
    }

    /// The supervisor id used in registration keys.
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Whether the supervisor is still supervising.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// The failure that shut the supervisor down, if any.
    pub fn failure(&self) -> Option<String> {
        self.shared.failure.lock().clone()
    }

    /// Subscribe to supervisor events.
    pub fn subscribe(&self) -> broadcast::Receiver<DsupEvent> {
        self.shared.events.subscribe()
    }

    /// Describe all current children in declaration order.
    pub async fn get_children(&self) -> Vec<DistChildInfo> {
        let state = self.shared.state.lock().await;
        state
            .entries
            .iter()
            .map(|entry| DistChildInfo {
                id: entry.spec.id.clone(),
                handle: entry.handle.clone(),
                restart_count: entry.restart_count,
            })
            .collect()
    }

    /// The current handle of one child.
    pub async fn child_handle(&self, id: &str) -> Option<RemoteHandle> {
        let state = self.shared.state.lock().await;
        state
            .entries
            .iter()
            .find(|entry| entry.spec.id == id)
            .map(|entry| entry.handle.clone())
    }

    /// Add and start a child.
    pub async fn start_child(&self, spec: DistChildSpec) -> Result<RemoteHandle, ClusterError> {
        self.require_running()?;
        if spec.id.is_empty() || spec.id.contains(':') {
            return Err(ClusterError::InvalidConfig {
                reason: format!("invalid child id '{}'", spec.id),
            });
        }

        let mut state = self.shared.state.lock().await;
        if state.entries.iter().any(|entry| entry.spec.id == spec.id) {
            return Err(SupervisorError::DuplicateChild { id: spec.id }.into());
        }
        let entry = start_entry(&self.shared, &mut state, spec, None).await?;
        let handle = entry.handle.clone();
        emit(
            &self.shared,
            DsupEvent::ChildStarted {
                child_id: entry.spec.id.clone(),
                node: handle.node_id.clone(),
            },
        );
        state.entries.push(entry);
        Ok(handle)
    }

    /// Stop a child and remove it from the supervisor.
    pub async fn terminate_child(&self, id: &str) -> Result<(), ClusterError> {
        self.require_running()?;
        let mut state = self.shared.state.lock().await;
        let index = state
            .entries
            .iter()
            .position(|entry| entry.spec.id == id)
            .ok_or_else(|| SupervisorError::ChildNotFound { id: id.to_string() })?;
        let entry = state.entries.remove(index);
        teardown_entry(&self.shared, &entry);
        Ok(())
    }

    /// Stop and respawn a child through its selector, returning the new
    /// handle.
    pub async fn restart_child(&self, id: &str) -> Result<RemoteHandle, ClusterError> {
        self.require_running()?;
        let mut state = self.shared.state.lock().await;
        let index = state
            .entries
            .iter()
            .position(|entry| entry.spec.id == id)
            .ok_or_else(|| SupervisorError::ChildNotFound { id: id.to_string() })?;

        self.shared.cluster.stop_actor(&state.entries[index].handle);
        let node = respawn_entry(&self.shared, &mut state, index, None).await?;
        state.entries[index].restart_count += 1;
        emit(
            &self.shared,
            DsupEvent::ChildRestarted {
                child_id: id.to_string(),
                node,
            },
        );
        Ok(state.entries[index].handle.clone())
    }

    /// Stop the supervisor: children are stopped in reverse declaration
    /// order and every owned `dsup:` registration is removed.
    pub async fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.monitor.lock().take() {
            task.abort();
        }

        let mut state = self.shared.state.lock().await;
        while let Some(entry) = state.entries.pop() {
            teardown_entry(&self.shared, &entry);
        }
        // Belt and braces: clear any leftover registrations under our key
        // prefix.
        let prefix = registration_key(&self.shared.id, "");
        for name in self.shared.cluster.global().names_with_prefix(&prefix) {
            let _ = self.shared.cluster.global().unregister(&name);
        }
        emit(
            &self.shared,
            DsupEvent::Terminated {
                reason: "shutdown".into(),
            },
        );
    }

    fn require_running(&self) -> Result<(), ClusterError> {
        if self.is_running() {
            return Ok(());
        }
        Err(ClusterError::NotRunning {
            reason: self
                .failure()
                .unwrap_or_else(|| "distributed supervisor stopped".into()),
        })
    }
}

impl std::fmt::Debug for DistributedSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedSupervisor")
            .field("id", &self.shared.id)
            .field("running", &self.is_running())
            .finish()
    }
}

fn emit(shared: &Shared, event: DsupEvent) {
    let _ = shared.events.send(event);
}

/// Place, spawn, register, and monitor one child.
async fn start_entry(
    shared: &Arc<Shared>,
    state: &mut DsupState,
    spec: DistChildSpec,
    exclude: Option<&NodeId>,
) -> Result<DistEntry, ClusterError> {
    let node = select_node(shared, state, &spec, exclude)?;
    let handle = shared
        .cluster
        .spawn_on(&node, &spec.behavior_name, spec.args.clone())
        .await?;

    let key = registration_key(&shared.id, &spec.id);
    let entry = GlobalEntry::new(node, child_metadata(shared, &spec.id, &handle));
    if let Err(err) = shared.cluster.global().register(key.as_str(), entry) {
        shared.cluster.stop_actor(&handle);
        return Err(err);
    }
    install_local_monitor(shared, &spec.id, &handle);

    Ok(DistEntry {
        spec,
        handle,
        restart_count: 0,
    })
}

/// Respawn the child at `index` through its selector, replacing its handle
/// and registration. Returns the node it landed on.
async fn respawn_entry(
    shared: &Arc<Shared>,
    state: &mut DsupState,
    index: usize,
    exclude: Option<&NodeId>,
) -> Result<NodeId, ClusterError> {
    let spec = state.entries[index].spec.clone();
    let key = registration_key(&shared.id, &spec.id);
    let _ = shared.cluster.global().unregister(&key);

    let node = select_node(shared, state, &spec, exclude)?;
    let handle = shared
        .cluster
        .spawn_on(&node, &spec.behavior_name, spec.args.clone())
        .await?;

    let entry = GlobalEntry::new(node.clone(), child_metadata(shared, &spec.id, &handle));
    if let Err(err) = shared.cluster.global().register(key.as_str(), entry) {
        shared.cluster.stop_actor(&handle);
        return Err(err);
    }
    install_local_monitor(shared, &spec.id, &handle);

    state.entries[index].handle = handle;
    Ok(node)
}

fn child_metadata(shared: &Shared, child_id: &str, handle: &RemoteHandle) -> serde_json::Value {
    json!({
        "server_id": handle.server_id.to_string(),
        "supervisor_id": shared.id,
        "child_id": child_id,
        "registered_at": Utc::now().to_rfc3339(),
    })
}

fn teardown_entry(shared: &Shared, entry: &DistEntry) {
    shared.cluster.stop_actor(&entry.handle);
    let key = registration_key(&shared.id, &entry.spec.id);
    let _ = shared.cluster.global().unregister(&key);
}

/// Watch a locally placed child through its exit hook.
fn install_local_monitor(shared: &Arc<Shared>, child_id: &str, handle: &RemoteHandle) {
    if shared.cluster.local_id().as_ref() != Some(&handle.node_id) {
        return;
    }
    if let Some(cell) = shared.cluster.exported_cell(&handle.server_id) {
        let tx = shared.internal_tx.clone();
        let child_id = child_id.to_string();
        let server_id = handle.server_id;
        cell.on_exit(move |reason| {
            let _ = tx.send(LocalExit {
                child_id,
                server_id,
                reason: reason.clone(),
            });
        });
    }
}

fn select_node(
    shared: &Shared,
    state: &mut DsupState,
    spec: &DistChildSpec,
    exclude: Option<&NodeId>,
) -> Result<NodeId, ClusterError> {
    let mut candidates: Vec<NodeId> = shared
        .cluster
        .placement_candidates()
        .into_iter()
        .filter(|node| Some(node) != exclude)
        .collect();
    candidates.sort_by_key(|node| node.to_string());
    if candidates.is_empty() {
        return Err(ClusterError::NodeNotConnected {
            node_id: "<no placement candidates>".into(),
        });
    }

    let selector = spec.selector.as_ref().unwrap_or(&shared.default_selector);
    match selector {
        NodeSelector::LocalFirst => Ok(shared
            .cluster
            .local_id()
            .filter(|local| candidates.contains(local))
            .unwrap_or_else(|| candidates[0].clone())),
        NodeSelector::RoundRobin => {
            let index = state.rr_counter % candidates.len();
            state.rr_counter += 1;
            Ok(candidates[index].clone())
        }
        NodeSelector::LeastLoaded => Ok(candidates
            .iter()
            .min_by_key(|node| shared.cluster.process_count_of(node))
            .cloned()
            .unwrap_or_else(|| candidates[0].clone())),
        NodeSelector::Random => {
            let index = rand::thread_rng().gen_range(0..candidates.len());
            Ok(candidates[index].clone())
        }
        NodeSelector::Pinned(node) => {
            if candidates.contains(node) {
                Ok(node.clone())
            } else {
                Err(ClusterError::NodeNotConnected {
                    node_id: node.to_string(),
                })
            }
        }
        NodeSelector::Custom(select) => select(&candidates, &spec.id).ok_or_else(|| {
            ClusterError::NodeNotConnected {
                node_id: "<custom selector declined>".into(),
            }
        }),
    }
}

async fn monitor_loop(shared: Arc<Shared>, mut internal_rx: mpsc::UnboundedReceiver<LocalExit>) {
    let mut members = shared.cluster.subscribe();
    let mut downs = shared.cluster.subscribe_remote_downs();

    loop {
        tokio::select! {
            exit = internal_rx.recv() => match exit {
                Some(exit) => handle_local_exit(&shared, exit).await,
                None => break,
            },
            event = members.recv() => match event {
                Ok(MembershipEvent::NodeDown { id, .. }) => {
                    handle_node_loss(&shared, id).await;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            down = downs.recv() => match down {
                Ok(down) => handle_remote_down(&shared, down).await,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
        if !shared.running.load(Ordering::Acquire) {
            break;
        }
    }
}

async fn handle_local_exit(shared: &Arc<Shared>, exit: LocalExit) {
    if !shared.running.load(Ordering::Acquire) {
        return;
    }
    let mut state = shared.state.lock().await;
    let Some(index) = state.entries.iter().position(|entry| {
        entry.spec.id == exit.child_id && entry.handle.server_id == exit.server_id
    }) else {
        return;
    };
    debug!(child = %exit.child_id, reason = %exit.reason, "local child exited");
    restart_after_failure(shared, &mut state, index, exit.reason.is_abnormal(), None).await;
}

async fn handle_remote_down(shared: &Arc<Shared>, down: RemoteDown) {
    if !shared.running.load(Ordering::Acquire) {
        return;
    }
    let mut state = shared.state.lock().await;
    let Some(index) = state.entries.iter().position(|entry| {
        entry.handle.server_id == down.server_id && entry.handle.node_id == down.node_id
    }) else {
        return;
    };
    let abnormal = down.reason.starts_with("crash");
    debug!(child = %state.entries[index].spec.id, reason = %down.reason, "remote child down");
    restart_after_failure(shared, &mut state, index, abnormal, None).await;
}

/// Apply the strategy after one child exited (crash or policy-relevant
/// normal exit).
async fn restart_after_failure(
    shared: &Arc<Shared>,
    state: &mut DsupState,
    index: usize,
    abnormal: bool,
    exclude: Option<&NodeId>,
) {
    if !state.entries[index].spec.restart.should_restart(abnormal) {
        let entry = state.entries.remove(index);
        let key = registration_key(&shared.id, &entry.spec.id);
        let _ = shared.cluster.global().unregister(&key);
        return;
    }

    let victims: Vec<usize> = match shared.strategy {
        Strategy::OneForOne | Strategy::SimpleOneForOne => vec![index],
        Strategy::OneForAll => (0..state.entries.len()).collect(),
        Strategy::RestForOne => (index..state.entries.len()).collect(),
    };

    if !state.window.record() {
        shut_down_failed(shared, state).await;
        return;
    }

    // Stop healthy victims in reverse declaration order; the failed child
    // is already gone.
    for &i in victims.iter().rev() {
        if i != index {
            shared.cluster.stop_actor(&state.entries[i].handle);
        }
    }

    for &i in victims.iter() {
        let from = state.entries[i].handle.node_id.clone();
        loop {
            match respawn_entry(shared, state, i, exclude).await {
                Ok(to) => {
                    let child_id = state.entries[i].spec.id.clone();
                    if i == index {
                        state.entries[i].restart_count += 1;
                    }
                    if to == from {
                        emit(shared, DsupEvent::ChildRestarted { child_id, node: to });
                    } else {
                        emit(shared, DsupEvent::ChildMigrated { child_id, from: from.clone(), to });
                    }
                    break;
                }
                Err(err) => {
                    warn!(
                        child = %state.entries[i].spec.id,
                        error = %err,
                        "restart attempt failed"
                    );
                    if !state.window.record() {
                        shut_down_failed(shared, state).await;
                        return;
                    }
                }
            }
        }
    }
}

/// Failover after a node was lost: claim each orphaned child and respawn it
/// on a surviving node.
async fn handle_node_loss(shared: &Arc<Shared>, failed: NodeId) {
    if !shared.running.load(Ordering::Acquire) {
        return;
    }
    let mut state = shared.state.lock().await;
    let orphans: Vec<String> = state
        .entries
        .iter()
        .filter(|entry| entry.handle.node_id == failed)
        .map(|entry| entry.spec.id.clone())
        .collect();
    if orphans.is_empty() {
        return;
    }
    emit(
        shared,
        DsupEvent::NodeFailureDetected {
            node: failed.clone(),
        },
    );

    for child_id in orphans {
        let Some(index) = state.entries.iter().position(|entry| {
            entry.spec.id == child_id && entry.handle.node_id == failed
        }) else {
            continue;
        };

        // Node loss is an abnormal exit for policy purposes.
        if !state.entries[index].spec.restart.should_restart(true) {
            let entry = state.entries.remove(index);
            let key = registration_key(&shared.id, &entry.spec.id);
            let _ = shared.cluster.global().try_claim(&key, &shared.id);
            continue;
        }

        if !state.window.record() {
            shut_down_failed(shared, &mut state).await;
            return;
        }

        // Claim before respawning: exactly one supervisor may own the slot.
        let key = registration_key(&shared.id, &child_id);
        match shared.cluster.global().try_claim(&key, &shared.id) {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!(child = %child_id, "registration already claimed elsewhere; skipping");
                state.entries.remove(index);
                continue;
            }
            Err(ClusterError::ChildClaim { owner, .. }) => {
                warn!(child = %child_id, owner = %owner, "failover claim rejected");
                emit(
                    shared,
                    DsupEvent::ClaimRejected {
                        child_id: child_id.clone(),
                        owner,
                    },
                );
                state.entries.remove(index);
                continue;
            }
            Err(err) => {
                warn!(child = %child_id, error = %err, "failover claim failed");
                continue;
            }
        }

        loop {
            match respawn_entry(shared, &mut state, index, Some(&failed)).await {
                Ok(to) => {
                    state.entries[index].restart_count += 1;
                    emit(
                        shared,
                        DsupEvent::ChildMigrated {
                            child_id: child_id.clone(),
                            from: failed.clone(),
                            to,
                        },
                    );
                    break;
                }
                Err(err) => {
                    warn!(child = %child_id, error = %err, "failover respawn failed");
                    if !state.window.record() {
                        shut_down_failed(shared, &mut state).await;
                        return;
                    }
                }
            }
        }
    }
}

/// Intensity breached: tear everything down and record the failure.
async fn shut_down_failed(shared: &Arc<Shared>, state: &mut DsupState) {
    let failure = SupervisorError::MaxRestartsExceeded {
        max_restarts: state.window.max_restarts(),
        within: state.window.within(),
    };
    error!(supervisor = %shared.id, error = %failure, "distributed supervisor shutting down");

    shared.running.store(false, Ordering::Release);
    *shared.failure.lock() = Some(failure.to_string());
    while let Some(entry) = state.entries.pop() {
        teardown_entry(shared, &entry);
    }
    emit(
        shared,
        DsupEvent::Terminated {
            reason: failure.to_string(),
        },
    );
}
