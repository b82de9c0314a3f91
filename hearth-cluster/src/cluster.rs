//! The cluster service: transport + membership + remote invocation.
//!
//! `Cluster` is the composition root of the distributed layer. It owns the
//! transport, the peer table, the pending-request correlation table, the
//! behavior registry, the global name registry, and the table of exported
//! actors addressable from other nodes. One dispatch task consumes
//! transport events and routes inbound frames; a heartbeat task announces
//! the local node; a sweeper task detects silent peers.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

// Layer 3: Internal module imports
use crate::behavior::{BehaviorRegistry, DynActor};
use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::global::GlobalRegistry;
use crate::membership::{Membership, MembershipEvent};
use crate::node::{NodeId, NodeInfo};
use crate::pending::{PendingCallStats, PendingCalls};
use crate::transport::{Transport, TransportEvent};
use crate::wire::{DownReason, WireError, WireErrorKind, WireMessage};
use hearth_rt::{ActorCell, ActorError, CallOptions};

/// Capacity of the remote-down broadcast channel.
const REMOTE_DOWN_CHANNEL_CAPACITY: usize = 256;

/// Grace period for flushing the goodbye broadcast on stop.
const STOP_FLUSH_DELAY: Duration = Duration::from_millis(50);

/// Handle to an actor that may live on another node.
///
/// Encodes the hosting node and the server id; serializable, so it can be
/// stored in the global registry or shipped to other nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteHandle {
    /// Node hosting the actor.
    pub node_id: NodeId,

    /// Identifier of the actor in the hosting node's exported table.
    pub server_id: Uuid,
}

/// Notification that an exported actor on a peer node terminated.
#[derive(Debug, Clone)]
pub struct RemoteDown {
    /// The node that hosted the actor.
    pub node_id: NodeId,

    /// The terminated actor.
    pub server_id: Uuid,

    /// Textual exit reason as reported by the hosting node.
    pub reason: String,
}

pub(crate) struct ClusterInner {
    config: ClusterConfig,
    transport: Transport,
    membership: Membership,
    pending: PendingCalls,
    behaviors: BehaviorRegistry,
    global: GlobalRegistry,
    exported: DashMap<Uuid, ActorCell>,
    local_id: OnceLock<NodeId>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    remote_downs: broadcast::Sender<RemoteDown>,
}

/// One node's view of the cluster.
///
/// An injectable service with explicit start/stop, not an ambient global:
/// tests run several clusters in one process.
#[derive(Clone)]
pub struct Cluster {
    inner: Arc<ClusterInner>,
}

impl Cluster {
    /// Build a cluster node from a validated configuration.
    pub fn new(config: ClusterConfig) -> Result<Cluster, ClusterError> {
        config.validate()?;
        let (transport, events_rx) = Transport::new(config.clone());
        let (remote_downs, _) = broadcast::channel(REMOTE_DOWN_CHANNEL_CAPACITY);
        Ok(Cluster {
            inner: Arc::new(ClusterInner {
                config,
                transport,
                membership: Membership::new(),
                pending: PendingCalls::new(),
                behaviors: BehaviorRegistry::new(),
                global: GlobalRegistry::new(),
                exported: DashMap::new(),
                local_id: OnceLock::new(),
                events_rx: Mutex::new(Some(events_rx)),
                tasks: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                remote_downs,
            }),
        })
    }

    /// Bind the transport and start the heartbeat and failure-detection
    /// loops. Returns the finalized local node id.
    pub async fn start(&self) -> Result<NodeId, ClusterError> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(ClusterError::NotRunning {
                reason: "cluster already started".into(),
            });
        }

        let local = self.inner.transport.start().await?;
        let _ = self.inner.local_id.set(local.clone());

        let mut tasks = self.inner.tasks.lock();

        // Dispatch loop: one consumer for every transport event.
        let events_rx = self.inner.events_rx.lock().take();
        if let Some(mut events_rx) = events_rx {
            let inner = Arc::clone(&self.inner);
            tasks.push(tokio::spawn(async move {
                while let Some(event) = events_rx.recv().await {
                    dispatch(&inner, event).await;
                }
            }));
        }

        // Heartbeat loop.
        let inner = Arc::clone(&self.inner);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.heartbeat_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                send_heartbeat(&inner, None);
            }
        }));

        // Failure sweeper: declares silent peers down.
        let inner = Arc::clone(&self.inner);
        tasks.push(tokio::spawn(async move {
            let period = inner.config.heartbeat_interval.min(inner.config.failure_timeout() / 2);
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(10)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                for peer in inner.membership.expired(inner.config.failure_timeout()) {
                    handle_node_down(&inner, &peer, DownReason::HeartbeatTimeout, true);
                }
            }
        }));

        info!(node_id = %local, "cluster started");
        Ok(local)
    }

    /// Announce a graceful shutdown, close all links, and reject all
    /// in-flight requests.
    pub async fn stop(&self) {
        if let Some(local) = self.inner.local_id.get() {
            self.inner.transport.broadcast(WireMessage::NodeDown {
                node_id: local.clone(),
                detected_at: Utc::now(),
                reason: DownReason::GracefulShutdown,
            });
            // Let the links flush the goodbye before they are torn down.
            tokio::time::sleep(STOP_FLUSH_DELAY).await;
        }

        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        self.inner.transport.stop().await;
        self.inner.pending.fail_all("cluster stopped");
        info!("cluster stopped");
    }

    /// Terminate without the goodbye broadcast.
    ///
    /// Peers detect the loss through their links and heartbeat timeouts,
    /// exactly as with a crashed process. Intended for failure injection in
    /// tests and controlled crash simulation.
    pub async fn halt(&self) {
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        self.inner.transport.stop().await;
        self.inner.pending.fail_all("cluster halted");
        info!("cluster halted");
    }

    /// The local node id, once started.
    pub fn local_id(&self) -> Option<NodeId> {
        self.inner.local_id.get().cloned()
    }

    /// Open (or keep) a link to a seed node.
    pub fn connect(&self, seed: &NodeId) -> Result<(), ClusterError> {
        self.inner.transport.connect_to(seed.clone())
    }

    /// Whether a live link to `node` exists.
    pub fn is_connected_to(&self, node: &NodeId) -> bool {
        self.inner.transport.is_connected_to(node)
    }

    /// The per-node behavior registry used by remote spawn.
    pub fn behaviors(&self) -> &BehaviorRegistry {
        &self.inner.behaviors
    }

    /// The local view of the cluster-wide name registry.
    pub fn global(&self) -> &GlobalRegistry {
        &self.inner.global
    }

    /// The peer table.
    pub fn membership(&self) -> &Membership {
        &self.inner.membership
    }

    /// Subscribe to node up/down/updated events.
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.inner.membership.subscribe()
    }

    /// Subscribe to termination notices for exported actors on peers.
    pub fn subscribe_remote_downs(&self) -> broadcast::Receiver<RemoteDown> {
        self.inner.remote_downs.subscribe()
    }

    /// Correlation counters for observability.
    pub fn pending_stats(&self) -> PendingCallStats {
        self.inner.pending.stats()
    }

    /// Number of exported actors hosted locally.
    pub fn process_count(&self) -> u32 {
        self.inner.exported.len() as u32
    }

    /// Candidate nodes for placement: the local node plus all connected
    /// peers.
    pub fn placement_candidates(&self) -> Vec<NodeId> {
        let mut nodes = Vec::new();
        if let Some(local) = self.local_id() {
            nodes.push(local);
        }
        nodes.extend(self.inner.membership.connected_ids());
        nodes
    }

    /// Reported process count for a placement candidate.
    pub fn process_count_of(&self, node: &NodeId) -> u32 {
        if Some(node) == self.inner.local_id.get() {
            return self.process_count();
        }
        self.inner
            .membership
            .get(node)
            .map(|info| info.process_count)
            .unwrap_or(u32::MAX)
    }

    /// Instantiate a registered behavior locally and export it.
    pub async fn spawn_local(
        &self,
        behavior_name: &str,
        args: Value,
    ) -> Result<RemoteHandle, ClusterError> {
        let local = self.require_local()?;
        let server_id = spawn_local_dyn(&self.inner, behavior_name, args).await?;
        Ok(RemoteHandle {
            node_id: local,
            server_id,
        })
    }

    /// Instantiate a registered behavior on `node` (which may be the local
    /// node) and await its handle.
    pub async fn spawn_on(
        &self,
        node: &NodeId,
        behavior_name: &str,
        args: Value,
    ) -> Result<RemoteHandle, ClusterError> {
        let local = self.require_local()?;
        if *node == local {
            return self.spawn_local(behavior_name, args).await;
        }

        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.register(request_id, node.clone(), tx);

        let sent = self.inner.transport.send(
            node,
            WireMessage::SpawnRequest {
                request_id,
                behavior_name: behavior_name.to_string(),
                args,
            },
        );
        if let Err(err) = sent {
            self.inner.pending.cancel(&request_id);
            return Err(err);
        }

        let wait = self.inner.config.call_timeout;
        match timeout(wait, rx).await {
            Ok(Ok(Ok(value))) => {
                let server_id = value
                    .get("server_id")
                    .and_then(|value| value.as_str())
                    .and_then(|text| Uuid::parse_str(text).ok())
                    .ok_or_else(|| ClusterError::serialization("malformed spawn reply"))?;
                Ok(RemoteHandle {
                    node_id: node.clone(),
                    server_id,
                })
            }
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) => Err(ClusterError::NotRunning {
                reason: "cluster stopped while spawning".into(),
            }),
            Err(_) => {
                self.inner.pending.expire(&request_id);
                Err(ClusterError::RemoteCallTimeout { timeout: wait })
            }
        }
    }

    /// Call an actor anywhere in the cluster with the default timeout.
    pub async fn call(&self, handle: &RemoteHandle, msg: Value) -> Result<Value, ClusterError> {
        self.call_with_timeout(handle, msg, self.inner.config.call_timeout)
            .await
    }

    /// Call an actor anywhere in the cluster.
    ///
    /// The timeout is measured locally; an expired timeout releases the
    /// caller without interrupting the remote handler.
    pub async fn call_with_timeout(
        &self,
        handle: &RemoteHandle,
        msg: Value,
        wait: Duration,
    ) -> Result<Value, ClusterError> {
        let local = self.require_local()?;
        if handle.node_id == local {
            let cell = self
                .inner
                .exported
                .get(&handle.server_id)
                .map(|cell| cell.value().clone());
            let actor = cell.as_ref().and_then(|cell| cell.downcast::<DynActor>());
            let Some(actor) = actor else {
                return Err(ClusterError::RemoteServerNotRunning {
                    node_id: local.to_string(),
                    server_id: handle.server_id.to_string(),
                });
            };
            return match actor
                .call_with(msg, CallOptions::default().with_timeout(wait))
                .await
            {
                Ok(value) => Ok(value),
                Err(ActorError::CallTimeout { .. }) => {
                    Err(ClusterError::RemoteCallTimeout { timeout: wait })
                }
                Err(ActorError::Handler { reason }) => Err(ClusterError::RemoteHandler { reason }),
                Err(err) if err.is_not_running() => Err(ClusterError::RemoteServerNotRunning {
                    node_id: local.to_string(),
                    server_id: handle.server_id.to_string(),
                }),
                Err(err) => Err(ClusterError::RemoteHandler {
                    reason: err.to_string(),
                }),
            };
        }

        let call_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .register(call_id, handle.node_id.clone(), tx);

        let sent = self.inner.transport.send(
            &handle.node_id,
            WireMessage::CallRequest {
                call_id,
                server_id: handle.server_id,
                msg,
                timeout_ms: wait.as_millis() as u64,
            },
        );
        if let Err(err) = sent {
            self.inner.pending.cancel(&call_id);
            return Err(err);
        }

        match timeout(wait, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClusterError::NotRunning {
                reason: "cluster stopped while calling".into(),
            }),
            Err(_) => {
                self.inner.pending.expire(&call_id);
                Err(ClusterError::RemoteCallTimeout { timeout: wait })
            }
        }
    }

    /// Fire-and-forget to an actor anywhere in the cluster. Never fails
    /// visibly; undeliverable casts are dropped.
    pub fn cast(&self, handle: &RemoteHandle, msg: Value) {
        let Some(local) = self.local_id() else {
            return;
        };
        if handle.node_id == local {
            if let Some(cell) = self.inner.exported.get(&handle.server_id) {
                if let Some(actor) = cell.downcast::<DynActor>() {
                    actor.cast(msg);
                }
            }
            return;
        }
        let _ = self.inner.transport.send(
            &handle.node_id,
            WireMessage::Cast {
                server_id: handle.server_id,
                msg,
            },
        );
    }

    /// Ask the hosting node to stop an actor gracefully.
    pub fn stop_actor(&self, handle: &RemoteHandle) {
        let Some(local) = self.local_id() else {
            return;
        };
        if handle.node_id == local {
            if let Some(cell) = self.inner.exported.get(&handle.server_id) {
                let cell = cell.value().clone();
                tokio::spawn(async move { cell.stop().await });
            }
            return;
        }
        let _ = self.inner.transport.send(
            &handle.node_id,
            WireMessage::Stop {
                server_id: handle.server_id,
            },
        );
    }

    /// The local cell behind a locally hosted handle.
    pub fn exported_cell(&self, server_id: &Uuid) -> Option<ActorCell> {
        self.inner.exported.get(server_id).map(|cell| cell.value().clone())
    }

    fn require_local(&self) -> Result<NodeId, ClusterError> {
        self.local_id().ok_or(ClusterError::NotRunning {
            reason: "cluster not started".into(),
        })
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("local_id", &self.inner.local_id.get())
            .field("exported", &self.inner.exported.len())
            .finish()
    }
}

/// Send a heartbeat to one peer or to everyone.
fn send_heartbeat(inner: &Arc<ClusterInner>, target: Option<&NodeId>) {
    let Some(local) = inner.local_id.get() else {
        return;
    };
    let message = WireMessage::Heartbeat {
        node: NodeInfo::connected(local.clone(), inner.exported.len() as u32),
        known_nodes: inner.membership.connected_ids(),
    };
    match target {
        Some(peer) => {
            let _ = inner.transport.send(peer, message);
        }
        None => inner.transport.broadcast(message),
    }
}

/// Mark a peer down and fan the failure out to every interested table.
fn handle_node_down(
    inner: &Arc<ClusterInner>,
    peer: &NodeId,
    reason: DownReason,
    drop_link: bool,
) {
    if inner.membership.mark_down(peer, reason) {
        inner.pending.fail_node(peer, &reason.to_string());
        // Supervisor-owned registrations are claimed during failover, not
        // purged here.
        let purged = inner
            .global
            .purge_node_where(peer, |name| !name.starts_with(crate::global::DSUP_KEY_PREFIX));
        if !purged.is_empty() {
            debug!(node_id = %peer, count = purged.len(), "purged global registrations");
        }
    }
    if drop_link {
        inner.transport.disconnect(peer);
        inner.membership.forget(peer);
    }
}

async fn dispatch(inner: &Arc<ClusterInner>, event: TransportEvent) {
    match event {
        TransportEvent::ConnectionEstablished { peer } => {
            debug!(peer = %peer, "link established");
            // Announce ourselves at once so the peer does not wait a full
            // heartbeat interval to learn about us.
            send_heartbeat(inner, Some(&peer));
        }
        TransportEvent::ConnectionLost { peer, reason } => {
            debug!(peer = %peer, reason = %reason, "link lost");
            // The link keeps reconnecting; only the membership status flips.
            handle_node_down(inner, &peer, DownReason::ConnectionClosed, false);
        }
        TransportEvent::Message { from, message } => {
            handle_message(inner, from, message).await;
        }
    }
}

async fn handle_message(inner: &Arc<ClusterInner>, from: NodeId, message: WireMessage) {
    match message {
        WireMessage::Heartbeat { node, known_nodes } => {
            let Some(local) = inner.local_id.get() else {
                return;
            };
            let leads = inner.membership.on_heartbeat(node, known_nodes, local);
            for lead in leads {
                // Gossip connect: failures are swallowed, the next round of
                // gossip will retry.
                if let Err(err) = inner.transport.connect_to(lead.clone()) {
                    debug!(node_id = %lead, error = %err, "gossip connect failed");
                }
            }
        }
        WireMessage::NodeDown { node_id, reason, .. } => {
            handle_node_down(inner, &node_id, reason, true);
        }
        WireMessage::CallRequest {
            call_id,
            server_id,
            msg,
            timeout_ms,
        } => {
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                let result = local_dyn_call(
                    &inner,
                    server_id,
                    msg,
                    Duration::from_millis(timeout_ms),
                )
                .await;
                let reply = match result {
                    Ok(value) => WireMessage::CallOk {
                        call_id,
                        reply: value,
                    },
                    Err(error) => WireMessage::CallErr { call_id, error },
                };
                if let Err(err) = inner.transport.send(&from, reply) {
                    warn!(peer = %from, error = %err, "failed to deliver call reply");
                }
            });
        }
        WireMessage::CallOk { call_id, reply } => {
            inner.pending.resolve(&call_id, Ok(reply));
        }
        WireMessage::CallErr { call_id, error } => {
            let err = error.into_cluster_error(&from, "");
            inner.pending.resolve(&call_id, Err(err));
        }
        WireMessage::Cast { server_id, msg } => {
            if let Some(cell) = inner.exported.get(&server_id) {
                if let Some(actor) = cell.downcast::<DynActor>() {
                    actor.cast(msg);
                }
            }
        }
        WireMessage::SpawnRequest {
            request_id,
            behavior_name,
            args,
        } => {
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                let reply = match spawn_local_dyn(&inner, &behavior_name, args).await {
                    Ok(server_id) => WireMessage::SpawnReply {
                        request_id,
                        server_id,
                    },
                    Err(err) => {
                        let kind = match err {
                            ClusterError::BehaviorNotRegistered { .. } => {
                                WireErrorKind::BehaviorNotRegistered
                            }
                            _ => WireErrorKind::SpawnFailed,
                        };
                        WireMessage::SpawnError {
                            request_id,
                            error: WireError::new(kind, err.to_string()),
                        }
                    }
                };
                if let Err(err) = inner.transport.send(&from, reply) {
                    warn!(peer = %from, error = %err, "failed to deliver spawn reply");
                }
            });
        }
        WireMessage::SpawnReply {
            request_id,
            server_id,
        } => {
            inner
                .pending
                .resolve(&request_id, Ok(json!({ "server_id": server_id.to_string() })));
        }
        WireMessage::SpawnError { request_id, error } => {
            let err = error.into_cluster_error(&from, "spawn");
            inner.pending.resolve(&request_id, Err(err));
        }
        WireMessage::Stop { server_id } => {
            if let Some(cell) = inner.exported.get(&server_id) {
                let cell = cell.value().clone();
                tokio::spawn(async move { cell.stop().await });
            }
        }
        WireMessage::Down { server_id, reason } => {
            let _ = inner.remote_downs.send(RemoteDown {
                node_id: from,
                server_id,
                reason,
            });
        }
        WireMessage::Hello { .. } | WireMessage::Welcome { .. } => {
            debug!(peer = %from, "stray handshake frame ignored");
        }
    }
}

/// Call a locally exported actor, mapping failures onto wire errors.
async fn local_dyn_call(
    inner: &Arc<ClusterInner>,
    server_id: Uuid,
    msg: Value,
    wait: Duration,
) -> Result<Value, WireError> {
    let Some(cell) = inner.exported.get(&server_id).map(|cell| cell.value().clone()) else {
        return Err(WireError::new(
            WireErrorKind::NotRunning,
            format!("no exported actor {server_id}"),
        ));
    };
    let Some(actor) = cell.downcast::<DynActor>() else {
        return Err(WireError::new(
            WireErrorKind::NotRunning,
            "exported entry is not a dynamic actor",
        ));
    };

    match actor
        .call_with(msg, CallOptions::default().with_timeout(wait))
        .await
    {
        Ok(value) => Ok(value),
        Err(ActorError::Handler { reason }) => Err(WireError::new(WireErrorKind::Handler, reason)),
        Err(err) if err.is_not_running() => {
            Err(WireError::new(WireErrorKind::NotRunning, err.to_string()))
        }
        Err(err) => Err(WireError::new(WireErrorKind::Handler, err.to_string())),
    }
}

/// Spawn a registered behavior locally, export it, and wire up the
/// termination notice.
async fn spawn_local_dyn(
    inner: &Arc<ClusterInner>,
    behavior_name: &str,
    args: Value,
) -> Result<Uuid, ClusterError> {
    let factory = inner
        .behaviors
        .get(behavior_name)
        .ok_or_else(|| ClusterError::BehaviorNotRegistered {
            name: behavior_name.to_string(),
        })?;

    let actor = hearth_rt::spawn(DynActor::new(factory(), args))
        .await
        .map_err(|err| ClusterError::SpawnFailed {
            behavior_name: behavior_name.to_string(),
            reason: err.to_string(),
        })?;

    let server_id = Uuid::new_v4();
    let cell = actor.cell();
    inner.exported.insert(server_id, cell.clone());

    let weak = Arc::downgrade(inner);
    cell.on_exit(move |reason| {
        if let Some(inner) = weak.upgrade() {
            inner.exported.remove(&server_id);
            inner.transport.broadcast(WireMessage::Down {
                server_id,
                reason: reason.to_string(),
            });
        }
    });

    debug!(behavior = behavior_name, %server_id, "exported actor spawned");
    Ok(server_id)
}
