//! Framed, authenticated point-to-point links between nodes.
//!
//! The transport owns one TCP listener and one link per peer. Outbound links
//! reconnect with exponential backoff until told otherwise; inbound links
//! live for the duration of their socket. Everything the transport observes
//! is surfaced as [`TransportEvent`]s on a single channel consumed by the
//! cluster layer.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// Layer 3: Internal module imports
use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::node::NodeId;
use crate::wire::WireMessage;
use link::Link;

pub mod codec;
pub(crate) mod link;

/// Events surfaced by the transport to the cluster layer.
#[derive(Debug)]
pub enum TransportEvent {
    /// A link to `peer` completed its handshake.
    ConnectionEstablished { peer: NodeId },

    /// The link to `peer` dropped.
    ConnectionLost { peer: NodeId, reason: String },

    /// A frame arrived from `from`.
    Message { from: NodeId, message: WireMessage },
}

pub(crate) struct TransportInner {
    pub(crate) config: ClusterConfig,
    pub(crate) links: DashMap<NodeId, Link>,
    local_id: OnceLock<NodeId>,
    events: mpsc::UnboundedSender<TransportEvent>,
    shutdown: watch::Sender<bool>,
    generations: AtomicU64,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl TransportInner {
    pub(crate) fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn require_local_id(&self) -> Result<NodeId, ClusterError> {
        self.local_id.get().cloned().ok_or(ClusterError::NotRunning {
            reason: "transport not started".into(),
        })
    }
}

/// The node-to-node transport service.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl Transport {
    /// Create a transport and the receiver for its events.
    pub fn new(config: ClusterConfig) -> (Transport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let transport = Transport {
            inner: Arc::new(TransportInner {
                config,
                links: DashMap::new(),
                local_id: OnceLock::new(),
                events,
                shutdown,
                generations: AtomicU64::new(0),
                accept_task: Mutex::new(None),
            }),
        };
        (transport, events_rx)
    }

    /// Bind the listener and start accepting peers.
    ///
    /// Returns the local node id, finalized from the actually bound port
    /// (relevant when the configured port is `0`).
    pub async fn start(&self) -> Result<NodeId, ClusterError> {
        let config = &self.inner.config;
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let port = listener.local_addr()?.port();
        let local = NodeId::new(&config.node_name, &config.host, port)?;

        self.inner
            .local_id
            .set(local.clone())
            .map_err(|_| ClusterError::transport("transport already started"))?;

        let inner = Arc::clone(&self.inner);
        let mut shutdown = self.inner.shutdown.subscribe();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                    accepted = listener.accept() => match accepted {
                        Ok((stream, addr)) => {
                            debug!(%addr, "accepted inbound connection");
                            tokio::spawn(link::run_inbound(Arc::clone(&inner), stream));
                        }
                        Err(err) => {
                            warn!(error = %err, "accept failed");
                            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                        }
                    }
                }
            }
        });
        *self.inner.accept_task.lock() = Some(task);

        info!(node_id = %local, "transport listening");
        Ok(local)
    }

    /// Stop accepting, cancel every link, and drop all queues.
    pub async fn stop(&self) {
        let _ = self.inner.shutdown.send(true);
        if let Some(task) = self.inner.accept_task.lock().take() {
            task.abort();
        }
        for entry in self.inner.links.iter() {
            entry.value().shut_down();
        }
        self.inner.links.clear();
    }

    /// The local node id, once started.
    pub fn local_id(&self) -> Option<NodeId> {
        self.inner.local_id.get().cloned()
    }

    /// Ensure an outbound link to `peer` exists (idempotent).
    ///
    /// The link keeps reconnecting with exponential backoff until
    /// [`Transport::disconnect`] or [`Transport::stop`].
    pub fn connect_to(&self, peer: NodeId) -> Result<(), ClusterError> {
        let local = self.inner.require_local_id()?;
        if peer == local {
            return Ok(());
        }

        match self.inner.links.entry(peer.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(()),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let (tx, outgoing) = mpsc::unbounded_channel();
                let connected = Arc::new(std::sync::atomic::AtomicBool::new(false));
                let (cancel_tx, cancel_rx) = watch::channel(false);
                vacant.insert(Link {
                    generation: self.inner.next_generation(),
                    tx,
                    connected: Arc::clone(&connected),
                    cancel: cancel_tx,
                });
                tokio::spawn(link::run_outbound(
                    Arc::clone(&self.inner),
                    peer,
                    outgoing,
                    connected,
                    cancel_rx,
                ));
                Ok(())
            }
        }
    }

    /// Queue a message to a connected peer.
    pub fn send(&self, peer: &NodeId, message: WireMessage) -> Result<(), ClusterError> {
        let link = self
            .inner
            .links
            .get(peer)
            .ok_or_else(|| ClusterError::NodeNotConnected {
                node_id: peer.to_string(),
            })?;
        if !link.is_connected() {
            return Err(ClusterError::NodeNotConnected {
                node_id: peer.to_string(),
            });
        }
        link.tx
            .send(message)
            .map_err(|_| ClusterError::NodeNotConnected {
                node_id: peer.to_string(),
            })
    }

    /// Queue a message to every connected peer.
    pub fn broadcast(&self, message: WireMessage) {
        for entry in self.inner.links.iter() {
            if entry.value().is_connected() {
                let _ = entry.value().tx.send(message.clone());
            }
        }
    }

    /// Whether a live link to `peer` exists.
    pub fn is_connected_to(&self, peer: &NodeId) -> bool {
        self.inner
            .links
            .get(peer)
            .map(|link| link.is_connected())
            .unwrap_or(false)
    }

    /// Peers with live links.
    pub fn connected_peers(&self) -> Vec<NodeId> {
        self.inner
            .links
            .iter()
            .filter(|entry| entry.value().is_connected())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Tear down the link to `peer` and stop reconnecting.
    pub fn disconnect(&self, peer: &NodeId) {
        if let Some((_, link)) = self.inner.links.remove(peer) {
            link.shut_down();
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("local_id", &self.inner.local_id.get())
            .field("links", &self.inner.links.len())
            .finish()
    }
}
