//! Per-peer link tasks: handshake, duplex pumping, reconnect backoff.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use super::codec::WireCodec;
use super::{TransportEvent, TransportInner};
use crate::error::ClusterError;
use crate::node::NodeId;
use crate::wire::{secret_proof, WireMessage};

/// Time allowed for the peer to complete the handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// A registered link to one peer.
pub(crate) struct Link {
    /// Monotonic id distinguishing link generations for the same peer.
    pub(crate) generation: u64,

    /// Outgoing message queue.
    pub(crate) tx: mpsc::UnboundedSender<WireMessage>,

    /// Whether the socket is currently up.
    pub(crate) connected: Arc<AtomicBool>,

    /// Cancels the link task.
    pub(crate) cancel: watch::Sender<bool>,
}

impl Link {
    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn shut_down(&self) {
        let _ = self.cancel.send(true);
    }
}

/// Outbound link: connect, handshake, pump, reconnect with backoff until
/// cancelled.
pub(crate) async fn run_outbound(
    inner: Arc<TransportInner>,
    peer: NodeId,
    mut outgoing: mpsc::UnboundedReceiver<WireMessage>,
    connected: Arc<AtomicBool>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut delay = inner.config.reconnect_base_delay;
    loop {
        if *cancel.borrow() {
            return;
        }

        match TcpStream::connect(peer.addr()).await {
            Ok(stream) => match handshake_outbound(&inner, &peer, stream).await {
                Ok(mut framed) => {
                    connected.store(true, Ordering::Release);
                    inner.emit(TransportEvent::ConnectionEstablished { peer: peer.clone() });
                    delay = inner.config.reconnect_base_delay;

                    let reason =
                        run_duplex(&inner, &peer, &mut framed, &mut outgoing, &mut cancel).await;

                    connected.store(false, Ordering::Release);
                    inner.emit(TransportEvent::ConnectionLost {
                        peer: peer.clone(),
                        reason,
                    });
                }
                Err(err) => {
                    warn!(peer = %peer, error = %err, "handshake failed");
                }
            },
            Err(err) => {
                debug!(peer = %peer, error = %err, "connect attempt failed");
            }
        }

        // Backoff before the next attempt, still responsive to cancel.
        tokio::select! {
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    return;
                }
            }
            _ = tokio::time::sleep(delay) => {}
        }
        delay = (delay * 2).min(inner.config.reconnect_max_delay);
    }
}

/// Inbound connection: handshake, register a link, pump until the socket
/// closes, then unregister.
pub(crate) async fn run_inbound(inner: Arc<TransportInner>, stream: TcpStream) {
    let mut framed = Framed::new(stream, WireCodec::new(inner.config.max_frame_bytes));

    let peer = match handshake_inbound(&inner, &mut framed).await {
        Ok(peer) => peer,
        Err(err) => {
            warn!(error = %err, "inbound handshake rejected");
            return;
        }
    };

    let (tx, mut outgoing) = mpsc::unbounded_channel();
    let connected = Arc::new(AtomicBool::new(true));
    let (cancel_tx, mut cancel) = watch::channel(false);
    let generation = inner.next_generation();

    if let Some(previous) = inner.links.insert(
        peer.clone(),
        Link {
            generation,
            tx,
            connected: Arc::clone(&connected),
            cancel: cancel_tx,
        },
    ) {
        // Simultaneous connect: the newest socket wins.
        previous.shut_down();
    }
    inner.emit(TransportEvent::ConnectionEstablished { peer: peer.clone() });

    let reason = run_duplex(&inner, &peer, &mut framed, &mut outgoing, &mut cancel).await;

    connected.store(false, Ordering::Release);
    inner
        .links
        .remove_if(&peer, |_, link| link.generation == generation);
    inner.emit(TransportEvent::ConnectionLost {
        peer: peer.clone(),
        reason,
    });
}

async fn handshake_outbound(
    inner: &TransportInner,
    peer: &NodeId,
    stream: TcpStream,
) -> Result<Framed<TcpStream, WireCodec>, ClusterError> {
    let mut framed = Framed::new(stream, WireCodec::new(inner.config.max_frame_bytes));
    let local = inner.require_local_id()?;
    let proof = secret_proof(inner.config.secret.as_deref());

    framed
        .send(WireMessage::Hello {
            node_id: local,
            proof: proof.clone(),
        })
        .await?;

    let reply = timeout(HANDSHAKE_TIMEOUT, framed.next())
        .await
        .map_err(|_| ClusterError::Handshake {
            peer: peer.to_string(),
            reason: "handshake timed out".into(),
        })?
        .ok_or_else(|| ClusterError::Handshake {
            peer: peer.to_string(),
            reason: "connection closed during handshake".into(),
        })??;

    match reply {
        WireMessage::Welcome {
            node_id,
            proof: peer_proof,
        } => {
            if peer_proof != proof {
                return Err(ClusterError::Handshake {
                    peer: peer.to_string(),
                    reason: "secret proof mismatch".into(),
                });
            }
            if node_id != *peer {
                return Err(ClusterError::Handshake {
                    peer: peer.to_string(),
                    reason: format!("peer identified as {node_id}"),
                });
            }
            Ok(framed)
        }
        other => Err(ClusterError::Handshake {
            peer: peer.to_string(),
            reason: format!("unexpected handshake frame: {}", other.kind()),
        }),
    }
}

async fn handshake_inbound(
    inner: &TransportInner,
    framed: &mut Framed<TcpStream, WireCodec>,
) -> Result<NodeId, ClusterError> {
    let local = inner.require_local_id()?;
    let proof = secret_proof(inner.config.secret.as_deref());

    let hello = timeout(HANDSHAKE_TIMEOUT, framed.next())
        .await
        .map_err(|_| ClusterError::Handshake {
            peer: "unknown".into(),
            reason: "handshake timed out".into(),
        })?
        .ok_or_else(|| ClusterError::Handshake {
            peer: "unknown".into(),
            reason: "connection closed during handshake".into(),
        })??;

    match hello {
        WireMessage::Hello {
            node_id,
            proof: peer_proof,
        } => {
            if peer_proof != proof {
                return Err(ClusterError::Handshake {
                    peer: node_id.to_string(),
                    reason: "secret proof mismatch".into(),
                });
            }
            framed
                .send(WireMessage::Welcome {
                    node_id: local,
                    proof,
                })
                .await?;
            Ok(node_id)
        }
        other => Err(ClusterError::Handshake {
            peer: "unknown".into(),
            reason: format!("unexpected handshake frame: {}", other.kind()),
        }),
    }
}

/// Pump the socket in both directions until it fails, the outgoing queue
/// closes, or the link is cancelled. Returns the loss reason.
async fn run_duplex(
    inner: &TransportInner,
    peer: &NodeId,
    framed: &mut Framed<TcpStream, WireCodec>,
    outgoing: &mut mpsc::UnboundedReceiver<WireMessage>,
    cancel: &mut watch::Receiver<bool>,
) -> String {
    loop {
        tokio::select! {
            biased;
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    return "link cancelled".into();
                }
            }
            queued = outgoing.recv() => match queued {
                Some(message) => {
                    if let Err(err) = framed.send(message).await {
                        return err.to_string();
                    }
                }
                None => return "transport shut down".into(),
            },
            incoming = framed.next() => match incoming {
                Some(Ok(message)) => {
                    inner.emit(TransportEvent::Message {
                        from: peer.clone(),
                        message,
                    });
                }
                Some(Err(err)) => return err.to_string(),
                None => return "connection closed".into(),
            },
        }
    }
}
