//! Cluster Integration Tests
//!
//! Integration tests for the distributed layer with real sockets: several
//! in-process cluster nodes on ephemeral localhost ports exchange
//! heartbeats, spawn behaviors remotely, and correlate calls.
//!
//! # Current Test Coverage
//!
//! 1. **Membership** (3 tests)
//!    - Node-up on first heartbeat after connect
//!    - Gossip connects the full mesh
//!    - Graceful stop announces node-down
//!
//! 2. **Remote Invocation** (4 tests)
//!    - Remote spawn + call/cast round trip
//!    - Remote call timeout does not cancel the remote handler
//!    - Unknown behavior names are rejected
//!    - Node loss fails in-flight calls
//!
//! 3. **Global Registry** (1 test)
//!    - Cluster-wide name conflicts
//!
//! Timing-sensitive tests run with 100 ms heartbeats and a miss threshold
//! of 2, and poll with generous slack instead of sleeping fixed amounts.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde_json::{json, Value};

// Layer 3: Internal module imports
use hearth_cluster::{
    BehaviorFailure, Cluster, ClusterConfig, ClusterError, DownReason, DynBehavior,
    MembershipEvent, NodeStatus,
};

/// A counter with a deliberately slow path, driven by JSON ops.
#[derive(Default)]
struct Counter {
    count: u64,
}

#[async_trait]
impl DynBehavior for Counter {
    async fn init(&mut self, args: Value) -> Result<(), BehaviorFailure> {
        self.count = args.get("initial").and_then(|value| value.as_u64()).unwrap_or(0);
        Ok(())
    }

    async fn handle_call(&mut self, msg: Value) -> Result<Value, BehaviorFailure> {
        match msg.get("op").and_then(|value| value.as_str()) {
            Some("get") => Ok(json!(self.count)),
            Some("slow_inc") => {
                let millis = msg.get("ms").and_then(|value| value.as_u64()).unwrap_or(500);
                tokio::time::sleep(Duration::from_millis(millis)).await;
                self.count += 1;
                Ok(json!(self.count))
            }
            other => Err(BehaviorFailure::new(format!("unknown op: {other:?}"))),
        }
    }

    async fn handle_cast(&mut self, msg: Value) -> Result<(), BehaviorFailure> {
        if msg.get("op").and_then(|value| value.as_str()) == Some("inc") {
            self.count += 1;
        }
        Ok(())
    }
}

/// Start a node with fast heartbeats on an ephemeral port.
async fn start_node(name: &str) -> Cluster {
    let config = ClusterConfig::builder(name, "127.0.0.1", 0)
        .with_heartbeat_interval(Duration::from_millis(100))
        .with_heartbeat_miss_threshold(2)
        .with_reconnect_delays(Duration::from_millis(100), Duration::from_millis(500))
        .with_call_timeout(Duration::from_secs(2))
        .build()
        .expect("valid config");
    let cluster = Cluster::new(config).expect("cluster should build");
    cluster
        .behaviors()
        .register("counter", || Box::new(Counter::default()));
    cluster.start().await.expect("cluster should start");
    cluster
}

/// Poll until `check` passes or the deadline expires.
async fn wait_for(description: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for: {description}");
}

/// Connect `a` to `b` and wait until both sides see each other up.
async fn join(a: &Cluster, b: &Cluster) {
    let a_id = a.local_id().expect("a started");
    let b_id = b.local_id().expect("b started");
    a.connect(&b_id).expect("connect should be accepted");
    wait_for("mutual membership", || {
        a.membership().get(&b_id).map(|info| info.status) == Some(NodeStatus::Connected)
            && b.membership().get(&a_id).map(|info| info.status) == Some(NodeStatus::Connected)
    })
    .await;
}

// ============================================================================
// TEST GROUP 1: Membership
// ============================================================================

#[tokio::test]
async fn test_connect_brings_both_nodes_up() {
    let a = start_node("alpha").await;
    let b = start_node("beta").await;
    let mut events = a.subscribe();

    join(&a, &b).await;

    assert!(a.is_connected_to(&b.local_id().expect("b started")));
    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("event should arrive")
        .expect("channel should stay open");
    assert!(matches!(event, MembershipEvent::NodeUp(_)));

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_gossip_connects_the_full_mesh() {
    let a = start_node("g-alpha").await;
    let b = start_node("g-beta").await;
    let c = start_node("g-gamma").await;

    // Only explicit edges: a–b and a–c. Gossip must produce b–c.
    join(&a, &b).await;
    join(&a, &c).await;

    let b_id = b.local_id().expect("b started");
    let c_id = c.local_id().expect("c started");
    wait_for("gossip edge between b and c", || {
        b.membership().get(&c_id).map(|info| info.status) == Some(NodeStatus::Connected)
            && c.membership().get(&b_id).map(|info| info.status) == Some(NodeStatus::Connected)
    })
    .await;

    a.stop().await;
    b.stop().await;
    c.stop().await;
}

#[tokio::test]
async fn test_graceful_stop_announces_node_down() {
    let a = start_node("s-alpha").await;
    let b = start_node("s-beta").await;
    join(&a, &b).await;

    let b_id = b.local_id().expect("b started");
    let mut events = a.subscribe();
    b.stop().await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let event = tokio::time::timeout(remaining, events.recv())
            .await
            .expect("node-down should arrive before the deadline")
            .expect("channel should stay open");
        if let MembershipEvent::NodeDown { id, reason } = event {
            assert_eq!(id, b_id);
            // The goodbye normally wins; a racing socket close is also
            // acceptable evidence of the same episode ending.
            assert!(matches!(
                reason,
                DownReason::GracefulShutdown | DownReason::ConnectionClosed
            ));
            break;
        }
    }

    a.stop().await;
}

// ============================================================================
// TEST GROUP 2: Remote Invocation
// ============================================================================

#[tokio::test]
async fn test_remote_spawn_call_cast_round_trip() {
    let a = start_node("r-alpha").await;
    let b = start_node("r-beta").await;
    join(&a, &b).await;

    let b_id = b.local_id().expect("b started");
    let handle = a
        .spawn_on(&b_id, "counter", json!({ "initial": 40 }))
        .await
        .expect("remote spawn should succeed");
    assert_eq!(handle.node_id, b_id);

    a.cast(&handle, json!({ "op": "inc" }));
    a.cast(&handle, json!({ "op": "inc" }));

    wait_for("casts to be handled", || b.process_count() == 1).await;
    let reply = a
        .call(&handle, json!({ "op": "get" }))
        .await
        .expect("remote call should succeed");
    assert_eq!(reply, json!(42));

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_remote_call_timeout_does_not_cancel_the_handler() {
    let a = start_node("t-alpha").await;
    let b = start_node("t-beta").await;
    join(&a, &b).await;

    let b_id = b.local_id().expect("b started");
    let handle = a
        .spawn_on(&b_id, "counter", json!({}))
        .await
        .expect("remote spawn should succeed");

    // 50 ms against a 500 ms handler: the caller is released...
    let result = a
        .call_with_timeout(
            &handle,
            json!({ "op": "slow_inc", "ms": 500 }),
            Duration::from_millis(50),
        )
        .await;
    assert!(matches!(result, Err(ClusterError::RemoteCallTimeout { .. })));

    // ...but the remote handler still runs to completion.
    tokio::time::sleep(Duration::from_millis(700)).await;
    let reply = a
        .call_with_timeout(&handle, json!({ "op": "get" }), Duration::from_secs(1))
        .await
        .expect("follow-up call should succeed");
    assert_eq!(reply, json!(1));

    let stats = a.pending_stats();
    assert_eq!(stats.timed_out, 1);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_unknown_behavior_is_rejected() {
    let a = start_node("u-alpha").await;
    let b = start_node("u-beta").await;
    join(&a, &b).await;

    let b_id = b.local_id().expect("b started");
    let result = a.spawn_on(&b_id, "no-such-behavior", json!({})).await;
    assert!(matches!(
        result,
        Err(ClusterError::BehaviorNotRegistered { .. })
    ));

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_node_loss_fails_in_flight_calls() {
    let a = start_node("l-alpha").await;
    let b = start_node("l-beta").await;
    join(&a, &b).await;

    let b_id = b.local_id().expect("b started");
    let handle = a
        .spawn_on(&b_id, "counter", json!({}))
        .await
        .expect("remote spawn should succeed");

    // Park a long call on B, then kill B without a goodbye.
    let call = tokio::spawn({
        let a = a.clone();
        let handle = handle.clone();
        async move {
            a.call_with_timeout(
                &handle,
                json!({ "op": "slow_inc", "ms": 5000 }),
                Duration::from_secs(10),
            )
            .await
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    b.halt().await;

    let result = tokio::time::timeout(Duration::from_secs(3), call)
        .await
        .expect("call should be rejected well before its own timeout")
        .expect("task should not panic");
    assert!(matches!(result, Err(ClusterError::NodeLost { .. })));

    let stats = a.pending_stats();
    assert_eq!(stats.rejected, 1);

    a.stop().await;
}

// ============================================================================
// TEST GROUP 3: Global Registry
// ============================================================================

#[tokio::test]
async fn test_global_name_conflicts_are_rejected() {
    let a = start_node("n-alpha").await;
    let b = start_node("n-beta").await;
    join(&a, &b).await;

    let a_id = a.local_id().expect("a started");
    let b_id = b.local_id().expect("b started");

    a.global()
        .register(
            "singleton",
            hearth_cluster::GlobalEntry::new(a_id, json!({ "role": "primary" })),
        )
        .expect("first registration should succeed");

    // The name is taken, even though the second target is a remote node.
    let result = a.global().register(
        "singleton",
        hearth_cluster::GlobalEntry::new(b_id.clone(), json!({ "role": "backup" })),
    );
    assert!(matches!(
        result,
        Err(ClusterError::GlobalNameConflict { name, .. }) if name == "singleton"
    ));

    // Losing the hosting node frees names hosted there.
    a.global()
        .register(
            "remote-thing",
            hearth_cluster::GlobalEntry::new(b_id.clone(), json!({})),
        )
        .expect("registration should succeed");
    b.halt().await;
    wait_for("purge after node loss", || {
        a.global().lookup("remote-thing").is_none()
    })
    .await;

    a.stop().await;
}
