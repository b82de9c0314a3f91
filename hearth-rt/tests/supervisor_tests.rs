//! Supervision Engine Integration Tests
//!
//! Integration tests for supervisor startup/shutdown ordering, restart
//! strategies, per-child restart policies, the restart intensity limiter,
//! dynamic children, and auto-shutdown.
//!
//! # Current Test Coverage
//!
//! 1. **Startup & Shutdown** (3 tests)
//!    - Declaration-order start, reverse-order stop
//!    - Rollback when a static child fails to start
//!
//! 2. **Strategies** (3 tests)
//!    - one_for_one replaces only the crashed child
//!    - rest_for_one replaces the crashed child and later siblings
//!    - one_for_all replaces every child
//!
//! 3. **Policies & Intensity** (4 tests)
//!    - permanent/transient/temporary restart decisions
//!    - Intensity exhaustion shuts the supervisor down
//!    - Escalation to a parent supervisor
//!
//! 4. **Dynamic Operations** (4 tests)
//!    - simple_one_for_one template children with per-instance args
//!    - terminate_child / restart_child / duplicate detection
//!    - Auto-shutdown on significant child termination

// Layer 1: Standard library imports
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

// Layer 3: Internal module imports
use hearth_rt::{
    spawn, AutoShutdown, Behavior, ChildSpec, ChildTemplate, ExitReason, RestartPolicy, Strategy,
    Supervisor, SupervisorError, SupervisorOptions, SupervisorRef,
};

#[derive(Debug)]
struct TestError(String);

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TestError {}

enum ChildCall {
    Get,
}

enum ChildCast {
    Fail(String),
}

/// A supervised worker that records its shutdown in a shared log.
struct Child {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
    initial: u64,
}

#[async_trait]
impl Behavior for Child {
    type State = u64;
    type Call = ChildCall;
    type Reply = u64;
    type Cast = ChildCast;
    type Error = TestError;

    async fn init(&mut self) -> Result<u64, TestError> {
        Ok(self.initial)
    }

    async fn handle_call(&mut self, msg: ChildCall, state: &mut u64) -> Result<u64, TestError> {
        match msg {
            ChildCall::Get => Ok(*state),
        }
    }

    async fn handle_cast(&mut self, msg: ChildCast, _state: &mut u64) -> Result<(), TestError> {
        match msg {
            ChildCast::Fail(reason) => Err(TestError(reason)),
        }
    }

    async fn terminate(&mut self, _reason: &ExitReason, _state: &mut u64) -> Result<(), TestError> {
        self.log.lock().push(self.name.clone());
        Ok(())
    }
}

fn child_spec(name: &str, log: &Arc<Mutex<Vec<String>>>) -> ChildSpec {
    let name = name.to_string();
    let log = Arc::clone(log);
    ChildSpec::new(name.clone(), move || {
        let name = name.clone();
        let log = Arc::clone(&log);
        async move {
            let actor = spawn(Child {
                name,
                log,
                initial: 0,
            })
            .await?;
            Ok(actor.cell())
        }
    })
}

fn failing_spec(name: &str) -> ChildSpec {
    ChildSpec::new(name, || async {
        Err(hearth_rt::ActorError::InitFailed {
            reason: "factory refused".into(),
        })
    })
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(120)).await;
}

// ============================================================================
// TEST GROUP 1: Startup & Shutdown
// ============================================================================

#[tokio::test]
async fn test_children_start_in_declaration_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sup = Supervisor::start(
        SupervisorOptions::new(Strategy::OneForOne)
            .with_child(child_spec("a", &log))
            .with_child(child_spec("b", &log))
            .with_child(child_spec("c", &log)),
    )
    .await
    .expect("supervisor should start");

    let children = sup.get_children().await.expect("get_children should succeed");
    let ids: Vec<&str> = children.iter().map(|child| child.id.as_str()).collect();
    assert_eq!(ids, ["a", "b", "c"]);
    assert_eq!(sup.count_children().await.expect("count should succeed"), 3);

    sup.stop().await;
}

#[tokio::test]
async fn test_stop_terminates_children_in_reverse_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sup = Supervisor::start(
        SupervisorOptions::new(Strategy::OneForOne)
            .with_child(child_spec("a", &log))
            .with_child(child_spec("b", &log))
            .with_child(child_spec("c", &log)),
    )
    .await
    .expect("supervisor should start");

    sup.stop().await;

    assert_eq!(*log.lock(), vec!["c".to_string(), "b".into(), "a".into()]);
    assert!(!sup.is_running());
}

#[tokio::test]
async fn test_failed_static_child_rolls_back_started_siblings() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let result = Supervisor::start(
        SupervisorOptions::new(Strategy::OneForOne)
            .with_child(child_spec("a", &log))
            .with_child(child_spec("b", &log))
            .with_child(failing_spec("broken")),
    )
    .await;

    match result {
        Err(SupervisorError::ChildStartFailed { id, .. }) => assert_eq!(id, "broken"),
        other => panic!("expected ChildStartFailed, got {other:?}"),
    }

    // Already-started children were stopped, in reverse order.
    assert_eq!(*log.lock(), vec!["b".to_string(), "a".into()]);
}

// ============================================================================
// TEST GROUP 2: Strategies
// ============================================================================

async fn crash_by_id(sup: &SupervisorRef, id: &str) {
    let children = sup.get_children().await.expect("get_children should succeed");
    let target = children
        .iter()
        .find(|child| child.id == id)
        .expect("child should exist");

    // Reach the live incarnation through the registryless path: ask the
    // supervisor for the cell and downcast to the concrete behavior.
    let cell = sup
        .child_cell(id)
        .await
        .expect("child cell should be available");
    assert_eq!(cell.id(), target.actor_id);
    let actor = cell.downcast::<Child>().expect("downcast should succeed");
    actor.cast(ChildCast::Fail(format!("{id} crashed")));
}

#[tokio::test]
async fn test_one_for_one_replaces_only_the_crashed_child() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sup = Supervisor::start(
        SupervisorOptions::new(Strategy::OneForOne)
            .with_child(child_spec("a", &log))
            .with_child(child_spec("b", &log))
            .with_child(child_spec("c", &log))
            .with_child(child_spec("d", &log)),
    )
    .await
    .expect("supervisor should start");

    let before = sup.get_children().await.expect("get_children should succeed");
    crash_by_id(&sup, "c").await;
    settle().await;

    let after = sup.get_children().await.expect("get_children should succeed");
    for (b, a) in before.iter().zip(after.iter()) {
        if b.id == "c" {
            assert_ne!(b.actor_id, a.actor_id, "crashed child must be replaced");
            assert_eq!(a.restart_count, 1);
        } else {
            assert_eq!(b.actor_id, a.actor_id, "sibling {} must keep its handle", b.id);
            assert_eq!(a.restart_count, 0);
        }
    }

    sup.stop().await;
}

#[tokio::test]
async fn test_rest_for_one_replaces_crashed_child_and_later_siblings() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sup = Supervisor::start(
        SupervisorOptions::new(Strategy::RestForOne)
            .with_child(child_spec("db", &log))
            .with_child(child_spec("cache", &log))
            .with_child(child_spec("api", &log)),
    )
    .await
    .expect("supervisor should start");

    let before = sup.get_children().await.expect("get_children should succeed");
    crash_by_id(&sup, "cache").await;
    settle().await;

    let after = sup.get_children().await.expect("get_children should succeed");
    let find = |infos: &[hearth_rt::ChildInfo], id: &str| {
        infos
            .iter()
            .find(|child| child.id == id)
            .expect("child should exist")
            .clone()
    };

    assert_eq!(
        find(&before, "db").actor_id,
        find(&after, "db").actor_id,
        "db must be untouched"
    );
    assert_ne!(find(&before, "cache").actor_id, find(&after, "cache").actor_id);
    assert_ne!(find(&before, "api").actor_id, find(&after, "api").actor_id);
    assert_eq!(find(&after, "cache").restart_count, 1);
    assert_eq!(find(&after, "api").restart_count, 0);

    sup.stop().await;
}

#[tokio::test]
async fn test_one_for_all_replaces_every_child() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sup = Supervisor::start(
        SupervisorOptions::new(Strategy::OneForAll)
            .with_child(child_spec("x", &log))
            .with_child(child_spec("y", &log))
            .with_child(child_spec("z", &log)),
    )
    .await
    .expect("supervisor should start");

    let before = sup.get_children().await.expect("get_children should succeed");
    crash_by_id(&sup, "y").await;
    settle().await;

    let after = sup.get_children().await.expect("get_children should succeed");
    for (b, a) in before.iter().zip(after.iter()) {
        assert_ne!(b.actor_id, a.actor_id, "child {} must be replaced", b.id);
    }

    sup.stop().await;
}

// ============================================================================
// TEST GROUP 3: Policies & Intensity
// ============================================================================

#[tokio::test]
async fn test_permanent_child_restarts_even_on_normal_exit() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sup = Supervisor::start(
        SupervisorOptions::new(Strategy::OneForOne).with_child(child_spec("w", &log)),
    )
    .await
    .expect("supervisor should start");

    let cell = sup.child_cell("w").await.expect("child cell should exist");
    cell.stop_with(ExitReason::Normal).await;
    settle().await;

    let children = sup.get_children().await.expect("get_children should succeed");
    assert_eq!(children.len(), 1);
    assert_ne!(children[0].actor_id, cell.id());
    assert_eq!(children[0].restart_count, 1);

    sup.stop().await;
}

#[tokio::test]
async fn test_transient_child_is_removed_on_normal_exit() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sup = Supervisor::start(
        SupervisorOptions::new(Strategy::OneForOne)
            .with_child(child_spec("w", &log).with_restart(RestartPolicy::Transient)),
    )
    .await
    .expect("supervisor should start");

    let cell = sup.child_cell("w").await.expect("child cell should exist");
    cell.stop_with(ExitReason::Normal).await;
    settle().await;

    assert_eq!(sup.count_children().await.expect("count should succeed"), 0);
    sup.stop().await;
}

#[tokio::test]
async fn test_temporary_child_is_never_restarted() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sup = Supervisor::start(
        SupervisorOptions::new(Strategy::OneForOne)
            .with_child(child_spec("w", &log).with_restart(RestartPolicy::Temporary)),
    )
    .await
    .expect("supervisor should start");

    crash_by_id(&sup, "w").await;
    settle().await;

    assert_eq!(sup.count_children().await.expect("count should succeed"), 0);
    assert!(sup.is_running());
    sup.stop().await;
}

#[tokio::test]
async fn test_intensity_exhaustion_shuts_the_supervisor_down() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sup = Supervisor::start(
        SupervisorOptions::new(Strategy::OneForOne)
            .with_child(child_spec("crasher", &log))
            .with_max_restarts(2)
            .with_within(Duration::from_secs(5)),
    )
    .await
    .expect("supervisor should start");

    // Two crashes are tolerated, the third within the window is not.
    for _ in 0..2 {
        crash_by_id(&sup, "crasher").await;
        settle().await;
        assert!(sup.is_running());
    }
    crash_by_id(&sup, "crasher").await;
    settle().await;

    assert!(!sup.is_running());
    let reason = sup.exit_reason().expect("exit reason should be recorded");
    assert!(
        reason.to_string().contains("max restarts exceeded"),
        "unexpected exit reason: {reason}"
    );
}

#[tokio::test]
async fn test_exhausted_supervisor_escalates_to_its_parent() {
    let log = Arc::new(Mutex::new(Vec::new()));

    let inner_log = Arc::clone(&log);
    let inner_spec = ChildSpec::new("inner-sup", move || {
        let log = Arc::clone(&inner_log);
        async move {
            let sup = Supervisor::start(
                SupervisorOptions::new(Strategy::OneForOne)
                    .with_child(child_spec("crasher", &log))
                    .with_max_restarts(1)
                    .with_within(Duration::from_secs(5)),
            )
            .await?;
            Ok(sup.cell())
        }
    });

    let parent = Supervisor::start(
        SupervisorOptions::new(Strategy::OneForOne).with_child(inner_spec),
    )
    .await
    .expect("parent should start");

    let inner_before = parent
        .child_cell("inner-sup")
        .await
        .expect("inner supervisor cell should exist");

    // Breach the inner supervisor's intensity: 2 crashes against max 1.
    for _ in 0..2 {
        // Talk to the *current* inner supervisor incarnation.
        let inner_cell = parent
            .child_cell("inner-sup")
            .await
            .expect("inner supervisor cell should exist");
        let inner = SupervisorRef::from_cell(&inner_cell)
            .expect("inner cell should be a supervisor");
        crash_by_id(&inner, "crasher").await;
        settle().await;
    }

    // The parent observed the abnormal exit and restarted the inner
    // supervisor; the replacement runs with a fresh crasher child.
    let mut inner_after = None;
    for _ in 0..50 {
        let cell = parent
            .child_cell("inner-sup")
            .await
            .expect("inner supervisor cell should exist");
        if cell.id() != inner_before.id() && cell.is_running() {
            inner_after = Some(cell);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(inner_after.is_some(), "inner supervisor was not replaced");

    parent.stop().await;
}

// ============================================================================
// TEST GROUP 4: Dynamic Operations
// ============================================================================

fn template(log: &Arc<Mutex<Vec<String>>>) -> ChildTemplate {
    let log = Arc::clone(log);
    ChildTemplate::new(move |args| {
        let log = Arc::clone(&log);
        async move {
            let initial = args.get("initial").and_then(|value| value.as_u64()).unwrap_or(0);
            let name = args
                .get("name")
                .and_then(|value| value.as_str())
                .unwrap_or("dynamic")
                .to_string();
            let actor = spawn(Child { name, log, initial }).await?;
            Ok(actor.cell())
        }
    })
}

#[tokio::test]
async fn test_simple_one_for_one_children_use_their_args() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sup = Supervisor::start(
        SupervisorOptions::new(Strategy::SimpleOneForOne).with_child_template(template(&log)),
    )
    .await
    .expect("supervisor should start");

    let (id_a, cell_a) = sup
        .start_child_args(json!({ "name": "a", "initial": 7 }))
        .await
        .expect("dynamic start should succeed");
    let (_id_b, cell_b) = sup
        .start_child_args(json!({ "name": "b", "initial": 9 }))
        .await
        .expect("dynamic start should succeed");
    assert_eq!(sup.count_children().await.expect("count should succeed"), 2);

    let a = cell_a.downcast::<Child>().expect("downcast should succeed");
    let b = cell_b.downcast::<Child>().expect("downcast should succeed");
    assert_eq!(a.call(ChildCall::Get).await.expect("call should succeed"), 7);
    assert_eq!(b.call(ChildCall::Get).await.expect("call should succeed"), 9);

    // Crash one instance; only it restarts, and with its original args.
    a.cast(ChildCast::Fail("instance a crashed".into()));
    settle().await;

    let children = sup.get_children().await.expect("get_children should succeed");
    assert_eq!(children.len(), 2);
    let restarted = children
        .iter()
        .find(|child| child.id == id_a)
        .expect("restarted child should exist");
    assert_eq!(restarted.restart_count, 1);

    let new_cell = sup.child_cell(&id_a).await.expect("child cell should exist");
    let new_a = new_cell.downcast::<Child>().expect("downcast should succeed");
    assert_eq!(
        new_a.call(ChildCall::Get).await.expect("call should succeed"),
        7,
        "restart must reuse the original args"
    );

    sup.stop().await;
}

#[tokio::test]
async fn test_dynamic_child_management_operations() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sup = Supervisor::start(SupervisorOptions::new(Strategy::OneForOne))
        .await
        .expect("supervisor should start");

    let cell = sup
        .start_child(child_spec("worker", &log))
        .await
        .expect("start_child should succeed");

    // Duplicate ids are rejected.
    assert!(matches!(
        sup.start_child(child_spec("worker", &log)).await,
        Err(SupervisorError::DuplicateChild { id }) if id == "worker"
    ));

    // restart_child returns a fresh handle.
    let new_cell = sup
        .restart_child("worker")
        .await
        .expect("restart_child should succeed");
    assert_ne!(cell.id(), new_cell.id());

    // terminate_child removes the child.
    sup.terminate_child("worker")
        .await
        .expect("terminate_child should succeed");
    assert_eq!(sup.count_children().await.expect("count should succeed"), 0);

    // Unknown ids fail with ChildNotFound.
    assert!(matches!(
        sup.terminate_child("worker").await,
        Err(SupervisorError::ChildNotFound { .. })
    ));
    assert!(matches!(
        sup.restart_child("ghost").await,
        Err(SupervisorError::ChildNotFound { .. })
    ));

    sup.stop().await;
}

#[tokio::test]
async fn test_auto_shutdown_on_significant_child() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sup = Supervisor::start(
        SupervisorOptions::new(Strategy::OneForOne)
            .with_child(child_spec("regular", &log))
            .with_child(
                child_spec("important", &log)
                    .with_restart(RestartPolicy::Transient)
                    .significant(),
            )
            .with_auto_shutdown(AutoShutdown::AnySignificant),
    )
    .await
    .expect("supervisor should start");

    // A normal exit of the significant transient child stops the supervisor.
    let cell = sup
        .child_cell("important")
        .await
        .expect("child cell should exist");
    cell.stop_with(ExitReason::Normal).await;

    for _ in 0..50 {
        if !sup.is_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!sup.is_running());
}
