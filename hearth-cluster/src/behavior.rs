//! Dynamic behaviors and the per-node behavior registry.
//!
//! Remote spawn works on names: the requesting node ships a behavior name
//! plus JSON args; the hosting node resolves the name in its
//! [`BehaviorRegistry`] and spawns a local actor around the produced
//! [`DynBehavior`]. Registration must happen on every node that may host
//! the behavior before a distributed supervisor tries to place a child
//! there.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;

// Layer 3: Internal module imports
use hearth_rt::{Behavior, ExitReason};

/// Failure raised by a dynamic behavior callback.
///
/// Dynamic behaviors cross the spawn boundary type-erased, so their error
/// type is a plain message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct BehaviorFailure {
    message: String,
}

impl BehaviorFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for BehaviorFailure {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for BehaviorFailure {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// A behavior whose messages are JSON values, suitable for remote
/// instantiation.
///
/// Unlike [`hearth_rt::Behavior`], state lives inside the implementor:
/// the type is erased at the registry boundary, so there is no associated
/// state type to thread through.
#[async_trait]
pub trait DynBehavior: Send + 'static {
    /// Initialize with the spawn arguments.
    async fn init(&mut self, args: Value) -> Result<(), BehaviorFailure>;

    /// Handle a synchronous call.
    async fn handle_call(&mut self, msg: Value) -> Result<Value, BehaviorFailure>;

    /// Handle a fire-and-forget cast.
    async fn handle_cast(&mut self, msg: Value) -> Result<(), BehaviorFailure>;

    /// Best-effort cleanup; failures are logged by the runtime.
    async fn terminate(&mut self, _reason: &ExitReason) {}
}

/// Factory producing fresh [`DynBehavior`] instances.
pub type DynBehaviorFactory = Arc<dyn Fn() -> Box<dyn DynBehavior> + Send + Sync>;

/// Process-wide name → behavior-factory mapping used by remote spawn.
///
/// # Examples
///
/// ```ignore
/// let behaviors = BehaviorRegistry::new();
/// behaviors.register("counter", || Box::new(CounterBehavior::default()));
/// assert!(behaviors.has("counter"));
/// ```
#[derive(Clone, Default)]
pub struct BehaviorRegistry {
    factories: Arc<DashMap<String, DynBehaviorFactory>>,
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self {
            factories: Arc::new(DashMap::new()),
        }
    }

    /// Register a behavior under `name`, replacing any previous factory.
    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn DynBehavior> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// The factory registered under `name`, if any.
    pub fn get(&self, name: &str) -> Option<DynBehaviorFactory> {
        self.factories.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether `name` is registered.
    pub fn has(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// All registered behavior names.
    pub fn names(&self) -> Vec<String> {
        self.factories.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl std::fmt::Debug for BehaviorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BehaviorRegistry")
            .field("behaviors", &self.factories.len())
            .finish()
    }
}

/// Adapter running a [`DynBehavior`] as a regular local actor with
/// `Value`-typed messages.
pub(crate) struct DynActor {
    inner: Box<dyn DynBehavior>,
    args: Value,
}

impl DynActor {
    pub(crate) fn new(inner: Box<dyn DynBehavior>, args: Value) -> Self {
        Self { inner, args }
    }
}

#[async_trait]
impl Behavior for DynActor {
    type State = ();
    type Call = Value;
    type Reply = Value;
    type Cast = Value;
    type Error = BehaviorFailure;

    async fn init(&mut self) -> Result<(), BehaviorFailure> {
        let args = self.args.clone();
        self.inner.init(args).await
    }

    async fn handle_call(&mut self, msg: Value, _state: &mut ()) -> Result<Value, BehaviorFailure> {
        self.inner.handle_call(msg).await
    }

    async fn handle_cast(&mut self, msg: Value, _state: &mut ()) -> Result<(), BehaviorFailure> {
        self.inner.handle_cast(msg).await
    }

    async fn terminate(
        &mut self,
        reason: &ExitReason,
        _state: &mut (),
    ) -> Result<(), BehaviorFailure> {
        self.inner.terminate(reason).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Echo {
        prefix: String,
    }

    #[async_trait]
    impl DynBehavior for Echo {
        async fn init(&mut self, args: Value) -> Result<(), BehaviorFailure> {
            self.prefix = args
                .get("prefix")
                .and_then(|value| value.as_str())
                .unwrap_or_default()
                .to_string();
            Ok(())
        }

        async fn handle_call(&mut self, msg: Value) -> Result<Value, BehaviorFailure> {
            let text = msg.as_str().ok_or_else(|| BehaviorFailure::new("expected a string"))?;
            Ok(Value::String(format!("{}{}", self.prefix, text)))
        }

        async fn handle_cast(&mut self, _msg: Value) -> Result<(), BehaviorFailure> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = BehaviorRegistry::new();
        assert!(!registry.has("echo"));
        assert!(registry.get("echo").is_none());

        registry.register("echo", || Box::new(Echo::default()));
        assert!(registry.has("echo"));
        assert!(registry.get("echo").is_some());
        assert_eq!(registry.names(), vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn test_dyn_actor_runs_behavior_with_args() {
        let actor = hearth_rt::spawn(DynActor::new(
            Box::new(Echo::default()),
            serde_json::json!({ "prefix": "re: " }),
        ))
        .await
        .expect("spawn should succeed");

        let reply = actor
            .call(Value::String("hello".into()))
            .await
            .expect("call should succeed");
        assert_eq!(reply, Value::String("re: hello".into()));

        actor.stop().await;
    }
}
