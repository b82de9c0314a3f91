//! # hearth-rt - Erlang-Inspired Actor and Supervision Runtime
//!
//! Isolated stateful actors with serialized, ordered message handling, a
//! named registry with automatic cleanup, and BEAM-style supervision trees
//! with restart-intensity limiting.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use hearth_rt::prelude::*;
//! use async_trait::async_trait;
//! use std::convert::Infallible;
//!
//! // 1. Define your behavior
//! struct Counter;
//!
//! enum Call { Get }
//! enum Cast { Increment }
//!
//! #[async_trait]
//! impl Behavior for Counter {
//!     type State = u64;
//!     type Call = Call;
//!     type Reply = u64;
//!     type Cast = Cast;
//!     type Error = Infallible;
//!
//!     async fn init(&mut self) -> Result<u64, Infallible> { Ok(0) }
//!
//!     async fn handle_call(&mut self, _: Call, state: &mut u64) -> Result<u64, Infallible> {
//!         Ok(*state)
//!     }
//!
//!     async fn handle_cast(&mut self, _: Cast, state: &mut u64) -> Result<(), Infallible> {
//!         *state += 1;
//!         Ok(())
//!     }
//! }
//!
//! // 2. Spawn and use it
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let counter = hearth_rt::spawn(Counter).await?;
//!     counter.cast(Cast::Increment);
//!     counter.cast(Cast::Increment);
//!     assert_eq!(counter.call(Call::Get).await?, 2);
//!     Ok(())
//! }
//! ```
//!
//! # Guarantees
//!
//! - **Serialization**: at most one handler runs at a time per actor, in
//!   mailbox FIFO order. This is the sole mutual-exclusion primitive exposed
//!   to user code.
//! - **Isolation**: a handler failure never propagates into another actor;
//!   call errors go to the caller, cast errors are published as lifecycle
//!   events.
//! - **Supervision**: ordered start, reverse-ordered stop, `one_for_one` /
//!   `one_for_all` / `rest_for_one` / `simple_one_for_one` strategies,
//!   per-child restart policies, and a sliding-window intensity limiter
//!   that shuts the supervisor down when breached.
//!
//! # Module Organization
//!
//! - [`actor`] - Behavior trait, handles, lifecycle, mailbox loop
//! - [`registry`] - Unique name → actor mapping with eager cleanup
//! - [`supervisor`] - Supervision trees and restart strategies
//! - [`message`] - Envelopes and exit reasons
//! - [`util`] - Serde helpers

pub mod actor;
pub mod message;
pub mod registry;
pub mod supervisor;
pub mod util;

// Re-export commonly used types
pub use actor::{
    spawn, spawn_with, ActorCell, ActorError, ActorId, ActorRef, ActorStats, ActorStatus,
    Behavior, CallOptions, LifecycleEvent, LifecycleEventKind, SpawnOptions,
    DEFAULT_CALL_TIMEOUT, DEFAULT_INIT_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use message::ExitReason;
pub use registry::{Registry, RegistryError};
pub use supervisor::{
    AutoShutdown, ChildInfo, ChildSpec, ChildTemplate, RestartPolicy, RestartWindow, Strategy,
    Supervisor, SupervisorError, SupervisorOptions, SupervisorRef, DEFAULT_MAX_RESTARTS,
    DEFAULT_RESTART_WINDOW,
};

/// Convenience re-exports for application code.
pub mod prelude {
    pub use crate::actor::{
        spawn, spawn_with, ActorCell, ActorError, ActorRef, ActorStatus, Behavior, CallOptions,
        SpawnOptions,
    };
    pub use crate::message::ExitReason;
    pub use crate::registry::Registry;
    pub use crate::supervisor::{
        ChildSpec, ChildTemplate, RestartPolicy, Strategy, Supervisor, SupervisorOptions,
        SupervisorRef,
    };
}
