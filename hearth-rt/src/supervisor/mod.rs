//! Supervision: ordered children, restart strategies, intensity limiting.
//!
//! # Architecture
//!
//! - [`types`] - Child specs, restart policies, strategies, options
//! - [`intensity`] - Sliding-window restart limiter
//! - [`core`] - The supervision engine (a supervisor is itself an actor)
//! - [`handle`] - `Supervisor::start` and `SupervisorRef`
//! - [`error`] - `SupervisorError`

pub mod error;
pub mod handle;
pub mod intensity;
pub mod types;

pub(crate) mod core;

pub use error::SupervisorError;
pub use handle::{Supervisor, SupervisorRef};
pub use intensity::RestartWindow;
pub use types::{
    AutoShutdown, ChildInfo, ChildSpec, ChildTemplate, RestartPolicy, Strategy,
    SupervisorOptions, DEFAULT_MAX_RESTARTS, DEFAULT_RESTART_WINDOW, DEFAULT_START_TIMEOUT,
};
