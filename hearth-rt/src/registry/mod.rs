//! Named actor registry with automatic cleanup on termination.

pub mod error;
pub mod local;

pub use error::RegistryError;
pub use local::Registry;
