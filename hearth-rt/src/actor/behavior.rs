//! The `Behavior` trait: the four-callback contract every actor implements.

// Layer 1: Standard library imports
use std::error::Error;

// Layer 2: Third-party crate imports
use async_trait::async_trait;

// Layer 3: Internal module imports
use crate::message::ExitReason;

/// The four-callback contract defining an actor.
///
/// A behavior bundles initialization, synchronous call handling, asynchronous
/// cast handling, and best-effort cleanup. The runtime owns the `State` value
/// and guarantees that at most one callback runs at a time per actor, in
/// mailbox FIFO order. Callbacks may suspend freely; a suspended handler
/// blocks only its own actor.
///
/// # Associated Types
///
/// - `State`: produced by `init`, threaded through every handler
/// - `Call` / `Reply`: request and response types for synchronous calls
/// - `Cast`: fire-and-forget message type
/// - `Error`: the error type handlers can fail with
///
/// # Failure semantics
///
/// - `init` error or timeout: the spawn fails, the actor never runs.
/// - `handle_call` error: delivered to that caller; the actor keeps running.
/// - `handle_cast` error: swallowed, published as a crashed lifecycle event;
///   a supervising parent treats it as a child failure.
/// - `terminate` error: logged; teardown proceeds regardless.
///
/// # Examples
///
/// ```rust
/// use hearth_rt::{Behavior, ExitReason};
/// use async_trait::async_trait;
/// use std::convert::Infallible;
///
/// struct Counter;
///
/// #[derive(Debug)]
/// enum CounterCall { Get }
///
/// #[derive(Debug)]
/// enum CounterCast { Increment }
///
/// #[async_trait]
/// impl Behavior for Counter {
///     type State = u64;
///     type Call = CounterCall;
///     type Reply = u64;
///     type Cast = CounterCast;
///     type Error = Infallible;
///
///     async fn init(&mut self) -> Result<u64, Infallible> {
///         Ok(0)
///     }
///
///     async fn handle_call(
///         &mut self,
///         msg: CounterCall,
///         state: &mut u64,
///     ) -> Result<u64, Infallible> {
///         match msg {
///             CounterCall::Get => Ok(*state),
///         }
///     }
///
///     async fn handle_cast(
///         &mut self,
///         msg: CounterCast,
///         state: &mut u64,
///     ) -> Result<(), Infallible> {
///         match msg {
///             CounterCast::Increment => *state += 1,
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Behavior: Send + 'static {
    /// The state value owned by the runtime on behalf of this actor.
    type State: Send + 'static;

    /// Synchronous request message type.
    type Call: Send + 'static;

    /// Reply type produced by `handle_call`.
    type Reply: Send + 'static;

    /// Fire-and-forget message type.
    type Cast: Send + 'static;

    /// The error type handlers can fail with.
    type Error: Error + Send + Sync + 'static;

    /// Produce the initial state.
    ///
    /// Runs under the spawn-time init timeout (default 5 s). An error or a
    /// timeout fails the spawn with an initialization error.
    async fn init(&mut self) -> Result<Self::State, Self::Error>;

    /// Handle a synchronous call; the returned reply unblocks the caller.
    async fn handle_call(
        &mut self,
        msg: Self::Call,
        state: &mut Self::State,
    ) -> Result<Self::Reply, Self::Error>;

    /// Handle an asynchronous cast. No reply is delivered.
    async fn handle_cast(
        &mut self,
        msg: Self::Cast,
        state: &mut Self::State,
    ) -> Result<(), Self::Error>;

    /// Best-effort cleanup before the actor stops.
    ///
    /// Runs after the mailbox drain on graceful stops; skipped on forced
    /// termination. Failures are logged and never abort teardown.
    /// Long-running work here delays `stop` callers and may hit the
    /// supervisor's shutdown timeout.
    async fn terminate(
        &mut self,
        _reason: &ExitReason,
        _state: &mut Self::State,
    ) -> Result<(), Self::Error> {
        Ok(())
    }
}
