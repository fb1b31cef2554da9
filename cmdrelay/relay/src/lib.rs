#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Command relay runtime: configuration, process execution, and the bus message loop.

/// Explicit per-loop message budget.
pub mod budget;
/// TOML configuration loading.
pub mod config;
/// Process execution of resolved invocations.
pub mod executor;
/// The message loop tying bus, dispatcher, and executor together.
pub mod relay;
/// Structured logs and lifecycle events.
pub mod telemetry;

/// Prelude exports for embedding the relay.
pub mod prelude {
    pub use crate::budget::MessageBudget;
    pub use crate::config::{RelayConfig, RuntimeSettings};
    pub use crate::executor::{CommandRunner, ExecError, ProcessExecutor};
    pub use crate::relay::{wait_for_shutdown, MessageOutcome, Relay, RelaySummary, StopReason};
    pub use crate::telemetry::{RelayTelemetry, RelayTelemetryBuilder};
    pub use cmdrelay_dispatch::{Dispatch, DispatchError, Dispatcher, Invocation, Pattern, PatternTable};
}
