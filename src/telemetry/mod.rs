//! Telemetry for limiter decisions and stats updates.
//!
//! Components emit [`TallyEvent`]s to a [`TelemetrySink`], which is a
//! `tower::Service<TallyEvent>` so sinks compose with standard tower
//! combinators. Emission is best effort: a sink that is not ready or fails
//! never affects the limiter's decision or an update's outcome.
//!
//! # Event Types
//!
//! - **Limiter**: `Admitted`, `Rejected`
//! - **Stats**: `Updated`, `ScriptReloaded`

pub mod events;
pub mod sinks;

pub use events::{LimiterEvent, StatsEvent, TallyEvent};
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, TelemetrySink};
