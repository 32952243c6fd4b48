use crate::store::ScriptHandle;
use chrono::NaiveDate;
use std::fmt;

#[cfg(feature = "telemetry-json")]
use serde_json::json;

/// Events emitted by the limiter and the stats aggregator.
#[derive(Debug, Clone, PartialEq)]
pub enum TallyEvent {
    /// Sliding-window limiter events
    Limiter(LimiterEvent),
    /// Stats aggregator events
    Stats(StatsEvent),
}

/// Outcome of one `hit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimiterEvent {
    /// The hit fit inside the window.
    Admitted {
        /// Limiter name
        name: String,
        /// Events in the window after this hit
        hits: u64,
        /// Configured threshold
        max_hits: u64,
    },
    /// The window was saturated. The hit is still recorded.
    Rejected {
        /// Limiter name
        name: String,
        /// Events in the window after this hit
        hits: u64,
        /// Configured threshold
        max_hits: u64,
    },
}

/// Events emitted by the stats aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsEvent {
    /// A reading was folded into its daily record.
    Updated {
        /// Site the reading belongs to
        site_id: u64,
        /// Period bucket that was updated
        day: NaiveDate,
        /// Readings recorded for that day, including this one
        readings: i64,
    },
    /// The store had lost the compare-and-update script and it was recompiled.
    ScriptReloaded {
        /// New handle
        handle: ScriptHandle,
    },
}

impl fmt::Display for TallyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TallyEvent::Limiter(event) => write!(f, "Limiter::{}", event),
            TallyEvent::Stats(event) => write!(f, "Stats::{}", event),
        }
    }
}

impl fmt::Display for LimiterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterEvent::Admitted { name, hits, max_hits } => {
                write!(f, "Admitted({}, {}/{})", name, hits, max_hits)
            }
            LimiterEvent::Rejected { name, hits, max_hits } => {
                write!(f, "Rejected({}, {}/{})", name, hits, max_hits)
            }
        }
    }
}

impl fmt::Display for StatsEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsEvent::Updated { site_id, day, readings } => {
                write!(f, "Updated(site={}, day={}, readings={})", site_id, day, readings)
            }
            StatsEvent::ScriptReloaded { handle } => write!(f, "ScriptReloaded({})", handle),
        }
    }
}

/// Convert a TallyEvent into a JSON value for sinks.
#[cfg(feature = "telemetry-json")]
pub fn event_to_json(event: &TallyEvent) -> serde_json::Value {
    match event {
        TallyEvent::Limiter(l) => match l {
            LimiterEvent::Admitted { name, hits, max_hits } => json!({
                "kind": "limiter_admitted",
                "name": name,
                "hits": *hits,
                "max_hits": *max_hits,
            }),
            LimiterEvent::Rejected { name, hits, max_hits } => json!({
                "kind": "limiter_rejected",
                "name": name,
                "hits": *hits,
                "max_hits": *max_hits,
            }),
        },
        TallyEvent::Stats(s) => match s {
            StatsEvent::Updated { site_id, day, readings } => json!({
                "kind": "stats_updated",
                "site_id": *site_id,
                "day": day.to_string(),
                "readings": *readings,
            }),
            StatsEvent::ScriptReloaded { handle } => {
                json!({ "kind": "script_reloaded", "handle": handle.as_str() })
            }
        },
    }
}
