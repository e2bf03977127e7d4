//! Observability subsystem for formwork
//!
//! - Structured logging (JSON lines on stderr)
//! - Typed engine events
//! - Monotonic counters
//!
//! Observability is read-only: a failure to log never fails the
//! operation being observed.
//!
//! # Usage
//!
//! ```ignore
//! use formwork::observability::{log_event, Event, EngineMetrics};
//!
//! log_event(Event::SchemaComposed, &[("class_id", "Person")]);
//!
//! let metrics = EngineMetrics::new();
//! metrics.increment_schemas_composed();
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{EngineMetrics, MetricsSnapshot};

/// Log an event at its default severity
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
