//! Event sink system for observability.
//!
//! Sinks are passed explicitly to the orchestrator, supervisor and finalizer;
//! there is no global sink, so concurrent runs never share event state.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use std::sync::Arc;

/// Returns the sink used when a component is built without one.
#[must_use]
pub fn default_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpEventSink)
}
