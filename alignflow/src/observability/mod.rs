//! Logging setup and timing helpers.

mod logging;
mod timer;

pub use logging::{init_logging, DEFAULT_FILTER};
pub use timer::SpanTimer;
