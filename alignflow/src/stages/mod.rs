//! Stage descriptors.
//!
//! A stage is one external program in a chain. Its descriptor carries the
//! structured argument list handed straight to process creation (never a
//! shell string) together with where its stdin comes from and where its
//! stdout goes.

mod descriptor;

pub use descriptor::{InputMode, OutputMode, StageDescriptor};
