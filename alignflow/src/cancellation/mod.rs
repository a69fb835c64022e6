//! Cancellation of running pipelines.
//!
//! The supervisor waits on a [`CancellationToken`] alongside its stage
//! processes; cancelling the token terminates and reaps every live stage.

mod token;

pub use token::CancellationToken;
