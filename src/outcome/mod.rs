//! Shared results and cancellation signals

pub mod cancel;
pub mod deferred;

pub use cancel::{current_token, CancelToken};
pub use deferred::{deferred, Outcome, Resolver};
