//! Execution context bridge.
//!
//! One dedicated thread owns one current-thread tokio runtime for the life of
//! the manager. Every remote-client operation runs there; callers on any other
//! thread enqueue work through a channel and block on a per-request reply
//! channel until the result arrives or their deadline passes.

mod loop_impl;
pub mod request;
pub mod worker;

pub use request::BridgeRequest;
pub use worker::{Bridge, PendingResult};
