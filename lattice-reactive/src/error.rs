//! Error Types
//!
//! Every fallible operation in the engine returns [`ReactiveError`]. Errors
//! raised by derived computations propagate to whoever triggered the
//! evaluation. Errors raised by listeners and effects during a flush are
//! isolated: they are logged, published on the error channel, and collected
//! into the [`FlushReport`](crate::FlushReport) of a synchronous flush.
//!
//! # Error Channel
//!
//! The channel is per runtime (one per thread). Any number of receivers can
//! be attached with [`subscribe_errors`]; closed receivers are pruned the
//! next time an error is published.

use std::cell::RefCell;

use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::graph::NodeId;
use crate::reactive::Key;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReactiveError>;

/// Errors produced by the reactive engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReactiveError {
    /// Only records and lists can be wrapped in a proxy.
    #[error("cannot wrap {found} as a reactive proxy")]
    InvalidWrapTarget { found: &'static str },

    /// A derived computation read itself, directly or transitively.
    #[error("cyclic dependency while evaluating {node:?}")]
    CyclicDependency { node: NodeId },

    /// The listener handle was already disposed.
    #[error("subscription {node:?} is already disposed")]
    StaleSubscription { node: NodeId },

    /// `flush_sync` was called while a flush was running.
    #[error("flush_sync called from inside a running flush")]
    InvalidReentrantFlush,

    /// Consumers kept re-queueing each other past the configured limit.
    #[error("flush did not settle after {rounds} rounds")]
    FlushOverflow { rounds: usize },

    /// The key kind does not match the proxy shape.
    #[error("key `{key}` is not valid for a {shape}")]
    InvalidKey { key: Key, shape: &'static str },

    /// A list access past the end.
    #[error("index {index} out of bounds for list of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// A listener or effect panicked while being processed.
    #[error("callback of {node:?} panicked: {message}")]
    CallbackPanicked { node: NodeId, message: String },

    /// Tracking scopes were still open when the context was torn down.
    #[error("{depth} tracking scope(s) still active at teardown")]
    LeakedScope { depth: usize },

    /// The runtime configuration could not be parsed.
    #[error("invalid runtime configuration: {0}")]
    InvalidConfig(String),

    /// A user computation failed.
    #[error("{0}")]
    Computation(String),
}

impl ReactiveError {
    /// Build a user-level computation error.
    pub fn computation(message: impl Into<String>) -> Self {
        Self::Computation(message.into())
    }
}

thread_local! {
    static ERROR_SINKS: RefCell<Vec<UnboundedSender<ReactiveError>>> = RefCell::new(Vec::new());
}

/// Attach a receiver to this thread's error channel.
///
/// Failures from deferred flushes only surface here (and in the log).
pub fn subscribe_errors() -> UnboundedReceiver<ReactiveError> {
    let (tx, rx) = mpsc::unbounded_channel();
    ERROR_SINKS.with(|sinks| sinks.borrow_mut().push(tx));
    rx
}

/// Log an isolated failure and publish it to every live receiver.
pub(crate) fn publish(error: &ReactiveError) {
    tracing::error!(%error, "reactive consumer failed");
    let _ = ERROR_SINKS.try_with(|sinks| {
        sinks
            .borrow_mut()
            .retain(|tx| tx.send(error.clone()).is_ok());
    });
}

/// Turn a caught panic payload into a readable message.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
