//! Lattice Reactive
//!
//! This crate provides the fine-grained reactive state engine behind the
//! Lattice templating layer. It implements:
//!
//! - Leaf cells ([`Signal`]) and observable records and lists ([`Proxy`])
//! - Automatic dependency tracking and a dynamic dependency graph
//! - Lazily re-evaluated derived values ([`Derived`]) and eager [`Effect`]s
//! - Listeners receiving [`ReactiveEvent`] change descriptors
//! - A batching scheduler that drains notifications level by level
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Reactive primitives, tracking context and runtime
//! - `graph`: Dependency graph and flush queue
//! - `config`: Runtime configuration
//! - `error`: Error type and the error channel
//!
//! # Threading
//!
//! Every thread has its own runtime. Handles are `Rc`-based and cannot be
//! sent to another thread.
//!
//! # Example
//!
//! ```rust
//! use lattice_reactive::{derived, effect, flush_sync, Signal};
//!
//! // Create a signal
//! let count = Signal::new(0);
//!
//! // Create a derived value
//! let doubled = {
//!     let count = count.clone();
//!     derived(move || count.get() * 2)
//! };
//!
//! // Create an effect
//! let _logger = {
//!     let (count, doubled) = (count.clone(), doubled.clone());
//!     effect(move || {
//!         println!("Count: {}, Doubled: {:?}", count.get(), doubled.get());
//!     })
//! };
//!
//! // Update the signal
//! count.set(5);
//! flush_sync().unwrap();
//! // Prints: "Count: 5, Doubled: Ok(10)"
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::{Equality, FlushMode, RuntimeConfig};
pub use error::{subscribe_errors, ReactiveError, Result};
pub use graph::{NodeId, NodeKind};
pub use reactive::{
    batch, config, configure, flush_sync, graph_stats, is_flush_pending, is_reactive,
    is_reactive_leaf, listen, listen_key, listen_with, reactive, settle, snapshot, tick, untrack,
    Classify, Data, Derived, Effect, Entry, FlushReport, GraphStats, Key, ListenOptions,
    Listenable, MemoState, Proxy, Reactive, ReactiveEvent, ReactiveEventType, ReactiveKind,
    Runtime, Signal, Snapshot, Subscription, TrackingContext,
};

/// Create a derived value from `compute`.
pub fn derived<T: Data>(compute: impl Fn() -> T + 'static) -> Derived<T> {
    Derived::new(compute)
}

/// Create an effect and run it once.
pub fn effect(run: impl FnMut() + 'static) -> Effect {
    Effect::new(run)
}
