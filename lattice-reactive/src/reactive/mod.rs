//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, proxies,
//! derived values, effects and listeners. These primitives form the
//! foundation of Lattice's fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for a single mutable value. When a signal's value
//! is read within a tracking scope (such as a derived value or effect), the
//! read becomes a dependency. When the value changes, all dependents are
//! notified.
//!
//! ## Proxies
//!
//! A Proxy makes a record or list observable per key. Reading one key only
//! depends on that key; adding or removing keys changes the proxy's shape.
//!
//! ## Derived Values
//!
//! A Derived value caches the result of a computation over other reactive
//! values. It re-evaluates only when read after one of its inputs changed.
//!
//! ## Effects and Listeners
//!
//! An Effect re-runs a side-effecting function whenever its dependencies
//! change. A listener receives [`ReactiveEvent`] change descriptors instead.
//! Both run during a flush.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to automatically
//! detect dependencies. When a reactive value is read, we check if there is
//! an active tracking scope and, if so, record the read. At the end of the
//! run, the consumer is rewired to exactly the producers it read.
//!
//! This approach (sometimes called "automatic dependency tracking" or
//! "transparent reactivity") is used by SolidJS, Vue 3, and Leptos.

mod context;
mod derived;
mod effect;
mod entry;
mod event;
mod listener;
mod proxy;
mod runtime;
mod signal;
mod snapshot;

pub use context::{ScopeGuard, TrackingContext};
pub use derived::{Derived, MemoState};
pub use effect::Effect;
pub use entry::{is_reactive, is_reactive_leaf, reactive, Classify, Data, Entry, Key, Reactive, ReactiveKind};
pub use event::{ReactiveEvent, ReactiveEventType};
pub use listener::{listen, listen_key, listen_with, ListenOptions, Listenable, Subscription};
pub use proxy::Proxy;
pub use runtime::{
    batch, config, configure, flush_sync, graph_stats, is_flush_pending, settle, tick, untrack,
    FlushReport, GraphStats, Runtime,
};
pub use signal::Signal;
pub use snapshot::{snapshot, Snapshot};

pub(crate) use runtime::Computation;
