//! Plain copies of reactive values.
//!
//! Snapshots never track: taking one inside a derived computation or an
//! effect adds no dependency.

use serde_json::Value;

use super::context::TrackingContext;
use super::derived::Derived;
use super::entry::{to_json, Data, Entry, Reactive};
use super::proxy::Proxy;
use super::signal::Signal;

/// Conversion to plain data.
pub trait Snapshot {
    fn to_snapshot(&self) -> Value;
}

impl Snapshot for Value {
    fn to_snapshot(&self) -> Value {
        self.clone()
    }
}

impl<T: Data> Snapshot for Signal<T> {
    fn to_snapshot(&self) -> Value {
        to_json(&self.get_untracked())
    }
}

impl Snapshot for Proxy {
    fn to_snapshot(&self) -> Value {
        self.snapshot()
    }
}

/// The current value, or the last good one if the computation fails now.
impl<T: Data> Snapshot for Derived<T> {
    fn to_snapshot(&self) -> Value {
        match self.get_untracked() {
            Ok(value) => to_json(&value),
            Err(error) => {
                tracing::warn!(id = ?self.id(), %error, "derived value unavailable in snapshot");
                self.peek().map(|value| to_json(&value)).unwrap_or(Value::Null)
            }
        }
    }
}

impl Snapshot for Reactive {
    fn to_snapshot(&self) -> Value {
        match self {
            Reactive::Leaf(signal) => signal.to_snapshot(),
            Reactive::Proxy(proxy) => proxy.to_snapshot(),
            Reactive::Derived(derived) => derived.to_snapshot(),
        }
    }
}

impl Snapshot for Entry {
    fn to_snapshot(&self) -> Value {
        match self {
            Entry::Plain(value) => value.clone(),
            Entry::Reactive(reactive) => reactive.to_snapshot(),
        }
    }
}

impl<S: Snapshot + ?Sized> Snapshot for &S {
    fn to_snapshot(&self) -> Value {
        (**self).to_snapshot()
    }
}

/// Deep plain copy of `value`, without tracking.
pub fn snapshot<S: Snapshot + ?Sized>(value: &S) -> Value {
    TrackingContext::untracked(|| value.to_snapshot())
}
