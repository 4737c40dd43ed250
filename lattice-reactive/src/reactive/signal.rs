//! Signal Implementation
//!
//! A Signal is the leaf cell of the engine: it holds one value and is a
//! producer node in the dependency graph.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a tracking scope (derived computation,
//!    effect), the read is recorded and becomes an edge after the run.
//!
//! 2. When a signal's value changes, the runtime dirties everything
//!    downstream and queues effects and listeners.
//!
//! 3. Writing a value equal to the current one is a no-op, unless the
//!    cell was created with [`Equality::Never`]. Under the default
//!    [`Equality::Shallow`], dynamic records and lists always notify.
//!
//! # Ownership
//!
//! Handles are cheap `Rc` clones of the same cell. The cell's node leaves the
//! graph when the last handle is dropped.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::{Serialize, Serializer};
use serde_json::Value;

use super::entry::{to_json, Data};
use super::event::ReactiveEvent;
use super::runtime::Runtime;
use crate::config::Equality;
use crate::graph::NodeId;

struct SignalInner<T> {
    id: NodeId,
    value: RefCell<T>,
    equality: Equality,
}

impl<T> Drop for SignalInner<T> {
    fn drop(&mut self) {
        Runtime::unregister(self.id);
    }
}

/// A reactive cell holding a value of type `T`.
///
/// # Example
///
/// ```rust
/// use lattice_reactive::Signal;
///
/// let count = Signal::new(0);
/// assert_eq!(count.get(), 0);
///
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T: Data> {
    inner: Rc<SignalInner<T>>,
}

impl<T: Data> Signal<T> {
    /// Create a new signal using the runtime's default equality.
    pub fn new(value: T) -> Self {
        Self::with_equality(value, Runtime::config().equality)
    }

    /// Create a new signal with an explicit equality strategy.
    pub fn with_equality(value: T, equality: Equality) -> Self {
        let id = Runtime::register_source();
        tracing::trace!(?id, "signal created");
        Self {
            inner: Rc::new(SignalInner {
                id,
                value: RefCell::new(value),
                equality,
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value, recording the read in the running scope.
    pub fn get(&self) -> T {
        Runtime::track(self.inner.id);
        self.inner.value.borrow().clone()
    }

    /// Get the current value without tracking.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value, recording the read.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        Runtime::track(self.inner.id);
        f(&self.inner.value.borrow())
    }

    /// Set a new value. Returns whether dependents were notified.
    pub fn set(&self, value: T) -> bool {
        let old = {
            let mut slot = self.inner.value.borrow_mut();
            if unchanged(&*slot, &value, self.inner.equality) {
                return false;
            }
            std::mem::replace(&mut *slot, value)
        };

        let id = self.inner.id;
        if Runtime::dependent_count(id) > 0 {
            let new = to_json(&*self.inner.value.borrow());
            Runtime::notify(id, ReactiveEvent::value_set(id, None, to_json(&old), new));
        }
        true
    }

    /// Compute the next value from the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> bool {
        let next = f(&self.inner.value.borrow());
        self.set(next)
    }

    pub fn equality(&self) -> Equality {
        self.inner.equality
    }

    /// Number of consumers currently reading this signal.
    pub fn subscriber_count(&self) -> usize {
        Runtime::dependent_count(self.inner.id)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Whether writing `next` over `current` is a no-op under `equality`.
///
/// Under [`Equality::Shallow`] a dynamic record or list (`Value::Object`,
/// `Value::Array`) always counts as changed, as it does inside a proxy.
fn unchanged<T: Data>(current: &T, next: &T, equality: Equality) -> bool {
    match equality {
        Equality::Never => false,
        Equality::Deep => current == next,
        Equality::Shallow => !is_structured(next) && current == next,
    }
}

fn is_structured<T: 'static>(value: &T) -> bool {
    (value as &dyn Any)
        .downcast_ref::<Value>()
        .is_some_and(|value| matches!(value, Value::Object(_) | Value::Array(_)))
}

impl<T: Data> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Data + fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

/// Formatting a signal reads it.
impl<T: Data + fmt::Display> fmt::Display for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with(|value| fmt::Display::fmt(value, f))
    }
}

impl<T: Data> Serialize for Signal<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.inner.value.borrow().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Derived, TrackingContext};
    use serde_json::json;

    #[test]
    fn signal_get_set() {
        let signal = Signal::new(42);
        assert_eq!(signal.get(), 42);

        signal.set(100);
        assert_eq!(signal.get(), 100);
    }

    #[test]
    fn signal_update() {
        let signal = Signal::new(10);
        signal.update(|v| v + 5);
        assert_eq!(signal.get(), 15);
    }

    #[test]
    fn equal_writes_are_noops() {
        let signal = Signal::new(String::from("a"));
        assert!(!signal.set(String::from("a")));
        assert!(signal.set(String::from("b")));

        let always = Signal::with_equality(1, Equality::Never);
        assert!(always.set(1));
    }

    #[test]
    fn structured_values_follow_the_equality_policy() {
        let shallow = Signal::with_equality(json!([1]), Equality::Shallow);
        assert!(shallow.set(json!([1])));
        assert!(!Signal::with_equality(json!("x"), Equality::Shallow).set(json!("x")));

        let deep = Signal::with_equality(json!({ "a": [1] }), Equality::Deep);
        assert!(!deep.set(json!({ "a": [1] })));
        assert!(deep.set(json!({ "a": [2] })));

        let typed = Signal::with_equality(vec![1, 2], Equality::Shallow);
        assert!(!typed.set(vec![1, 2]));
    }

    #[test]
    fn clones_share_state() {
        let signal = Signal::new(json!(1));
        let other = signal.clone();
        other.set(json!(2));
        assert_eq!(signal.get(), Value::from(2));
        assert!(signal.ptr_eq(&other));
    }

    #[test]
    fn reads_are_tracked_only_inside_scopes() {
        let signal = Signal::new(1);
        let derived = {
            let signal = signal.clone();
            Derived::new(move || signal.get() * 2)
        };
        assert_eq!(signal.subscriber_count(), 0);

        assert_eq!(derived.get(), Ok(2));
        assert_eq!(signal.subscriber_count(), 1);

        signal.get_untracked();
        assert_eq!(TrackingContext::depth(), 0);
    }

    #[test]
    fn display_coerces_the_value() {
        let signal = Signal::new(7);
        assert_eq!(format!("count={signal}"), "count=7");
        assert_eq!(serde_json::to_value(&signal).unwrap(), json!(7));
    }

    #[test]
    fn dropping_the_last_handle_leaves_the_graph() {
        let before = Runtime::stats().nodes;
        let signal = Signal::new(0);
        let clone = signal.clone();
        drop(signal);
        assert_eq!(Runtime::stats().nodes, before + 1);
        drop(clone);
        assert_eq!(Runtime::stats().nodes, before);
    }
}
