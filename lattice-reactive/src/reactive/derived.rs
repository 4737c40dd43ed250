//! Derived Computation
//!
//! A derived computation is a cached value computed from other reactive
//! values. It is both a consumer (of whatever its computation reads) and a
//! producer (for whoever reads it).
//!
//! # How Derived Values Work
//!
//! 1. On first access, the computation runs inside a tracking scope and the
//!    result is cached. The reads become the node's dependencies.
//!
//! 2. When any upstream producer changes, the runtime marks the value dirty
//!    right away. The previously published value is kept as a baseline.
//!
//! 3. A dirty value is recomputed on the next read. Values nobody reads stay
//!    dirty, so no work is wasted on them.
//!
//! 4. If the value has observers (listeners, effects, other derived values),
//!    the flush recomputes it and compares against the baseline. Observers
//!    are only notified when the value actually moved.
//!
//! # Errors
//!
//! A failing computation leaves the value dirty and hands the error to the
//! reader. Reading a derived value from inside its own computation, directly
//! or through other derived values, fails with
//! [`ReactiveError::CyclicDependency`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::context::TrackingContext;
use super::entry::{to_json, Data};
use super::event::ReactiveEvent;
use super::runtime::{Computation, Runtime};
use crate::error::{ReactiveError, Result};
use crate::graph::{NodeId, NodeKind};

/// Cache state of a derived value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up-to-date.
    Clean,

    /// An input changed, or the value was never computed.
    Dirty,

    /// The computation is running right now.
    Evaluating,
}

struct Cache<T> {
    value: Option<T>,
    dirty: bool,
    /// Value observers last saw, captured when the cache went dirty.
    baseline: Option<T>,
}

struct DerivedInner<T> {
    id: NodeId,
    compute: Box<dyn Fn() -> Result<T>>,
    cache: RefCell<Cache<T>>,
    evaluating: Cell<bool>,
    evaluations: Cell<usize>,
}

/// Resets the evaluating flag even if the computation unwinds.
struct Evaluating<'a>(&'a Cell<bool>);

impl Drop for Evaluating<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl<T: Data> DerivedInner<T> {
    fn evaluate(&self) -> Result<T> {
        {
            let cache = self.cache.borrow();
            if !cache.dirty {
                if let Some(value) = &cache.value {
                    return Ok(value.clone());
                }
            }
        }
        if self.evaluating.get() {
            return Err(ReactiveError::CyclicDependency { node: self.id });
        }

        self.evaluating.set(true);
        let _evaluating = Evaluating(&self.evaluating);
        let result = Runtime::run_tracked(self.id, || (self.compute)());
        self.evaluations.set(self.evaluations.get() + 1);

        match result {
            Ok(value) => {
                let mut cache = self.cache.borrow_mut();
                cache.value = Some(value.clone());
                cache.dirty = false;
                Ok(value)
            }
            Err(error) => {
                tracing::debug!(id = ?self.id, %error, "derived computation failed");
                Err(error)
            }
        }
    }
}

impl<T: Data> Computation for DerivedInner<T> {
    fn invalidate(&self) {
        let mut cache = self.cache.borrow_mut();
        if !cache.dirty {
            cache.dirty = true;
            if cache.baseline.is_none() {
                cache.baseline = cache.value.clone();
            }
        }
    }

    fn process(&self, _events: Vec<ReactiveEvent>) -> Result<Option<ReactiveEvent>> {
        if Runtime::dependent_count(self.id) == 0 {
            // Unobserved: stay lazy until somebody reads.
            self.cache.borrow_mut().baseline = None;
            return Ok(None);
        }

        let current = self.evaluate()?;
        let baseline = self.cache.borrow_mut().baseline.take();
        match baseline {
            Some(old) if old != current => Ok(Some(ReactiveEvent::value_set(
                self.id,
                None,
                to_json(&old),
                to_json(&current),
            ))),
            _ => Ok(None),
        }
    }
}

impl<T> Drop for DerivedInner<T> {
    fn drop(&mut self) {
        Runtime::unregister(self.id);
    }
}

/// A cached value derived from other reactive values.
///
/// # Example
///
/// ```rust
/// use lattice_reactive::{Derived, Signal};
///
/// let price = Signal::new(10);
/// let quantity = Signal::new(3);
///
/// let total = {
///     let (price, quantity) = (price.clone(), quantity.clone());
///     Derived::new(move || price.get() * quantity.get())
/// };
/// assert_eq!(total.get(), Ok(30));
///
/// quantity.set(4);
/// assert_eq!(total.get(), Ok(40));
/// ```
pub struct Derived<T: Data> {
    inner: Rc<DerivedInner<T>>,
}

impl<T: Data> Derived<T> {
    /// Create a derived value from an infallible computation.
    ///
    /// Nothing runs until the first read.
    pub fn new(compute: impl Fn() -> T + 'static) -> Self {
        Self::try_new(move || Ok(compute()))
    }

    /// Create a derived value from a computation that can fail.
    pub fn try_new(compute: impl Fn() -> Result<T> + 'static) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<DerivedInner<T>>| {
            let computation: Weak<dyn Computation> = weak.clone();
            DerivedInner {
                id: Runtime::register_consumer(NodeKind::Derived, computation),
                compute: Box::new(compute),
                cache: RefCell::new(Cache {
                    value: None,
                    dirty: true,
                    baseline: None,
                }),
                evaluating: Cell::new(false),
                evaluations: Cell::new(0),
            }
        });
        tracing::trace!(id = ?inner.id, "derived created");
        Self { inner }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the value, recomputing if dirty, and record the read.
    pub fn get(&self) -> Result<T> {
        if self.inner.evaluating.get() {
            return Err(ReactiveError::CyclicDependency { node: self.inner.id });
        }
        Runtime::track(self.inner.id);
        self.inner.evaluate()
    }

    /// Get the value without recording the read.
    pub fn get_untracked(&self) -> Result<T> {
        TrackingContext::untracked(|| self.get())
    }

    pub fn state(&self) -> MemoState {
        if self.inner.evaluating.get() {
            MemoState::Evaluating
        } else if self.inner.cache.borrow().dirty {
            MemoState::Dirty
        } else {
            MemoState::Clean
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.cache.borrow().dirty
    }

    /// How many times the computation has run.
    pub fn evaluation_count(&self) -> usize {
        self.inner.evaluations.get()
    }

    pub fn dependency_count(&self) -> usize {
        Runtime::dependency_count(self.inner.id)
    }

    pub fn subscriber_count(&self) -> usize {
        Runtime::dependent_count(self.inner.id)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The cached value, if clean, without running anything.
    pub(crate) fn peek(&self) -> Option<T> {
        let cache = self.inner.cache.borrow();
        cache.value.clone()
    }
}

impl<T: Data> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Data> fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derived")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("evaluations", &self.inner.evaluations.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Signal;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn derived_basic() {
        let derived = Derived::new(|| 42);
        assert_eq!(derived.get(), Ok(42));
    }

    #[test]
    fn derived_caches() {
        let call_count = Arc::new(AtomicI32::new(0));
        let counter = call_count.clone();

        let derived = Derived::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            42
        });
        assert_eq!(call_count.load(Ordering::SeqCst), 0);

        derived.get().unwrap();
        derived.get().unwrap();
        derived.get().unwrap();
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn derived_recomputes_lazily_after_change() {
        let source = Signal::new(1);
        let derived = {
            let source = source.clone();
            Derived::new(move || source.get() + 1)
        };
        assert_eq!(derived.get(), Ok(2));
        assert_eq!(derived.state(), MemoState::Clean);

        source.set(10);
        assert_eq!(derived.state(), MemoState::Dirty);
        assert_eq!(derived.evaluation_count(), 1);

        assert_eq!(derived.get(), Ok(11));
        assert_eq!(derived.evaluation_count(), 2);
    }

    #[test]
    fn derived_chains_stay_consistent() {
        let source = Signal::new(2);
        let double = {
            let source = source.clone();
            Derived::new(move || source.get() * 2)
        };
        let quad = {
            let double = double.clone();
            Derived::try_new(move || Ok(double.get()? * 2))
        };
        assert_eq!(quad.get(), Ok(8));

        source.set(3);
        assert!(quad.is_dirty());
        assert_eq!(quad.get(), Ok(12));
    }

    #[test]
    fn dependencies_follow_the_last_run() {
        let flag = Signal::new(true);
        let a = Signal::new(1);
        let b = Signal::new(2);
        let pick = {
            let (flag, a, b) = (flag.clone(), a.clone(), b.clone());
            Derived::new(move || if flag.get() { a.get() } else { b.get() })
        };

        assert_eq!(pick.get(), Ok(1));
        assert_eq!(a.subscriber_count(), 1);
        assert_eq!(b.subscriber_count(), 0);

        flag.set(false);
        assert_eq!(pick.get(), Ok(2));
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(b.subscriber_count(), 1);
    }

    #[test]
    fn self_reads_are_cycles() {
        let slot: Rc<RefCell<Option<Derived<i32>>>> = Rc::new(RefCell::new(None));
        let derived = {
            let slot = slot.clone();
            Derived::try_new(move || match slot.borrow().as_ref() {
                Some(me) => me.get(),
                None => Ok(0),
            })
        };
        *slot.borrow_mut() = Some(derived.clone());

        let error = derived.get().unwrap_err();
        assert_eq!(error, ReactiveError::CyclicDependency { node: derived.id() });
        assert!(derived.is_dirty());
        assert_eq!(derived.state(), MemoState::Dirty);

        slot.borrow_mut().take();
    }

    #[test]
    fn errors_leave_the_value_dirty() {
        let fail = Signal::new(true);
        let derived = {
            let fail = fail.clone();
            Derived::try_new(move || {
                if fail.get() {
                    Err(ReactiveError::computation("not ready"))
                } else {
                    Ok(5)
                }
            })
        };

        assert_eq!(derived.get(), Err(ReactiveError::computation("not ready")));
        assert!(derived.is_dirty());
        assert_eq!(fail.subscriber_count(), 1);

        fail.set(false);
        assert_eq!(derived.get(), Ok(5));
    }
}
