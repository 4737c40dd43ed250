//! Effect Implementation
//!
//! An Effect is a side-effecting computation that re-runs whenever one of
//! the values it read changes.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is queued for the next flush.
//!    A flush runs each queued effect once, after every derived value above
//!    it has settled.
//!
//! 3. Every run tracks its reads afresh. Values read last time but not this
//!    time stop triggering the effect.
//!
//! # Differences from Derived
//!
//! - Derived values return a value; effects do not.
//! - Derived values are lazy (compute on access); effects are eager.
//! - A failing effect never reaches the writer that triggered it. The error
//!   is logged and published on the error channel.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::event::ReactiveEvent;
use super::runtime::{Computation, Runtime};
use crate::error::{self, Result};
use crate::graph::{NodeId, NodeKind};

type EffectFn = Box<dyn FnMut() -> Result<()>>;

struct EffectInner {
    id: NodeId,
    run: RefCell<EffectFn>,
    disposed: Cell<bool>,
    run_count: Cell<usize>,
}

impl EffectInner {
    fn execute(&self) -> Result<()> {
        if self.disposed.get() {
            return Ok(());
        }
        // An effect that triggers itself synchronously is already running.
        let Ok(mut run) = self.run.try_borrow_mut() else {
            tracing::trace!(id = ?self.id, "effect already running");
            return Ok(());
        };
        self.run_count.set(self.run_count.get() + 1);
        Runtime::run_tracked(self.id, || (*run)())
    }
}

impl Computation for EffectInner {
    fn process(&self, _events: Vec<ReactiveEvent>) -> Result<Option<ReactiveEvent>> {
        self.execute().map(|()| None)
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        Runtime::unregister(self.id);
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use lattice_reactive::{flush_sync, Effect, Signal};
///
/// let count = Signal::new(0);
///
/// let effect = {
///     let count = count.clone();
///     Effect::new(move || println!("Count is: {}", count.get()))
/// };
///
/// count.set(5);
/// flush_sync().unwrap(); // Prints: "Count is: 5"
/// assert_eq!(effect.run_count(), 2);
/// ```
pub struct Effect {
    inner: Rc<EffectInner>,
}

impl Effect {
    /// Create a new effect and run it once.
    pub fn new(mut run: impl FnMut() + 'static) -> Self {
        Self::try_new(move || {
            run();
            Ok(())
        })
    }

    /// Create a new effect whose function can fail, and run it once.
    ///
    /// A failing first run is reported like any other effect failure; the
    /// effect stays subscribed to whatever it read before failing.
    pub fn try_new(run: impl FnMut() -> Result<()> + 'static) -> Self {
        let effect = Self::new_lazy_fallible(Box::new(run));
        if let Err(error) = effect.execute() {
            error::publish(&error);
        }
        effect
    }

    /// Create a new effect without running it.
    pub fn new_lazy(mut run: impl FnMut() + 'static) -> Self {
        Self::new_lazy_fallible(Box::new(move || {
            run();
            Ok(())
        }))
    }

    fn new_lazy_fallible(run: EffectFn) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<EffectInner>| {
            let computation: Weak<dyn Computation> = weak.clone();
            EffectInner {
                id: Runtime::register_consumer(NodeKind::Effect, computation),
                run: RefCell::new(run),
                disposed: Cell::new(false),
                run_count: Cell::new(0),
            }
        });
        tracing::trace!(id = ?inner.id, "effect created");
        Self { inner }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Run the effect now, tracking its reads.
    pub fn execute(&self) -> Result<()> {
        self.inner.execute()
    }

    /// Queue the effect for the next flush.
    pub fn schedule(&self) {
        if !self.inner.disposed.get() {
            Runtime::schedule(self.inner.id);
        }
    }

    /// Stop the effect and drop its dependencies.
    pub fn dispose(&self) {
        if !self.inner.disposed.replace(true) {
            tracing::trace!(id = ?self.inner.id, "effect disposed");
            Runtime::unregister(self.inner.id);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    pub fn dependency_count(&self) -> usize {
        Runtime::dependency_count(self.inner.id)
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
