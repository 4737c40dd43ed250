//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects cells, proxies,
//! derived computations, effects and listeners. It owns the dependency graph
//! and the flush queue, and schedules updates when producers change.
//!
//! # How It Works
//!
//! 1. Every reactive value registers one or more nodes with the runtime.
//!
//! 2. A tracked run records the producers it read. When the run ends the
//!    runtime rewires the consumer to exactly those producers.
//!
//! 3. When a producer changes, the runtime:
//!    a. Marks every derived computation downstream as dirty
//!    b. Queues effects and listeners that read the producer directly
//!    c. Queues the dirtied derived computations, which stay lazy unless
//!       somebody observes them
//!
//! 4. A flush drains the queue level by level. A derived computation with
//!    observers is re-evaluated; if its value moved, its own dependents are
//!    queued in the same round.
//!
//! # Threading
//!
//! Each thread has its own runtime and its own scope stack. Reactive handles
//! are `Rc`-based and therefore cannot cross threads.

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use indexmap::IndexSet;

use super::context::TrackingContext;
use super::event::ReactiveEvent;
use crate::config::{FlushMode, RuntimeConfig};
use crate::error::{self, ReactiveError, Result};
use crate::graph::{FlushQueue, Graph, Node, NodeId, NodeKind};

/// A consumer the flush queue can process.
pub(crate) trait Computation {
    /// An upstream producer changed. Only derived computations care.
    fn invalidate(&self) {}

    /// Handle one flush step. `events` holds the change descriptors queued
    /// for this consumer. Returning an event forwards it to the consumer's
    /// own dependents.
    fn process(&self, events: Vec<ReactiveEvent>) -> Result<Option<ReactiveEvent>>;
}

/// What a flush did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    /// Rounds needed to settle.
    pub rounds: usize,
    /// Consumers processed.
    pub processed: usize,
    /// Failures of consumers processed during this flush.
    pub errors: Vec<ReactiveError>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Size of the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    /// Consumers waiting for the next flush.
    pub pending: usize,
}

struct RuntimeState {
    graph: RefCell<Graph>,
    queue: RefCell<FlushQueue>,
    config: RefCell<RuntimeConfig>,
    flushing: Cell<bool>,
    batch_depth: Cell<u32>,
}

thread_local! {
    static RUNTIME: RuntimeState = RuntimeState {
        graph: RefCell::new(Graph::new()),
        queue: RefCell::new(FlushQueue::new()),
        config: RefCell::new(RuntimeConfig::default()),
        flushing: Cell::new(false),
        batch_depth: Cell::new(0),
    };
}

/// Resets the flushing flag even if a flush unwinds.
struct FlushGuard<'a>(&'a RuntimeState);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.flushing.set(false);
        self.0.queue.borrow_mut().finish();
    }
}

/// Closes a batch even if the batched closure unwinds.
struct BatchGuard;

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let _ = RUNTIME.try_with(|rt| rt.batch_depth.set(rt.batch_depth.get().saturating_sub(1)));
    }
}

/// The per-thread reactive runtime.
pub struct Runtime;

impl Runtime {
    /// Add a producer node.
    pub(crate) fn register_source() -> NodeId {
        RUNTIME.with(|rt| rt.graph.borrow_mut().add_node(Node::source()))
    }

    /// Add a consumer node backed by `computation`.
    pub(crate) fn register_consumer(kind: NodeKind, computation: Weak<dyn Computation>) -> NodeId {
        RUNTIME.with(|rt| rt.graph.borrow_mut().add_node(Node::consumer(kind, computation)))
    }

    /// Remove a node, its edges and anything queued for it.
    pub(crate) fn unregister(node: NodeId) {
        let _ = RUNTIME.try_with(|rt| {
            if let Ok(mut graph) = rt.graph.try_borrow_mut() {
                graph.remove_node(node);
            }
            if let Ok(mut queue) = rt.queue.try_borrow_mut() {
                queue.forget(node);
            }
        });
    }

    /// Attribute a read of `producer` to the running scope, if any.
    pub(crate) fn track(producer: NodeId) {
        if TrackingContext::is_tracking() {
            tracing::trace!(?producer, "tracked read");
            TrackingContext::track(producer);
        }
    }

    /// Run `f` in a fresh tracking scope for `owner`, then rewire `owner` to
    /// exactly the producers read during this run.
    pub fn run_tracked<R>(owner: NodeId, f: impl FnOnce() -> R) -> R {
        let scope = TrackingContext::enter(owner);
        let result = f();
        let reads = scope.finish();
        Self::replace_dependencies(owner, &reads);
        result
    }

    pub(crate) fn replace_dependencies(owner: NodeId, reads: &IndexSet<NodeId>) {
        RUNTIME.with(|rt| {
            let rewire = rt.graph.borrow_mut().replace_dependencies(owner, reads);
            if rewire.added > 0 || rewire.removed > 0 {
                tracing::debug!(?owner, added = rewire.added, removed = rewire.removed, "rewired");
            }
        });
    }

    /// Report a change of `source` and queue everything it affects.
    pub(crate) fn notify(source: NodeId, event: ReactiveEvent) {
        tracing::trace!(?source, kind = ?event.kind, key = ?event.key, "notify");
        let invalidated: Vec<Rc<dyn Computation>> = RUNTIME.with(|rt| {
            let graph = rt.graph.borrow();
            let mut queue = rt.queue.borrow_mut();

            for dependent in graph.dependents(source) {
                let depth = graph.depth(dependent);
                match graph.kind(dependent) {
                    Some(NodeKind::Listener) => queue.enqueue(dependent, depth, Some(event.clone())),
                    Some(NodeKind::Effect) => queue.enqueue(dependent, depth, None),
                    _ => {}
                }
            }

            graph
                .downstream_derived(source)
                .into_iter()
                .filter_map(|derived| {
                    queue.enqueue(derived, graph.depth(derived), None);
                    graph.computation(derived)
                })
                .collect()
        });

        for computation in &invalidated {
            computation.invalidate();
        }
        drop(invalidated);
        Self::after_mutation();
    }

    /// Queue the dependents of a consumer whose output moved.
    fn propagate(node: NodeId, event: ReactiveEvent) {
        RUNTIME.with(|rt| {
            let graph = rt.graph.borrow();
            let mut queue = rt.queue.borrow_mut();
            for dependent in graph.dependents(node) {
                let depth = graph.depth(dependent);
                match graph.kind(dependent) {
                    Some(NodeKind::Listener) => queue.enqueue(dependent, depth, Some(event.clone())),
                    Some(_) => queue.enqueue(dependent, depth, None),
                    None => {}
                }
            }
        });
    }

    /// Queue a consumer for the next flush.
    pub(crate) fn schedule(node: NodeId) {
        RUNTIME.with(|rt| {
            let depth = rt.graph.borrow().depth(node);
            rt.queue.borrow_mut().enqueue(node, depth, None);
        });
        Self::after_mutation();
    }

    fn after_mutation() {
        let immediate = RUNTIME.with(|rt| {
            !rt.flushing.get()
                && rt.batch_depth.get() == 0
                && rt.config.borrow().flush_mode == FlushMode::Immediate
        });
        if immediate {
            Self::run_deferred();
        }
    }

    /// Run `f` with notifications held back until the outermost batch ends.
    pub fn batch<R>(f: impl FnOnce() -> R) -> R {
        RUNTIME.with(|rt| rt.batch_depth.set(rt.batch_depth.get() + 1));
        let result = {
            let _guard = BatchGuard;
            f()
        };
        let outermost = RUNTIME.with(|rt| rt.batch_depth.get() == 0 && !rt.flushing.get());
        if outermost {
            Self::run_deferred();
        }
        result
    }

    /// Like [`Runtime::batch`], but leaves the flush to the configured mode.
    pub(crate) fn hold<R>(f: impl FnOnce() -> R) -> R {
        RUNTIME.with(|rt| rt.batch_depth.set(rt.batch_depth.get() + 1));
        let result = {
            let _guard = BatchGuard;
            f()
        };
        Self::after_mutation();
        result
    }

    /// Drain pending notifications right now.
    pub fn flush_sync() -> Result<FlushReport> {
        if RUNTIME.with(|rt| rt.flushing.get()) {
            return Err(ReactiveError::InvalidReentrantFlush);
        }
        Self::flush()
    }

    /// Run the deferred flush if one is pending and we are at a control
    /// point.
    pub fn tick() -> Option<FlushReport> {
        let blocked = RUNTIME.with(|rt| rt.flushing.get() || rt.batch_depth.get() > 0);
        if blocked {
            None
        } else {
            Self::run_deferred()
        }
    }

    /// A deferred flush. Failures only surface on the error channel.
    fn run_deferred() -> Option<FlushReport> {
        if !Self::is_flush_pending() {
            return None;
        }
        Self::flush().ok()
    }

    fn flush() -> Result<FlushReport> {
        RUNTIME.with(|rt| {
            rt.flushing.set(true);
            let _guard = FlushGuard(rt);
            let max_rounds = rt.config.borrow().max_flush_rounds;
            let mut report = FlushReport::default();

            if rt.queue.borrow().is_empty() {
                return Ok(report);
            }

            loop {
                report.rounds += 1;
                loop {
                    let next = rt.queue.borrow_mut().pop();
                    let Some((node, events)) = next else {
                        break;
                    };
                    let computation = rt.graph.borrow().computation(node);
                    let Some(computation) = computation else {
                        continue;
                    };
                    report.processed += 1;

                    let outcome =
                        panic::catch_unwind(AssertUnwindSafe(|| computation.process(events)));
                    match outcome {
                        Ok(Ok(Some(event))) => Self::propagate(node, event),
                        Ok(Ok(None)) => {}
                        Ok(Err(error)) => {
                            error::publish(&error);
                            report.errors.push(error);
                        }
                        Err(payload) => {
                            let error = ReactiveError::CallbackPanicked {
                                node,
                                message: error::panic_message(payload.as_ref()),
                            };
                            error::publish(&error);
                            report.errors.push(error);
                        }
                    }
                }

                let more = {
                    let graph = rt.graph.borrow();
                    rt.queue.borrow_mut().next_round(|id| graph.depth(id))
                };
                if !more {
                    break;
                }
                if report.rounds >= max_rounds {
                    rt.queue.borrow_mut().clear();
                    let error = ReactiveError::FlushOverflow {
                        rounds: report.rounds,
                    };
                    error::publish(&error);
                    return Err(error);
                }
            }

            tracing::debug!(
                rounds = report.rounds,
                processed = report.processed,
                errors = report.errors.len(),
                "flush complete"
            );
            Ok(report)
        })
    }

    /// Whether notifications are waiting for a flush.
    pub fn is_flush_pending() -> bool {
        RUNTIME.with(|rt| !rt.queue.borrow().is_empty())
    }

    /// Whether a read right now would be tracked.
    pub fn is_tracking() -> bool {
        TrackingContext::is_tracking()
    }

    pub fn configure(config: RuntimeConfig) {
        tracing::debug!(?config, "runtime configured");
        RUNTIME.with(|rt| *rt.config.borrow_mut() = config);
    }

    pub fn config() -> RuntimeConfig {
        RUNTIME.with(|rt| rt.config.borrow().clone())
    }

    pub fn dependency_count(node: NodeId) -> usize {
        RUNTIME.with(|rt| rt.graph.borrow().dependency_count(node))
    }

    pub fn dependent_count(node: NodeId) -> usize {
        RUNTIME
            .try_with(|rt| rt.graph.borrow().dependent_count(node))
            .unwrap_or(0)
    }

    pub fn stats() -> GraphStats {
        RUNTIME.with(|rt| {
            let graph = rt.graph.borrow();
            GraphStats {
                nodes: graph.node_count(),
                edges: graph.edge_count(),
                pending: rt.queue.borrow().len(),
            }
        })
    }
}

/// Run `f` with notifications held back until the outermost batch ends.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    Runtime::batch(f)
}

/// Drain pending notifications right now.
///
/// Fails with [`ReactiveError::InvalidReentrantFlush`] when called from a
/// listener or effect.
pub fn flush_sync() -> Result<FlushReport> {
    Runtime::flush_sync()
}

/// Run a pending deferred flush.
pub fn tick() -> Option<FlushReport> {
    Runtime::tick()
}

/// Yield to the async executor once, then run a pending deferred flush.
pub async fn settle() -> Option<FlushReport> {
    tokio::task::yield_now().await;
    Runtime::tick()
}

pub fn is_flush_pending() -> bool {
    Runtime::is_flush_pending()
}

/// Install `config` for this thread's runtime.
pub fn configure(config: RuntimeConfig) {
    Runtime::configure(config)
}

pub fn config() -> RuntimeConfig {
    Runtime::config()
}

pub fn graph_stats() -> GraphStats {
    Runtime::stats()
}

/// Read reactive values inside `f` without recording dependencies.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    TrackingContext::untracked(f)
}
