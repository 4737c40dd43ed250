//! Tracking Context
//!
//! The tracking context records which computation is currently running, so
//! that reads can be attributed to it as dependencies.
//!
//! # Implementation
//!
//! A thread-local stack holds one scope per running computation. Entering a
//! scope pushes it; the returned [`ScopeGuard`] pops it again, also while
//! unwinding. Reads are attributed to the innermost scope only. A value read
//! by a nested derived computation reaches the outer scopes through the
//! graph edge from that derived computation.
//!
//! An untracked scope (see [`TrackingContext::untracked`]) hides every
//! enclosing scope until it ends.
//!
//! The stack is created lazily on first use. Call
//! [`TrackingContext::teardown`] at the end of a test or at shutdown to check
//! that no scope leaked.

use std::cell::RefCell;

use indexmap::IndexSet;

use crate::error::{ReactiveError, Result};
use crate::graph::NodeId;

thread_local! {
    static SCOPE_STACK: RefCell<Vec<Scope>> = RefCell::new(Vec::new());
}

/// One entry of the scope stack.
#[derive(Debug)]
struct Scope {
    /// The consumer reads are attributed to. `None` for untracked scopes.
    owner: Option<NodeId>,
    /// Producers read so far, deduplicated, in first-read order.
    reads: IndexSet<NodeId>,
}

/// Entry point for the thread-local scope stack.
pub struct TrackingContext;

impl TrackingContext {
    /// Open a tracking scope for `owner`.
    pub fn enter(owner: NodeId) -> ScopeGuard {
        Self::push(Some(owner))
    }

    /// Open a scope that records nothing.
    pub fn enter_untracked() -> ScopeGuard {
        Self::push(None)
    }

    fn push(owner: Option<NodeId>) -> ScopeGuard {
        SCOPE_STACK.with(|stack| {
            stack.borrow_mut().push(Scope {
                owner,
                reads: IndexSet::new(),
            })
        });
        ScopeGuard {
            owner,
            active: true,
        }
    }

    /// Run `f` without attributing any read to the enclosing scopes.
    pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
        let _scope = Self::enter_untracked();
        f()
    }

    /// Whether a read right now would be recorded.
    pub fn is_tracking() -> bool {
        Self::current_owner().is_some()
    }

    /// The consumer reads are currently attributed to.
    pub fn current_owner() -> Option<NodeId> {
        SCOPE_STACK
            .try_with(|stack| stack.borrow().last().and_then(|scope| scope.owner))
            .ok()
            .flatten()
    }

    /// Record a read of `producer` in the innermost scope.
    pub fn track(producer: NodeId) {
        SCOPE_STACK.with(|stack| {
            if let Some(scope) = stack.borrow_mut().last_mut() {
                if scope.owner.is_some() && scope.owner != Some(producer) {
                    scope.reads.insert(producer);
                }
            }
        });
    }

    /// Number of open scopes.
    pub fn depth() -> usize {
        SCOPE_STACK.with(|stack| stack.borrow().len())
    }

    /// Check that every scope was closed, clearing the stack either way.
    pub fn teardown() -> Result<()> {
        let depth = SCOPE_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let depth = stack.len();
            stack.clear();
            depth
        });
        if depth == 0 {
            Ok(())
        } else {
            tracing::warn!(depth, "tracking scopes leaked");
            Err(ReactiveError::LeakedScope { depth })
        }
    }
}

/// Guard that pops its scope when dropped.
#[must_use = "dropping the guard closes the scope immediately"]
pub struct ScopeGuard {
    owner: Option<NodeId>,
    active: bool,
}

impl ScopeGuard {
    /// Close the scope and return the producers read inside it.
    pub fn finish(mut self) -> IndexSet<NodeId> {
        self.active = false;
        self.pop()
    }

    fn pop(&self) -> IndexSet<NodeId> {
        SCOPE_STACK
            .try_with(|stack| {
                let popped = stack.borrow_mut().pop();
                match popped {
                    Some(scope) => {
                        debug_assert_eq!(
                            scope.owner, self.owner,
                            "tracking scope mismatch: expected {:?}, got {:?}",
                            self.owner, scope.owner
                        );
                        scope.reads
                    }
                    None => IndexSet::new(),
                }
            })
            .unwrap_or_default()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if self.active {
            self.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn ids(n: usize) -> Vec<NodeId> {
        let mut arena: SlotMap<NodeId, ()> = SlotMap::with_key();
        (0..n).map(|_| arena.insert(())).collect()
    }

    #[test]
    fn context_tracks_owner() {
        let n = ids(1);
        assert!(!TrackingContext::is_tracking());

        {
            let _scope = TrackingContext::enter(n[0]);
            assert!(TrackingContext::is_tracking());
            assert_eq!(TrackingContext::current_owner(), Some(n[0]));
        }

        assert!(!TrackingContext::is_tracking());
        assert_eq!(TrackingContext::depth(), 0);
    }

    #[test]
    fn reads_are_deduplicated_in_order() {
        let n = ids(4);
        let scope = TrackingContext::enter(n[0]);
        TrackingContext::track(n[2]);
        TrackingContext::track(n[1]);
        TrackingContext::track(n[2]);
        TrackingContext::track(n[3]);

        let reads: Vec<_> = scope.finish().into_iter().collect();
        assert_eq!(reads, vec![n[2], n[1], n[3]]);
    }

    #[test]
    fn nested_scopes_track_innermost_only() {
        let n = ids(4);
        let outer = TrackingContext::enter(n[0]);
        TrackingContext::track(n[2]);

        let inner = TrackingContext::enter(n[1]);
        TrackingContext::track(n[3]);
        assert_eq!(inner.finish().len(), 1);

        let outer_reads = outer.finish();
        assert!(outer_reads.contains(&n[2]));
        assert!(!outer_reads.contains(&n[3]));
    }

    #[test]
    fn untracked_hides_enclosing_scope() {
        let n = ids(2);
        let scope = TrackingContext::enter(n[0]);
        TrackingContext::untracked(|| {
            assert!(!TrackingContext::is_tracking());
            TrackingContext::track(n[1]);
        });
        assert!(scope.finish().is_empty());
    }

    #[test]
    fn teardown_reports_leaked_scopes() {
        let n = ids(1);
        assert_eq!(TrackingContext::teardown(), Ok(()));

        std::mem::forget(TrackingContext::enter(n[0]));
        assert_eq!(
            TrackingContext::teardown(),
            Err(ReactiveError::LeakedScope { depth: 1 })
        );
        assert_eq!(TrackingContext::depth(), 0);
    }

    #[test]
    fn scope_is_popped_on_panic() {
        let n = ids(1);
        let result = std::panic::catch_unwind(|| {
            let _scope = TrackingContext::enter(n[0]);
            panic!("inside scope");
        });
        assert!(result.is_err());
        assert_eq!(TrackingContext::depth(), 0);
    }
}
