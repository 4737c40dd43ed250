//! Listeners
//!
//! A listener is a consumer that receives change descriptors instead of
//! re-running a computation. Listeners attach to a whole reactive value or
//! to one key of a proxy, and are notified during the flush that follows a
//! change.
//!
//! Dropping the [`Subscription`] detaches the listener. Detaching twice
//! through [`Subscription::unsubscribe`] is reported as
//! [`ReactiveError::StaleSubscription`].

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;
use smallvec::SmallVec;

use super::derived::Derived;
use super::entry::{Data, Key, Reactive};
use super::event::{ReactiveEvent, ReactiveEventType};
use super::proxy::Proxy;
use super::runtime::{Computation, Runtime};
use super::signal::Signal;
use crate::error::{ReactiveError, Result};
use crate::graph::{NodeId, NodeKind};

/// Something a listener can attach to.
pub trait Listenable {
    /// The producer node a listener for `key` should depend on.
    fn listen_source(&self, key: Option<&Key>) -> Result<NodeId>;
}

impl<T: Data> Listenable for Signal<T> {
    fn listen_source(&self, key: Option<&Key>) -> Result<NodeId> {
        match key {
            None => Ok(self.id()),
            Some(key) => Err(ReactiveError::InvalidKey {
                key: key.clone(),
                shape: "leaf cell",
            }),
        }
    }
}

impl<T: Data> Listenable for Derived<T> {
    fn listen_source(&self, key: Option<&Key>) -> Result<NodeId> {
        if let Some(key) = key {
            return Err(ReactiveError::InvalidKey {
                key: key.clone(),
                shape: "derived computation",
            });
        }
        // The first change is measured against the value at subscription.
        self.get_untracked()?;
        Ok(self.id())
    }
}

impl Listenable for Proxy {
    fn listen_source(&self, key: Option<&Key>) -> Result<NodeId> {
        match key {
            None => Ok(self.id()),
            Some(key) => self.key_source(key),
        }
    }
}

impl Listenable for Reactive {
    fn listen_source(&self, key: Option<&Key>) -> Result<NodeId> {
        match self {
            Reactive::Leaf(signal) => signal.listen_source(key),
            Reactive::Proxy(proxy) => proxy.listen_source(key),
            Reactive::Derived(derived) => derived.listen_source(key),
        }
    }
}

/// Narrows what a listener receives.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListenOptions {
    key: Option<Key>,
    kinds: Option<SmallVec<[ReactiveEventType; 4]>>,
}

impl ListenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only changes of `key`.
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Only these kinds of change.
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = ReactiveEventType>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    fn accepts(&self, kind: ReactiveEventType) -> bool {
        self.kinds.as_ref().map_or(true, |kinds| kinds.contains(&kind))
    }
}

type Callback = Box<dyn FnMut(&ReactiveEvent)>;

struct ListenerInner {
    id: NodeId,
    callback: RefCell<Callback>,
    options: ListenOptions,
}

impl Computation for ListenerInner {
    fn process(&self, events: Vec<ReactiveEvent>) -> Result<Option<ReactiveEvent>> {
        let Ok(mut callback) = self.callback.try_borrow_mut() else {
            return Ok(None);
        };
        for event in events.iter().filter(|e| self.options.accepts(e.kind)) {
            (*callback)(event);
        }
        Ok(None)
    }
}

impl Drop for ListenerInner {
    fn drop(&mut self) {
        Runtime::unregister(self.id);
    }
}

/// Handle to an attached listener.
#[must_use = "dropping the subscription detaches the listener"]
pub struct Subscription {
    id: NodeId,
    inner: Option<Rc<ListenerInner>>,
}

impl Subscription {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_some()
    }

    /// Detach the listener.
    pub fn unsubscribe(&mut self) -> Result<()> {
        match self.inner.take() {
            Some(inner) => {
                tracing::trace!(id = ?self.id, "listener detached");
                Runtime::unregister(inner.id);
                Ok(())
            }
            None => {
                tracing::warn!(id = ?self.id, "subscription already disposed");
                Err(ReactiveError::StaleSubscription { node: self.id })
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Attach `callback` to every change of `target`.
pub fn listen<L>(target: &L, callback: impl FnMut(&ReactiveEvent) + 'static) -> Result<Subscription>
where
    L: Listenable + ?Sized,
{
    listen_with(target, ListenOptions::new(), callback)
}

/// Attach `callback` to changes of one key of `target`.
pub fn listen_key(
    target: &Proxy,
    key: impl Into<Key>,
    callback: impl FnMut(&ReactiveEvent) + 'static,
) -> Result<Subscription> {
    listen_with(target, ListenOptions::new().key(key), callback)
}

/// Attach `callback` to `target`, narrowed by `options`.
pub fn listen_with<L>(
    target: &L,
    options: ListenOptions,
    callback: impl FnMut(&ReactiveEvent) + 'static,
) -> Result<Subscription>
where
    L: Listenable + ?Sized,
{
    let source = target.listen_source(options.key.as_ref())?;
    let inner = Rc::new_cyclic(|weak: &Weak<ListenerInner>| {
        let computation: Weak<dyn Computation> = weak.clone();
        ListenerInner {
            id: Runtime::register_consumer(NodeKind::Listener, computation),
            callback: RefCell::new(Box::new(callback)),
            options,
        }
    });
    Runtime::replace_dependencies(inner.id, &IndexSet::from([source]));
    tracing::trace!(id = ?inner.id, ?source, "listener attached");

    Ok(Subscription {
        id: inner.id,
        inner: Some(inner),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::runtime::flush_sync;
    use serde_json::json;

    fn recorder() -> (Rc<RefCell<Vec<ReactiveEvent>>>, impl FnMut(&ReactiveEvent)) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |event: &ReactiveEvent| sink.borrow_mut().push(event.clone()))
    }

    #[test]
    fn leaf_listener_sees_coalesced_change() {
        let cell = Signal::new(0);
        let (seen, callback) = recorder();
        let _subscription = listen(&cell, callback).unwrap();

        cell.set(1);
        cell.set(2);
        assert!(seen.borrow().is_empty());

        flush_sync().unwrap();
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].old_value, Some(json!(0)));
        assert_eq!(seen[0].new_value, Some(json!(2)));
    }

    #[test]
    fn keys_are_rejected_on_leaf_cells() {
        let cell = Signal::new(0);
        let result = listen_with(&cell, ListenOptions::new().key("x"), |_| {});
        assert!(matches!(result, Err(ReactiveError::InvalidKey { .. })));
    }

    #[test]
    fn unsubscribe_twice_is_stale() {
        let cell = Signal::new(0);
        let mut subscription = listen(&cell, |_| {}).unwrap();
        assert_eq!(cell.subscriber_count(), 1);

        subscription.unsubscribe().unwrap();
        assert_eq!(cell.subscriber_count(), 0);
        assert_eq!(
            subscription.unsubscribe(),
            Err(ReactiveError::StaleSubscription { node: subscription.id() })
        );
    }

    #[test]
    fn dropping_the_subscription_detaches() {
        let cell = Signal::new(0);
        let (seen, callback) = recorder();
        let subscription = listen(&cell, callback).unwrap();
        drop(subscription);

        cell.set(1);
        flush_sync().unwrap();
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn kind_filter_applies() {
        let list = Proxy::wrap(json!([1])).unwrap();
        let (seen, callback) = recorder();
        let options = ListenOptions::new().kinds([ReactiveEventType::ShapeChanged]);
        let _subscription = listen_with(&list, options, callback).unwrap();

        list.push(json!(2)).unwrap();
        flush_sync().unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, ReactiveEventType::ShapeChanged);
    }

    #[test]
    fn derived_listener_only_fires_on_real_change() {
        let source = Signal::new(1);
        let parity = {
            let source = source.clone();
            Derived::new(move || source.get() % 2)
        };
        let (seen, callback) = recorder();
        let _subscription = listen(&parity, callback).unwrap();

        source.set(3);
        flush_sync().unwrap();
        assert!(seen.borrow().is_empty());

        source.set(4);
        flush_sync().unwrap();
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0].new_value, Some(json!(0)));
    }
}
