//! Flush Queue
//!
//! The queue decides in which order notified consumers are processed during
//! a flush cycle.
//!
//! # Algorithm
//!
//! 1. A notification enqueues consumers keyed by `(depth, sequence)`. The
//!    sequence number preserves notification order within a level.
//! 2. Enqueueing a consumer that is already waiting is a no-op, apart from
//!    appending its change descriptor. A consumer is processed at most once
//!    per round.
//! 3. The flush pops the lowest `(depth, sequence)` first, which drains the
//!    graph level by level: a consumer is only finalized after every producer
//!    above it has settled for this round.
//! 4. A consumer notified again after it was processed waits for the next
//!    round.
//!
//! Consecutive value-set descriptors for the same `(target, key)` coalesce:
//! the first old value is kept, the last new value wins, and a net no-op is
//! dropped. A key added or removed in between is never merged across.

use std::collections::{BTreeMap, HashMap, HashSet};

use indexmap::IndexSet;
use smallvec::SmallVec;

use super::node::NodeId;
use crate::reactive::{ReactiveEvent, ReactiveEventType};

type Inbox = SmallVec<[ReactiveEvent; 2]>;

#[derive(Debug, Default)]
pub(crate) struct FlushQueue {
    /// Consumers waiting in the current round.
    ready: BTreeMap<(u32, u64), NodeId>,

    /// Reverse index into `ready`.
    slots: HashMap<NodeId, (u32, u64)>,

    /// Consumers re-notified after being processed this round.
    deferred: IndexSet<NodeId>,

    /// Consumers already processed this round.
    processed: HashSet<NodeId>,

    /// Change descriptors waiting for each listener.
    inbox: HashMap<NodeId, Inbox>,

    sequence: u64,
}

impl FlushQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `node` for processing, attaching `event` to its inbox.
    pub fn enqueue(&mut self, node: NodeId, depth: u32, event: Option<ReactiveEvent>) {
        if let Some(event) = event {
            coalesce(self.inbox.entry(node).or_default(), event);
        }

        if self.slots.contains_key(&node) || self.deferred.contains(&node) {
            return;
        }
        if self.processed.contains(&node) {
            self.deferred.insert(node);
            return;
        }

        self.sequence += 1;
        let slot = (depth, self.sequence);
        self.ready.insert(slot, node);
        self.slots.insert(node, slot);
    }

    /// Take the next consumer of the current round, with its inbox.
    pub fn pop(&mut self) -> Option<(NodeId, Vec<ReactiveEvent>)> {
        let (_, node) = self.ready.pop_first()?;
        self.slots.remove(&node);
        self.processed.insert(node);
        let events = self
            .inbox
            .remove(&node)
            .map(SmallVec::into_vec)
            .unwrap_or_default();
        Some((node, events))
    }

    /// Start the next round. Returns `false` when nothing is left.
    pub fn next_round(&mut self, depth_of: impl Fn(NodeId) -> u32) -> bool {
        self.processed.clear();
        let deferred: Vec<NodeId> = self.deferred.drain(..).collect();
        for node in deferred {
            self.enqueue(node, depth_of(node), None);
        }
        !self.ready.is_empty()
    }

    /// Drop every trace of a disposed consumer.
    pub fn forget(&mut self, node: NodeId) {
        if let Some(slot) = self.slots.remove(&node) {
            self.ready.remove(&slot);
        }
        self.deferred.shift_remove(&node);
        self.inbox.remove(&node);
    }

    /// Reset round bookkeeping once a flush has finished.
    pub fn finish(&mut self) {
        self.processed.clear();
    }

    pub fn clear(&mut self) {
        self.ready.clear();
        self.slots.clear();
        self.deferred.clear();
        self.processed.clear();
        self.inbox.clear();
    }

    pub fn len(&self) -> usize {
        self.ready.len() + self.deferred.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Merge `event` into the latest descriptor for the same `(target, key)` when
/// that descriptor is a value-set. An add or remove of the key in between
/// keeps the events apart, so replaying the inbox still yields the final state.
fn coalesce(inbox: &mut Inbox, event: ReactiveEvent) {
    if event.kind == ReactiveEventType::ValueSet {
        let latest = inbox.iter().rposition(|e| {
            e.kind != ReactiveEventType::ShapeChanged && e.target == event.target && e.key == event.key
        });
        if let Some(index) = latest.filter(|&index| inbox[index].kind == ReactiveEventType::ValueSet) {
            inbox[index].new_value = event.new_value;
            if inbox[index].old_value == inbox[index].new_value {
                inbox.remove(index);
            }
            return;
        }
    }
    inbox.push(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Key;
    use serde_json::json;
    use slotmap::SlotMap;

    fn ids(n: usize) -> Vec<NodeId> {
        let mut arena: SlotMap<NodeId, ()> = SlotMap::with_key();
        (0..n).map(|_| arena.insert(())).collect()
    }

    fn value_set(target: NodeId, old: i64, new: i64) -> ReactiveEvent {
        ReactiveEvent::value_set(target, None, json!(old), json!(new))
    }

    #[test]
    fn drains_by_depth_then_notification_order() {
        let n = ids(4);
        let mut queue = FlushQueue::new();
        queue.enqueue(n[0], 2, None);
        queue.enqueue(n[1], 1, None);
        queue.enqueue(n[2], 2, None);
        queue.enqueue(n[3], 1, None);

        let order: Vec<_> = std::iter::from_fn(|| queue.pop().map(|(id, _)| id)).collect();
        assert_eq!(order, vec![n[1], n[3], n[0], n[2]]);
    }

    #[test]
    fn duplicate_enqueue_is_idempotent() {
        let n = ids(1);
        let mut queue = FlushQueue::new();
        queue.enqueue(n[0], 1, None);
        queue.enqueue(n[0], 1, None);

        assert_eq!(queue.len(), 1);
        assert!(queue.pop().is_some());
        assert!(queue.pop().is_none());
    }

    #[test]
    fn processed_consumers_wait_for_the_next_round() {
        let n = ids(2);
        let mut queue = FlushQueue::new();
        queue.enqueue(n[0], 1, None);
        assert_eq!(queue.pop().map(|(id, _)| id), Some(n[0]));

        queue.enqueue(n[0], 1, None);
        queue.enqueue(n[1], 1, None);
        assert_eq!(queue.pop().map(|(id, _)| id), Some(n[1]));
        assert!(queue.pop().is_none());

        assert!(queue.next_round(|_| 1));
        assert_eq!(queue.pop().map(|(id, _)| id), Some(n[0]));
        assert!(!queue.next_round(|_| 1));
    }

    #[test]
    fn value_set_events_coalesce() {
        let n = ids(2);
        let (listener, target) = (n[0], n[1]);
        let mut queue = FlushQueue::new();
        queue.enqueue(listener, 1, Some(value_set(target, 0, 1)));
        queue.enqueue(listener, 1, Some(value_set(target, 1, 2)));

        let (_, events) = queue.pop().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].old_value, Some(json!(0)));
        assert_eq!(events[0].new_value, Some(json!(2)));
    }

    #[test]
    fn net_noop_writes_are_dropped() {
        let n = ids(2);
        let mut queue = FlushQueue::new();
        queue.enqueue(n[0], 1, Some(value_set(n[1], 0, 1)));
        queue.enqueue(n[0], 1, Some(value_set(n[1], 1, 0)));

        let (_, events) = queue.pop().unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn value_sets_do_not_merge_across_key_removal() {
        let n = ids(2);
        let (listener, target) = (n[0], n[1]);
        let key = Some(Key::from("a"));
        let set = |old: i64, new: i64| ReactiveEvent::value_set(target, key.clone(), json!(old), json!(new));

        let mut queue = FlushQueue::new();
        queue.enqueue(listener, 1, Some(set(1, 2)));
        queue.enqueue(listener, 1, Some(ReactiveEvent::key_removed(target, Key::from("a"), json!(2))));
        queue.enqueue(listener, 1, Some(ReactiveEvent::shape_changed(target, 1, 0)));
        queue.enqueue(listener, 1, Some(ReactiveEvent::key_added(target, Key::from("a"), json!(5))));
        queue.enqueue(listener, 1, Some(ReactiveEvent::shape_changed(target, 0, 1)));
        queue.enqueue(listener, 1, Some(set(5, 6)));
        queue.enqueue(listener, 1, Some(set(6, 7)));

        let (_, events) = queue.pop().unwrap();
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ReactiveEventType::ValueSet,
                ReactiveEventType::KeyRemoved,
                ReactiveEventType::ShapeChanged,
                ReactiveEventType::KeyAdded,
                ReactiveEventType::ShapeChanged,
                ReactiveEventType::ValueSet,
            ]
        );
        assert_eq!(events[0].new_value, Some(json!(2)));
        assert_eq!(events[5].old_value, Some(json!(5)));
        assert_eq!(events[5].new_value, Some(json!(7)));
    }

    #[test]
    fn forget_removes_waiting_consumers() {
        let n = ids(2);
        let mut queue = FlushQueue::new();
        queue.enqueue(n[0], 1, Some(value_set(n[1], 0, 1)));
        queue.forget(n[0]);

        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }
}
