//! Reactive Proxy
//!
//! A proxy makes a record or a list observable key by key.
//!
//! # Nodes
//!
//! Every proxy owns three kinds of producer node:
//!
//! - one node per key, created the first time the key is read or listened
//!   to. Reading `proxy.get("name")` inside a derived computation depends on
//!   `name` only.
//! - a shape node, read by [`Proxy::len`], [`Proxy::keys`] and friends. It
//!   changes whenever keys are added or removed.
//! - a root node that every change of the proxy passes through. Listeners
//!   attached to the whole proxy hang off it.
//!
//! # Nested Values
//!
//! Records and lists stored inside a proxy are wrapped on first read and the
//! wrapper is kept, so reading the same key twice yields the same proxy.
//!
//! # Lists
//!
//! Every list operation is expressed as a splice. A splice that changes the
//! length notifies every index from the splice point to the end, because the
//! value associated with each of those indices moved.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use super::entry::{Entry, Key, Reactive};
use super::event::ReactiveEvent;
use super::runtime::Runtime;
use super::snapshot::snapshot;
use crate::config::Equality;
use crate::error::{ReactiveError, Result};
use crate::graph::NodeId;

#[derive(Debug, Clone)]
enum Slot {
    Plain(Value),
    Reactive(Reactive),
}

impl Slot {
    fn from_entry(entry: Entry) -> Self {
        match entry {
            Entry::Plain(value) => Slot::Plain(value),
            Entry::Reactive(reactive) => Slot::Reactive(reactive),
        }
    }

    fn snapshot(&self) -> Value {
        match self {
            Slot::Plain(value) => value.clone(),
            Slot::Reactive(reactive) => snapshot(reactive),
        }
    }

    fn same_as(&self, other: &Slot, equality: Equality) -> bool {
        match equality {
            Equality::Never => false,
            Equality::Deep => self.snapshot() == other.snapshot(),
            Equality::Shallow => match (self, other) {
                (Slot::Plain(a), Slot::Plain(b)) => !is_structured(a) && a == b,
                (Slot::Reactive(a), Slot::Reactive(b)) => a.ptr_eq(b),
                _ => false,
            },
        }
    }
}

fn is_structured(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a record",
    }
}

#[derive(Clone)]
enum Backing {
    Record(IndexMap<String, Slot>),
    List(Vec<Slot>),
}

impl Backing {
    fn len(&self) -> usize {
        match self {
            Backing::Record(fields) => fields.len(),
            Backing::List(items) => items.len(),
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            Backing::Record(_) => "record",
            Backing::List(_) => "list",
        }
    }

    fn accepts(&self, key: &Key) -> bool {
        matches!(
            (self, key),
            (Backing::Record(_), Key::Field(_)) | (Backing::List(_), Key::Index(_))
        )
    }

    fn slot_mut(&mut self, key: &Key) -> Option<&mut Slot> {
        match (self, key) {
            (Backing::Record(fields), Key::Field(name)) => fields.get_mut(name),
            (Backing::List(items), Key::Index(index)) => items.get_mut(*index),
            _ => None,
        }
    }

    fn keys(&self) -> Vec<Key> {
        match self {
            Backing::Record(fields) => fields.keys().cloned().map(Key::Field).collect(),
            Backing::List(items) => (0..items.len()).map(Key::Index).collect(),
        }
    }
}

/// A mutation, before values are turned into change descriptors.
enum Change {
    Set(Key, Slot, Slot),
    Added(Key, Slot),
    Removed(Key, Slot),
    Shape(usize, usize),
}

struct ProxyInner {
    root: NodeId,
    shape: NodeId,
    equality: Equality,
    backing: RefCell<Backing>,
    keys: RefCell<HashMap<Key, NodeId>>,
    shape_version: Cell<u64>,
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        Runtime::unregister(self.root);
        Runtime::unregister(self.shape);
        for node in self.keys.get_mut().values() {
            Runtime::unregister(*node);
        }
    }
}

/// An observable record or list.
///
/// # Example
///
/// ```rust
/// use lattice_reactive::{Derived, Proxy};
/// use serde_json::json;
///
/// let user = Proxy::wrap(json!({ "first": "Ada", "last": "Lovelace" })).unwrap();
/// let full = {
///     let user = user.clone();
///     Derived::new(move || {
///         format!("{} {}", user.value("first").unwrap(), user.value("last").unwrap())
///     })
/// };
/// assert_eq!(full.get().unwrap(), r#""Ada" "Lovelace""#);
///
/// user.set("first", "Augusta").unwrap();
/// assert!(full.is_dirty());
/// ```
#[derive(Clone)]
pub struct Proxy {
    inner: Rc<ProxyInner>,
}

impl Proxy {
    /// Wrap a record or list.
    ///
    /// Wrapping a proxy returns the same proxy. Primitives, leaf cells and
    /// derived computations are rejected.
    pub fn wrap(value: impl Into<Entry>) -> Result<Proxy> {
        Self::wrap_with_equality(value, Runtime::config().equality)
    }

    /// Wrap a record or list with an explicit equality strategy.
    pub fn wrap_with_equality(value: impl Into<Entry>, equality: Equality) -> Result<Proxy> {
        match value.into() {
            Entry::Reactive(Reactive::Proxy(proxy)) => Ok(proxy),
            Entry::Reactive(other) => Err(ReactiveError::InvalidWrapTarget {
                found: other.describe(),
            }),
            Entry::Plain(value) => Self::from_structured(value, equality)
                .map_err(|value| ReactiveError::InvalidWrapTarget {
                    found: describe(&value),
                }),
        }
    }

    /// Wrap `value` if it is a record or list, otherwise hand it back.
    pub(crate) fn from_structured(value: Value, equality: Equality) -> std::result::Result<Proxy, Value> {
        let backing = match value {
            Value::Object(fields) => Backing::Record(
                fields.into_iter().map(|(k, v)| (k, Slot::Plain(v))).collect(),
            ),
            Value::Array(items) => Backing::List(items.into_iter().map(Slot::Plain).collect()),
            other => return Err(other),
        };
        let inner = ProxyInner {
            root: Runtime::register_source(),
            shape: Runtime::register_source(),
            equality,
            backing: RefCell::new(backing),
            keys: RefCell::new(HashMap::new()),
            shape_version: Cell::new(0),
        };
        tracing::trace!(root = ?inner.root, "proxy created");
        Ok(Proxy {
            inner: Rc::new(inner),
        })
    }

    /// The root node every change of this proxy passes through.
    pub fn id(&self) -> NodeId {
        self.inner.root
    }

    pub fn is_list(&self) -> bool {
        matches!(*self.inner.backing.borrow(), Backing::List(_))
    }

    pub fn is_record(&self) -> bool {
        !self.is_list()
    }

    pub fn equality(&self) -> Equality {
        self.inner.equality
    }

    pub fn ptr_eq(&self, other: &Proxy) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ---- Nodes ----

    fn key_node(&self, key: &Key) -> NodeId {
        *self
            .inner
            .keys
            .borrow_mut()
            .entry(key.clone())
            .or_insert_with(Runtime::register_source)
    }

    fn existing_key_node(&self, key: &Key) -> Option<NodeId> {
        self.inner.keys.borrow().get(key).copied()
    }

    /// The node a listener for `key` depends on.
    pub(crate) fn key_source(&self, key: &Key) -> Result<NodeId> {
        self.check_key(key)?;
        Ok(self.key_node(key))
    }

    fn check_key(&self, key: &Key) -> Result<()> {
        let backing = self.inner.backing.borrow();
        if backing.accepts(key) {
            Ok(())
        } else {
            Err(ReactiveError::InvalidKey {
                key: key.clone(),
                shape: backing.shape(),
            })
        }
    }

    fn track_key(&self, key: &Key) {
        if Runtime::is_tracking() {
            Runtime::track(self.key_node(key));
        }
    }

    fn track_shape(&self) {
        Runtime::track(self.inner.shape);
    }

    // ---- Reads ----

    /// Read `key`, recording the read.
    ///
    /// Records and lists stored at `key` come back as proxies. Missing keys
    /// and keys of the wrong kind yield `None`; a missing key is still
    /// tracked, so adding it later notifies the reader.
    pub fn get(&self, key: impl Into<Key>) -> Option<Entry> {
        let key = key.into();
        if !self.inner.backing.borrow().accepts(&key) {
            return None;
        }
        self.track_key(&key);

        let mut backing = self.inner.backing.borrow_mut();
        let slot = backing.slot_mut(&key)?;
        if let Slot::Plain(value) = slot {
            if is_structured(value) {
                let nested = Self::from_structured(value.take(), self.inner.equality).ok()?;
                *slot = Slot::Reactive(Reactive::Proxy(nested));
            }
        }
        Some(match slot {
            Slot::Plain(value) => Entry::Plain(value.clone()),
            Slot::Reactive(reactive) => Entry::Reactive(reactive.clone()),
        })
    }

    /// Read `key` as plain data.
    pub fn value(&self, key: impl Into<Key>) -> Option<Value> {
        self.get(key).map(|entry| entry.to_value())
    }

    pub fn contains_key(&self, key: impl Into<Key>) -> bool {
        let key = key.into();
        if !self.inner.backing.borrow().accepts(&key) {
            return false;
        }
        self.track_key(&key);
        match (&*self.inner.backing.borrow(), &key) {
            (Backing::Record(fields), Key::Field(name)) => fields.contains_key(name),
            (Backing::List(items), Key::Index(index)) => *index < items.len(),
            _ => false,
        }
    }

    /// Number of keys. Depends on the shape.
    pub fn len(&self) -> usize {
        self.track_shape();
        self.inner.backing.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current keys in order. Depends on the shape.
    pub fn keys(&self) -> Vec<Key> {
        self.track_shape();
        self.inner.backing.borrow().keys()
    }

    /// Key and entry pairs. Depends on the shape and on every key.
    pub fn entries(&self) -> Vec<(Key, Entry)> {
        self.keys()
            .into_iter()
            .filter_map(|key| self.get(key.clone()).map(|entry| (key, entry)))
            .collect()
    }

    /// Bumped on every key addition or removal. Depends on the shape.
    pub fn shape_version(&self) -> u64 {
        self.track_shape();
        self.inner.shape_version.get()
    }

    /// Deep plain copy, without tracking.
    ///
    /// Slots are copied out first: a derived slot may read this proxy while it
    /// is being evaluated.
    pub fn snapshot(&self) -> Value {
        let backing = self.inner.backing.borrow().clone();
        match backing {
            Backing::Record(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, slot)| (k.clone(), slot.snapshot()))
                    .collect::<Map<String, Value>>(),
            ),
            Backing::List(items) => Value::Array(items.iter().map(Slot::snapshot).collect()),
        }
    }

    // ---- Writes ----

    /// Write `value` at `key`.
    ///
    /// On a list, `key` may be one past the end, which appends.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Entry>) -> Result<()> {
        let key = key.into();
        let slot = Slot::from_entry(value.into());
        self.check_key(&key)?;

        let current = {
            let backing = self.inner.backing.borrow();
            match (&*backing, &key) {
                (Backing::Record(fields), Key::Field(name)) => fields.get(name).cloned(),
                (Backing::List(items), Key::Index(index)) => {
                    if *index > items.len() {
                        return Err(ReactiveError::IndexOutOfBounds {
                            index: *index,
                            len: items.len(),
                        });
                    }
                    items.get(*index).cloned()
                }
                _ => None,
            }
        };
        if let Some(current) = &current {
            if current.same_as(&slot, self.inner.equality) {
                return Ok(());
            }
        }

        let changes = {
            let mut backing = self.inner.backing.borrow_mut();
            let old_len = backing.len();
            match (&mut *backing, &key) {
                (Backing::Record(fields), Key::Field(name)) => {
                    match fields.insert(name.clone(), slot.clone()) {
                        Some(old) => vec![Change::Set(key, old, slot)],
                        None => vec![Change::Added(key, slot), Change::Shape(old_len, old_len + 1)],
                    }
                }
                (Backing::List(items), Key::Index(index)) => {
                    if *index < items.len() {
                        let old = std::mem::replace(&mut items[*index], slot.clone());
                        vec![Change::Set(key, old, slot)]
                    } else {
                        items.push(slot.clone());
                        vec![Change::Added(key, slot), Change::Shape(old_len, old_len + 1)]
                    }
                }
                _ => Vec::new(),
            }
        };
        self.emit(changes);
        Ok(())
    }

    /// Remove `key`, returning its last value.
    ///
    /// On a list the following items shift down.
    pub fn remove(&self, key: impl Into<Key>) -> Result<Option<Value>> {
        let key = key.into();
        self.check_key(&key)?;
        if let Key::Index(index) = key {
            if index >= self.inner.backing.borrow().len() {
                return Ok(None);
            }
            return Ok(self.splice(index, 1, Vec::<Entry>::new())?.into_iter().next());
        }

        let removed = {
            let mut backing = self.inner.backing.borrow_mut();
            let old_len = backing.len();
            match (&mut *backing, &key) {
                (Backing::Record(fields), Key::Field(name)) => fields
                    .shift_remove(name)
                    .map(|old| (old, old_len)),
                _ => None,
            }
        };
        let Some((old, old_len)) = removed else {
            return Ok(None);
        };
        let value = old.snapshot();
        self.emit(vec![Change::Removed(key, old), Change::Shape(old_len, old_len - 1)]);
        Ok(Some(value))
    }

    /// Remove every key.
    pub fn clear(&self) -> Result<()> {
        if self.is_list_untracked() {
            let len = self.inner.backing.borrow().len();
            self.splice(0, len, Vec::<Entry>::new())?;
            return Ok(());
        }

        let removed = {
            let mut backing = self.inner.backing.borrow_mut();
            match &mut *backing {
                Backing::Record(fields) => std::mem::take(fields),
                Backing::List(_) => IndexMap::new(),
            }
        };
        if removed.is_empty() {
            return Ok(());
        }
        let old_len = removed.len();
        let mut changes: Vec<Change> = removed
            .into_iter()
            .map(|(name, old)| Change::Removed(Key::Field(name), old))
            .collect();
        changes.push(Change::Shape(old_len, 0));
        self.emit(changes);
        Ok(())
    }

    fn is_list_untracked(&self) -> bool {
        matches!(*self.inner.backing.borrow(), Backing::List(_))
    }

    // ---- List operations ----

    /// Replace `delete_count` items at `start` with `items`, returning the
    /// removed values.
    pub fn splice<I>(&self, start: usize, delete_count: usize, items: I) -> Result<Vec<Value>>
    where
        I: IntoIterator,
        I::Item: Into<Entry>,
    {
        let inserted: Vec<Slot> = items
            .into_iter()
            .map(|item| Slot::from_entry(item.into()))
            .collect();
        let inserted_len = inserted.len();

        let (old_tail, new_tail, removed) = {
            let mut backing = self.inner.backing.borrow_mut();
            let Backing::List(list) = &mut *backing else {
                return Err(ReactiveError::InvalidKey {
                    key: Key::Index(start),
                    shape: "record",
                });
            };
            if start > list.len() {
                return Err(ReactiveError::IndexOutOfBounds {
                    index: start,
                    len: list.len(),
                });
            }
            let delete_count = delete_count.min(list.len() - start);
            let old_tail: Vec<Slot> = list[start..].to_vec();
            let removed: Vec<Slot> = list.splice(start..start + delete_count, inserted).collect();
            (old_tail, list[start..].to_vec(), removed)
        };

        let old_len = start + old_tail.len();
        let new_len = start + new_tail.len();
        let resized = old_len != new_len;
        let mut changes = Vec::new();

        for offset in 0..old_tail.len().max(new_tail.len()) {
            let key = Key::Index(start + offset);
            match (old_tail.get(offset), new_tail.get(offset)) {
                (Some(old), Some(new)) => {
                    let replaced = offset < inserted_len;
                    if resized || (replaced && !old.same_as(new, self.inner.equality)) {
                        changes.push(Change::Set(key, old.clone(), new.clone()));
                    }
                }
                (Some(old), None) => changes.push(Change::Removed(key, old.clone())),
                (None, Some(new)) => changes.push(Change::Added(key, new.clone())),
                (None, None) => {}
            }
        }
        if resized {
            changes.push(Change::Shape(old_len, new_len));
        }

        let removed_values = removed.iter().map(Slot::snapshot).collect();
        self.emit(changes);
        Ok(removed_values)
    }

    /// Append an item, returning the new length.
    pub fn push(&self, item: impl Into<Entry>) -> Result<usize> {
        let len = self.inner.backing.borrow().len();
        self.splice(len, 0, [item.into()])?;
        Ok(len + 1)
    }

    /// Remove the last item.
    pub fn pop(&self) -> Result<Option<Value>> {
        let len = self.list_len()?;
        if len == 0 {
            return Ok(None);
        }
        Ok(self.splice(len - 1, 1, Vec::<Entry>::new())?.into_iter().next())
    }

    /// Insert an item at `index`, shifting later items up.
    pub fn insert(&self, index: usize, item: impl Into<Entry>) -> Result<()> {
        self.splice(index, 0, [item.into()]).map(|_| ())
    }

    /// Insert an item at the front.
    pub fn unshift(&self, item: impl Into<Entry>) -> Result<usize> {
        self.insert(0, item)?;
        Ok(self.inner.backing.borrow().len())
    }

    /// Remove the first item.
    pub fn shift(&self) -> Result<Option<Value>> {
        if self.list_len()? == 0 {
            return Ok(None);
        }
        Ok(self.splice(0, 1, Vec::<Entry>::new())?.into_iter().next())
    }

    fn list_len(&self) -> Result<usize> {
        match &*self.inner.backing.borrow() {
            Backing::List(items) => Ok(items.len()),
            Backing::Record(_) => Err(ReactiveError::InvalidKey {
                key: Key::Index(0),
                shape: "record",
            }),
        }
    }

    // ---- Notification ----

    fn emit(&self, changes: Vec<Change>) {
        if changes.is_empty() {
            return;
        }
        let root = self.inner.root;
        let mut removed = Vec::new();
        Runtime::hold(|| {
            for change in changes {
                match change {
                    Change::Shape(old_len, new_len) => {
                        self.inner.shape_version.set(self.inner.shape_version.get() + 1);
                        let event = ReactiveEvent::shape_changed(root, old_len, new_len);
                        Runtime::notify(self.inner.shape, event.clone());
                        Runtime::notify(root, event);
                    }
                    Change::Set(key, old, new) => {
                        let event =
                            ReactiveEvent::value_set(root, Some(key.clone()), old.snapshot(), new.snapshot());
                        self.notify_key(&key, event);
                    }
                    Change::Added(key, new) => {
                        let event = ReactiveEvent::key_added(root, key.clone(), new.snapshot());
                        self.notify_key(&key, event);
                    }
                    Change::Removed(key, old) => {
                        let event = ReactiveEvent::key_removed(root, key.clone(), old.snapshot());
                        self.notify_key(&key, event);
                        removed.push(key);
                    }
                }
            }
        });
        self.prune_key_nodes(removed);
    }

    /// Drop the nodes of removed keys that nothing reads any more.
    fn prune_key_nodes(&self, removed: Vec<Key>) {
        let mut keys = self.inner.keys.borrow_mut();
        for key in removed {
            let Some(&node) = keys.get(&key) else {
                continue;
            };
            if Runtime::dependent_count(node) == 0 {
                keys.remove(&key);
                Runtime::unregister(node);
            }
        }
    }

    #[cfg(test)]
    fn key_node_count(&self) -> usize {
        self.inner.keys.borrow().len()
    }

    fn notify_key(&self, key: &Key, event: ReactiveEvent) {
        if let Some(node) = self.existing_key_node(key) {
            Runtime::notify(node, event.clone());
        }
        Runtime::notify(self.inner.root, event);
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backing = self.inner.backing.borrow();
        f.debug_struct("Proxy")
            .field("id", &self.inner.root)
            .field("shape", &backing.shape())
            .field("len", &backing.len())
            .finish()
    }
}

impl Serialize for Proxy {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

// ---- Tests ----
