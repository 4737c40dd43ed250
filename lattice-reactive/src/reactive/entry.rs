//! Keys, entries and classification of reactive values.
//!
//! Plain data is represented as [`serde_json::Value`]. Anything the engine
//! can observe is a [`Reactive`]: a leaf cell, a proxy over a record or list,
//! or a derived computation. Reads from a proxy yield an [`Entry`], which is
//! either plain data or a reactive value stored (or lazily wrapped) at that
//! key.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use super::derived::Derived;
use super::proxy::Proxy;
use super::runtime::Runtime;
use super::signal::Signal;
use crate::graph::NodeId;

/// Anything a leaf cell or derived computation can hold.
pub trait Data: Clone + PartialEq + Serialize + 'static {}

impl<T> Data for T where T: Clone + PartialEq + Serialize + 'static {}

/// Serialize a stored value for change descriptors and snapshots.
pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|error| {
        tracing::warn!(%error, "value could not be serialized, using null");
        Value::Null
    })
}

/// Record field or list index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum Key {
    Field(String),
    Index(usize),
}

impl Key {
    pub fn as_field(&self) -> Option<&str> {
        match self {
            Key::Field(name) => Some(name),
            Key::Index(_) => None,
        }
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            Key::Index(index) => Some(*index),
            Key::Field(_) => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Field(name) => f.write_str(name),
            Key::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Field(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Field(name)
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

/// A value the engine observes.
#[derive(Debug, Clone)]
pub enum Reactive {
    Leaf(Signal<Value>),
    Proxy(Proxy),
    Derived(Derived<Value>),
}

impl Reactive {
    /// The node that represents this value as a whole.
    pub fn id(&self) -> NodeId {
        match self {
            Reactive::Leaf(signal) => signal.id(),
            Reactive::Proxy(proxy) => proxy.id(),
            Reactive::Derived(derived) => derived.id(),
        }
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Reactive) -> bool {
        self.id() == other.id()
    }

    pub fn as_proxy(&self) -> Option<&Proxy> {
        match self {
            Reactive::Proxy(proxy) => Some(proxy),
            _ => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&Signal<Value>> {
        match self {
            Reactive::Leaf(signal) => Some(signal),
            _ => None,
        }
    }

    pub fn as_derived(&self) -> Option<&Derived<Value>> {
        match self {
            Reactive::Derived(derived) => Some(derived),
            _ => None,
        }
    }

    /// Short description used in errors.
    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Reactive::Leaf(_) => "a leaf cell",
            Reactive::Proxy(_) => "a proxy",
            Reactive::Derived(_) => "a derived computation",
        }
    }
}

impl From<Signal<Value>> for Reactive {
    fn from(signal: Signal<Value>) -> Self {
        Reactive::Leaf(signal)
    }
}

impl From<Proxy> for Reactive {
    fn from(proxy: Proxy) -> Self {
        Reactive::Proxy(proxy)
    }
}

impl From<Derived<Value>> for Reactive {
    fn from(derived: Derived<Value>) -> Self {
        Reactive::Derived(derived)
    }
}

/// What a proxy read yields.
#[derive(Debug, Clone)]
pub enum Entry {
    Plain(Value),
    Reactive(Reactive),
}

impl Entry {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Entry::Plain(value) => Some(value),
            Entry::Reactive(_) => None,
        }
    }

    pub fn as_reactive(&self) -> Option<&Reactive> {
        match self {
            Entry::Reactive(reactive) => Some(reactive),
            Entry::Plain(_) => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&Proxy> {
        self.as_reactive().and_then(Reactive::as_proxy)
    }

    pub fn into_proxy(self) -> Option<Proxy> {
        match self {
            Entry::Reactive(Reactive::Proxy(proxy)) => Some(proxy),
            _ => None,
        }
    }

    /// Coerce to plain data.
    ///
    /// Leaf cells and derived computations are read (and tracked). A nested
    /// proxy yields an untracked snapshot. A failing derived computation
    /// coerces to `null`.
    pub fn to_value(&self) -> Value {
        match self {
            Entry::Plain(value) => value.clone(),
            Entry::Reactive(Reactive::Leaf(signal)) => signal.get(),
            Entry::Reactive(Reactive::Proxy(proxy)) => proxy.snapshot(),
            Entry::Reactive(Reactive::Derived(derived)) => derived.get().unwrap_or_else(|error| {
                tracing::warn!(%error, "derived value unavailable, coercing to null");
                Value::Null
            }),
        }
    }
}

impl From<Value> for Entry {
    fn from(value: Value) -> Self {
        Entry::Plain(value)
    }
}

impl From<Reactive> for Entry {
    fn from(reactive: Reactive) -> Self {
        Entry::Reactive(reactive)
    }
}

impl From<Signal<Value>> for Entry {
    fn from(signal: Signal<Value>) -> Self {
        Entry::Reactive(Reactive::Leaf(signal))
    }
}

impl From<Proxy> for Entry {
    fn from(proxy: Proxy) -> Self {
        Entry::Reactive(Reactive::Proxy(proxy))
    }
}

impl From<Derived<Value>> for Entry {
    fn from(derived: Derived<Value>) -> Self {
        Entry::Reactive(Reactive::Derived(derived))
    }
}

macro_rules! entry_from_plain {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Entry {
                fn from(value: $ty) -> Self {
                    Entry::Plain(Value::from(value))
                }
            }
        )*
    };
}

entry_from_plain!(bool, i32, i64, u32, u64, usize, f64, String, &str);

/// Turn `value` into a reactive value.
///
/// Primitives become leaf cells, records and lists become proxies, and
/// reactive values are returned unchanged.
pub fn reactive(value: impl Into<Entry>) -> Reactive {
    match value.into() {
        Entry::Reactive(reactive) => reactive,
        Entry::Plain(value) => match Proxy::from_structured(value, Runtime::config().equality) {
            Ok(proxy) => Reactive::Proxy(proxy),
            Err(value) => Reactive::Leaf(Signal::new(value)),
        },
    }
}

/// How the engine sees a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactiveKind {
    /// A single-value cell.
    Leaf,
    /// A proxy or derived computation.
    Container,
}

/// Classification used by [`is_reactive`] and [`is_reactive_leaf`].
pub trait Classify {
    fn reactive_kind(&self) -> Option<ReactiveKind> {
        None
    }
}

impl<T: Data> Classify for Signal<T> {
    fn reactive_kind(&self) -> Option<ReactiveKind> {
        Some(ReactiveKind::Leaf)
    }
}

impl Classify for Proxy {
    fn reactive_kind(&self) -> Option<ReactiveKind> {
        Some(ReactiveKind::Container)
    }
}

impl<T: Data> Classify for Derived<T> {
    fn reactive_kind(&self) -> Option<ReactiveKind> {
        Some(ReactiveKind::Container)
    }
}

impl Classify for Reactive {
    fn reactive_kind(&self) -> Option<ReactiveKind> {
        match self {
            Reactive::Leaf(_) => Some(ReactiveKind::Leaf),
            Reactive::Proxy(_) | Reactive::Derived(_) => Some(ReactiveKind::Container),
        }
    }
}

impl Classify for Entry {
    fn reactive_kind(&self) -> Option<ReactiveKind> {
        self.as_reactive().and_then(Classify::reactive_kind)
    }
}

impl<T: Classify + ?Sized> Classify for &T {
    fn reactive_kind(&self) -> Option<ReactiveKind> {
        (**self).reactive_kind()
    }
}

impl<T: Classify> Classify for Option<T> {
    fn reactive_kind(&self) -> Option<ReactiveKind> {
        self.as_ref().and_then(Classify::reactive_kind)
    }
}

macro_rules! plain_classify {
    ($($ty:ty),* $(,)?) => {
        $( impl Classify for $ty {} )*
    };
}

plain_classify!(Value, bool, i32, i64, u32, u64, usize, f32, f64, char, String, str, ());

/// Whether `value` is a proxy or a derived computation.
///
/// Leaf cells are reactive too, but answer to [`is_reactive_leaf`] instead.
pub fn is_reactive<T: Classify + ?Sized>(value: &T) -> bool {
    value.reactive_kind() == Some(ReactiveKind::Container)
}

/// Whether `value` is a leaf cell.
pub fn is_reactive_leaf<T: Classify + ?Sized>(value: &T) -> bool {
    value.reactive_kind() == Some(ReactiveKind::Leaf)
}
