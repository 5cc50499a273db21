#![forbid(unsafe_code)]

//! Shared-identity dynamic values.
//!
//! Reference variants ([`List`], [`Map`], [`Record`], [`Instance`],
//! [`Excluded`]) are `Rc` handles: cloning a [`Value`] clones the handle,
//! never the container. Identity is what the engine keys everything on, so
//! each container carries an [`ObjectId`] minted at construction.
//!
//! # Equality
//!
//! `Value: Eq + Hash` with *identity* semantics for reference variants and
//! value semantics for primitives. `NaN` equals `NaN` and `0.0` equals `-0.0`.
//! A wrapper is never equal to the raw value it wraps; compare through
//! [`equals`](crate::equals) for that.
//!
//! # Invariants
//!
//! 1. An `ObjectId` is never reused within a process.
//! 2. A frozen container rejects every write with [`ObserveError::Frozen`];
//!    freezing is permanent and shallow.
//! 3. Raw container writes never notify. Notification is the job of the
//!    [`Observed`] wrapper and of synthesized fields.
//! 4. Values removed from a container are dropped after its storage borrow
//!    is released.
//!
//! [`Observed`]: crate::Observed

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::{AHashSet, RandomState};
use indexmap::IndexMap;
use regex::Regex;
use web_time::SystemTime;

use crate::class::Instance;
use crate::error::{ObserveError, Result};
use crate::tracker::Tracked;
use crate::wrapper::Observed;

/// Field storage of records and instances, in insertion order.
pub(crate) type Fields = IndexMap<Rc<str>, Value, RandomState>;

/// Entry storage of key-unique maps, in insertion order.
pub(crate) type Entries = IndexMap<Value, Value, RandomState>;

/// Payload of an [`ExcludedKind::UniqueSet`] value.
pub type UniqueSet = RefCell<AHashSet<Value>>;

// ─── Identity ────────────────────────────────────────────────────────────────

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity handle of a container, instance or class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    pub(crate) fn mint() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) fn ptr_key<T>(rc: &Rc<T>) -> usize {
    Rc::as_ptr(rc) as *const () as usize
}

// ─── Storage core ────────────────────────────────────────────────────────────

/// Identity, freeze flag and storage shared by every raw container kind.
///
/// Dropping the core releases all side-table state recorded for its id.
pub(crate) struct Core<T> {
    id: ObjectId,
    frozen: Cell<bool>,
    data: RefCell<T>,
}

impl<T> Core<T> {
    pub(crate) fn new(data: T) -> Self {
        Self {
            id: ObjectId::mint(),
            frozen: Cell::new(false),
            data: RefCell::new(data),
        }
    }

    pub(crate) fn id(&self) -> ObjectId {
        self.id
    }

    pub(crate) fn is_frozen(&self) -> bool {
        self.frozen.get()
    }

    pub(crate) fn freeze(&self) {
        self.frozen.set(true);
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.data.borrow())
    }

    /// Run `f` against the storage unless frozen. Anything `f` evicts must be
    /// returned so the caller drops it after the borrow ends.
    pub(crate) fn write<R>(&self, kind: ValueKind, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        if self.frozen.get() {
            return Err(ObserveError::Frozen { kind });
        }
        let out = f(&mut self.data.borrow_mut());
        Ok(out)
    }
}

impl<T> Drop for Core<T> {
    fn drop(&mut self) {
        crate::lifecycle::release(self.id);
    }
}

// ─── ValueKind ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    Str,
    List,
    Map,
    Record,
    Instance,
    Excluded,
    Observed,
    Tracked,
}

impl ValueKind {
    /// Plain containers: the kinds [`transform`](crate::transform) wraps.
    #[must_use]
    pub const fn is_container(self) -> bool {
        matches!(self, Self::List | Self::Map | Self::Record)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "string",
            Self::List => "list",
            Self::Map => "map",
            Self::Record => "record",
            Self::Instance => "instance",
            Self::Excluded => "excluded value",
            Self::Observed => "observed wrapper",
            Self::Tracked => "tracked view",
        };
        f.write_str(name)
    }
}

// ─── List ────────────────────────────────────────────────────────────────────

/// Ordered list.
#[derive(Clone)]
pub struct List(pub(crate) Rc<Core<Vec<Value>>>);

impl List {
    #[must_use]
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    #[must_use]
    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Rc::new(Core::new(items)))
    }

    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.0.id()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.read(Vec::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.read(|items| items.get(index).cloned())
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.read(Clone::clone)
    }

    /// Assign `items[index]`; `index == len` appends.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let previous = self.0.write(ValueKind::List, |items| {
            let len = items.len();
            if index < len {
                Ok(Some(std::mem::replace(&mut items[index], value)))
            } else if index == len {
                items.push(value);
                Ok(None)
            } else {
                Err(ObserveError::IndexOutOfBounds { index, len })
            }
        })??;
        drop(previous);
        Ok(())
    }

    /// Append, returning the new length.
    pub fn push(&self, value: impl Into<Value>) -> Result<usize> {
        let value = value.into();
        self.0.write(ValueKind::List, |items| {
            items.push(value);
            items.len()
        })
    }

    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.0.write(ValueKind::List, |items| {
            let len = items.len();
            if index > len {
                return Err(ObserveError::IndexOutOfBounds { index, len });
            }
            items.insert(index, value);
            Ok(())
        })?
    }

    pub fn remove(&self, index: usize) -> Result<Value> {
        self.0.write(ValueKind::List, |items| {
            let len = items.len();
            if index >= len {
                return Err(ObserveError::IndexOutOfBounds { index, len });
            }
            Ok(items.remove(index))
        })?
    }

    pub fn pop(&self) -> Result<Option<Value>> {
        self.0.write(ValueKind::List, Vec::pop)
    }

    pub fn clear(&self) -> Result<()> {
        let evicted = self.0.write(ValueKind::List, std::mem::take)?;
        drop(evicted);
        Ok(())
    }

    pub fn freeze(&self) {
        self.0.freeze();
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.0.is_frozen()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for List {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// Plain record: string-keyed fields in insertion order.
#[derive(Clone)]
pub struct Record(pub(crate) Rc<Core<Fields>>);

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self(Rc::new(Core::new(Fields::default())))
    }

    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.0.id()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.read(IndexMap::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.read(|fields| fields.get(name).cloned())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.read(|fields| fields.contains_key(name))
    }

    #[must_use]
    pub fn keys(&self) -> Vec<Rc<str>> {
        self.0.read(|fields| fields.keys().cloned().collect())
    }

    #[must_use]
    pub fn entries(&self) -> Vec<(Rc<str>, Value)> {
        self.0.read(|fields| {
            fields
                .iter()
                .map(|(k, v)| (Rc::clone(k), v.clone()))
                .collect()
        })
    }

    pub fn set(&self, name: impl Into<Rc<str>>, value: impl Into<Value>) -> Result<()> {
        let (name, value) = (name.into(), value.into());
        let previous = self
            .0
            .write(ValueKind::Record, |fields| fields.insert(name, value))?;
        drop(previous);
        Ok(())
    }

    /// Delete a field, returning its value if it existed.
    pub fn remove(&self, name: &str) -> Result<Option<Value>> {
        self.0
            .write(ValueKind::Record, |fields| fields.shift_remove(name))
    }

    pub fn clear(&self) -> Result<()> {
        let evicted = self.0.write(ValueKind::Record, std::mem::take)?;
        drop(evicted);
        Ok(())
    }

    pub fn freeze(&self) {
        self.0.freeze();
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.0.is_frozen()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Map ─────────────────────────────────────────────────────────────────────

/// Key-unique map keyed by [`Value`] (identity for references).
#[derive(Clone)]
pub struct Map(pub(crate) Rc<Core<Entries>>);

impl Map {
    #[must_use]
    pub fn new() -> Self {
        Self(Rc::new(Core::new(Entries::default())))
    }

    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.0.id()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.read(IndexMap::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, key: &Value) -> Option<Value> {
        self.0.read(|entries| entries.get(key).cloned())
    }

    #[must_use]
    pub fn has(&self, key: &Value) -> bool {
        self.0.read(|entries| entries.contains_key(key))
    }

    #[must_use]
    pub fn keys(&self) -> Vec<Value> {
        self.0.read(|entries| entries.keys().cloned().collect())
    }

    #[must_use]
    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.0.read(|entries| {
            entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
    }

    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<()> {
        let (key, value) = (key.into(), value.into());
        let previous = self
            .0
            .write(ValueKind::Map, |entries| entries.insert(key, value))?;
        drop(previous);
        Ok(())
    }

    /// Remove `key`, reporting whether it was present.
    pub fn delete(&self, key: &Value) -> Result<bool> {
        let evicted = self
            .0
            .write(ValueKind::Map, |entries| entries.shift_remove_entry(key))?;
        Ok(evicted.is_some())
    }

    pub fn clear(&self) -> Result<()> {
        let evicted = self.0.write(ValueKind::Map, std::mem::take)?;
        drop(evicted);
        Ok(())
    }

    pub fn freeze(&self) {
        self.0.freeze();
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.0.is_frozen()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Map {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Excluded kinds ──────────────────────────────────────────────────────────

/// Value kinds the engine never wraps, marks or tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExcludedKind {
    Temporal,
    UniqueSet,
    Pattern,
    WeakMap,
}

struct ExcludedCore {
    kind: ExcludedKind,
    payload: Box<dyn Any>,
}

/// A natively-behaving value passed through the engine untouched.
#[derive(Clone)]
pub struct Excluded(Rc<ExcludedCore>);

impl Excluded {
    pub fn new<T: Any>(kind: ExcludedKind, payload: T) -> Self {
        Self(Rc::new(ExcludedCore {
            kind,
            payload: Box::new(payload),
        }))
    }

    #[must_use]
    pub fn kind(&self) -> ExcludedKind {
        self.0.kind
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.payload.downcast_ref()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

// ─── Value ───────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(List),
    Map(Map),
    Record(Record),
    Instance(Instance),
    Excluded(Excluded),
    Observed(Observed),
    Tracked(Tracked),
}

impl Value {
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::List(List::from_vec(items.into_iter().map(Into::into).collect()))
    }

    pub fn record<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Rc<str>>,
        V: Into<Value>,
    {
        let fields: Fields = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::Record(Record(Rc::new(Core::new(fields))))
    }

    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
    {
        let entries: Entries = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::Map(Map(Rc::new(Core::new(entries))))
    }

    pub fn excluded<T: Any>(kind: ExcludedKind, payload: T) -> Self {
        Self::Excluded(Excluded::new(kind, payload))
    }

    #[must_use]
    pub fn timestamp(at: SystemTime) -> Self {
        Self::excluded(ExcludedKind::Temporal, at)
    }

    #[must_use]
    pub fn pattern(regex: Regex) -> Self {
        Self::excluded(ExcludedKind::Pattern, regex)
    }

    pub fn unique_set<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let set: AHashSet<Value> = items.into_iter().map(Into::into).collect();
        Self::excluded(ExcludedKind::UniqueSet, UniqueSet::new(set))
    }

    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Str(_) => ValueKind::Str,
            Self::List(_) => ValueKind::List,
            Self::Map(_) => ValueKind::Map,
            Self::Record(_) => ValueKind::Record,
            Self::Instance(_) => ValueKind::Instance,
            Self::Excluded(_) => ValueKind::Excluded,
            Self::Observed(_) => ValueKind::Observed,
            Self::Tracked(_) => ValueKind::Tracked,
        }
    }

    /// Identity of the underlying raw value, seen through wrappers.
    #[must_use]
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            Self::List(list) => Some(list.id()),
            Self::Map(map) => Some(map.id()),
            Self::Record(record) => Some(record.id()),
            Self::Instance(instance) => Some(instance.id()),
            Self::Observed(observed) => Some(observed.id()),
            Self::Tracked(tracked) => Some(tracked.id()),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether the underlying raw value is frozen. Primitives and excluded
    /// values count as frozen.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        match self {
            Self::List(list) => list.is_frozen(),
            Self::Map(map) => map.is_frozen(),
            Self::Record(record) => record.is_frozen(),
            Self::Instance(instance) => instance.is_frozen(),
            Self::Observed(observed) => observed.raw().is_frozen(),
            Self::Tracked(tracked) => tracked.raw().is_frozen(),
            _ => true,
        }
    }

    /// Freeze the underlying raw value. No-op for values without identity.
    pub fn freeze(&self) {
        match self {
            Self::List(list) => list.freeze(),
            Self::Map(map) => map.freeze(),
            Self::Record(record) => record.freeze(),
            Self::Instance(instance) => instance.freeze(),
            Self::Observed(observed) => observed.raw().freeze(),
            Self::Tracked(tracked) => tracked.raw().freeze(),
            _ => {}
        }
    }

    /// Number of elements, entries or fields of a container.
    #[must_use]
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::List(list) => Some(list.len()),
            Self::Map(map) => Some(map.len()),
            Self::Record(record) => Some(record.len()),
            Self::Observed(observed) => Some(observed.len()),
            Self::Tracked(tracked) => tracked.len(),
            _ => None,
        }
    }

    /// Read `key` through whatever access mediation this value carries.
    ///
    /// Raw containers read directly, wrappers transform children, tracked
    /// views arm subscriptions. Missing keys read as `Null`.
    pub fn get(&self, key: impl Into<Value>) -> Result<Value> {
        let key = key.into();
        match self {
            Self::List(list) => Ok(list.get(list_index(&key)?).unwrap_or_default()),
            Self::Map(map) => Ok(map.get(&key).unwrap_or_default()),
            Self::Record(record) => {
                let name = property_name(&key, ValueKind::Record)?;
                Ok(record.get(&name).unwrap_or_default())
            }
            Self::Instance(instance) => {
                instance.get(&property_name(&key, ValueKind::Instance)?)
            }
            Self::Observed(observed) => observed.get(key),
            Self::Tracked(tracked) => tracked.get(key),
            _ => Err(ObserveError::NoProperties { kind: self.kind() }),
        }
    }

    /// Write `key` through whatever access mediation this value carries.
    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<()> {
        let (key, value) = (key.into(), value.into());
        match self {
            Self::List(list) => list.set(list_index(&key)?, value),
            Self::Map(map) => map.set(key, value),
            Self::Record(record) => record.set(property_name(&key, ValueKind::Record)?, value),
            Self::Instance(instance) => {
                instance.set(&property_name(&key, ValueKind::Instance)?, value)
            }
            Self::Observed(observed) => observed.set(key, value),
            Self::Tracked(tracked) => tracked.set(key, value),
            _ => Err(ObserveError::NoProperties { kind: self.kind() }),
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(x) => Some(*x),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&List> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Self::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_excluded(&self) -> Option<&Excluded> {
        match self {
            Self::Excluded(excluded) => Some(excluded),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_observed(&self) -> Option<&Observed> {
        match self {
            Self::Observed(observed) => Some(observed),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_tracked(&self) -> Option<&Tracked> {
        match self {
            Self::Tracked(tracked) => Some(tracked),
            _ => None,
        }
    }
}

pub(crate) fn list_index(key: &Value) -> Result<usize> {
    match key {
        Value::Int(i) => usize::try_from(*i).map_err(|_| ObserveError::InvalidKey {
            kind: ValueKind::List,
            key: i.to_string(),
        }),
        other => Err(ObserveError::InvalidKey {
            kind: ValueKind::List,
            key: format!("{other:?}"),
        }),
    }
}

pub(crate) fn property_name(key: &Value, kind: ValueKind) -> Result<Rc<str>> {
    match key {
        Value::Str(name) => Ok(Rc::clone(name)),
        Value::Int(i) => Ok(Rc::from(i.to_string())),
        other => Err(ObserveError::InvalidKey {
            kind,
            key: format!("{other:?}"),
        }),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => a.ptr_eq(b),
            (Self::Map(a), Self::Map(b)) => a.ptr_eq(b),
            (Self::Record(a), Self::Record(b)) => a.ptr_eq(b),
            (Self::Instance(a), Self::Instance(b)) => a.ptr_eq(b),
            (Self::Excluded(a), Self::Excluded(b)) => a.ptr_eq(b),
            // At most one wrapper or view per key is alive at a time, so the
            // key stands in for the pointer and survives a rebuild.
            (Self::Observed(a), Self::Observed(b)) => a.id() == b.id(),
            (Self::Tracked(a), Self::Tracked(b)) => a.key() == b.key(),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(i) => i.hash(state),
            Self::Float(x) => {
                // Canonicalize so the hash agrees with `eq`.
                let bits = if *x == 0.0 {
                    0
                } else if x.is_nan() {
                    f64::NAN.to_bits()
                } else {
                    x.to_bits()
                };
                bits.hash(state);
            }
            Self::Str(s) => s.hash(state),
            Self::List(list) => ptr_key(&list.0).hash(state),
            Self::Map(map) => ptr_key(&map.0).hash(state),
            Self::Record(record) => ptr_key(&record.0).hash(state),
            Self::Instance(instance) => ptr_key(&instance.0).hash(state),
            Self::Excluded(excluded) => ptr_key(&excluded.0).hash(state),
            Self::Observed(observed) => observed.id().hash(state),
            Self::Tracked(tracked) => tracked.key().hash(state),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Int(i) => write!(f, "Int({i})"),
            Self::Float(x) => write!(f, "Float({x})"),
            Self::Str(s) => write!(f, "Str({s:?})"),
            Self::List(list) => write!(f, "List{}", list.id()),
            Self::Map(map) => write!(f, "Map{}", map.id()),
            Self::Record(record) => write!(f, "Record{}", record.id()),
            Self::Instance(instance) => write!(f, "{}{}", instance.class().name(), instance.id()),
            Self::Excluded(excluded) => write!(f, "Excluded({:?})", excluded.kind()),
            Self::Observed(observed) => write!(f, "Observed({:?})", observed.raw()),
            Self::Tracked(tracked) => write!(f, "Tracked({:?})", tracked.raw()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Self::Int(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self {
        Self::Str(s)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Self::Null
    }
}

impl From<List> for Value {
    fn from(list: List) -> Self {
        Self::List(list)
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Self::Map(map)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Self::Record(record)
    }
}

impl From<Instance> for Value {
    fn from(instance: Instance) -> Self {
        Self::Instance(instance)
    }
}

impl From<Excluded> for Value {
    fn from(excluded: Excluded) -> Self {
        Self::Excluded(excluded)
    }
}

impl From<Observed> for Value {
    fn from(observed: Observed) -> Self {
        Self::Observed(observed)
    }
}

impl From<Tracked> for Value {
    fn from(tracked: Tracked) -> Self {
        Self::Tracked(tracked)
    }
}

impl From<&Value> for Value {
    fn from(value: &Value) -> Self {
        value.clone()
    }
}
