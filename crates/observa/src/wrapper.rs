#![forbid(unsafe_code)]

//! Mutation-intercepting container wrapper.
//!
//! [`transform`] turns a list, map or record into an [`Observed`] facade
//! that mirrors the container one to one. Reads hand children back through
//! [`transform`] so nested containers are observed as well; writes mutate
//! the raw container and then notify its [`Notifier`].
//!
//! # Invariants
//!
//! 1. Exactly one wrapper per raw container. The cache holds a weak
//!    reference so the raw container can still be dropped; a wrapper
//!    rebuilt after the previous one was dropped has the same identity,
//!    because wrapper equality and hashing go through the container's
//!    [`ObjectId`].
//! 2. `unwrap(transform(x)) == x` and `transform(transform(x)) ==
//!    transform(x)`.
//! 3. The raw container only ever stores raw values: wrappers written
//!    through a wrapper are unwrapped first.
//! 4. A container frozen before it was ever wrapped is returned as is. One
//!    that was wrapped before the freeze keeps being returned wrapped for
//!    the rest of its life.

use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{ObserveError, Result};
use crate::metadata::{self, Location, MetaFlags, MetaKey};
use crate::notifier::Notifier;
use crate::value::{List, ObjectId, Value, ValueKind, list_index, property_name};

const WRAPPER: MetaKey<Weak<ObservedCore>> = MetaKey::new("observa.wrapper");

/// Wrap a list, map or record; return anything else unchanged.
#[must_use]
pub fn transform(value: &Value) -> Value {
    if !value.kind().is_container() {
        return value.clone();
    }
    let Some(id) = value.object_id() else {
        return value.clone();
    };
    let location = Location::object(id);
    if let Some(existing) = cached(&location) {
        return Value::Observed(existing);
    }
    let wrapped_before = metadata::flags(&location).contains(MetaFlags::OBSERVABLE);
    if value.is_frozen() && !wrapped_before {
        return value.clone();
    }
    let observed = Observed(Rc::new(ObservedCore {
        id,
        raw: value.clone(),
    }));
    let stale = metadata::insert(&location, &WRAPPER, Rc::downgrade(&observed.0));
    drop(stale);
    metadata::add_flags(&location, MetaFlags::OBSERVABLE);
    tracing::debug!(object = %id, kind = %value.kind(), "wrapper created");
    Value::Observed(observed)
}

/// The raw value behind any wrapper or tracked view.
#[must_use]
pub fn unwrap(value: &Value) -> Value {
    match value {
        Value::Observed(observed) => observed.raw().clone(),
        Value::Tracked(tracked) => tracked.raw().clone(),
        other => other.clone(),
    }
}

pub(crate) fn keys_of(raw: &Value) -> Vec<Value> {
    match raw {
        Value::List(list) => (0..list.len()).map(Value::from).collect(),
        Value::Map(map) => map.keys(),
        Value::Record(record) => record.keys().into_iter().map(Value::Str).collect(),
        _ => Vec::new(),
    }
}

pub(crate) fn cached(location: &Location) -> Option<Observed> {
    metadata::get(location, &WRAPPER)?.upgrade().map(Observed)
}

pub(crate) struct ObservedCore {
    id: ObjectId,
    raw: Value,
}

/// Notifying facade over a raw container.
#[derive(Clone)]
pub struct Observed(pub(crate) Rc<ObservedCore>);

impl Observed {
    /// Identity of the wrapped container.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.0.raw
    }

    #[must_use]
    pub fn kind(&self) -> ValueKind {
        self.0.raw.kind()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.raw.len().unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    // ─── Reads ───────────────────────────────────────────────────────────

    /// The child at `key`, wrapped when it is itself a container.
    pub fn get(&self, key: impl Into<Value>) -> Result<Value> {
        let key = unwrap(&key.into());
        Ok(transform(&self.0.raw.get(key)?))
    }

    pub fn has(&self, key: impl Into<Value>) -> Result<bool> {
        let key = unwrap(&key.into());
        match &self.0.raw {
            Value::List(list) => Ok(list_index(&key).is_ok_and(|index| index < list.len())),
            Value::Map(map) => Ok(map.has(&key)),
            Value::Record(record) => Ok(record.contains(&property_name(&key, ValueKind::Record)?)),
            other => Err(ObserveError::NoProperties { kind: other.kind() }),
        }
    }

    /// Indices, keys or field names, in order.
    #[must_use]
    pub fn keys(&self) -> Vec<Value> {
        keys_of(&self.0.raw)
    }

    #[must_use]
    pub fn values(&self) -> Vec<Value> {
        self.entries().into_iter().map(|(_, value)| value).collect()
    }

    #[must_use]
    pub fn entries(&self) -> Vec<(Value, Value)> {
        let raw: Vec<(Value, Value)> = match &self.0.raw {
            Value::List(list) => list
                .to_vec()
                .into_iter()
                .enumerate()
                .map(|(index, value)| (Value::from(index), value))
                .collect(),
            Value::Map(map) => map.entries(),
            Value::Record(record) => record
                .entries()
                .into_iter()
                .map(|(name, value)| (Value::Str(name), value))
                .collect(),
            _ => Vec::new(),
        };
        raw.into_iter()
            .map(|(key, value)| (key, transform(&value)))
            .collect()
    }

    // ─── Writes ──────────────────────────────────────────────────────────

    /// Assign `key`, then notify.
    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<()> {
        let key = unwrap(&key.into());
        let value = unwrap(&value.into());
        self.0.raw.set(key.clone(), value)?;
        self.changed(&key);
        Ok(())
    }

    /// Remove `key`, reporting whether anything was removed. On lists the
    /// element at the index is removed and later elements shift down.
    pub fn delete(&self, key: impl Into<Value>) -> Result<bool> {
        let key = unwrap(&key.into());
        let removed = match &self.0.raw {
            Value::List(list) => {
                let index = list_index(&key)?;
                if index >= list.len() {
                    false
                } else {
                    drop(list.remove(index)?);
                    true
                }
            }
            Value::Map(map) => map.delete(&key)?,
            Value::Record(record) => record
                .remove(&property_name(&key, ValueKind::Record)?)?
                .is_some(),
            other => return Err(ObserveError::NoProperties { kind: other.kind() }),
        };
        if removed {
            self.changed(&key);
        }
        Ok(removed)
    }

    pub fn clear(&self) -> Result<()> {
        match &self.0.raw {
            Value::List(list) => list.clear()?,
            Value::Map(map) => map.clear()?,
            Value::Record(record) => record.clear()?,
            other => return Err(ObserveError::NoProperties { kind: other.kind() }),
        }
        Notifier::trigger_location(&Location::object(self.0.id));
        Ok(())
    }

    /// Append to a list, returning the new length.
    pub fn push(&self, value: impl Into<Value>) -> Result<usize> {
        let len = self.list("push")?.push(unwrap(&value.into()))?;
        Notifier::trigger_location(&Location::object(self.0.id));
        Ok(len)
    }

    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        self.list("insert")?.insert(index, unwrap(&value.into()))?;
        Notifier::trigger_location(&Location::object(self.0.id));
        Ok(())
    }

    /// Remove and return the element at `index`, wrapped.
    pub fn remove(&self, index: usize) -> Result<Value> {
        let removed = self.list("remove")?.remove(index)?;
        Notifier::trigger_location(&Location::object(self.0.id));
        Ok(transform(&removed))
    }

    pub fn pop(&self) -> Result<Option<Value>> {
        let popped = self.list("pop")?.pop()?;
        if popped.is_some() {
            Notifier::trigger_location(&Location::object(self.0.id));
        }
        Ok(popped.as_ref().map(transform))
    }

    fn list(&self, operation: &'static str) -> Result<&List> {
        self.0.raw.as_list().ok_or(ObserveError::Unsupported {
            operation,
            kind: self.kind(),
        })
    }

    /// Records notify the field location before the container; lists and
    /// maps notify the container only.
    fn changed(&self, key: &Value) {
        let location = match (&self.0.raw, key) {
            (Value::Record(_), Value::Str(name)) => Location::property(self.0.id, Rc::clone(name)),
            (Value::Record(_), Value::Int(index)) => {
                Location::property(self.0.id, index.to_string())
            }
            _ => Location::object(self.0.id),
        };
        Notifier::trigger_location(&location);
    }
}

impl fmt::Debug for Observed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Observed({:?})", self.0.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Map, Record};
    use std::cell::{Cell, RefCell};

    fn watch_object(value: &Value) -> (Rc<Cell<usize>>, crate::notifier::Subscription) {
        let hits = Rc::new(Cell::new(0));
        let inner = Rc::clone(&hits);
        let sub = Notifier::get_or_create(value, None)
            .unwrap()
            .subscribe(move |_| inner.set(inner.get() + 1));
        (hits, sub)
    }

    #[test]
    fn transform_is_idempotent_and_unwrap_inverts_it() {
        let raw = Value::list([1, 2, 3]);
        let wrapped = transform(&raw);
        assert!(matches!(wrapped, Value::Observed(_)));
        assert_eq!(transform(&wrapped), wrapped);
        assert_eq!(transform(&raw), wrapped);
        assert_eq!(unwrap(&wrapped), raw);
        assert_eq!(unwrap(&raw), raw);
    }

    #[test]
    fn non_containers_pass_through() {
        let text = Value::from("x");
        assert_eq!(transform(&text), text);
        let set = Value::unique_set([1]);
        assert_eq!(transform(&set), set);
        let frozen = Value::list([1]);
        frozen.freeze();
        assert_eq!(transform(&frozen), frozen);
    }

    #[test]
    fn cached_wrapper_survives_freeze() {
        let raw = Value::record([("a", 1)]);
        let wrapped = transform(&raw);
        raw.freeze();
        assert_eq!(transform(&raw), wrapped);
        let observed = wrapped.as_observed().unwrap();
        assert_eq!(
            observed.set("a", 2),
            Err(ObserveError::Frozen {
                kind: ValueKind::Record
            })
        );
    }

    #[test]
    fn writes_notify_and_store_raw_values() {
        let raw = Value::list(Vec::<Value>::new());
        let wrapped = transform(&raw);
        let observed = wrapped.as_observed().unwrap();
        let (hits, _sub) = watch_object(&raw);

        let child = Value::record([("k", 1)]);
        let child_wrapped = transform(&child);
        observed.push(child_wrapped.clone()).unwrap();
        assert_eq!(hits.get(), 1);
        assert_eq!(raw.as_list().unwrap().get(0), Some(child.clone()));
        assert_eq!(observed.get(0).unwrap(), child_wrapped);

        observed.set(0, 5).unwrap();
        observed.insert(0, 4).unwrap();
        assert_eq!(observed.remove(1).unwrap(), Value::Int(5));
        assert_eq!(observed.pop().unwrap(), Some(Value::Int(4)));
        assert_eq!(observed.pop().unwrap(), None);
        assert_eq!(hits.get(), 5);
    }

    #[test]
    fn record_writes_notify_field_then_object() {
        let raw = Value::from(Record::new());
        let wrapped = transform(&raw);
        let order = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&order);
        let _field = Notifier::get_or_create(&raw, Some("name"))
            .unwrap()
            .subscribe(move |_| log.borrow_mut().push("field"));
        let log = Rc::clone(&order);
        let _whole = Notifier::get_or_create(&raw, None)
            .unwrap()
            .subscribe(move |_| log.borrow_mut().push("object"));
        wrapped.set("name", "cell").unwrap();
        assert_eq!(*order.borrow(), vec!["field", "object"]);
    }

    #[test]
    fn map_operations_notify() {
        let raw = Value::from(Map::new());
        let observed = transform(&raw);
        let observed = observed.as_observed().unwrap();
        let (hits, _sub) = watch_object(&raw);
        let key = Value::record(Vec::<(&str, Value)>::new());
        observed.set(transform(&key), "v").unwrap();
        assert!(observed.has(key.clone()).unwrap());
        assert!(observed.delete(key.clone()).unwrap());
        assert!(!observed.delete(key).unwrap());
        observed.clear().unwrap();
        assert_eq!(hits.get(), 3);
        assert_eq!(
            observed.push(1),
            Err(ObserveError::Unsupported {
                operation: "push",
                kind: ValueKind::Map
            })
        );
    }

    #[test]
    fn list_delete_removes_at_index() {
        let raw = Value::list([1, 2, 3]);
        let observed = transform(&raw);
        let observed = observed.as_observed().unwrap();
        assert!(observed.delete(1).unwrap());
        assert!(!observed.delete(9).unwrap());
        assert_eq!(
            raw.as_list().unwrap().to_vec(),
            vec![Value::Int(1), Value::Int(3)]
        );
        assert_eq!(observed.keys(), vec![Value::Int(0), Value::Int(1)]);
    }

    #[test]
    fn reads_wrap_children_and_skip_excluded() {
        let pattern = Value::pattern(regex::Regex::new("a").unwrap());
        let raw = Value::record([
            ("nested", Value::list([1])),
            ("pattern", pattern.clone()),
        ]);
        let wrapped = transform(&raw);
        assert!(matches!(wrapped.get("nested").unwrap(), Value::Observed(_)));
        assert_eq!(wrapped.get("pattern").unwrap(), pattern);
        let values = wrapped.as_observed().unwrap().values();
        assert!(matches!(values[0], Value::Observed(_)));
        assert_eq!(values[1], pattern);
    }

    #[test]
    fn dropped_wrapper_is_recreated() {
        let raw = Value::list([1]);
        let location = Location::object(raw.object_id().unwrap());
        drop(transform(&raw));
        assert!(cached(&location).is_none());
        let again = transform(&raw);
        assert!(cached(&location).unwrap().ptr_eq(again.as_observed().unwrap()));
        assert_eq!(unwrap(&again), raw);
    }

    #[test]
    fn rebuilt_wrapper_keeps_identity_after_freeze() {
        use std::hash::BuildHasher;
        let hasher = ahash::RandomState::with_seeds(1, 2, 3, 4);

        let child = Value::list([1]);
        let parent = transform(&Value::record([("child", child.clone())]));
        let first = parent.get("child").unwrap();
        assert!(matches!(first, Value::Observed(_)));
        let first_hash = hasher.hash_one(&first);
        drop(first);

        child.freeze();
        let second = parent.get("child").unwrap();
        assert!(matches!(second, Value::Observed(_)));
        assert_eq!(hasher.hash_one(&second), first_hash);
        assert_eq!(second, transform(&child));
        assert_eq!(
            second.as_observed().unwrap().push(2),
            Err(ObserveError::Frozen {
                kind: ValueKind::List
            })
        );
    }

    #[test]
    fn frozen_before_first_wrap_stays_raw() {
        let list = Value::list([1]);
        list.freeze();
        assert!(matches!(transform(&list), Value::List(_)));
    }
}
