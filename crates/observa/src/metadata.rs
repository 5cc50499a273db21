#![forbid(unsafe_code)]

//! Out-of-band per-location metadata.
//!
//! The engine never stores bookkeeping inside the values it observes.
//! Instead every observable *location*, an object identity with an optional
//! property name, owns an entry in a thread-local side table:
//!
//! - [`MetaFlags`]: `OBSERVABLE`, `KEEP_RAW`, `SYNTHESIZED`.
//! - Typed slots addressed by [`MetaKey`] tokens. Two tokens with different
//!   names or different value types never collide, so independent subsystems
//!   (notifiers, wrapper caches, tracked-view caches, synthesized field
//!   storage) share one table without coordination.
//!
//! # Invariants
//!
//! 1. No user callback runs while the table is borrowed. Every accessor
//!    clones out or moves out before returning.
//! 2. Slot values evicted by [`insert`], [`remove`] or [`take_object`] are
//!    handed back to the caller and dropped after the borrow is released.
//! 3. All entries of an object are removed together (see
//!    [`lifecycle`](crate::lifecycle)).

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use ahash::AHashMap;
use bitflags::bitflags;

use crate::value::ObjectId;

// ─── Location ────────────────────────────────────────────────────────────────

/// An `(object)` or `(object, property)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    object: ObjectId,
    property: Option<Rc<str>>,
}

impl Location {
    #[must_use]
    pub fn object(object: ObjectId) -> Self {
        Self {
            object,
            property: None,
        }
    }

    #[must_use]
    pub fn property(object: ObjectId, property: impl Into<Rc<str>>) -> Self {
        Self {
            object,
            property: Some(property.into()),
        }
    }

    #[must_use]
    pub fn new(object: ObjectId, property: Option<&str>) -> Self {
        Self {
            object,
            property: property.map(Rc::from),
        }
    }

    #[must_use]
    pub fn object_id(&self) -> ObjectId {
        self.object
    }

    #[must_use]
    pub fn property_name(&self) -> Option<&str> {
        self.property.as_deref()
    }

    /// The whole-object location this location belongs to.
    #[must_use]
    pub fn owner(&self) -> Self {
        Self::object(self.object)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.property {
            Some(property) => write!(f, "{}.{}", self.object, property),
            None => write!(f, "{}", self.object),
        }
    }
}

// ─── Flags and keys ──────────────────────────────────────────────────────────

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MetaFlags: u8 {
        /// The location participates in change notification.
        const OBSERVABLE = 1;
        /// The location must never be wrapped or tracked.
        const KEEP_RAW = 1 << 1;
        /// Declared fields of this instance have been synthesized.
        const SYNTHESIZED = 1 << 2;
    }
}

/// Typed token addressing one slot per location.
pub struct MetaKey<T: 'static> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> MetaKey<T> {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    fn slot(&self) -> SlotKey {
        (self.name, TypeId::of::<T>())
    }
}

impl<T: 'static> fmt::Debug for MetaKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MetaKey").field(&self.name).finish()
    }
}

type SlotKey = (&'static str, TypeId);

// ─── Store ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Entry {
    flags: MetaFlags,
    slots: AHashMap<SlotKey, Box<dyn Any>>,
}

/// Everything recorded for one object, as removed by [`take_object`].
#[derive(Default)]
pub(crate) struct ObjectEntries {
    entries: AHashMap<Option<Rc<str>>, Entry>,
}

impl ObjectEntries {
    /// Move out every slot holding a `T`, across all of the object's
    /// locations.
    pub(crate) fn drain_slots<T: 'static>(&mut self, key: &MetaKey<T>) -> Vec<T> {
        let slot = key.slot();
        self.entries
            .values_mut()
            .filter_map(|entry| entry.slots.remove(&slot))
            .filter_map(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
            .collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Default)]
struct MetadataStore {
    objects: AHashMap<ObjectId, ObjectEntries>,
}

impl MetadataStore {
    fn entry(&self, location: &Location) -> Option<&Entry> {
        self.objects
            .get(&location.object)
            .and_then(|object| object.entries.get(&location.property))
    }

    fn entry_mut(&mut self, location: &Location) -> &mut Entry {
        self.objects
            .entry(location.object)
            .or_default()
            .entries
            .entry(location.property.clone())
            .or_default()
    }

    fn prune(&mut self, location: &Location) {
        let Some(object) = self.objects.get_mut(&location.object) else {
            return;
        };
        if object
            .entries
            .get(&location.property)
            .is_some_and(|entry| entry.flags.is_empty() && entry.slots.is_empty())
        {
            object.entries.remove(&location.property);
        }
        if object.entries.is_empty() {
            self.objects.remove(&location.object);
        }
    }
}

thread_local! {
    static STORE: RefCell<MetadataStore> = RefCell::new(MetadataStore::default());
}

/// Clone the `key` slot of `location`.
#[must_use]
pub fn get<T: Clone + 'static>(location: &Location, key: &MetaKey<T>) -> Option<T> {
    STORE.with(|store| {
        store
            .borrow()
            .entry(location)
            .and_then(|entry| entry.slots.get(&key.slot()))
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .cloned()
    })
}

/// Store `value` in the `key` slot of `location`, returning the previous
/// value.
pub fn insert<T: 'static>(location: &Location, key: &MetaKey<T>, value: T) -> Option<T> {
    let previous = STORE.with(|store| {
        store
            .borrow_mut()
            .entry_mut(location)
            .slots
            .insert(key.slot(), Box::new(value))
    });
    previous.and_then(|boxed| boxed.downcast::<T>().ok()).map(|boxed| *boxed)
}

/// Remove the `key` slot of `location`.
pub fn remove<T: 'static>(location: &Location, key: &MetaKey<T>) -> Option<T> {
    let removed = STORE.with(|store| {
        let mut store = store.borrow_mut();
        let removed = store
            .objects
            .get_mut(&location.object)
            .and_then(|object| object.entries.get_mut(&location.property))
            .and_then(|entry| entry.slots.remove(&key.slot()));
        store.prune(location);
        removed
    });
    removed.and_then(|boxed| boxed.downcast::<T>().ok()).map(|boxed| *boxed)
}

/// The `key` slot of `location`, created with `init` when absent.
///
/// `init` runs outside the table borrow.
pub fn get_or_insert_with<T: Clone + 'static>(
    location: &Location,
    key: &MetaKey<T>,
    init: impl FnOnce() -> T,
) -> T {
    if let Some(existing) = get(location, key) {
        return existing;
    }
    let value = init();
    let previous = insert(location, key, value.clone());
    drop(previous);
    value
}

#[must_use]
pub fn flags(location: &Location) -> MetaFlags {
    STORE.with(|store| {
        store
            .borrow()
            .entry(location)
            .map_or_else(MetaFlags::empty, |entry| entry.flags)
    })
}

pub fn add_flags(location: &Location, flags: MetaFlags) {
    STORE.with(|store| store.borrow_mut().entry_mut(location).flags.insert(flags));
}

pub fn remove_flags(location: &Location, flags: MetaFlags) {
    STORE.with(|store| {
        let mut store = store.borrow_mut();
        if let Some(entry) = store
            .objects
            .get_mut(&location.object)
            .and_then(|object| object.entries.get_mut(&location.property))
        {
            entry.flags.remove(flags);
        }
        store.prune(location);
    });
}

/// Remove everything recorded for `object`.
///
/// Returns `None` when the table is unavailable: already borrowed further up
/// the stack, or torn down during thread exit.
pub(crate) fn take_object(object: ObjectId) -> Option<ObjectEntries> {
    STORE
        .try_with(|store| {
            store
                .try_borrow_mut()
                .ok()
                .map(|mut store| store.objects.remove(&object).unwrap_or_default())
        })
        .ok()
        .flatten()
}

/// Number of objects that currently have metadata.
#[must_use]
pub fn object_count() -> usize {
    STORE.with(|store| store.borrow().objects.len())
}

/// Whether anything is recorded for `object`.
#[must_use]
pub fn has_object(object: ObjectId) -> bool {
    STORE.with(|store| store.borrow().objects.contains_key(&object))
}
