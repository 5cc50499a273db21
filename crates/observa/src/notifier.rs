#![forbid(unsafe_code)]

//! Per-location change notification.
//!
//! Every observable [`Location`] owns at most one [`Notifier`], created
//! lazily and cached in the metadata side table. Listeners are registered
//! with [`Notifier::subscribe`] or [`Notifier::once`] and removed when the
//! returned [`Subscription`] guard is dropped or disposed.
//!
//! # Delivery
//!
//! [`Notifier::notify`] takes a snapshot of the listener list and then runs
//! the snapshot with no borrow held, so listeners may subscribe, unsubscribe,
//! mutate, or notify the same notifier reentrantly. One-shot listeners are
//! removed from the live list before any callback of the round runs.
//!
//! # Invariants
//!
//! 1. `get_or_create` on the same location returns the same notifier until
//!    its owner is released.
//! 2. A disposed notifier never delivers again; `notify` and `subscribe` on
//!    it are silent no-ops.
//! 3. Each listener runs at most once per `notify` call.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::config::EngineConfig;
use crate::deferred;
use crate::error::{ObserveError, Result};
use crate::metadata::{self, Location, MetaKey};
use crate::observability;
use crate::value::Value;

pub(crate) const NOTIFIER: MetaKey<Notifier> = MetaKey::new("observa.notifier");

/// Payload handed to listeners: the location that changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    location: Location,
}

impl Change {
    #[must_use]
    pub fn location(&self) -> &Location {
        &self.location
    }
}

type Callback = Rc<dyn Fn(&Change)>;

struct Listener {
    id: u64,
    once: bool,
    callback: Callback,
}

pub(crate) struct NotifierCore {
    location: Location,
    listeners: RefCell<Vec<Listener>>,
    next_id: Cell<u64>,
    disposed: Cell<bool>,
}

impl NotifierCore {
    fn remove(&self, id: u64) -> Option<Listener> {
        let mut listeners = self.listeners.borrow_mut();
        let index = listeners.iter().position(|listener| listener.id == id)?;
        Some(listeners.remove(index))
    }

    fn contains(&self, id: u64) -> bool {
        self.listeners
            .borrow()
            .iter()
            .any(|listener| listener.id == id)
    }
}

/// Pub/sub channel bound to one location.
#[derive(Clone)]
pub struct Notifier(Rc<NotifierCore>);

impl Notifier {
    fn new(location: Location) -> Self {
        Self(Rc::new(NotifierCore {
            location,
            listeners: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
            disposed: Cell::new(false),
        }))
    }

    /// The cached notifier of `target` (or of `target.property`), created on
    /// first request.
    pub fn get_or_create(target: &Value, property: Option<&str>) -> Result<Self> {
        let location = location_of(target, property)?;
        Ok(Self::for_location(&location))
    }

    /// The cached notifier, without creating one.
    #[must_use]
    pub fn find(target: &Value, property: Option<&str>) -> Option<Self> {
        let location = location_of(target, property).ok()?;
        Self::find_location(&location)
    }

    pub(crate) fn for_location(location: &Location) -> Self {
        metadata::get_or_insert_with(location, &NOTIFIER, || Self::new(location.clone()))
    }

    pub(crate) fn find_location(location: &Location) -> Option<Self> {
        metadata::get(location, &NOTIFIER)
    }

    /// Notify the property location of `target` (if given), then its
    /// whole-object location. Locations nobody asked a notifier for are
    /// skipped.
    pub fn trigger(target: &Value, property: Option<&str>) {
        if let Ok(location) = location_of(target, property) {
            Self::trigger_location(&location);
        }
    }

    pub(crate) fn trigger_location(location: &Location) {
        if location.property_name().is_some()
            && let Some(notifier) = Self::find_location(location)
        {
            notifier.notify();
        }
        if let Some(notifier) = Self::find_location(&location.owner()) {
            notifier.notify();
        }
    }

    /// An event source for `target[.property]`.
    ///
    /// The target is made observable first when eligible. A location that
    /// still does not qualify yields a no-op event.
    #[must_use]
    pub fn to_event(target: &Value, property: Option<&str>, delivery: Delivery) -> NotifierEvent {
        let marked = observability::mark_observable(target);
        if !matches!(marked, Ok(true)) || !observability::is_observable(target, property) {
            return NotifierEvent::noop();
        }
        match Self::get_or_create(target, property) {
            Ok(notifier) => NotifierEvent {
                notifier: Some(notifier),
                deferred: delivery.is_deferred(),
            },
            Err(_) => NotifierEvent::noop(),
        }
    }

    #[must_use]
    pub fn location(&self) -> &Location {
        &self.0.location
    }

    /// Register a persistent listener.
    pub fn subscribe(&self, callback: impl Fn(&Change) + 'static) -> Subscription {
        self.add(false, Rc::new(callback))
    }

    /// Register a listener removed after its first invocation.
    pub fn once(&self, callback: impl Fn(&Change) + 'static) -> Subscription {
        self.add(true, Rc::new(callback))
    }

    fn add(&self, once: bool, callback: Callback) -> Subscription {
        if self.0.disposed.get() {
            return Subscription::noop();
        }
        let id = self.0.next_id.get();
        self.0.next_id.set(id + 1);
        self.0
            .listeners
            .borrow_mut()
            .push(Listener { id, once, callback });
        Subscription {
            notifier: Rc::downgrade(&self.0),
            id,
            active: true,
        }
    }

    /// Deliver a change to every current listener.
    pub fn notify(&self) {
        if self.0.disposed.get() {
            return;
        }
        let (snapshot, fired_once) = {
            let mut listeners = self.0.listeners.borrow_mut();
            let snapshot: SmallVec<[Callback; 4]> = listeners
                .iter()
                .map(|listener| Rc::clone(&listener.callback))
                .collect();
            let (once, kept): (Vec<Listener>, Vec<Listener>) =
                std::mem::take(&mut *listeners).into_iter().partition(|l| l.once);
            *listeners = kept;
            (snapshot, once)
        };
        drop(fired_once);
        if snapshot.is_empty() {
            return;
        }
        tracing::trace!(
            location = %self.0.location,
            listeners = snapshot.len(),
            "notify"
        );
        let change = Change {
            location: self.0.location.clone(),
        };
        for callback in &snapshot {
            if self.0.disposed.get() {
                break;
            }
            callback(&change);
        }
    }

    /// Drop every listener; later `notify` and `subscribe` calls do nothing.
    pub fn dispose(&self) {
        if self.0.disposed.replace(true) {
            return;
        }
        let listeners = std::mem::take(&mut *self.0.listeners.borrow_mut());
        drop(listeners);
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.0.disposed.get()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.0.listeners.borrow().len()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("location", &self.0.location)
            .field("listeners", &self.listener_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn location_of(target: &Value, property: Option<&str>) -> Result<Location> {
    let object = target
        .object_id()
        .ok_or(ObserveError::NotObservable {
            kind: target.kind(),
        })?;
    Ok(Location::new(object, property))
}

// ─── Delivery ────────────────────────────────────────────────────────────────

/// How an event source delivers changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// Whatever [`EngineConfig::current`] says.
    #[default]
    Default,
    /// Inline, inside the mutating call.
    Sync,
    /// Queued for [`flush_deferred`](crate::flush_deferred).
    Deferred,
}

impl Delivery {
    /// `None` is the caller default, `Some(false)` synchronous, `Some(true)`
    /// deferred.
    #[must_use]
    pub const fn from_flag(flag: Option<bool>) -> Self {
        match flag {
            None => Self::Default,
            Some(false) => Self::Sync,
            Some(true) => Self::Deferred,
        }
    }

    fn is_deferred(self) -> bool {
        match self {
            Self::Default => EngineConfig::current().deferred_delivery,
            Self::Sync => false,
            Self::Deferred => true,
        }
    }
}

/// Event source returned by [`Notifier::to_event`].
#[derive(Debug, Clone, Default)]
pub struct NotifierEvent {
    notifier: Option<Notifier>,
    deferred: bool,
}

impl NotifierEvent {
    #[must_use]
    pub fn noop() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.notifier.is_none()
    }

    #[must_use]
    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    pub fn subscribe(&self, callback: impl Fn(&Change) + 'static) -> Subscription {
        match &self.notifier {
            None => Subscription::noop(),
            Some(notifier) if self.deferred => notifier.subscribe(defer(callback)),
            Some(notifier) => notifier.subscribe(callback),
        }
    }

    pub fn once(&self, callback: impl Fn(&Change) + 'static) -> Subscription {
        match &self.notifier {
            None => Subscription::noop(),
            Some(notifier) if self.deferred => notifier.once(defer(callback)),
            Some(notifier) => notifier.once(callback),
        }
    }
}

fn defer(callback: impl Fn(&Change) + 'static) -> impl Fn(&Change) + 'static {
    let callback = Rc::new(callback);
    move |change: &Change| {
        let callback = Rc::clone(&callback);
        let change = change.clone();
        deferred::enqueue(move || callback(&change));
    }
}

// ─── Subscription ────────────────────────────────────────────────────────────

/// Listener registration guard. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    notifier: Weak<NotifierCore>,
    id: u64,
    active: bool,
}

impl Subscription {
    /// A guard that owns nothing.
    pub fn noop() -> Self {
        Self {
            notifier: Weak::new(),
            id: 0,
            active: false,
        }
    }

    /// Whether the listener is still installed on a live notifier.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
            && self
                .notifier
                .upgrade()
                .is_some_and(|core| !core.disposed.get() && core.contains(self.id))
    }

    pub fn dispose(mut self) {
        self.unsubscribe();
    }

    /// Give up the guard and leave the listener installed until it fires
    /// (one-shot) or its notifier is disposed.
    pub fn detach(mut self) {
        self.active = false;
    }

    fn unsubscribe(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        if let Some(core) = self.notifier.upgrade() {
            let removed = core.remove(self.id);
            drop(removed);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
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
