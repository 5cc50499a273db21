#![forbid(unsafe_code)]

//! Read-through dependency tracking.
//!
//! [`track`] binds a value to a [`Reaction`] and returns a [`Tracked`] view.
//! Every observable location read through the view during the current pass
//! is armed with a one-shot listener; the first change to any armed location
//! runs the reaction once, and the reaction re-reads through a fresh
//! `track` call to arm the next pass.
//!
//! # One-shot semantics
//!
//! A reaction carries a generation counter. Listeners remember the
//! generation they were armed in; firing bumps the generation and drops
//! every listener of the finished pass, so a single change that reaches the
//! reaction along several paths runs it exactly once. Dependency sets are
//! never carried across passes: a branch not taken on the latest pass is
//! simply not armed.
//!
//! # Instance reads
//!
//! Property reads on a tracked instance resolve in this order:
//!
//! 1. keep-raw fields: returned as stored, untracked;
//! 2. read-only fields: returned as stored, untracked;
//! 3. synthesized observable fields: the field location is armed and the
//!    value is tracked;
//! 4. getters: called with the tracked view as receiver, retried once with
//!    the raw instance when the getter reports
//!    [`ObserveError::ReceiverMismatch`]; the result is returned as is;
//! 5. plain fields: tracked.
//!
//! # Invariants
//!
//! 1. Exactly one view per (raw value, reaction) pair; tracking the pair
//!    again returns the same view and re-arms its container dependency. The
//!    cache is weak, and a view rebuilt after the old one was dropped
//!    compares and hashes equal to it through [`Tracked::key`].
//! 2. The tracker never runs a reaction itself.
//! 3. Primitives and excluded values pass through unchanged at any depth.
//! 4. Releasing an object prunes its locations from every reaction's armed
//!    set, so armed entries never outlive the object they watch.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;

use crate::class::Instance;
use crate::error::{ObserveError, Result};
use crate::metadata::{self, Location, MetaKey};
use crate::notifier::{Change, Notifier, Subscription};
use crate::registry;
use crate::synth;
use crate::value::{ObjectId, Value, ValueKind, property_name};
use crate::wrapper::{Observed, keys_of, transform, unwrap};

// ─── Reaction ────────────────────────────────────────────────────────────────

static NEXT_REACTION_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static REACTIONS: RefCell<Vec<Weak<ReactionCore>>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReactionId(u64);

impl ReactionId {
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

struct ReactionCore {
    id: ReactionId,
    callback: Box<dyn Fn(&Reaction)>,
    generation: Cell<u64>,
    armed: RefCell<AHashMap<Location, Subscription>>,
    runs: Cell<u64>,
}

/// Callback re-run when something it read through a tracked view changes.
#[derive(Clone)]
pub struct Reaction(Rc<ReactionCore>);

impl Reaction {
    pub fn new(callback: impl Fn(&Reaction) + 'static) -> Self {
        let id = ReactionId(NEXT_REACTION_ID.fetch_add(1, Ordering::Relaxed));
        let core = Rc::new(ReactionCore {
            id,
            callback: Box::new(callback),
            generation: Cell::new(0),
            armed: RefCell::new(AHashMap::new()),
            runs: Cell::new(0),
        });
        let _ = REACTIONS.try_with(|all| {
            let mut all = all.borrow_mut();
            all.retain(|weak| weak.strong_count() > 0);
            all.push(Rc::downgrade(&core));
        });
        Self(core)
    }

    #[must_use]
    pub fn id(&self) -> ReactionId {
        self.0.id
    }

    /// How many times the reaction has run.
    #[must_use]
    pub fn runs(&self) -> u64 {
        self.0.runs.get()
    }

    /// Number of locations armed in the current pass.
    #[must_use]
    pub fn armed_count(&self) -> usize {
        self.0.armed.borrow().len()
    }

    /// Shorthand for [`track`]`(root, self)`.
    pub fn track(&self, root: &Value) -> Result<Value> {
        track(root, self)
    }

    /// Drop every armed listener without running.
    pub fn dispose(&self) {
        self.0.generation.set(self.0.generation.get() + 1);
        let armed = std::mem::take(&mut *self.0.armed.borrow_mut());
        drop(armed);
    }

    pub(crate) fn arm(&self, location: &Location) {
        if self.0.armed.borrow().contains_key(location) {
            return;
        }
        let generation = self.0.generation.get();
        let weak: Weak<ReactionCore> = Rc::downgrade(&self.0);
        let subscription = Notifier::for_location(location).once(move |change| {
            if let Some(core) = weak.upgrade() {
                Reaction(core).fire(generation, change);
            }
        });
        let previous = self
            .0
            .armed
            .borrow_mut()
            .insert(location.clone(), subscription);
        drop(previous);
    }

    fn fire(&self, generation: u64, change: &Change) {
        if self.0.generation.get() != generation {
            return;
        }
        self.0.generation.set(generation + 1);
        let finished = std::mem::take(&mut *self.0.armed.borrow_mut());
        drop(finished);
        self.0.runs.set(self.0.runs.get() + 1);
        tracing::trace!(
            reaction = self.0.id.0,
            location = %change.location(),
            "reaction fired"
        );
        (self.0.callback)(self);
    }
}

/// Drop every armed entry on a location of `object` across all live
/// reactions.
pub(crate) fn forget_object(object: ObjectId) {
    let live: Vec<Reaction> = REACTIONS
        .try_with(|all| {
            let Ok(mut all) = all.try_borrow_mut() else {
                return Vec::new();
            };
            all.retain(|weak| weak.strong_count() > 0);
            all.iter().filter_map(Weak::upgrade).map(Reaction).collect()
        })
        .unwrap_or_default();
    for reaction in live {
        let stale: Vec<Subscription> = match reaction.0.armed.try_borrow_mut() {
            Ok(mut armed) => {
                let keys: Vec<Location> = armed
                    .keys()
                    .filter(|location| location.object_id() == object)
                    .cloned()
                    .collect();
                keys.iter().filter_map(|key| armed.remove(key)).collect()
            }
            Err(_) => Vec::new(),
        };
        drop(stale);
    }
}

impl fmt::Debug for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaction")
            .field("id", &self.0.id)
            .field("generation", &self.0.generation.get())
            .field("armed", &self.armed_count())
            .field("runs", &self.runs())
            .finish()
    }
}

// ─── Tracked views ───────────────────────────────────────────────────────────

type ViewCache = Rc<RefCell<AHashMap<ReactionId, Weak<TrackedCore>>>>;

const TRACKED: MetaKey<ViewCache> = MetaKey::new("observa.tracker.views");

/// Bind `root` to `reaction`.
///
/// Wrappers are unwrapped first. Primitives and excluded values come back
/// unchanged; lists, maps, records and instances come back as a
/// [`Tracked`] view. Instances have their declared fields synthesized, and
/// a synthesis failure is returned.
pub fn track(root: &Value, reaction: &Reaction) -> Result<Value> {
    let raw = unwrap(root);
    let Some(id) = raw.object_id() else {
        return Ok(raw);
    };
    let location = Location::object(id);
    let cache = metadata::get_or_insert_with(&location, &TRACKED, ViewCache::default);
    let hit = cache
        .borrow()
        .get(&reaction.id())
        .and_then(Weak::upgrade);
    if let Some(core) = hit {
        let tracked = Tracked(core);
        tracked.activate();
        return Ok(Value::Tracked(tracked));
    }

    let observed = match &raw {
        Value::Instance(instance) => {
            synth::ensure(instance)?;
            None
        }
        container => transform(container).as_observed().cloned(),
    };
    let tracked = Tracked(Rc::new(TrackedCore {
        id,
        raw,
        observed,
        reaction: reaction.clone(),
    }));
    cache
        .borrow_mut()
        .insert(reaction.id(), Rc::downgrade(&tracked.0));
    tracked.activate();
    Ok(Value::Tracked(tracked))
}

pub(crate) struct TrackedCore {
    id: ObjectId,
    raw: Value,
    observed: Option<Observed>,
    reaction: Reaction,
}

/// Read-intercepting view bound to one reaction.
#[derive(Clone)]
pub struct Tracked(pub(crate) Rc<TrackedCore>);

impl Tracked {
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.0.raw
    }

    #[must_use]
    pub fn reaction(&self) -> &Reaction {
        &self.0.reaction
    }

    /// The notifying wrapper underneath a container view.
    #[must_use]
    pub fn observed(&self) -> Option<&Observed> {
        self.0.observed.as_ref()
    }

    #[must_use]
    pub fn len(&self) -> Option<usize> {
        self.0.raw.len()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Identity of the view: the tracked object and the reaction.
    #[must_use]
    pub fn key(&self) -> (ObjectId, ReactionId) {
        (self.0.id, self.0.reaction.id())
    }

    /// Arm the whole-container dependency.
    fn activate(&self) {
        if self.0.observed.is_some() {
            self.0.reaction.arm(&Location::object(self.0.id));
        }
    }

    pub fn get(&self, key: impl Into<Value>) -> Result<Value> {
        let key = unwrap(&key.into());
        match &self.0.raw {
            Value::Instance(instance) => {
                self.get_field(instance, &property_name(&key, ValueKind::Instance)?)
            }
            raw => {
                let child = match &self.0.observed {
                    Some(observed) => observed.get(key)?,
                    None => raw.get(key)?,
                };
                track(&child, &self.0.reaction)
            }
        }
    }

    fn get_field(&self, instance: &Instance, name: &str) -> Result<Value> {
        let class = instance.class();
        if registry::is_keep_raw(class, name) || class.is_sealed(name) {
            return instance.get(name);
        }
        if synth::is_synthesized(instance, name) {
            self.0
                .reaction
                .arm(&Location::property(instance.id(), name));
            return track(&synth::read(instance, name), &self.0.reaction);
        }
        if let Some(decl) = class.lookup(name)
            && let Some(getter) = decl.getter()
        {
            return match getter(&Value::Tracked(self.clone())) {
                Err(err) if err.is_receiver_mismatch() => {
                    tracing::trace!(field = name, "getter retried with raw receiver");
                    getter(&Value::Instance(instance.clone()))
                }
                other => other,
            };
        }
        track(&instance.get(name)?, &self.0.reaction)
    }

    pub fn has(&self, key: impl Into<Value>) -> Result<bool> {
        match (&self.0.observed, &self.0.raw) {
            (Some(observed), _) => observed.has(key),
            (None, Value::Instance(instance)) => {
                let key = key.into();
                let name = property_name(&key, ValueKind::Instance)?;
                Ok(instance.field_names().contains(&name))
            }
            (None, raw) => Ok(keys_of(raw).contains(&key.into())),
        }
    }

    /// Indices, keys or field names, in order.
    #[must_use]
    pub fn keys(&self) -> Vec<Value> {
        match &self.0.raw {
            Value::Instance(instance) => instance
                .field_names()
                .into_iter()
                .map(Value::Str)
                .collect(),
            raw => keys_of(raw),
        }
    }

    /// Every child, read (and tracked) through [`get`](Self::get).
    pub fn values(&self) -> Result<Vec<Value>> {
        self.keys().into_iter().map(|key| self.get(key)).collect()
    }

    // Writes go through the notifying layer underneath.

    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<()> {
        match (&self.0.observed, &self.0.raw) {
            (Some(observed), _) => observed.set(key, value),
            (None, raw) => raw.set(key, value),
        }
    }

    pub fn delete(&self, key: impl Into<Value>) -> Result<bool> {
        self.writer("delete")?.delete(key)
    }

    pub fn push(&self, value: impl Into<Value>) -> Result<usize> {
        self.writer("push")?.push(value)
    }

    pub fn clear(&self) -> Result<()> {
        self.writer("clear")?.clear()
    }

    fn writer(&self, operation: &'static str) -> Result<&Observed> {
        match (&self.0.observed, &self.0.raw) {
            (Some(observed), _) => Ok(observed),
            (None, Value::Instance(_)) => Err(ObserveError::Unsupported {
                operation,
                kind: ValueKind::Instance,
            }),
            (None, raw) => Err(ObserveError::Frozen { kind: raw.kind() }),
        }
    }
}

impl fmt::Debug for Tracked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracked")
            .field("raw", &self.0.raw)
            .field("reaction", &self.0.reaction.id())
            .finish()
    }
}
