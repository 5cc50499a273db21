#![forbid(unsafe_code)]

//! Fine-grained reactive observation engine.
//!
//! `observa` gives every mutable value a stable notification channel and lets
//! a consumer read through a value once to subscribe to exactly the locations
//! it touched:
//!
//! - [`Value`]: shared-identity dynamic values (lists, key-unique maps,
//!   records, class instances) plus excluded kinds that are never intercepted.
//! - [`Notifier`]: one pub/sub channel per observable location.
//! - [`Observed`]: mutation-intercepting wrapper over a container, created by
//!   [`transform`].
//! - [`ClassBuilder`]: declares observable, keep-raw, read-only and computed
//!   fields; declared observable fields notify on assignment.
//! - [`track`] / [`Reaction`]: read-intercepting views that arm one-shot
//!   subscriptions on everything read during the current pass.
//! - [`watch`] / [`watch_property`]: whole-object or single-property
//!   subscriptions.
//!
//! # Architecture
//!
//! The engine is single-threaded. Per-location state (flags, notifiers,
//! wrapper caches, synthesized field storage) lives in a thread-local side
//! table keyed by [`ObjectId`], never inside the values themselves. Dropping
//! the last handle to a container or instance releases its side-table entries
//! and disposes its notifiers; [`dispose`] does the same eagerly.
//!
//! # Example
//!
//! ```
//! use observa::{ClassBuilder, Reaction, Value, track};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let foo = ClassBuilder::new("Foo").observable("info", || "".into()).build();
//! let instance = foo.instantiate();
//!
//! let runs = Rc::new(Cell::new(0));
//! let counter = Rc::clone(&runs);
//! let reaction = Reaction::new(move |_| counter.set(counter.get() + 1));
//!
//! let view = track(&Value::from(instance.clone()), &reaction).unwrap();
//! assert_eq!(view.get("info").unwrap(), Value::from(""));
//!
//! instance.set("info", "x").unwrap();
//! assert_eq!(runs.get(), 1);
//! ```

pub mod class;
pub mod config;
pub mod deferred;
pub mod error;
pub mod lifecycle;
pub mod metadata;
pub mod notifier;
pub mod observability;
pub mod registry;
pub mod synth;
pub mod tracker;
pub mod value;
pub mod watch;
pub mod wrapper;

pub use class::{Class, ClassBuilder, FieldDecl, FieldFlags, Instance};
pub use config::EngineConfig;
pub use deferred::{flush_deferred, pending_deferred};
pub use error::{ObserveError, Result};
pub use lifecycle::dispose;
pub use metadata::{Location, MetaFlags, MetaKey};
pub use notifier::{Change, Delivery, Notifier, NotifierEvent, Subscription};
pub use observability::{can_be_observable, equals, is_observable, mark_observable};
pub use tracker::{Reaction, ReactionId, Tracked, track};
pub use value::{Excluded, ExcludedKind, List, Map, ObjectId, Record, Value, ValueKind};
pub use watch::{watch, watch_property};
pub use wrapper::{Observed, transform, unwrap};
