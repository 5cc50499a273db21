#![forbid(unsafe_code)]

//! Declared-field synthesis.
//!
//! The first access to an instance moves each declared observable field out
//! of plain storage into a metadata slot on `(instance, field)`. From then
//! on reads return the stored value and writes go through [`write`], which
//! notifies.
//!
//! # Invariants
//!
//! 1. The stored value is always `transform`ed: containers are held as
//!    their live wrapper, so the wrapper identity is stable for as long as
//!    the field holds the container.
//! 2. Assigning an identity-equal value is a no-op and notifies nobody.
//! 3. A field holding a notifiable child (wrapped container or instance) is
//!    relinked: a change of the child also fires the field, exactly one hop.
//! 4. A field fires at most once per change. While a field's delivery is in
//!    flight, relink listeners targeting that field stay silent, so a field
//!    holding its own owner (or any cycle back to it) is not fired again.
//!
//! # Failure Modes
//!
//! - A field declared read-only anywhere in the chain, or any field of an
//!   instance frozen before first access, cannot be synthesized. The error
//!   is returned from the first access; the remaining fields are still
//!   synthesized and later accesses succeed.

use std::cell::RefCell;
use std::rc::Rc;

use crate::class::Instance;
use crate::error::{ObserveError, Result};
use crate::metadata::{self, Location, MetaFlags, MetaKey};
use crate::notifier::{Notifier, Subscription};
use crate::registry;
use crate::value::Value;
use crate::wrapper::{transform, unwrap};

const FIELD_VALUE: MetaKey<Value> = MetaKey::new("observa.synth.value");
const RELINK: MetaKey<Subscription> = MetaKey::new("observa.synth.relink");

thread_local! {
    static IN_FLIGHT: RefCell<Vec<Location>> = const { RefCell::new(Vec::new()) };
}

/// Synthesize the declared observable fields of `instance` unless already
/// done.
pub fn ensure(instance: &Instance) -> Result<()> {
    let owner = Location::object(instance.id());
    if metadata::flags(&owner).contains(MetaFlags::SYNTHESIZED) {
        return Ok(());
    }
    metadata::add_flags(&owner, MetaFlags::SYNTHESIZED | MetaFlags::OBSERVABLE);

    let class = instance.class();
    let mut first_error = None;
    let mut synthesized = 0usize;
    for field in registry::observable_fields(class) {
        if registry::is_keep_raw(class, &field) {
            continue;
        }
        match synthesize(instance, &field) {
            Ok(()) => synthesized += 1,
            Err(err) => {
                tracing::debug!(
                    class = class.name(),
                    field = &*field,
                    error = %err,
                    "field synthesis failed"
                );
                first_error.get_or_insert(err);
            }
        }
    }
    tracing::debug!(
        class = class.name(),
        object = %instance.id(),
        fields = synthesized,
        "instance synthesized"
    );
    first_error.map_or(Ok(()), Err)
}

fn synthesize(instance: &Instance, field: &Rc<str>) -> Result<()> {
    let class = instance.class();
    if class.is_sealed(field) || instance.is_frozen() {
        return Err(ObserveError::NotConfigurable {
            class: class.name().to_string(),
            field: field.to_string(),
        });
    }
    let initial = instance.take_plain(field)?.unwrap_or_default();
    let stored = transform(&unwrap(&initial));
    let location = Location::property(instance.id(), Rc::clone(field));
    metadata::add_flags(&location, MetaFlags::OBSERVABLE | MetaFlags::SYNTHESIZED);
    relink(&location, &stored);
    let previous = metadata::insert(&location, &FIELD_VALUE, stored);
    drop(previous);
    Ok(())
}

/// Whether `name` is a synthesized field of `instance`.
#[must_use]
pub fn is_synthesized(instance: &Instance, name: &str) -> bool {
    metadata::flags(&Location::property(instance.id(), name)).contains(MetaFlags::SYNTHESIZED)
}

/// Current value of a synthesized field.
#[must_use]
pub fn read(instance: &Instance, name: &str) -> Value {
    metadata::get(&Location::property(instance.id(), name), &FIELD_VALUE).unwrap_or_default()
}

/// Assign a synthesized field, notifying unless the value is unchanged.
pub fn write(instance: &Instance, name: &str, value: Value) -> Result<()> {
    let location = Location::property(instance.id(), name);
    let next = transform(&unwrap(&value));
    let unchanged = metadata::get(&location, &FIELD_VALUE).is_some_and(|current| current == next);
    if unchanged {
        return Ok(());
    }
    let previous = metadata::insert(&location, &FIELD_VALUE, next.clone());
    relink(&location, &next);
    drop(previous);
    tracing::trace!(location = %location, "field assigned");
    trigger_field(&location);
    Ok(())
}

struct InFlight;

impl Drop for InFlight {
    fn drop(&mut self) {
        let _ = IN_FLIGHT.try_with(|stack| stack.borrow_mut().pop());
    }
}

fn trigger_field(location: &Location) {
    IN_FLIGHT.with(|stack| stack.borrow_mut().push(location.clone()));
    let _in_flight = InFlight;
    Notifier::trigger_location(location);
}

fn in_flight(location: &Location) -> bool {
    IN_FLIGHT.with(|stack| stack.borrow().contains(location))
}

/// Forward whole-object changes of `child` to the field at `location`.
fn relink(location: &Location, child: &Value) {
    let notifiable = matches!(child, Value::Observed(_) | Value::Instance(_));
    let previous = match child.object_id() {
        Some(child_id) if notifiable => {
            let field = location.clone();
            let subscription =
                Notifier::for_location(&Location::object(child_id)).subscribe(move |_| {
                    if !in_flight(&field) {
                        trigger_field(&field);
                    }
                });
            metadata::insert(location, &RELINK, subscription)
        }
        _ => metadata::remove(location, &RELINK),
    };
    drop(previous);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassBuilder;
    use std::cell::Cell;

    fn counter(location: &Location) -> (Rc<Cell<usize>>, Subscription) {
        let hits = Rc::new(Cell::new(0));
        let inner = Rc::clone(&hits);
        let sub = Notifier::for_location(location).subscribe(move |_| inner.set(inner.get() + 1));
        (hits, sub)
    }

    fn cell_class() -> crate::class::Class {
        ClassBuilder::new("Cell")
            .observable("source", || "".into())
            .observable("outputs", || Value::list(Vec::<Value>::new()))
            .field("plain", || 0.into())
            .build()
    }

    #[test]
    fn first_access_synthesizes_declared_fields() {
        let cell = cell_class().instantiate();
        assert!(!is_synthesized(&cell, "source"));
        assert_eq!(cell.get("source").unwrap(), Value::from(""));
        assert!(is_synthesized(&cell, "source"));
        assert!(is_synthesized(&cell, "outputs"));
        assert!(!is_synthesized(&cell, "plain"));
        assert!(matches!(read(&cell, "outputs"), Value::Observed(_)));
        assert!(cell.plain("source").is_none());
    }

    #[test]
    fn constructor_values_are_captured() {
        let cell = cell_class().instantiate_with([("source", "print(1)")]);
        assert_eq!(cell.get("source").unwrap(), Value::from("print(1)"));
    }

    #[test]
    fn writes_notify_once_and_skip_unchanged() {
        let cell = cell_class().instantiate();
        ensure(&cell).unwrap();
        let (field_hits, _a) = counter(&Location::property(cell.id(), "source"));
        let (object_hits, _b) = counter(&Location::object(cell.id()));

        cell.set("source", "x").unwrap();
        assert_eq!((field_hits.get(), object_hits.get()), (1, 1));
        cell.set("source", "x").unwrap();
        assert_eq!((field_hits.get(), object_hits.get()), (1, 1));

        let outputs = cell.get("outputs").unwrap();
        cell.set("outputs", outputs.clone()).unwrap();
        cell.set("outputs", unwrap(&outputs)).unwrap();
        assert_eq!(field_hits.get(), 1);
    }

    #[test]
    fn child_mutation_fires_parent_field() {
        let cell = cell_class().instantiate();
        let outputs = cell.get("outputs").unwrap();
        let (hits, _sub) = counter(&Location::property(cell.id(), "outputs"));
        outputs.as_observed().unwrap().push("line").unwrap();
        assert_eq!(hits.get(), 1);

        let replacement = Value::list(Vec::<Value>::new());
        cell.set("outputs", replacement.clone()).unwrap();
        assert_eq!(hits.get(), 2);
        outputs.as_observed().unwrap().push("stale").unwrap();
        assert_eq!(hits.get(), 2);
        transform(&replacement).as_observed().unwrap().push(1).unwrap();
        assert_eq!(hits.get(), 3);
    }

    #[test]
    fn self_reference_does_not_loop() {
        let class = ClassBuilder::new("Node")
            .observable("next", || Value::Null)
            .build();
        let node = class.instantiate();
        let (hits, _sub) = counter(&Location::property(node.id(), "next"));
        node.set("next", node.clone()).unwrap();
        assert_eq!(hits.get(), 1);
        node.set("next", Value::Null).unwrap();
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn two_node_cycle_fires_each_field_once() {
        let class = ClassBuilder::new("Node")
            .observable("next", || Value::Null)
            .build();
        let a = class.instantiate();
        let b = class.instantiate();
        b.set("next", a.clone()).unwrap();
        let (a_hits, _sa) = counter(&Location::property(a.id(), "next"));
        let (b_hits, _sb) = counter(&Location::property(b.id(), "next"));

        a.set("next", b.clone()).unwrap();
        assert_eq!(a_hits.get(), 1);
        assert_eq!(b_hits.get(), 1);

        a.set("next", Value::Null).unwrap();
        b.set("next", Value::Null).unwrap();
        assert!(!in_flight(&Location::property(a.id(), "next")));
    }

    #[test]
    fn reassigning_inside_a_listener_still_notifies() {
        let cell = cell_class().instantiate();
        ensure(&cell).unwrap();
        let location = Location::property(cell.id(), "source");
        let hits = Rc::new(Cell::new(0));
        let inner = Rc::clone(&hits);
        let writer = cell.clone();
        let _sub = Notifier::for_location(&location).subscribe(move |_| {
            inner.set(inner.get() + 1);
            if inner.get() == 1 {
                writer.set("source", "second").unwrap();
            }
        });
        cell.set("source", "first").unwrap();
        assert_eq!(hits.get(), 2);
        assert_eq!(cell.get("source").unwrap(), Value::from("second"));
    }

    #[test]
    fn sealed_field_fails_first_access_only() {
        let base = ClassBuilder::new("Base")
            .read_only("id", || 7.into())
            .build();
        let derived = ClassBuilder::new("Derived")
            .extends(&base)
            .observable("id", || 7.into())
            .observable("name", || "n".into())
            .build();
        let instance = derived.instantiate();
        assert_eq!(
            instance.get("name"),
            Err(ObserveError::NotConfigurable {
                class: "Derived".into(),
                field: "id".into(),
            })
        );
        assert!(is_synthesized(&instance, "name"));
        assert_eq!(instance.get("name").unwrap(), Value::from("n"));
        assert_eq!(instance.get("id").unwrap(), Value::Int(7));
    }

    #[test]
    fn frozen_instance_cannot_be_synthesized() {
        let cell = cell_class().instantiate();
        cell.freeze();
        assert!(matches!(
            ensure(&cell),
            Err(ObserveError::NotConfigurable { .. })
        ));
        assert!(!is_synthesized(&cell, "source"));
    }

    #[test]
    fn keep_raw_fields_are_left_alone() {
        let base = ClassBuilder::new("Editor")
            .keep_raw("handle", || Value::list([1]))
            .build();
        let derived = ClassBuilder::new("Wrapped")
            .extends(&base)
            .observable("handle", || Value::list([1]))
            .build();
        let editor = derived.instantiate();
        ensure(&editor).unwrap();
        assert!(!is_synthesized(&editor, "handle"));
        assert!(matches!(editor.get("handle").unwrap(), Value::List(_)));
    }
}
