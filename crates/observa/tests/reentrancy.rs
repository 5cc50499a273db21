#![forbid(unsafe_code)]

//! Reentrancy and delivery-mode tests.
//!
//! Listeners and reactions are free to mutate, subscribe, unsubscribe and
//! notify while a delivery round is in progress. These tests pin down that
//! no listener is skipped or run twice within one round, and that deferred
//! delivery waits for an explicit flush.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use observa::{
    ClassBuilder, Delivery, Notifier, Reaction, Subscription, Value, flush_deferred,
    pending_deferred, track, transform,
};
use pretty_assertions::assert_eq;

#[test]
fn listener_mutating_its_own_notifier_does_not_disturb_others() {
    let list = Value::list(Vec::<Value>::new());
    let notifier = Notifier::get_or_create(&list, None).unwrap();
    let wrapped = transform(&list);
    let log = Rc::new(RefCell::new(Vec::new()));

    let first_log = Rc::clone(&log);
    let writer = wrapped.clone();
    let _first = notifier.subscribe(move |_| {
        first_log.borrow_mut().push("first");
        let len = writer.len().unwrap_or(0);
        if len < 2 {
            writer.as_observed().unwrap().push(len).unwrap();
        }
    });
    let second_log = Rc::clone(&log);
    let _second = notifier.subscribe(move |_| second_log.borrow_mut().push("second"));

    wrapped.as_observed().unwrap().push("seed").unwrap();

    // The seed push runs a round; the nested push inside `first` runs a
    // complete round of its own before the outer round reaches `second`.
    assert_eq!(
        *log.borrow(),
        vec!["first", "first", "second", "second"]
    );
    assert_eq!(list.len(), Some(2));
}

#[test]
fn unsubscribing_mid_round_keeps_the_snapshot() {
    let record = Value::record([("a", 1)]);
    let notifier = Notifier::get_or_create(&record, None).unwrap();
    let hits = Rc::new(Cell::new(0));
    let victim: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

    let slot = Rc::clone(&victim);
    let _killer = notifier.subscribe(move |_| {
        let taken = slot.borrow_mut().take();
        drop(taken);
    });
    let counter = Rc::clone(&hits);
    *victim.borrow_mut() = Some(notifier.subscribe(move |_| counter.set(counter.get() + 1)));

    notifier.notify();
    assert_eq!(hits.get(), 1);
    notifier.notify();
    assert_eq!(hits.get(), 1);
}

#[test]
fn subscribing_mid_round_waits_for_the_next_round() {
    let record = Value::record(Vec::<(&str, Value)>::new());
    let notifier = Notifier::get_or_create(&record, None).unwrap();
    let late_hits = Rc::new(Cell::new(0));
    let keep: Rc<RefCell<Vec<Subscription>>> = Rc::new(RefCell::new(Vec::new()));

    let source = notifier.clone();
    let store = Rc::clone(&keep);
    let counter = Rc::clone(&late_hits);
    let _adder = notifier.subscribe(move |_| {
        if store.borrow().is_empty() {
            let counter = Rc::clone(&counter);
            let sub = source.subscribe(move |_| counter.set(counter.get() + 1));
            store.borrow_mut().push(sub);
        }
    });

    notifier.notify();
    assert_eq!(late_hits.get(), 0);
    notifier.notify();
    assert_eq!(late_hits.get(), 1);
}

#[test]
fn reaction_that_writes_what_it_reads_runs_once_per_change() {
    let class = ClassBuilder::new("Counter")
        .observable("value", || 0.into())
        .observable("doubled", || 0.into())
        .build();
    let counter = class.instantiate();
    let root = Value::from(counter.clone());

    let pass_root = root.clone();
    let reaction = Reaction::new(move |reaction| {
        let view = track(&pass_root, reaction).unwrap();
        let value = view.get("value").unwrap().as_int().unwrap_or(0);
        view.set("doubled", value * 2).unwrap();
    });
    let view = track(&root, &reaction).unwrap();
    view.get("value").unwrap();

    counter.set("value", 3).unwrap();
    assert_eq!(reaction.runs(), 1);
    assert_eq!(counter.get("doubled").unwrap(), Value::Int(6));

    counter.set("value", 4).unwrap();
    assert_eq!(reaction.runs(), 2);
    assert_eq!(counter.get("doubled").unwrap(), Value::Int(8));
}

#[test]
fn change_reaching_reaction_twice_runs_it_once() {
    let class = ClassBuilder::new("Holder")
        .observable("items", || Value::list(Vec::<Value>::new()))
        .build();
    let holder = class.instantiate();
    let root = Value::from(holder.clone());
    let reaction = Reaction::new(|_| {});
    let view = track(&root, &reaction).unwrap();
    let items = view.get("items").unwrap();
    // Armed on both the field and the list itself.
    assert_eq!(reaction.armed_count(), 2);

    items.as_tracked().unwrap().push(1).unwrap();
    assert_eq!(reaction.runs(), 1);
    assert_eq!(reaction.armed_count(), 0);
}

#[test]
fn deferred_delivery_waits_for_flush() {
    let list = Value::list(Vec::<Value>::new());
    let event = Notifier::to_event(&list, None, Delivery::Deferred);
    assert!(event.is_deferred());
    let hits = Rc::new(Cell::new(0));
    let counter = Rc::clone(&hits);
    let _sub = event.subscribe(move |change| {
        assert!(change.location().property_name().is_none());
        counter.set(counter.get() + 1);
    });

    let wrapped = transform(&list);
    wrapped.as_observed().unwrap().push(1).unwrap();
    wrapped.as_observed().unwrap().push(2).unwrap();
    assert_eq!(hits.get(), 0);
    assert_eq!(pending_deferred(), 2);

    assert_eq!(flush_deferred(), 2);
    assert_eq!(hits.get(), 2);
    assert_eq!(flush_deferred(), 0);
}

#[test]
fn deferred_once_fires_a_single_time() {
    let record = Value::record([("a", 1)]);
    let event = Notifier::to_event(&record, Some("a"), Delivery::from_flag(Some(true)));
    let hits = Rc::new(Cell::new(0));
    let counter = Rc::clone(&hits);
    let sub = event.once(move |_| counter.set(counter.get() + 1));

    record.set("a", 2).unwrap();
    transform(&record).set("a", 3).unwrap();
    transform(&record).set("a", 4).unwrap();
    flush_deferred();
    assert_eq!(hits.get(), 1);
    assert!(!sub.is_active());
}
