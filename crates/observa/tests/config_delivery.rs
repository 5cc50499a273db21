#![forbid(unsafe_code)]

//! Process-wide delivery default.
//!
//! `EngineConfig::install` flips a process-global flag, so everything that
//! depends on it lives in this binary and in a single test to keep it from
//! racing other tests.

use std::cell::Cell;
use std::rc::Rc;

use observa::config::ENV_DEFERRED_DELIVERY;
use observa::{
    Delivery, EngineConfig, Notifier, Value, flush_deferred, pending_deferred, transform,
};
use pretty_assertions::assert_eq;

fn counter() -> (Rc<Cell<u32>>, impl Fn(&observa::Change) + 'static) {
    let hits = Rc::new(Cell::new(0));
    let inner = Rc::clone(&hits);
    (hits, move |_: &observa::Change| inner.set(inner.get() + 1))
}

#[test]
fn default_delivery_follows_installed_config() {
    // Deferred default: listeners wait for a flush.
    EngineConfig::new().with_deferred_delivery(true).install();
    assert!(EngineConfig::current().deferred_delivery);

    let list = Value::list(Vec::<Value>::new());
    let event = Notifier::to_event(&list, None, Delivery::Default);
    assert!(event.is_deferred());
    let (hits, callback) = counter();
    let _deferred_sub = event.subscribe(callback);

    transform(&list).as_observed().unwrap().push(1).unwrap();
    assert_eq!(hits.get(), 0);
    assert_eq!(pending_deferred(), 1);
    assert_eq!(flush_deferred(), 1);
    assert_eq!(hits.get(), 1);

    // An explicit mode still wins over the default.
    let sync = Notifier::to_event(&list, None, Delivery::Sync);
    assert!(!sync.is_deferred());

    // Back to sync: a fresh event delivers inline.
    EngineConfig::new().install();
    assert!(!EngineConfig::current().deferred_delivery);

    let record = Value::record([("a", 1)]);
    let event = Notifier::to_event(&record, Some("a"), Delivery::Default);
    assert!(!event.is_deferred());
    let (inline_hits, callback) = counter();
    let _inline_sub = event.subscribe(callback);
    transform(&record).set("a", 2).unwrap();
    assert_eq!(inline_hits.get(), 1);
    assert_eq!(pending_deferred(), 0);

    // The mode is fixed when the event is made, not when it fires.
    transform(&list).as_observed().unwrap().push(2).unwrap();
    assert_eq!(hits.get(), 1);
    assert_eq!(flush_deferred(), 1);
    assert_eq!(hits.get(), 2);
}

fn lookup(value: &'static str) -> impl Fn(&str) -> Option<String> {
    move |key| (key == ENV_DEFERRED_DELIVERY).then(|| value.to_string())
}

#[test]
fn env_lookup_enables_deferred_delivery() {
    assert!(EngineConfig::from_lookup(lookup("1")).deferred_delivery);
    assert!(EngineConfig::from_lookup(lookup("True")).deferred_delivery);
    assert!(!EngineConfig::from_lookup(lookup("0")).deferred_delivery);
    assert!(!EngineConfig::from_lookup(|_| None).deferred_delivery);
}

#[test]
fn from_env_matches_the_process_environment() {
    let expected = std::env::var(ENV_DEFERRED_DELIVERY)
        .map(|val| val.trim() == "1" || val.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    assert_eq!(EngineConfig::from_env().deferred_delivery, expected);
}
