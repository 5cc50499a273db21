#![no_main]

use std::cell::Cell;
use std::rc::Rc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use observa::{Notifier, Reaction, Value, flush_deferred, track, transform};

#[derive(Arbitrary, Debug)]
enum FuzzOp {
    Push(i8),
    Set { index: u8, value: i8 },
    Delete(u8),
    Pop,
    Clear,
    Freeze,
    ReadTracked(u8),
    PushTracked(i8),
    Flush,
}

fuzz_target!(|ops: Vec<FuzzOp>| {
    let raw = Value::list(Vec::<Value>::new());
    let wrapped = transform(&raw);
    let Some(observed) = wrapped.as_observed().cloned() else {
        return;
    };

    let hits = Rc::new(Cell::new(0u64));
    let counter = Rc::clone(&hits);
    let Ok(notifier) = Notifier::get_or_create(&raw, None) else {
        return;
    };
    let _sub = notifier.subscribe(move |_| counter.set(counter.get() + 1));

    let reaction = Reaction::new(|_| {});
    let mut shadow: Vec<i64> = Vec::new();
    let mut frozen = false;
    let mut expected = 0u64;

    for op in ops.into_iter().take(256) {
        match op {
            FuzzOp::Push(v) => {
                if observed.push(i64::from(v)).is_ok() {
                    shadow.push(i64::from(v));
                    expected += 1;
                }
            }
            FuzzOp::Set { index, value } => {
                let index = usize::from(index);
                if observed.set(index, i64::from(value)).is_ok() {
                    assert!(!frozen);
                    let v = i64::from(value);
                    if index < shadow.len() {
                        shadow[index] = v;
                    } else {
                        shadow.push(v);
                    }
                    expected += 1;
                }
            }
            FuzzOp::Delete(i) => {
                if let Ok(true) = observed.delete(usize::from(i)) {
                    shadow.remove(usize::from(i));
                    expected += 1;
                }
            }
            FuzzOp::Pop => {
                if let Ok(Some(_)) = observed.pop() {
                    shadow.pop();
                    expected += 1;
                }
            }
            FuzzOp::Clear => {
                if observed.clear().is_ok() {
                    shadow.clear();
                    expected += 1;
                }
            }
            FuzzOp::Freeze => {
                raw.freeze();
                frozen = true;
            }
            FuzzOp::ReadTracked(i) => {
                if let Ok(view) = track(&raw, &reaction) {
                    let _ = view.get(usize::from(i));
                }
            }
            FuzzOp::PushTracked(v) => {
                if let Ok(view) = track(&raw, &reaction)
                    && let Some(tracked) = view.as_tracked()
                    && tracked.push(i64::from(v)).is_ok()
                {
                    shadow.push(i64::from(v));
                    expected += 1;
                }
            }
            FuzzOp::Flush => {
                flush_deferred();
            }
        }
        assert_eq!(observed.len(), shadow.len());
        assert_eq!(hits.get(), expected);
    }

    let values: Vec<i64> = raw
        .as_list()
        .map(|list| list.to_vec().iter().filter_map(Value::as_int).collect())
        .unwrap_or_default();
    assert_eq!(values, shadow);
});
