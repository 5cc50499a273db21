#![forbid(unsafe_code)]

//! Release of per-object side-table state.
//!
//! Everything the engine records for an object (flags, notifiers, wrapper
//! and view caches, synthesized field storage, relink subscriptions) is
//! keyed by its [`ObjectId`]. The state is released when the last handle to
//! the object is dropped, or eagerly through [`dispose`]. Released notifiers
//! are disposed, so outstanding [`Subscription`](crate::Subscription)s go
//! inert.
//!
//! # Failure Modes
//!
//! - A release requested while the side table is borrowed is queued and
//!   retried by the next release on the same thread.
//! - Releases during thread teardown, after the table is gone, are dropped.

use std::cell::RefCell;

use crate::metadata;
use crate::notifier::NOTIFIER;
use crate::tracker;
use crate::value::{ObjectId, Value};
use crate::wrapper::unwrap;

thread_local! {
    static PENDING: RefCell<Vec<ObjectId>> = const { RefCell::new(Vec::new()) };
}

/// Release everything recorded for `value` now.
///
/// The value stays usable as plain data, but declared fields of a disposed
/// instance lose their stored values and existing listeners never fire
/// again.
pub fn dispose(value: &Value) {
    if let Some(id) = unwrap(value).object_id() {
        release(id);
    }
}

pub(crate) fn release(id: ObjectId) {
    let Some(mut entries) = metadata::take_object(id) else {
        let _ = PENDING.try_with(|pending| pending.borrow_mut().push(id));
        return;
    };
    if !entries.is_empty() {
        for notifier in entries.drain_slots(&NOTIFIER) {
            notifier.dispose();
        }
        tracing::debug!(object = %id, "metadata released");
    }
    drop(entries);
    tracker::forget_object(id);
    retry_pending();
}

fn retry_pending() {
    let queued = PENDING
        .try_with(|pending| std::mem::take(&mut *pending.borrow_mut()))
        .unwrap_or_default();
    for id in queued {
        release(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassBuilder;
    use crate::notifier::Notifier;
    use crate::wrapper::transform;

    #[test]
    fn dropping_a_container_releases_its_metadata() {
        let list = Value::list([1]);
        let id = list.object_id().unwrap();
        let notifier = Notifier::get_or_create(&list, None).unwrap();
        let wrapped = transform(&list);
        assert!(metadata::has_object(id));
        drop(wrapped);
        drop(list);
        assert!(!metadata::has_object(id));
        assert!(notifier.is_disposed());
    }

    #[test]
    fn explicit_dispose_silences_subscriptions() {
        let record = Value::record([("a", 1)]);
        let notifier = Notifier::get_or_create(&record, None).unwrap();
        let sub = notifier.subscribe(|_| {});
        dispose(&transform(&record));
        assert!(!sub.is_active());
        assert!(!metadata::has_object(record.object_id().unwrap()));
    }

    #[test]
    fn dropping_an_instance_releases_synthesized_fields() {
        let class = ClassBuilder::new("Cell")
            .observable("outputs", || Value::list(Vec::<Value>::new()))
            .build();
        let cell = class.instantiate();
        let outputs = cell.get("outputs").unwrap();
        let instance_id = cell.id();
        let outputs_id = outputs.object_id().unwrap();
        assert!(metadata::has_object(instance_id));
        drop(cell);
        assert!(!metadata::has_object(instance_id));
        // The relink listener on the child went with the parent.
        let child_notifier = Notifier::get_or_create(&outputs, None).unwrap();
        assert_eq!(child_notifier.listener_count(), 0);
        drop(child_notifier);
        drop(outputs);
        assert!(!metadata::has_object(outputs_id));
    }

    #[test]
    fn release_prunes_armed_locations() {
        use crate::tracker::{Reaction, track};
        let reaction = Reaction::new(|_| {});
        let kept = Value::list([1]);
        let gone = Value::list([2]);
        let kept_view = track(&kept, &reaction).unwrap();
        let gone_view = track(&gone, &reaction).unwrap();
        assert_eq!(reaction.armed_count(), 2);

        drop(gone_view);
        drop(gone);
        assert_eq!(reaction.armed_count(), 1);

        dispose(&kept_view);
        assert_eq!(reaction.armed_count(), 0);
    }

    #[test]
    fn dispose_ignores_values_without_identity() {
        dispose(&Value::Int(1));
        dispose(&Value::unique_set([1]));
    }
}
