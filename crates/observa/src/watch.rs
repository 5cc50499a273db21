#![forbid(unsafe_code)]

//! Whole-object and single-property subscriptions.
//!
//! Callers may watch heterogeneous data speculatively: a target that cannot
//! be made observable yields a warning and an inert [`Subscription`], never
//! an error.

use crate::notifier::{Change, Notifier, Subscription};
use crate::observability::mark_observable;
use crate::value::Value;
use crate::wrapper::unwrap;

/// Run `callback` on every change of `target`, including changes to any of
/// its fields.
pub fn watch(target: &Value, callback: impl Fn(&Change) + 'static) -> Subscription {
    subscribe(target, None, callback)
}

/// Run `callback` on every change of `target.property`.
pub fn watch_property(
    target: &Value,
    property: &str,
    callback: impl Fn(&Change) + 'static,
) -> Subscription {
    subscribe(target, Some(property), callback)
}

fn subscribe(
    target: &Value,
    property: Option<&str>,
    callback: impl Fn(&Change) + 'static,
) -> Subscription {
    let raw = unwrap(target);
    match mark_observable(&raw) {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(
                kind = %raw.kind(),
                property = property.unwrap_or_default(),
                "watch target cannot be made observable"
            );
            return Subscription::noop();
        }
        Err(err) => {
            tracing::warn!(
                kind = %raw.kind(),
                property = property.unwrap_or_default(),
                error = %err,
                "watch target failed to become observable"
            );
            return Subscription::noop();
        }
    }
    match Notifier::get_or_create(&raw, property) {
        Ok(notifier) => notifier.subscribe(callback),
        Err(err) => {
            tracing::warn!(error = %err, "watch target has no notifier");
            Subscription::noop()
        }
    }
}
