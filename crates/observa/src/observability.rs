#![forbid(unsafe_code)]

//! Eligibility and marking helpers.
//!
//! Only lists, maps, records and class instances can participate in change
//! notification. Primitives, excluded kinds and frozen containers are
//! ineligible; asking to mark them is a silent `Ok(false)`.

use crate::error::Result;
use crate::metadata::{self, Location, MetaFlags};
use crate::synth;
use crate::value::Value;
use crate::wrapper::{transform, unwrap};

/// Whether `value` could be made observable.
#[must_use]
pub fn can_be_observable(value: &Value) -> bool {
    if let Value::Observed(_) = value {
        return true;
    }
    match unwrap(value) {
        Value::List(_) | Value::Map(_) | Value::Record(_) => {
            is_observable(value, None) || !value.is_frozen()
        }
        Value::Instance(_) => true,
        _ => false,
    }
}

/// Whether `value[.property]` is currently marked observable.
///
/// Every field of an observable container qualifies; on instances only
/// declared observable fields do.
#[must_use]
pub fn is_observable(value: &Value, property: Option<&str>) -> bool {
    let raw = unwrap(value);
    let Some(id) = raw.object_id() else {
        return false;
    };
    if !metadata::flags(&Location::object(id)).contains(MetaFlags::OBSERVABLE) {
        return false;
    }
    match (property, &raw) {
        (Some(field), Value::Instance(_)) => {
            metadata::flags(&Location::property(id, field)).contains(MetaFlags::OBSERVABLE)
        }
        _ => true,
    }
}

/// Make `value` observable if it is eligible.
///
/// Containers get their wrapper created and cached; instances get their
/// declared fields synthesized, and a synthesis failure is returned.
/// Ineligible values report `Ok(false)`.
pub fn mark_observable(value: &Value) -> Result<bool> {
    match value {
        Value::Observed(_) => Ok(true),
        Value::Tracked(tracked) => mark_observable(tracked.raw()),
        Value::List(_) | Value::Map(_) | Value::Record(_) => {
            Ok(matches!(transform(value), Value::Observed(_)))
        }
        Value::Instance(instance) => {
            synth::ensure(instance)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Identity equality that sees through wrappers and tracked views.
#[must_use]
pub fn equals(a: &Value, b: &Value) -> bool {
    unwrap(a) == unwrap(b)
}
