#![forbid(unsafe_code)]

//! Class-level field registry.
//!
//! Records, per class, which fields are declared observable and which must be
//! kept raw. Lookups walk the inheritance chain so an instance sees every
//! declaration of its ancestors.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::class::Class;
use crate::metadata::{self, Location, MetaFlags, MetaKey};

const OBSERVABLE_FIELDS: MetaKey<Vec<Rc<str>>> = MetaKey::new("observa.registry.observable_fields");

/// Record `field` as observable on `class` itself. Idempotent.
pub fn declare_observable(class: &Class, field: &str) {
    let location = Location::object(class.id());
    let mut fields = metadata::get(&location, &OBSERVABLE_FIELDS).unwrap_or_default();
    if fields.iter().any(|known| &**known == field) {
        return;
    }
    fields.push(Rc::from(field));
    metadata::insert(&location, &OBSERVABLE_FIELDS, fields);
}

/// Observable fields declared on `class` itself, in declaration order.
#[must_use]
pub fn own_observable_fields(class: &Class) -> Vec<Rc<str>> {
    metadata::get(&Location::object(class.id()), &OBSERVABLE_FIELDS).unwrap_or_default()
}

/// Observable fields of `class` and all its ancestors, ancestors first,
/// without duplicates.
#[must_use]
pub fn observable_fields(class: &Class) -> Vec<Rc<str>> {
    let chain: SmallVec<[Class; 4]> = class.ancestry().collect();
    let mut merged: Vec<Rc<str>> = Vec::new();
    for ancestor in chain.iter().rev() {
        for field in own_observable_fields(ancestor) {
            if !merged.contains(&field) {
                merged.push(field);
            }
        }
    }
    merged
}

/// Mark `field` of `class` as never wrapped or tracked.
pub fn declare_keep_raw(class: &Class, field: &str) {
    metadata::add_flags(&Location::property(class.id(), field), MetaFlags::KEEP_RAW);
}

/// Whether `class` or any ancestor marked `field` keep-raw.
#[must_use]
pub fn is_keep_raw(class: &Class, field: &str) -> bool {
    class.ancestry().any(|ancestor| {
        metadata::flags(&Location::property(ancestor.id(), field)).contains(MetaFlags::KEEP_RAW)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassBuilder;
    use crate::value::Value;

    #[test]
    fn builder_declarations_are_registered() {
        let class = ClassBuilder::new("Cell")
            .observable("source", || "".into())
            .field("plain", || Value::Null)
            .observable("outputs", || Value::list(Vec::<Value>::new()))
            .build();
        assert_eq!(
            own_observable_fields(&class),
            vec![Rc::from("source"), Rc::from("outputs")]
        );
    }

    #[test]
    fn declare_is_idempotent() {
        let class = ClassBuilder::new("Doc").build();
        declare_observable(&class, "title");
        declare_observable(&class, "title");
        assert_eq!(own_observable_fields(&class), vec![Rc::from("title")]);
    }

    #[test]
    fn fields_merge_up_the_chain() {
        let base = ClassBuilder::new("Base")
            .observable("id", || Value::Null)
            .observable("shared", || Value::Null)
            .build();
        let mid = ClassBuilder::new("Mid")
            .extends(&base)
            .observable("shared", || Value::Null)
            .observable("mid", || Value::Null)
            .build();
        let leaf = ClassBuilder::new("Leaf")
            .extends(&mid)
            .observable("leaf", || Value::Null)
            .build();

        assert_eq!(own_observable_fields(&leaf), vec![Rc::from("leaf")]);
        assert_eq!(
            observable_fields(&leaf),
            vec![
                Rc::from("id"),
                Rc::from("shared"),
                Rc::from("mid"),
                Rc::from("leaf")
            ]
        );
        assert_eq!(observable_fields(&base).len(), 2);
    }

    #[test]
    fn keep_raw_is_inherited() {
        let base = ClassBuilder::new("Editor")
            .keep_raw("handle", || Value::Null)
            .build();
        let derived = ClassBuilder::new("CodeEditor").extends(&base).build();
        assert!(is_keep_raw(&derived, "handle"));
        assert!(!is_keep_raw(&derived, "other"));
    }
}
