#![forbid(unsafe_code)]

//! Class declarations and instances.
//!
//! A [`Class`] is a named list of field declarations with an optional parent.
//! Declarations are made at definition time through [`ClassBuilder`]:
//!
//! - [`observable`](ClassBuilder::observable): assignment notifies; the field
//!   is synthesized into metadata-backed storage on first use
//!   (see [`synth`](crate::synth)).
//! - [`keep_raw`](ClassBuilder::keep_raw): the value is never wrapped or
//!   tracked.
//! - [`read_only`](ClassBuilder::read_only): non-writable and
//!   non-configurable.
//! - [`getter`](ClassBuilder::getter): computed on every read from a receiver
//!   that is either the raw instance or a tracked view of it.
//! - [`field`](ClassBuilder::field): plain storage, no notification.
//!
//! Initializers run once per instance, so container defaults are never
//! shared between instances.

use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;

use crate::error::{ObserveError, Result};
use crate::registry;
use crate::synth;
use crate::value::{Core, Fields, ObjectId, Value, ValueKind};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FieldFlags: u8 {
        const OBSERVABLE = 1;
        const KEEP_RAW = 1 << 1;
        const READ_ONLY = 1 << 2;
    }
}

pub type Initializer = Rc<dyn Fn() -> Value>;
pub type Getter = Rc<dyn Fn(&Value) -> Result<Value>>;

#[derive(Clone)]
enum FieldSource {
    Stored(Initializer),
    Computed(Getter),
}

/// One declared field.
#[derive(Clone)]
pub struct FieldDecl {
    name: Rc<str>,
    flags: FieldFlags,
    source: FieldSource,
}

impl FieldDecl {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn flags(&self) -> FieldFlags {
        self.flags
    }

    #[must_use]
    pub fn is_getter(&self) -> bool {
        matches!(self.source, FieldSource::Computed(_))
    }

    pub(crate) fn getter(&self) -> Option<&Getter> {
        match &self.source {
            FieldSource::Computed(getter) => Some(getter),
            FieldSource::Stored(_) => None,
        }
    }

    fn initial_value(&self) -> Option<Value> {
        match &self.source {
            FieldSource::Stored(init) => Some(init()),
            FieldSource::Computed(_) => None,
        }
    }
}

impl fmt::Debug for FieldDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDecl")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("getter", &self.is_getter())
            .finish()
    }
}

// ─── Class ───────────────────────────────────────────────────────────────────

struct ClassCore {
    id: ObjectId,
    name: Rc<str>,
    parent: Option<Class>,
    fields: Vec<FieldDecl>,
}

impl Drop for ClassCore {
    fn drop(&mut self) {
        crate::lifecycle::release(self.id);
    }
}

#[derive(Clone)]
pub struct Class(Rc<ClassCore>);

impl Class {
    pub fn builder(name: impl Into<Rc<str>>) -> ClassBuilder {
        ClassBuilder::new(name)
    }

    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Class> {
        self.0.parent.as_ref()
    }

    /// Declarations made on this class itself.
    #[must_use]
    pub fn own_fields(&self) -> &[FieldDecl] {
        &self.0.fields
    }

    /// This class followed by its ancestors, nearest first.
    pub fn ancestry(&self) -> impl Iterator<Item = Class> {
        std::iter::successors(Some(self.clone()), |class| class.parent().cloned())
    }

    /// The most-derived declaration of `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<FieldDecl> {
        self.ancestry().find_map(|class| {
            class
                .own_fields()
                .iter()
                .find(|decl| &*decl.name == name)
                .cloned()
        })
    }

    /// Whether any declaration of `name` in the chain is non-configurable.
    #[must_use]
    pub fn is_sealed(&self, name: &str) -> bool {
        self.ancestry().any(|class| {
            class
                .own_fields()
                .iter()
                .any(|decl| &*decl.name == name && decl.flags.contains(FieldFlags::READ_ONLY))
        })
    }

    #[must_use]
    pub fn is_subclass_of(&self, other: &Class) -> bool {
        self.ancestry().any(|class| class.ptr_eq(other))
    }

    #[must_use]
    pub fn instantiate(&self) -> Instance {
        let chain: Vec<Class> = self.ancestry().collect();
        let mut fields = Fields::default();
        for class in chain.iter().rev() {
            for decl in class.own_fields() {
                match decl.initial_value() {
                    Some(value) => {
                        fields.insert(Rc::clone(&decl.name), value);
                    }
                    None => {
                        fields.shift_remove(&decl.name);
                    }
                }
            }
        }
        Instance(Rc::new(InstanceCore {
            class: self.clone(),
            core: Core::new(fields),
        }))
    }

    /// Instantiate, then overwrite fields the way a constructor would, before
    /// any declared field is synthesized.
    pub fn instantiate_with<I, K, V>(&self, overrides: I) -> Instance
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Rc<str>>,
        V: Into<Value>,
    {
        let instance = self.instantiate();
        for (name, value) in overrides {
            let (name, value) = (name.into(), value.into());
            // A fresh instance is never frozen.
            if let Ok(previous) = instance
                .0
                .core
                .write(ValueKind::Instance, |fields| fields.insert(name, value))
            {
                drop(previous);
            }
        }
        instance
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.0.name)
            .field("id", &self.0.id)
            .field("parent", &self.parent().map(Class::name))
            .field("fields", &self.0.fields)
            .finish()
    }
}

// ─── ClassBuilder ────────────────────────────────────────────────────────────

#[must_use]
pub struct ClassBuilder {
    name: Rc<str>,
    parent: Option<Class>,
    fields: Vec<FieldDecl>,
}

impl ClassBuilder {
    pub fn new(name: impl Into<Rc<str>>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            fields: Vec::new(),
        }
    }

    pub fn extends(mut self, parent: &Class) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Plain stored field.
    pub fn field(self, name: &str, init: impl Fn() -> Value + 'static) -> Self {
        self.declare(name, FieldFlags::empty(), init)
    }

    /// Stored field whose assignments notify.
    pub fn observable(self, name: &str, init: impl Fn() -> Value + 'static) -> Self {
        self.declare(name, FieldFlags::OBSERVABLE, init)
    }

    /// Stored field that is never wrapped or tracked.
    pub fn keep_raw(self, name: &str, init: impl Fn() -> Value + 'static) -> Self {
        self.declare(name, FieldFlags::KEEP_RAW, init)
    }

    /// Non-writable, non-configurable stored field.
    pub fn read_only(self, name: &str, init: impl Fn() -> Value + 'static) -> Self {
        self.declare(name, FieldFlags::READ_ONLY, init)
    }

    pub fn declare(
        mut self,
        name: &str,
        flags: FieldFlags,
        init: impl Fn() -> Value + 'static,
    ) -> Self {
        self.push(FieldDecl {
            name: Rc::from(name),
            flags,
            source: FieldSource::Stored(Rc::new(init)),
        });
        self
    }

    /// Computed field. The receiver is the raw instance or a tracked view of
    /// it; reads made through it are tracked in the latter case.
    pub fn getter(
        mut self,
        name: &str,
        getter: impl Fn(&Value) -> Result<Value> + 'static,
    ) -> Self {
        self.push(FieldDecl {
            name: Rc::from(name),
            flags: FieldFlags::empty(),
            source: FieldSource::Computed(Rc::new(getter)),
        });
        self
    }

    fn push(&mut self, decl: FieldDecl) {
        self.fields.retain(|existing| existing.name != decl.name);
        self.fields.push(decl);
    }

    pub fn build(self) -> Class {
        let class = Class(Rc::new(ClassCore {
            id: ObjectId::mint(),
            name: self.name,
            parent: self.parent,
            fields: self.fields,
        }));
        for decl in class.own_fields() {
            if decl.flags.contains(FieldFlags::OBSERVABLE) {
                registry::declare_observable(&class, &decl.name);
            }
            if decl.flags.contains(FieldFlags::KEEP_RAW) {
                registry::declare_keep_raw(&class, &decl.name);
            }
        }
        class
    }
}

// ─── Instance ────────────────────────────────────────────────────────────────

pub(crate) struct InstanceCore {
    class: Class,
    core: Core<Fields>,
}

/// An instance of a [`Class`].
///
/// Reads and writes go through [`get`](Self::get) and [`set`](Self::set).
/// The first access synthesizes the declared observable fields; a
/// synthesis failure is returned from that first access.
#[derive(Clone)]
pub struct Instance(pub(crate) Rc<InstanceCore>);

impl Instance {
    #[must_use]
    pub fn class(&self) -> &Class {
        &self.0.class
    }

    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.0.core.id()
    }

    /// Freeze plain field storage. Declared fields not yet synthesized can
    /// no longer be redefined.
    pub fn freeze(&self) {
        self.0.core.freeze();
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.0.core.is_frozen()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        synth::ensure(self)?;
        if synth::is_synthesized(self, name) {
            return Ok(synth::read(self, name));
        }
        if let Some(decl) = self.class().lookup(name)
            && let Some(getter) = decl.getter()
        {
            return getter(&Value::Instance(self.clone()));
        }
        Ok(self.plain(name).unwrap_or_default())
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        synth::ensure(self)?;
        let computed = self
            .class()
            .lookup(name)
            .is_some_and(|decl| decl.is_getter());
        if computed || self.class().is_sealed(name) {
            return Err(ObserveError::ReadOnly {
                class: self.class().name().to_string(),
                field: name.to_string(),
            });
        }
        if synth::is_synthesized(self, name) {
            return synth::write(self, name, value);
        }
        let previous = self
            .0
            .core
            .write(ValueKind::Instance, |fields| fields.insert(Rc::from(name), value))?;
        drop(previous);
        Ok(())
    }

    /// Names of stored and synthesized fields, then getters, base class
    /// first.
    #[must_use]
    pub fn field_names(&self) -> Vec<Rc<str>> {
        let mut names: Vec<Rc<str>> = self.0.core.read(|fields| fields.keys().cloned().collect());
        for field in registry::observable_fields(self.class()) {
            if synth::is_synthesized(self, &field) && !names.contains(&field) {
                names.push(field);
            }
        }
        let chain: Vec<Class> = self.class().ancestry().collect();
        for class in chain.iter().rev() {
            for decl in class.own_fields() {
                let resolves_to_getter = self
                    .class()
                    .lookup(decl.name())
                    .is_some_and(|found| found.is_getter());
                if resolves_to_getter && !names.iter().any(|n| &**n == decl.name()) {
                    names.push(Rc::clone(&decl.name));
                }
            }
        }
        names
    }

    pub(crate) fn plain(&self, name: &str) -> Option<Value> {
        self.0.core.read(|fields| fields.get(name).cloned())
    }

    pub(crate) fn take_plain(&self, name: &str) -> Result<Option<Value>> {
        self.0
            .core
            .write(ValueKind::Instance, |fields| fields.shift_remove(name))
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.class().name(), self.id())
    }
}
