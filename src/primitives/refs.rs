// ============================================================================
// weft - Refs
// Single-cell observable boxes with an inline dep
// ============================================================================
//
// A Ref is a handle over a type-erased backend. The standard backend owns
// its value and dep; the property backend reads/writes through an observed
// container (tracking happens in the container, so it has no dep of its
// own); the custom backend wires user get/set around callbacks that drive
// the internally managed dep.
// ============================================================================

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::collections::{Obj, to_raw, to_reactive};
use crate::core::dep::Dep;
use crate::core::value::{Value, WrapMode, has_changed};
use crate::reactivity::tracking::{track_effects, trigger_dep};

// =============================================================================
// BACKEND TRAIT
// =============================================================================

/// Type-erased ref backend. Implemented by the standard cell, property
/// refs, custom refs, and computed outputs.
pub trait AnyRef {
    /// Tracked read of the cell.
    fn get(&self) -> Value;

    /// Write. Backends that gate on change only trigger when the raw
    /// value actually changed.
    fn set(&self, value: Value);

    /// The inline dep, when reads are served locally. None when reads
    /// delegate to another observable (property refs).
    fn dep(&self) -> Option<Rc<Dep>>;

    fn is_readonly(&self) -> bool {
        false
    }

    fn is_shallow(&self) -> bool {
        false
    }
}

// =============================================================================
// REF HANDLE
// =============================================================================

/// A single-cell observable box.
///
/// # Example
///
/// ```
/// use weft_reactive::{new_ref, unref};
///
/// let count = new_ref(1);
/// assert_eq!(count.get().as_int(), Some(1));
///
/// count.set(2);
/// assert_eq!(unref(count.get()).as_int(), Some(2));
/// ```
#[derive(Clone)]
pub struct Ref {
    inner: Rc<dyn AnyRef>,
}

impl Ref {
    pub(crate) fn from_inner(inner: Rc<dyn AnyRef>) -> Self {
        Self { inner }
    }

    /// Read the cell. In a reactive context this subscribes the active
    /// effect to the cell.
    pub fn get(&self) -> Value {
        self.inner.get()
    }

    /// Write the cell, triggering subscribers when the value changed.
    pub fn set(&self, value: impl Into<Value>) {
        self.inner.set(value.into());
    }

    /// Cell identity. Two handles are the same ref iff they share the
    /// backend allocation.
    pub fn same_ref(&self, other: &Ref) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_readonly(&self) -> bool {
        self.inner.is_readonly()
    }

    pub fn is_shallow(&self) -> bool {
        self.inner.is_shallow()
    }

    pub(crate) fn dep(&self) -> Option<Rc<Dep>> {
        self.inner.dep()
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref({:p})", Rc::as_ptr(&self.inner))
    }
}

// =============================================================================
// DEP HELPERS
// =============================================================================

/// Subscribe the active effect to a ref-style inline dep.
pub(crate) fn track_ref_dep(dep: &Rc<Dep>) {
    track_effects(dep, None);
}

// =============================================================================
// STANDARD BACKEND
// =============================================================================

struct StdRef {
    /// The raw (unwrapped) value; the change test runs against this
    raw: RefCell<Value>,
    /// The exposed value: raw in shallow mode, reactive-wrapped otherwise
    value: RefCell<Value>,
    dep: Rc<Dep>,
    shallow: bool,
}

impl AnyRef for StdRef {
    fn get(&self) -> Value {
        track_ref_dep(&self.dep);
        self.value.borrow().clone()
    }

    fn set(&self, value: Value) {
        let next = if self.shallow { value } else { to_raw(&value) };
        let changed = {
            let current = self.raw.borrow();
            has_changed(&next, &current)
        };
        if changed {
            *self.raw.borrow_mut() = next.clone();
            *self.value.borrow_mut() = if self.shallow { next } else { to_reactive(next) };
            trigger_dep(&self.dep);
        }
    }

    fn dep(&self) -> Option<Rc<Dep>> {
        Some(self.dep.clone())
    }

    fn is_shallow(&self) -> bool {
        self.shallow
    }
}

fn create_ref(value: Value, shallow: bool) -> Ref {
    // A ref of a ref is the ref itself.
    if let Value::Ref(existing) = value {
        return existing;
    }

    let raw = if shallow { value.clone() } else { to_raw(&value) };
    let exposed = if shallow { value } else { to_reactive(raw.clone()) };

    Ref::from_inner(Rc::new(StdRef {
        raw: RefCell::new(raw),
        value: RefCell::new(exposed),
        dep: Dep::new(),
        shallow,
    }))
}

// =============================================================================
// PROPERTY BACKEND
// =============================================================================

struct PropRef {
    source: Value,
    key: Rc<str>,
    default: Option<Value>,
}

impl PropRef {
    fn read_source(&self) -> Value {
        match &self.source {
            Value::Obj(obj) => obj.get(&self.key),
            Value::Map(map) => map.get(&self.key),
            Value::List(list) => match self.key.parse::<usize>() {
                Ok(index) => list.get(index),
                Err(_) => Value::Null,
            },
            _ => Value::Null,
        }
    }
}

impl AnyRef for PropRef {
    fn get(&self) -> Value {
        let value = self.read_source();
        if value.is_null() {
            if let Some(default) = &self.default {
                return default.clone();
            }
        }
        value
    }

    fn set(&self, value: Value) {
        match &self.source {
            Value::Obj(obj) => obj.set(&self.key, value),
            Value::Map(map) => map.set(&self.key, value),
            Value::List(list) => {
                if let Ok(index) = self.key.parse::<usize>() {
                    list.set(index, value);
                }
            }
            _ => {}
        }
    }

    fn dep(&self) -> Option<Rc<Dep>> {
        None
    }
}

// =============================================================================
// CUSTOM BACKEND
// =============================================================================

pub type RefGetter = Box<dyn Fn() -> Value>;
pub type RefSetter = Box<dyn Fn(Value)>;

struct CustomRef {
    get: RefGetter,
    set: RefSetter,
    dep: Rc<Dep>,
}

impl AnyRef for CustomRef {
    fn get(&self) -> Value {
        (self.get)()
    }

    fn set(&self, value: Value) {
        (self.set)(value);
    }

    fn dep(&self) -> Option<Rc<Dep>> {
        Some(self.dep.clone())
    }
}

// =============================================================================
// PUBLIC API
// =============================================================================

/// Create a ref. Nested containers assigned into it become reactive; the
/// input is returned unchanged when it is already a ref.
pub fn new_ref(value: impl Into<Value>) -> Ref {
    create_ref(value.into(), false)
}

/// Create a shallow ref: the value is stored as-is, with no reactive
/// wrapping of nested containers.
pub fn shallow_ref(value: impl Into<Value>) -> Ref {
    create_ref(value.into(), true)
}

/// Whether a value is a ref.
pub fn is_ref(value: &Value) -> bool {
    matches!(value, Value::Ref(_))
}

/// Read through a possible ref: `ref.get()` for refs, the value itself
/// otherwise.
pub fn unref(value: Value) -> Value {
    match value {
        Value::Ref(r) => r.get(),
        other => other,
    }
}

/// Manually fire a ref's subscribers, e.g. after in-place mutation of a
/// shallow ref's contents.
pub fn trigger_ref(r: &Ref) {
    if let Some(dep) = r.dep() {
        trigger_dep(&dep);
    }
}

/// Track/trigger callbacks handed to a custom ref factory.
pub type RefTracker = Box<dyn Fn()>;
pub type RefTrigger = Box<dyn Fn()>;

/// Create a ref with caller-defined get/set. The factory receives track
/// and trigger callbacks wired to the ref's internally managed dep.
///
/// # Example
///
/// ```
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use weft_reactive::{Value, custom_ref};
///
/// let store = Rc::new(RefCell::new(Value::from(0)));
/// let cell = custom_ref(move |track, trigger| {
///     let read_store = store.clone();
///     let write_store = store.clone();
///     (
///         Box::new(move || {
///             track();
///             read_store.borrow().clone()
///         }),
///         Box::new(move |value| {
///             *write_store.borrow_mut() = value;
///             trigger();
///         }),
///     )
/// });
///
/// cell.set(5);
/// assert_eq!(cell.get().as_int(), Some(5));
/// ```
pub fn custom_ref<F>(factory: F) -> Ref
where
    F: FnOnce(RefTracker, RefTrigger) -> (RefGetter, RefSetter),
{
    let dep = Dep::new();

    let track_dep = dep.clone();
    let track: RefTracker = Box::new(move || track_ref_dep(&track_dep));

    let trigger_target = dep.clone();
    let trigger: RefTrigger = Box::new(move || trigger_dep(&trigger_target));

    let (get, set) = factory(track, trigger);

    Ref::from_inner(Rc::new(CustomRef { get, set, dep }))
}

/// Create a ref that reads and writes `source[key]`. Tracking flows
/// through the source container, so the ref has no dep of its own.
pub fn to_ref(source: &Value, key: &str) -> Ref {
    make_prop_ref(source, key, None)
}

/// Like to_ref(), but reads of a missing entry yield `default`.
pub fn to_ref_with_default(source: &Value, key: &str, default: Value) -> Ref {
    make_prop_ref(source, key, Some(default))
}

fn make_prop_ref(source: &Value, key: &str, default: Option<Value>) -> Ref {
    match source {
        Value::Ref(r) => r.clone(),
        Value::Obj(_) | Value::Map(_) | Value::List(_) => Ref::from_inner(Rc::new(PropRef {
            source: source.clone(),
            key: Rc::from(key),
            default,
        })),
        other => {
            tracing::warn!(?other, "to_ref() expects a container source; created a detached ref");
            create_ref(other.clone(), false)
        }
    }
}

/// Convert every entry of a container into a property ref, preserving
/// reactivity across destructuring. Returns a raw record of refs.
pub fn to_refs(source: &Value) -> Value {
    match source {
        Value::Obj(obj) => {
            if obj.mode().is_none() {
                tracing::warn!("to_refs() expects an observed container, got a raw record");
            }
            let out = Obj::new();
            for key in obj.keys() {
                out.set(&key, Value::Ref(to_ref(source, &key)));
            }
            Value::Obj(out)
        }
        Value::List(list) => {
            if list.mode().is_none() {
                tracing::warn!("to_refs() expects an observed container, got a raw list");
            }
            let out = crate::collections::List::new();
            for index in 0..list.raw_len() {
                out.push(Value::Ref(to_ref(source, &index.to_string())));
            }
            Value::List(out)
        }
        other => {
            tracing::warn!("to_refs() expects a record or list container");
            other.clone()
        }
    }
}

/// Wrap a raw record so nested refs read as their values and plain writes
/// over ref-valued entries update the ref in place. Observed containers
/// already unwrap refs and pass through unchanged.
pub fn proxy_refs(source: Value) -> Value {
    match source {
        Value::Obj(obj) => {
            if obj.mode().is_some() {
                return Value::Obj(obj);
            }
            Value::Obj(obj.with_mode(WrapMode::REF_UNWRAP))
        }
        other => other,
    }
}

// =============================================================================
// TESTS
// =============================================================================
