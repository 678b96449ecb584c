// ============================================================================
// weft - Observed Containers
// Wrap entry points, reactivity predicates, and shared view plumbing
// ============================================================================
//
// A container handle is a pair of shared target data and an optional view
// mode. The raw handle touches data directly; a view routes reads through
// track() and writes through trigger(). Because the handle is a value
// pair, wrapping the same target the same way always yields the same
// identity, and to_raw is just dropping the mode.
// ============================================================================

mod list;
mod map;
mod obj;

pub use list::List;
pub use map::Map;
pub use obj::Obj;

use crate::core::value::{Value, WrapMode};

// =============================================================================
// WRAP ENTRY POINTS
// =============================================================================

/// Deep reactive view: reads are tracked, writes trigger, nested
/// containers wrap lazily, nested refs unwrap.
///
/// # Example
///
/// ```
/// use weft_reactive::{Obj, Value, effect, reactive};
///
/// let state = reactive(Value::Obj(Obj::from_iter([("count", Value::from(0))])));
/// let obj = state.as_obj().unwrap().clone();
///
/// let reader = obj.clone();
/// let runner = effect(move || {
///     let _ = reader.get("count");
/// });
///
/// obj.set("count", Value::from(1)); // the effect re-runs
/// runner.stop();
/// ```
pub fn reactive(value: Value) -> Value {
    wrap_root(value, false, false)
}

/// Reactive view that does not wrap nested containers or unwrap refs.
pub fn shallow_reactive(value: Value) -> Value {
    wrap_root(value, false, true)
}

/// Deep readonly view: writes warn and no-op. Layered over a reactive
/// view, reads keep feeding the registry; over a raw target they don't.
pub fn readonly(value: Value) -> Value {
    wrap_root(value, true, false)
}

/// Readonly view without nested wrapping or ref unwrapping.
pub fn shallow_readonly(value: Value) -> Value {
    wrap_root(value, true, true)
}

fn wrap_root(value: Value, readonly: bool, shallow: bool) -> Value {
    match value {
        Value::Obj(o) => match compose_mode(o.mode(), o.is_skipped(), readonly, shallow) {
            Some(mode) => Value::Obj(o.with_mode(mode)),
            None => Value::Obj(o),
        },
        Value::List(l) => match compose_mode(l.mode(), l.is_skipped(), readonly, shallow) {
            Some(mode) => Value::List(l.with_mode(mode)),
            None => Value::List(l),
        },
        Value::Map(m) => match compose_mode(m.mode(), m.is_skipped(), readonly, shallow) {
            Some(mode) => Value::Map(m.with_mode(mode)),
            None => Value::Map(m),
        },
        // Refs are already observable; they pass through untouched.
        Value::Ref(_) => value,
        other => {
            tracing::warn!(
                "value cannot be made {}: {:?}",
                if readonly { "readonly" } else { "reactive" },
                other
            );
            other
        }
    }
}

/// Decide the view mode for a wrap request. None means "return the input
/// unchanged": re-wrapping a view with the same intent, wrapping a
/// mark_raw'd target, or downgrading a readonly view.
fn compose_mode(
    existing: Option<WrapMode>,
    skipped: bool,
    readonly: bool,
    shallow: bool,
) -> Option<WrapMode> {
    match existing {
        Some(mode) => {
            if !readonly || mode.readonly {
                return None;
            }
            // readonly over a reactive view keeps observing reads
            Some(WrapMode::readonly(shallow, mode.tracking))
        }
        None => {
            if skipped {
                return None;
            }
            Some(if readonly {
                WrapMode::readonly(shallow, false)
            } else if shallow {
                WrapMode::SHALLOW_REACTIVE
            } else {
                WrapMode::REACTIVE
            })
        }
    }
}

// =============================================================================
// PREDICATES
// =============================================================================

fn container_mode(value: &Value) -> Option<WrapMode> {
    match value {
        Value::Obj(o) => o.mode(),
        Value::List(l) => l.mode(),
        Value::Map(m) => m.mode(),
        _ => None,
    }
}

/// Whether reads of this view feed the tracking registry.
pub fn is_reactive(value: &Value) -> bool {
    container_mode(value).is_some_and(|mode| mode.tracking)
}

/// Whether writes to this value are rejected.
pub fn is_readonly(value: &Value) -> bool {
    match value {
        Value::Ref(r) => r.is_readonly(),
        _ => container_mode(value).is_some_and(|mode| mode.readonly),
    }
}

/// Whether this view skips nested wrapping.
pub fn is_shallow(value: &Value) -> bool {
    match value {
        Value::Ref(r) => r.is_shallow(),
        _ => container_mode(value).is_some_and(|mode| mode.shallow),
    }
}

/// Whether this value is a reactive or readonly view.
pub fn is_proxy(value: &Value) -> bool {
    container_mode(value).is_some_and(|mode| mode.tracking || mode.readonly)
}

/// The raw target behind a view; non-containers come back unchanged.
pub fn to_raw(value: &Value) -> Value {
    match value {
        Value::Obj(o) => Value::Obj(o.raw_handle()),
        Value::List(l) => Value::List(l.raw_handle()),
        Value::Map(m) => Value::Map(m.raw_handle()),
        other => other.clone(),
    }
}

/// Annotate a target so it is never wrapped. Subsequent reactive/readonly
/// calls return it as-is.
pub fn mark_raw(value: Value) -> Value {
    match &value {
        Value::Obj(o) => o.mark_skip(),
        Value::List(l) => l.mark_skip(),
        Value::Map(m) => m.mark_skip(),
        _ => {}
    }
    value
}

// =============================================================================
// SHARED VIEW PLUMBING
// =============================================================================

/// Wrap a container value with `reactive()` when it is one; everything
/// else passes through. Used by refs when storing deep values.
pub(crate) fn to_reactive(value: Value) -> Value {
    if value.is_container() { reactive(value) } else { value }
}

/// Post-read processing shared by the container getters: unwrap refs where
/// the view calls for it, then lazily wrap nested containers to match the
/// current wrap kind. `allow_ref_unwrap` is off for list integer keys.
pub(crate) fn finish_get(value: Value, mode: WrapMode, allow_ref_unwrap: bool) -> Value {
    if allow_ref_unwrap && mode.unwrap_refs {
        if let Value::Ref(r) = &value {
            return r.get();
        }
    }
    if mode.shallow {
        return value;
    }
    match &value {
        Value::Obj(_) | Value::List(_) | Value::Map(_) => wrap_like(value, mode),
        _ => value,
    }
}

/// Nested wrap matching the current view. Values that are already views
/// or mark_raw'd stay as they are; the rest inherit the parent's mode so
/// readonly-over-reactive layering survives nesting.
fn wrap_like(value: Value, mode: WrapMode) -> Value {
    let nested = WrapMode { shallow: false, ..mode };
    match value {
        Value::Obj(o) => {
            if o.mode().is_some() || o.is_skipped() {
                Value::Obj(o)
            } else {
                Value::Obj(o.with_mode(nested))
            }
        }
        Value::List(l) => {
            if l.mode().is_some() || l.is_skipped() {
                Value::List(l)
            } else {
                Value::List(l.with_mode(nested))
            }
        }
        Value::Map(m) => {
            if m.mode().is_some() || m.is_skipped() {
                Value::Map(m)
            } else {
                Value::Map(m.with_mode(nested))
            }
        }
        other => other,
    }
}

/// Pre-write processing shared by the container setters: deep views store
/// raw values so views never leak into targets, except that readonly and
/// shallow views being assigned stay intact.
pub(crate) fn sanitize_for_store(value: Value, mode: WrapMode) -> Value {
    if mode.shallow || is_readonly(&value) || is_shallow(&value) {
        return value;
    }
    to_raw(&value)
}

// =============================================================================
// TESTS
// =============================================================================
