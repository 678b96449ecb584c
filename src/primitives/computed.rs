// ============================================================================
// weft - Computed
// Lazy cached derivations whose output is itself observable
// ============================================================================
//
// A computed owns an effect whose function is the user getter and whose
// scheduler, instead of re-running anything, marks the cache dirty and
// fires the computed's output dep. Reads re-run the getter only while
// dirty, so invalidation propagates eagerly but work happens lazily.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::core::constants::{ACTIVE, COMPUTED};
use crate::core::dep::Dep;
use crate::core::value::Value;
use crate::primitives::effect::{DebuggerFn, EffectFn, EffectInner, SchedulerFn};
use crate::primitives::refs::{AnyRef, Ref, track_ref_dep};
use crate::primitives::scope::register_with_active_scope;
use crate::reactivity::tracking::trigger_dep;

// =============================================================================
// TYPE ALIASES
// =============================================================================

pub type ComputedGetter = Box<dyn Fn() -> Value>;
pub type ComputedSetter = Box<dyn Fn(Value)>;

// =============================================================================
// COMPUTED INNER
// =============================================================================

pub struct ComputedInner {
    /// Cached getter result; meaningful once dirty has cleared
    value: RefCell<Value>,

    /// Output dep: what readers of the computed subscribe to
    dep: Rc<Dep>,

    /// The owned tracked effect; its fn is the getter. Always Some after
    /// construction.
    effect: RefCell<Option<Rc<EffectInner>>>,

    /// The cache needs recomputing
    dirty: Cell<bool>,

    /// False disables memoization: every read re-runs the getter. Used in
    /// server-side rendering setups where caches outlive their inputs.
    cacheable: bool,

    setter: Option<ComputedSetter>,
}

impl ComputedInner {
    /// Read the computed: subscribe the reader, refresh the cache if
    /// needed, return the cached value.
    fn read(&self) -> Value {
        track_ref_dep(&self.dep);

        if self.dirty.get() || !self.cacheable {
            self.dirty.set(false);
            let effect = self.effect.borrow().clone();
            if let Some(effect) = effect {
                let value = effect.run();
                *self.value.borrow_mut() = value;
            }
        }

        self.value.borrow().clone()
    }

    fn write(&self, value: Value) {
        match &self.setter {
            Some(setter) => setter(value),
            None => {
                tracing::warn!("write to a computed without a setter was ignored");
            }
        }
    }
}

impl AnyRef for ComputedInner {
    fn get(&self) -> Value {
        self.read()
    }

    fn set(&self, value: Value) {
        self.write(value);
    }

    fn dep(&self) -> Option<Rc<Dep>> {
        Some(self.dep.clone())
    }

    fn is_readonly(&self) -> bool {
        self.setter.is_none()
    }
}

// =============================================================================
// COMPUTED HANDLE
// =============================================================================

/// A lazy, cached derivation.
///
/// # Example
///
/// ```
/// use weft_reactive::{computed, new_ref};
///
/// let count = new_ref(2);
/// let count_inner = count.clone();
/// let doubled = computed(move || (count_inner.get().as_int().unwrap_or(0) * 2).into());
///
/// assert_eq!(doubled.value().as_int(), Some(4));
///
/// count.set(5);
/// assert_eq!(doubled.value().as_int(), Some(10));
/// ```
#[derive(Clone)]
pub struct Computed {
    inner: Rc<ComputedInner>,
}

impl Computed {
    pub(crate) fn with_options(
        getter: ComputedGetter,
        setter: Option<ComputedSetter>,
        cacheable: bool,
    ) -> Computed {
        Self::build(getter, setter, cacheable, None, None)
    }

    fn build(
        getter: ComputedGetter,
        setter: Option<ComputedSetter>,
        cacheable: bool,
        on_track: Option<DebuggerFn>,
        on_trigger: Option<DebuggerFn>,
    ) -> Computed {
        let inner = Rc::new(ComputedInner {
            value: RefCell::new(Value::Null),
            dep: Dep::new(),
            effect: RefCell::new(None),
            dirty: Cell::new(true),
            cacheable,
            setter,
        });

        // The scheduler replaces re-running: invalidate the cache once and
        // pass the wave on to readers of the output dep.
        let weak = Rc::downgrade(&inner);
        let scheduler: SchedulerFn = Rc::new(move || {
            if let Some(inner) = weak.upgrade() {
                if !inner.dirty.get() {
                    inner.dirty.set(true);
                    trigger_dep(&inner.dep);
                }
            }
        });

        let func: EffectFn = Box::new(move || getter());
        let effect = EffectInner::new(func, Some(scheduler), ACTIVE | COMPUTED, on_track, on_trigger);
        register_with_active_scope(&effect);
        *inner.effect.borrow_mut() = Some(effect);

        Computed { inner }
    }

    /// Current value. Getter runs are lazy: construction never evaluates,
    /// and clean reads reuse the cache.
    pub fn value(&self) -> Value {
        self.inner.read()
    }

    /// Delegate to the user setter. Warns and no-ops without one.
    pub fn set(&self, value: impl Into<Value>) {
        self.inner.write(value.into());
    }

    /// Whether writes delegate anywhere.
    pub fn is_readonly(&self) -> bool {
        self.inner.is_readonly()
    }

    /// The computed as a ref, so it can live inside containers and unwrap
    /// like any other cell.
    pub fn as_any_ref(&self) -> Ref {
        Ref::from_inner(self.inner.clone() as Rc<dyn AnyRef>)
    }
}

impl From<Computed> for Value {
    fn from(computed: Computed) -> Self {
        Value::Ref(computed.as_any_ref())
    }
}

// =============================================================================
// PUBLIC API
// =============================================================================

/// Create a lazy cached derivation from a getter.
pub fn computed<F>(getter: F) -> Computed
where
    F: Fn() -> Value + 'static,
{
    Computed::with_options(Box::new(getter), None, true)
}

/// Create a writable computed: reads go through the getter and cache,
/// writes delegate to the setter.
pub fn computed_with_setter<G, S>(getter: G, setter: S) -> Computed
where
    G: Fn() -> Value + 'static,
    S: Fn(Value) + 'static,
{
    Computed::with_options(Box::new(getter), Some(Box::new(setter)), true)
}

/// Create a computed with debugger hooks on its internal effect. on_track
/// fires when the getter subscribes to a slot, on_trigger when a slot
/// invalidates the cache.
pub fn computed_with_debug<F>(
    getter: F,
    on_track: Option<DebuggerFn>,
    on_trigger: Option<DebuggerFn>,
) -> Computed
where
    F: Fn() -> Value + 'static,
{
    Computed::build(Box::new(getter), None, true, on_track, on_trigger)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::effect::effect;
    use crate::primitives::refs::new_ref;

    #[test]
    fn construction_does_not_evaluate() {
        let calls = Rc::new(Cell::new(0));

        let calls_clone = calls.clone();
        let c = computed(move || {
            calls_clone.set(calls_clone.get() + 1);
            Value::from(1)
        });

        assert_eq!(calls.get(), 0);
        let _ = c.value();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn writes_do_not_evaluate_until_read() {
        let a = new_ref(1);
        let calls = Rc::new(Cell::new(0));

        let a_inner = a.clone();
        let calls_clone = calls.clone();
        let c = computed(move || {
            calls_clone.set(calls_clone.get() + 1);
            (a_inner.get().as_int().unwrap_or(0) * 2).into()
        });

        a.set(2);
        a.set(3);
        assert_eq!(calls.get(), 0);

        assert_eq!(c.value(), Value::from(6));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn clean_reads_reuse_the_cache() {
        let a = new_ref(3);
        let calls = Rc::new(Cell::new(0));

        let a_inner = a.clone();
        let calls_clone = calls.clone();
        let c = computed(move || {
            calls_clone.set(calls_clone.get() + 1);
            (a_inner.get().as_int().unwrap_or(0) * 2).into()
        });

        assert_eq!(c.value(), Value::from(6));
        assert_eq!(c.value(), Value::from(6));
        assert_eq!(c.value(), Value::from(6));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn effect_reading_a_computed_refires_per_underlying_change() {
        let a = new_ref(1);
        let runs = Rc::new(Cell::new(0));

        let a_inner = a.clone();
        let c = computed(move || (a_inner.get().as_int().unwrap_or(0) * 2).into());

        let c_inner = c.clone();
        let runs_clone = runs.clone();
        let _runner = effect(move || {
            let _ = c_inner.value();
            runs_clone.set(runs_clone.get() + 1);
        });
        assert_eq!(runs.get(), 1);

        a.set(2);
        assert_eq!(runs.get(), 2);
        a.set(3);
        assert_eq!(runs.get(), 3);

        // Same-value write upstream never reaches the computed.
        a.set(3);
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn chained_computeds_propagate() {
        let a = new_ref(1);

        let a_inner = a.clone();
        let b = computed(move || (a_inner.get().as_int().unwrap_or(0) + 10).into());
        let b_inner = b.clone();
        let c = computed(move || (b_inner.value().as_int().unwrap_or(0) * 100).into());

        assert_eq!(c.value(), Value::from(1100));

        a.set(2);
        assert_eq!(c.value(), Value::from(1200));
    }

    #[test]
    fn writable_computed_delegates() {
        let a = new_ref(1);

        let a_get = a.clone();
        let a_set = a.clone();
        let plus_one = computed_with_setter(
            move || (a_get.get().as_int().unwrap_or(0) + 1).into(),
            move |value| {
                a_set.set(value.as_int().unwrap_or(0) - 1);
            },
        );

        assert_eq!(plus_one.value(), Value::from(2));
        assert!(!plus_one.is_readonly());

        plus_one.set(10);
        assert_eq!(a.get(), Value::from(9));
        assert_eq!(plus_one.value(), Value::from(10));
    }

    #[test]
    fn readonly_computed_warns_and_ignores_writes() {
        let c = computed(|| Value::from(1));
        assert!(c.is_readonly());
        c.set(5);
        assert_eq!(c.value(), Value::from(1));
    }

    #[test]
    fn uncached_computed_reevaluates_every_read() {
        let calls = Rc::new(Cell::new(0));

        let calls_clone = calls.clone();
        let c = Computed::with_options(
            Box::new(move || {
                calls_clone.set(calls_clone.get() + 1);
                Value::from(7)
            }),
            None,
            false,
        );

        let _ = c.value();
        let _ = c.value();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn computed_unwraps_as_a_ref_inside_containers() {
        use crate::collections::{Obj, reactive};

        let a = new_ref(2);
        let a_inner = a.clone();
        let doubled = computed(move || (a_inner.get().as_int().unwrap_or(0) * 2).into());

        let state = reactive(Value::Obj(Obj::from_iter([("doubled", Value::from(doubled))])));
        assert_eq!(state.as_obj().unwrap().get("doubled"), Value::from(4));

        a.set(5);
        assert_eq!(state.as_obj().unwrap().get("doubled"), Value::from(10));
    }
}
