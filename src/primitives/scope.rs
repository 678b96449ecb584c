// ============================================================================
// weft - Effect Scope
// Group effects for batch disposal
// ============================================================================
//
// Effects created while a scope is active are recorded by it; stopping the
// scope stops them all, runs registered cleanups, and cascades into child
// scopes. A detached scope opts out of parent collection.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::primitives::effect::EffectInner;

// =============================================================================
// THREAD-LOCAL SCOPE STATE
// =============================================================================

thread_local! {
    static ACTIVE_SCOPE: RefCell<Option<Rc<ScopeInner>>> = const { RefCell::new(None) };
}

fn active_scope() -> Option<Rc<ScopeInner>> {
    ACTIVE_SCOPE.with(|s| s.borrow().clone())
}

fn set_active_scope(scope: Option<Rc<ScopeInner>>) -> Option<Rc<ScopeInner>> {
    ACTIVE_SCOPE.with(|s| s.replace(scope))
}

/// Record an effect in the ambient scope, if one is active.
pub(crate) fn register_with_active_scope(effect: &Rc<EffectInner>) {
    if let Some(scope) = active_scope() {
        scope.effects.borrow_mut().push(effect.clone());
    }
}

// =============================================================================
// SCOPE INNER
// =============================================================================

pub type ScopeCleanupFn = Box<dyn FnOnce()>;

struct ScopeInner {
    active: Cell<bool>,
    effects: RefCell<Vec<Rc<EffectInner>>>,
    cleanups: RefCell<Vec<ScopeCleanupFn>>,
    parent: RefCell<Option<Weak<ScopeInner>>>,
    scopes: RefCell<Vec<Rc<ScopeInner>>>,
    self_weak: RefCell<Weak<ScopeInner>>,
}

impl ScopeInner {
    fn new(detached: bool) -> Rc<Self> {
        let parent = if detached { None } else { active_scope() };

        let scope = Rc::new(Self {
            active: Cell::new(true),
            effects: RefCell::new(Vec::new()),
            cleanups: RefCell::new(Vec::new()),
            parent: RefCell::new(parent.as_ref().map(Rc::downgrade)),
            scopes: RefCell::new(Vec::new()),
            self_weak: RefCell::new(Weak::new()),
        });

        *scope.self_weak.borrow_mut() = Rc::downgrade(&scope);

        if let Some(parent_scope) = parent {
            parent_scope.scopes.borrow_mut().push(scope.clone());
        }

        scope
    }

    fn stop(&self) {
        if !self.active.get() {
            return;
        }
        self.active.set(false);

        let effects: Vec<_> = self.effects.borrow_mut().drain(..).collect();
        for effect in effects {
            effect.stop();
        }

        // Cleanups run in reverse registration order.
        let cleanups: Vec<_> = self.cleanups.borrow_mut().drain(..).collect();
        for cleanup in cleanups.into_iter().rev() {
            cleanup();
        }

        let children: Vec<_> = self.scopes.borrow_mut().drain(..).collect();
        for child in children {
            child.stop();
        }

        if let Some(parent) = self.parent.borrow().as_ref().and_then(Weak::upgrade) {
            if let Some(self_rc) = self.self_weak.borrow().upgrade() {
                parent.scopes.borrow_mut().retain(|s| !Rc::ptr_eq(s, &self_rc));
            }
        }
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        if self.active.get() {
            self.stop();
        }
    }
}

// =============================================================================
// EFFECT SCOPE
// =============================================================================

/// A scope that collects the effects created inside it.
///
/// # Example
///
/// ```
/// use weft_reactive::{effect, effect_scope, new_ref};
///
/// let count = new_ref(0);
/// let scope = effect_scope(false);
///
/// scope.run(|| {
///     let count = count.clone();
///     effect(move || {
///         let _ = count.get();
///     });
/// });
///
/// scope.stop(); // the effect above is stopped with the scope
/// ```
#[derive(Clone)]
pub struct EffectScope {
    inner: Rc<ScopeInner>,
}

impl EffectScope {
    /// Whether the scope has not been stopped.
    pub fn active(&self) -> bool {
        self.inner.active.get()
    }

    /// Run a closure with this scope active. Effects created inside are
    /// recorded here. Returns None when the scope is already stopped.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if !self.inner.active.get() {
            return None;
        }

        let prev = set_active_scope(Some(self.inner.clone()));
        let result = f();
        set_active_scope(prev);

        Some(result)
    }

    /// Stop every recorded effect, run cleanups, and cascade into child
    /// scopes.
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub(crate) fn record(&self, effect: &Rc<EffectInner>) {
        if self.inner.active.get() {
            self.inner.effects.borrow_mut().push(effect.clone());
        }
    }
}

// =============================================================================
// PUBLIC API
// =============================================================================

/// Create an effect scope. A detached scope is not collected by its
/// enclosing scope and must be stopped by the caller.
pub fn effect_scope(detached: bool) -> EffectScope {
    EffectScope { inner: ScopeInner::new(detached) }
}

/// The scope currently collecting effects, if any.
pub fn get_current_scope() -> Option<EffectScope> {
    active_scope().map(|inner| EffectScope { inner })
}

/// Register a callback to run when the current scope is stopped. Without
/// an active scope the callback is dropped with a diagnostic.
pub fn on_scope_dispose<F>(f: F)
where
    F: FnOnce() + 'static,
{
    match active_scope() {
        Some(scope) => scope.cleanups.borrow_mut().push(Box::new(f)),
        None => {
            tracing::warn!("on_scope_dispose() called outside an active effect scope");
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::effect::effect;
    use crate::primitives::refs::new_ref;
    use std::cell::Cell;

    #[test]
    fn scope_stops_recorded_effects() {
        let count = new_ref(0);
        let runs = Rc::new(Cell::new(0));

        let scope = effect_scope(false);
        scope.run(|| {
            let count = count.clone();
            let runs = runs.clone();
            effect(move || {
                let _ = count.get();
                runs.set(runs.get() + 1);
            });
        });

        assert_eq!(runs.get(), 1);
        count.set(1);
        assert_eq!(runs.get(), 2);

        scope.stop();
        count.set(2);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn nested_scope_is_stopped_with_its_parent() {
        let count = new_ref(0);
        let runs = Rc::new(Cell::new(0));

        let outer = effect_scope(false);
        outer.run(|| {
            let inner = effect_scope(false);
            inner.run(|| {
                let count = count.clone();
                let runs = runs.clone();
                effect(move || {
                    let _ = count.get();
                    runs.set(runs.get() + 1);
                });
            });
        });

        outer.stop();
        count.set(1);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn detached_scope_survives_its_parent() {
        let count = new_ref(0);
        let runs = Rc::new(Cell::new(0));

        let outer = effect_scope(false);
        let detached = outer
            .run(|| {
                let detached = effect_scope(true);
                detached.run(|| {
                    let count = count.clone();
                    let runs = runs.clone();
                    effect(move || {
                        let _ = count.get();
                        runs.set(runs.get() + 1);
                    });
                });
                detached
            })
            .unwrap();

        outer.stop();
        count.set(1);
        assert_eq!(runs.get(), 2);

        detached.stop();
        count.set(2);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn cleanups_run_in_reverse_order_on_stop() {
        let order = Rc::new(RefCell::new(Vec::new()));

        let scope = effect_scope(false);
        scope.run(|| {
            let o = order.clone();
            on_scope_dispose(move || o.borrow_mut().push("first"));
            let o = order.clone();
            on_scope_dispose(move || o.borrow_mut().push("second"));
        });

        scope.stop();
        assert_eq!(*order.borrow(), vec!["second", "first"]);
    }

    #[test]
    fn current_scope_is_visible_inside_run() {
        assert!(get_current_scope().is_none());

        let scope = effect_scope(false);
        scope.run(|| {
            assert!(get_current_scope().is_some());
        });

        assert!(get_current_scope().is_none());
    }

    #[test]
    fn run_on_a_stopped_scope_returns_none() {
        let scope = effect_scope(false);
        scope.stop();
        assert!(!scope.active());
        assert!(scope.run(|| 42).is_none());
    }
}
