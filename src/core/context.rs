// ============================================================================
// weft - Reactive Context
// Thread-local state: the active effect, the tracking pause stack, the
// nesting depth / marker bit, and the target registry
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::core::constants::marker_bit;
use crate::core::dep::{Dep, DepKey};
use crate::primitives::effect::EffectInner;

/// Identity of one observed container target.
pub type TargetId = u64;

// =============================================================================
// REACTIVE CONTEXT
// =============================================================================

/// Thread-local state for the reactivity core.
///
/// Everything here is process-wide singleton state for the owning thread,
/// mutated in place by the running code. There is no locking: the model is
/// single-threaded cooperative.
pub struct ReactiveContext {
    /// Effect currently executing; the single target of new subscriptions
    active_effect: RefCell<Option<Rc<EffectInner>>>,

    /// Whether reads are currently recorded
    should_track: Cell<bool>,

    /// Saved should_track values; pause/enable push, reset pops
    track_stack: RefCell<Vec<bool>>,

    /// Effect-run nesting depth (0 = no effect running)
    depth: Cell<u32>,

    /// Single-bit mask for the current nesting level
    track_op_bit: Cell<u32>,

    /// target → key → dep
    registry: RefCell<FxHashMap<TargetId, FxHashMap<DepKey, Rc<Dep>>>>,

    /// Allocator for container target ids
    next_target_id: Cell<TargetId>,
}

impl ReactiveContext {
    pub fn new() -> Self {
        Self {
            active_effect: RefCell::new(None),
            should_track: Cell::new(true),
            track_stack: RefCell::new(Vec::new()),
            depth: Cell::new(0),
            track_op_bit: Cell::new(1),
            registry: RefCell::new(FxHashMap::default()),
            next_target_id: Cell::new(1),
        }
    }

    // =========================================================================
    // ACTIVE EFFECT
    // =========================================================================

    /// Set the active effect, returning the previous one.
    pub fn set_active_effect(&self, effect: Option<Rc<EffectInner>>) -> Option<Rc<EffectInner>> {
        self.active_effect.replace(effect)
    }

    pub fn active_effect(&self) -> Option<Rc<EffectInner>> {
        self.active_effect.borrow().clone()
    }

    pub fn has_active_effect(&self) -> bool {
        self.active_effect.borrow().is_some()
    }

    // =========================================================================
    // TRACKING PAUSE STACK
    // =========================================================================

    pub fn should_track(&self) -> bool {
        self.should_track.get()
    }

    pub fn set_should_track(&self, value: bool) -> bool {
        self.should_track.replace(value)
    }

    /// Save the current should_track and switch to `value`.
    pub fn push_should_track(&self, value: bool) {
        self.track_stack.borrow_mut().push(self.should_track.get());
        self.should_track.set(value);
    }

    /// Restore the last saved should_track. Unbalanced pops restore the
    /// default of true.
    pub fn pop_should_track(&self) {
        let last = self.track_stack.borrow_mut().pop().unwrap_or(true);
        self.should_track.set(last);
    }

    // =========================================================================
    // NESTING DEPTH / MARKER BIT
    // =========================================================================

    /// Enter one effect-run level. Returns the new depth.
    pub fn enter_run(&self) -> u32 {
        let depth = self.depth.get() + 1;
        self.depth.set(depth);
        self.track_op_bit.set(marker_bit(depth));
        depth
    }

    /// Leave one effect-run level. Returns the new depth.
    pub fn exit_run(&self) -> u32 {
        let depth = self.depth.get().saturating_sub(1);
        self.depth.set(depth);
        self.track_op_bit.set(marker_bit(depth));
        depth
    }

    pub fn depth(&self) -> u32 {
        self.depth.get()
    }

    pub fn track_op_bit(&self) -> u32 {
        self.track_op_bit.get()
    }

    // =========================================================================
    // TARGET REGISTRY
    // =========================================================================

    pub fn alloc_target_id(&self) -> TargetId {
        let id = self.next_target_id.get();
        self.next_target_id.set(id + 1);
        id
    }

    /// Find or create the dep for `(target, key)`.
    pub fn dep_for(&self, target: TargetId, key: DepKey) -> Rc<Dep> {
        self.registry
            .borrow_mut()
            .entry(target)
            .or_default()
            .entry(key)
            .or_insert_with(Dep::new)
            .clone()
    }

    /// Look at a target's dep map without creating anything. Returns None
    /// when the target was never tracked.
    pub fn with_target_deps<R>(
        &self,
        target: TargetId,
        f: impl FnOnce(&FxHashMap<DepKey, Rc<Dep>>) -> R,
    ) -> Option<R> {
        self.registry.borrow().get(&target).map(f)
    }

    /// Drop every dep recorded for a target. Containers call this from
    /// their Drop impl, which stands in for weak-keyed registry entries.
    pub fn drop_target(&self, target: TargetId) {
        self.registry.borrow_mut().remove(&target);
    }

    /// Number of targets with recorded deps. Diagnostic only.
    pub fn registry_target_count(&self) -> usize {
        self.registry.borrow().len()
    }
}

impl Default for ReactiveContext {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// THREAD-LOCAL ACCESS
// =============================================================================

thread_local! {
    static CONTEXT: ReactiveContext = ReactiveContext::new();
}

/// Access the thread-local reactive context.
pub fn with_context<R>(f: impl FnOnce(&ReactiveContext) -> R) -> R {
    CONTEXT.with(f)
}

/// Registry cleanup callable from container Drop impls. Uses try_with so
/// containers dropped during thread teardown do not panic.
pub(crate) fn release_target(target: TargetId) {
    let _ = CONTEXT.try_with(|ctx| ctx.drop_target(target));
}

// =============================================================================
// CONVENIENCE FUNCTIONS
// =============================================================================

/// Whether reads are currently observed: tracking is enabled and an effect
/// is active.
pub fn is_tracking() -> bool {
    with_context(|ctx| ctx.should_track() && ctx.has_active_effect())
}

/// Disable tracking until the matching reset_tracking().
pub fn pause_tracking() {
    with_context(|ctx| ctx.push_should_track(false));
}

/// Re-enable tracking until the matching reset_tracking().
pub fn enable_tracking() {
    with_context(|ctx| ctx.push_should_track(true));
}

/// Restore the tracking state saved by the last pause/enable.
pub fn reset_tracking() {
    with_context(|ctx| ctx.pop_should_track());
}

/// Run a closure with tracking paused. Reads inside do not register
/// dependencies. The pause is undone even if the closure panics.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    struct ResetGuard;
    impl Drop for ResetGuard {
        fn drop(&mut self) {
            reset_tracking();
        }
    }

    pause_tracking();
    let _guard = ResetGuard;
    f()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_defaults() {
        with_context(|ctx| {
            assert!(ctx.should_track());
            assert!(!ctx.has_active_effect());
            assert_eq!(ctx.depth(), 0);
            assert_eq!(ctx.track_op_bit(), 1);
        });
    }

    #[test]
    fn pause_stack_nests() {
        with_context(|ctx| {
            assert!(ctx.should_track());

            ctx.push_should_track(false);
            assert!(!ctx.should_track());

            ctx.push_should_track(true);
            assert!(ctx.should_track());

            ctx.pop_should_track();
            assert!(!ctx.should_track());

            ctx.pop_should_track();
            assert!(ctx.should_track());
        });
    }

    #[test]
    fn unbalanced_pop_restores_default() {
        with_context(|ctx| {
            ctx.pop_should_track();
            assert!(ctx.should_track());
        });
    }

    #[test]
    fn run_depth_moves_the_marker_bit() {
        with_context(|ctx| {
            assert_eq!(ctx.enter_run(), 1);
            assert_eq!(ctx.track_op_bit(), 1 << 1);

            assert_eq!(ctx.enter_run(), 2);
            assert_eq!(ctx.track_op_bit(), 1 << 2);

            assert_eq!(ctx.exit_run(), 1);
            assert_eq!(ctx.track_op_bit(), 1 << 1);

            assert_eq!(ctx.exit_run(), 0);
            assert_eq!(ctx.track_op_bit(), 1);
        });
    }

    #[test]
    fn dep_for_is_stable_per_slot() {
        with_context(|ctx| {
            let target = ctx.alloc_target_id();
            let a1 = ctx.dep_for(target, DepKey::key("a"));
            let a2 = ctx.dep_for(target, DepKey::key("a"));
            let b = ctx.dep_for(target, DepKey::key("b"));

            assert!(Rc::ptr_eq(&a1, &a2));
            assert!(!Rc::ptr_eq(&a1, &b));

            ctx.drop_target(target);
            assert!(ctx.with_target_deps(target, |_| ()).is_none());
        });
    }

    #[test]
    fn untrack_restores_on_exit() {
        assert!(with_context(|ctx| ctx.should_track()));
        untrack(|| {
            assert!(!with_context(|ctx| ctx.should_track()));
        });
        assert!(with_context(|ctx| ctx.should_track()));
    }
}
