// ============================================================================
// weft - Effect System
// Side-effecting computations that re-run when their observed inputs change
// ============================================================================
//
// An effect owns the list of deps it is subscribed to; deps point back with
// weak references. Re-tracking on each run is incremental: the previous
// pass's subscriptions are marked in each dep's `was` mask, reads set the
// `new` mask, and a single compaction sweep after the run drops only the
// subscriptions that went stale.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::core::constants::*;
use crate::core::context::with_context;
use crate::core::dep::Dep;
use crate::core::value::Value;
use crate::primitives::scope::{EffectScope, register_with_active_scope};
use crate::reactivity::tracking::DebuggerEvent;

// =============================================================================
// TYPE ALIASES
// =============================================================================

/// The tracked computation. Plain effects return Null; computed-owned
/// effects return the getter result.
pub type EffectFn = Box<dyn FnMut() -> Value>;

/// Invoked in place of run() when the effect is triggered.
pub type SchedulerFn = Rc<dyn Fn()>;

/// Debugger hook for track/trigger events.
pub type DebuggerFn = Box<dyn Fn(&DebuggerEvent)>;

/// Invoked once when the effect is stopped.
pub type StopFn = Box<dyn FnOnce()>;

// =============================================================================
// EFFECT INNER
// =============================================================================

/// The inner effect node in the dependency graph.
pub struct EffectInner {
    /// State bits (ACTIVE, RUNNING, ALLOW_RECURSE, DEFER_STOP, COMPUTED)
    flags: Cell<u32>,

    /// The tracked computation
    func: RefCell<EffectFn>,

    /// Replaces run() on trigger when present
    scheduler: Option<SchedulerFn>,

    /// Deps this effect is currently subscribed to, in first-read order
    deps: RefCell<SmallVec<[Rc<Dep>; 4]>>,

    /// The effect that was active when this one began executing. Effects
    /// form the active-effect stack through this link; it is Some only
    /// while running.
    parent: RefCell<Option<Rc<EffectInner>>>,

    /// Effects created during this effect's run. A re-run detaches the
    /// previous generation before building the next.
    children: RefCell<Vec<Rc<EffectInner>>>,

    on_stop: RefCell<Option<StopFn>>,
    on_track: Option<DebuggerFn>,
    on_trigger: Option<DebuggerFn>,

    /// Weak self-reference so &self methods can hand out Rc links
    self_weak: RefCell<Weak<EffectInner>>,
}

impl EffectInner {
    pub(crate) fn new(
        func: EffectFn,
        scheduler: Option<SchedulerFn>,
        flags: u32,
        on_track: Option<DebuggerFn>,
        on_trigger: Option<DebuggerFn>,
    ) -> Rc<Self> {
        let effect = Rc::new(Self {
            flags: Cell::new(flags),
            func: RefCell::new(func),
            scheduler,
            deps: RefCell::new(SmallVec::new()),
            parent: RefCell::new(None),
            children: RefCell::new(Vec::new()),
            on_stop: RefCell::new(None),
            on_track,
            on_trigger,
            self_weak: RefCell::new(Weak::new()),
        });

        *effect.self_weak.borrow_mut() = Rc::downgrade(&effect);

        effect
    }

    // =========================================================================
    // FLAGS
    // =========================================================================

    fn has_flag(&self, flag: u32) -> bool {
        self.flags.get() & flag != 0
    }

    fn set_flag(&self, flag: u32) {
        self.flags.set(self.flags.get() | flag);
    }

    fn clear_flag(&self, flag: u32) {
        self.flags.set(self.flags.get() & !flag);
    }

    pub fn is_active(&self) -> bool {
        self.has_flag(ACTIVE)
    }

    pub fn is_computed(&self) -> bool {
        self.has_flag(COMPUTED)
    }

    pub fn allows_recurse(&self) -> bool {
        self.has_flag(ALLOW_RECURSE)
    }

    // =========================================================================
    // GRAPH LINKS
    // =========================================================================

    pub(crate) fn push_dep(&self, dep: Rc<Dep>) {
        self.deps.borrow_mut().push(dep);
    }

    pub fn dep_count(&self) -> usize {
        self.deps.borrow().len()
    }

    /// Snapshot of the current dep list.
    pub fn deps(&self) -> Vec<Rc<Dep>> {
        self.deps.borrow().iter().cloned().collect()
    }

    pub fn parent(&self) -> Option<Rc<EffectInner>> {
        self.parent.borrow().clone()
    }

    pub fn scheduler(&self) -> Option<SchedulerFn> {
        self.scheduler.clone()
    }

    pub(crate) fn set_on_stop(&self, f: Option<StopFn>) {
        *self.on_stop.borrow_mut() = f;
    }

    pub(crate) fn add_child(&self, child: Rc<EffectInner>) {
        self.children.borrow_mut().push(child);
    }

    pub(crate) fn notify_track(&self, event: &DebuggerEvent) {
        if let Some(hook) = &self.on_track {
            hook(event);
        }
    }

    pub(crate) fn notify_trigger(&self, event: &DebuggerEvent) {
        if let Some(hook) = &self.on_trigger {
            hook(event);
        }
    }

    // =========================================================================
    // RUN
    // =========================================================================

    /// Execute the computation with tracking.
    ///
    /// A stopped effect still executes, it just no longer tracks. An effect
    /// already on the active chain refuses to re-enter, which breaks the
    /// loop of an effect writing to a slot it reads.
    pub fn run(self: &Rc<Self>) -> Value {
        if !self.is_active() {
            return (&mut *self.func.borrow_mut())();
        }

        let mut link = with_context(|ctx| ctx.active_effect());
        while let Some(ancestor) = link {
            if Rc::ptr_eq(&ancestor, self) {
                return Value::Null;
            }
            link = ancestor.parent();
        }

        // The previous run's nested effects are stale; detach them before
        // the computation creates the next generation.
        self.stop_children();

        let frame = RunFrame::enter(self);
        if frame.depth <= MAX_MARKER_BITS {
            self.init_dep_markers(frame.bit);
        } else {
            // Past the marker depth: rebuild subscriptions from scratch.
            self.cleanup();
        }

        (&mut *self.func.borrow_mut())()
        // frame drops here: markers are finalized and the tracking stack
        // is restored, also when the computation panics
    }

    /// Mark every currently-subscribed dep as seen by the previous pass.
    fn init_dep_markers(&self, bit: u32) {
        for dep in self.deps.borrow().iter() {
            dep.mark_was(bit);
        }
    }

    /// Reconcile the dep list after a run: keep deps read this pass, drop
    /// subscriptions that were not renewed, clear this level's markers.
    fn finalize_dep_markers(&self, bit: u32) {
        let mut deps = self.deps.borrow_mut();
        let mut write = 0;
        for read in 0..deps.len() {
            let dep = deps[read].clone();
            if dep.was_tracked(bit) && !dep.new_tracked(bit) {
                dep.remove(self);
            } else {
                deps[write] = dep.clone();
                write += 1;
            }
            dep.clear_markers(bit);
        }
        deps.truncate(write);
    }

    /// Unsubscribe from every dep and forget them all.
    fn cleanup(&self) {
        let deps: SmallVec<[Rc<Dep>; 4]> = self.deps.borrow_mut().drain(..).collect();
        for dep in deps {
            dep.remove(self);
        }
    }

    fn stop_children(&self) {
        let children: Vec<Rc<EffectInner>> = self.children.borrow_mut().drain(..).collect();
        for child in children {
            child.stop();
        }
    }

    // =========================================================================
    // STOP
    // =========================================================================

    /// Detach the effect from every dep and deactivate it. Called from
    /// inside the effect's own run, the stop is deferred to the run's exit.
    pub fn stop(self: &Rc<Self>) {
        let is_self_stop = self.has_flag(RUNNING)
            && with_context(|ctx| {
                ctx.active_effect().is_some_and(|active| Rc::ptr_eq(&active, self))
            });

        if is_self_stop {
            self.set_flag(DEFER_STOP);
        } else if self.is_active() {
            self.stop_children();
            self.cleanup();
            if let Some(on_stop) = self.on_stop.borrow_mut().take() {
                on_stop();
            }
            self.clear_flag(ACTIVE);
        }
    }
}

// =============================================================================
// RUN FRAME
// =============================================================================

/// RAII frame around one effect run. Entering pushes the effect onto the
/// active stack and bumps the nesting level; dropping reconciles the dep
/// markers and restores every piece of tracking state, so a panicking
/// computation cannot corrupt the stack.
struct RunFrame {
    effect: Rc<EffectInner>,
    prev_should_track: bool,
    depth: u32,
    bit: u32,
}

impl RunFrame {
    fn enter(effect: &Rc<EffectInner>) -> Self {
        let (prev_should_track, depth, bit) = with_context(|ctx| {
            let prev_active = ctx.set_active_effect(Some(effect.clone()));
            *effect.parent.borrow_mut() = prev_active;
            let prev_should_track = ctx.set_should_track(true);
            let depth = ctx.enter_run();
            (prev_should_track, depth, ctx.track_op_bit())
        });
        effect.set_flag(RUNNING);

        RunFrame {
            effect: effect.clone(),
            prev_should_track,
            depth,
            bit,
        }
    }
}

impl Drop for RunFrame {
    fn drop(&mut self) {
        if self.depth <= MAX_MARKER_BITS {
            self.effect.finalize_dep_markers(self.bit);
        }

        with_context(|ctx| {
            ctx.exit_run();
            ctx.set_active_effect(self.effect.parent.borrow_mut().take());
            ctx.set_should_track(self.prev_should_track);
        });

        self.effect.clear_flag(RUNNING);

        if self.effect.has_flag(DEFER_STOP) {
            self.effect.clear_flag(DEFER_STOP);
            self.effect.stop();
        }
    }
}

// =============================================================================
// EFFECT RUNNER
// =============================================================================

/// Handle to a created effect.
///
/// The runner (together with any owning scope) keeps the effect alive;
/// deps only hold weak references. Dropping the last handle stops the
/// effect.
pub struct EffectRunner {
    inner: Rc<EffectInner>,
}

impl EffectRunner {
    /// Re-run the effect immediately, returning the computation's value.
    pub fn run(&self) -> Value {
        self.inner.run()
    }

    /// Stop the effect: unsubscribe from every dep and deactivate. Further
    /// dependency changes never re-invoke it.
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn inner(&self) -> &Rc<EffectInner> {
        &self.inner
    }
}

impl Clone for EffectRunner {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl Drop for EffectRunner {
    fn drop(&mut self) {
        // Nothing else (scope, parent effect) is keeping it: stop now so
        // the on_stop hook runs deterministically.
        if Rc::strong_count(&self.inner) == 1 {
            self.inner.stop();
        }
    }
}

/// Stop an effect through its runner.
pub fn stop(runner: &EffectRunner) {
    runner.stop();
}

// =============================================================================
// OPTIONS
// =============================================================================

/// Creation options for effect_with_options().
#[derive(Default)]
pub struct EffectOptions {
    /// Skip the initial run; the caller invokes the runner when ready
    pub lazy: bool,
    /// Called instead of run() whenever the effect is triggered
    pub scheduler: Option<SchedulerFn>,
    /// Record the effect in this scope instead of the active one
    pub scope: Option<EffectScope>,
    /// Let writes made during the effect's own run re-trigger it
    pub allow_recurse: bool,
    pub on_stop: Option<StopFn>,
    pub on_track: Option<DebuggerFn>,
    pub on_trigger: Option<DebuggerFn>,
}

// =============================================================================
// PUBLIC API
// =============================================================================

/// Create an effect and run it once.
///
/// Every observed read during a run subscribes the effect; any later write
/// to a subscribed slot re-runs it. Reads that stop happening stop
/// re-running it.
///
/// # Example
///
/// ```
/// use weft_reactive::{effect, new_ref};
///
/// let count = new_ref(0);
/// let count_inner = count.clone();
/// let runner = effect(move || {
///     let _ = count_inner.get();
/// });
///
/// count.set(1); // effect re-runs
/// runner.stop();
/// count.set(2); // effect stays quiet
/// ```
pub fn effect<F>(f: F) -> EffectRunner
where
    F: FnMut() + 'static,
{
    effect_with_options(f, EffectOptions::default())
}

/// Create an effect with explicit options.
pub fn effect_with_options<F>(mut f: F, options: EffectOptions) -> EffectRunner
where
    F: FnMut() + 'static,
{
    let func: EffectFn = Box::new(move || {
        f();
        Value::Null
    });
    create_effect(func, options)
}

pub(crate) fn create_effect(func: EffectFn, options: EffectOptions) -> EffectRunner {
    let mut flags = ACTIVE;
    if options.allow_recurse {
        flags |= ALLOW_RECURSE;
    }

    let inner = EffectInner::new(func, options.scheduler, flags, options.on_track, options.on_trigger);
    inner.set_on_stop(options.on_stop);

    // A parent effect owns nested effects created during its run; the
    // owning scope (explicit or ambient) owns the rest.
    let parent = with_context(|ctx| ctx.active_effect());
    if let Some(parent) = parent {
        parent.add_child(inner.clone());
    }
    match &options.scope {
        Some(scope) => scope.record(&inner),
        None => register_with_active_scope(&inner),
    }

    if !options.lazy {
        inner.run();
    }

    EffectRunner { inner }
}

// =============================================================================
// TESTS
// =============================================================================
