// ============================================================================
// weft - Dep
// The subscriber set for one observable slot, plus the marker masks used
// during incremental re-tracking
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::primitives::effect::EffectInner;

// =============================================================================
// DEP KEY
// =============================================================================

/// Key addressing one observable slot of a container target.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum DepKey {
    /// Named property of a record or entry key of a keyed collection
    Key(Rc<str>),
    /// Integer index of a list
    Index(usize),
    /// List length. Also serves as the list iteration key: iterating a
    /// list observes its length.
    Length,
    /// Synthetic "any key" slot observed by keyed iteration
    Iterate,
    /// Synthetic key-set slot observed by map key iteration
    MapKeyIterate,
}

impl DepKey {
    pub fn key(name: &str) -> Self {
        DepKey::Key(Rc::from(name))
    }
}

// =============================================================================
// DEP
// =============================================================================

/// A set of subscribing effects for one observable slot.
///
/// One Dep exists per distinct slot: per `(target, key)` pair in the
/// registry, per ref, or per computed output. Subscribers are held weakly;
/// the owning direction of the effect/dep link is the effect's dep list.
///
/// `was` and `new` carry one bit per effect-nesting level during a
/// tracking pass: `was` marks "subscribed in the previous run of the
/// effect at this level", `new` marks "read during the current run".
/// Both are zero whenever no effect is running.
pub struct Dep {
    subs: RefCell<SmallVec<[Weak<EffectInner>; 4]>>,
    was: Cell<u32>,
    new: Cell<u32>,
}

impl Dep {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            subs: RefCell::new(SmallVec::new()),
            was: Cell::new(0),
            new: Cell::new(0),
        })
    }

    /// Subscribe an effect to this dep.
    pub fn add(&self, effect: &Rc<EffectInner>) {
        self.subs.borrow_mut().push(Rc::downgrade(effect));
    }

    /// Remove an effect from this dep, pruning dead subscribers on the way.
    pub fn remove(&self, effect: &EffectInner) {
        let target: *const EffectInner = effect;
        self.subs.borrow_mut().retain(|weak| match weak.upgrade() {
            Some(rc) => !std::ptr::eq(Rc::as_ptr(&rc), target),
            None => false,
        });
    }

    /// Whether the effect is currently subscribed. Only used by the
    /// deep-nesting fallback path; the marker bits answer this cheaply
    /// within the marker depth limit.
    pub fn contains(&self, effect: &EffectInner) -> bool {
        let target: *const EffectInner = effect;
        self.subs
            .borrow()
            .iter()
            .any(|weak| weak.upgrade().is_some_and(|rc| std::ptr::eq(Rc::as_ptr(&rc), target)))
    }

    /// Snapshot the live subscribers. Iteration always happens over a
    /// snapshot so membership changes during firing cannot invalidate it.
    pub fn subscribers(&self) -> Vec<Rc<EffectInner>> {
        self.subs.borrow().iter().filter_map(Weak::upgrade).collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subs.borrow().iter().filter(|w| w.strong_count() > 0).count()
    }

    // =========================================================================
    // MARKER BITS
    // =========================================================================

    pub fn mark_was(&self, bit: u32) {
        self.was.set(self.was.get() | bit);
    }

    pub fn mark_new(&self, bit: u32) {
        self.new.set(self.new.get() | bit);
    }

    pub fn was_tracked(&self, bit: u32) -> bool {
        self.was.get() & bit != 0
    }

    pub fn new_tracked(&self, bit: u32) -> bool {
        self.new.get() & bit != 0
    }

    /// Clear both markers for one nesting level.
    pub fn clear_markers(&self, bit: u32) {
        self.was.set(self.was.get() & !bit);
        self.new.set(self.new.get() & !bit);
    }

    /// Both masks, for invariant checks.
    pub fn marker_masks(&self) -> (u32, u32) {
        (self.was.get(), self.new.get())
    }
}

// =============================================================================
// TESTS
// =============================================================================
