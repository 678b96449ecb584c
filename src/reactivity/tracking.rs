// ============================================================================
// weft - Dependency Tracking
// The registry entry points: track on every observed read, trigger on
// every observed write
// ============================================================================
//
// Borrow discipline throughout this module is collect-then-mutate: registry
// and subscriber borrows are released before any effect code runs, so
// re-entrant triggers from inside schedulers or effect bodies cannot hit a
// RefCell conflict.
// ============================================================================

use std::rc::Rc;

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::core::constants::MAX_MARKER_BITS;
use crate::core::context::{TargetId, with_context};
use crate::core::dep::{Dep, DepKey};
use crate::primitives::effect::EffectInner;

// =============================================================================
// OPERATION KINDS
// =============================================================================

/// Kind of read being recorded.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TrackOp {
    Get,
    Has,
    Iterate,
}

/// Kind of write being propagated.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TriggerOp {
    Set,
    Add,
    Delete,
    Clear,
}

/// Container shape, consulted when assembling the deps affected by a write.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TargetKind {
    Obj,
    List,
    Map,
}

// =============================================================================
// DEBUGGER EVENTS
// =============================================================================

/// Operation recorded in a debugger event.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DebuggerOp {
    Track(TrackOp),
    Trigger(TriggerOp),
}

/// Payload handed to an effect's on_track / on_trigger hooks.
#[derive(Clone, Debug)]
pub struct DebuggerEvent {
    /// Container target, when the slot lives in the registry. None for
    /// ref and computed deps.
    pub target: Option<TargetId>,
    pub op: DebuggerOp,
    pub key: Option<DepKey>,
}

// =============================================================================
// TRACK
// =============================================================================

/// Record a read of `(target, key)`. No-op unless tracking is enabled and
/// an effect is active.
pub fn track(target: TargetId, op: TrackOp, key: DepKey) {
    let tracking = with_context(|ctx| ctx.should_track() && ctx.has_active_effect());
    if !tracking {
        return;
    }

    let dep = with_context(|ctx| ctx.dep_for(target, key.clone()));
    track_effects(
        &dep,
        Some(DebuggerEvent {
            target: Some(target),
            op: DebuggerOp::Track(op),
            key: Some(key),
        }),
    );
}

/// Subscribe the active effect to a dep via the marker-bit protocol.
///
/// Within the marker depth limit, the `new` bit answers "already seen this
/// pass" and the `was` bit answers "already subscribed from the previous
/// pass", so re-subscription costs two bit tests. Past the limit the
/// effect's deps were fully cleared before the run and a membership scan
/// decides.
pub fn track_effects(dep: &Rc<Dep>, event: Option<DebuggerEvent>) {
    let state = with_context(|ctx| {
        if !ctx.should_track() {
            return None;
        }
        ctx.active_effect().map(|e| (e, ctx.depth(), ctx.track_op_bit()))
    });
    let Some((effect, depth, bit)) = state else {
        return;
    };

    let mut should_track = false;
    if depth <= MAX_MARKER_BITS {
        if !dep.new_tracked(bit) {
            dep.mark_new(bit);
            should_track = !dep.was_tracked(bit);
        }
    } else {
        should_track = !dep.contains(&effect);
    }

    if should_track {
        dep.add(&effect);
        effect.push_dep(dep.clone());
        if let Some(event) = &event {
            effect.notify_track(event);
        }
    }
}

// =============================================================================
// TRIGGER
// =============================================================================

/// Propagate a write to `(target, key)`.
///
/// Assembles the affected deps from the registry, then fires their
/// subscribers: computed-owning effects first, plain effects after.
/// `new_len` is the list's new length for length-shrinking writes; deps on
/// truncated indices fire along with the length dep.
pub fn trigger(
    target: TargetId,
    kind: TargetKind,
    op: TriggerOp,
    key: Option<DepKey>,
    new_len: Option<usize>,
) {
    let deps: SmallVec<[Rc<Dep>; 4]> = with_context(|ctx| {
        ctx.with_target_deps(target, |dep_map| {
            let mut deps: SmallVec<[Rc<Dep>; 4]> = SmallVec::new();

            if op == TriggerOp::Clear {
                // The whole collection went away; everything observed it.
                deps.extend(dep_map.values().cloned());
                return deps;
            }

            if kind == TargetKind::List && key == Some(DepKey::Length) {
                // Length write: length observers plus any index at or past
                // the new length.
                let new_len = new_len.unwrap_or(0);
                for (k, dep) in dep_map {
                    match k {
                        DepKey::Length => deps.push(dep.clone()),
                        DepKey::Index(i) if *i >= new_len => deps.push(dep.clone()),
                        _ => {}
                    }
                }
                return deps;
            }

            if let Some(key) = &key {
                if let Some(dep) = dep_map.get(key) {
                    deps.push(dep.clone());
                }
            }

            match op {
                TriggerOp::Add => {
                    if kind == TargetKind::List {
                        if matches!(key, Some(DepKey::Index(_))) {
                            if let Some(dep) = dep_map.get(&DepKey::Length) {
                                deps.push(dep.clone());
                            }
                        }
                    } else {
                        if let Some(dep) = dep_map.get(&DepKey::Iterate) {
                            deps.push(dep.clone());
                        }
                        if kind == TargetKind::Map {
                            if let Some(dep) = dep_map.get(&DepKey::MapKeyIterate) {
                                deps.push(dep.clone());
                            }
                        }
                    }
                }
                TriggerOp::Delete => {
                    if kind != TargetKind::List {
                        if let Some(dep) = dep_map.get(&DepKey::Iterate) {
                            deps.push(dep.clone());
                        }
                        if kind == TargetKind::Map {
                            if let Some(dep) = dep_map.get(&DepKey::MapKeyIterate) {
                                deps.push(dep.clone());
                            }
                        }
                    }
                }
                TriggerOp::Set => {
                    // Map iteration yields values, so value writes disturb
                    // it. The key-iteration slot stays quiet on Set.
                    if kind == TargetKind::Map {
                        if let Some(dep) = dep_map.get(&DepKey::Iterate) {
                            deps.push(dep.clone());
                        }
                    }
                }
                TriggerOp::Clear => unreachable!("handled above"),
            }

            deps
        })
        .unwrap_or_default()
    });

    if deps.is_empty() {
        return;
    }

    let event = DebuggerEvent {
        target: Some(target),
        op: DebuggerOp::Trigger(op),
        key,
    };
    trigger_deps(&deps, Some(event));
}

/// Fire the subscribers of a single dep (refs and computed outputs).
pub fn trigger_dep(dep: &Rc<Dep>) {
    trigger_deps(std::slice::from_ref(dep), None);
}

/// Fire the merged subscribers of a set of deps.
///
/// Subscribers are flattened into a fresh, deduplicated snapshot first so
/// that membership changes during firing cannot disturb iteration.
/// Computed-owning effects run before plain effects.
pub fn trigger_deps(deps: &[Rc<Dep>], event: Option<DebuggerEvent>) {
    let mut seen: FxHashSet<*const EffectInner> = FxHashSet::default();
    let mut computed_effects: Vec<Rc<EffectInner>> = Vec::new();
    let mut plain_effects: Vec<Rc<EffectInner>> = Vec::new();

    for dep in deps {
        for effect in dep.subscribers() {
            if seen.insert(Rc::as_ptr(&effect)) {
                if effect.is_computed() {
                    computed_effects.push(effect);
                } else {
                    plain_effects.push(effect);
                }
            }
        }
    }

    for effect in computed_effects {
        trigger_effect(&effect, event.as_ref());
    }
    for effect in plain_effects {
        trigger_effect(&effect, event.as_ref());
    }
}

fn trigger_effect(effect: &Rc<EffectInner>, event: Option<&DebuggerEvent>) {
    // An effect does not re-fire itself unless it opted into recursion.
    let is_self = with_context(|ctx| {
        ctx.active_effect().is_some_and(|active| Rc::ptr_eq(&active, effect))
    });
    if is_self && !effect.allows_recurse() {
        return;
    }

    if let Some(event) = event {
        effect.notify_trigger(event);
    }

    match effect.scheduler() {
        Some(scheduler) => scheduler(),
        None => {
            effect.run();
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
