// ============================================================================
// weft - Fine-Grained Reactivity for Rust
// ============================================================================
//
// Observed containers, single-cell refs, auto-re-running effects, and lazy
// cached computeds, wired together by a (target, key) -> dep registry with
// bitmask-based incremental dependency reconciliation.
// ============================================================================

pub mod collections;
pub mod core;
pub mod primitives;
pub mod reactivity;

// Re-export core items at crate root for ergonomic access
pub use core::constants;
pub use core::context::{
    ReactiveContext, enable_tracking, is_tracking, pause_tracking, reset_tracking, untrack,
    with_context,
};
pub use core::dep::{Dep, DepKey};
pub use core::value::{Value, WrapMode, has_changed, same_value};

// Re-export containers and wrap entry points
pub use collections::{
    List, Map, Obj, is_proxy, is_reactive, is_readonly, is_shallow, mark_raw, reactive, readonly,
    shallow_reactive, shallow_readonly, to_raw,
};

// Re-export primitives
pub use primitives::computed::{Computed, computed, computed_with_debug, computed_with_setter};
pub use primitives::effect::{
    DebuggerFn, EffectOptions, EffectRunner, SchedulerFn, effect, effect_with_options, stop,
};
pub use primitives::refs::{
    AnyRef, Ref, RefGetter, RefSetter, RefTracker, RefTrigger, custom_ref, is_ref, new_ref,
    proxy_refs, shallow_ref, to_ref, to_ref_with_default, to_refs, trigger_ref, unref,
};
pub use primitives::scope::{EffectScope, effect_scope, get_current_scope, on_scope_dispose};

// Re-export tracking types used by debugger hooks and instrumentation
pub use reactivity::tracking::{DebuggerEvent, DebuggerOp, TargetKind, TrackOp, TriggerOp};

// =============================================================================
// TESTS
// =============================================================================
