// ============================================================================
// weft - Obj
// Keyed record container with per-key observation
// ============================================================================

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::collections::{finish_get, sanitize_for_store};
use crate::core::context::{TargetId, release_target, with_context};
use crate::core::dep::DepKey;
use crate::core::value::{Value, WrapMode, has_changed};
use crate::reactivity::tracking::{TargetKind, TrackOp, TriggerOp, track, trigger};

// =============================================================================
// TARGET DATA
// =============================================================================

struct ObjData {
    id: TargetId,
    /// Entries in insertion order
    entries: RefCell<IndexMap<Rc<str>, Value>>,
    /// mark_raw: never wrap this target
    skip: Cell<bool>,
}

impl Drop for ObjData {
    fn drop(&mut self) {
        release_target(self.id);
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// A record of named entries. Without a view mode this is the raw target;
/// with one, reads and writes are observed.
#[derive(Clone)]
pub struct Obj {
    data: Rc<ObjData>,
    mode: Option<WrapMode>,
}

impl Obj {
    pub fn new() -> Obj {
        Obj {
            data: Rc::new(ObjData {
                id: with_context(|ctx| ctx.alloc_target_id()),
                entries: RefCell::new(IndexMap::new()),
                skip: Cell::new(false),
            }),
            mode: None,
        }
    }

    pub fn from_iter<K, I>(entries: I) -> Obj
    where
        K: Into<Rc<str>>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let obj = Obj::new();
        {
            let mut map = obj.data.entries.borrow_mut();
            for (key, value) in entries {
                map.insert(key.into(), value);
            }
        }
        obj
    }

    pub(crate) fn with_mode(&self, mode: WrapMode) -> Obj {
        Obj { data: self.data.clone(), mode: Some(mode) }
    }

    pub(crate) fn raw_handle(&self) -> Obj {
        Obj { data: self.data.clone(), mode: None }
    }

    pub(crate) fn mode(&self) -> Option<WrapMode> {
        self.mode
    }

    pub(crate) fn is_skipped(&self) -> bool {
        self.data.skip.get()
    }

    pub(crate) fn mark_skip(&self) {
        self.data.skip.set(true);
    }

    /// Handle identity: same target and same view mode.
    pub fn same_view(&self, other: &Obj) -> bool {
        Rc::ptr_eq(&self.data, &other.data) && self.mode == other.mode
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Read an entry; Null when absent. Observed views track the key and
    /// serve the value per the view: refs unwrap, nested containers wrap.
    pub fn get(&self, key: &str) -> Value {
        let Some(mode) = self.mode else {
            return self.data.entries.borrow().get(key).cloned().unwrap_or(Value::Null);
        };

        if mode.tracking {
            track(self.data.id, TrackOp::Get, DepKey::key(key));
        }
        let value = self.data.entries.borrow().get(key).cloned().unwrap_or(Value::Null);
        finish_get(value, mode, true)
    }

    /// Membership test.
    pub fn has(&self, key: &str) -> bool {
        if let Some(mode) = self.mode {
            if mode.tracking {
                track(self.data.id, TrackOp::Has, DepKey::key(key));
            }
        }
        self.data.entries.borrow().contains_key(key)
    }

    /// Key snapshot in insertion order. Observed views track the iteration
    /// slot, so adds and deletes re-fire iterating effects.
    pub fn keys(&self) -> Vec<Rc<str>> {
        self.track_iteration();
        self.data.entries.borrow().keys().cloned().collect()
    }

    /// Entry snapshot; values are served through get(), so each key is
    /// tracked individually as well.
    pub fn entries(&self) -> Vec<(Rc<str>, Value)> {
        self.keys()
            .into_iter()
            .map(|key| {
                let value = self.get(&key);
                (key, value)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.track_iteration();
        self.data.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn track_iteration(&self) {
        if let Some(mode) = self.mode {
            if mode.tracking {
                track(self.data.id, TrackOp::Iterate, DepKey::Iterate);
            }
        }
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Write an entry. Observed views unwrap the stored value to raw,
    /// delegate plain writes over ref-valued entries to the ref, and
    /// trigger Add or Set; readonly views warn and do nothing.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        let Some(mode) = self.mode else {
            self.data.entries.borrow_mut().insert(Rc::from(key), value);
            return;
        };

        if mode.readonly {
            tracing::warn!(key, "set ignored: target is readonly");
            return;
        }

        let old = self.data.entries.borrow().get(key).cloned();

        if let Some(Value::Ref(old_ref)) = &old {
            if !matches!(value, Value::Ref(_)) {
                if old_ref.is_readonly() {
                    tracing::warn!(key, "set ignored: entry holds a readonly ref");
                    return;
                }
                if mode.unwrap_refs {
                    // Ref assignment: the cell triggers its own dep.
                    old_ref.set(value);
                    return;
                }
            }
        }

        let value = sanitize_for_store(value, mode);
        self.data.entries.borrow_mut().insert(Rc::from(key), value.clone());

        if mode.tracking {
            match old {
                None => trigger(self.data.id, TargetKind::Obj, TriggerOp::Add, Some(DepKey::key(key)), None),
                Some(old) => {
                    if has_changed(&value, &old) {
                        trigger(self.data.id, TargetKind::Obj, TriggerOp::Set, Some(DepKey::key(key)), None);
                    }
                }
            }
        }
    }

    /// Remove an entry, returning it. Triggers Delete when the key
    /// existed.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let Some(mode) = self.mode else {
            return self.data.entries.borrow_mut().shift_remove(key);
        };

        if mode.readonly {
            tracing::warn!(key, "delete ignored: target is readonly");
            return None;
        }

        let removed = self.data.entries.borrow_mut().shift_remove(key);
        if removed.is_some() && mode.tracking {
            trigger(self.data.id, TargetKind::Obj, TriggerOp::Delete, Some(DepKey::key(key)), None);
        }
        removed
    }
}

impl Default for Obj {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Obj")
            .field("target", &self.data.id)
            .field("mode", &self.mode)
            .field("len", &self.data.entries.borrow().len())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::{reactive, readonly, to_raw};
    use crate::primitives::effect::effect;
    use std::cell::Cell;

    fn reactive_obj(entries: Vec<(&str, Value)>) -> Obj {
        reactive(Value::Obj(Obj::from_iter(entries))).as_obj().unwrap().clone()
    }

    #[test]
    fn raw_handle_reads_and_writes_silently() {
        let obj = Obj::new();
        obj.set("x", 1);
        assert_eq!(obj.get("x"), Value::from(1));
        assert!(obj.has("x"));
        assert_eq!(obj.remove("x"), Some(Value::from(1)));
        assert!(!obj.has("x"));
    }

    #[test]
    fn effect_tracks_only_the_keys_it_reads() {
        let obj = reactive_obj(vec![("a", Value::from(1)), ("b", Value::from(2))]);
        let runs = Rc::new(Cell::new(0));

        let reader = obj.clone();
        let runs_clone = runs.clone();
        let _runner = effect(move || {
            let _ = reader.get("a");
            runs_clone.set(runs_clone.get() + 1);
        });
        assert_eq!(runs.get(), 1);

        obj.set("b", 20);
        assert_eq!(runs.get(), 1);

        obj.set("a", 10);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn same_value_write_does_not_trigger() {
        let obj = reactive_obj(vec![("a", Value::from(1))]);
        let runs = Rc::new(Cell::new(0));

        let reader = obj.clone();
        let runs_clone = runs.clone();
        let _runner = effect(move || {
            let _ = reader.get("a");
            runs_clone.set(runs_clone.get() + 1);
        });

        obj.set("a", 1);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn key_iteration_observes_adds_and_deletes() {
        let obj = reactive_obj(vec![("a", Value::from(1))]);
        let runs = Rc::new(Cell::new(0));

        let reader = obj.clone();
        let runs_clone = runs.clone();
        let _runner = effect(move || {
            let _ = reader.keys();
            runs_clone.set(runs_clone.get() + 1);
        });
        assert_eq!(runs.get(), 1);

        obj.set("b", 2);
        assert_eq!(runs.get(), 2);

        obj.remove("a");
        assert_eq!(runs.get(), 3);

        // Value-only writes leave key iteration alone.
        obj.set("b", 3);
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn has_observes_the_key() {
        let obj = reactive_obj(vec![]);
        let runs = Rc::new(Cell::new(0));

        let reader = obj.clone();
        let runs_clone = runs.clone();
        let _runner = effect(move || {
            let _ = reader.has("pending");
            runs_clone.set(runs_clone.get() + 1);
        });
        assert_eq!(runs.get(), 1);

        obj.set("pending", 1);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn delete_of_a_missing_key_is_silent() {
        let obj = reactive_obj(vec![]);
        let runs = Rc::new(Cell::new(0));

        let reader = obj.clone();
        let runs_clone = runs.clone();
        let _runner = effect(move || {
            let _ = reader.keys();
            runs_clone.set(runs_clone.get() + 1);
        });

        assert_eq!(obj.remove("ghost"), None);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn readonly_views_warn_and_keep_the_data() {
        let raw = Obj::from_iter([("a", Value::from(1))]);
        let view = readonly(Value::Obj(raw.clone()));
        let view = view.as_obj().unwrap();

        view.set("a", 2);
        view.remove("a");

        assert_eq!(raw.get("a"), Value::from(1));
    }

    #[test]
    fn writes_through_a_view_are_visible_on_the_raw_target() {
        let obj = reactive_obj(vec![]);
        obj.set("x", 5);
        assert_eq!(to_raw(&Value::Obj(obj.clone())).as_obj().unwrap().get("x"), Value::from(5));
    }

    #[test]
    fn entries_snapshot_preserves_insertion_order() {
        let obj = reactive_obj(vec![("z", Value::from(1)), ("a", Value::from(2))]);
        let keys: Vec<String> = obj.keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["z", "a"]);
    }
}
