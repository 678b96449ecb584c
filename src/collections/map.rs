// ============================================================================
// weft - Map
// Keyed collection container with map iteration semantics
// ============================================================================
//
// Maps differ from records in what iteration observes: entry/value
// iteration and size watch the Iterate slot, key-only iteration watches
// the MapKeyIterate slot. Value writes (Set) disturb the former but not
// the latter; Add and Delete disturb both. clear() fires everything.
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

struct MapData {
    id: TargetId,
    entries: RefCell<IndexMap<Rc<str>, Value>>,
    skip: Cell<bool>,
}

impl Drop for MapData {
    fn drop(&mut self) {
        release_target(self.id);
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// A keyed collection.
#[derive(Clone)]
pub struct Map {
    data: Rc<MapData>,
    mode: Option<WrapMode>,
}

impl Map {
    pub fn new() -> Map {
        Map {
            data: Rc::new(MapData {
                id: with_context(|ctx| ctx.alloc_target_id()),
                entries: RefCell::new(IndexMap::new()),
                skip: Cell::new(false),
            }),
            mode: None,
        }
    }

    pub fn from_iter<K, I>(entries: I) -> Map
    where
        K: Into<Rc<str>>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let map = Map::new();
        {
            let mut data = map.data.entries.borrow_mut();
            for (key, value) in entries {
                data.insert(key.into(), value);
            }
        }
        map
    }

    pub(crate) fn with_mode(&self, mode: WrapMode) -> Map {
        Map { data: self.data.clone(), mode: Some(mode) }
    }

    pub(crate) fn raw_handle(&self) -> Map {
        Map { data: self.data.clone(), mode: None }
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

    pub fn same_view(&self, other: &Map) -> bool {
        Rc::ptr_eq(&self.data, &other.data) && self.mode == other.mode
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Read an entry; Null when absent.
    pub fn get(&self, key: &str) -> Value {
        let Some(mode) = self.mode else {
            return self.data.entries.borrow().get(key).cloned().unwrap_or(Value::Null);
        };

        if mode.tracking {
            track(self.data.id, TrackOp::Get, DepKey::key(key));
        }
        let value = self.data.entries.borrow().get(key).cloned().unwrap_or(Value::Null);
        finish_get(value, mode, false)
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

    /// Entry count; observes entry iteration.
    pub fn len(&self) -> usize {
        self.track_iterate();
        self.data.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Key snapshot. Observes only the key set: value writes do not
    /// re-fire key iteration.
    pub fn keys(&self) -> Vec<Rc<str>> {
        if let Some(mode) = self.mode {
            if mode.tracking {
                track(self.data.id, TrackOp::Iterate, DepKey::MapKeyIterate);
            }
        }
        self.data.entries.borrow().keys().cloned().collect()
    }

    /// Value snapshot; observes entry iteration.
    pub fn values(&self) -> Vec<Value> {
        self.track_iterate();
        let raw: Vec<Value> = self.data.entries.borrow().values().cloned().collect();
        match self.mode {
            Some(mode) => raw.into_iter().map(|value| finish_get(value, mode, false)).collect(),
            None => raw,
        }
    }

    /// Entry snapshot; observes entry iteration.
    pub fn entries(&self) -> Vec<(Rc<str>, Value)> {
        self.track_iterate();
        let raw: Vec<(Rc<str>, Value)> = self
            .data
            .entries
            .borrow()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        match self.mode {
            Some(mode) => raw
                .into_iter()
                .map(|(key, value)| (key, finish_get(value, mode, false)))
                .collect(),
            None => raw,
        }
    }

    /// Visit each entry; observes entry iteration.
    pub fn for_each(&self, mut f: impl FnMut(&str, &Value)) {
        for (key, value) in self.entries() {
            f(&key, &value);
        }
    }

    fn track_iterate(&self) {
        if let Some(mode) = self.mode {
            if mode.tracking {
                track(self.data.id, TrackOp::Iterate, DepKey::Iterate);
            }
        }
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Write an entry: Add when the key is new, Set (gated on change)
    /// otherwise.
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

        let value = sanitize_for_store(value, mode);
        let old = self.data.entries.borrow().get(key).cloned();
        self.data.entries.borrow_mut().insert(Rc::from(key), value.clone());

        if mode.tracking {
            match old {
                None => trigger(self.data.id, TargetKind::Map, TriggerOp::Add, Some(DepKey::key(key)), None),
                Some(old) => {
                    if has_changed(&value, &old) {
                        trigger(self.data.id, TargetKind::Map, TriggerOp::Set, Some(DepKey::key(key)), None);
                    }
                }
            }
        }
    }

    /// Remove an entry, returning it.
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
            trigger(self.data.id, TargetKind::Map, TriggerOp::Delete, Some(DepKey::key(key)), None);
        }
        removed
    }

    /// Remove everything. Every dep recorded for this target fires.
    pub fn clear(&self) {
        let Some(mode) = self.mode else {
            self.data.entries.borrow_mut().clear();
            return;
        };

        if mode.readonly {
            tracing::warn!("clear ignored: target is readonly");
            return;
        }

        let had_entries = !self.data.entries.borrow().is_empty();
        self.data.entries.borrow_mut().clear();

        if had_entries && mode.tracking {
            trigger(self.data.id, TargetKind::Map, TriggerOp::Clear, None, None);
        }
    }
}

impl Default for Map {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Map")
            .field("target", &self.data.id)
            .field("mode", &self.mode)
            .field("len", &self.data.entries.borrow().len())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
