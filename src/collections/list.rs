// ============================================================================
// weft - List
// Sequence container with per-index observation and instrumented
// identity search / length-mutating operations
// ============================================================================

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::collections::{finish_get, sanitize_for_store, to_raw};
use crate::core::context::{TargetId, release_target, untrack, with_context};
use crate::core::dep::DepKey;
use crate::core::value::{Value, WrapMode, has_changed, same_value};
use crate::reactivity::tracking::{TargetKind, TrackOp, TriggerOp, track, trigger};

// =============================================================================
// TARGET DATA
// =============================================================================

struct ListData {
    id: TargetId,
    items: RefCell<Vec<Value>>,
    skip: Cell<bool>,
}

impl Drop for ListData {
    fn drop(&mut self) {
        release_target(self.id);
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// A sequence of values. Index reads observe that index, length reads and
/// iteration observe the length slot, and the classic length-mutating
/// operations trigger the slots they disturb.
#[derive(Clone)]
pub struct List {
    data: Rc<ListData>,
    mode: Option<WrapMode>,
}

impl List {
    pub fn new() -> List {
        List {
            data: Rc::new(ListData {
                id: with_context(|ctx| ctx.alloc_target_id()),
                items: RefCell::new(Vec::new()),
                skip: Cell::new(false),
            }),
            mode: None,
        }
    }

    pub fn from_iter<I>(items: I) -> List
    where
        I: IntoIterator<Item = Value>,
    {
        let list = List::new();
        list.data.items.borrow_mut().extend(items);
        list
    }

    pub(crate) fn with_mode(&self, mode: WrapMode) -> List {
        List { data: self.data.clone(), mode: Some(mode) }
    }

    pub(crate) fn raw_handle(&self) -> List {
        List { data: self.data.clone(), mode: None }
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

    pub fn same_view(&self, other: &List) -> bool {
        Rc::ptr_eq(&self.data, &other.data) && self.mode == other.mode
    }

    /// Length without observation.
    pub fn raw_len(&self) -> usize {
        self.data.items.borrow().len()
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Read an element; Null when out of bounds. Integer-key reads never
    /// unwrap refs, matching record access where they do.
    pub fn get(&self, index: usize) -> Value {
        let Some(mode) = self.mode else {
            return self.data.items.borrow().get(index).cloned().unwrap_or(Value::Null);
        };

        if mode.tracking {
            track(self.data.id, TrackOp::Get, DepKey::Index(index));
        }
        let value = self.data.items.borrow().get(index).cloned().unwrap_or(Value::Null);
        finish_get(value, mode, false)
    }

    /// Observed length.
    pub fn len(&self) -> usize {
        if let Some(mode) = self.mode {
            if mode.tracking {
                track(self.data.id, TrackOp::Get, DepKey::Length);
            }
        }
        self.data.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element snapshot. Iteration observes the length and every index it
    /// visits.
    pub fn iter(&self) -> Vec<Value> {
        let Some(mode) = self.mode else {
            return self.data.items.borrow().clone();
        };

        if mode.tracking {
            track(self.data.id, TrackOp::Iterate, DepKey::Length);
        }
        let len = self.data.items.borrow().len();
        (0..len).map(|index| self.get(index)).collect()
    }

    // =========================================================================
    // IDENTITY SEARCH
    // =========================================================================

    /// Position of `needle`, searching by same-value identity. The whole
    /// index range is tracked first so later mutations re-fire the effect.
    /// A needle that is an observed view is retried raw, so searching for
    /// either form of an element succeeds.
    pub fn index_of(&self, needle: &Value) -> Option<usize> {
        self.track_all_indices();

        let items = self.data.items.borrow();
        if let Some(found) = items.iter().position(|item| same_value(item, needle)) {
            return Some(found);
        }

        let raw = to_raw(needle);
        if !same_value(&raw, needle) {
            return items.iter().position(|item| same_value(item, &raw));
        }
        None
    }

    /// Like index_of, scanning from the back.
    pub fn last_index_of(&self, needle: &Value) -> Option<usize> {
        self.track_all_indices();

        let items = self.data.items.borrow();
        if let Some(found) = items.iter().rposition(|item| same_value(item, needle)) {
            return Some(found);
        }

        let raw = to_raw(needle);
        if !same_value(&raw, needle) {
            return items.iter().rposition(|item| same_value(item, &raw));
        }
        None
    }

    pub fn contains(&self, needle: &Value) -> bool {
        self.index_of(needle).is_some()
    }

    fn track_all_indices(&self) {
        if let Some(mode) = self.mode {
            if mode.tracking {
                track(self.data.id, TrackOp::Get, DepKey::Length);
                let len = self.data.items.borrow().len();
                for index in 0..len {
                    track(self.data.id, TrackOp::Get, DepKey::Index(index));
                }
            }
        }
    }

    // =========================================================================
    // INDEX WRITES
    // =========================================================================

    /// Write an element. Writing at or past the end fills the gap with
    /// Null and counts as an Add (length observers fire); in-bounds writes
    /// are a Set gated on change.
    pub fn set(&self, index: usize, value: impl Into<Value>) {
        let value = value.into();
        let Some(mode) = self.mode else {
            let mut items = self.data.items.borrow_mut();
            if index >= items.len() {
                items.resize(index, Value::Null);
                items.push(value);
            } else {
                items[index] = value;
            }
            return;
        };

        if mode.readonly {
            tracing::warn!(index, "set ignored: target is readonly");
            return;
        }

        let value = sanitize_for_store(value, mode);
        let old = {
            let mut items = self.data.items.borrow_mut();
            if index >= items.len() {
                items.resize(index, Value::Null);
                items.push(value.clone());
                None
            } else {
                Some(std::mem::replace(&mut items[index], value.clone()))
            }
        };

        if mode.tracking {
            match old {
                None => trigger(self.data.id, TargetKind::List, TriggerOp::Add, Some(DepKey::Index(index)), None),
                Some(old) => {
                    if has_changed(&value, &old) {
                        trigger(self.data.id, TargetKind::List, TriggerOp::Set, Some(DepKey::Index(index)), None);
                    }
                }
            }
        }
    }

    /// Resize the list in place. Shrinking fires the deps of every
    /// truncated index along with the length observers.
    pub fn set_len(&self, new_len: usize) {
        let Some(mode) = self.mode else {
            self.data.items.borrow_mut().resize(new_len, Value::Null);
            return;
        };

        if mode.readonly {
            tracing::warn!(new_len, "length write ignored: target is readonly");
            return;
        }

        let old_len = self.data.items.borrow().len();
        if new_len == old_len {
            return;
        }
        self.data.items.borrow_mut().resize(new_len, Value::Null);

        if mode.tracking {
            trigger(self.data.id, TargetKind::List, TriggerOp::Set, Some(DepKey::Length), Some(new_len));
        }
    }

    // =========================================================================
    // LENGTH-MUTATING OPERATIONS
    // =========================================================================
    //
    // These run their structural work with tracking paused: they read the
    // length internally, and recording that read from inside a mutator
    // would hand the running effect a dependency on a slot it is about to
    // write. Triggers still fire afterwards.
    // =========================================================================

    /// Append; returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> usize {
        let value = value.into();
        let Some(mode) = self.mode else {
            let mut items = self.data.items.borrow_mut();
            items.push(value);
            return items.len();
        };

        if mode.readonly {
            tracing::warn!("push ignored: target is readonly");
            return self.data.items.borrow().len();
        }

        let value = sanitize_for_store(value, mode);
        let index = untrack(|| {
            let mut items = self.data.items.borrow_mut();
            items.push(value);
            items.len() - 1
        });

        if mode.tracking {
            trigger(self.data.id, TargetKind::List, TriggerOp::Add, Some(DepKey::Index(index)), None);
        }
        index + 1
    }

    /// Remove and return the last element; Null when empty.
    pub fn pop(&self) -> Value {
        let Some(mode) = self.mode else {
            return self.data.items.borrow_mut().pop().unwrap_or(Value::Null);
        };

        if mode.readonly {
            tracing::warn!("pop ignored: target is readonly");
            return Value::Null;
        }

        let removed = untrack(|| self.data.items.borrow_mut().pop());
        let Some(removed) = removed else {
            return Value::Null;
        };

        if mode.tracking {
            let new_len = self.data.items.borrow().len();
            trigger(self.data.id, TargetKind::List, TriggerOp::Set, Some(DepKey::Length), Some(new_len));
        }
        removed
    }

    /// Remove and return the first element; Null when empty. Every
    /// surviving element moves, so their index slots fire.
    pub fn shift(&self) -> Value {
        let Some(mode) = self.mode else {
            let mut items = self.data.items.borrow_mut();
            if items.is_empty() {
                return Value::Null;
            }
            return items.remove(0);
        };

        if mode.readonly {
            tracing::warn!("shift ignored: target is readonly");
            return Value::Null;
        }

        if self.data.items.borrow().is_empty() {
            return Value::Null;
        }

        let old = self.data.items.borrow().clone();
        let removed = untrack(|| self.data.items.borrow_mut().remove(0));

        if mode.tracking {
            let new_items = self.data.items.borrow().clone();
            for (index, item) in new_items.iter().enumerate() {
                if has_changed(item, &old[index]) {
                    trigger(self.data.id, TargetKind::List, TriggerOp::Set, Some(DepKey::Index(index)), None);
                }
            }
            trigger(self.data.id, TargetKind::List, TriggerOp::Set, Some(DepKey::Length), Some(new_items.len()));
        }
        removed
    }

    /// Prepend; returns the new length. Existing elements move up and the
    /// top index is an Add.
    pub fn unshift(&self, value: impl Into<Value>) -> usize {
        let value = value.into();
        let Some(mode) = self.mode else {
            let mut items = self.data.items.borrow_mut();
            items.insert(0, value);
            return items.len();
        };

        if mode.readonly {
            tracing::warn!("unshift ignored: target is readonly");
            return self.data.items.borrow().len();
        }

        let value = sanitize_for_store(value, mode);
        let old = self.data.items.borrow().clone();
        untrack(|| self.data.items.borrow_mut().insert(0, value));

        if mode.tracking {
            let new_items = self.data.items.borrow().clone();
            for (index, item) in old.iter().enumerate() {
                if has_changed(&new_items[index], item) {
                    trigger(self.data.id, TargetKind::List, TriggerOp::Set, Some(DepKey::Index(index)), None);
                }
            }
            trigger(self.data.id, TargetKind::List, TriggerOp::Add, Some(DepKey::Index(old.len())), None);
        }
        old.len() + 1
    }

    /// Remove `delete_count` elements at `start`, inserting `insert` in
    /// their place; returns the removed elements.
    pub fn splice(&self, start: usize, delete_count: usize, insert: Vec<Value>) -> Vec<Value> {
        let Some(mode) = self.mode else {
            let mut items = self.data.items.borrow_mut();
            let start = start.min(items.len());
            let delete_count = delete_count.min(items.len() - start);
            return items.splice(start..start + delete_count, insert).collect();
        };

        if mode.readonly {
            tracing::warn!("splice ignored: target is readonly");
            return Vec::new();
        }

        let insert: Vec<Value> = insert
            .into_iter()
            .map(|value| sanitize_for_store(value, mode))
            .collect();

        let old = self.data.items.borrow().clone();
        let start = start.min(old.len());
        let delete_count = delete_count.min(old.len() - start);

        let removed: Vec<Value> = untrack(|| {
            self.data.items.borrow_mut().splice(start..start + delete_count, insert).collect()
        });

        if mode.tracking {
            let new_items = self.data.items.borrow().clone();
            let common = old.len().min(new_items.len());
            for index in start..common {
                if has_changed(&new_items[index], &old[index]) {
                    trigger(self.data.id, TargetKind::List, TriggerOp::Set, Some(DepKey::Index(index)), None);
                }
            }
            if new_items.len() > old.len() {
                for index in old.len()..new_items.len() {
                    trigger(self.data.id, TargetKind::List, TriggerOp::Add, Some(DepKey::Index(index)), None);
                }
            } else if new_items.len() < old.len() {
                trigger(self.data.id, TargetKind::List, TriggerOp::Set, Some(DepKey::Length), Some(new_items.len()));
            }
        }
        removed
    }
}

impl Default for List {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("List")
            .field("target", &self.data.id)
            .field("mode", &self.mode)
            .field("len", &self.data.items.borrow().len())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
