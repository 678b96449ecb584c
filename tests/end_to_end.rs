// End-to-end flows through the public API: container writes reaching
// effects, dynamic dependency sets, computed laziness, nested effects,
// and identity-sensitive search.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use weft_reactive::{List, Obj, Value, computed, effect, new_ref, reactive};

#[test]
fn ref_read_write_cycle() {
    let r = new_ref(1);
    let log = Rc::new(RefCell::new(Vec::new()));

    let r_inner = r.clone();
    let log_clone = log.clone();
    let _runner = effect(move || {
        log_clone.borrow_mut().push(r_inner.get());
    });

    r.set(2);
    r.set(2);
    r.set(3);

    assert_eq!(
        *log.borrow(),
        vec![Value::from(1), Value::from(2), Value::from(3)]
    );
}

#[test]
fn dynamic_dep_set_drops_the_untaken_branch() {
    let state = reactive(Value::Obj(Obj::from_iter([
        ("a", Value::from(1)),
        ("b", Value::from(2)),
        ("c", Value::from(true)),
    ])));
    let obj = state.as_obj().unwrap().clone();
    let log = Rc::new(RefCell::new(Vec::new()));

    let reader = obj.clone();
    let log_clone = log.clone();
    let _runner = effect(move || {
        let value = if reader.get("c").is_truthy() {
            reader.get("a")
        } else {
            reader.get("b")
        };
        log_clone.borrow_mut().push(value);
    });

    obj.set("c", false);
    obj.set("a", 10);

    assert_eq!(*log.borrow(), vec![Value::from(1), Value::from(2)]);
}

#[test]
fn computed_laziness() {
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

    assert_eq!(c.value(), Value::from(6));
    assert_eq!(calls.get(), 1);
}

#[test]
fn computed_caching() {
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
fn nested_effects_replace_stale_inners() {
    let r1 = new_ref(0);
    let r2 = new_ref(0);
    let outer_runs = Rc::new(Cell::new(0));
    let inner_runs = Rc::new(Cell::new(0));

    let (r1_inner, r2_inner) = (r1.clone(), r2.clone());
    let (outer_clone, inner_clone) = (outer_runs.clone(), inner_runs.clone());
    let _runner = effect(move || {
        let _ = r1_inner.get();
        outer_clone.set(outer_clone.get() + 1);

        let r2_inner = r2_inner.clone();
        let inner_clone = inner_clone.clone();
        let _inner = effect(move || {
            let _ = r2_inner.get();
            inner_clone.set(inner_clone.get() + 1);
        });
    });

    assert_eq!((outer_runs.get(), inner_runs.get()), (1, 1));

    r2.set(1);
    assert_eq!((outer_runs.get(), inner_runs.get()), (1, 2));

    r1.set(1);
    assert_eq!((outer_runs.get(), inner_runs.get()), (2, 3));

    // Only the freshly created inner reacts; the stale one is detached.
    r2.set(2);
    assert_eq!((outer_runs.get(), inner_runs.get()), (2, 4));
}

#[test]
fn array_identity_search_spans_raw_and_wrapped() {
    let element = Value::Obj(Obj::from_iter([("x", Value::from(1))]));
    let view = reactive(Value::List(List::from_iter(vec![element.clone()])));
    let list = view.as_list().unwrap();

    // Searching by the raw element hits despite the view wrap.
    assert!(list.contains(&element));
    assert_eq!(list.index_of(&element), Some(0));

    // Searching by the wrapped element hits too.
    let wrapped = list.get(0);
    assert!(list.contains(&wrapped));
}

#[test]
fn full_pipeline_ref_computed_container() {
    let todos = reactive(Value::List(List::new()));
    let list = todos.as_list().unwrap().clone();
    let show_done = new_ref(false);

    let (list_inner, show_inner) = (list.clone(), show_done.clone());
    let visible_count = computed(move || {
        let mut count = 0i64;
        for item in list_inner.iter() {
            let Some(obj) = item.as_obj() else { continue };
            if show_inner.get().is_truthy() || !obj.get("done").is_truthy() {
                count += 1;
            }
        }
        count.into()
    });

    let counts = Rc::new(RefCell::new(Vec::new()));
    let counts_clone = counts.clone();
    let vc = visible_count.clone();
    let _runner = effect(move || {
        counts_clone.borrow_mut().push(vc.value());
    });

    list.push(Value::Obj(Obj::from_iter([("done", Value::from(false))])));
    list.push(Value::Obj(Obj::from_iter([("done", Value::from(true))])));

    // Flip an item through the view; the computed and effect follow.
    list.get(0).as_obj().unwrap().set("done", true);

    show_done.set(true);

    assert_eq!(
        *counts.borrow(),
        vec![
            Value::from(0),
            Value::from(1),
            Value::from(1),
            Value::from(0),
            Value::from(2),
        ]
    );
}
