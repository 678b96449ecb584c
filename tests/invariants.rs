// Structural invariants of the dependency graph and the wrap/identity
// rules, checked from the outside through the public API.

use std::cell::Cell;
use std::rc::Rc;

use weft_reactive::{
    List, Obj, Value, computed, effect, is_ref, new_ref, reactive, readonly, shallow_reactive,
    to_raw, unref,
};

#[test]
fn effect_and_dep_membership_is_bidirectional() {
    let a = new_ref(1);
    let b = new_ref(2);

    let (a_inner, b_inner) = (a.clone(), b.clone());
    let runner = effect(move || {
        let _ = a_inner.get();
        let _ = b_inner.get();
    });

    let deps = runner.inner().deps();
    assert_eq!(deps.len(), 2);
    for dep in &deps {
        assert!(dep.contains(runner.inner()));
    }

    // After stop, both directions are severed.
    runner.stop();
    assert_eq!(runner.inner().dep_count(), 0);
    for dep in &deps {
        assert!(!dep.contains(runner.inner()));
    }
}

#[test]
fn marker_masks_are_zero_when_no_effect_runs() {
    let a = new_ref(1);
    let b = new_ref(2);

    let (a_inner, b_inner) = (a.clone(), b.clone());
    let runner = effect(move || {
        let _ = a_inner.get();
        let _ = b_inner.get();
    });

    a.set(10);
    b.set(20);

    for dep in runner.inner().deps() {
        assert_eq!(dep.marker_masks(), (0, 0));
    }
}

#[test]
fn wrap_identity_is_stable() {
    let raw = Value::Obj(Obj::from_iter([("x", Value::from(1))]));

    assert_eq!(to_raw(&reactive(raw.clone())), raw);
    assert_eq!(reactive(reactive(raw.clone())), reactive(raw.clone()));
    assert_eq!(reactive(raw.clone()), reactive(raw.clone()));

    // Distinct wrap kinds have distinct identities.
    assert_ne!(reactive(raw.clone()), readonly(raw.clone()));
    assert_ne!(reactive(raw.clone()), shallow_reactive(raw.clone()));
}

#[test]
fn ref_constructors_and_unwrap() {
    let r = new_ref(5);
    assert!(is_ref(&Value::Ref(r.clone())));
    assert!(!is_ref(&Value::from(5)));

    // A ref of a ref is the same ref.
    let again = new_ref(Value::Ref(r.clone()));
    assert!(r.same_ref(&again));

    assert_eq!(unref(Value::Ref(r)), Value::from(5));
    assert_eq!(unref(Value::from(7)), Value::from(7));
}

#[test]
fn stopped_runner_is_permanently_detached() {
    let r = new_ref(0);
    let runs = Rc::new(Cell::new(0));

    let r_inner = r.clone();
    let runs_clone = runs.clone();
    let runner = effect(move || {
        let _ = r_inner.get();
        runs_clone.set(runs_clone.get() + 1);
    });

    runner.stop();
    for i in 0..10 {
        r.set(i);
    }
    assert_eq!(runs.get(), 1);
}

#[test]
fn index_granularity() {
    let view = reactive(Value::List(List::from_iter(vec![
        Value::from(1),
        Value::from(2),
        Value::from(3),
    ])));
    let list = view.as_list().unwrap().clone();
    let runs = Rc::new(Cell::new(0));

    let reader = list.clone();
    let runs_clone = runs.clone();
    let _runner = effect(move || {
        let _ = reader.get(1);
        runs_clone.set(runs_clone.get() + 1);
    });
    assert_eq!(runs.get(), 1);

    list.set(0, 10);
    list.set(2, 30);
    assert_eq!(runs.get(), 1);

    list.set(1, 20);
    assert_eq!(runs.get(), 2);
}

#[test]
fn computed_getter_runs_exactly_once_per_change_wave() {
    let a = new_ref(1);
    let b = new_ref(2);
    let calls = Rc::new(Cell::new(0));

    let (a_inner, b_inner) = (a.clone(), b.clone());
    let calls_clone = calls.clone();
    let c = computed(move || {
        calls_clone.set(calls_clone.get() + 1);
        (a_inner.get().as_int().unwrap_or(0) + b_inner.get().as_int().unwrap_or(0)).into()
    });

    // Two reads without mutation: one evaluation.
    assert_eq!(c.value(), Value::from(3));
    assert_eq!(c.value(), Value::from(3));
    assert_eq!(calls.get(), 1);

    a.set(10);
    assert_eq!(c.value(), Value::from(12));
    assert_eq!(calls.get(), 2);

    b.set(20);
    assert_eq!(c.value(), Value::from(30));
    assert_eq!(calls.get(), 3);
}

#[test]
fn effect_reading_a_computed_refires_once_per_underlying_change() {
    let a = new_ref(1);
    let b = new_ref(1);
    let runs = Rc::new(Cell::new(0));

    let (a_inner, b_inner) = (a.clone(), b.clone());
    let c = computed(move || {
        (a_inner.get().as_int().unwrap_or(0) + b_inner.get().as_int().unwrap_or(0)).into()
    });

    let c_inner = c.clone();
    let runs_clone = runs.clone();
    let _runner = effect(move || {
        let _ = c_inner.value();
        runs_clone.set(runs_clone.get() + 1);
    });
    assert_eq!(runs.get(), 1);

    a.set(2);
    assert_eq!(runs.get(), 2);

    b.set(2);
    assert_eq!(runs.get(), 3);

    // No underlying change, no re-fire.
    a.set(2);
    assert_eq!(runs.get(), 3);
}

#[test]
fn readonly_writes_never_reach_the_registry() {
    let raw = Obj::from_iter([("x", Value::from(1))]);
    let reactive_view = reactive(Value::Obj(raw.clone()));
    let readonly_view = readonly(Value::Obj(raw.clone()));
    let runs = Rc::new(Cell::new(0));

    let reader = reactive_view.as_obj().unwrap().clone();
    let runs_clone = runs.clone();
    let _runner = effect(move || {
        let _ = reader.get("x");
        runs_clone.set(runs_clone.get() + 1);
    });
    assert_eq!(runs.get(), 1);

    // The rejected write neither mutates nor triggers.
    readonly_view.as_obj().unwrap().set("x", 99);
    assert_eq!(raw.get("x"), Value::from(1));
    assert_eq!(runs.get(), 1);
}
