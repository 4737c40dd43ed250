//! Property-based tests for propagation invariants.
//!
//! Random mutation sequences are applied to reactive values and to a plain
//! model side by side; the reactive side must agree with the model after
//! every flush.

use std::cell::RefCell;
use std::rc::Rc;

use lattice_reactive::{derived, flush_sync, listen, snapshot, Proxy, Signal};
use proptest::prelude::*;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
enum ListOp {
    Push(i64),
    Pop,
    Unshift(i64),
    Shift,
    Insert(usize, i64),
    Remove(usize),
    Set(usize, i64),
    Splice(usize, usize, Vec<i64>),
}

fn list_op_strategy() -> impl Strategy<Value = ListOp> {
    prop_oneof![
        (-50i64..50).prop_map(ListOp::Push),
        Just(ListOp::Pop),
        (-50i64..50).prop_map(ListOp::Unshift),
        Just(ListOp::Shift),
        (0usize..12, -50i64..50).prop_map(|(i, v)| ListOp::Insert(i, v)),
        (0usize..12).prop_map(ListOp::Remove),
        (0usize..12, -50i64..50).prop_map(|(i, v)| ListOp::Set(i, v)),
        (0usize..12, 0usize..4, prop::collection::vec(-50i64..50, 0..4))
            .prop_map(|(s, d, items)| ListOp::Splice(s, d, items)),
    ]
}

/// Apply `op` to both sides. Out-of-range operations must fail on the proxy
/// exactly when they are out of range for the model.
fn apply(list: &Proxy, model: &mut Vec<i64>, op: &ListOp) {
    match op {
        ListOp::Push(v) => {
            model.push(*v);
            list.push(*v).unwrap();
        }
        ListOp::Pop => {
            let expected = model.pop().map(Value::from);
            assert_eq!(list.pop().unwrap(), expected);
        }
        ListOp::Unshift(v) => {
            model.insert(0, *v);
            list.unshift(*v).unwrap();
        }
        ListOp::Shift => {
            let expected = (!model.is_empty()).then(|| Value::from(model.remove(0)));
            assert_eq!(list.shift().unwrap(), expected);
        }
        ListOp::Insert(i, v) => {
            if *i <= model.len() {
                model.insert(*i, *v);
                list.insert(*i, *v).unwrap();
            } else {
                assert!(list.insert(*i, *v).is_err());
            }
        }
        ListOp::Remove(i) => {
            let expected = (*i < model.len()).then(|| Value::from(model.remove(*i)));
            assert_eq!(list.remove(*i).unwrap(), expected);
        }
        ListOp::Set(i, v) => {
            if *i < model.len() {
                model[*i] = *v;
                list.set(*i, *v).unwrap();
            } else if *i == model.len() {
                model.push(*v);
                list.set(*i, *v).unwrap();
            } else {
                assert!(list.set(*i, *v).is_err());
            }
        }
        ListOp::Splice(start, delete, items) => {
            if *start <= model.len() {
                let end = (*start + *delete).min(model.len());
                let removed: Vec<Value> = model
                    .splice(*start..end, items.iter().copied())
                    .map(Value::from)
                    .collect();
                assert_eq!(list.splice(*start, *delete, items.clone()).unwrap(), removed);
            } else {
                assert!(list.splice(*start, *delete, items.clone()).is_err());
            }
        }
    }
}

proptest! {
    /// Property: the number of delivered notifications equals the number of
    /// value-changing writes.
    #[test]
    fn notifications_match_value_changing_writes(writes in prop::collection::vec(0i32..4, 0..40)) {
        let cell = Signal::new(0);
        let delivered = Rc::new(RefCell::new(0usize));
        let _subscription = {
            let delivered = delivered.clone();
            listen(&cell, move |_| *delivered.borrow_mut() += 1).unwrap()
        };

        let mut current = 0;
        let mut changes = 0;
        for value in writes {
            if value != current {
                changes += 1;
                current = value;
            }
            cell.set(value);
            flush_sync().unwrap();
        }

        prop_assert_eq!(*delivered.borrow(), changes);
    }

    /// Property: a list proxy behaves like a `Vec` under every operation, and
    /// derived values over it stay in sync.
    #[test]
    fn list_proxy_matches_vec_model(
        initial in prop::collection::vec(-50i64..50, 0..8),
        ops in prop::collection::vec(list_op_strategy(), 0..30),
    ) {
        let list = Proxy::wrap(json!(initial)).unwrap();
        let mut model = initial;

        let length = {
            let list = list.clone();
            derived(move || list.len())
        };
        let sum = {
            let list = list.clone();
            derived(move || {
                list.entries()
                    .iter()
                    .filter_map(|(_, entry)| entry.to_value().as_i64())
                    .sum::<i64>()
            })
        };

        for op in &ops {
            apply(&list, &mut model, op);
            flush_sync().unwrap();
            prop_assert_eq!(snapshot(&list), json!(model));
            prop_assert_eq!(length.get().unwrap(), model.len());
            prop_assert_eq!(sum.get().unwrap(), model.iter().sum::<i64>());
        }
    }

    /// Property: a listener on the list root observes a shape change exactly
    /// when the length changed.
    #[test]
    fn shape_events_track_length_changes(ops in prop::collection::vec(list_op_strategy(), 1..20)) {
        let list = Proxy::wrap(json!([1, 2, 3])).unwrap();
        let mut model = vec![1, 2, 3];
        let shapes = Rc::new(RefCell::new(Vec::new()));
        let _subscription = {
            let shapes = shapes.clone();
            listen(&list, move |event| {
                if event.kind == lattice_reactive::ReactiveEventType::ShapeChanged {
                    shapes.borrow_mut().push(event.new_value.clone());
                }
            })
            .unwrap()
        };

        for op in &ops {
            let before = model.len();
            shapes.borrow_mut().clear();
            apply(&list, &mut model, op);
            flush_sync().unwrap();

            let seen = shapes.borrow();
            if model.len() == before {
                prop_assert!(seen.is_empty());
            } else {
                prop_assert_eq!(seen.len(), 1);
                prop_assert_eq!(seen[0].clone(), Some(json!(model.len())));
            }
        }
    }
}
