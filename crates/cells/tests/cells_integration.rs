//! End-to-end cell scenarios driving the full engine lifecycle.

use std::cell::RefCell;
use std::rc::Rc;

use weft_cells::{Cell, Discrete, Maintained, Observer};
use weft_engine::{Engine, Error};

/// The classic two-way temperature converter: two mutually dependent
/// maintained cells settle by layer promotion and equality damping, and
/// an observer sees every settled state exactly once.
#[test]
fn temperature_converter_settles_every_assignment() {
    let mut en = Engine::new();

    let c = Maintained::build()
        .initially(0.0_f64)
        .named("C")
        .reserve(&mut en);
    let f = Maintained::build()
        .initially(32.0_f64)
        .named("F")
        .reserve(&mut en);
    c.define(&mut en, move |en| Ok((f.get(en)? - 32.0) / 1.8))
        .unwrap();
    f.define(&mut en, move |en| Ok(c.get(en)? * 1.8 + 32.0))
        .unwrap();

    let log: Rc<RefCell<Vec<(f64, f64)>>> = Rc::new(RefCell::new(Vec::new()));
    let l = log.clone();
    Observer::new(&mut en, move |en| {
        l.borrow_mut().push((c.get(en)?, f.get(en)?));
        Ok(())
    })
    .unwrap();

    // the construction-time settled state is not under test
    assert_eq!(*log.borrow(), vec![(0.0, 32.0)]);
    log.borrow_mut().clear();

    c.set(&mut en, 100.0).unwrap();
    f.set(&mut en, 32.0).unwrap();
    c.set(&mut en, -40.0).unwrap();

    assert_eq!(
        *log.borrow(),
        vec![(100.0, 212.0), (0.0, 32.0), (-40.0, -40.0)]
    );

    // idempotent reassignment is damped: no pass, no observer output
    c.set(&mut en, -40.0).unwrap();
    assert_eq!(log.borrow().len(), 3);
}

/// Contradictory rules (`a = b + 1`, `b = a + 1`) can never settle; the
/// engine must diagnose the cycle and name both cells instead of
/// looping.
#[test]
fn contradictory_rules_raise_circularity_naming_both_cells() {
    let mut en = Engine::new();

    let a = Maintained::build()
        .initially(0_i64)
        .named("a")
        .reserve(&mut en);
    let b = Maintained::build()
        .initially(0_i64)
        .named("b")
        .reserve(&mut en);

    let result = en.atomically(|en| {
        a.define(en, move |en| Ok(b.get(en)? + 1))?;
        b.define(en, move |en| Ok(a.get(en)? + 1))?;
        a.set(en, 10)
    });

    match result {
        Err(Error::Circularity { participants }) => {
            assert!(participants.contains(&"a".to_string()));
            assert!(participants.contains(&"b".to_string()));
        }
        other => panic!("expected circularity, got {:?}", other),
    }

    // the aborted scope left no trace
    assert_eq!(a.read(&en), Some(0));
    assert_eq!(b.read(&en), Some(0));
}

/// A discrete cell's transient value is visible to the observers of the
/// writing pass and gone before external code regains control.
#[test]
fn discrete_transient_is_visible_to_observers_only() {
    let mut en = Engine::new();
    let d = Discrete::new(&mut en, 0_i64);

    let seen: Rc<RefCell<Vec<i64>>> = Rc::new(RefCell::new(Vec::new()));
    let s = seen.clone();
    Observer::new(&mut en, move |en| {
        s.borrow_mut().push(d.get(en)?);
        Ok(())
    })
    .unwrap();

    en.atomically(|en| d.set(en, 7)).unwrap();

    assert_eq!(*seen.borrow(), vec![0, 7]);
    assert_eq!(d.read(&en), Some(0));
}

/// A chain Cell -> Maintained -> Observer propagates atomically: the
/// observer never sees an intermediate combination.
#[test]
fn derived_chain_exposes_only_consistent_states() {
    let mut en = Engine::new();
    let base = Cell::new(&mut en, 1_i64);
    let squared = Maintained::new(&mut en, move |en| {
        let v = base.get(en)?;
        Ok(v * v)
    })
    .unwrap();

    let states: Rc<RefCell<Vec<(i64, i64)>>> = Rc::new(RefCell::new(Vec::new()));
    let st = states.clone();
    Observer::new(&mut en, move |en| {
        st.borrow_mut().push((base.get(en)?, squared.get(en)?));
        Ok(())
    })
    .unwrap();

    for v in [2_i64, 3, 4] {
        base.set(&mut en, v).unwrap();
    }

    assert_eq!(
        *states.borrow(),
        vec![(1, 1), (2, 4), (3, 9), (4, 16)]
    );
}

/// An error thrown from a rule aborts the whole scope: earlier writes in
/// the same scope are rolled back too.
#[test]
fn failing_rule_rolls_back_the_whole_scope() {
    let mut en = Engine::new();
    let base = Cell::new(&mut en, 1_i64);
    let guard = Maintained::new(&mut en, move |en| {
        let v = base.get(en)?;
        if v > 10 {
            return Err(Error::aborted("out of range"));
        }
        Ok(v)
    })
    .unwrap();

    let result = en.atomically(|en| base.set(en, 99));
    assert!(matches!(result, Err(Error::Aborted { .. })));

    assert_eq!(base.read(&en), Some(1));
    assert_eq!(guard.read(&en), Some(1));
}
