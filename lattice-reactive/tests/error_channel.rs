//! Deferred flushes and the error channel.
//!
//! Runs on the current-thread runtime so the engine and the test share one
//! thread.

use std::cell::RefCell;
use std::rc::Rc;

use lattice_reactive::{
    effect, flush_sync, is_flush_pending, listen, settle, subscribe_errors, tick, Effect,
    ReactiveError, Signal,
};

#[tokio::test]
async fn settle_runs_the_deferred_flush() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let cell = Signal::new(0);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let _logger = {
        let (cell, seen) = (cell.clone(), seen.clone());
        effect(move || seen.borrow_mut().push(cell.get()))
    };

    cell.set(1);
    cell.set(2);
    assert!(is_flush_pending());

    let report = settle().await.expect("a flush was pending");
    assert_eq!(report.processed, 1);
    assert_eq!(*seen.borrow(), vec![0, 2]);
    assert!(settle().await.is_none());
}

#[tokio::test]
async fn deferred_failures_surface_on_the_channel() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut errors = subscribe_errors();
    let cell = Signal::new(0);
    let _failing = {
        let cell = cell.clone();
        Effect::try_new(move || {
            if cell.get() > 0 {
                Err(ReactiveError::computation("cannot render"))
            } else {
                Ok(())
            }
        })
    };

    cell.set(1);
    assert!(tick().is_some());

    let error = errors.recv().await.expect("error channel closed");
    assert_eq!(error, ReactiveError::computation("cannot render"));
}

#[tokio::test]
async fn panicking_listeners_are_published() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut errors = subscribe_errors();
    let cell = Signal::new(0);
    let _subscription = listen(&cell, |_| panic!("bad listener")).unwrap();

    cell.set(1);
    let report = flush_sync().unwrap();
    assert_eq!(report.errors.len(), 1);

    let published = errors.try_recv().expect("error was published");
    assert_eq!(published, report.errors[0]);
}

#[tokio::test]
async fn dropped_receivers_are_pruned() {
    let errors = subscribe_errors();
    drop(errors);
    let mut live = subscribe_errors();

    let cell = Signal::new(0);
    let _subscription = listen(&cell, |_| panic!("again")).unwrap();
    cell.set(1);
    flush_sync().unwrap();

    assert!(matches!(
        live.try_recv(),
        Ok(ReactiveError::CallbackPanicked { .. })
    ));
}
