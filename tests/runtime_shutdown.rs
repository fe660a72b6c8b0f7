//! Shutting the runtime down while other threads are calling into it.
//!
//! Finalising the interpreter is irreversible, so this binary holds a single
//! test.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use v6bridge::runtime::{EmbeddedPython, Interpreter, ShutdownOutcome};
use v6bridge::test_support::ensure_interpreter;
use v6bridge::{HostValue, MarshalError, Marshaler, RuntimeUnavailable};

const WORKERS: usize = 8;

#[test]
fn callers_waiting_on_the_section_observe_the_shutdown() {
    ensure_interpreter();
    let started = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..WORKERS)
        .map(|_| {
            let started_count = Arc::clone(&started);
            thread::spawn(move || {
                let mut conversions = 0_usize;
                loop {
                    match Marshaler::default().to_foreign(&HostValue::from("payload")) {
                        Ok(value) => {
                            if conversions == 0 {
                                started_count.fetch_add(1, Ordering::SeqCst);
                            }
                            conversions += 1;
                            value.release();
                        }
                        Err(MarshalError::Unavailable(_)) => return conversions,
                        Err(other) => panic!("unexpected conversion failure: {other}"),
                    }
                }
            })
        })
        .collect();
    while started.load(Ordering::SeqCst) < WORKERS {
        thread::yield_now();
    }

    let outcome = EmbeddedPython.shutdown();

    let conversions: Vec<usize> = workers
        .into_iter()
        .map(|worker| {
            worker
                .join()
                .unwrap_or_else(|_| panic!("worker thread panicked"))
        })
        .collect();
    assert!(
        matches!(
            outcome,
            Ok(ShutdownOutcome::Clean | ShutdownOutcome::FlushWarning)
        ),
        "unexpected shutdown outcome: {outcome:?}"
    );
    assert!(conversions.iter().all(|count| *count > 0), "{conversions:?}");
    assert!(!EmbeddedPython.is_running());
    assert_eq!(
        Marshaler::default()
            .to_foreign(&HostValue::from("late"))
            .map(drop),
        Err(MarshalError::Unavailable(RuntimeUnavailable))
    );
}
