//! Bounded parallelism for independent units of work.
//!
//! Units run in chunks of a fixed width on scoped threads. Within a chunk each
//! unit settles on its own: a failing or panicking unit never cancels its
//! siblings, and the chunk always waits for every unit to finish.

use std::any::Any;
use std::collections::BTreeSet;
use std::thread;

use tracing::warn;

use crate::core::types::{AgentError, ErrorKind};

/// Run every unit of `chunk` concurrently and return outcomes in submission
/// order. A panic is captured as an `unknown` error for that unit only.
pub fn run_chunk<K, R, F>(chunk: &[K], work: &F) -> Vec<(K, Result<R, AgentError>)>
where
    K: Clone + Sync,
    R: Send,
    F: Fn(&K) -> R + Sync,
{
    thread::scope(|scope| {
        let handles: Vec<_> = chunk
            .iter()
            .map(|unit| (unit, scope.spawn(move || work(unit))))
            .collect();
        handles
            .into_iter()
            .map(|(unit, handle)| {
                let outcome = handle.join().map_err(|payload| {
                    let message = panic_message(payload.as_ref());
                    warn!(message = %message, "batch unit panicked");
                    AgentError::new(
                        ErrorKind::Unknown,
                        "unit_panicked",
                        format!("batch unit panicked: {message}"),
                    )
                });
                (unit.clone(), outcome)
            })
            .collect()
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Fixed-width chunk size for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRunner {
    width: usize,
}

impl BatchRunner {
    /// A width of zero is treated as one.
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

/// Keys that appear more than once, each reported once, in sorted order.
pub fn duplicate_keys<'a, K>(keys: impl IntoIterator<Item = &'a K>) -> Vec<K>
where
    K: Ord + Clone + 'a,
{
    let mut seen = BTreeSet::new();
    let mut repeated = BTreeSet::new();
    for key in keys {
        if !seen.insert(key) {
            repeated.insert(key.clone());
        }
    }
    repeated.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn one_failure_does_not_affect_siblings() {
        let outcomes = run_chunk(&[1, 2, 3, 4, 5], &|unit: &i32| {
            if *unit == 3 {
                Err(AgentError::execution("boom", "unit 3 failed"))
            } else {
                Ok(unit * 10)
            }
        });
        assert_eq!(outcomes.len(), 5);
        let settled: Vec<_> = outcomes
            .into_iter()
            .map(|(unit, outcome)| (unit, outcome.and_then(|inner| inner)))
            .collect();
        assert_eq!(settled.iter().filter(|(_, r)| r.is_ok()).count(), 4);
        assert_eq!(settled[2].1.as_ref().unwrap_err().code, "boom");
        assert_eq!(settled[4].1.as_ref().ok(), Some(&50));
    }

    #[test]
    fn panic_is_isolated_to_its_unit() {
        let outcomes = run_chunk(&["a", "b", "c"], &|unit: &&str| {
            if *unit == "b" {
                panic!("exploded");
            }
            unit.len()
        });
        let err = outcomes[1].1.as_ref().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert_eq!(err.code, "unit_panicked");
        assert!(err.message.contains("exploded"));
        assert!(outcomes[0].1.is_ok());
        assert!(outcomes[2].1.is_ok());
    }

    #[test]
    fn concurrency_never_exceeds_width() {
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let units: Vec<i32> = (0..6).collect();
        let runner = BatchRunner::new(2);
        for chunk in units.chunks(runner.width()) {
            run_chunk(chunk, &|_: &i32| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn chunk_preserves_submission_order() {
        let outcomes = run_chunk(&[3, 1, 2], &|unit: &i32| *unit);
        let order: Vec<i32> = outcomes.iter().map(|(unit, _)| *unit).collect();
        assert_eq!(order, vec![3, 1, 2]);
    }

    #[test]
    fn zero_width_is_clamped_to_one() {
        assert_eq!(BatchRunner::new(0).width(), 1);
        assert_eq!(BatchRunner::new(4).width(), 4);
    }

    #[test]
    fn repeated_keys_are_reported_once() {
        assert_eq!(duplicate_keys(&[2, 1, 2, 3, 1, 2]), vec![1, 2]);
        assert!(duplicate_keys(&["a", "b"]).is_empty());
    }
}
