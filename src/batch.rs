//! Bounded-concurrency, order-preserving batch execution

use crate::error::{RemovalError, Result};
use futures::future::join_all;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Run `op` over every input with at most `concurrency` operations in flight
///
/// `min(max(1, concurrency), n)` cooperative workers claim the next index
/// from a shared cursor, so results come back in input order whatever the
/// completion order. The first failure fails the whole batch and results
/// already produced are dropped. Items already in flight when a failure
/// lands still run to completion; only unclaimed items are skipped.
pub async fn run_ordered<T, R, F, Fut>(inputs: Vec<T>, concurrency: usize, op: F) -> Result<Vec<R>>
where
    F: Fn(usize, T) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let total = inputs.len();
    if total == 0 {
        return Ok(Vec::new());
    }

    let workers = concurrency.max(1).min(total);
    let pending: Mutex<Vec<Option<T>>> = Mutex::new(inputs.into_iter().map(Some).collect());
    let slots: Mutex<Vec<Option<R>>> = Mutex::new((0..total).map(|_| None).collect());
    let cursor = AtomicUsize::new(0);
    let failure: Mutex<Option<RemovalError>> = Mutex::new(None);

    let worker = || async {
        loop {
            if has_failed(&failure) {
                return;
            }
            let index = cursor.fetch_add(1, Ordering::SeqCst);
            if index >= total {
                return;
            }
            let outcome = match take_slot(&pending, index) {
                Ok(input) => match op(index, input).await {
                    Ok(output) => put_slot(&slots, index, output),
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                record_failure(&failure, e);
                return;
            }
        }
    };

    join_all((0..workers).map(|_| worker())).await;

    if let Some(e) = failure
        .into_inner()
        .map_err(|_| RemovalError::internal("Batch failure slot poisoned"))?
    {
        return Err(e);
    }

    let slots = slots
        .into_inner()
        .map_err(|_| RemovalError::internal("Batch result slots poisoned"))?;
    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| RemovalError::internal(format!("Batch item {} produced no result", index)))
        })
        .collect()
}

fn has_failed(failure: &Mutex<Option<RemovalError>>) -> bool {
    failure.lock().map_or(true, |failure| failure.is_some())
}

/// Keep the first failure; later ones are dropped
fn record_failure(failure: &Mutex<Option<RemovalError>>, error: RemovalError) {
    match failure.lock() {
        Ok(mut slot) => {
            if slot.is_none() {
                *slot = Some(error);
            }
        }
        Err(_) => log::warn!("Batch failure slot poisoned; dropping error: {}", error),
    }
}

fn take_slot<T>(pending: &Mutex<Vec<Option<T>>>, index: usize) -> Result<T> {
    let mut pending = pending
        .lock()
        .map_err(|_| RemovalError::internal("Batch input queue poisoned"))?;
    pending
        .get_mut(index)
        .and_then(Option::take)
        .ok_or_else(|| RemovalError::internal(format!("Batch item {} claimed twice", index)))
}

fn put_slot<R>(slots: &Mutex<Vec<Option<R>>>, index: usize, value: R) -> Result<()> {
    let mut slots = slots
        .lock()
        .map_err(|_| RemovalError::internal("Batch result slots poisoned"))?;
    let slot = slots
        .get_mut(index)
        .ok_or_else(|| RemovalError::internal(format!("Batch item {} out of range", index)))?;
    *slot = Some(value);
    Ok(())
}
