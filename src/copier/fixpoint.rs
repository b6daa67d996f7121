//! Finalize loop over the unfinalized set.

use crate::{Error, Result};

/// Repeatedly offers every pending entry to `step` until none remain.
///
/// Each iteration works on a snapshot of the pending entries: `step` receives the entry and
/// the snapshot it belongs to and returns whether the entry was finalized. Entries finalized
/// during an iteration are still part of that iteration's snapshot, so an entry whose
/// dependencies finalize in iteration `n` can finalize in iteration `n + 1` at the earliest.
///
/// Returns the number of iterations run.
///
/// # Errors
/// Returns [`Error::UnresolvableCycle`] naming every remaining entry (via `describe`) when an
/// iteration finalizes nothing, and propagates errors from `step`.
pub(crate) fn run_to_fixpoint<T, F, D>(
    mut pending: Vec<T>,
    mut step: F,
    describe: D,
) -> Result<usize>
where
    T: Clone,
    F: FnMut(&T, &[T]) -> Result<bool>,
    D: Fn(&T) -> String,
{
    let mut iterations = 0;
    while !pending.is_empty() {
        iterations += 1;
        let mut remaining = Vec::with_capacity(pending.len());
        for entry in &pending {
            if !step(entry, &pending)? {
                remaining.push(entry.clone());
            }
        }
        if remaining.len() == pending.len() {
            return Err(Error::UnresolvableCycle {
                pending: remaining.iter().map(|entry| describe(entry)).collect(),
            });
        }
        tracing::trace!(
            iteration = iterations,
            finalized = pending.len() - remaining.len(),
            remaining = remaining.len(),
            "finalize iteration"
        );
        pending = remaining;
    }
    Ok(iterations)
}
