//! Drives fetch units over an ordered item list in fixed-size batches.
//!
//! Batches run strictly one after another; inside a batch every unit runs
//! concurrently behind a semaphore shared by the whole scheduler. A batch is
//! handed to the [`BatchSink`] only once all of its units have settled, and
//! the next batch starts only after the sink returns.

use std::future::Future;
use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::task::ItemPosition;

/// Settled batch: absolute item range plus the results of the units that
/// produced one, in listing order.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub range: Range<usize>,
    pub results: Vec<T>,
    pub failed: usize,
}

/// Receives each settled batch before the next one starts.
#[async_trait]
pub trait BatchSink<T: Send + 'static>: Send {
    async fn commit(&mut self, outcome: BatchOutcome<T>);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub batches: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct BatchScheduler {
    gate: Arc<Semaphore>,
    batch_size: usize,
}

impl BatchScheduler {
    pub fn new(max_in_flight: usize, batch_size: usize) -> Self {
        Self {
            gate: Arc::new(Semaphore::new(max_in_flight.max(1))),
            batch_size: batch_size.max(1),
        }
    }

    /// Run `unit` for every item from `start` on. `unit` receives the item's
    /// absolute 1-based position in `items`.
    pub async fn run<D, T, F, Fut, S>(
        &self,
        items: &[D],
        start: usize,
        unit: F,
        sink: &mut S,
    ) -> ScheduleSummary
    where
        D: Clone + Send + 'static,
        T: Send + 'static,
        F: Fn(ItemPosition, D) -> Fut,
        Fut: Future<Output = Option<T>> + Send + 'static,
        S: BatchSink<T> + ?Sized,
    {
        let total = items.len();
        let mut summary = ScheduleSummary::default();

        for range in plan_batches(total, start, self.batch_size) {
            info!(
                from = range.start + 1,
                to = range.end,
                total,
                "processing batch"
            );

            let mut set = JoinSet::new();
            for (offset, item) in items[range.clone()].iter().enumerate() {
                let position = ItemPosition {
                    index: range.start + offset + 1,
                    total,
                };
                let gate = self.gate.clone();
                let fut = unit(position, item.clone());
                set.spawn(async move {
                    let _permit = match gate.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return (offset, None),
                    };
                    (offset, fut.await)
                });
            }

            // Slots keep results in listing order whatever order units finish in.
            let mut slots: Vec<Option<T>> = (0..range.len()).map(|_| None).collect();
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((offset, value)) => slots[offset] = value,
                    Err(err) => error!(?err, "fetch unit panicked or was cancelled"),
                }
            }
            let results: Vec<T> = slots.into_iter().flatten().collect();
            let failed = range.len() - results.len();

            summary.batches += 1;
            summary.processed += range.len();
            summary.succeeded += results.len();
            summary.failed += failed;

            sink.commit(BatchOutcome {
                range,
                results,
                failed,
            })
            .await;
        }

        summary
    }
}

/// Consecutive `[start, end)` ranges of at most `batch_size` items covering
/// `start..total`. A start past the end yields nothing.
pub fn plan_batches(total: usize, start: usize, batch_size: usize) -> Vec<Range<usize>> {
    let batch_size = batch_size.max(1);
    let mut ranges = Vec::new();
    let mut from = start.min(total);
    while from < total {
        let to = (from + batch_size).min(total);
        ranges.push(from..to);
        from = to;
    }
    ranges
}
