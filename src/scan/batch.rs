//! Batched, bounded-concurrency task execution.

use crate::scan::progress::RunContext;
use futures::stream::{self, StreamExt};
use log::info;
use rand::seq::SliceRandom;
use std::future::Future;

/// Discovery batches are this many times the concurrency ceiling.
pub const DISCOVERY_BATCH_MULTIPLIER: usize = 10;
/// Verification requests are heavier, so those batches run smaller.
pub const VERIFY_BATCH_MULTIPLIER: usize = 5;

/// Executes a task list as successive fixed-size batches, each batch fully
/// drained under the concurrency ceiling before the next one starts.
pub struct BatchScheduler {
    concurrency: usize,
    batch_multiplier: usize,
}

impl BatchScheduler {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            batch_multiplier: DISCOVERY_BATCH_MULTIPLIER,
        }
    }

    pub fn with_batch_multiplier(mut self, batch_multiplier: usize) -> Self {
        self.batch_multiplier = batch_multiplier.max(1);
        self
    }

    /// Run every task through `worker`, at most `concurrency` in flight.
    ///
    /// Tasks are shuffled once up front so outcomes never correlate with
    /// input ordering. The stop flag on `ctx` is observed between batches
    /// only; a batch that has started always drains, and a stop request
    /// returns the results gathered so far. Within a batch, results arrive
    /// in completion order.
    pub async fn run<T, R, F, Fut>(&self, mut tasks: Vec<T>, ctx: &RunContext, worker: F) -> Vec<R>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = R>,
    {
        tasks.shuffle(&mut rand::thread_rng());
        ctx.set_total(tasks.len() as u64);

        let batch_size = self.concurrency.saturating_mul(self.batch_multiplier);
        let mut results = Vec::with_capacity(tasks.len());
        let mut pending = tasks.into_iter();

        while pending.len() > 0 {
            if ctx.is_stopped() {
                ctx.record(
                    "scheduler",
                    format!("{} tasks left unprocessed", pending.len()),
                    "stopped",
                );
                break;
            }

            let batch: Vec<T> = pending.by_ref().take(batch_size).collect();
            let drained = batch.len() as u64;
            let mut out = stream::iter(batch)
                .map(&worker)
                .buffer_unordered(self.concurrency)
                .collect::<Vec<R>>()
                .await;
            results.append(&mut out);

            let done = ctx.add_completed(drained);
            info!(
                "progress {}/{} | {:.0}/s | found {}",
                done,
                ctx.total(),
                ctx.throughput(),
                ctx.found()
            );
        }
        results
    }
}
