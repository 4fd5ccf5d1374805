//! Batch driver: runs many build tasks concurrently.

use crate::task::{BuildTask, TaskReport};
use nufb_core::{Error, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Run `tasks` with at most `concurrency` of them in flight.
///
/// `None` runs all tasks at once. Failing tasks do not cancel the others: the
/// batch waits for every task and then returns the first failure in
/// submission order, or the reports of all tasks.
pub async fn run_batch(tasks: Vec<BuildTask>, concurrency: Option<usize>) -> Result<Vec<TaskReport>> {
    let total = tasks.len();
    let limit = concurrency.unwrap_or(total).max(1);
    info!(tasks = total, concurrency = limit, "Starting batch");

    let semaphore = Arc::new(Semaphore::new(limit));
    let mut join_set = JoinSet::new();

    for (index, mut task) in tasks.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        join_set.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => task.run().await,
                Err(e) => Err(Error::Internal(e.to_string())),
            };
            (index, result)
        });
    }

    let mut results: Vec<Option<Result<TaskReport>>> = (0..total).map(|_| None).collect();
    let mut panicked = None;

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, result)) => results[index] = Some(result),
            Err(e) => {
                error!(error = %e, "Build task panicked");
                panicked.get_or_insert(Error::Internal(format!("build task panicked: {e}")));
            }
        }
    }

    let mut reports = Vec::with_capacity(total);
    let mut first_error = None;
    let mut failed = 0;
    for result in results.into_iter().flatten() {
        match result {
            Ok(report) => reports.push(report),
            Err(e) => {
                failed += 1;
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error.or(panicked) {
        Some(e) => {
            error!(failed, succeeded = reports.len(), "Batch failed");
            Err(e)
        }
        None => {
            info!(succeeded = reports.len(), "Batch finished");
            Ok(reports)
        }
    }
}
