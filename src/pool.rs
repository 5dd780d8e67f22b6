// src/pool.rs

use crate::error::{Error, Result};
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressIterator};
use rayon::prelude::*;
use rayon::ThreadPool;

/// Bounded worker pool for file-level stages.
///
/// Every task runs to completion and its result lands at its item's index;
/// errors are only looked at once all tasks have finished, and the first one
/// in item order is returned.
pub struct WorkerPool {
    threads: usize,
    pool: Option<ThreadPool>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let pool = if threads > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|i| format!("canary-track-{i}"))
                .build()
                .map_err(|e| Error::Pool(e.to_string()))?;
            Some(pool)
        } else {
            None
        };
        Ok(Self { threads, pool })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn run<T, R, F>(&self, label: &str, items: &[T], task: F) -> Result<Vec<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> Result<R> + Sync + Send,
    {
        let bar = ProgressBar::new(items.len() as u64);
        bar.set_message(label.to_string());

        let results: Vec<Result<R>> = match &self.pool {
            None => items.iter().progress_with(bar.clone()).map(&task).collect(),
            Some(pool) => pool.install(|| {
                items
                    .par_iter()
                    .progress_with(bar.clone())
                    .map(&task)
                    .collect()
            }),
        };
        bar.finish_and_clear();

        results.into_iter().collect()
    }
}
