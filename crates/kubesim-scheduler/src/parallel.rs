use crate::error::{Result, SchedulerError};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Default number of concurrent workers inside a scheduling pass
pub const DEFAULT_PARALLELISM: usize = 16;

/// Run `f` over every item on at most `workers` concurrent tasks.
///
/// Results come back in item order. Every task runs to completion; errors
/// are collected while the tasks run and reported together once all of them
/// have joined.
pub async fn parallelize<T, R, F>(workers: usize, items: Vec<T>, f: F) -> Result<Vec<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Result<R> + Send + Sync + 'static,
{
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let errors: Arc<Mutex<Vec<SchedulerError>>> = Arc::new(Mutex::new(Vec::new()));
    let f = Arc::new(f);

    let mut slots: Vec<Option<R>> = Vec::with_capacity(items.len());
    slots.resize_with(items.len(), || None);

    let mut tasks = JoinSet::new();
    for (index, item) in items.into_iter().enumerate() {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| SchedulerError::internal_error(format!("Worker pool closed: {}", e)))?;
        let f = f.clone();
        let errors = errors.clone();

        tasks.spawn(async move {
            let _permit = permit;
            match f(item) {
                Ok(result) => Some((index, result)),
                Err(e) => {
                    errors.lock().push(e);
                    None
                }
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let finished = joined
            .map_err(|e| SchedulerError::internal_error(format!("Worker task failed: {}", e)))?;
        if let Some((index, result)) = finished {
            slots[index] = Some(result);
        }
    }

    let errors = std::mem::take(&mut *errors.lock());
    if !errors.is_empty() {
        return Err(SchedulerError::aggregate(errors));
    }

    slots
        .into_iter()
        .map(|slot| slot.ok_or_else(|| SchedulerError::internal_error("Worker produced no result")))
        .collect()
}
