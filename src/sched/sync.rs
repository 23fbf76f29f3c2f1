//! Synchronous barrier: block a caller until a job posted on its behalf
//! completes.

use super::evloop::EventManagerGuard;
use super::job::Job;
use super::pool::ThreadPool;
use super::queue::JobQueue;
use crate::error::{Error, Kind};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Post `make`'s resulting future as a job and block the caller until it
/// completes (or the timeout elapses), returning its result.
pub async fn sched_sync<Fut, T>(
    queue: &JobQueue,
    pool: &Arc<ThreadPool>,
    group: Option<Arc<str>>,
    timeout: Option<Duration>,
    make: impl FnOnce() -> Fut + Send + 'static,
) -> Result<T, Error>
where
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let id = queue.fresh_job_id();
    let job = Arc::new(Job::new(
        id,
        group,
        Duration::ZERO,
        timeout,
        Box::new(move || {
            Box::pin(async move {
                let _ = tx.send(make().await);
            })
        }),
    ));
    queue.post(job);
    pool.grow_if_backlogged();

    match timeout {
        Some(d) => tokio::time::timeout(d, rx)
            .await
            .map_err(|_| Error::new(Kind::Etimedout))?
            .map_err(|_| Error::new(Kind::InternalError)),
        None => rx.await.map_err(|_| Error::new(Kind::InternalError)),
    }
}

/// Release a held event-loop guard before blocking on `sched_sync`, so
/// another thread can service the loop while this one waits. Named for
/// the call-site intent; the guard's `Drop` does the actual work.
pub fn sched_leave(guard: EventManagerGuard) {
    drop(guard);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sched_sync_returns_the_jobs_result() {
        let queue = Arc::new(JobQueue::new());
        let pool = ThreadPool::new(queue.clone(), Arc::new(super::evloop::EventManager::new()), 1, 2);
        let result = sched_sync(&queue, &pool, None, None, || async { 7 + 5 }).await.unwrap();
        assert_eq!(result, 12);
        pool.shutdown();
    }

    #[tokio::test]
    async fn sched_sync_times_out_on_a_stuck_job() {
        let queue = Arc::new(JobQueue::new());
        let pool = ThreadPool::new(queue.clone(), Arc::new(super::evloop::EventManager::new()), 1, 2);
        let result: Result<(), Error> = sched_sync(&queue, &pool, None, Some(Duration::from_millis(5)), || async {
            tokio::time::sleep(Duration::from_secs(5)).await
        })
        .await;
        assert_eq!(result.unwrap_err().kind, Kind::Etimedout);
        pool.shutdown();
    }
}
