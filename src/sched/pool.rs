//! Adaptive OS thread pool draining the job queue.
//!
//! N workers pull jobs off a shared queue, but each worker is a real
//! `std::thread` rather than a tokio task, since jobs may block and the
//! pool needs to grow and shrink real OS threads under load. Each
//! worker blocks on the async runtime handle to drive a job's future to
//! completion, then returns to the pool.

use super::evloop::EventManager;
use super::monitor::{safe_call, UndoStack};
use super::queue::JobQueue;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

pub struct ThreadPool {
    queue: Arc<JobQueue>,
    evmgr: Arc<EventManager>,
    reserve_min: usize,
    max: usize,
    active_threads: Arc<AtomicUsize>,
    parked: Arc<AtomicUsize>,
    handle: tokio::runtime::Handle,
    shutdown: Arc<AtomicBool>,
}

impl ThreadPool {
    /// `reserve_min` threads are kept parked and ready even when idle;
    /// the pool grows up to `max` under backlog and shrinks back down.
    /// `evmgr` is the single process-wide event-manager arbiter (§4.4.3):
    /// whichever idle worker acquires it becomes the event-loop thread for
    /// as long as it holds it.
    pub fn new(queue: Arc<JobQueue>, evmgr: Arc<EventManager>, reserve_min: usize, max: usize) -> Arc<Self> {
        let pool = Arc::new(Self {
            queue,
            evmgr,
            reserve_min,
            max: max.max(reserve_min),
            active_threads: Arc::new(AtomicUsize::new(0)),
            parked: Arc::new(AtomicUsize::new(0)),
            handle: tokio::runtime::Handle::current(),
            shutdown: Arc::new(AtomicBool::new(false)),
        });
        for _ in 0..reserve_min {
            pool.spawn_worker();
        }
        pool
    }

    fn spawn_worker(self: &Arc<Self>) {
        let pool = self.clone();
        pool.active_threads.fetch_add(1, Ordering::SeqCst);
        std::thread::spawn(move || pool.worker_loop());
    }

    fn worker_loop(self: Arc<Self>) {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                self.active_threads.fetch_sub(1, Ordering::SeqCst);
                return;
            }
            match self.queue.dequeue() {
                Some(job) => {
                    if let Some(callback) = job.take_callback() {
                        let undo = UndoStack::new();
                        if let Err(e) = self.handle.block_on(safe_call(job.timeout, &undo, callback())) {
                            warn!(job_id = job.id, error = %e, "job callback did not complete cleanly");
                        }
                    }
                    self.queue.release_group(&job);
                }
                None => {
                    // Idle: try to become the rotating event-loop thread
                    // (§4.4.3) and run one prepare->wait->dispatch turn;
                    // otherwise just park. Either way, wait is bounded by
                    // the nearest delayed job's expiry so it gets picked up
                    // promptly once runnable.
                    if let Some(guard) = self.evmgr.try_get() {
                        self.wait_for_work_or_delay();
                        drop(guard);
                    } else {
                        self.parked.fetch_add(1, Ordering::SeqCst);
                        self.wait_for_work_or_delay();
                        self.parked.fetch_sub(1, Ordering::SeqCst);
                        if self.active_threads.load(Ordering::SeqCst) > self.reserve_min {
                            self.active_threads.fetch_sub(1, Ordering::SeqCst);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Block until either new work is posted or the nearest delayed job's
    /// expiry arrives, whichever comes first (§4.4.1's `dequeue`
    /// delay-reporting contract, consumed here instead of busy-polling).
    fn wait_for_work_or_delay(&self) {
        let (_, delay) = self.queue.dequeue_with_delay();
        match delay {
            Some(d) => {
                self.handle.block_on(async { tokio::time::timeout(d, self.queue.wait_for_work()).await });
            }
            None => self.handle.block_on(self.queue.wait_for_work()),
        }
    }

    /// Called after posting work: spins up a worker above the reserve if
    /// the queue is backlogged and the pool has headroom under `max`.
    pub fn grow_if_backlogged(self: &Arc<Self>) {
        if !self.queue.is_empty() && self.active_threads.load(Ordering::SeqCst) < self.max {
            self.spawn_worker();
        }
    }

    pub fn active_count(&self) -> usize {
        self.active_threads.load(Ordering::SeqCst)
    }

    pub fn parked_count(&self) -> usize {
        self.parked.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::job::Job;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[tokio::test]
    async fn pool_drains_posted_jobs() {
        let queue = Arc::new(JobQueue::new());
        let pool = ThreadPool::new(queue.clone(), Arc::new(super::super::evloop::EventManager::new()), 2, 4);
        let done = Arc::new(AtomicU32::new(0));
        for i in 0..10 {
            let done = done.clone();
            let id = queue.fresh_job_id();
            queue.post(Arc::new(Job::new(id, None, Duration::ZERO, None, Box::new(move || {
                Box::pin(async move {
                    done.fetch_add(1, Ordering::SeqCst);
                    let _ = i;
                })
            }))));
        }
        pool.grow_if_backlogged();
        for _ in 0..100 {
            if done.load(Ordering::SeqCst) == 10 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(done.load(Ordering::SeqCst), 10);
        pool.shutdown();
    }

    #[tokio::test]
    async fn job_exceeding_its_timeout_is_released_instead_of_hanging_the_worker() {
        let queue = Arc::new(JobQueue::new());
        let pool = ThreadPool::new(queue.clone(), Arc::new(super::super::evloop::EventManager::new()), 1, 1);
        let id = queue.fresh_job_id();
        queue.post(Arc::new(Job::new(
            id,
            None,
            Duration::ZERO,
            Some(Duration::from_millis(20)),
            Box::new(|| Box::pin(async { tokio::time::sleep(Duration::from_secs(5)).await })),
        )));

        // Give the single reserved worker time to hit the timeout and
        // release the job, instead of hanging on it forever.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let done = Arc::new(AtomicU32::new(0));
        let d2 = done.clone();
        let id2 = queue.fresh_job_id();
        queue.post(Arc::new(Job::new(id2, None, Duration::ZERO, None, Box::new(move || {
            Box::pin(async move {
                d2.fetch_add(1, Ordering::SeqCst);
            })
        }))));
        pool.grow_if_backlogged();
        for _ in 0..200 {
            if done.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(done.load(Ordering::SeqCst), 1, "worker must free up after the timed-out job releases");
        pool.shutdown();
    }
}
