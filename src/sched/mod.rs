//! Job queue, adaptive thread pool, event-loop arbitration, and the
//! signal/timeout monitor.

pub mod evloop;
pub mod job;
pub mod monitor;
pub mod pool;
pub mod queue;
pub mod sync;

pub use evloop::{EventManager, EventManagerGuard};
pub use job::{Job, JobCallback, MAX_JOB_ID};
pub use monitor::{safe_call, Signal, UndoStack};
pub use pool::ThreadPool;
pub use queue::JobQueue;
pub use sync::{sched_leave, sched_sync};
