//! Runtime context: the process-wide collection of registries the rest of
//! the crate would otherwise reach through hidden globals. One `Runtime`
//! owns the root [`ApiSet`], the
//! [`SessionSet`], the data-object [`Opacifier`] and [`TypeRegistry`], the
//! [`JobQueue`] + [`ThreadPool`], and the single shared [`EventManager`].
//! Everything else in the crate takes references to the pieces it needs
//! rather than reaching for a singleton.

use crate::data::{Opacifier, TypeRegistry};
use crate::registry::ApiSet;
use crate::sched::{EventManager, JobQueue, ThreadPool};
use crate::session::SessionSet;
use std::sync::Arc;

/// Process tunables. Loaded from CLI args / environment by the binary,
/// not this crate; a config-file loader is out of scope here.
#[derive(Debug, Clone)]
pub struct Config {
    pub max_sessions: usize,
    pub default_session_timeout_secs: i64,
    pub default_api_timeout_secs: u32,
    pub reserve_threads: usize,
    pub max_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_sessions: 200,
            default_session_timeout_secs: 3600,
            default_api_timeout_secs: 30,
            reserve_threads: 4,
            max_threads: num_cpus::get().max(4),
        }
    }
}

/// The process's runtime context: every registry a hosted API or an RPC
/// stub needs to reach, gathered in one place instead of behind globals.
pub struct Runtime {
    pub apiset: Arc<ApiSet>,
    pub sessions: Arc<SessionSet>,
    pub types: Arc<TypeRegistry>,
    pub opacifier: Arc<Opacifier>,
    pub queue: Arc<JobQueue>,
    pub pool: Arc<ThreadPool>,
    pub evmgr: Arc<EventManager>,
}

impl Runtime {
    /// Build a fresh runtime context. Must be called from inside a tokio
    /// runtime (the thread pool borrows the current `Handle`).
    pub fn new(config: &Config) -> Self {
        let queue = Arc::new(JobQueue::new());
        let evmgr = Arc::new(EventManager::new());
        let pool = ThreadPool::new(queue.clone(), evmgr.clone(), config.reserve_threads, config.max_threads);
        Self {
            apiset: ApiSet::new("main", config.default_api_timeout_secs),
            sessions: Arc::new(SessionSet::new(config.max_sessions, config.default_session_timeout_secs)),
            types: Arc::new(TypeRegistry::new()),
            opacifier: Arc::new(Opacifier::new()),
            queue,
            pool,
            evmgr,
        }
    }

    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runtime_builds_with_default_config() {
        let rt = Runtime::new(&Config::default());
        assert_eq!(rt.apiset.name, "main");
        assert_eq!(rt.sessions.len(), 0);
        rt.shutdown();
    }
}
