//! Safe-call / timeout monitor.
//!
//! The original `afb-sig-monitor.c` runs the callee on an altstack and
//! catches `SIGSEGV`/`SIGALRM` to turn a crash or a hung call into an
//! error reply instead of taking the whole process down. Rust has no
//! signal-based crash recovery story, so this reinterprets the same
//! contract with the tools Rust actually gives us: `catch_unwind` turns a
//! panic into `Signal::Panic`, and `tokio::time::timeout` turns an
//! over-budget call into `Signal::Timeout`. An `UndoStack` lets a caller
//! register cleanup that must run if either fires.

use crate::error::{Error, Kind};
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Timeout,
    Panic,
}

/// LIFO cleanup actions to run if a monitored call is interrupted.
#[derive(Default)]
pub struct UndoStack {
    actions: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl UndoStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, action: Box<dyn FnOnce() + Send>) {
        self.actions.lock().push(action);
    }

    pub fn unwind(&self) {
        let mut actions = self.actions.lock();
        while let Some(action) = actions.pop() {
            action();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.lock().is_empty()
    }
}

/// Run `fut` to completion, catching a panic and optionally enforcing
/// `timeout`. On either failure, runs `undo.unwind()` before returning the
/// corresponding error.
pub async fn safe_call<Fut, T>(timeout: Option<Duration>, undo: &UndoStack, fut: Fut) -> Result<T, Error>
where
    Fut: std::future::Future<Output = T>,
{
    let guarded = AssertUnwindSafe(fut).catch_unwind();
    let outcome = match timeout {
        Some(duration) => match tokio::time::timeout(duration, guarded).await {
            Ok(result) => result,
            Err(_) => {
                undo.unwind();
                return Err(Error::with_detail(Kind::Etimedout, signal_detail(Signal::Timeout)));
            }
        },
        None => guarded.await,
    };
    outcome.map_err(|_| {
        undo.unwind();
        Error::with_detail(Kind::InternalError, signal_detail(Signal::Panic))
    })
}

fn signal_detail(signal: Signal) -> &'static str {
    match signal {
        Signal::Timeout => "call exceeded its timeout",
        Signal::Panic => "call panicked",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn timeout_fires_undo_and_returns_etimedout() {
        let undo = UndoStack::new();
        let fired = Arc::new(AtomicBool::new(false));
        let f2 = fired.clone();
        undo.push(Box::new(move || f2.store(true, Ordering::SeqCst)));

        let result: Result<(), Error> = safe_call(
            Some(Duration::from_millis(5)),
            &undo,
            async { tokio::time::sleep(Duration::from_secs(5)).await },
        )
        .await;

        assert_eq!(result.unwrap_err().kind, Kind::Etimedout);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panic_is_caught_and_fires_undo() {
        let undo = UndoStack::new();
        let fired = Arc::new(AtomicBool::new(false));
        let f2 = fired.clone();
        undo.push(Box::new(move || f2.store(true, Ordering::SeqCst)));

        let result: Result<(), Error> = safe_call(None, &undo, async { panic!("boom") }).await;

        assert_eq!(result.unwrap_err().kind, Kind::InternalError);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn successful_call_leaves_undo_stack_untouched() {
        let undo = UndoStack::new();
        undo.push(Box::new(|| panic!("must not run")));
        let result = safe_call(None, &undo, async { 42 }).await.unwrap();
        assert_eq!(result, 42);
        assert!(!undo.is_empty());
    }
}
