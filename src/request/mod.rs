//! The common request object: the single per-call context threaded through
//! an API's `process` implementation, brokering replies back to whichever
//! transport (RPC stub, local caller, on-behalf-of subcall) issued the call.

use crate::error::{Error, Kind};
use crate::session::{Credentials, Session};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Depth of the per-request async subcall stack.
pub const ASYNC_STACK_CAPACITY: usize = 7;

/// What a transport needs to implement to receive replies, subscriptions,
/// and unsubscriptions raised against a request it issued. The RPC stub and any in-process direct caller both
/// implement this.
#[async_trait]
pub trait QueryItf: Send + Sync {
    async fn reply(&self, request: &Request, status: Result<(), Error>, replies: Vec<serde_json::Value>);

    /// Called exactly once when the request's last reference is dropped.
    fn unref(&self, request: &Request);

    async fn subscribe(&self, request: &Request, event_name: &str) -> Result<(), Error>;

    async fn unsubscribe(&self, request: &Request, event_name: &str) -> Result<(), Error>;
}

struct Context {
    session: Option<Arc<Session>>,
    token: Option<String>,
    credentials: Option<Arc<Credentials>>,
}

/// A single in-flight API call.
pub struct Request {
    pub apiname: String,
    pub verbname: String,
    pub parameters: Vec<serde_json::Value>,
    queryitf: Arc<dyn QueryItf>,
    context: Mutex<Context>,
    refcount: AtomicUsize,
    replied: AtomicBool,
    closing: AtomicBool,
    validated: AtomicBool,
    stack: Mutex<Vec<serde_json::Value>>,
}

impl Request {
    pub fn new(
        queryitf: Arc<dyn QueryItf>,
        apiname: impl Into<String>,
        verbname: impl Into<String>,
        parameters: Vec<serde_json::Value>,
    ) -> Arc<Self> {
        Arc::new(Self {
            apiname: apiname.into(),
            verbname: verbname.into(),
            parameters,
            queryitf,
            context: Mutex::new(Context { session: None, token: None, credentials: None }),
            refcount: AtomicUsize::new(1),
            replied: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            validated: AtomicBool::new(false),
            stack: Mutex::new(Vec::with_capacity(ASYNC_STACK_CAPACITY)),
        })
    }

    pub fn addref(&self) -> usize {
        self.refcount.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop a reference. If this was the last one and no reply was ever
    /// sent, synthesizes an `InternalError` reply so the caller's transport
    /// never hangs waiting on a dropped request.
    pub async fn unref(self: &Arc<Self>) {
        let prev = self.refcount.fetch_sub(1, Ordering::AcqRel);
        if prev != 1 {
            return;
        }
        if !self.replied.swap(true, Ordering::AcqRel) {
            self.queryitf
                .reply(self, Err(Error::new(Kind::InternalError)), Vec::new())
                .await;
        }
        self.queryitf.unref(self);
    }

    pub fn set_session(&self, session: Arc<Session>) {
        self.context.lock().session = Some(session);
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        self.context.lock().session.clone()
    }

    pub fn set_token(&self, token: impl Into<String>) {
        self.context.lock().token = Some(token.into());
    }

    pub fn token(&self) -> Option<String> {
        self.context.lock().token.clone()
    }

    pub fn set_cred(&self, cred: Arc<Credentials>) {
        self.context.lock().credentials = Some(cred);
    }

    pub fn credentials(&self) -> Option<Arc<Credentials>> {
        self.context.lock().credentials.clone()
    }

    pub fn set_validated(&self, v: bool) {
        self.validated.store(v, Ordering::Relaxed);
    }

    pub fn is_validated(&self) -> bool {
        self.validated.load(Ordering::Relaxed)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Relaxed)
    }

    pub fn is_replied(&self) -> bool {
        self.replied.load(Ordering::Relaxed)
    }

    /// Send the (single) reply for this request. A second call is a no-op:
    /// a request may be replied exactly once.
    pub async fn reply(&self, status: Result<(), Error>, replies: Vec<serde_json::Value>) {
        if self.replied.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queryitf.reply(self, status, replies).await;
    }

    pub async fn subscribe(&self, event_name: &str) -> Result<(), Error> {
        self.queryitf.subscribe(self, event_name).await
    }

    pub async fn unsubscribe(&self, event_name: &str) -> Result<(), Error> {
        self.queryitf.unsubscribe(self, event_name).await
    }

    /// Push a value onto the request's bounded async-subcall stack.
    /// Fails with `TooBig` past `ASYNC_STACK_CAPACITY`.
    pub fn push(&self, value: serde_json::Value) -> Result<(), Error> {
        let mut stack = self.stack.lock();
        if stack.len() >= ASYNC_STACK_CAPACITY {
            return Err(Error::with_detail(Kind::TooBig, "async stack full"));
        }
        stack.push(value);
        Ok(())
    }

    /// Push two values as one frame.
    pub fn push2(&self, a: serde_json::Value, b: serde_json::Value) -> Result<(), Error> {
        let mut stack = self.stack.lock();
        if stack.len() + 2 > ASYNC_STACK_CAPACITY {
            return Err(Error::with_detail(Kind::TooBig, "async stack full"));
        }
        stack.push(a);
        stack.push(b);
        Ok(())
    }

    pub fn pop(&self) -> Option<serde_json::Value> {
        self.stack.lock().pop()
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct Recorder {
        replies: StdMutex<Vec<(bool, usize)>>,
        unrefed: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl QueryItf for Recorder {
        async fn reply(&self, _req: &Request, status: Result<(), Error>, replies: Vec<serde_json::Value>) {
            self.replies.lock().unwrap().push((status.is_ok(), replies.len()));
        }
        fn unref(&self, _req: &Request) {
            self.unrefed.store(true, Ordering::SeqCst);
        }
        async fn subscribe(&self, _req: &Request, _event_name: &str) -> Result<(), Error> {
            Ok(())
        }
        async fn unsubscribe(&self, _req: &Request, _event_name: &str) -> Result<(), Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn dropping_last_ref_without_reply_synthesizes_internal_error() {
        let rec = Arc::new(Recorder { replies: StdMutex::new(Vec::new()), unrefed: Default::default() });
        let req = Request::new(rec.clone(), "api", "verb", vec![]);
        req.unref().await;
        assert_eq!(*rec.replies.lock().unwrap(), vec![(false, 0)]);
        assert!(rec.unrefed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn explicit_reply_then_unref_does_not_double_reply() {
        let rec = Arc::new(Recorder { replies: StdMutex::new(Vec::new()), unrefed: Default::default() });
        let req = Request::new(rec.clone(), "api", "verb", vec![]);
        req.reply(Ok(()), vec![serde_json::json!(1)]).await;
        req.reply(Ok(()), vec![serde_json::json!(2)]).await;
        req.unref().await;
        assert_eq!(*rec.replies.lock().unwrap(), vec![(true, 1)]);
    }

    #[test]
    fn async_stack_rejects_past_capacity() {
        let rec = Arc::new(Recorder { replies: StdMutex::new(Vec::new()), unrefed: Default::default() });
        let req = Request::new(rec, "api", "verb", vec![]);
        for _ in 0..ASYNC_STACK_CAPACITY {
            req.push(serde_json::json!(null)).unwrap();
        }
        assert!(req.push(serde_json::json!(null)).is_err());
        assert_eq!(req.stack_depth(), ASYNC_STACK_CAPACITY);
    }
}
