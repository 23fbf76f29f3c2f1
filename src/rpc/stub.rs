//! RPC stub: client/server-symmetric bookkeeping for one wire connection,
//! plus the client and server call-correlation procedures built on top of
//! it.
//!
//! Grounded on `util::U16IdMap`, shared with the data-object opacifier,
//! capped here at 4095 live ids per the wire protocol's id-field width.

use super::message::Message;
use super::transport::Outgoing;
use crate::error::{Error, Kind};
use crate::registry::ApiSet;
use crate::request::{QueryItf, Request};
use crate::session::{Session, SessionSet};
use crate::util::U16IdMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub const MAX_PENDING: usize = 4095;

/// Starting hop count for an outgoing event broadcast; a stub rebroadcasting
/// an incoming event decrements this, and drops the event instead of
/// forwarding it once it reaches zero.
pub const EVENT_MAX_HOPS: u8 = 8;

type CallReply = (Result<(), Error>, Option<String>, serde_json::Value);

/// Bidirectional event-id <-> name table for one connection, used on
/// whichever side originates `EVT_CREATE`.
#[derive(Default)]
struct EventTable {
    ids: U16IdMap<String>,
    by_name: HashMap<String, u16>,
}

impl EventTable {
    fn new() -> Self {
        Self { ids: U16IdMap::new(MAX_PENDING), by_name: HashMap::new() }
    }

    fn id_for(&mut self, name: &str) -> Result<u16, Error> {
        if let Some(&id) = self.by_name.get(name) {
            return Ok(id);
        }
        let owned = name.to_string();
        let id = self
            .ids
            .insert_with(|_| owned.clone())
            .ok_or_else(|| Error::with_detail(Kind::TooBig, "too many live events"))?;
        self.by_name.insert(owned, id);
        Ok(id)
    }

    fn name_of(&self, id: u16) -> Option<String> {
        self.ids.get(id).cloned()
    }

    fn remove(&mut self, id: u16) {
        if let Some(name) = self.ids.remove(id) {
            self.by_name.remove(&name);
        }
    }
}

/// Per-connection bookkeeping shared by the client and server halves of a
/// stub. One `Stub` binds one peer connection to one local `apiname`.
pub struct Stub {
    pending_calls: Mutex<U16IdMap<oneshot::Sender<CallReply>>>,
    pending_describes: Mutex<U16IdMap<oneshot::Sender<serde_json::Value>>>,
    negotiated_version: AtomicU16,
    events: Mutex<EventTable>,

    // client-side: which locally-held sessions/tokens this link already knows about.
    session_announced: Mutex<HashSet<u16>>,
    token_announced: Mutex<HashSet<u16>>,

    // server-side: peer-announced session/token ids, resolved to local objects.
    peer_sessions: Mutex<HashMap<u16, Arc<Session>>>,
    peer_tokens: Mutex<HashMap<u16, String>>,

    // client-side: event-id -> local delivery channel for `EVT_PUSH` data,
    // installed by whatever code called `subscribe` against a request.
    event_sinks: Mutex<HashMap<u16, mpsc::UnboundedSender<serde_json::Value>>>,
}

impl Default for Stub {
    fn default() -> Self {
        Self::new()
    }
}

impl Stub {
    pub fn new() -> Self {
        Self {
            pending_calls: Mutex::new(U16IdMap::new(MAX_PENDING)),
            pending_describes: Mutex::new(U16IdMap::new(MAX_PENDING)),
            negotiated_version: AtomicU16::new(0),
            events: Mutex::new(EventTable::new()),
            session_announced: Mutex::new(HashSet::new()),
            token_announced: Mutex::new(HashSet::new()),
            peer_sessions: Mutex::new(HashMap::new()),
            peer_tokens: Mutex::new(HashMap::new()),
            event_sinks: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_negotiated_version(&self, v: u16) {
        self.negotiated_version.store(v, Ordering::Relaxed);
    }

    pub fn negotiated_version(&self) -> Option<u16> {
        match self.negotiated_version.load(Ordering::Relaxed) {
            0 => None,
            v => Some(v),
        }
    }

    // ---- pending call / describe bookkeeping -----------------------------

    fn begin_call(&self) -> Result<(u16, oneshot::Receiver<CallReply>), Error> {
        let (tx, rx) = oneshot::channel();
        let id = self
            .pending_calls
            .lock()
            .insert_with(move |_id| tx)
            .ok_or_else(|| Error::with_detail(Kind::TooBig, "too many pending calls"))?;
        Ok((id, rx))
    }

    /// Deliver a `REPLY` frame's payload to the matching pending call.
    pub fn complete_call(&self, id: u16, error: Option<String>, data: serde_json::Value) -> Result<(), Error> {
        let tx = self.pending_calls.lock().remove(id).ok_or_else(|| Error::new(Kind::NotFound))?;
        let status = match &error {
            None => Ok(()),
            Some(name) => Err(kind_from_wire_name(name)),
        };
        let _ = tx.send((status, error, data));
        Ok(())
    }

    pub fn pending_call_count(&self) -> usize {
        self.pending_calls.lock().len()
    }

    fn begin_describe(&self) -> Result<(u16, oneshot::Receiver<serde_json::Value>), Error> {
        let (tx, rx) = oneshot::channel();
        let id = self
            .pending_describes
            .lock()
            .insert_with(move |_id| tx)
            .ok_or_else(|| Error::with_detail(Kind::TooBig, "too many pending describes"))?;
        Ok((id, rx))
    }

    pub fn complete_describe(&self, id: u16, data: serde_json::Value) -> Result<(), Error> {
        let tx = self.pending_describes.lock().remove(id).ok_or_else(|| Error::new(Kind::NotFound))?;
        let _ = tx.send(data);
        Ok(())
    }

    /// Cancel every pending call and describe with a synthetic
    /// `{error:"disconnected"}` reply, and forget every peer-side session,
    /// token, and credentials mapping.
    pub fn hangup(&self) {
        for (_, tx) in self.pending_calls.lock().drain() {
            let _ = tx.send((Err(Error::new(Kind::Disconnected)), Some(Kind::Disconnected.wire_name().to_string()), serde_json::Value::Null));
        }
        for (_, tx) in self.pending_describes.lock().drain() {
            let _ = tx.send(serde_json::Value::Null);
        }
        self.peer_sessions.lock().clear();
        self.peer_tokens.lock().clear();
        self.event_sinks.lock().clear();
    }

    // ---- events -----------------------------------------------------------

    /// Register local delivery for `event_name`, returning a stream of the
    /// `data` payload from every subsequent `EVT_PUSH` the peer sends for
    /// it. Call sites on the client side use this after a subcall has
    /// subscribed a request to the event.
    pub fn client_subscribe_local(&self, event_name: &str) -> Result<tokio_stream::wrappers::UnboundedReceiverStream<serde_json::Value>, Error> {
        let event_id = self.event_id_for(event_name)?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.event_sinks.lock().insert(event_id, tx);
        Ok(tokio_stream::wrappers::UnboundedReceiverStream::new(rx))
    }

    /// Route an incoming `EVT_PUSH` to whichever local sink
    /// `client_subscribe_local` registered for its event id, if any.
    pub fn deliver_push(&self, event_id: u16, data: serde_json::Value) {
        if let Some(tx) = self.event_sinks.lock().get(&event_id) {
            let _ = tx.send(data);
        }
    }

    /// Decrement an incoming event's hop count before rebroadcasting it.
    /// Returns `None` once the decremented count reaches zero, telling the
    /// caller to drop the event instead of forwarding it further (loop
    /// suppression) — the last hop is consumed silently, never sent with
    /// `hop=0`.
    pub fn decrement_hop(hops_left: u8) -> Option<u8> {
        if hops_left == 0 {
            return None;
        }
        let next = hops_left - 1;
        (next > 0).then_some(next)
    }

    fn event_id_for(&self, name: &str) -> Result<u16, Error> {
        self.events.lock().id_for(name)
    }

    fn event_name_of(&self, id: u16) -> Option<String> {
        self.events.lock().name_of(id)
    }

    fn forget_event(&self, id: u16) {
        self.events.lock().remove(id);
    }

    // ---- server-side peer session/token/credentials -----------------------

    pub fn note_peer_session(&self, session_id: u16, session: Arc<Session>) {
        self.peer_sessions.lock().insert(session_id, session);
    }

    pub fn drop_peer_session(&self, session_id: u16) {
        self.peer_sessions.lock().remove(&session_id);
    }

    pub fn peer_session(&self, session_id: u16) -> Option<Arc<Session>> {
        self.peer_sessions.lock().get(&session_id).cloned()
    }

    pub fn note_peer_token(&self, token_id: u16, name: String) {
        self.peer_tokens.lock().insert(token_id, name);
    }

    pub fn drop_peer_token(&self, token_id: u16) {
        self.peer_tokens.lock().remove(&token_id);
    }

    pub fn peer_token(&self, token_id: u16) -> Option<String> {
        self.peer_tokens.lock().get(&token_id).cloned()
    }
}

fn kind_from_wire_name(name: &str) -> Error {
    use crate::error::Kind::*;
    let kind = [
        OutOfMemory, Busy, Exists, NotFound, Invalid, TooBig, Epipe, Eintr, Etimedout, Eoverflow, Eexist,
        Disconnected, UnknownApi, UnknownVerb, BadApiState, NotAvailable, InvalidToken, InsufficientScope,
        InvalidRequest, InternalError, NoItem,
    ]
    .into_iter()
    .find(|k| k.wire_name() == name)
    .unwrap_or(InternalError);
    Error::new(kind)
}

// ---- client-side call procedure ------------------------------

/// `client_call`: reserve a call-id, announce the session/token if this is
/// their first use on this link, write `CALL`, then await the matching
/// `REPLY`. On any write failure the bookkeeping is dropped and an error is
/// returned instead of leaking a pending call.
pub async fn client_call(
    stub: &Stub,
    outgoing: &Outgoing,
    verb: &str,
    args: serde_json::Value,
    session_id: u16,
    token_id: u16,
    user_creds: Option<String>,
) -> Result<(Option<String>, serde_json::Value), Error> {
    let (call_id, rx) = stub.begin_call()?;

    let announce = || -> Result<(), Error> {
        if session_id != 0 && stub.session_announced.lock().insert(session_id) {
            outgoing.send(Message::SessionAdd { session_id, name: None }.encode())?;
        }
        if token_id != 0 && stub.token_announced.lock().insert(token_id) {
            outgoing.send(Message::TokenAdd { token_id, name: None }.encode())?;
        }
        Ok(())
    };

    if let Err(e) = announce().and_then(|_| {
        outgoing.send(Message::Call { call_id, verb: verb.to_string(), session_id, token_id, args, user_creds }.encode())
    }) {
        stub.pending_calls.lock().remove(call_id);
        return Err(e);
    }

    match rx.await {
        Ok((status, error, data)) => status.map(|_| (error, data)),
        Err(_) => Err(Error::new(Kind::Disconnected)),
    }
}

/// `client_describe`: reserve a desc-id, write `DESCRIBE`, await `DESCRIPTION`.
pub async fn client_describe(stub: &Stub, outgoing: &Outgoing) -> Result<serde_json::Value, Error> {
    let (desc_id, rx) = stub.begin_describe()?;
    if let Err(e) = outgoing.send(Message::Describe { desc_id }.encode()) {
        stub.pending_describes.lock().remove(desc_id);
        return Err(e);
    }
    rx.await.map_err(|_| Error::new(Kind::Disconnected))
}

// ---- server-side call handling -------------------------------

/// The server-side `QueryItf`: replies, subscriptions, and unsubscriptions
/// against a request created from an incoming `CALL` are re-serialized back
/// over the link instead of being handled in-process.
struct LinkQueryItf {
    call_id: u16,
    outgoing: Outgoing,
    stub: Arc<Stub>,
}

#[async_trait]
impl QueryItf for LinkQueryItf {
    async fn reply(&self, _request: &Request, status: Result<(), Error>, replies: Vec<serde_json::Value>) {
        let data = replies.into_iter().next().unwrap_or(serde_json::Value::Null);
        let error = status.err().map(|e| e.kind.wire_name().to_string());
        let _ = self.outgoing.send(Message::Reply { call_id: self.call_id, error, info: None, data }.encode());
    }

    fn unref(&self, _request: &Request) {}

    async fn subscribe(&self, _request: &Request, event_name: &str) -> Result<(), Error> {
        let event_id = self.stub.event_id_for(event_name)?;
        self.outgoing.send(Message::EvtSubscribe { call_id: self.call_id, event_id }.encode())
    }

    async fn unsubscribe(&self, _request: &Request, event_name: &str) -> Result<(), Error> {
        let event_id = self.stub.event_id_for(event_name)?;
        self.outgoing.send(Message::EvtUnsubscribe { call_id: self.call_id, event_id }.encode())
    }
}

/// Handle an incoming `CALL`: build a request bound to `apiset`, wired so
/// its reply/subscribe/unsubscribe travel back over `outgoing`, carrying
/// whichever credentials `user_creds` names.
#[allow(clippy::too_many_arguments)]
pub async fn server_handle_call(
    stub: Arc<Stub>,
    apiset: Arc<ApiSet>,
    outgoing: Outgoing,
    bound_apiname: &str,
    call_id: u16,
    verb: &str,
    session_id: u16,
    _token_id: u16,
    args: serde_json::Value,
    user_creds: Option<String>,
) {
    let queryitf: Arc<dyn QueryItf> = Arc::new(LinkQueryItf { call_id, outgoing: outgoing.clone(), stub: stub.clone() });
    let request = Request::new(queryitf, bound_apiname, verb, vec![args]);
    if let Some(session) = (session_id != 0).then(|| stub.peer_session(session_id)).flatten() {
        request.set_session(session);
    }

    let result = match user_creds {
        Some(creds) => apiset.process_on_behalf(request.clone(), &creds).await,
        None => apiset.process(request.clone()).await,
    };
    if let Err(e) = result {
        let _ = outgoing.send(
            Message::Reply { call_id, error: Some(e.kind.wire_name().to_string()), info: e.detail, data: serde_json::Value::Null }
                .encode(),
        );
    }
}

/// Handle an incoming `SESSION_ADD`: resolve `session_id` against the local
/// `SessionSet` (by convention the announced name carries the session
/// uuid) and remember the mapping for subsequent `CALL`s on this link.
pub fn server_handle_session_add(stub: &Stub, sessions: &SessionSet, session_id: u16, name: Option<String>) -> Result<(), Error> {
    let uuid = name.ok_or_else(|| Error::with_detail(Kind::InvalidRequest, "SESSION_ADD missing uuid"))?;
    let session = sessions.get_or_create(&uuid, None, false)?;
    stub.note_peer_session(session_id, session);
    Ok(())
}

pub fn server_handle_session_drop(stub: &Stub, session_id: u16) {
    stub.drop_peer_session(session_id);
}

pub fn server_handle_token_add(stub: &Stub, token_id: u16, name: Option<String>) {
    if let Some(name) = name {
        stub.note_peer_token(token_id, name);
    }
}

pub fn server_handle_token_drop(stub: &Stub, token_id: u16) {
    stub.drop_peer_token(token_id);
}

/// Handle an incoming `DESCRIBE`: ask `apiset` for the bound API's
/// description JSON and reply `DESCRIPTION`.
pub async fn server_handle_describe(apiset: &Arc<ApiSet>, apiname: &str, outgoing: &Outgoing, desc_id: u16) -> Result<(), Error> {
    let desc = apiset.get_api(apiname, true, false).await?;
    let mut data = desc.imp.describe();
    if let serde_json::Value::Object(ref mut map) = data {
        map.entry("name").or_insert_with(|| serde_json::Value::String(desc.name.clone()));
    }
    outgoing.send(Message::Description { desc_id, data }.encode())
}

/// Handle an incoming `EVT_UNEXPECTED`: the peer has no record of
/// `event_id`; forget it locally too so a future push doesn't keep hitting
/// the same dead mapping.
pub fn server_handle_evt_unexpected(stub: &Stub, event_id: u16) {
    stub.forget_event(event_id);
}

/// Decide whether to rebroadcast an incoming `EVT_BROADCAST`: `None` means
/// drop it (hops exhausted), `Some(next_hop)` means forward with that hop
/// count.
pub fn rebroadcast_hop(incoming_hop: u8) -> Option<u8> {
    Stub::decrement_hop(incoming_hop)
}
