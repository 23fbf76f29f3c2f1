//! WebSocket transport for the RPC stub.
//!
//! `accept_async` a connection, split it into a read half and a write
//! half, forward a channel of outgoing frames to the write half from its
//! own task, and drain incoming `Message::Binary` frames on the read half.

use super::message::Message;
use super::stub::{self, Stub};
use super::version::{negotiate_from_offer, VERSION_MAX, VERSION_MIN};
use crate::error::{Error, Kind};
use crate::registry::ApiSet;
use crate::session::SessionSet;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

/// One live connection's outgoing-frame sender, handed to whatever code
/// needs to push frames (call replies, event broadcasts) to this peer.
#[derive(Clone)]
pub struct Outgoing(mpsc::UnboundedSender<Vec<u8>>);

impl Outgoing {
    pub fn send(&self, frame: Vec<u8>) -> Result<(), Error> {
        self.0.send(frame).map_err(|_| Error::new(Kind::Disconnected))
    }
}

/// Accept one TCP connection, upgrade it to a WebSocket, perform the
/// version handshake as the server side, then serve `CALL`/`DESCRIBE`/
/// session-and-token-announce frames against `apiset` under `bound_apiname`
/// until the peer disconnects.
pub async fn accept_and_serve(
    tcp: TcpStream,
    apiset: Arc<ApiSet>,
    sessions: Arc<SessionSet>,
    bound_apiname: String,
) -> Result<(), Error> {
    let ws = tokio_tungstenite::accept_async(tcp)
        .await
        .map_err(|e| Error::with_detail(Kind::InvalidRequest, format!("websocket handshake failed: {e}")))?;
    serve(ws, apiset, sessions, bound_apiname).await
}

/// Drive one accepted WebSocket connection as the server side of a stub.
pub async fn serve(
    stream: WebSocketStream<TcpStream>,
    apiset: Arc<ApiSet>,
    sessions: Arc<SessionSet>,
    bound_apiname: String,
) -> Result<(), Error> {
    let (mut write, mut read) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let outgoing = Outgoing(tx);

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if write.send(WsMessage::Binary(frame)).await.is_err() {
                break;
            }
        }
    });

    let stub = Arc::new(Stub::new());

    // Version handshake: the first frame must be VERSION_OFFER; both ends
    // refuse any non-version message before a version is set.
    let handshake_ok = match read.next().await {
        Some(Ok(WsMessage::Binary(bytes))) => match Message::decode(&bytes) {
            Ok(Message::VersionOffer { magic, versions }) => {
                match negotiate_from_offer(VERSION_MIN, VERSION_MAX, magic, &versions) {
                    Ok(v) => {
                        stub.set_negotiated_version(v as u16);
                        outgoing.send(Message::VersionSet { version: v as u8 }.encode()).is_ok()
                    }
                    Err(_) => false,
                }
            }
            _ => false,
        },
        _ => false,
    };

    if !handshake_ok {
        writer_task.abort();
        return Err(Error::with_detail(Kind::InvalidRequest, "version handshake failed"));
    }

    while let Some(msg) = read.next().await {
        let bytes = match msg {
            Ok(WsMessage::Binary(bytes)) => bytes,
            Ok(WsMessage::Close(_)) | Err(_) => break,
            _ => continue,
        };
        let Ok(message) = Message::decode(&bytes) else { continue };
        dispatch_server_message(&stub, &apiset, &sessions, &outgoing, &bound_apiname, message).await;
    }

    stub.hangup();
    writer_task.abort();
    Ok(())
}

async fn dispatch_server_message(
    stub: &Arc<Stub>,
    apiset: &Arc<ApiSet>,
    sessions: &Arc<SessionSet>,
    outgoing: &Outgoing,
    bound_apiname: &str,
    message: Message,
) {
    match message {
        Message::Call { call_id, verb, session_id, token_id, args, user_creds } => {
            let stub = stub.clone();
            let apiset = apiset.clone();
            let outgoing = outgoing.clone();
            let bound_apiname = bound_apiname.to_string();
            tokio::spawn(async move {
                stub::server_handle_call(stub, apiset, outgoing, &bound_apiname, call_id, &verb, session_id, token_id, args, user_creds)
                    .await;
            });
        }
        Message::Describe { desc_id } => {
            let _ = stub::server_handle_describe(apiset, bound_apiname, outgoing, desc_id).await;
        }
        Message::SessionAdd { session_id, name } => {
            let _ = stub::server_handle_session_add(stub, sessions, session_id, name);
        }
        Message::SessionDrop { session_id, .. } => {
            stub::server_handle_session_drop(stub, session_id);
        }
        Message::TokenAdd { token_id, name } => {
            stub::server_handle_token_add(stub, token_id, name);
        }
        Message::TokenDrop { token_id, .. } => {
            stub::server_handle_token_drop(stub, token_id);
        }
        Message::EvtUnexpected { event_id } => {
            stub::server_handle_evt_unexpected(stub, event_id);
        }
        // The remaining opcodes are server->client only; a well-behaved peer
        // never sends them to us. Ignore rather than hang up, matching the
        // codec's tolerance for a bad frame elsewhere in this loop.
        _ => {}
    }
}

/// Connect to `url` as the client side of a stub: perform the WebSocket
/// upgrade, offer `local_min..=local_max`, await the server's `VERSION_SET`,
/// then spawn the background tasks that forward outgoing frames and route
/// incoming `REPLY`/`DESCRIPTION`/event frames into the returned `Stub`.
/// Returns once the handshake completes; the connection keeps running in
/// its spawned tasks until the peer disconnects.
pub async fn connect_client(url: &str, local_min: u16, local_max: u16) -> Result<(Arc<Stub>, Outgoing), Error> {
    let (stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| Error::with_detail(Kind::InvalidRequest, format!("websocket connect failed: {e}")))?;
    let (mut write, mut read) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let outgoing = Outgoing(tx);

    let offer = (local_min..=local_max).map(|v| v as u8).collect::<Vec<_>>();
    write
        .send(WsMessage::Binary(super::message::version_offer(&offer)?.encode()))
        .await
        .map_err(|e| Error::with_detail(Kind::Disconnected, format!("{e}")))?;

    let negotiated = match read.next().await {
        Some(Ok(WsMessage::Binary(bytes))) => match Message::decode(&bytes) {
            Ok(Message::VersionSet { version }) => version as u16,
            _ => return Err(Error::with_detail(Kind::InvalidRequest, "server did not reply VERSION_SET")),
        },
        _ => return Err(Error::new(Kind::Disconnected)),
    };

    let stub = Arc::new(Stub::new());
    stub.set_negotiated_version(negotiated);

    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if write.send(WsMessage::Binary(frame)).await.is_err() {
                break;
            }
        }
    });

    let client_stub = stub.clone();
    tokio::spawn(async move {
        while let Some(msg) = read.next().await {
            let bytes = match msg {
                Ok(WsMessage::Binary(bytes)) => bytes,
                Ok(WsMessage::Close(_)) | Err(_) => break,
                _ => continue,
            };
            let Ok(message) = Message::decode(&bytes) else { continue };
            dispatch_client_message(&client_stub, message);
        }
        client_stub.hangup();
    });

    Ok((stub, outgoing))
}

fn dispatch_client_message(stub: &Arc<Stub>, message: Message) {
    match message {
        Message::Reply { call_id, error, data, .. } => {
            let _ = stub.complete_call(call_id, error, data);
        }
        Message::Description { desc_id, data } => {
            let _ = stub.complete_describe(desc_id, data);
        }
        Message::EvtPush { event_id, data } => {
            stub.deliver_push(event_id, data);
        }
        // `EVT_CREATE`/`EVT_REMOVE` and broadcast rebroadcast are a thin demo
        // client's concern only once it actually subscribes to something;
        // nothing further to route here without a registered event sink.
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ApiDescriptor, ApiImpl};
    use crate::request::Request;
    use async_trait::async_trait;

    #[test]
    fn outgoing_send_after_receiver_drop_is_disconnected() {
        let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();
        drop(rx);
        let outgoing = Outgoing(tx);
        assert_eq!(outgoing.send(vec![1, 2, 3]).unwrap_err().kind, Kind::Disconnected);
    }

    struct PingApi;

    #[async_trait]
    impl ApiImpl for PingApi {
        async fn process(&self, req: Arc<Request>) {
            req.reply(Ok(()), vec![serde_json::json!("pong")]).await;
        }
    }

    /// Drives one `CALL`/`REPLY` exchange over the codec end to end without
    /// any real socket: two stubs talk through a pair of in-memory frame
    /// channels, each side decoding exactly the bytes the other encoded.
    #[tokio::test]
    async fn call_and_reply_round_trip_over_paired_channels() {
        let apiset = ApiSet::new("test", 0);
        apiset.add("pinger", ApiDescriptor::new("pinger", Arc::new(PingApi), None)).unwrap();
        apiset.start_all_services().await.unwrap();
        let sessions = Arc::new(SessionSet::new(10));

        let (c2s_tx, mut c2s_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (s2c_tx, mut s2c_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let client_outgoing = Outgoing(c2s_tx);
        let server_outgoing = Outgoing(s2c_tx);

        let server_stub = Arc::new(Stub::new());
        let client_stub = Arc::new(Stub::new());

        let server_task = tokio::spawn({
            let apiset = apiset.clone();
            let sessions = sessions.clone();
            let server_stub = server_stub.clone();
            async move {
                let bytes = c2s_rx.recv().await.unwrap();
                let message = Message::decode(&bytes).unwrap();
                dispatch_server_message(&server_stub, &apiset, &sessions, &server_outgoing, "pinger", message).await;
            }
        });

        let client_task = tokio::spawn({
            let client_stub = client_stub.clone();
            async move {
                let bytes = s2c_rx.recv().await.unwrap();
                let message = Message::decode(&bytes).unwrap();
                dispatch_client_message(&client_stub, message);
            }
        });

        let (error, data) = stub::client_call(&client_stub, &client_outgoing, "ping", serde_json::Value::Null, 0, 0, None)
            .await
            .unwrap();

        server_task.await.unwrap();
        client_task.await.unwrap();
        assert!(error.is_none());
        assert_eq!(data, serde_json::json!("pong"));
    }
}
