//! Typed wire messages: one variant per opcode, with exact field order and
//! width per opcode. `encode`/`decode` are the only
//! places that know the byte layout; the rest of the stub works with this
//! enum.

use super::frame::{FrameReader, FrameWriter};
use super::opcode::Opcode;
use crate::error::{Error, Kind};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `K` C→S: a remote call.
    Call { call_id: u16, verb: String, session_id: u16, token_id: u16, args: Value, user_creds: Option<String> },
    /// `k` S→C: the (single) reply to a call.
    Reply { call_id: u16, error: Option<String>, info: Option<String>, data: Value },
    /// `B` S→C: an event broadcast, subject to hop decay.
    EvtBroadcast { name: String, data: Value, uuid: [u8; 16], hop: u8 },
    /// `E` S→C: a new event was created and assigned `event_id`.
    EvtCreate { event_id: u16, name: String },
    /// `e` S→C: an event no longer exists.
    EvtRemove { event_id: u16 },
    /// `P` S→C: a push of data on a specific event.
    EvtPush { event_id: u16, data: Value },
    /// `X` S→C: the request behind `call_id` is now subscribed to `event_id`.
    EvtSubscribe { call_id: u16, event_id: u16 },
    /// `x` S→C: the request behind `call_id` unsubscribed from `event_id`.
    EvtUnsubscribe { call_id: u16, event_id: u16 },
    /// `U` C→S: the peer received a push for an event it does not know.
    EvtUnexpected { event_id: u16 },
    /// `D` C→S: ask for the bound API's description.
    Describe { desc_id: u16 },
    /// `d` S→C: the description reply.
    Description { desc_id: u16, data: Value },
    /// `T` C→S: announce a token this link will use, by local id.
    TokenAdd { token_id: u16, name: Option<String> },
    /// `t` C→S: retract a previously announced token.
    TokenDrop { token_id: u16, name: Option<String> },
    /// `S` C→S: announce a session this link will use, by local id.
    SessionAdd { session_id: u16, name: Option<String> },
    /// `s` C→S: retract a previously announced session.
    SessionDrop { session_id: u16, name: Option<String> },
    /// `V` C→S: offer the versions this end supports.
    VersionOffer { magic: u32, versions: Vec<u8> },
    /// `v` S→C: the version picked from the offer.
    VersionSet { version: u8 },
}

impl Message {
    pub fn opcode(&self) -> Opcode {
        match self {
            Message::Call { .. } => Opcode::Call,
            Message::Reply { .. } => Opcode::Reply,
            Message::EvtBroadcast { .. } => Opcode::EvtBroadcast,
            Message::EvtCreate { .. } => Opcode::EvtCreate,
            Message::EvtRemove { .. } => Opcode::EvtRemove,
            Message::EvtPush { .. } => Opcode::EvtPush,
            Message::EvtSubscribe { .. } => Opcode::EvtSubscribe,
            Message::EvtUnsubscribe { .. } => Opcode::EvtUnsubscribe,
            Message::EvtUnexpected { .. } => Opcode::EvtUnexpected,
            Message::Describe { .. } => Opcode::Describe,
            Message::Description { .. } => Opcode::Description,
            Message::TokenAdd { .. } => Opcode::TokenAdd,
            Message::TokenDrop { .. } => Opcode::TokenDrop,
            Message::SessionAdd { .. } => Opcode::SessionAdd,
            Message::SessionDrop { .. } => Opcode::SessionDrop,
            Message::VersionOffer { .. } => Opcode::VersionOffer,
            Message::VersionSet { .. } => Opcode::VersionSet,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = FrameWriter::new(self.opcode());
        match self {
            Message::Call { call_id, verb, session_id, token_id, args, user_creds } => {
                w.put_u16(*call_id)
                    .put_str(verb)
                    .put_u16(*session_id)
                    .put_u16(*token_id)
                    .put_json(args)
                    .put_nul_str(user_creds.as_deref());
            }
            Message::Reply { call_id, error, info, data } => {
                w.put_u16(*call_id)
                    .put_nul_str(error.as_deref())
                    .put_nul_str(info.as_deref())
                    .put_json(data);
            }
            Message::EvtBroadcast { name, data, uuid, hop } => {
                w.put_str(name).put_json(data).put_bytes16(uuid).put_u8(*hop);
            }
            Message::EvtCreate { event_id, name } => {
                w.put_u16(*event_id).put_str(name);
            }
            Message::EvtRemove { event_id } => {
                w.put_u16(*event_id);
            }
            Message::EvtPush { event_id, data } => {
                w.put_u16(*event_id).put_json(data);
            }
            Message::EvtSubscribe { call_id, event_id } => {
                w.put_u16(*call_id).put_u16(*event_id);
            }
            Message::EvtUnsubscribe { call_id, event_id } => {
                w.put_u16(*call_id).put_u16(*event_id);
            }
            Message::EvtUnexpected { event_id } => {
                w.put_u16(*event_id);
            }
            Message::Describe { desc_id } => {
                w.put_u16(*desc_id);
            }
            Message::Description { desc_id, data } => {
                w.put_u16(*desc_id).put_json(data);
            }
            Message::TokenAdd { token_id, name } => {
                w.put_u16(*token_id).put_nul_str(name.as_deref());
            }
            Message::TokenDrop { token_id, name } => {
                w.put_u16(*token_id).put_nul_str(name.as_deref());
            }
            Message::SessionAdd { session_id, name } => {
                w.put_u16(*session_id).put_nul_str(name.as_deref());
            }
            Message::SessionDrop { session_id, name } => {
                w.put_u16(*session_id).put_nul_str(name.as_deref());
            }
            Message::VersionOffer { magic, versions } => {
                w.put_u32(*magic).put_u8(versions.len() as u8);
                for v in versions {
                    w.put_u8(*v);
                }
            }
            Message::VersionSet { version } => {
                w.put_u8(*version);
            }
        }
        w.into_bytes()
    }

    pub fn decode(raw: &[u8]) -> Result<Self, Error> {
        let mut r = FrameReader::parse(raw)?;
        Ok(match r.opcode() {
            Opcode::Call => Message::Call {
                call_id: r.get_u16()?,
                verb: r.get_str()?,
                session_id: r.get_u16()?,
                token_id: r.get_u16()?,
                args: r.get_json()?,
                user_creds: r.get_nul_str()?,
            },
            Opcode::Reply => Message::Reply {
                call_id: r.get_u16()?,
                error: r.get_nul_str()?,
                info: r.get_nul_str()?,
                data: r.get_json()?,
            },
            Opcode::EvtBroadcast => Message::EvtBroadcast {
                name: r.get_str()?,
                data: r.get_json()?,
                uuid: r.get_bytes16()?,
                hop: r.get_u8()?,
            },
            Opcode::EvtCreate => Message::EvtCreate { event_id: r.get_u16()?, name: r.get_str()? },
            Opcode::EvtRemove => Message::EvtRemove { event_id: r.get_u16()? },
            Opcode::EvtPush => Message::EvtPush { event_id: r.get_u16()?, data: r.get_json()? },
            Opcode::EvtSubscribe => Message::EvtSubscribe { call_id: r.get_u16()?, event_id: r.get_u16()? },
            Opcode::EvtUnsubscribe => Message::EvtUnsubscribe { call_id: r.get_u16()?, event_id: r.get_u16()? },
            Opcode::EvtUnexpected => Message::EvtUnexpected { event_id: r.get_u16()? },
            Opcode::Describe => Message::Describe { desc_id: r.get_u16()? },
            Opcode::Description => Message::Description { desc_id: r.get_u16()?, data: r.get_json()? },
            Opcode::TokenAdd => Message::TokenAdd { token_id: r.get_u16()?, name: r.get_nul_str()? },
            Opcode::TokenDrop => Message::TokenDrop { token_id: r.get_u16()?, name: r.get_nul_str()? },
            Opcode::SessionAdd => Message::SessionAdd { session_id: r.get_u16()?, name: r.get_nul_str()? },
            Opcode::SessionDrop => Message::SessionDrop { session_id: r.get_u16()?, name: r.get_nul_str()? },
            Opcode::VersionOffer => {
                let magic = r.get_u32()?;
                let count = r.get_u8()? as usize;
                let mut versions = Vec::with_capacity(count);
                for _ in 0..count {
                    versions.push(r.get_u8()?);
                }
                Message::VersionOffer { magic, versions }
            }
            Opcode::VersionSet => Message::VersionSet { version: r.get_u8()? },
        })
    }

    /// `true` for the handshake pair the wire protocol requires before any
    /// other opcode.
    pub fn is_version_handshake(&self) -> bool {
        self.opcode().is_version_handshake()
    }
}

/// Builds a `VERSION_OFFER` message, rejecting an empty version list up
/// front.
pub fn version_offer(versions: &[u8]) -> Result<Message, Error> {
    if versions.is_empty() {
        return Err(Error::with_detail(Kind::InvalidRequest, "version offer must not be empty"));
    }
    Ok(Message::VersionOffer { magic: super::version::MAGIC, versions: versions.to_vec() })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: Message) {
        let bytes = msg.encode();
        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn call_roundtrips() {
        roundtrip(Message::Call {
            call_id: 7,
            verb: "ping".into(),
            session_id: 1,
            token_id: 0,
            args: serde_json::json!({"x": 1}),
            user_creds: Some("3e8:3e8:2a-unconfined".into()),
        });
    }

    #[test]
    fn reply_with_no_error_roundtrips() {
        roundtrip(Message::Reply { call_id: 7, error: None, info: None, data: serde_json::json!({"ok": true}) });
    }

    #[test]
    fn evt_broadcast_roundtrips_with_hop() {
        roundtrip(Message::EvtBroadcast {
            name: "topic".into(),
            data: serde_json::json!(42),
            uuid: [9u8; 16],
            hop: 3,
        });
    }

    #[test]
    fn version_offer_rejects_empty() {
        assert!(version_offer(&[]).is_err());
    }

    #[test]
    fn version_offer_and_set_roundtrip() {
        roundtrip(version_offer(&[1, 2, 3]).unwrap());
        roundtrip(Message::VersionSet { version: 2 });
    }

    #[test]
    fn token_and_session_announce_roundtrip_without_name() {
        roundtrip(Message::SessionAdd { session_id: 4, name: None });
        roundtrip(Message::TokenDrop { token_id: 5, name: Some("admin".into()) });
    }
}
