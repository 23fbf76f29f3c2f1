//! Peer/client credentials, reference-counted via `Arc`.

use crate::error::Error;
use crate::util::ExportedCred;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
    pub user: String,
    pub label: String,
    pub id: u32,
    pub exported: String,
}

impl Credentials {
    /// Build from a connected socket's peer credentials (`SO_PEERCRED` on
    /// Unix stream sockets). The OS-level lookup itself is an
    /// external collaborator's job; this takes the already-resolved fields.
    pub fn from_peer(uid: u32, gid: u32, pid: u32, user: impl Into<String>, label: impl Into<String>) -> Self {
        let user = user.into();
        let label = label.into();
        let exported = ExportedCred { uid, gid, pid, label: label.clone() }.format();
        Self {
            uid,
            gid,
            pid,
            user,
            label,
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            exported,
        }
    }

    /// Build from an on-behalf-of exported string.
    pub fn from_exported(s: &str) -> Result<Self, Error> {
        let parsed = ExportedCred::parse(s)?;
        Ok(Self {
            uid: parsed.uid,
            gid: parsed.gid,
            pid: parsed.pid,
            user: String::new(),
            label: parsed.label,
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            exported: s.to_string(),
        })
    }
}
