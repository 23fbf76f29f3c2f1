//! Crate-wide error kind and result alias.
//!
//! Every fallible operation in the runtime returns a `Kind` (mapped to a
//! stable numeric constant at the external boundary) rather than aborting
//! the process or panicking.

use thiserror::Error;

/// Stable error kinds, matching the external-boundary taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    OutOfMemory,
    Busy,
    Exists,
    NotFound,
    Invalid,
    TooBig,
    Epipe,
    Eintr,
    Etimedout,
    Eoverflow,
    Eexist,
    Disconnected,
    UnknownApi,
    UnknownVerb,
    BadApiState,
    NotAvailable,
    InvalidToken,
    InsufficientScope,
    InvalidRequest,
    InternalError,
    NoItem,
}

impl Kind {
    /// Stable numeric constant for this kind, for crossing the wire or an FFI boundary.
    pub fn code(self) -> i32 {
        match self {
            Kind::OutOfMemory => -1,
            Kind::Busy => -2,
            Kind::Exists => -3,
            Kind::NotFound => -4,
            Kind::Invalid => -5,
            Kind::TooBig => -6,
            Kind::Epipe => -7,
            Kind::Eintr => -8,
            Kind::Etimedout => -9,
            Kind::Eoverflow => -10,
            Kind::Eexist => -11,
            Kind::Disconnected => -12,
            Kind::UnknownApi => -13,
            Kind::UnknownVerb => -14,
            Kind::BadApiState => -15,
            Kind::NotAvailable => -16,
            Kind::InvalidToken => -17,
            Kind::InsufficientScope => -18,
            Kind::InvalidRequest => -19,
            Kind::InternalError => -20,
            Kind::NoItem => -21,
        }
    }

    /// The string used on the wire protocol's `error` field.
    pub fn wire_name(self) -> &'static str {
        match self {
            Kind::OutOfMemory => "out-of-memory",
            Kind::Busy => "busy",
            Kind::Exists => "exists",
            Kind::NotFound => "not-found",
            Kind::Invalid => "invalid",
            Kind::TooBig => "too-big",
            Kind::Epipe => "broken-pipe",
            Kind::Eintr => "interrupted",
            Kind::Etimedout => "timed-out",
            Kind::Eoverflow => "overflow",
            Kind::Eexist => "already-exists",
            Kind::Disconnected => "disconnected",
            Kind::UnknownApi => "unknown-api",
            Kind::UnknownVerb => "unknown-verb",
            Kind::BadApiState => "bad-api-state",
            Kind::NotAvailable => "not-available",
            Kind::InvalidToken => "invalid-token",
            Kind::InsufficientScope => "insufficient-scope",
            Kind::InvalidRequest => "invalid-request",
            Kind::InternalError => "internal-error",
            Kind::NoItem => "no-item",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// The crate's error type: a `Kind` plus an optional human-readable detail.
#[derive(Debug, Error, Clone)]
#[error("{kind}{}", detail.as_ref().map(|d| format!(": {d}")).unwrap_or_default())]
pub struct Error {
    pub kind: Kind,
    pub detail: Option<String>,
}

impl Error {
    pub fn new(kind: Kind) -> Self {
        Self { kind, detail: None }
    }

    pub fn with_detail(kind: Kind, detail: impl Into<String>) -> Self {
        Self { kind, detail: Some(detail.into()) }
    }
}

impl From<Kind> for Error {
    fn from(kind: Kind) -> Self {
        Error::new(kind)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
