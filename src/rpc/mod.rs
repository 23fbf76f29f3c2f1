//! RPC stub and wire protocol: peer connections exchange length-prefixed
//! binary frames carrying calls, replies, events, describes, and session
//! bookkeeping over a WebSocket or Unix-stream transport.

pub mod frame;
pub mod message;
pub mod opcode;
pub mod stub;
pub mod transport;
pub mod version;

pub use frame::{FrameReader, FrameWriter};
pub use message::Message;
pub use opcode::Opcode;
pub use stub::Stub;
pub use transport::Outgoing;
pub use version::{negotiate, MAGIC, VERSION_MAX, VERSION_MIN};
