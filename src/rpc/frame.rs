//! Binary frame codec: a single opcode byte followed by a flat field list.
//! Little-endian primitives throughout; strings are
//! `u32 length-including-nul | bytes | nul-byte`; JSON values ride as
//! strings. A `nul-str` is the same string encoding but may be empty,
//! which callers model as `Option<&str>` / `Option<String>`.

use super::opcode::Opcode;
use crate::error::{Error, Kind};

/// Builds one outgoing frame's byte payload (opcode + fields), to be sent
/// as a single WebSocket binary message.
pub struct FrameWriter {
    opcode: Opcode,
    body: Vec<u8>,
}

impl FrameWriter {
    pub fn new(opcode: Opcode) -> Self {
        Self { opcode, body: Vec::new() }
    }

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.body.push(v);
        self
    }

    pub fn put_u16(&mut self, v: u16) -> &mut Self {
        self.body.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.body.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// `u32 length-including-nul | bytes | nul-byte`.
    pub fn put_str(&mut self, s: &str) -> &mut Self {
        let bytes = s.as_bytes();
        self.put_u32(bytes.len() as u32 + 1);
        self.body.extend_from_slice(bytes);
        self.body.push(0);
        self
    }

    /// Same encoding as `put_str`, but `None` writes an empty string —
    /// the wire protocol's `nul-str` fields (`error`, `info`, `user-creds`).
    pub fn put_nul_str(&mut self, s: Option<&str>) -> &mut Self {
        self.put_str(s.unwrap_or(""))
    }

    pub fn put_json(&mut self, v: &serde_json::Value) -> &mut Self {
        self.put_str(&v.to_string())
    }

    /// The `uuid:16B` field on `EVT_BROADCAST`.
    pub fn put_bytes16(&mut self, b: &[u8; 16]) -> &mut Self {
        self.body.extend_from_slice(b);
        self
    }

    /// Finished frame: `[opcode:1][body...]`. The transport is responsible
    /// for its own message boundary (a WebSocket binary message already
    /// carries one).
    pub fn into_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.body.len());
        out.push(self.opcode.byte());
        out.extend_from_slice(&self.body);
        out
    }
}

/// Reads fields back out of a received frame in the same order they were
/// written.
pub struct FrameReader<'a> {
    opcode: Opcode,
    body: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    pub fn parse(raw: &'a [u8]) -> Result<Self, Error> {
        let (&first, rest) = raw.split_first().ok_or_else(|| Error::new(Kind::Invalid))?;
        Ok(Self { opcode: Opcode::from_byte(first)?, body: rest, pos: 0 })
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.pos + n > self.body.len() {
            return Err(Error::with_detail(Kind::Invalid, "frame truncated"));
        }
        let slice = &self.body[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, Error> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn get_u32(&mut self) -> Result<u32, Error> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    /// `u32 length-including-nul | bytes | nul-byte`.
    pub fn get_str(&mut self) -> Result<String, Error> {
        let len = self.get_u32()? as usize;
        if len == 0 {
            return Err(Error::with_detail(Kind::Invalid, "string field missing nul terminator"));
        }
        let raw = self.take(len)?;
        let (body, nul) = raw.split_at(len - 1);
        if nul != [0] {
            return Err(Error::with_detail(Kind::Invalid, "string field not nul-terminated"));
        }
        String::from_utf8(body.to_vec()).map_err(|_| Error::with_detail(Kind::Invalid, "non-utf8 string field"))
    }

    /// A `nul-str`: an optional string field, empty decodes to `None`.
    pub fn get_nul_str(&mut self) -> Result<Option<String>, Error> {
        let s = self.get_str()?;
        Ok(if s.is_empty() { None } else { Some(s) })
    }

    pub fn get_json(&mut self) -> Result<serde_json::Value, Error> {
        let s = self.get_str()?;
        serde_json::from_str(&s).map_err(|e| Error::with_detail(Kind::Invalid, format!("bad json field: {e}")))
    }

    pub fn get_bytes16(&mut self) -> Result<[u8; 16], Error> {
        self.take(16)?.try_into().map_err(|_| Error::new(Kind::Invalid))
    }

    pub fn remaining(&self) -> usize {
        self.body.len() - self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_every_field_kind() {
        let mut w = FrameWriter::new(Opcode::Call);
        w.put_u16(42)
            .put_str("hello")
            .put_nul_str(None)
            .put_json(&serde_json::json!({"a": 1}))
            .put_bytes16(&[7u8; 16]);
        let bytes = w.into_bytes();

        let mut r = FrameReader::parse(&bytes).unwrap();
        assert_eq!(r.opcode(), Opcode::Call);
        assert_eq!(r.get_u16().unwrap(), 42);
        assert_eq!(r.get_str().unwrap(), "hello");
        assert_eq!(r.get_nul_str().unwrap(), None);
        assert_eq!(r.get_json().unwrap(), serde_json::json!({"a": 1}));
        assert_eq!(r.get_bytes16().unwrap(), [7u8; 16]);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn nul_str_roundtrips_some_and_none() {
        let mut w = FrameWriter::new(Opcode::Reply);
        w.put_nul_str(Some("boom")).put_nul_str(None);
        let bytes = w.into_bytes();
        let mut r = FrameReader::parse(&bytes).unwrap();
        assert_eq!(r.get_nul_str().unwrap(), Some("boom".to_string()));
        assert_eq!(r.get_nul_str().unwrap(), None);
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let mut w = FrameWriter::new(Opcode::Call);
        w.put_u32(100);
        let bytes = w.into_bytes();
        let mut r = FrameReader::parse(&bytes).unwrap();
        assert!(r.get_str().is_err());
    }

    #[test]
    fn non_terminated_string_is_rejected() {
        let mut w = FrameWriter::new(Opcode::Call);
        w.put_u32(3);
        w.body.extend_from_slice(b"abc");
        let bytes = w.into_bytes();
        let mut r = FrameReader::parse(&bytes).unwrap();
        assert!(r.get_str().is_err());
    }
}
