//! Credentials export/import string codec: `"%x:%x:%x-%s"` = uid:gid:pid-label.
//!
//! Grounded on the original `afb-cred.h`'s exported form. Used both by
//! `process_on_behalf` and the wire protocol's `user_creds`
//! field on `CALL`.

use crate::error::{Error, Kind};

/// A parsed on-behalf-of credentials string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedCred {
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
    pub label: String,
}

impl ExportedCred {
    pub fn format(&self) -> String {
        format!("{:x}:{:x}:{:x}-{}", self.uid, self.gid, self.pid, self.label)
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        let (ids, label) = s
            .split_once('-')
            .ok_or_else(|| Error::with_detail(Kind::InvalidRequest, "missing label separator"))?;
        let mut parts = ids.split(':');
        let uid = parts
            .next()
            .and_then(|p| u32::from_str_radix(p, 16).ok())
            .ok_or_else(|| Error::with_detail(Kind::InvalidRequest, "bad uid field"))?;
        let gid = parts
            .next()
            .and_then(|p| u32::from_str_radix(p, 16).ok())
            .ok_or_else(|| Error::with_detail(Kind::InvalidRequest, "bad gid field"))?;
        let pid = parts
            .next()
            .and_then(|p| u32::from_str_radix(p, 16).ok())
            .ok_or_else(|| Error::with_detail(Kind::InvalidRequest, "bad pid field"))?;
        if parts.next().is_some() {
            return Err(Error::with_detail(Kind::InvalidRequest, "too many id fields"));
        }
        Ok(Self { uid, gid, pid, label: label.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let c = ExportedCred { uid: 1000, gid: 1000, pid: 42, label: "unconfined".into() };
        let s = c.format();
        assert_eq!(s, "3e8:3e8:2a-unconfined");
        assert_eq!(ExportedCred::parse(&s).unwrap(), c);
    }

    #[test]
    fn rejects_malformed() {
        assert!(ExportedCred::parse("not-valid-at-all-x").is_err());
        assert!(ExportedCred::parse("1:2:3:4-label").is_err());
    }
}
