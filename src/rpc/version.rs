//! Version negotiation: both ends advertise a `[min, max]` range they
//! support; the negotiated version is the highest value in the overlap.

use crate::error::{Error, Kind};

/// Magic value opening a negotiation handshake, to reject a peer speaking
/// an unrelated protocol outright rather than failing obscurely later.
pub const MAGIC: u32 = 0x5D30_A209;

pub const VERSION_MIN: u16 = 1;
pub const VERSION_MAX: u16 = 3;

/// Pick the highest version both `[local_min, local_max]` and
/// `[remote_min, remote_max]` support. Fails with `Kind::NotAvailable` if
/// the ranges don't overlap.
pub fn negotiate(local_min: u16, local_max: u16, remote_min: u16, remote_max: u16) -> Result<u16, Error> {
    let lo = local_min.max(remote_min);
    let hi = local_max.min(remote_max);
    if lo > hi {
        return Err(Error::with_detail(
            Kind::NotAvailable,
            format!("no overlapping version: local=[{local_min},{local_max}] remote=[{remote_min},{remote_max}]"),
        ));
    }
    Ok(hi)
}

/// Pick the highest value in `offer` that also falls within
/// `[local_min, local_max]`. Fails with
/// `Kind::NotAvailable` on an empty offer or no match, and with
/// `Kind::InvalidRequest` on a bad magic.
pub fn negotiate_from_offer(local_min: u16, local_max: u16, magic: u32, offer: &[u8]) -> Result<u16, Error> {
    if magic != MAGIC {
        return Err(Error::with_detail(Kind::InvalidRequest, format!("bad version handshake magic {magic:#010x}")));
    }
    if offer.is_empty() {
        return Err(Error::with_detail(Kind::NotAvailable, "empty version offer"));
    }
    offer
        .iter()
        .map(|&v| v as u16)
        .filter(|v| *v >= local_min && *v <= local_max)
        .max()
        .ok_or_else(|| Error::with_detail(Kind::NotAvailable, "no overlapping version in offer"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_the_highest_overlapping_version() {
        assert_eq!(negotiate(1, 3, 2, 5).unwrap(), 3);
        assert_eq!(negotiate(1, 2, 2, 5).unwrap(), 2);
    }

    #[test]
    fn disjoint_ranges_fail() {
        let err = negotiate(1, 1, 2, 2).unwrap_err();
        assert_eq!(err.kind, crate::error::Kind::NotAvailable);
    }

    #[test]
    fn offer_picks_highest_supported_value() {
        assert_eq!(negotiate_from_offer(1, 3, MAGIC, &[1, 2, 3, 9]).unwrap(), 3);
    }

    #[test]
    fn offer_with_bad_magic_is_rejected() {
        let err = negotiate_from_offer(1, 3, 0xDEADBEEF, &[1]).unwrap_err();
        assert_eq!(err.kind, crate::error::Kind::InvalidRequest);
    }

    #[test]
    fn offer_with_no_overlap_is_not_available() {
        let err = negotiate_from_offer(2, 2, MAGIC, &[1]).unwrap_err();
        assert_eq!(err.kind, crate::error::Kind::NotAvailable);
    }

    #[test]
    fn empty_offer_is_rejected() {
        let err = negotiate_from_offer(1, 3, MAGIC, &[]).unwrap_err();
        assert_eq!(err.kind, crate::error::Kind::NotAvailable);
    }
}
