//! Remote-address resolution for session negotiation payloads.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::SessionError;

/// Resolve the raw peer address bytes supplied by session negotiation.
///
/// 4 bytes resolve as IPv4 and 16 bytes as IPv6; any other length fails with
/// [`SessionError::InvalidAddress`].
pub fn resolve_remote(raw: &[u8]) -> Result<IpAddr, SessionError> {
    match raw.len() {
        4 => Ok(IpAddr::V4(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]))),
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(raw);
            Ok(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        len => Err(SessionError::InvalidAddress(len)),
    }
}
