//! # Exoscale Auth Utilities
//!
//! Hashing, identifier generation and CIDR helpers.

use sha2::{Digest, Sha256};
use std::net::IpAddr;
use uuid::Uuid;

/// Compute the salted SHA-256 identifier of `id`, hex encoded.
///
/// # Examples
///
/// ```
/// use utils::salted_id;
///
/// let hashed = salted_id("salt", "role-id");
/// assert_eq!(hashed.len(), 64);
/// ```
#[must_use]
pub fn salted_id(salt: &str, id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate UUID v4 string
#[must_use]
pub fn generate_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// An IPv4 or IPv6 network block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl Cidr {
    /// Parses `a.b.c.d/n`, `x::y/n`, or a bare address (treated as a host
    /// route).
    pub fn parse(s: &str) -> Option<Self> {
        let (addr, prefix) = match s.trim().split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s.trim(), None),
        };
        let network: IpAddr = addr.parse().ok()?;
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|p| *p <= max)?,
            None => max,
        };
        Some(Self { network, prefix })
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = mask_u32(self.prefix);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = mask_u128(self.prefix);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn mask_u32(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn mask_u128(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

impl std::fmt::Display for Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// Returns true when `ip` parses and falls inside `cidr`.
#[must_use]
pub fn ip_in_cidr(ip: &str, cidr: &str) -> bool {
    match (ip.trim().parse::<IpAddr>(), Cidr::parse(cidr)) {
        (Ok(ip), Some(block)) => block.contains(ip),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_salted_id_consistency() {
        assert_eq!(salted_id("s", "id"), salted_id("s", "id"));
        assert_ne!(salted_id("s1", "id"), salted_id("s2", "id"));
    }

    #[test]
    fn test_salted_id_known_value() {
        // sha256("abc")
        assert_eq!(
            salted_id("a", "bc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_generate_uuid_uniqueness() {
        assert_ne!(generate_uuid(), generate_uuid());
    }

    #[test]
    fn test_cidr_contains_v4() {
        let block = Cidr::parse("10.0.0.0/8").unwrap();
        assert!(block.contains("10.1.2.3".parse().unwrap()));
        assert!(!block.contains("11.0.0.1".parse().unwrap()));
        assert!(!block.contains("::1".parse().unwrap()));
    }

    #[test]
    fn test_cidr_bare_address_is_host_route() {
        let block = Cidr::parse("192.0.2.7").unwrap();
        assert_eq!(block.prefix(), 32);
        assert!(ip_in_cidr("192.0.2.7", "192.0.2.7"));
        assert!(!ip_in_cidr("192.0.2.8", "192.0.2.7"));
    }

    #[test]
    fn test_cidr_v6_and_zero_prefix() {
        assert!(ip_in_cidr("2001:db8::1", "2001:db8::/32"));
        assert!(ip_in_cidr("203.0.113.9", "0.0.0.0/0"));
    }

    #[test]
    fn test_cidr_rejects_garbage() {
        assert!(Cidr::parse("10.0.0.0/33").is_none());
        assert!(Cidr::parse("not-an-ip").is_none());
        assert!(!ip_in_cidr("bogus", "10.0.0.0/8"));
    }
}
