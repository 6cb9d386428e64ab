//! Remote address encoding and decoding.
//!
//! The engine reports a peer address as raw network-order bytes: 4 for
//! IPv4, 16 for IPv6. [`decode_remote_address`] renders them as text, using
//! the shorthand where the first run of zero hextets becomes `::`.

use std::net::IpAddr;

/// Raw network-order bytes of `ip`.
#[must_use]
pub fn raw_address(ip: IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

/// Renders raw address bytes as a string.
///
/// Four bytes render as dotted decimal. Anything else is read as
/// big-endian 16-bit groups printed in lower-case hex, with the first run
/// of one or more zero groups collapsed to `::` (once, never repeated).
#[must_use]
pub fn decode_remote_address(raw: &[u8]) -> String {
    if raw.len() == 4 {
        return raw
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(".");
    }

    let groups: Vec<u16> = raw
        .chunks(2)
        .map(|chunk| match *chunk {
            [hi, lo] => u16::from_be_bytes([hi, lo]),
            [hi] => u16::from(hi) << 8,
            _ => 0,
        })
        .collect();

    let Some(start) = groups.iter().position(|g| *g == 0) else {
        return join_hextets(&groups);
    };
    let run = groups.iter().skip(start).take_while(|g| **g == 0).count();
    let (head, rest) = groups.split_at(start);
    let tail = rest.get(run..).unwrap_or_default();

    format!("{}::{}", join_hextets(head), join_hextets(tail))
}

fn join_hextets(groups: &[u16]) -> String {
    groups
        .iter()
        .map(|g| format!("{g:x}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use super::*;

    fn v6(addr: Ipv6Addr) -> String {
        decode_remote_address(&raw_address(IpAddr::V6(addr)))
    }

    #[test]
    fn ipv4_is_dotted_decimal() {
        let raw = raw_address(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(raw.len(), 4);
        assert_eq!(decode_remote_address(&raw), "127.0.0.1");
        assert_eq!(decode_remote_address(&[10, 0, 0, 254]), "10.0.0.254");
    }

    #[test]
    fn all_zero_ipv6_is_double_colon() {
        assert_eq!(decode_remote_address(&[0u8; 16]), "::");
    }

    #[test]
    fn loopback_ipv6() {
        assert_eq!(v6(Ipv6Addr::LOCALHOST), "::1");
    }

    #[test]
    fn trailing_zero_run() {
        assert_eq!(v6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0)), "fe80::");
    }

    #[test]
    fn only_first_zero_run_is_collapsed() {
        let addr = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 1, 0, 0, 1);
        assert_eq!(v6(addr), "2001:db8::1:0:0:1");
    }

    #[test]
    fn single_zero_group_collapses() {
        let addr = Ipv6Addr::new(1, 0, 2, 3, 4, 5, 6, 7);
        assert_eq!(v6(addr), "1::2:3:4:5:6:7");
    }

    #[test]
    fn no_zero_groups_is_plain() {
        let addr = Ipv6Addr::new(1, 2, 3, 4, 5, 6, 7, 0xabcd);
        assert_eq!(v6(addr), "1:2:3:4:5:6:7:abcd");
    }

    #[test]
    fn ipv4_mapped_keeps_sixteen_bytes() {
        let mapped = Ipv4Addr::LOCALHOST.to_ipv6_mapped();
        assert_eq!(v6(mapped), "::ffff:7f00:1");
    }
}
