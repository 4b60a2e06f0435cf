//! Handshake classification
//!
//! The opening bytes of an inbound connection look like an HTTP request
//! but only three pseudo-headers matter. Extraction is a literal
//! substring scan, not a header parser: names containing a colon and
//! folded multi-line values are unsupported on purpose.

mod policy;

pub use policy::{authorize, AuthOutcome};

use crate::config::ProxyMode;

/// Destination pseudo-header ("host:port")
pub const REAL_HOST_HEADER: &[u8] = b"X-Real-Host";
/// Presence-only flag: a second padding read follows the handshake
pub const SPLIT_HEADER: &[u8] = b"X-Split";
/// Shared-secret pseudo-header
pub const PASS_HEADER: &[u8] = b"X-Pass";

/// Success line for the plain CONNECT-style disguise
pub const RESPONSE_CONNECT: &[u8] = b"HTTP/1.1 101 ALERT\r\n\r\n";
/// Success line for the pooled HTTP-style disguise (empty HTML status)
pub const RESPONSE_POOLED: &[u8] = b"HTTP/1.1 200 <font color=\"null\"></font>\r\n\r\n";
/// Success line for the keep-alive WebSocket-style disguise
pub const RESPONSE_KEEPALIVE: &[u8] = b"HTTP/1.1 101 <font color=\"null\"></font>\r\n\r\n";

pub const RESPONSE_NO_HOST: &[u8] = b"HTTP/1.1 400 NoXRealHost!\r\n\r\n";
pub const RESPONSE_WRONG_PASS: &[u8] = b"HTTP/1.1 400 WrongPass!\r\n\r\n";
pub const RESPONSE_FORBIDDEN: &[u8] = b"HTTP/1.1 403 Forbidden!\r\n\r\n";

/// Success line written once the destination is reachable.
pub fn success_response(mode: ProxyMode) -> &'static [u8] {
    match mode {
        ProxyMode::Connect => RESPONSE_CONNECT,
        ProxyMode::Pooled => RESPONSE_POOLED,
        ProxyMode::KeepAlive => RESPONSE_KEEPALIVE,
    }
}

/// Locate `"<name>: "` in the handshake bytes and return the value up
/// to the next CRLF. The value starts two bytes after the first colon
/// at or inside the match (skipping the colon and exactly one space);
/// a value with no terminating CRLF counts as not found.
pub fn find_header<'a>(data: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    let mut pattern = Vec::with_capacity(name.len() + 2);
    pattern.extend_from_slice(name);
    pattern.extend_from_slice(b": ");

    let start = find(data, &pattern)?;
    let colon = start + find(&data[start..], b":")?;
    let value_start = colon + 2;
    if value_start > data.len() {
        return None;
    }
    let value_end = value_start + find(&data[value_start..], b"\r\n")?;
    Some(&data[value_start..value_end])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_header_exact_value() {
        let data = b"GET / HTTP/1.1\r\nX-Real-Host: 10.0.0.5:443\r\nUpgrade: websocket\r\n\r\n";
        let value = find_header(data, REAL_HOST_HEADER).unwrap();
        assert_eq!(value, b"10.0.0.5:443");
    }

    #[test]
    fn test_find_header_missing() {
        let data = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
        assert!(find_header(data, REAL_HOST_HEADER).is_none());
    }

    #[test]
    fn test_find_header_requires_crlf_terminator() {
        let data = b"X-Real-Host: 10.0.0.5:443";
        assert!(find_header(data, REAL_HOST_HEADER).is_none());
    }

    #[test]
    fn test_find_header_empty_value() {
        let data = b"X-Pass: \r\n";
        assert_eq!(find_header(data, PASS_HEADER).unwrap(), b"");
    }

    #[test]
    fn test_find_header_first_occurrence_wins() {
        let data = b"X-Pass: first\r\nX-Pass: second\r\n";
        assert_eq!(find_header(data, PASS_HEADER).unwrap(), b"first");
    }

    #[test]
    fn test_split_is_presence_only() {
        let data = b"X-Split: anything at all\r\n";
        assert!(find_header(data, SPLIT_HEADER).is_some());
    }

    #[test]
    fn test_success_lines_per_mode() {
        assert_eq!(
            success_response(ProxyMode::Connect),
            b"HTTP/1.1 101 ALERT\r\n\r\n"
        );
        assert_eq!(
            success_response(ProxyMode::Pooled),
            b"HTTP/1.1 200 <font color=\"null\"></font>\r\n\r\n".as_slice()
        );
        assert_eq!(
            success_response(ProxyMode::KeepAlive),
            b"HTTP/1.1 101 <font color=\"null\"></font>\r\n\r\n".as_slice()
        );
    }
}
