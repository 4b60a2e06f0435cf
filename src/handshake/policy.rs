//! Access decision for a classified handshake
//!
//! Pure function over the configured secret, the supplied X-Pass value
//! and the destination; the outcome is fixed at handshake time and
//! never re-evaluated mid-stream.

use crate::config::ProxyMode;
use subtle::ConstantTimeEq;

/// Outcome of authorizing one handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Accept,
    RejectNoHost,
    RejectBadPass,
    RejectForbidden,
}

impl AuthOutcome {
    /// Literal response line written back for a rejection
    pub fn response(&self) -> Option<&'static [u8]> {
        match self {
            AuthOutcome::Accept => None,
            AuthOutcome::RejectNoHost => Some(super::RESPONSE_NO_HOST),
            AuthOutcome::RejectBadPass => Some(super::RESPONSE_WRONG_PASS),
            AuthOutcome::RejectForbidden => Some(super::RESPONSE_FORBIDDEN),
        }
    }

    pub fn is_accept(&self) -> bool {
        matches!(self, AuthOutcome::Accept)
    }
}

/// Decide whether a handshake may open a tunnel.
///
/// Priority order: a missing destination rejects first; a configured
/// secret then decides alone; with no secret configured the connect
/// and pooled modes are open, while keep-alive only tunnels to the
/// local host.
pub fn authorize(
    secret: &str,
    supplied: Option<&[u8]>,
    destination: Option<&str>,
    mode: ProxyMode,
) -> AuthOutcome {
    let destination = match destination {
        Some(d) => d,
        None => return AuthOutcome::RejectNoHost,
    };

    if !secret.is_empty() {
        return match supplied {
            Some(pass) if constant_time_eq(pass, secret.as_bytes()) => AuthOutcome::Accept,
            _ => AuthOutcome::RejectBadPass,
        };
    }

    if mode == ProxyMode::KeepAlive && !is_loopback_host(destination) {
        return AuthOutcome::RejectForbidden;
    }

    AuthOutcome::Accept
}

fn is_loopback_host(destination: &str) -> bool {
    let host = destination
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(destination);
    host == "127.0.0.1" || host == "localhost"
}

/// Constant-time comparison to keep secret probing timing-neutral
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
