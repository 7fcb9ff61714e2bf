//! The seam between the session engine and whatever scheme signs stream URLs.
//!
//! Publish and play attempts may carry a `sign` argument in the query string
//! of the stream name.  When auth is enabled the session hands that argument,
//! the derived stream path, and the configured secret to a verifier.  The
//! signing algorithm itself lives with the embedder; the engine only cares
//! about the yes/no answer.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Decides whether a publish or play attempt carries a valid signature.
pub trait SignatureVerifier: Send + Sync {
    /// `sign` is the raw `sign` query argument, if the client supplied one.
    fn verify(&self, sign: Option<&str>, stream_path: &str, secret: &str) -> bool;
}

/// A verifier that lets everything through, used when auth is disabled or for
/// local testing.
pub struct AcceptAllVerifier;

impl SignatureVerifier for AcceptAllVerifier {
    fn verify(&self, _sign: Option<&str>, _stream_path: &str, _secret: &str) -> bool {
        true
    }
}

/// Loopback peers are exempt from auth checks so that local tooling
/// (repackagers, relay processes on the same host) can always connect.
pub fn is_local_peer(addr: &SocketAddr) -> bool {
    match addr.ip() {
        IpAddr::V4(ip) => ip == Ipv4Addr::LOCALHOST,
        IpAddr::V6(ip) => {
            ip == Ipv6Addr::LOCALHOST || ip.to_ipv4_mapped() == Some(Ipv4Addr::LOCALHOST)
        }
    }
}
