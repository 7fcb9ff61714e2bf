//! HMAC-SHA256 digest calculations for the Flash Player / Flash Media Server
//! variant of the RTMP handshake.
//!
//! Clients that stream h.264 (Flash, OBS, and friends) embed a digest in C1 at
//! one of two offsets derived from the packet contents, keyed with the
//! "Genuine Adobe Flash Player 001" constant.  The server answers with its own
//! digest keyed with the "Genuine Adobe Flash Media Server 001" constant, and
//! signs S2 with a key derived from the client's digest.

use ring::hmac;

pub const PACKET_SIZE: usize = 1536;
pub const DIGEST_SIZE: usize = 32;

const GENUINE_FMS_KEY: &[u8; 36] = b"Genuine Adobe Flash Media Server 001";
const GENUINE_FP_KEY: &[u8; 30] = b"Genuine Adobe Flash Player 001";

// Shared tail appended to both genuine constants when deriving the S2 key
const KEY_SALT: [u8; 32] = [
    0xf0, 0xee, 0xc2, 0x4a, 0x80, 0x68, 0xbe, 0xe8, 0x2e, 0x00, 0xd0, 0xd1, 0x02, 0x9e, 0x7e,
    0x57, 0x6e, 0xec, 0x5d, 0x2d, 0x29, 0x80, 0x6f, 0xab, 0x93, 0xb8, 0xe6, 0x36, 0xcf, 0xeb,
    0x31, 0xae,
];

/// The two places a 1536 byte handshake packet can carry its digest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestScheme {
    /// Offset derived from the four bytes at index 8 (digest lives in the
    /// first half of the packet)
    Base8,
    /// Offset derived from the four bytes at index 772 (digest lives in the
    /// second half of the packet)
    Base772,
}

impl DigestScheme {
    pub fn digest_offset(&self, packet: &[u8]) -> usize {
        let (base, shift) = match self {
            DigestScheme::Base8 => (8, 12),
            DigestScheme::Base772 => (772, 776),
        };

        let sum = packet[base] as usize
            + packet[base + 1] as usize
            + packet[base + 2] as usize
            + packet[base + 3] as usize;

        (sum % 728) + shift
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; DIGEST_SIZE] {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    let tag = hmac::sign(&key, data);

    let mut result = [0_u8; DIGEST_SIZE];
    result.copy_from_slice(tag.as_ref());
    result
}

/// Computes the digest of a handshake packet with the 32 digest bytes at
/// `offset` excluded from the hashed range.
fn packet_digest(key: &[u8], packet: &[u8], offset: usize) -> [u8; DIGEST_SIZE] {
    let mut message = Vec::with_capacity(PACKET_SIZE - DIGEST_SIZE);
    message.extend_from_slice(&packet[..offset]);
    message.extend_from_slice(&packet[offset + DIGEST_SIZE..]);

    hmac_sha256(key, &message)
}

/// Searches C1 for a digest made with the genuine Flash Player key.  Returns
/// the scheme it was found under and the digest bytes, or `None` when the peer
/// performed the plain echo handshake.
pub fn find_client_digest(c1: &[u8]) -> Option<(DigestScheme, [u8; DIGEST_SIZE])> {
    for scheme in [DigestScheme::Base772, DigestScheme::Base8] {
        let offset = scheme.digest_offset(c1);
        let expected = packet_digest(GENUINE_FP_KEY, c1, offset);
        let provided = &c1[offset..offset + DIGEST_SIZE];

        if provided == expected {
            return Some((scheme, expected));
        }
    }

    None
}

/// Stamps a server digest into S1 at the offset dictated by the scheme the
/// client used.
pub fn sign_s1(s1: &mut [u8], scheme: DigestScheme) {
    let offset = scheme.digest_offset(s1);
    let digest = packet_digest(GENUINE_FMS_KEY, s1, offset);
    s1[offset..offset + DIGEST_SIZE].copy_from_slice(&digest);
}

/// Verifies a server digest, used by tests and by clients validating S1.
pub fn verify_s1(s1: &[u8], scheme: DigestScheme) -> bool {
    let offset = scheme.digest_offset(s1);
    let expected = packet_digest(GENUINE_FMS_KEY, s1, offset);
    s1[offset..offset + DIGEST_SIZE] == expected
}

/// Derives the S2 signing key from the digest the client embedded in C1.
pub fn s2_signing_key(client_digest: &[u8; DIGEST_SIZE]) -> [u8; DIGEST_SIZE] {
    let mut full_key = Vec::with_capacity(GENUINE_FMS_KEY.len() + KEY_SALT.len());
    full_key.extend_from_slice(GENUINE_FMS_KEY);
    full_key.extend_from_slice(&KEY_SALT);

    hmac_sha256(&full_key, client_digest)
}

/// Signs the trailing 32 bytes of S2 over its first 1504 bytes.
pub fn sign_s2(s2: &mut [u8], client_digest: &[u8; DIGEST_SIZE]) {
    let key = s2_signing_key(client_digest);
    let signature = hmac_sha256(&key, &s2[..PACKET_SIZE - DIGEST_SIZE]);
    s2[PACKET_SIZE - DIGEST_SIZE..].copy_from_slice(&signature);
}

/// Embeds a client-side digest into a C1 packet.  Primarily used to exercise
/// the digest path from tests and client tooling.
pub fn sign_c1(c1: &mut [u8], scheme: DigestScheme) {
    let offset = scheme.digest_offset(c1);
    let digest = packet_digest(GENUINE_FP_KEY, c1, offset);
    c1[offset..offset + DIGEST_SIZE].copy_from_slice(&digest);
}
