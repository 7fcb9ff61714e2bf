//! Server side of the RTMP handshake.
//!
//! The client opens with C0 (a single version byte that must be 3) followed by
//! a 1536 byte C1.  Once C1 is complete the server answers with S0, S1, and S2
//! in a single write, then waits for the client's C2 before the connection
//! switches to chunk streaming.
//!
//! Two C1 shapes exist in the wild.  Flash and OBS class clients embed an
//! HMAC-SHA256 digest in C1 (see the [`digest`] module); when one is found the
//! server produces a digest-carrying S1 and a signed S2.  Everything else gets
//! the plain handshake where S2 echoes C1 with the leading time fields
//! rewritten.

pub mod digest;
mod errors;

pub use self::errors::HandshakeError;

use byteorder::{BigEndian, WriteBytesExt};
use digest::{DigestScheme, DIGEST_SIZE, PACKET_SIZE};
use rand::RngCore;

/// The progress made after feeding handshake bytes in
#[derive(Debug, PartialEq)]
pub enum HandshakeProcessResult {
    /// The handshake needs more bytes from the peer.  Any response bytes
    /// returned must be sent before reading further.
    InProgress { response_bytes: Vec<u8> },

    /// The handshake finished.  Bytes that arrived beyond C2 belong to the
    /// chunk stream and must be handed to the chunk deserializer.
    Completed {
        response_bytes: Vec<u8>,
        remaining_bytes: Vec<u8>,
    },
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
enum Stage {
    WaitingForC0,
    WaitingForC1,
    WaitingForC2,
    Complete,
}

/// Performs the server half of an RTMP handshake over an arbitrary byte
/// transport.  Feed every received byte into [`ServerHandshake::process_bytes`]
/// until it reports completion.
pub struct ServerHandshake {
    current_stage: Stage,
    epoch: u32,
    buffer: Vec<u8>,
}

impl ServerHandshake {
    pub fn new() -> ServerHandshake {
        ServerHandshake {
            current_stage: Stage::WaitingForC0,
            epoch: 0,
            buffer: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.current_stage == Stage::Complete
    }

    pub fn process_bytes(
        &mut self,
        data: &[u8],
    ) -> Result<HandshakeProcessResult, HandshakeError> {
        self.buffer.extend_from_slice(data);

        let mut response_bytes = Vec::new();

        loop {
            let starting_stage = self.current_stage;
            let result = match self.current_stage {
                Stage::WaitingForC0 => self.parse_c0()?,
                Stage::WaitingForC1 => self.parse_c1()?,
                Stage::WaitingForC2 => self.parse_c2()?,
                Stage::Complete => return Err(HandshakeError::HandshakeAlreadyCompleted),
            };

            response_bytes.extend(result);

            if self.current_stage == Stage::Complete {
                let remaining_bytes = std::mem::take(&mut self.buffer);
                return Ok(HandshakeProcessResult::Completed {
                    response_bytes,
                    remaining_bytes,
                });
            }

            if starting_stage == self.current_stage {
                // Not enough buffered bytes to finish the current packet
                return Ok(HandshakeProcessResult::InProgress { response_bytes });
            }
        }
    }

    fn parse_c0(&mut self) -> Result<Vec<u8>, HandshakeError> {
        if self.buffer.is_empty() {
            return Ok(Vec::new());
        }

        match self.buffer.remove(0) {
            3 => {
                self.current_stage = Stage::WaitingForC1;
                Ok(Vec::new())
            }

            _ => Err(HandshakeError::BadVersionId),
        }
    }

    fn parse_c1(&mut self) -> Result<Vec<u8>, HandshakeError> {
        if self.buffer.len() < PACKET_SIZE {
            return Ok(Vec::new());
        }

        let c1: Vec<u8> = self.buffer.drain(..PACKET_SIZE).collect();

        let mut response = Vec::with_capacity(1 + 2 * PACKET_SIZE);
        response.push(3_u8);

        match digest::find_client_digest(&c1) {
            Some((scheme, client_digest)) => {
                response.extend(self.digest_s1(scheme)?);
                response.extend(signed_s2(&client_digest));
            }

            None => {
                response.extend(self.plain_s1()?);
                response.extend(self.echo_s2(&c1)?);
            }
        }

        self.current_stage = Stage::WaitingForC2;
        Ok(response)
    }

    fn parse_c2(&mut self) -> Result<Vec<u8>, HandshakeError> {
        if self.buffer.len() < PACKET_SIZE {
            return Ok(Vec::new());
        }

        // C2 is not validated beyond its length.  Encoders echo back either
        // S1 or its digested form and rejecting mismatches buys nothing.
        let _ = self.buffer.drain(..PACKET_SIZE);

        self.current_stage = Stage::Complete;
        Ok(Vec::new())
    }

    fn plain_s1(&self) -> Result<Vec<u8>, HandshakeError> {
        let mut s1 = Vec::with_capacity(PACKET_SIZE);
        s1.write_u32::<BigEndian>(self.epoch)?;
        s1.write_u32::<BigEndian>(0)?;
        s1.extend(random_bytes(PACKET_SIZE - 8));
        Ok(s1)
    }

    fn echo_s2(&self, c1: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        let mut s2 = Vec::with_capacity(PACKET_SIZE);
        s2.write_u32::<BigEndian>(self.epoch)?;
        s2.write_u32::<BigEndian>(0)?;
        s2.extend_from_slice(&c1[8..]);
        Ok(s2)
    }

    fn digest_s1(&self, scheme: DigestScheme) -> Result<Vec<u8>, HandshakeError> {
        let mut s1 = Vec::with_capacity(PACKET_SIZE);
        s1.write_u32::<BigEndian>(self.epoch)?;
        s1.extend_from_slice(&SERVER_VERSION);
        s1.extend(random_bytes(PACKET_SIZE - 8));

        digest::sign_s1(&mut s1, scheme);
        Ok(s1)
    }
}

impl Default for ServerHandshake {
    fn default() -> Self {
        ServerHandshake::new()
    }
}

// Advertised in S1 on the digest path so clients treat us as a genuine-style
// server rather than falling back to the zero-version echo handshake.
const SERVER_VERSION: [u8; 4] = [3, 5, 1, 1];

fn signed_s2(client_digest: &[u8; DIGEST_SIZE]) -> Vec<u8> {
    let mut s2 = random_bytes(PACKET_SIZE);
    digest::sign_s2(&mut s2, client_digest);
    s2
}

fn random_bytes(count: usize) -> Vec<u8> {
    let mut data = vec![0_u8; count];
    rand::thread_rng().fill_bytes(&mut data);
    data
}
