use std::io;
use thiserror::Error;

/// Errors that can occur while processing handshake bytes from a peer
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("First byte of the handshake did not start with a 3")]
    BadVersionId,

    #[error("Bytes were passed in after the handshake was already completed")]
    HandshakeAlreadyCompleted,

    #[error("{0}")]
    Io(#[from] io::Error),
}
