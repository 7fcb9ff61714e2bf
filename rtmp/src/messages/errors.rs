use cinder_amf::{Amf0DeserializationError, Amf0SerializationError};
use std::io;
use thiserror::Error;

/// Enumeration that represents the various errors that may occur while trying to
/// deserialize a RTMP message
#[derive(Debug, Error)]
pub enum MessageDeserializationError {
    /// The bytes or amf0 values contained in the message were not what were expected, and thus
    /// the message could not be parsed.
    #[error("The message was not encoded in an expected format")]
    InvalidMessageFormat,

    /// The bytes in the message that were expected to be AMF0 values were not properly encoded,
    /// and thus could not be read
    #[error("The message did not contain valid Amf0 encoded values: {0}")]
    Amf0DeserializationError(#[from] Amf0DeserializationError),

    /// Failed to read the values from the input buffer
    #[error("An IO error occurred while reading the input: {0}")]
    Io(#[from] io::Error),
}

/// Enumeration that represents the various errors that may occur while trying to
/// serialize a RTMP message into a raw RTMP payload.
#[derive(Debug, Error)]
pub enum MessageSerializationError {
    /// An invalid chunk size value was provided
    #[error("Cannot serialize a SetChunkSize message with a size of 2147483648 or greater")]
    InvalidChunkSize,

    /// The values provided could not be serialized into valid AMF0 encoded data
    #[error("The values provided could not be serialized into valid AMF0 encoded data: {0}")]
    Amf0SerializationError(#[from] Amf0SerializationError),

    /// Failed to write the values to the output buffer
    #[error("An IO error occurred while writing the output: {0}")]
    Io(#[from] io::Error),
}
