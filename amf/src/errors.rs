use std::{io, string};
use thiserror::Error;

/// Errors raised when AMF0 encoded bytes could not be turned into values
#[derive(Debug, Error)]
pub enum Amf0DeserializationError {
    #[error("Encountered unknown marker: {marker}")]
    UnknownMarker { marker: u8 },

    #[error("Unexpected empty object property name")]
    UnexpectedEmptyObjectPropertyName,

    #[error("Hit end of the byte buffer but was expecting more data")]
    UnexpectedEof,

    #[error("Failed to read byte buffer: {0}")]
    BufferReadError(#[from] io::Error),

    #[error("Failed to read a utf8 string from the byte buffer: {0}")]
    StringParseError(#[from] string::FromUtf8Error),

    #[error("Failed to decode an AMF3 encoded value: {0}")]
    Amf3DeserializationError(#[from] Amf3DeserializationError),
}

/// Errors raised when values could not be encoded as AMF0 bytes
#[derive(Debug, Error)]
pub enum Amf0SerializationError {
    #[error("String length greater than 65,535")]
    NormalStringTooLong,

    #[error("Failed to write to byte buffer")]
    BufferWriteError(#[from] io::Error),

    #[error("Failed to encode an AMF3 value: {0}")]
    Amf3SerializationError(#[from] Amf3SerializationError),
}

/// Errors raised when AMF3 encoded bytes could not be turned into values
#[derive(Debug, Error)]
pub enum Amf3DeserializationError {
    #[error("Encountered unknown AMF3 marker: {marker}")]
    UnknownMarker { marker: u8 },

    /// String, object, and traits reference tables are not maintained, so a
    /// value encoded by reference cannot be resolved.
    #[error("Encountered an AMF3 reference, but reference tables are not supported")]
    UnsupportedReference,

    #[error("Encountered an externalizable AMF3 object of class '{class_name}'")]
    UnsupportedExternalizable { class_name: String },

    #[error("Hit end of the byte buffer but was expecting more data")]
    UnexpectedEof,

    #[error("Failed to read byte buffer: {0}")]
    BufferReadError(#[from] io::Error),

    #[error("Failed to read a utf8 string from the byte buffer: {0}")]
    StringParseError(#[from] string::FromUtf8Error),
}

/// Errors raised when values could not be encoded as AMF3 bytes
#[derive(Debug, Error)]
pub enum Amf3SerializationError {
    #[error("Failed to write to byte buffer")]
    BufferWriteError(#[from] io::Error),
}
