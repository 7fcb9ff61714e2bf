use crate::messages::MessageSerializationError;
use std::io;
use thiserror::Error;

/// An enumeration defining all the possible errors that could occur while deserializing
/// RTMP chunks.
#[derive(Debug, Error)]
pub enum ChunkDeserializationError {
    /// The RTMP chunk format requires that RTMP chunks that are not type 0 utilize information
    /// from the previously received chunk on that same chunk stream id.  This error occurs when a
    /// non-0 chunk is received on a stream that has not received a type 0 chunk yet.
    #[error(
        "Received chunk with non-zero chunk type on csid {csid} prior to receiving a type 0 chunk"
    )]
    NoPreviousChunkOnStream { csid: u32 },

    /// The SetChunkSize message encodes the size in 31 bits, so no chunk size above
    /// 2,147,483,647 can ever be in play.
    #[error("Requested an invalid max chunk size of {chunk_size}.  The largest chunk size possible is 2147483647")]
    InvalidMaxChunkSize { chunk_size: usize },

    /// An I/O error occurred while reading the input buffer
    #[error("{0}")]
    Io(#[from] io::Error),
}

/// An enumeration defining all the possible errors that could occur while serializing
/// RTMP messages into RTMP chunks.
#[derive(Debug, Error)]
pub enum ChunkSerializationError {
    /// An RTMP message length field is 3 bytes, so a message larger than 16,777,215 bytes
    /// can not be represented, even split across multiple RTMP chunks.
    #[error("The current message has a length of {size} bytes, which is over the allowed size of 16777215 bytes")]
    MessageTooLong { size: u32 },

    /// The SetChunkSize message encodes the size in 31 bits, so no chunk size above
    /// 2,147,483,647 can ever be in play.
    #[error("An invalid chunk size was specified.  Chunk size must be greater than 0 and less than 2147483647")]
    InvalidMaxChunkSize { attempted_chunk_size: u32 },

    /// Chunk stream ids only go up to 65,599 (and 0 and 1 are reserved markers)
    #[error("Cannot serialize a chunk onto chunk stream id {csid}")]
    InvalidChunkStreamId { csid: u32 },

    /// An I/O error occurred while writing the output buffer
    #[error("{0}")]
    Io(#[from] io::Error),

    /// Occurs when an error is returned when trying to create a set chunk size message
    #[error("Failed to create SetChunkSize message: {0}")]
    SetChunkSizeMessageCreationFailure(#[from] MessageSerializationError),
}
