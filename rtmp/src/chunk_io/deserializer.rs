use super::errors::ChunkDeserializationError;
use crate::messages::MessagePayload;
use crate::time::RtmpTimestamp;
use bytes::BytesMut;
use std::cmp::min;
use std::collections::HashMap;
use std::mem;

const INITIAL_MAX_CHUNK_SIZE: usize = 128;

// A 3 byte timestamp field holding this value means the real timestamp (or
// delta) follows in a 4 byte extended field
const EXTENDED_TIMESTAMP_MARKER: u32 = 0xffffff;

// Message header sizes by chunk format: full, no-stream-id, delta-only, none
const MESSAGE_HEADER_SIZES: [usize; 4] = [11, 7, 3, 0];

/// Turns raw bytes back into RTMP message payloads.
///
/// The decoder is an incremental state machine: basic header, message header,
/// optional extended timestamp, payload, and around again.  It consumes
/// whatever prefix of the input forms complete steps and buffers the rest, so
/// it does not care how the transport slices the byte stream.
///
/// Chunk headers compress against the previous chunk on the same chunk stream
/// id, so every byte received from a peer must flow through the one
/// deserializer tracking that peer.
pub struct ChunkDeserializer {
    max_chunk_size: usize,
    buffer: BytesMut,
    stage: DecodeStage,
    packets: HashMap<u32, PendingPacket>,
}

#[derive(Debug, Clone, Copy)]
enum DecodeStage {
    BasicHeader,
    MessageHeader { format: u8, csid: u32 },
    ExtendedTimestamp { format: u8, csid: u32 },
    Payload { csid: u32 },
}

/// The message being assembled (or the one most recently completed) on one
/// chunk stream id.  Compressed headers inherit whatever fields they omit
/// from here.
struct PendingPacket {
    /// Absolute timestamp of the in-flight message
    clock: RtmpTimestamp,
    /// The last timestamp delta seen; a format 3 chunk opening a new message
    /// applies it again
    delta: u32,
    /// Whether the message's timestamp field overflowed into the extended
    /// field; continuation chunks then carry the extended field too
    has_extended_timestamp: bool,
    length: u32,
    type_id: u8,
    message_stream_id: u32,
    body: BytesMut,
}

impl PendingPacket {
    fn new() -> PendingPacket {
        PendingPacket {
            clock: RtmpTimestamp::new(0),
            delta: 0,
            has_extended_timestamp: false,
            length: 0,
            type_id: 0,
            message_stream_id: 0,
            body: BytesMut::new(),
        }
    }

    /// True while part of the message body has arrived but not all of it.
    /// Chunks seen in that window continue the current message instead of
    /// opening the next one.
    fn is_continuing(&self) -> bool {
        !self.body.is_empty()
    }
}

enum StepOutcome {
    NeedMoreBytes,
    Advanced,
    Complete(MessagePayload),
}

impl ChunkDeserializer {
    pub fn new() -> ChunkDeserializer {
        ChunkDeserializer {
            max_chunk_size: INITIAL_MAX_CHUNK_SIZE,
            buffer: BytesMut::with_capacity(4096),
            stage: DecodeStage::BasicHeader,
            packets: HashMap::new(),
        }
    }

    /// Feeds bytes in and returns the first complete RTMP message, if the
    /// buffered input contains one.
    ///
    /// Call again with an empty slice until `None` comes back: input may hold
    /// several complete messages, but only the first is returned per call so
    /// the caller can react to messages that change decoder state (a peer's
    /// SetChunkSize must be applied via [`ChunkDeserializer::set_max_chunk_size`]
    /// before the chunks that follow it are parsed).  Bytes must never be
    /// passed in twice.
    pub fn get_next_message(
        &mut self,
        bytes: &[u8],
    ) -> Result<Option<MessagePayload>, ChunkDeserializationError> {
        self.buffer.extend_from_slice(bytes);

        loop {
            let outcome = match self.stage {
                DecodeStage::BasicHeader => self.read_basic_header()?,
                DecodeStage::MessageHeader { format, csid } => {
                    self.read_message_header(format, csid)?
                }
                DecodeStage::ExtendedTimestamp { format, csid } => {
                    self.read_extended_timestamp(format, csid)?
                }
                DecodeStage::Payload { csid } => self.read_payload(csid)?,
            };

            match outcome {
                StepOutcome::NeedMoreBytes => return Ok(None),
                StepOutcome::Advanced => (),
                StepOutcome::Complete(payload) => return Ok(Some(payload)),
            }
        }
    }

    /// Tells the deserializer that the peer will start sending RTMP chunks
    /// with a different max chunk size, almost always in reaction to a
    /// SetChunkSize message.  Getting this wrong desynchronizes the chunk
    /// boundaries and everything after them.
    pub fn set_max_chunk_size(&mut self, new_size: usize) -> Result<(), ChunkDeserializationError> {
        if new_size > 2147483647 {
            return Err(ChunkDeserializationError::InvalidMaxChunkSize {
                chunk_size: new_size,
            });
        }

        self.max_chunk_size = new_size;
        Ok(())
    }

    /// Returns the maximum size of any RTMP chunks that should be received
    pub fn get_max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    fn read_basic_header(&mut self) -> Result<StepOutcome, ChunkDeserializationError> {
        let first = match self.buffer.first() {
            None => return Ok(StepOutcome::NeedMoreBytes),
            Some(byte) => *byte,
        };

        let format = first >> 6;

        // The low six bits either hold the chunk stream id directly or select
        // one of the two wider encodings (low byte first for the 3 byte form)
        let (csid, header_size) = match first & 0b00111111 {
            0 => {
                if self.buffer.len() < 2 {
                    return Ok(StepOutcome::NeedMoreBytes);
                }

                (64 + self.buffer[1] as u32, 2)
            }

            1 => {
                if self.buffer.len() < 3 {
                    return Ok(StepOutcome::NeedMoreBytes);
                }

                (64 + self.buffer[1] as u32 + ((self.buffer[2] as u32) << 8), 3)
            }

            id => (id as u32, 1),
        };

        let _ = self.buffer.split_to(header_size);
        self.stage = DecodeStage::MessageHeader { format, csid };
        Ok(StepOutcome::Advanced)
    }

    fn read_message_header(
        &mut self,
        format: u8,
        csid: u32,
    ) -> Result<StepOutcome, ChunkDeserializationError> {
        let header_size = MESSAGE_HEADER_SIZES[format as usize];
        if self.buffer.len() < header_size {
            return Ok(StepOutcome::NeedMoreBytes);
        }

        let header = self.buffer.split_to(header_size);

        // A format 0 header stands alone and opens a fresh message slot;
        // everything else fills in from the previous message on the stream
        if format == 0 {
            self.packets.insert(csid, PendingPacket::new());
        }

        let pending = match self.packets.get_mut(&csid) {
            Some(pending) => pending,
            None => return Err(ChunkDeserializationError::NoPreviousChunkOnStream { csid }),
        };

        // Format 3 carries no field of its own and falls back to the prior delta
        let mut field = pending.delta;

        if format <= 2 {
            field = read_u24(&header[0..3]);
            pending.has_extended_timestamp = field == EXTENDED_TIMESTAMP_MARKER;
        }

        if format <= 1 {
            // A header carrying a length opens a new message; a misbehaving
            // peer that abandons a half-assembled body mid-stream must not
            // leave it counting against the new message
            if pending.is_continuing() {
                pending.body.clear();
            }

            pending.length = read_u24(&header[3..6]);
            pending.type_id = header[6];
        }

        if format == 0 {
            pending.message_stream_id =
                u32::from_le_bytes([header[7], header[8], header[9], header[10]]);
        }

        if pending.has_extended_timestamp {
            self.stage = DecodeStage::ExtendedTimestamp { format, csid };
        } else {
            apply_timestamp(pending, format, field);
            self.stage = DecodeStage::Payload { csid };
        }

        Ok(StepOutcome::Advanced)
    }

    fn read_extended_timestamp(
        &mut self,
        format: u8,
        csid: u32,
    ) -> Result<StepOutcome, ChunkDeserializationError> {
        if self.buffer.len() < 4 {
            return Ok(StepOutcome::NeedMoreBytes);
        }

        let bytes = self.buffer.split_to(4);
        let value = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);

        let pending = match self.packets.get_mut(&csid) {
            Some(pending) => pending,
            None => return Err(ChunkDeserializationError::NoPreviousChunkOnStream { csid }),
        };

        apply_timestamp(pending, format, value);
        self.stage = DecodeStage::Payload { csid };
        Ok(StepOutcome::Advanced)
    }

    fn read_payload(&mut self, csid: u32) -> Result<StepOutcome, ChunkDeserializationError> {
        let max_chunk_size = self.max_chunk_size;
        let pending = match self.packets.get_mut(&csid) {
            Some(pending) => pending,
            None => return Err(ChunkDeserializationError::NoPreviousChunkOnStream { csid }),
        };

        // This chunk carries the rest of the message or a full chunk's worth,
        // whichever is smaller
        let message_remaining = pending.length as usize - pending.body.len();
        let chunk_bytes = min(message_remaining, max_chunk_size);

        if self.buffer.len() < chunk_bytes {
            return Ok(StepOutcome::NeedMoreBytes);
        }

        if pending.body.is_empty() {
            pending.body.reserve(pending.length as usize);
        }

        let piece = self.buffer.split_to(chunk_bytes);
        pending.body.extend_from_slice(&piece);

        self.stage = DecodeStage::BasicHeader;

        if pending.body.len() == pending.length as usize {
            let body = mem::take(&mut pending.body);
            let payload = MessagePayload {
                timestamp: pending.clock,
                type_id: pending.type_id,
                message_stream_id: pending.message_stream_id,
                data: body.freeze(),
            };

            return Ok(StepOutcome::Complete(payload));
        }

        Ok(StepOutcome::Advanced)
    }
}

impl Default for ChunkDeserializer {
    fn default() -> Self {
        ChunkDeserializer::new()
    }
}

/// Folds a chunk's timestamp field (3 byte or extended, already selected)
/// into the pending packet's clock.
///
/// A format 0 field is the absolute time and resets the delta.  Formats 1 and
/// 2 carry a delta.  A format 3 chunk opening a new message re-applies the
/// previous delta; a format 3 chunk continuing a split message merely repeats
/// the field and must not advance the clock again.
fn apply_timestamp(pending: &mut PendingPacket, format: u8, field: u32) {
    match format {
        0 => {
            pending.clock.set(field);
            pending.delta = 0;
        }

        1 | 2 => {
            pending.delta = field;
            pending.clock = pending.clock + field;
        }

        _ => {
            if !pending.is_continuing() {
                pending.delta = field;
                pending.clock = pending.clock + field;
            }
        }
    }
}

fn read_u24(bytes: &[u8]) -> u32 {
    ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32
}
