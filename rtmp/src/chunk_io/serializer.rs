use super::chunk_header::{ChunkHeader, ChunkHeaderFormat};
use super::errors::ChunkSerializationError;
use crate::messages::{MessagePayload, RtmpMessage};
use crate::time::RtmpTimestamp;
use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use std::cmp::min;
use std::collections::HashMap;
use std::io::{Cursor, Write};

const INITIAL_MAX_CHUNK_SIZE: u32 = 128;
const MAX_INITIAL_TIMESTAMP: u32 = 16777215;

/// An outbound data packet containing at least one RTMP chunk with a single RTMP message.
/// The packet can be flagged as droppable because video and audio packets may be allowed to be
/// dropped if there is not enough bandwidth for the current bitrate.  This allows live video
/// to be kept in real time and to prevent getting backed up when redistributing live video when
/// the network conditions don't allow the current bitrate.
#[derive(Debug, PartialEq, Clone)]
pub struct Packet {
    pub bytes: Vec<u8>,
    pub can_be_dropped: bool,
}

/// Allows serializing RTMP messages into RTMP chunks.
///
/// Due to the nature of the RTMP chunking protocol, the same serializer should be used
/// for all messages that need to be sent to the same peer.
pub struct ChunkSerializer {
    previous_headers: HashMap<u32, ChunkHeader>,
    max_chunk_size: u32,
}

impl ChunkSerializer {
    pub fn new() -> ChunkSerializer {
        ChunkSerializer {
            max_chunk_size: INITIAL_MAX_CHUNK_SIZE,
            previous_headers: HashMap::new(),
        }
    }

    /// Changes the outbound chunk size and returns the SetChunkSize message that must be
    /// sent to the peer before any messages serialized with the new size.
    pub fn set_max_chunk_size(
        &mut self,
        new_size: u32,
        time: RtmpTimestamp,
    ) -> Result<Packet, ChunkSerializationError> {
        if new_size == 0 || new_size > 2147483647 {
            return Err(ChunkSerializationError::InvalidMaxChunkSize {
                attempted_chunk_size: new_size,
            });
        }

        let set_chunk_size_message = RtmpMessage::SetChunkSize { size: new_size };
        let message_payload = set_chunk_size_message.into_message_payload(time, 0)?;
        let packet = self.serialize(&message_payload, true, false)?;

        self.max_chunk_size = new_size;
        Ok(packet)
    }

    pub fn serialize(
        &mut self,
        message: &MessagePayload,
        force_uncompressed: bool,
        can_be_dropped: bool,
    ) -> Result<Packet, ChunkSerializationError> {
        if message.data.len() > 16777215 {
            return Err(ChunkSerializationError::MessageTooLong {
                size: message.data.len() as u32,
            });
        }

        let mut bytes = Cursor::new(Vec::new());

        // Since a message may have a payload greater than one chunk allows, we must
        // split the payload into slices that don't exceed the max chunk length.  A
        // zero length message still produces a single (empty) chunk.
        let mut first_chunk = true;
        let mut start_index = 0;
        loop {
            let remaining = message.data.len() - start_index;
            let end_index = start_index + min(remaining, self.max_chunk_size as usize);

            self.add_chunk(
                &mut bytes,
                force_uncompressed,
                !first_chunk,
                message,
                &message.data[start_index..end_index],
                can_be_dropped,
            )?;

            first_chunk = false;
            start_index = end_index;
            if start_index >= message.data.len() {
                break;
            }
        }

        Ok(Packet {
            bytes: bytes.into_inner(),
            can_be_dropped,
        })
    }

    fn add_chunk(
        &mut self,
        bytes: &mut Cursor<Vec<u8>>,
        force_uncompressed: bool,
        continuation: bool,
        message: &MessagePayload,
        data_to_write: &[u8],
        can_be_dropped: bool,
    ) -> Result<(), ChunkSerializationError> {
        let mut header = ChunkHeader {
            chunk_stream_id: get_csid_for_message_type(message.type_id),
            timestamp: message.timestamp,
            timestamp_field: 0,
            timestamp_delta: 0,
            message_type_id: message.type_id,
            message_stream_id: message.message_stream_id,
            message_length: message.data.len() as u32,
            can_be_dropped,
        };

        let header_format = if continuation {
            // Chunks past the first of a split message are always type 3 and
            // inherit the leading chunk's timestamp field
            match self.previous_headers.get(&header.chunk_stream_id) {
                Some(previous_header) => {
                    header.timestamp_field = previous_header.timestamp_field;
                    header.timestamp_delta = previous_header.timestamp_delta;
                }
                None => header.timestamp_field = header.timestamp.value,
            }
            ChunkHeaderFormat::Empty
        } else if force_uncompressed {
            header.timestamp_field = header.timestamp.value;
            ChunkHeaderFormat::Full
        } else {
            match self.previous_headers.get(&header.chunk_stream_id) {
                None => {
                    header.timestamp_field = header.timestamp.value;
                    ChunkHeaderFormat::Full
                }
                Some(previous_header) => {
                    // If the previous packet was able to be dropped, we don't know if it was (or
                    // will be), therefore the next packet must be a type 0 chunk as a precaution.
                    // Otherwise we risk the peer not being able to deserialize this packet.
                    if previous_header.can_be_dropped {
                        header.timestamp_field = header.timestamp.value;
                        ChunkHeaderFormat::Full
                    } else {
                        get_header_format(&mut header, previous_header)
                    }
                }
            }
        };

        add_basic_header(bytes, &header_format, header.chunk_stream_id)?;
        add_initial_timestamp(bytes, &header_format, &header)?;
        add_message_length_and_type_id(
            bytes,
            &header_format,
            header.message_length,
            header.message_type_id,
        )?;
        add_message_stream_id(bytes, &header_format, header.message_stream_id)?;
        add_extended_timestamp(bytes, &header)?;
        bytes.write_all(data_to_write)?;

        self.previous_headers.insert(header.chunk_stream_id, header);
        Ok(())
    }
}

impl Default for ChunkSerializer {
    fn default() -> Self {
        ChunkSerializer::new()
    }
}

fn add_basic_header(
    bytes: &mut dyn Write,
    format: &ChunkHeaderFormat,
    csid: u32,
) -> Result<(), ChunkSerializationError> {
    if csid <= 1 || csid > 65599 {
        return Err(ChunkSerializationError::InvalidChunkStreamId { csid });
    }

    let format_mask = match *format {
        ChunkHeaderFormat::Full => 0b00000000,
        ChunkHeaderFormat::TimeDeltaWithoutMessageStreamId => 0b01000000,
        ChunkHeaderFormat::TimeDeltaOnly => 0b10000000,
        ChunkHeaderFormat::Empty => 0b11000000,
    };

    if csid <= 63 {
        bytes.write_u8(format_mask | csid as u8)?;
    } else if csid <= 319 {
        bytes.write_u8(format_mask)?;
        bytes.write_u8((csid - 64) as u8)?;
    } else {
        bytes.write_u8(format_mask | 1)?;
        bytes.write_u16::<LittleEndian>((csid - 64) as u16)?;
    }

    Ok(())
}

fn add_initial_timestamp(
    bytes: &mut Cursor<Vec<u8>>,
    format: &ChunkHeaderFormat,
    header: &ChunkHeader,
) -> Result<(), ChunkSerializationError> {
    if *format == ChunkHeaderFormat::Empty {
        return Ok(());
    }

    let value_to_write = match *format {
        ChunkHeaderFormat::Full => header.timestamp.value,
        _ => header.timestamp_field,
    };

    let capped_value = min(value_to_write, MAX_INITIAL_TIMESTAMP);
    bytes.write_u24::<BigEndian>(capped_value)?;

    Ok(())
}

fn add_message_length_and_type_id(
    bytes: &mut Cursor<Vec<u8>>,
    format: &ChunkHeaderFormat,
    length: u32,
    type_id: u8,
) -> Result<(), ChunkSerializationError> {
    if *format == ChunkHeaderFormat::Empty || *format == ChunkHeaderFormat::TimeDeltaOnly {
        return Ok(());
    }

    bytes.write_u24::<BigEndian>(length)?;
    bytes.write_u8(type_id)?;
    Ok(())
}

fn add_message_stream_id(
    bytes: &mut dyn Write,
    format: &ChunkHeaderFormat,
    stream_id: u32,
) -> Result<(), ChunkSerializationError> {
    if *format != ChunkHeaderFormat::Full {
        return Ok(());
    }

    bytes.write_u32::<LittleEndian>(stream_id)?;
    Ok(())
}

fn add_extended_timestamp(
    bytes: &mut dyn Write,
    header: &ChunkHeader,
) -> Result<(), ChunkSerializationError> {
    // Every chunk of a message whose timestamp field overflowed carries the
    // extended timestamp, including type 3 continuations, so the peer's parser
    // stays aligned.
    if header.timestamp_field < MAX_INITIAL_TIMESTAMP {
        return Ok(());
    }

    bytes.write_u32::<BigEndian>(header.timestamp_field)?;
    Ok(())
}

fn get_csid_for_message_type(message_type_id: u8) -> u32 {
    // Naive resolution, purpose (afaik) is to allow repeated messages
    // to utilize header compression by spreading them across chunk streams
    match message_type_id {
        1 | 2 | 3 | 4 | 5 | 6 => 2,
        15 | 17 | 18 | 19 | 20 => 3,
        8 => 4,
        9 => 6,
        _ => 5,
    }
}

fn get_header_format(
    current_header: &mut ChunkHeader,
    previous_header: &ChunkHeader,
) -> ChunkHeaderFormat {
    if current_header.message_stream_id != previous_header.message_stream_id {
        current_header.timestamp_field = current_header.timestamp.value;
        return ChunkHeaderFormat::Full;
    }

    // TODO: Update to support rtmp time wrap-around
    let time_delta = current_header.timestamp - previous_header.timestamp;
    current_header.timestamp_delta = time_delta.value;
    current_header.timestamp_field = time_delta.value;

    if current_header.message_type_id != previous_header.message_type_id
        || current_header.message_length != previous_header.message_length
    {
        return ChunkHeaderFormat::TimeDeltaWithoutMessageStreamId;
    }

    // A type 3 chunk makes the peer reuse the previous chunk's timestamp field
    // as a delta, so it is only safe when that field already holds our delta
    // (it does not after a type 0 chunk, whose field was an absolute time).
    if current_header.timestamp_delta != previous_header.timestamp_delta
        || previous_header.timestamp_field != current_header.timestamp_delta
    {
        return ChunkHeaderFormat::TimeDeltaOnly;
    }

    ChunkHeaderFormat::Empty
}
