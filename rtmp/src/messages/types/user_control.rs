use crate::messages::{MessageDeserializationError, MessageSerializationError};
use crate::messages::{RtmpMessage, UserControlEventType};
use crate::time::RtmpTimestamp;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Write};

pub fn serialize(
    event_type: UserControlEventType,
    stream_id: Option<u32>,
    buffer_length: Option<u32>,
    timestamp: Option<RtmpTimestamp>,
) -> Result<Vec<u8>, MessageSerializationError> {
    let mut cursor = Cursor::new(Vec::new());
    match event_type {
        UserControlEventType::StreamBegin => write_stream_event(&mut cursor, 0, stream_id)?,
        UserControlEventType::StreamEof => write_stream_event(&mut cursor, 1, stream_id)?,
        UserControlEventType::StreamDry => write_stream_event(&mut cursor, 2, stream_id)?,
        UserControlEventType::SetBufferLength => {
            write_length_event(&mut cursor, 3, stream_id, buffer_length)?
        }
        UserControlEventType::StreamIsRecorded => write_stream_event(&mut cursor, 4, stream_id)?,
        UserControlEventType::PingRequest => write_timestamp_event(&mut cursor, 6, timestamp)?,
        UserControlEventType::PingResponse => write_timestamp_event(&mut cursor, 7, timestamp)?,
    };

    Ok(cursor.into_inner())
}

pub fn deserialize(data: &[u8]) -> Result<RtmpMessage, MessageDeserializationError> {
    let mut cursor = Cursor::new(data);
    let event_type = match cursor.read_u16::<BigEndian>()? {
        0 => UserControlEventType::StreamBegin,
        1 => UserControlEventType::StreamEof,
        2 => UserControlEventType::StreamDry,
        3 => UserControlEventType::SetBufferLength,
        4 => UserControlEventType::StreamIsRecorded,
        6 => UserControlEventType::PingRequest,
        7 => UserControlEventType::PingResponse,
        _ => return Err(MessageDeserializationError::InvalidMessageFormat),
    };

    let mut stream_id = None;
    let mut buffer_length = None;
    let mut timestamp = None;

    match event_type {
        UserControlEventType::StreamBegin => stream_id = Some(cursor.read_u32::<BigEndian>()?),
        UserControlEventType::StreamEof => stream_id = Some(cursor.read_u32::<BigEndian>()?),
        UserControlEventType::StreamDry => stream_id = Some(cursor.read_u32::<BigEndian>()?),
        UserControlEventType::StreamIsRecorded => {
            stream_id = Some(cursor.read_u32::<BigEndian>()?)
        }
        UserControlEventType::PingRequest => {
            timestamp = Some(RtmpTimestamp::new(cursor.read_u32::<BigEndian>()?))
        }
        UserControlEventType::PingResponse => {
            timestamp = Some(RtmpTimestamp::new(cursor.read_u32::<BigEndian>()?))
        }
        UserControlEventType::SetBufferLength => {
            stream_id = Some(cursor.read_u32::<BigEndian>()?);
            buffer_length = Some(cursor.read_u32::<BigEndian>()?);
        }
    }

    Ok(RtmpMessage::UserControl {
        event_type,
        stream_id,
        buffer_length,
        timestamp,
    })
}

fn write_stream_event<W: Write>(
    bytes: &mut W,
    event_id: u16,
    stream_id: Option<u32>,
) -> Result<(), MessageSerializationError> {
    debug_assert!(
        stream_id.is_some(),
        "Stream event attempted to be serialized with a None stream id!"
    );

    bytes.write_u16::<BigEndian>(event_id)?;
    bytes.write_u32::<BigEndian>(stream_id.unwrap_or(0))?;

    Ok(())
}

fn write_length_event<W: Write>(
    bytes: &mut W,
    event_id: u16,
    stream_id: Option<u32>,
    length: Option<u32>,
) -> Result<(), MessageSerializationError> {
    debug_assert!(
        stream_id.is_some(),
        "Buffer length event attempted to be serialized with a None stream id!"
    );
    debug_assert!(
        length.is_some(),
        "Buffer length event attempted to be serialized with a None length value!"
    );

    bytes.write_u16::<BigEndian>(event_id)?;
    bytes.write_u32::<BigEndian>(stream_id.unwrap_or(0))?;
    bytes.write_u32::<BigEndian>(length.unwrap_or(0))?;

    Ok(())
}

fn write_timestamp_event<W: Write>(
    bytes: &mut W,
    event_id: u16,
    timestamp: Option<RtmpTimestamp>,
) -> Result<(), MessageSerializationError> {
    debug_assert!(
        timestamp.is_some(),
        "Timestamp event attempted to be serialized with a None timestamp"
    );

    bytes.write_u16::<BigEndian>(event_id)?;
    bytes.write_u32::<BigEndian>(timestamp.map(|x| x.value).unwrap_or(0))?;

    Ok(())
}
