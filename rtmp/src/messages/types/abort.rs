use crate::messages::RtmpMessage;
use crate::messages::{MessageDeserializationError, MessageSerializationError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

pub fn serialize(stream_id: u32) -> Result<Vec<u8>, MessageSerializationError> {
    let mut cursor = Cursor::new(Vec::new());
    cursor.write_u32::<BigEndian>(stream_id)?;

    Ok(cursor.into_inner())
}

pub fn deserialize(data: &[u8]) -> Result<RtmpMessage, MessageDeserializationError> {
    let mut cursor = Cursor::new(data);
    let stream_id = cursor.read_u32::<BigEndian>()?;

    Ok(RtmpMessage::Abort { stream_id })
}
