use crate::messages::RtmpMessage;
use crate::messages::{MessageDeserializationError, MessageSerializationError};
use cinder_amf::Amf0Value;
use std::io::Cursor;

pub fn serialize(values: Vec<Amf0Value>) -> Result<Vec<u8>, MessageSerializationError> {
    let bytes = cinder_amf::serialize(&values)?;

    Ok(bytes)
}

pub fn deserialize(data: &[u8]) -> Result<RtmpMessage, MessageDeserializationError> {
    let mut cursor = Cursor::new(data);
    let values = cinder_amf::deserialize(&mut cursor)?;

    Ok(RtmpMessage::Amf0Data { values })
}

/// Reads an AMF3-flavored data payload (message type 15), skipping the one
/// byte format switch at the front.
pub fn deserialize_amf3(data: &[u8]) -> Result<RtmpMessage, MessageDeserializationError> {
    if data.is_empty() {
        return Err(MessageDeserializationError::InvalidMessageFormat);
    }

    deserialize(&data[1..])
}
