use crate::messages::RtmpMessage;
use crate::messages::{MessageDeserializationError, MessageSerializationError};
use cinder_amf::Amf0Value;
use std::io::Cursor;

pub fn serialize(
    command_name: String,
    transaction_id: f64,
    command_object: Amf0Value,
    mut additional_arguments: Vec<Amf0Value>,
) -> Result<Vec<u8>, MessageSerializationError> {
    let mut values = vec![
        Amf0Value::Utf8String(command_name),
        Amf0Value::Number(transaction_id),
        command_object,
    ];

    values.append(&mut additional_arguments);
    let bytes = cinder_amf::serialize(&values)?;

    Ok(bytes)
}

pub fn deserialize(data: &[u8]) -> Result<RtmpMessage, MessageDeserializationError> {
    let mut cursor = Cursor::new(data);
    read_command(&mut cursor)
}

/// Reads an AMF3-flavored command payload (message type 17).  The payload
/// opens with a one byte format switch that must be skipped, the remainder is
/// encoded like the AMF0 variant.
pub fn deserialize_amf3(data: &[u8]) -> Result<RtmpMessage, MessageDeserializationError> {
    if data.is_empty() {
        return Err(MessageDeserializationError::InvalidMessageFormat);
    }

    let mut cursor = Cursor::new(&data[1..]);
    read_command(&mut cursor)
}

fn read_command(
    cursor: &mut Cursor<&[u8]>,
) -> Result<RtmpMessage, MessageDeserializationError> {
    let mut arguments = cinder_amf::deserialize(cursor)?;

    if arguments.len() < 3 {
        return Err(MessageDeserializationError::InvalidMessageFormat);
    }

    let mut arg_iterator = arguments.drain(..3);

    let command_name = match arg_iterator
        .next()
        .ok_or(MessageDeserializationError::InvalidMessageFormat)?
    {
        Amf0Value::Utf8String(value) => value,
        _ => return Err(MessageDeserializationError::InvalidMessageFormat),
    };

    let transaction_id = match arg_iterator
        .next()
        .ok_or(MessageDeserializationError::InvalidMessageFormat)?
    {
        Amf0Value::Number(value) => value,
        _ => return Err(MessageDeserializationError::InvalidMessageFormat),
    };

    let command_object = arg_iterator
        .next()
        .ok_or(MessageDeserializationError::InvalidMessageFormat)?;

    drop(arg_iterator);

    Ok(RtmpMessage::Amf0Command {
        command_name,
        transaction_id,
        command_object,
        additional_arguments: arguments,
    })
}
