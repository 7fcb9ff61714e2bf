use crate::messages::RtmpMessage;
use crate::messages::{MessageDeserializationError, MessageSerializationError};
use bytes::Bytes;

pub fn serialize(data: Bytes) -> Result<Bytes, MessageSerializationError> {
    Ok(data)
}

pub fn deserialize(data: Bytes) -> Result<RtmpMessage, MessageDeserializationError> {
    Ok(RtmpMessage::VideoData { data })
}

#[cfg(test)]
mod tests {
    use super::{deserialize, serialize};
    use crate::messages::RtmpMessage;
    use bytes::Bytes;

    #[test]
    fn payload_passes_through_untouched() {
        let data = Bytes::from(vec![0x17_u8, 0x01, 0x02]);
        let raw = serialize(data.clone()).unwrap();
        assert_eq!(raw, data);

        let message = deserialize(raw).unwrap();
        assert_eq!(message, RtmpMessage::VideoData { data });
    }
}
