use super::types;
use super::RtmpMessage;
use super::{MessageDeserializationError, MessageSerializationError};
use crate::time::RtmpTimestamp;
use bytes::Bytes;

/// Represents a raw RTMP message
#[derive(PartialEq, Debug, Clone)]
pub struct MessagePayload {
    pub timestamp: RtmpTimestamp,
    pub type_id: u8,
    pub message_stream_id: u32,
    pub data: Bytes,
}

impl MessagePayload {
    pub fn new() -> MessagePayload {
        MessagePayload {
            timestamp: RtmpTimestamp::new(0),
            message_stream_id: 0,
            type_id: 0,
            data: Bytes::new(),
        }
    }

    /// Interprets the payload based on its message type id.
    ///
    /// Message type ids 15 (data) and 17 (command) are the AMF3 variants; the
    /// leading format-switch byte of their payloads is skipped and the rest is
    /// read the same way as the AMF0 variants.
    pub fn to_rtmp_message(&self) -> Result<RtmpMessage, MessageDeserializationError> {
        match self.type_id {
            1 => types::set_chunk_size::deserialize(&self.data[..]),
            2 => types::abort::deserialize(&self.data[..]),
            3 => types::acknowledgement::deserialize(&self.data[..]),
            4 => types::user_control::deserialize(&self.data[..]),
            5 => types::window_acknowledgement_size::deserialize(&self.data[..]),
            6 => types::set_peer_bandwidth::deserialize(&self.data[..]),
            8 => types::audio_data::deserialize(self.data.clone()),
            9 => types::video_data::deserialize(self.data.clone()),
            15 => types::amf_data::deserialize_amf3(&self.data[..]),
            17 => types::amf_command::deserialize_amf3(&self.data[..]),
            18 => types::amf_data::deserialize(&self.data[..]),
            20 => types::amf_command::deserialize(&self.data[..]),
            _ => Ok(RtmpMessage::Unknown {
                type_id: self.type_id,
                data: self.data.clone(),
            }),
        }
    }

    pub fn from_rtmp_message(
        message: RtmpMessage,
        timestamp: RtmpTimestamp,
        message_stream_id: u32,
    ) -> Result<MessagePayload, MessageSerializationError> {
        let type_id = get_message_type_id(&message);

        let bytes = match message {
            RtmpMessage::Unknown { type_id: _, data } => data,

            RtmpMessage::Abort { stream_id } => Bytes::from(types::abort::serialize(stream_id)?),

            RtmpMessage::Acknowledgement { sequence_number } => {
                Bytes::from(types::acknowledgement::serialize(sequence_number)?)
            }

            RtmpMessage::Amf0Command {
                command_name,
                transaction_id,
                command_object,
                additional_arguments,
            } => Bytes::from(types::amf_command::serialize(
                command_name,
                transaction_id,
                command_object,
                additional_arguments,
            )?),

            RtmpMessage::Amf0Data { values } => Bytes::from(types::amf_data::serialize(values)?),

            RtmpMessage::AudioData { data } => types::audio_data::serialize(data)?,

            RtmpMessage::SetChunkSize { size } => {
                Bytes::from(types::set_chunk_size::serialize(size)?)
            }

            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                Bytes::from(types::set_peer_bandwidth::serialize(limit_type, size)?)
            }

            RtmpMessage::UserControl {
                event_type,
                stream_id,
                buffer_length,
                timestamp,
            } => Bytes::from(types::user_control::serialize(
                event_type,
                stream_id,
                buffer_length,
                timestamp,
            )?),

            RtmpMessage::VideoData { data } => types::video_data::serialize(data)?,

            RtmpMessage::WindowAcknowledgement { size } => {
                Bytes::from(types::window_acknowledgement_size::serialize(size)?)
            }
        };

        Ok(MessagePayload {
            data: bytes,
            type_id,
            message_stream_id,
            timestamp,
        })
    }
}

impl Default for MessagePayload {
    fn default() -> Self {
        MessagePayload::new()
    }
}

fn get_message_type_id(message: &RtmpMessage) -> u8 {
    match *message {
        RtmpMessage::Unknown { type_id, .. } => type_id,
        RtmpMessage::Abort { .. } => 2_u8,
        RtmpMessage::Acknowledgement { .. } => 3_u8,
        RtmpMessage::Amf0Command { .. } => 20_u8,
        RtmpMessage::Amf0Data { .. } => 18_u8,
        RtmpMessage::AudioData { .. } => 8_u8,
        RtmpMessage::SetChunkSize { .. } => 1_u8,
        RtmpMessage::SetPeerBandwidth { .. } => 6_u8,
        RtmpMessage::UserControl { .. } => 4_u8,
        RtmpMessage::VideoData { .. } => 9_u8,
        RtmpMessage::WindowAcknowledgement { .. } => 5_u8,
    }
}
