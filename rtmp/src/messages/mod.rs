//! Typed representations of the RTMP messages that ride inside chunk stream
//! payloads, together with the per-type byte codecs.
//!
//! AMF3 command (type 17) and data (type 15) messages are handled
//! transparently: their payloads open with a one byte format switch which is
//! skipped, after which the remainder is decoded exactly like the AMF0
//! flavored equivalents.

mod errors;
mod message_payload;
mod types;

pub use self::errors::{MessageDeserializationError, MessageSerializationError};
pub use self::message_payload::MessagePayload;

use crate::time::RtmpTimestamp;
use bytes::Bytes;
use cinder_amf::Amf0Value;

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum PeerBandwidthLimitType {
    Hard,
    Soft,
    Dynamic,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum UserControlEventType {
    StreamBegin,
    StreamEof,
    StreamDry,
    SetBufferLength,
    StreamIsRecorded,
    PingRequest,
    PingResponse,
}

#[derive(PartialEq, Debug, Clone)]
pub enum RtmpMessage {
    Unknown {
        type_id: u8,
        data: Bytes,
    },
    Abort {
        stream_id: u32,
    },
    Acknowledgement {
        sequence_number: u32,
    },
    Amf0Command {
        command_name: String,
        transaction_id: f64,
        command_object: Amf0Value,
        additional_arguments: Vec<Amf0Value>,
    },
    Amf0Data {
        values: Vec<Amf0Value>,
    },
    AudioData {
        data: Bytes,
    },
    SetChunkSize {
        size: u32,
    },
    SetPeerBandwidth {
        size: u32,
        limit_type: PeerBandwidthLimitType,
    },
    UserControl {
        event_type: UserControlEventType,
        stream_id: Option<u32>,
        buffer_length: Option<u32>,
        timestamp: Option<RtmpTimestamp>,
    },
    VideoData {
        data: Bytes,
    },
    WindowAcknowledgement {
        size: u32,
    },
}

impl RtmpMessage {
    /// Serializes the message into a raw payload with the specified timestamp and
    /// message stream id, ready to be handed to the chunk serializer.
    pub fn into_message_payload(
        self,
        timestamp: RtmpTimestamp,
        message_stream_id: u32,
    ) -> Result<MessagePayload, MessageSerializationError> {
        MessagePayload::from_rtmp_message(self, timestamp, message_stream_id)
    }
}
