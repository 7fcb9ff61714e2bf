use crate::sessions::StreamMetadata;
use crate::time::RtmpTimestamp;
use bytes::Bytes;
use cinder_amf::Amf0Value;
use std::collections::HashMap;

/// An event that a server session can raise
#[derive(Debug, PartialEq, Clone)]
pub enum ServerSessionEvent {
    /// The client is requesting a connection on the specified RTMP application name
    ConnectionRequested {
        request_id: u32,
        app_name: String,
        flash_version: Option<String>,
        tc_url: Option<String>,
    },

    /// The client is requesting the ability to publish on the specified stream path
    PublishStreamRequested {
        request_id: u32,
        app_name: String,
        stream_path: String,
        stream_id: u32,
        arguments: HashMap<String, String>,
    },

    /// The client is finished publishing on the specified stream path
    PublishStreamFinished {
        app_name: String,
        stream_path: String,
    },

    /// The client is requesting playback of the specified stream path
    PlayStreamRequested {
        request_id: u32,
        app_name: String,
        stream_path: String,
        stream_id: u32,
        arguments: HashMap<String, String>,
    },

    /// The client is finished with playback of the specified stream path
    PlayStreamFinished {
        app_name: String,
        stream_path: String,
    },

    /// The client is changing metadata properties of the stream being published.
    /// `payload` carries the re-encoded `onMetaData` data message body ready
    /// for delivery to subscribers.
    StreamMetadataChanged {
        app_name: String,
        stream_path: String,
        metadata: StreamMetadata,
        payload: Bytes,
    },

    /// Audio data was received from a publishing client
    AudioDataReceived {
        data: Bytes,
        timestamp: RtmpTimestamp,
    },

    /// Video data was received from a publishing client
    VideoDataReceived {
        data: Bytes,
        timestamp: RtmpTimestamp,
    },

    /// A playing client paused or resumed the stream it is watching
    PauseChanged { paused: bool },

    /// The client has sent an acknowledgement for the specified number of bytes
    AcknowledgementReceived { bytes_received: u32 },

    /// The client has responded to a ping request
    PingResponseReceived { timestamp: RtmpTimestamp },

    /// The client sent an Amf0 command that was not able to be handled
    UnhandleableAmf0Command {
        command_name: String,
        transaction_id: f64,
        command_object: Amf0Value,
        additional_values: Vec<Amf0Value>,
    },
}
