use crate::media::{AudioDescriptor, VideoDescriptor};
use crate::sessions::StreamMetadata;
use crate::time::RtmpTimestamp;
use bytes::Bytes;
use std::net::SocketAddr;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Process-unique identifier of an accepted connection
pub type SessionId = u64;

/// A snapshot of what the hub knows about one session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub peer_address: SocketAddr,
    pub app_name: Option<String>,
    pub publish_path: Option<String>,
    pub play_path: Option<String>,
    pub is_idle: bool,
}

/// A snapshot of the cached state of one actively published stream path
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub stream_path: String,
    pub publisher_id: SessionId,
    pub subscriber_count: usize,
    pub metadata: Option<StreamMetadata>,
    pub audio: Option<AudioDescriptor>,
    pub video: Option<VideoDescriptor>,
    pub gop_frame_count: usize,
}

/// Messages connection tasks send to the hub
#[derive(Debug)]
pub enum HubMessage {
    Register {
        session_id: SessionId,
        peer_address: SocketAddr,
        sender: mpsc::UnboundedSender<ConnectionMessage>,
        kill_switch: CancellationToken,
    },

    Connecting {
        session_id: SessionId,
        app_name: String,
        flash_version: Option<String>,
        tc_url: Option<String>,
    },

    Connected {
        session_id: SessionId,
        app_name: String,
    },

    PublishRequest {
        session_id: SessionId,
        request_id: u32,
        stream_path: String,
    },

    PlayRequest {
        session_id: SessionId,
        request_id: u32,
        stream_path: String,
    },

    PublishFinished {
        session_id: SessionId,
    },

    PlayFinished {
        session_id: SessionId,
    },

    MetadataUpdated {
        session_id: SessionId,
        metadata: StreamMetadata,
        payload: Bytes,
    },

    AudioData {
        session_id: SessionId,
        timestamp: RtmpTimestamp,
        data: Bytes,
    },

    VideoData {
        session_id: SessionId,
        timestamp: RtmpTimestamp,
        data: Bytes,
    },

    /// A paused player resumed; the hub replays the cached sequence headers
    PlayerResumed {
        session_id: SessionId,
    },

    Disconnected {
        session_id: SessionId,
    },

    GetSessionInfo {
        session_id: SessionId,
        reply: oneshot::Sender<Option<SessionInfo>>,
    },

    GetStreamInfo {
        stream_path: String,
        reply: oneshot::Sender<Option<StreamInfo>>,
    },

    KillSession {
        session_id: SessionId,
    },
}

/// Messages the hub sends back to a connection task
#[derive(Debug, PartialEq)]
pub enum ConnectionMessage {
    RequestAccepted {
        request_id: u32,
    },

    RequestDenied {
        request_id: u32,
    },

    NewAudioData {
        timestamp: RtmpTimestamp,
        data: Bytes,
        can_be_dropped: bool,
    },

    NewVideoData {
        timestamp: RtmpTimestamp,
        data: Bytes,
        can_be_dropped: bool,
    },

    NewMetadata {
        payload: Bytes,
    },

    /// The publisher of the watched stream went away; the player is idled
    /// until a new publisher appears on the same path
    StreamEnded,
}
