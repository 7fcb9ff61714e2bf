use super::messages::SessionId;

/// Lifecycle notifications broadcast to embedder code that subscribed via
/// [`crate::hub::StreamHubHandle::subscribe`].
#[derive(Debug, Clone, PartialEq)]
pub enum RtmpEvent {
    PreConnect {
        session_id: SessionId,
        app_name: String,
        flash_version: Option<String>,
        tc_url: Option<String>,
    },
    PostConnect {
        session_id: SessionId,
        app_name: String,
    },
    DoneConnect {
        session_id: SessionId,
    },
    PrePublish {
        session_id: SessionId,
        stream_path: String,
    },
    /// Raised roughly 200ms after a publish starts, so listeners observe the
    /// codec information gathered from the first media frames
    PostPublish {
        session_id: SessionId,
        stream_path: String,
    },
    DonePublish {
        session_id: SessionId,
        stream_path: String,
    },
    PrePlay {
        session_id: SessionId,
        stream_path: String,
    },
    PostPlay {
        session_id: SessionId,
        stream_path: String,
    },
    DonePlay {
        session_id: SessionId,
        stream_path: String,
    },
}
