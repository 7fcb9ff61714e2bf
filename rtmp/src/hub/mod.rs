//! The hub is the only shared mutable state between sessions: the registry of
//! live sessions, the publisher owning each stream path, the players parked
//! on paths that have no publisher yet, and the cached stream state (codec
//! descriptors, sequence headers, metadata, GOP) used to catch up late
//! joiners.
//!
//! It runs as a single task consuming [`HubMessage`]s from every connection,
//! which serializes all registry mutation.  Fan-out happens by pushing
//! [`ConnectionMessage`]s into each subscriber's ordered queue, so bytes reach
//! a subscriber in exactly the order the publisher produced them.

mod events;
mod gop;
mod messages;


pub use self::events::RtmpEvent;
pub use self::gop::{GopCache, MediaFrame, MediaKind};
pub use self::messages::{ConnectionMessage, HubMessage, SessionId, SessionInfo, StreamInfo};

use crate::media::{self, AudioDescriptor, VideoDescriptor};
use crate::sessions::StreamMetadata;
use crate::time::RtmpTimestamp;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const POST_PUBLISH_DELAY: Duration = Duration::from_millis(200);
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Cheap handle for talking to a running hub task.  Clones all refer to the
/// same hub.
#[derive(Clone)]
pub struct StreamHubHandle {
    sender: mpsc::UnboundedSender<HubMessage>,
    events: broadcast::Sender<RtmpEvent>,
}

impl StreamHubHandle {
    /// Delivers a message to the hub.  Messages sent after the hub shut down
    /// are silently discarded, matching how sessions outlive server stop.
    pub fn send(&self, message: HubMessage) {
        let _ = self.sender.send(message);
    }

    /// Subscribes to the lifecycle event bus
    pub fn subscribe(&self) -> broadcast::Receiver<RtmpEvent> {
        self.events.subscribe()
    }

    /// Looks up what the hub currently knows about a session
    pub async fn session_info(&self, session_id: SessionId) -> Option<SessionInfo> {
        let (reply, response) = oneshot::channel();
        self.send(HubMessage::GetSessionInfo { session_id, reply });
        response.await.ok().flatten()
    }

    /// Looks up the cached state of an actively published stream path
    pub async fn stream_info(&self, stream_path: &str) -> Option<StreamInfo> {
        let (reply, response) = oneshot::channel();
        self.send(HubMessage::GetStreamInfo {
            stream_path: stream_path.to_string(),
            reply,
        });
        response.await.ok().flatten()
    }
}

/// Spawns a hub task and returns the handle used to reach it.  Multiple hubs
/// can coexist in one process; nothing is global.
pub fn start(gop_cache_enabled: bool) -> StreamHubHandle {
    let (sender, receiver) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    let hub = StreamHub {
        gop_cache_enabled,
        sessions: HashMap::new(),
        publishers: HashMap::new(),
        idle_players: HashMap::new(),
        streams: HashMap::new(),
        events: events.clone(),
    };

    tokio::spawn(hub.run(receiver));

    StreamHubHandle { sender, events }
}

struct SessionEntry {
    peer_address: SocketAddr,
    sender: mpsc::UnboundedSender<ConnectionMessage>,
    kill_switch: CancellationToken,
    app_name: Option<String>,
    publish_path: Option<String>,
    play_path: Option<String>,
    is_idle: bool,
}

/// Everything the hub caches about one actively published stream path
struct PublishedStream {
    publisher_id: SessionId,
    metadata: Option<StreamMetadata>,
    metadata_payload: Option<Bytes>,
    audio: Option<AudioDescriptor>,
    video: Option<VideoDescriptor>,
    aac_sequence_header: Option<Bytes>,
    avc_sequence_header: Option<Bytes>,
    gop: Option<GopCache>,
    subscribers: HashSet<SessionId>,
}

impl PublishedStream {
    fn new(publisher_id: SessionId, gop_cache_enabled: bool) -> PublishedStream {
        PublishedStream {
            publisher_id,
            metadata: None,
            metadata_payload: None,
            audio: None,
            video: None,
            aac_sequence_header: None,
            avc_sequence_header: None,
            gop: gop_cache_enabled.then(GopCache::new),
            subscribers: HashSet::new(),
        }
    }
}

struct StreamHub {
    gop_cache_enabled: bool,
    sessions: HashMap<SessionId, SessionEntry>,
    publishers: HashMap<String, SessionId>,
    idle_players: HashMap<String, HashSet<SessionId>>,
    streams: HashMap<String, PublishedStream>,
    events: broadcast::Sender<RtmpEvent>,
}

impl StreamHub {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<HubMessage>) {
        while let Some(message) = receiver.recv().await {
            match message {
                HubMessage::Register {
                    session_id,
                    peer_address,
                    sender,
                    kill_switch,
                } => {
                    self.sessions.insert(
                        session_id,
                        SessionEntry {
                            peer_address,
                            sender,
                            kill_switch,
                            app_name: None,
                            publish_path: None,
                            play_path: None,
                            is_idle: false,
                        },
                    );
                }

                HubMessage::Connecting {
                    session_id,
                    app_name,
                    flash_version,
                    tc_url,
                } => {
                    if let Some(entry) = self.sessions.get_mut(&session_id) {
                        entry.app_name = Some(app_name.clone());
                    }

                    self.broadcast(RtmpEvent::PreConnect {
                        session_id,
                        app_name,
                        flash_version,
                        tc_url,
                    });
                }

                HubMessage::Connected {
                    session_id,
                    app_name,
                } => {
                    self.broadcast(RtmpEvent::PostConnect {
                        session_id,
                        app_name,
                    });
                }

                HubMessage::PublishRequest {
                    session_id,
                    request_id,
                    stream_path,
                } => {
                    self.handle_publish_request(session_id, request_id, stream_path);
                }

                HubMessage::PlayRequest {
                    session_id,
                    request_id,
                    stream_path,
                } => {
                    self.handle_play_request(session_id, request_id, stream_path);
                }

                HubMessage::PublishFinished { session_id } => {
                    self.teardown_publisher(session_id);
                }

                HubMessage::PlayFinished { session_id } => {
                    self.teardown_player(session_id);
                }

                HubMessage::MetadataUpdated {
                    session_id,
                    metadata,
                    payload,
                } => {
                    self.handle_metadata(session_id, metadata, payload);
                }

                HubMessage::AudioData {
                    session_id,
                    timestamp,
                    data,
                } => {
                    self.handle_audio_data(session_id, timestamp, data);
                }

                HubMessage::VideoData {
                    session_id,
                    timestamp,
                    data,
                } => {
                    self.handle_video_data(session_id, timestamp, data);
                }

                HubMessage::PlayerResumed { session_id } => {
                    self.handle_player_resumed(session_id);
                }

                HubMessage::Disconnected { session_id } => {
                    self.handle_disconnected(session_id);
                }

                HubMessage::GetSessionInfo { session_id, reply } => {
                    let info = self.sessions.get(&session_id).map(|entry| SessionInfo {
                        session_id,
                        peer_address: entry.peer_address,
                        app_name: entry.app_name.clone(),
                        publish_path: entry.publish_path.clone(),
                        play_path: entry.play_path.clone(),
                        is_idle: entry.is_idle,
                    });

                    let _ = reply.send(info);
                }

                HubMessage::GetStreamInfo { stream_path, reply } => {
                    let info = self.streams.get(&stream_path).map(|stream| StreamInfo {
                        stream_path: stream_path.clone(),
                        publisher_id: stream.publisher_id,
                        subscriber_count: stream.subscribers.len(),
                        metadata: stream.metadata.clone(),
                        audio: stream.audio.clone(),
                        video: stream.video.clone(),
                        gop_frame_count: stream
                            .gop
                            .as_ref()
                            .map(|gop| gop.len())
                            .unwrap_or(0),
                    });

                    let _ = reply.send(info);
                }

                HubMessage::KillSession { session_id } => {
                    if let Some(entry) = self.sessions.get(&session_id) {
                        entry.kill_switch.cancel();
                    }
                }
            }
        }
    }

    fn handle_publish_request(
        &mut self,
        session_id: SessionId,
        request_id: u32,
        stream_path: String,
    ) {
        self.broadcast(RtmpEvent::PrePublish {
            session_id,
            stream_path: stream_path.clone(),
        });

        // One publish per session; a second request racing ahead of the first
        // one's acceptance slips past the session's own guard, so it is
        // arbitrated here
        let already_publishing = self
            .sessions
            .get(&session_id)
            .map(|entry| entry.publish_path.is_some())
            .unwrap_or(false);

        if already_publishing {
            debug!(
                session_id,
                %stream_path,
                "Session already holds a publish path, request denied"
            );
            self.send_to(session_id, ConnectionMessage::RequestDenied { request_id });
            return;
        }

        if let Some(owner) = self.publishers.get(&stream_path) {
            info!(
                session_id,
                %stream_path,
                owner = *owner,
                "Publish request rejected, the path already has a publisher"
            );
            self.send_to(session_id, ConnectionMessage::RequestDenied { request_id });
            return;
        }

        self.publishers.insert(stream_path.clone(), session_id);
        if let Some(entry) = self.sessions.get_mut(&session_id) {
            entry.publish_path = Some(stream_path.clone());
        }

        let mut stream = PublishedStream::new(session_id, self.gop_cache_enabled);

        // Players that were waiting on this path become live subscribers; the
        // cached stream state is empty, so they simply start receiving data
        // as it arrives
        if let Some(waiting) = self.idle_players.remove(&stream_path) {
            for player_id in waiting {
                if let Some(entry) = self.sessions.get_mut(&player_id) {
                    entry.is_idle = false;
                }

                stream.subscribers.insert(player_id);
            }
        }

        self.streams.insert(stream_path.clone(), stream);
        self.send_to(session_id, ConnectionMessage::RequestAccepted { request_id });

        info!(session_id, %stream_path, "Publishing started");

        // Give the publisher a moment to deliver its first media frames so
        // listeners see populated codec descriptors
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(POST_PUBLISH_DELAY).await;
            let _ = events.send(RtmpEvent::PostPublish {
                session_id,
                stream_path,
            });
        });
    }

    fn handle_play_request(&mut self, session_id: SessionId, request_id: u32, stream_path: String) {
        self.broadcast(RtmpEvent::PrePlay {
            session_id,
            stream_path: stream_path.clone(),
        });

        // Same arbitration as for publishing: one play per session, even when
        // a second request arrives before the first was accepted
        let already_playing = self
            .sessions
            .get(&session_id)
            .map(|entry| entry.play_path.is_some())
            .unwrap_or(false);

        if already_playing {
            debug!(
                session_id,
                %stream_path,
                "Session already holds a play path, request denied"
            );
            self.send_to(session_id, ConnectionMessage::RequestDenied { request_id });
            return;
        }

        if let Some(entry) = self.sessions.get_mut(&session_id) {
            entry.play_path = Some(stream_path.clone());
        }

        // Accept before any replayed data so the play status burst reaches the
        // client ahead of the stream content
        self.send_to(session_id, ConnectionMessage::RequestAccepted { request_id });

        if self.publishers.contains_key(&stream_path) {
            self.start_playback(session_id, &stream_path);
        } else {
            debug!(session_id, %stream_path, "No publisher yet, player parked as idle");
            if let Some(entry) = self.sessions.get_mut(&session_id) {
                entry.is_idle = true;
            }

            self.idle_players
                .entry(stream_path.clone())
                .or_default()
                .insert(session_id);
        }

        self.broadcast(RtmpEvent::PostPlay {
            session_id,
            stream_path,
        });
    }

    /// Binds a player to a published stream and replays the cached state:
    /// metadata, then the audio and video sequence headers, then every GOP
    /// frame, strictly in that order and ahead of any live frame.
    fn start_playback(&mut self, session_id: SessionId, stream_path: &str) {
        let stream = match self.streams.get_mut(stream_path) {
            Some(stream) => stream,
            None => return,
        };

        stream.subscribers.insert(session_id);

        let metadata_payload = stream.metadata_payload.clone();
        let aac_sequence_header = stream.aac_sequence_header.clone();
        let avc_sequence_header = stream.avc_sequence_header.clone();
        let gop_frames: Vec<MediaFrame> = stream
            .gop
            .as_ref()
            .map(|gop| gop.frames().to_vec())
            .unwrap_or_default();

        if let Some(entry) = self.sessions.get_mut(&session_id) {
            entry.is_idle = false;
        }

        if let Some(payload) = metadata_payload {
            self.send_to(session_id, ConnectionMessage::NewMetadata { payload });
        }

        if let Some(data) = aac_sequence_header {
            self.send_to(
                session_id,
                ConnectionMessage::NewAudioData {
                    timestamp: RtmpTimestamp::new(0),
                    data,
                    can_be_dropped: false,
                },
            );
        }

        if let Some(data) = avc_sequence_header {
            self.send_to(
                session_id,
                ConnectionMessage::NewVideoData {
                    timestamp: RtmpTimestamp::new(0),
                    data,
                    can_be_dropped: false,
                },
            );
        }

        for frame in gop_frames {
            let message = match frame.kind {
                MediaKind::Audio => ConnectionMessage::NewAudioData {
                    timestamp: frame.timestamp,
                    data: frame.data,
                    can_be_dropped: false,
                },
                MediaKind::Video => ConnectionMessage::NewVideoData {
                    timestamp: frame.timestamp,
                    data: frame.data,
                    can_be_dropped: false,
                },
            };

            self.send_to(session_id, message);
        }
    }

    fn handle_metadata(&mut self, session_id: SessionId, metadata: StreamMetadata, payload: Bytes) {
        let stream_path = match self.publish_path_of(session_id) {
            Some(path) => path,
            None => return,
        };

        let stream = match self.streams.get_mut(&stream_path) {
            Some(stream) => stream,
            None => return,
        };

        stream.metadata = Some(metadata);
        stream.metadata_payload = Some(payload.clone());

        let subscribers: Vec<SessionId> = stream.subscribers.iter().copied().collect();
        for subscriber in subscribers {
            self.send_to(
                subscriber,
                ConnectionMessage::NewMetadata {
                    payload: payload.clone(),
                },
            );
        }
    }

    fn handle_audio_data(&mut self, session_id: SessionId, timestamp: RtmpTimestamp, data: Bytes) {
        let stream_path = match self.publish_path_of(session_id) {
            Some(path) => path,
            None => return,
        };

        let stream = match self.streams.get_mut(&stream_path) {
            Some(stream) => stream,
            None => return,
        };

        let is_sequence_header = media::is_aac_sequence_header(&data);
        if is_sequence_header {
            stream.aac_sequence_header = Some(data.clone());
            stream.audio = media::parse_audio_descriptor(&data);
        } else {
            if stream.audio.is_none() {
                stream.audio = media::parse_audio_descriptor(&data);
            }

            if let Some(gop) = stream.gop.as_mut() {
                gop.append(MediaFrame {
                    kind: MediaKind::Audio,
                    timestamp,
                    data: data.clone(),
                });
            }
        }

        let subscribers: Vec<SessionId> = stream.subscribers.iter().copied().collect();
        for subscriber in subscribers {
            self.send_to(
                subscriber,
                ConnectionMessage::NewAudioData {
                    timestamp,
                    data: data.clone(),
                    can_be_dropped: !is_sequence_header,
                },
            );
        }
    }

    fn handle_video_data(&mut self, session_id: SessionId, timestamp: RtmpTimestamp, data: Bytes) {
        let stream_path = match self.publish_path_of(session_id) {
            Some(path) => path,
            None => return,
        };

        let stream = match self.streams.get_mut(&stream_path) {
            Some(stream) => stream,
            None => return,
        };

        let is_sequence_header = media::is_video_sequence_header(&data);
        let is_keyframe = media::is_video_keyframe(&data);

        if is_sequence_header {
            stream.avc_sequence_header = Some(data.clone());
            stream.video = media::parse_video_descriptor(&data);

            // A new decoder configuration invalidates everything cached so far
            if let Some(gop) = stream.gop.as_mut() {
                gop.clear();
            }
        } else if let Some(gop) = stream.gop.as_mut() {
            if is_keyframe {
                gop.clear();
            }

            gop.append(MediaFrame {
                kind: MediaKind::Video,
                timestamp,
                data: data.clone(),
            });
        }

        let subscribers: Vec<SessionId> = stream.subscribers.iter().copied().collect();
        for subscriber in subscribers {
            self.send_to(
                subscriber,
                ConnectionMessage::NewVideoData {
                    timestamp,
                    data: data.clone(),
                    can_be_dropped: !(is_sequence_header || is_keyframe),
                },
            );
        }
    }

    fn handle_player_resumed(&mut self, session_id: SessionId) {
        let stream_path = match self
            .sessions
            .get(&session_id)
            .and_then(|entry| entry.play_path.clone())
        {
            Some(path) => path,
            None => return,
        };

        let (aac, avc) = match self.streams.get(&stream_path) {
            Some(stream) => (
                stream.aac_sequence_header.clone(),
                stream.avc_sequence_header.clone(),
            ),
            None => return,
        };

        if let Some(data) = aac {
            self.send_to(
                session_id,
                ConnectionMessage::NewAudioData {
                    timestamp: RtmpTimestamp::new(0),
                    data,
                    can_be_dropped: false,
                },
            );
        }

        if let Some(data) = avc {
            self.send_to(
                session_id,
                ConnectionMessage::NewVideoData {
                    timestamp: RtmpTimestamp::new(0),
                    data,
                    can_be_dropped: false,
                },
            );
        }
    }

    fn handle_disconnected(&mut self, session_id: SessionId) {
        self.teardown_publisher(session_id);
        self.teardown_player(session_id);

        if self.sessions.remove(&session_id).is_some() {
            self.broadcast(RtmpEvent::DoneConnect { session_id });
        }
    }

    /// Removes a publisher and re-idles its subscribers.  Safe to call for
    /// sessions that never published; calling it twice is a no-op.
    fn teardown_publisher(&mut self, session_id: SessionId) {
        let stream_path = match self
            .sessions
            .get_mut(&session_id)
            .and_then(|entry| entry.publish_path.take())
        {
            Some(path) => path,
            None => return,
        };

        if self.publishers.get(&stream_path) != Some(&session_id) {
            warn!(
                session_id,
                %stream_path,
                "Publisher registry did not point at the finishing session"
            );
            return;
        }

        self.publishers.remove(&stream_path);

        if let Some(stream) = self.streams.remove(&stream_path) {
            for subscriber in stream.subscribers {
                self.send_to(subscriber, ConnectionMessage::StreamEnded);

                if let Some(entry) = self.sessions.get_mut(&subscriber) {
                    entry.is_idle = true;
                }

                self.idle_players
                    .entry(stream_path.clone())
                    .or_default()
                    .insert(subscriber);
            }
        }

        info!(session_id, %stream_path, "Publishing finished");

        self.broadcast(RtmpEvent::DonePublish {
            session_id,
            stream_path,
        });
    }

    /// Removes a player from whichever set (live or idle) it is in.  Safe to
    /// call for sessions that never played; calling it twice is a no-op.
    fn teardown_player(&mut self, session_id: SessionId) {
        let stream_path = match self
            .sessions
            .get_mut(&session_id)
            .and_then(|entry| entry.play_path.take())
        {
            Some(path) => path,
            None => return,
        };

        if let Some(entry) = self.sessions.get_mut(&session_id) {
            entry.is_idle = false;
        }

        if let Some(stream) = self.streams.get_mut(&stream_path) {
            stream.subscribers.remove(&session_id);
        }

        if let Some(waiting) = self.idle_players.get_mut(&stream_path) {
            waiting.remove(&session_id);
            if waiting.is_empty() {
                self.idle_players.remove(&stream_path);
            }
        }

        self.broadcast(RtmpEvent::DonePlay {
            session_id,
            stream_path,
        });
    }

    fn publish_path_of(&self, session_id: SessionId) -> Option<String> {
        self.sessions
            .get(&session_id)
            .and_then(|entry| entry.publish_path.clone())
    }

    fn send_to(&self, session_id: SessionId, message: ConnectionMessage) {
        if let Some(entry) = self.sessions.get(&session_id) {
            // A closed channel means the connection task is already gone; its
            // Disconnected message will clean the registries up
            let _ = entry.sender.send(message);
        }
    }

    fn broadcast(&self, event: RtmpEvent) {
        // Errors only mean nobody is listening right now
        let _ = self.events.send(event);
    }
}
