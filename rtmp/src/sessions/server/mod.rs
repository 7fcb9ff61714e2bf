mod config;
mod errors;
mod events;
mod result;

#[cfg(test)]
mod tests;

use crate::auth::{is_local_peer, SignatureVerifier};
use crate::chunk_io::{ChunkDeserializer, ChunkSerializer, Packet};
use crate::messages::{
    MessagePayload, PeerBandwidthLimitType, RtmpMessage, UserControlEventType,
};
use crate::sessions::StreamMetadata;
use crate::time::RtmpTimestamp;
use bytes::Bytes;
use cinder_amf::{Amf0Properties, Amf0Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub use self::config::ServerSessionConfig;
pub use self::errors::ServerSessionError;
pub use self::events::ServerSessionEvent;
pub use self::result::ServerSessionResult;

// Counting received bytes toward the peer's acknowledgement window would
// eventually overflow on long lived streams, so the counters are reset
// proactively well before the wrap point.
const ACK_COUNTER_RESET_THRESHOLD: u32 = 0xf0000000;

#[derive(PartialEq, Debug)]
enum SessionState {
    Started,
    Connected,
}

/// What an outstanding request is asking permission for, surfaced so hosting
/// code can tell request types apart when accepting or rejecting them.
#[derive(PartialEq, Debug, Clone)]
pub enum OutstandingRequestPurpose {
    Connect,
    Publish,
    Play,
}

enum OutstandingRequest {
    ConnectionRequest {
        app_name: String,
        transaction_id: f64,
    },

    PublishRequest {
        stream_id: u32,
        stream_path: String,
    },

    PlayRequest {
        stream_id: u32,
        stream_path: String,
    },
}

struct PublishState {
    stream_id: u32,
    stream_path: String,
}

struct PlayState {
    stream_id: u32,
    stream_path: String,
    paused: bool,
    receive_audio: bool,
    receive_video: bool,
}

/// A session that represents the server side of a single RTMP connection.
///
/// The `ServerSession` encapsulates the process of parsing RTMP chunks coming in from a client
/// into RTMP messages and performs common server side workflows to handle those messages.  It
/// either provides pre-serialized packets to be sent back to the client or raises events that
/// the hosting connection performs custom logic against (like arbitrating which session owns
/// a stream path).
///
/// The `ServerSession` does not care how RTMP chunks (encoded as bytes) come in or get sent out,
/// but leaves that up to the application utilizing the `ServerSession`.
///
/// Due to the header compression properties of the RTMP chunking protocol it is required that
/// all bytes **after** the handshake has been completed are passed into the `ServerSession`, that
/// all responses returned by the `ServerSession` are sent to the client **in order**, and that
/// no additional bytes are sent to the client.  Any violation of these rules has a high
/// probability of causing RTMP chunk parsing errors by the peer or by the `ServerSession`
/// instance itself.
pub struct ServerSession {
    start_time: Instant,
    config: ServerSessionConfig,
    peer_address: SocketAddr,
    verifier: Arc<dyn SignatureVerifier>,
    serializer: ChunkSerializer,
    deserializer: ChunkDeserializer,
    current_state: SessionState,
    connected_app_name: Option<String>,
    object_encoding: f64,
    outstanding_requests: HashMap<u32, OutstandingRequest>,
    next_request_number: u32,
    next_stream_id: u32,
    publish_state: Option<PublishState>,
    play_state: Option<PlayState>,
    bytes_received: u32,
    bytes_received_at_last_ack: u32,
    peer_window_ack_size: u32,
}

impl ServerSession {
    /// Creates a new server session for an accepted connection.  No bytes are
    /// produced until the client's `connect` command is accepted.
    pub fn new(
        config: ServerSessionConfig,
        peer_address: SocketAddr,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> ServerSession {
        ServerSession {
            start_time: Instant::now(),
            config,
            peer_address,
            verifier,
            serializer: ChunkSerializer::new(),
            deserializer: ChunkDeserializer::new(),
            current_state: SessionState::Started,
            connected_app_name: None,
            object_encoding: 0.0,
            outstanding_requests: HashMap::new(),
            next_request_number: 0,
            next_stream_id: 1,
            publish_state: None,
            play_state: None,
            bytes_received: 0,
            bytes_received_at_last_ack: 0,
            peer_window_ack_size: 0,
        }
    }

    /// Takes in bytes that are encoding RTMP chunks and returns any responses or events that can
    /// be reacted to.
    pub fn handle_input(
        &mut self,
        bytes: &[u8],
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let mut results = Vec::new();

        self.count_received_bytes(bytes.len(), &mut results)?;

        let mut bytes_to_process = bytes;

        loop {
            match self.deserializer.get_next_message(bytes_to_process)? {
                None => break,
                Some(payload) => {
                    let message = payload.to_rtmp_message()?;

                    let mut message_results = match message {
                        RtmpMessage::Abort { stream_id } => self.handle_abort_message(stream_id)?,

                        RtmpMessage::Acknowledgement { sequence_number } => {
                            self.handle_acknowledgement_message(sequence_number)?
                        }

                        RtmpMessage::Amf0Command {
                            command_name,
                            transaction_id,
                            command_object,
                            additional_arguments,
                        } => self.handle_amf0_command(
                            payload.message_stream_id,
                            command_name,
                            transaction_id,
                            command_object,
                            additional_arguments,
                        )?,

                        RtmpMessage::Amf0Data { values } => {
                            self.handle_amf0_data(values, payload.message_stream_id)?
                        }

                        RtmpMessage::AudioData { data } => {
                            self.handle_audio_data(data, payload.timestamp)?
                        }

                        RtmpMessage::SetChunkSize { size } => self.handle_set_chunk_size(size)?,

                        RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                            self.handle_set_peer_bandwidth(size, limit_type)?
                        }

                        RtmpMessage::UserControl {
                            event_type,
                            stream_id,
                            buffer_length,
                            timestamp,
                        } => self.handle_user_control(
                            event_type,
                            stream_id,
                            buffer_length,
                            timestamp,
                        )?,

                        RtmpMessage::VideoData { data } => {
                            self.handle_video_data(data, payload.timestamp)?
                        }

                        RtmpMessage::WindowAcknowledgement { size } => {
                            self.handle_window_acknowledgement(size)?
                        }

                        _ => vec![ServerSessionResult::UnhandleableMessageReceived(payload)],
                    };

                    results.append(&mut message_results);
                    bytes_to_process = &[];
                }
            }
        }

        Ok(results)
    }

    /// Tells the server session that it should accept an outstanding request
    pub fn accept_request(
        &mut self,
        request_id: u32,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let request = match self.outstanding_requests.remove(&request_id) {
            Some(x) => x,
            None => return Err(ServerSessionError::InvalidRequestId),
        };

        match request {
            OutstandingRequest::ConnectionRequest {
                app_name,
                transaction_id,
            } => self.accept_connection_request(app_name, transaction_id),

            OutstandingRequest::PublishRequest {
                stream_id,
                stream_path,
            } => self.accept_publish_request(stream_id, stream_path),

            OutstandingRequest::PlayRequest {
                stream_id,
                stream_path,
            } => self.accept_play_request(stream_id, stream_path),
        }
    }

    /// Tells the server session that an outstanding request was denied.  The
    /// appropriate error status is sent to the peer; the connection itself
    /// stays open.
    pub fn reject_request(
        &mut self,
        request_id: u32,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let request = match self.outstanding_requests.remove(&request_id) {
            Some(x) => x,
            None => return Err(ServerSessionError::InvalidRequestId),
        };

        match request {
            OutstandingRequest::ConnectionRequest { transaction_id, .. } => {
                let properties = vec![
                    (
                        "fmsVer".to_string(),
                        Amf0Value::Utf8String(self.config.fms_version.clone()),
                    ),
                    ("capabilities".to_string(), Amf0Value::Number(31.0)),
                ];

                let information = status_object(
                    "error",
                    "NetConnection.Connect.Rejected",
                    "Connection rejected.",
                );

                let packet = self.create_error_response(
                    transaction_id,
                    Amf0Value::Object(properties),
                    vec![Amf0Value::Object(information)],
                    0,
                )?;

                Ok(vec![ServerSessionResult::OutboundResponse(packet)])
            }

            OutstandingRequest::PublishRequest {
                stream_id,
                stream_path,
            } => {
                let packet = self.create_status_packet(
                    "error",
                    "NetStream.Publish.BadName",
                    format!("{} is already published.", stream_path).as_str(),
                    stream_id,
                )?;

                Ok(vec![ServerSessionResult::OutboundResponse(packet)])
            }

            // The hub only turns a play request away when the session already
            // holds a play path, so the denial reads as a duplicate play
            OutstandingRequest::PlayRequest { stream_id, .. } => {
                let packet = self.create_status_packet(
                    "error",
                    "NetStream.Play.BadConnection",
                    "Connection already playing",
                    stream_id,
                )?;

                Ok(vec![ServerSessionResult::OutboundResponse(packet)])
            }
        }
    }

    /// What kind of request an outstanding request id refers to
    pub fn request_purpose(&self, request_id: u32) -> Option<OutstandingRequestPurpose> {
        self.outstanding_requests
            .get(&request_id)
            .map(|request| match request {
                OutstandingRequest::ConnectionRequest { .. } => OutstandingRequestPurpose::Connect,
                OutstandingRequest::PublishRequest { .. } => OutstandingRequestPurpose::Publish,
                OutstandingRequest::PlayRequest { .. } => OutstandingRequestPurpose::Play,
            })
    }

    pub fn is_publishing(&self) -> bool {
        self.publish_state.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.play_state.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.play_state.as_ref().map(|x| x.paused).unwrap_or(false)
    }

    pub fn is_receiving_audio(&self) -> bool {
        self.play_state
            .as_ref()
            .map(|x| x.receive_audio)
            .unwrap_or(false)
    }

    pub fn is_receiving_video(&self) -> bool {
        self.play_state
            .as_ref()
            .map(|x| x.receive_video)
            .unwrap_or(false)
    }

    pub fn app_name(&self) -> Option<&str> {
        self.connected_app_name.as_deref()
    }

    pub fn publish_stream_path(&self) -> Option<&str> {
        self.publish_state.as_ref().map(|x| x.stream_path.as_str())
    }

    pub fn play_stream_path(&self) -> Option<&str> {
        self.play_state.as_ref().map(|x| x.stream_path.as_str())
    }

    /// Produces an audio data packet addressed to the stream the session is playing
    pub fn send_audio_data(
        &mut self,
        data: Bytes,
        timestamp: RtmpTimestamp,
        can_be_dropped: bool,
    ) -> Result<Packet, ServerSessionError> {
        let stream_id = match self.play_state {
            Some(ref state) => state.stream_id,
            None => {
                return Err(ServerSessionError::ActionAttemptedOnInactiveStream {
                    action: "send_audio_data".to_string(),
                    stream_id: 0,
                })
            }
        };

        let message = RtmpMessage::AudioData { data };
        let payload = message.into_message_payload(timestamp, stream_id)?;
        let packet = self.serializer.serialize(&payload, false, can_be_dropped)?;
        Ok(packet)
    }

    /// Produces a video data packet addressed to the stream the session is playing
    pub fn send_video_data(
        &mut self,
        data: Bytes,
        timestamp: RtmpTimestamp,
        can_be_dropped: bool,
    ) -> Result<Packet, ServerSessionError> {
        let stream_id = match self.play_state {
            Some(ref state) => state.stream_id,
            None => {
                return Err(ServerSessionError::ActionAttemptedOnInactiveStream {
                    action: "send_video_data".to_string(),
                    stream_id: 0,
                })
            }
        };

        let message = RtmpMessage::VideoData { data };
        let payload = message.into_message_payload(timestamp, stream_id)?;
        let packet = self.serializer.serialize(&payload, false, can_be_dropped)?;
        Ok(packet)
    }

    /// Produces a data message packet carrying an already encoded `onMetaData`
    /// body, addressed to the stream the session is playing
    pub fn send_metadata(&mut self, payload: Bytes) -> Result<Packet, ServerSessionError> {
        let stream_id = match self.play_state {
            Some(ref state) => state.stream_id,
            None => {
                return Err(ServerSessionError::ActionAttemptedOnInactiveStream {
                    action: "send_metadata".to_string(),
                    stream_id: 0,
                })
            }
        };

        let message_payload = MessagePayload {
            timestamp: RtmpTimestamp::new(0),
            type_id: 18,
            message_stream_id: stream_id,
            data: payload,
        };

        let packet = self.serializer.serialize(&message_payload, false, false)?;
        Ok(packet)
    }

    /// Produces the messages telling a playing client that the stream it was
    /// watching stopped publishing.  The session stays subscribed (idle) and
    /// resumes automatically when a new publisher appears.
    pub fn send_unpublish_notify(
        &mut self,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let (stream_id, stream_path) = match self.play_state {
            Some(ref state) => (state.stream_id, state.stream_path.clone()),
            None => return Ok(Vec::new()),
        };

        let mut results = Vec::with_capacity(2);

        let status = self.create_status_packet(
            "status",
            "NetStream.Play.UnpublishNotify",
            format!("{} is now unpublished.", stream_path).as_str(),
            stream_id,
        )?;
        results.push(ServerSessionResult::OutboundResponse(status));

        let eof = self.create_user_control_packet(UserControlEventType::StreamEof, stream_id)?;
        results.push(ServerSessionResult::OutboundResponse(eof));

        Ok(results)
    }

    /// Produces a ping request carrying the number of milliseconds since the
    /// session started
    pub fn send_ping_request(&mut self) -> Result<Packet, ServerSessionError> {
        let epoch = self.get_epoch();
        let message = RtmpMessage::UserControl {
            event_type: UserControlEventType::PingRequest,
            stream_id: None,
            buffer_length: None,
            timestamp: Some(epoch),
        };

        let payload = message.into_message_payload(epoch, 0)?;
        let packet = self.serializer.serialize(&payload, false, false)?;
        Ok(packet)
    }

    fn count_received_bytes(
        &mut self,
        byte_count: usize,
        results: &mut Vec<ServerSessionResult>,
    ) -> Result<(), ServerSessionError> {
        self.bytes_received = self.bytes_received.wrapping_add(byte_count as u32);

        if self.bytes_received >= ACK_COUNTER_RESET_THRESHOLD {
            self.bytes_received = 0;
            self.bytes_received_at_last_ack = 0;
        }

        if self.peer_window_ack_size == 0 {
            return Ok(());
        }

        if self.bytes_received.wrapping_sub(self.bytes_received_at_last_ack)
            >= self.peer_window_ack_size
        {
            self.bytes_received_at_last_ack = self.bytes_received;

            let message = RtmpMessage::Acknowledgement {
                sequence_number: self.bytes_received,
            };

            let payload = message.into_message_payload(self.get_epoch(), 0)?;
            let packet = self.serializer.serialize(&payload, false, false)?;
            results.push(ServerSessionResult::OutboundResponse(packet));
        }

        Ok(())
    }

    fn handle_abort_message(
        &self,
        _stream_id: u32,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        Ok(Vec::new())
    }

    fn handle_acknowledgement_message(
        &self,
        sequence_number: u32,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let event = ServerSessionEvent::AcknowledgementReceived {
            bytes_received: sequence_number,
        };

        Ok(vec![ServerSessionResult::RaisedEvent(event)])
    }

    fn handle_amf0_command(
        &mut self,
        stream_id: u32,
        name: String,
        transaction_id: f64,
        command_object: Amf0Value,
        additional_args: Vec<Amf0Value>,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let results = match name.as_str() {
            "connect" => self.handle_command_connect(transaction_id, command_object)?,
            "createStream" => self.handle_command_create_stream(transaction_id)?,
            "publish" => self.handle_command_publish(stream_id, additional_args)?,
            "play" => self.handle_command_play(stream_id, additional_args)?,
            "pause" => self.handle_command_pause(additional_args)?,
            "deleteStream" => self.handle_command_delete_stream(additional_args)?,
            "closeStream" => self.handle_command_close_stream(stream_id)?,
            "receiveAudio" => self.handle_command_receive_audio(additional_args)?,
            "receiveVideo" => self.handle_command_receive_video(additional_args)?,

            _ => {
                debug!(command = %name, "Ignoring unsupported command");
                vec![ServerSessionResult::RaisedEvent(
                    ServerSessionEvent::UnhandleableAmf0Command {
                        command_name: name,
                        additional_values: additional_args,
                        transaction_id,
                        command_object,
                    },
                )]
            }
        };

        Ok(results)
    }

    fn handle_command_connect(
        &mut self,
        transaction_id: f64,
        command_object: Amf0Value,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let mut app_name = match command_object.get_property("app") {
            Some(Amf0Value::Utf8String(app)) => app.clone(),
            _ => return Err(ServerSessionError::NoAppNameForConnectionRequest),
        };

        // Some encoders send the app name with a leading slash
        if app_name.starts_with('/') {
            app_name.remove(0);
        }

        if app_name.is_empty() {
            return Err(ServerSessionError::NoAppNameForConnectionRequest);
        }

        self.object_encoding = match command_object.get_property("objectEncoding") {
            Some(Amf0Value::Number(number)) => *number,
            _ => 0.0,
        };

        let flash_version = match command_object.get_property("flashVer") {
            Some(Amf0Value::Utf8String(value)) => Some(value.clone()),
            _ => None,
        };

        let tc_url = match command_object.get_property("tcUrl") {
            Some(Amf0Value::Utf8String(value)) => Some(value.clone()),
            _ => None,
        };

        let request = OutstandingRequest::ConnectionRequest {
            app_name: app_name.clone(),
            transaction_id,
        };

        let request_id = self.store_request(request);

        let event = ServerSessionEvent::ConnectionRequested {
            app_name,
            request_id,
            flash_version,
            tc_url,
        };

        Ok(vec![ServerSessionResult::RaisedEvent(event)])
    }

    fn handle_command_create_stream(
        &mut self,
        transaction_id: f64,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let new_stream_id = self.next_stream_id;
        self.next_stream_id += 1;

        let packet = self.create_success_response(
            transaction_id,
            Amf0Value::Null,
            vec![Amf0Value::Number(new_stream_id as f64)],
            0,
        )?;

        Ok(vec![ServerSessionResult::OutboundResponse(packet)])
    }

    fn handle_command_publish(
        &mut self,
        stream_id: u32,
        mut arguments: Vec<Amf0Value>,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        if self.current_state != SessionState::Connected || self.connected_app_name.is_none() {
            let packet = self.create_status_packet(
                "error",
                "NetStream.Publish.BadConnection",
                "Can't publish before connecting",
                stream_id,
            )?;
            return Ok(vec![ServerSessionResult::OutboundResponse(packet)]);
        }

        let stream_name = match arguments.first_mut() {
            // Some encoders (an old Wirecast path among them) send a publish
            // command with a non-string stream name; drop it on the floor
            // rather than killing the session.
            Some(Amf0Value::Utf8String(name)) => std::mem::take(name),
            _ => {
                debug!("Publish command without a string stream name ignored");
                return Ok(Vec::new());
            }
        };

        let app_name = match self.connected_app_name {
            Some(ref name) => name.clone(),
            None => unreachable!(), // unreachable due to state check above
        };

        let (name, publish_arguments) = split_stream_arguments(&stream_name);
        let stream_path = format!("/{}/{}", app_name, name);

        if self.publish_state.is_some() {
            let packet = self.create_status_packet(
                "error",
                "NetStream.Publish.BadConnection",
                "Connection already publishing",
                stream_id,
            )?;
            return Ok(vec![ServerSessionResult::OutboundResponse(packet)]);
        }

        if self.config.auth_publish && !is_local_peer(&self.peer_address) {
            let sign = publish_arguments.get("sign").map(String::as_str);
            if !self
                .verifier
                .verify(sign, &stream_path, &self.config.auth_secret)
            {
                let packet = self.create_status_packet(
                    "error",
                    "NetStream.publish.Unauthorized",
                    "Authorization required.",
                    stream_id,
                )?;
                return Ok(vec![ServerSessionResult::OutboundResponse(packet)]);
            }
        }

        let request = OutstandingRequest::PublishRequest {
            stream_id,
            stream_path: stream_path.clone(),
        };

        let request_id = self.store_request(request);

        let event = ServerSessionEvent::PublishStreamRequested {
            request_id,
            app_name,
            stream_path,
            stream_id,
            arguments: publish_arguments,
        };

        Ok(vec![ServerSessionResult::RaisedEvent(event)])
    }

    fn handle_command_play(
        &mut self,
        stream_id: u32,
        mut arguments: Vec<Amf0Value>,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        if self.current_state != SessionState::Connected || self.connected_app_name.is_none() {
            let packet = self.create_status_packet(
                "error",
                "NetStream.Play.BadConnection",
                "Can't play before connecting",
                stream_id,
            )?;
            return Ok(vec![ServerSessionResult::OutboundResponse(packet)]);
        }

        let stream_name = match arguments.first_mut() {
            Some(Amf0Value::Utf8String(name)) => std::mem::take(name),
            _ => {
                debug!("Play command without a string stream name ignored");
                return Ok(Vec::new());
            }
        };

        let app_name = match self.connected_app_name {
            Some(ref name) => name.clone(),
            None => unreachable!(), // unreachable due to state check above
        };

        let (name, play_arguments) = split_stream_arguments(&stream_name);
        let stream_path = format!("/{}/{}", app_name, name);

        if self.play_state.is_some() {
            let packet = self.create_status_packet(
                "error",
                "NetStream.Play.BadConnection",
                "Connection already playing",
                stream_id,
            )?;
            return Ok(vec![ServerSessionResult::OutboundResponse(packet)]);
        }

        if self.config.auth_play && !is_local_peer(&self.peer_address) {
            let sign = play_arguments.get("sign").map(String::as_str);
            if !self
                .verifier
                .verify(sign, &stream_path, &self.config.auth_secret)
            {
                let packet = self.create_status_packet(
                    "error",
                    "NetStream.play.Unauthorized",
                    "Authorization required.",
                    stream_id,
                )?;
                return Ok(vec![ServerSessionResult::OutboundResponse(packet)]);
            }
        }

        let request = OutstandingRequest::PlayRequest {
            stream_id,
            stream_path: stream_path.clone(),
        };

        let request_id = self.store_request(request);

        let event = ServerSessionEvent::PlayStreamRequested {
            request_id,
            app_name,
            stream_path,
            stream_id,
            arguments: play_arguments,
        };

        Ok(vec![ServerSessionResult::RaisedEvent(event)])
    }

    fn handle_command_pause(
        &mut self,
        mut arguments: Vec<Amf0Value>,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let paused = match arguments.first_mut() {
            Some(Amf0Value::Boolean(value)) => *value,
            _ => return Ok(Vec::new()),
        };

        let (stream_id, already_paused) = match self.play_state {
            Some(ref state) => (state.stream_id, state.paused),
            None => return Ok(Vec::new()),
        };

        if paused == already_paused {
            return Ok(Vec::new());
        }

        if let Some(ref mut state) = self.play_state {
            state.paused = paused;
        }

        let mut results = Vec::with_capacity(3);

        if paused {
            let eof =
                self.create_user_control_packet(UserControlEventType::StreamEof, stream_id)?;
            results.push(ServerSessionResult::OutboundResponse(eof));

            let status = self.create_status_packet(
                "status",
                "NetStream.Pause.Notify",
                "Paused live",
                stream_id,
            )?;
            results.push(ServerSessionResult::OutboundResponse(status));
        } else {
            let begin =
                self.create_user_control_packet(UserControlEventType::StreamBegin, stream_id)?;
            results.push(ServerSessionResult::OutboundResponse(begin));

            let status = self.create_status_packet(
                "status",
                "NetStream.Unpause.Notify",
                "Unpaused live",
                stream_id,
            )?;
            results.push(ServerSessionResult::OutboundResponse(status));
        }

        results.push(ServerSessionResult::RaisedEvent(
            ServerSessionEvent::PauseChanged { paused },
        ));

        Ok(results)
    }

    fn handle_command_delete_stream(
        &mut self,
        mut arguments: Vec<Amf0Value>,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let stream_id = match arguments.first_mut() {
            Some(Amf0Value::Number(value)) => *value as u32,
            _ => return Ok(Vec::new()),
        };

        self.close_stream(stream_id)
    }

    fn handle_command_close_stream(
        &mut self,
        stream_id: u32,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        self.close_stream(stream_id)
    }

    fn close_stream(
        &mut self,
        stream_id: u32,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        let mut results = Vec::new();

        let app_name = self.connected_app_name.clone().unwrap_or_default();

        let play_matches = self
            .play_state
            .as_ref()
            .map(|state| state.stream_id == stream_id)
            .unwrap_or(false);

        if play_matches {
            if let Some(state) = self.play_state.take() {
                let packet = self.create_status_packet(
                    "status",
                    "NetStream.Play.Stop",
                    "Stopped playing stream.",
                    stream_id,
                )?;
                results.push(ServerSessionResult::OutboundResponse(packet));

                results.push(ServerSessionResult::RaisedEvent(
                    ServerSessionEvent::PlayStreamFinished {
                        app_name: app_name.clone(),
                        stream_path: state.stream_path,
                    },
                ));
            }
        }

        let publish_matches = self
            .publish_state
            .as_ref()
            .map(|state| state.stream_id == stream_id)
            .unwrap_or(false);

        if publish_matches {
            if let Some(state) = self.publish_state.take() {
                results.push(ServerSessionResult::RaisedEvent(
                    ServerSessionEvent::PublishStreamFinished {
                        app_name,
                        stream_path: state.stream_path,
                    },
                ));
            }
        }

        Ok(results)
    }

    fn handle_command_receive_audio(
        &mut self,
        mut arguments: Vec<Amf0Value>,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        if let Some(Amf0Value::Boolean(value)) = arguments.first_mut() {
            if let Some(ref mut state) = self.play_state {
                state.receive_audio = *value;
            }
        }

        Ok(Vec::new())
    }

    fn handle_command_receive_video(
        &mut self,
        mut arguments: Vec<Amf0Value>,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        if let Some(Amf0Value::Boolean(value)) = arguments.first_mut() {
            if let Some(ref mut state) = self.play_state {
                state.receive_video = *value;
            }
        }

        Ok(Vec::new())
    }

    fn handle_amf0_data(
        &mut self,
        mut data: Vec<Amf0Value>,
        _stream_id: u32,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        if data.is_empty() {
            return Ok(Vec::new());
        }

        let first_element = data.remove(0);
        match first_element {
            Amf0Value::Utf8String(ref value) if value == "@setDataFrame" => {
                self.handle_amf0_data_set_data_frame(data)
            }
            _ => Ok(Vec::new()),
        }
    }

    fn handle_amf0_data_set_data_frame(
        &mut self,
        mut data: Vec<Amf0Value>,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        if data.len() < 2 {
            // We are expecting an "onMetaData" value and then a property with the
            // actual metadata.
            return Ok(Vec::new());
        }

        match data[0] {
            Amf0Value::Utf8String(ref value) if value == "onMetaData" => (),
            _ => return Ok(Vec::new()),
        }

        // setDataFrame has no meaning until the session is publishing
        let (app_name, stream_path) = match (&self.connected_app_name, &self.publish_state) {
            (Some(app), Some(publish)) => (app.clone(), publish.stream_path.clone()),
            _ => return Ok(Vec::new()),
        };

        let object = data.remove(1);

        let mut metadata = StreamMetadata::new();
        if let Some(properties) = object.clone().get_object_properties() {
            metadata.apply_metadata_values(properties);
        }

        // Re-encode as a plain onMetaData data message for subscribers
        let payload = cinder_amf::serialize(&[
            Amf0Value::Utf8String("onMetaData".to_string()),
            object,
        ])
        .map_err(crate::messages::MessageSerializationError::from)?;

        let event = ServerSessionEvent::StreamMetadataChanged {
            app_name,
            stream_path,
            metadata,
            payload: Bytes::from(payload),
        };

        Ok(vec![ServerSessionResult::RaisedEvent(event)])
    }

    fn handle_audio_data(
        &mut self,
        data: Bytes,
        timestamp: RtmpTimestamp,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        if self.publish_state.is_none() {
            return Ok(Vec::new());
        }

        let event = ServerSessionEvent::AudioDataReceived { data, timestamp };
        Ok(vec![ServerSessionResult::RaisedEvent(event)])
    }

    fn handle_video_data(
        &mut self,
        data: Bytes,
        timestamp: RtmpTimestamp,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        if self.publish_state.is_none() {
            return Ok(Vec::new());
        }

        let event = ServerSessionEvent::VideoDataReceived { data, timestamp };
        Ok(vec![ServerSessionResult::RaisedEvent(event)])
    }

    fn handle_set_chunk_size(
        &mut self,
        size: u32,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        self.deserializer.set_max_chunk_size(size as usize)?;
        Ok(Vec::new())
    }

    fn handle_set_peer_bandwidth(
        &self,
        _size: u32,
        _limit_type: PeerBandwidthLimitType,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        Ok(Vec::new())
    }

    fn handle_user_control(
        &self,
        event_type: UserControlEventType,
        _stream_id: Option<u32>,
        _buffer_length: Option<u32>,
        timestamp: Option<RtmpTimestamp>,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        match event_type {
            UserControlEventType::PingResponse => {
                let event = ServerSessionEvent::PingResponseReceived {
                    timestamp: timestamp.unwrap_or_else(|| RtmpTimestamp::new(0)),
                };

                Ok(vec![ServerSessionResult::RaisedEvent(event)])
            }

            _ => Ok(Vec::new()),
        }
    }

    fn handle_window_acknowledgement(
        &mut self,
        size: u32,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        self.peer_window_ack_size = size;
        Ok(Vec::new())
    }

    fn accept_connection_request(
        &mut self,
        app_name: String,
        transaction_id: f64,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        self.connected_app_name = Some(app_name.clone());
        self.current_state = SessionState::Connected;

        let mut results = Vec::with_capacity(4);

        let window_ack_message = RtmpMessage::WindowAcknowledgement {
            size: self.config.window_ack_size,
        };
        let window_ack_payload = window_ack_message.into_message_payload(self.get_epoch(), 0)?;
        let window_ack_packet = self.serializer.serialize(&window_ack_payload, true, false)?;
        results.push(ServerSessionResult::OutboundResponse(window_ack_packet));

        let peer_message = RtmpMessage::SetPeerBandwidth {
            size: self.config.peer_bandwidth,
            limit_type: PeerBandwidthLimitType::Dynamic,
        };
        let peer_payload = peer_message.into_message_payload(self.get_epoch(), 0)?;
        let peer_packet = self.serializer.serialize(&peer_payload, true, false)?;
        results.push(ServerSessionResult::OutboundResponse(peer_packet));

        let chunk_size_packet = self
            .serializer
            .set_max_chunk_size(self.config.chunk_size, self.get_epoch())?;
        results.push(ServerSessionResult::OutboundResponse(chunk_size_packet));

        let properties = vec![
            (
                "fmsVer".to_string(),
                Amf0Value::Utf8String(self.config.fms_version.clone()),
            ),
            ("capabilities".to_string(), Amf0Value::Number(31.0)),
        ];

        let mut information = status_object(
            "status",
            "NetConnection.Connect.Success",
            format!("Successfully connected on app: {}", app_name).as_str(),
        );
        information.push((
            "objectEncoding".to_string(),
            Amf0Value::Number(self.object_encoding),
        ));

        let result_packet = self.create_success_response(
            transaction_id,
            Amf0Value::Object(properties),
            vec![Amf0Value::Object(information)],
            0,
        )?;
        results.push(ServerSessionResult::OutboundResponse(result_packet));

        Ok(results)
    }

    fn accept_publish_request(
        &mut self,
        stream_id: u32,
        stream_path: String,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        self.publish_state = Some(PublishState {
            stream_id,
            stream_path: stream_path.clone(),
        });

        let packet = self.create_status_packet(
            "status",
            "NetStream.Publish.Start",
            format!("{} is now published.", stream_path).as_str(),
            stream_id,
        )?;

        Ok(vec![ServerSessionResult::OutboundResponse(packet)])
    }

    fn accept_play_request(
        &mut self,
        stream_id: u32,
        stream_path: String,
    ) -> Result<Vec<ServerSessionResult>, ServerSessionError> {
        self.play_state = Some(PlayState {
            stream_id,
            stream_path,
            paused: false,
            receive_audio: true,
            receive_video: true,
        });

        let mut results = Vec::with_capacity(4);

        let begin =
            self.create_user_control_packet(UserControlEventType::StreamBegin, stream_id)?;
        results.push(ServerSessionResult::OutboundResponse(begin));

        let reset = self.create_status_packet(
            "status",
            "NetStream.Play.Reset",
            "Playing and resetting stream.",
            stream_id,
        )?;
        results.push(ServerSessionResult::OutboundResponse(reset));

        let start = self.create_status_packet(
            "status",
            "NetStream.Play.Start",
            "Started playing stream.",
            stream_id,
        )?;
        results.push(ServerSessionResult::OutboundResponse(start));

        let sample_access = RtmpMessage::Amf0Data {
            values: vec![
                Amf0Value::Utf8String("|RtmpSampleAccess".to_string()),
                Amf0Value::Boolean(false),
                Amf0Value::Boolean(false),
            ],
        };
        let sample_access_payload =
            sample_access.into_message_payload(self.get_epoch(), stream_id)?;
        let sample_access_packet = self
            .serializer
            .serialize(&sample_access_payload, false, false)?;
        results.push(ServerSessionResult::OutboundResponse(sample_access_packet));

        Ok(results)
    }

    fn store_request(&mut self, request: OutstandingRequest) -> u32 {
        let request_id = self.next_request_number;
        self.next_request_number += 1;
        self.outstanding_requests.insert(request_id, request);

        request_id
    }

    fn create_success_response(
        &mut self,
        transaction_id: f64,
        command_object: Amf0Value,
        additional_arguments: Vec<Amf0Value>,
        stream_id: u32,
    ) -> Result<Packet, ServerSessionError> {
        let message = RtmpMessage::Amf0Command {
            command_name: "_result".to_string(),
            transaction_id,
            command_object,
            additional_arguments,
        };

        let payload = message.into_message_payload(self.get_epoch(), stream_id)?;
        let packet = self.serializer.serialize(&payload, false, false)?;
        Ok(packet)
    }

    fn create_error_response(
        &mut self,
        transaction_id: f64,
        command_object: Amf0Value,
        additional_arguments: Vec<Amf0Value>,
        stream_id: u32,
    ) -> Result<Packet, ServerSessionError> {
        let message = RtmpMessage::Amf0Command {
            command_name: "_error".to_string(),
            transaction_id,
            command_object,
            additional_arguments,
        };

        let payload = message.into_message_payload(self.get_epoch(), stream_id)?;
        let packet = self.serializer.serialize(&payload, false, false)?;
        Ok(packet)
    }

    fn create_status_packet(
        &mut self,
        level: &str,
        code: &str,
        description: &str,
        stream_id: u32,
    ) -> Result<Packet, ServerSessionError> {
        let information = status_object(level, code, description);

        let message = RtmpMessage::Amf0Command {
            command_name: "onStatus".to_string(),
            transaction_id: 0.0,
            command_object: Amf0Value::Null,
            additional_arguments: vec![Amf0Value::Object(information)],
        };

        let payload = message.into_message_payload(self.get_epoch(), stream_id)?;
        let packet = self.serializer.serialize(&payload, false, false)?;
        Ok(packet)
    }

    fn create_user_control_packet(
        &mut self,
        event_type: UserControlEventType,
        stream_id: u32,
    ) -> Result<Packet, ServerSessionError> {
        let message = RtmpMessage::UserControl {
            event_type,
            stream_id: Some(stream_id),
            buffer_length: None,
            timestamp: None,
        };

        let payload = message.into_message_payload(self.get_epoch(), 0)?;
        let packet = self.serializer.serialize(&payload, false, false)?;
        Ok(packet)
    }

    fn get_epoch(&self) -> RtmpTimestamp {
        let milliseconds = self.start_time.elapsed().as_millis();

        // Casting to u32 wraps the value as RTMP timestamps expect
        RtmpTimestamp::new(milliseconds as u32)
    }
}

fn status_object(level: &str, code: &str, description: &str) -> Amf0Properties {
    vec![
        (
            "level".to_string(),
            Amf0Value::Utf8String(level.to_string()),
        ),
        ("code".to_string(), Amf0Value::Utf8String(code.to_string())),
        (
            "description".to_string(),
            Amf0Value::Utf8String(description.to_string()),
        ),
    ]
}

/// Splits a stream name from its query string portion, returning the bare
/// name and the parsed key/value arguments.
fn split_stream_arguments(stream_name: &str) -> (String, HashMap<String, String>) {
    let mut parts = stream_name.splitn(2, '?');
    let name = parts.next().unwrap_or_default().to_string();

    let mut arguments = HashMap::new();
    if let Some(query) = parts.next() {
        for pair in query.split('&') {
            if pair.is_empty() {
                continue;
            }

            let mut key_value = pair.splitn(2, '=');
            let key = key_value.next().unwrap_or_default();
            let value = key_value.next().unwrap_or_default();
            arguments.insert(key.to_string(), value.to_string());
        }
    }

    (name, arguments)
}
