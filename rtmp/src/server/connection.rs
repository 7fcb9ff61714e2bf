//! One task per accepted TCP connection: drives the handshake, feeds socket
//! bytes through the session state machine, relays raised events to the hub,
//! and forwards hub fan-out into the socket via a dedicated writer task.

use crate::auth::SignatureVerifier;
use crate::chunk_io::Packet;
use crate::handshake::{HandshakeError, HandshakeProcessResult, ServerHandshake};
use crate::hub::{ConnectionMessage, HubMessage, SessionId, StreamHubHandle};
use crate::sessions::{
    ServerSession, ServerSessionConfig, ServerSessionError, ServerSessionEvent, ServerSessionResult,
};
use bytes::BytesMut;
use futures::future::FutureExt;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

#[derive(Clone)]
pub(crate) struct ConnectionSettings {
    pub session_config: ServerSessionConfig,
    pub ping_interval: Duration,
    pub idle_timeout: Duration,
}

#[derive(Debug, Error)]
enum ConnectionError {
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Session error: {0}")]
    Session(#[from] ServerSessionError),

    #[error("Socket error: {0}")]
    Io(#[from] io::Error),
}

#[derive(PartialEq)]
enum ConnectionAction {
    None,
    Disconnect,
}

pub(crate) async fn run(
    session_id: SessionId,
    stream: TcpStream,
    peer_address: SocketAddr,
    hub: StreamHubHandle,
    settings: ConnectionSettings,
    verifier: Arc<dyn SignatureVerifier>,
    cancellation: CancellationToken,
) {
    match serve(
        session_id,
        stream,
        peer_address,
        &hub,
        settings,
        verifier,
        cancellation,
    )
    .await
    {
        Ok(()) => debug!(session_id, "Connection closed"),
        Err(error) => debug!(session_id, %error, "Connection closed with error"),
    }

    // Registry cleanup happens in the hub and is idempotent
    hub.send(HubMessage::Disconnected { session_id });
}

async fn serve(
    session_id: SessionId,
    mut stream: TcpStream,
    peer_address: SocketAddr,
    hub: &StreamHubHandle,
    settings: ConnectionSettings,
    verifier: Arc<dyn SignatureVerifier>,
    cancellation: CancellationToken,
) -> Result<(), ConnectionError> {
    let _ = stream.set_nodelay(true);

    let leftover_bytes = match perform_handshake(
        &mut stream,
        settings.idle_timeout,
        &cancellation,
    )
    .await?
    {
        Some(bytes) => bytes,
        None => return Ok(()), // peer went away mid-handshake
    };

    let (mut stream_reader, stream_writer) = tokio::io::split(stream);

    let (packet_sender, packet_receiver) = mpsc::unbounded_channel();
    tokio::spawn(connection_writer(
        session_id,
        stream_writer,
        packet_receiver,
    ));

    let (message_sender, mut message_receiver) = mpsc::unbounded_channel();
    hub.send(HubMessage::Register {
        session_id,
        peer_address,
        sender: message_sender,
        kill_switch: cancellation.clone(),
    });

    let mut session = ServerSession::new(settings.session_config, peer_address, verifier);

    let mut results = session.handle_input(&leftover_bytes)?;

    // Armed once the peer's connect is accepted; until then there is nobody
    // worth pinging
    let mut ping_timer: Option<tokio::time::Interval> = None;

    let mut read_buffer = BytesMut::with_capacity(4096);

    loop {
        let action = process_session_results(
            session_id,
            &mut session,
            results,
            hub,
            &packet_sender,
            &cancellation,
            &mut ping_timer,
            settings.ping_interval,
        )?;

        if action == ConnectionAction::Disconnect {
            break;
        }

        results = tokio::select! {
            _ = cancellation.cancelled() => break,

            read_result = timeout(settings.idle_timeout, stream_reader.read_buf(&mut read_buffer)) => {
                match read_result {
                    Err(_) => {
                        debug!(session_id, "Socket idle timeout");
                        break;
                    }

                    Ok(Ok(0)) => break,

                    Ok(Ok(_)) => {
                        let bytes = read_buffer.split();
                        session.handle_input(&bytes)?
                    }

                    Ok(Err(error)) => return Err(error.into()),
                }
            }

            message = message_receiver.recv() => {
                match message {
                    None => break,
                    Some(message) => {
                        handle_hub_message(&mut session, message, &packet_sender)?
                    }
                }
            }

            _ = ping_tick(&mut ping_timer) => {
                let packet = session.send_ping_request()?;
                if !send_packet(&packet_sender, packet) {
                    break;
                }

                Vec::new()
            }
        };
    }

    Ok(())
}

/// Waits for the next keepalive tick.  Before the timer is armed (which
/// happens when the peer's connect is accepted) this never resolves.
async fn ping_tick(timer: &mut Option<tokio::time::Interval>) {
    match timer.as_mut() {
        Some(timer) => {
            timer.tick().await;
        }

        None => std::future::pending::<()>().await,
    }
}

/// Runs the handshake over the raw socket.  Returns any bytes received past
/// C2 (they belong to the chunk stream), or `None` on a clean disconnect.
async fn perform_handshake(
    stream: &mut TcpStream,
    idle_timeout: Duration,
    cancellation: &CancellationToken,
) -> Result<Option<Vec<u8>>, ConnectionError> {
    let mut handshake = ServerHandshake::new();
    let mut buffer = [0_u8; 4096];

    loop {
        let bytes_read = tokio::select! {
            _ = cancellation.cancelled() => return Ok(None),

            read_result = timeout(idle_timeout, stream.read(&mut buffer)) => {
                match read_result {
                    Err(_) => return Ok(None), // idle timeout
                    Ok(result) => result?,
                }
            }
        };

        if bytes_read == 0 {
            return Ok(None);
        }

        match handshake.process_bytes(&buffer[..bytes_read])? {
            HandshakeProcessResult::InProgress { response_bytes } => {
                if !response_bytes.is_empty() {
                    stream.write_all(&response_bytes).await?;
                }
            }

            HandshakeProcessResult::Completed {
                response_bytes,
                remaining_bytes,
            } => {
                if !response_bytes.is_empty() {
                    stream.write_all(&response_bytes).await?;
                }

                return Ok(Some(remaining_bytes));
            }
        }
    }
}

fn process_session_results(
    session_id: SessionId,
    session: &mut ServerSession,
    results: Vec<ServerSessionResult>,
    hub: &StreamHubHandle,
    packet_sender: &mpsc::UnboundedSender<Packet>,
    cancellation: &CancellationToken,
    ping_timer: &mut Option<tokio::time::Interval>,
    ping_interval: Duration,
) -> Result<ConnectionAction, ConnectionError> {
    let mut pending: VecDeque<ServerSessionResult> = results.into();

    // A disconnect decided by an event handler still lets already-produced
    // packets (a rejection status, say) drain to the writer first
    let mut disconnect_when_drained = false;

    while let Some(result) = pending.pop_front() {
        match result {
            ServerSessionResult::OutboundResponse(packet) => {
                if !send_packet(packet_sender, packet) {
                    return Ok(ConnectionAction::Disconnect);
                }
            }

            ServerSessionResult::RaisedEvent(event) => {
                let (new_results, action) = handle_raised_event(
                    session_id,
                    session,
                    event,
                    hub,
                    cancellation,
                    ping_timer,
                    ping_interval,
                )?;

                if action == ConnectionAction::Disconnect {
                    disconnect_when_drained = true;
                }

                pending.extend(new_results);
            }

            ServerSessionResult::UnhandleableMessageReceived(payload) => {
                trace!(
                    session_id,
                    type_id = payload.type_id,
                    "Unhandleable message received"
                );
            }
        }
    }

    if disconnect_when_drained {
        Ok(ConnectionAction::Disconnect)
    } else {
        Ok(ConnectionAction::None)
    }
}

fn handle_raised_event(
    session_id: SessionId,
    session: &mut ServerSession,
    event: ServerSessionEvent,
    hub: &StreamHubHandle,
    cancellation: &CancellationToken,
    ping_timer: &mut Option<tokio::time::Interval>,
    ping_interval: Duration,
) -> Result<(Vec<ServerSessionResult>, ConnectionAction), ConnectionError> {
    match event {
        ServerSessionEvent::ConnectionRequested {
            request_id,
            app_name,
            flash_version,
            tc_url,
        } => {
            hub.send(HubMessage::Connecting {
                session_id,
                app_name: app_name.clone(),
                flash_version,
                tc_url,
            });

            // A listener reacting to the connect notification (or a server
            // stop) may have killed this session; turn the peer away instead
            // of welcoming it
            if cancellation.is_cancelled() {
                let results = session.reject_request(request_id)?;
                return Ok((results, ConnectionAction::Disconnect));
            }

            let results = session.accept_request(request_id)?;

            // The keepalive cadence starts now that the peer is connected
            let first_tick = tokio::time::Instant::now() + ping_interval;
            *ping_timer = Some(tokio::time::interval_at(first_tick, ping_interval));

            hub.send(HubMessage::Connected {
                session_id,
                app_name,
            });

            Ok((results, ConnectionAction::None))
        }

        ServerSessionEvent::PublishStreamRequested {
            request_id,
            stream_path,
            ..
        } => {
            hub.send(HubMessage::PublishRequest {
                session_id,
                request_id,
                stream_path,
            });

            Ok((Vec::new(), ConnectionAction::None))
        }

        ServerSessionEvent::PlayStreamRequested {
            request_id,
            stream_path,
            ..
        } => {
            hub.send(HubMessage::PlayRequest {
                session_id,
                request_id,
                stream_path,
            });

            Ok((Vec::new(), ConnectionAction::None))
        }

        ServerSessionEvent::PublishStreamFinished { .. } => {
            hub.send(HubMessage::PublishFinished { session_id });
            Ok((Vec::new(), ConnectionAction::None))
        }

        ServerSessionEvent::PlayStreamFinished { .. } => {
            hub.send(HubMessage::PlayFinished { session_id });
            Ok((Vec::new(), ConnectionAction::None))
        }

        ServerSessionEvent::StreamMetadataChanged {
            metadata, payload, ..
        } => {
            hub.send(HubMessage::MetadataUpdated {
                session_id,
                metadata,
                payload,
            });

            Ok((Vec::new(), ConnectionAction::None))
        }

        ServerSessionEvent::AudioDataReceived { data, timestamp } => {
            hub.send(HubMessage::AudioData {
                session_id,
                timestamp,
                data,
            });

            Ok((Vec::new(), ConnectionAction::None))
        }

        ServerSessionEvent::VideoDataReceived { data, timestamp } => {
            hub.send(HubMessage::VideoData {
                session_id,
                timestamp,
                data,
            });

            Ok((Vec::new(), ConnectionAction::None))
        }

        ServerSessionEvent::PauseChanged { paused } => {
            if !paused {
                // The pause acknowledgement already went out; the hub follows
                // up with the sequence headers before any further live frames
                hub.send(HubMessage::PlayerResumed { session_id });
            }

            Ok((Vec::new(), ConnectionAction::None))
        }

        ServerSessionEvent::AcknowledgementReceived { bytes_received } => {
            trace!(session_id, bytes_received, "Acknowledgement received");
            Ok((Vec::new(), ConnectionAction::None))
        }

        ServerSessionEvent::PingResponseReceived { .. } => {
            trace!(session_id, "Ping response received");
            Ok((Vec::new(), ConnectionAction::None))
        }

        ServerSessionEvent::UnhandleableAmf0Command { command_name, .. } => {
            debug!(session_id, command = %command_name, "Ignoring unknown command");
            Ok((Vec::new(), ConnectionAction::None))
        }
    }
}

fn handle_hub_message(
    session: &mut ServerSession,
    message: ConnectionMessage,
    packet_sender: &mpsc::UnboundedSender<Packet>,
) -> Result<Vec<ServerSessionResult>, ConnectionError> {
    match message {
        ConnectionMessage::RequestAccepted { request_id } => {
            Ok(session.accept_request(request_id)?)
        }

        ConnectionMessage::RequestDenied { request_id } => Ok(session.reject_request(request_id)?),

        ConnectionMessage::NewAudioData {
            timestamp,
            data,
            can_be_dropped,
        } => {
            if session.is_playing() && !session.is_paused() && session.is_receiving_audio() {
                let packet = session.send_audio_data(data, timestamp, can_be_dropped)?;
                send_packet(packet_sender, packet);
            }

            Ok(Vec::new())
        }

        ConnectionMessage::NewVideoData {
            timestamp,
            data,
            can_be_dropped,
        } => {
            if session.is_playing() && !session.is_paused() && session.is_receiving_video() {
                let packet = session.send_video_data(data, timestamp, can_be_dropped)?;
                send_packet(packet_sender, packet);
            }

            Ok(Vec::new())
        }

        ConnectionMessage::NewMetadata { payload } => {
            if session.is_playing() && !session.is_paused() {
                let packet = session.send_metadata(payload)?;
                send_packet(packet_sender, packet);
            }

            Ok(Vec::new())
        }

        ConnectionMessage::StreamEnded => Ok(session.send_unpublish_notify()?),
    }
}

fn send_packet(sender: &mpsc::UnboundedSender<Packet>, packet: Packet) -> bool {
    sender.send(packet).is_ok()
}

async fn connection_writer(
    session_id: SessionId,
    mut stream: WriteHalf<TcpStream>,
    mut packets_to_send: mpsc::UnboundedReceiver<Packet>,
) {
    if let Err(error) = write_packets(session_id, &mut stream, &mut packets_to_send).await {
        debug!(session_id, %error, "Writer stopped");
    }
}

async fn write_packets(
    session_id: SessionId,
    stream: &mut WriteHalf<TcpStream>,
    packets_to_send: &mut mpsc::UnboundedReceiver<Packet>,
) -> Result<(), io::Error> {
    const BACKLOG_THRESHOLD: usize = 100;
    let mut send_queue = VecDeque::new();

    while let Some(packet) = packets_to_send.recv().await {
        // Since RTMP is TCP based, if bandwidth is low between the server and the client then
        // we will end up backlogging the mpsc receiver.  However, mpsc does not have a good
        // way to know how many items are pending.  So we need to receive all pending packets
        // in a non-blocking manner, put them in a queue, and if the queue is too large ignore
        // optional packets.
        send_queue.push_back(packet);
        while let Some(Some(packet)) = packets_to_send.recv().now_or_never() {
            send_queue.push_back(packet);
        }

        let mut send_optional_packets = true;
        if send_queue.len() > BACKLOG_THRESHOLD {
            warn!(
                session_id,
                pending = send_queue.len(),
                "Too many pending packets, dropping optional ones"
            );
            send_optional_packets = false;
        }

        for packet in send_queue.drain(..) {
            if send_optional_packets || !packet.can_be_dropped {
                stream.write_all(packet.bytes.as_ref()).await?;
            }
        }
    }

    Ok(())
}
