use super::*;
use crate::auth::{AcceptAllVerifier, SignatureVerifier};
use crate::chunk_io::{ChunkDeserializer, ChunkSerializer};
use crate::messages::{MessagePayload, PeerBandwidthLimitType, RtmpMessage, UserControlEventType};
use bytes::Bytes;
use cinder_amf::Amf0Value;
use std::net::SocketAddr;
use std::sync::Arc;

const DEFAULT_CHUNK_SIZE: u32 = 1111;
const DEFAULT_PEER_BANDWIDTH: u32 = 2222;
const DEFAULT_WINDOW_ACK_SIZE: u32 = 3333;

struct RejectAllVerifier;

impl SignatureVerifier for RejectAllVerifier {
    fn verify(&self, _sign: Option<&str>, _stream_path: &str, _secret: &str) -> bool {
        false
    }
}

struct RecordingVerifier;

impl SignatureVerifier for RecordingVerifier {
    fn verify(&self, sign: Option<&str>, stream_path: &str, secret: &str) -> bool {
        sign == Some("good-signature") && stream_path == "/some_app/stream_key" && secret == "s3"
    }
}

fn get_basic_config() -> ServerSessionConfig {
    ServerSessionConfig {
        chunk_size: DEFAULT_CHUNK_SIZE,
        fms_version: "fms_version".to_string(),
        peer_bandwidth: DEFAULT_PEER_BANDWIDTH,
        window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
        auth_publish: false,
        auth_play: false,
        auth_secret: String::new(),
    }
}

fn remote_peer() -> SocketAddr {
    "203.0.113.9:54321".parse().unwrap()
}

fn local_peer() -> SocketAddr {
    "127.0.0.1:54321".parse().unwrap()
}

fn new_session(config: ServerSessionConfig) -> ServerSession {
    ServerSession::new(config, remote_peer(), Arc::new(AcceptAllVerifier))
}

fn split_results(
    deserializer: &mut ChunkDeserializer,
    mut results: Vec<ServerSessionResult>,
) -> (Vec<RtmpMessage>, Vec<ServerSessionEvent>) {
    let mut responses = Vec::new();
    let mut events = Vec::new();

    for result in results.drain(..) {
        match result {
            ServerSessionResult::OutboundResponse(packet) => {
                let mut bytes = &packet.bytes[..];
                while let Some(payload) = deserializer.get_next_message(bytes).unwrap() {
                    let message = payload.to_rtmp_message().unwrap();
                    if let RtmpMessage::SetChunkSize { size } = message {
                        deserializer.set_max_chunk_size(size as usize).unwrap();
                    }

                    responses.push(message);
                    bytes = &[];
                }
            }

            ServerSessionResult::RaisedEvent(event) => {
                events.push(event);
            }

            _ => (),
        }
    }

    (responses, events)
}

fn consume_results(deserializer: &mut ChunkDeserializer, results: Vec<ServerSessionResult>) {
    // Needed to keep the deserializer up to date
    split_results(deserializer, results);
}

fn create_connect_message(
    app_name: String,
    timestamp: u32,
    stream_id: u32,
    object_encoding: f64,
) -> MessagePayload {
    let properties = vec![
        ("app".to_string(), Amf0Value::Utf8String(app_name)),
        (
            "objectEncoding".to_string(),
            Amf0Value::Number(object_encoding),
        ),
    ];

    let message = RtmpMessage::Amf0Command {
        command_name: "connect".to_string(),
        transaction_id: 1.0,
        command_object: Amf0Value::Object(properties),
        additional_arguments: vec![],
    };

    let timestamp = RtmpTimestamp::new(timestamp);
    message.into_message_payload(timestamp, stream_id).unwrap()
}

fn perform_connection(
    app_name: &str,
    session: &mut ServerSession,
    serializer: &mut ChunkSerializer,
    deserializer: &mut ChunkDeserializer,
) {
    let connect_payload = create_connect_message(app_name.to_string(), 15, 0, 0.0);
    let connect_packet = serializer.serialize(&connect_payload, true, false).unwrap();
    let connect_results = session.handle_input(&connect_packet.bytes[..]).unwrap();

    let (_, events) = split_results(deserializer, connect_results);
    assert_eq!(events.len(), 1, "Unexpected number of events returned");
    let request_id = match events[0] {
        ServerSessionEvent::ConnectionRequested {
            app_name: ref event_app,
            request_id,
            ..
        } if event_app == app_name => request_id,
        _ => panic!("First event was not as expected: {:?}", events[0]),
    };

    let results = session.accept_request(request_id).unwrap();
    consume_results(deserializer, results);
}

fn create_stream(
    session: &mut ServerSession,
    serializer: &mut ChunkSerializer,
    deserializer: &mut ChunkDeserializer,
) -> u32 {
    let message = RtmpMessage::Amf0Command {
        command_name: "createStream".to_string(),
        transaction_id: 4.0,
        command_object: Amf0Value::Null,
        additional_arguments: Vec::new(),
    };

    let payload = message
        .into_message_payload(RtmpTimestamp::new(0), 0)
        .unwrap();
    let packet = serializer.serialize(&payload, true, false).unwrap();
    let results = session.handle_input(&packet.bytes[..]).unwrap();
    let (responses, _) = split_results(deserializer, results);

    assert_eq!(responses.len(), 1, "Unexpected number of responses returned");
    match responses[0] {
        RtmpMessage::Amf0Command {
            ref command_name,
            transaction_id,
            command_object: Amf0Value::Null,
            ref additional_arguments,
        } if command_name == "_result" && transaction_id == 4.0 => {
            match additional_arguments[0] {
                Amf0Value::Number(x) => x as u32,
                _ => panic!("First additional argument was not an Amf0Value::Number"),
            }
        }

        _ => panic!("First response was not the expected value: {:?}", responses[0]),
    }
}

fn start_publishing(
    stream_key: &str,
    stream_id: u32,
    session: &mut ServerSession,
    serializer: &mut ChunkSerializer,
    deserializer: &mut ChunkDeserializer,
) {
    let message = RtmpMessage::Amf0Command {
        command_name: "publish".to_string(),
        transaction_id: 5.0,
        command_object: Amf0Value::Null,
        additional_arguments: vec![
            Amf0Value::Utf8String(stream_key.to_string()),
            Amf0Value::Utf8String("live".to_string()),
        ],
    };

    let publish_payload = message
        .into_message_payload(RtmpTimestamp::new(0), stream_id)
        .unwrap();
    let publish_packet = serializer.serialize(&publish_payload, false, false).unwrap();
    let publish_results = session.handle_input(&publish_packet.bytes[..]).unwrap();
    let (_, events) = split_results(deserializer, publish_results);

    assert_eq!(events.len(), 1, "Unexpected number of events returned");
    let request_id = match events[0] {
        ServerSessionEvent::PublishStreamRequested { request_id, .. } => request_id,
        _ => panic!("Unexpected first event found: {:?}", events[0]),
    };

    let accept_results = session.accept_request(request_id).unwrap();
    consume_results(deserializer, accept_results);
}

fn start_playing(
    stream_key: &str,
    stream_id: u32,
    session: &mut ServerSession,
    serializer: &mut ChunkSerializer,
    deserializer: &mut ChunkDeserializer,
) {
    let message = RtmpMessage::Amf0Command {
        command_name: "play".to_string(),
        transaction_id: 6.0,
        command_object: Amf0Value::Null,
        additional_arguments: vec![Amf0Value::Utf8String(stream_key.to_string())],
    };

    let payload = message
        .into_message_payload(RtmpTimestamp::new(0), stream_id)
        .unwrap();
    let packet = serializer.serialize(&payload, false, false).unwrap();
    let results = session.handle_input(&packet.bytes[..]).unwrap();
    let (_, events) = split_results(deserializer, results);

    let request_id = match events[0] {
        ServerSessionEvent::PlayStreamRequested { request_id, .. } => request_id,
        _ => panic!("Unexpected first event found: {:?}", events[0]),
    };

    let accept_results = session.accept_request(request_id).unwrap();
    consume_results(deserializer, accept_results);
}

fn expect_status(responses: &[RtmpMessage], expected_level: &str, expected_code: &str) {
    for response in responses {
        if let RtmpMessage::Amf0Command {
            command_name,
            additional_arguments,
            ..
        } = response
        {
            if command_name != "onStatus" {
                continue;
            }

            if let Some(Amf0Value::Object(_)) = additional_arguments.first() {
                let info = &additional_arguments[0];
                let level = info.get_property("level");
                let code = info.get_property("code");

                if code == Some(&Amf0Value::Utf8String(expected_code.to_string())) {
                    assert_eq!(
                        level,
                        Some(&Amf0Value::Utf8String(expected_level.to_string())),
                        "Unexpected level for code {}",
                        expected_code
                    );
                    assert!(
                        info.get_property("description").is_some(),
                        "No description provided for {}",
                        expected_code
                    );
                    return;
                }
            }
        }
    }

    panic!(
        "No onStatus message with code {} found in {:?}",
        expected_code, responses
    );
}

#[test]
fn connect_request_accepted_returns_control_burst_and_success_result() {
    let config = get_basic_config();
    let mut deserializer = ChunkDeserializer::new();
    let mut serializer = ChunkSerializer::new();
    let mut session = new_session(config.clone());

    let connect_payload = create_connect_message("some_app".to_string(), 15, 0, 0.0);
    let connect_packet = serializer.serialize(&connect_payload, true, false).unwrap();
    let connect_results = session.handle_input(&connect_packet.bytes[..]).unwrap();

    let (_, events) = split_results(&mut deserializer, connect_results);
    assert_eq!(events.len(), 1, "Unexpected number of events returned");
    let request_id = match events[0] {
        ServerSessionEvent::ConnectionRequested {
            ref app_name,
            request_id,
            ..
        } if app_name == "some_app" => request_id,
        _ => panic!("First event was not as expected: {:?}", events[0]),
    };

    let accept_results = session.accept_request(request_id).unwrap();
    let (responses, _) = split_results(&mut deserializer, accept_results);

    assert!(
        responses.contains(&RtmpMessage::WindowAcknowledgement {
            size: DEFAULT_WINDOW_ACK_SIZE
        }),
        "No window acknowledgement size message in {:?}",
        responses
    );
    assert!(
        responses.contains(&RtmpMessage::SetPeerBandwidth {
            size: DEFAULT_PEER_BANDWIDTH,
            limit_type: PeerBandwidthLimitType::Dynamic
        }),
        "No set peer bandwidth message in {:?}",
        responses
    );
    assert!(
        responses.contains(&RtmpMessage::SetChunkSize {
            size: DEFAULT_CHUNK_SIZE
        }),
        "No set chunk size message in {:?}",
        responses
    );

    let result_message = responses
        .iter()
        .find_map(|message| match message {
            RtmpMessage::Amf0Command {
                command_name,
                command_object,
                additional_arguments,
                ..
            } if command_name == "_result" => Some((command_object, additional_arguments)),
            _ => None,
        })
        .expect("No _result response found");

    let (command_object, additional_arguments) = result_message;
    assert_eq!(
        command_object.get_property("fmsVer"),
        Some(&Amf0Value::Utf8String(config.fms_version)),
        "Unexpected fms version"
    );
    assert_eq!(
        command_object.get_property("capabilities"),
        Some(&Amf0Value::Number(31.0)),
        "Unexpected capabilities value"
    );

    let information = &additional_arguments[0];
    assert_eq!(
        information.get_property("code"),
        Some(&Amf0Value::Utf8String(
            "NetConnection.Connect.Success".to_string()
        )),
        "Unexpected status code"
    );
    assert_eq!(
        information.get_property("objectEncoding"),
        Some(&Amf0Value::Number(0.0)),
        "Unexpected object encoding value"
    );

    assert!(session.app_name() == Some("some_app"));
}

#[test]
fn connect_responds_with_same_object_encoding_value_as_request() {
    let config = get_basic_config();
    let mut deserializer = ChunkDeserializer::new();
    let mut serializer = ChunkSerializer::new();
    let mut session = new_session(config);

    let connect_payload = create_connect_message("some_app".to_string(), 15, 0, 3.0);
    let connect_packet = serializer.serialize(&connect_payload, true, false).unwrap();
    let connect_results = session.handle_input(&connect_packet.bytes[..]).unwrap();

    let (_, events) = split_results(&mut deserializer, connect_results);
    let request_id = match events[0] {
        ServerSessionEvent::ConnectionRequested { request_id, .. } => request_id,
        _ => panic!("First event was not as expected: {:?}", events[0]),
    };

    let accept_results = session.accept_request(request_id).unwrap();
    let (responses, _) = split_results(&mut deserializer, accept_results);

    let information = responses
        .iter()
        .find_map(|message| match message {
            RtmpMessage::Amf0Command {
                command_name,
                additional_arguments,
                ..
            } if command_name == "_result" => additional_arguments.first(),
            _ => None,
        })
        .expect("No _result response found");

    assert_eq!(
        information.get_property("objectEncoding"),
        Some(&Amf0Value::Number(3.0)),
        "Unexpected object encoding value"
    );
}

#[test]
fn connect_strips_leading_slash_from_app_name() {
    let config = get_basic_config();
    let mut deserializer = ChunkDeserializer::new();
    let mut serializer = ChunkSerializer::new();
    let mut session = new_session(config);

    let connect_payload = create_connect_message("/some_app".to_string(), 15, 0, 0.0);
    let connect_packet = serializer.serialize(&connect_payload, true, false).unwrap();
    let connect_results = session.handle_input(&connect_packet.bytes[..]).unwrap();

    let (_, events) = split_results(&mut deserializer, connect_results);
    match events[0] {
        ServerSessionEvent::ConnectionRequested { ref app_name, .. } => {
            assert_eq!(app_name, "some_app", "Leading slash was not stripped");
        }
        _ => panic!("First event was not as expected: {:?}", events[0]),
    }
}

#[test]
fn create_stream_ids_start_at_one_and_increment() {
    let config = get_basic_config();
    let mut deserializer = ChunkDeserializer::new();
    let mut serializer = ChunkSerializer::new();
    let mut session = new_session(config);
    perform_connection("some_app", &mut session, &mut serializer, &mut deserializer);

    let first = create_stream(&mut session, &mut serializer, &mut deserializer);
    let second = create_stream(&mut session, &mut serializer, &mut deserializer);

    assert_eq!(first, 1, "First stream id was not 1");
    assert_eq!(second, 2, "Second stream id was not 2");
}

#[test]
fn publish_request_raised_and_accept_starts_publishing() {
    let config = get_basic_config();
    let mut deserializer = ChunkDeserializer::new();
    let mut serializer = ChunkSerializer::new();
    let mut session = new_session(config);
    perform_connection("some_app", &mut session, &mut serializer, &mut deserializer);

    let stream_id = create_stream(&mut session, &mut serializer, &mut deserializer);
    let message = RtmpMessage::Amf0Command {
        command_name: "publish".to_string(),
        transaction_id: 5.0,
        command_object: Amf0Value::Null,
        additional_arguments: vec![
            Amf0Value::Utf8String("stream_key?sign=abc&foo=bar".to_string()),
            Amf0Value::Utf8String("live".to_string()),
        ],
    };

    let publish_payload = message
        .into_message_payload(RtmpTimestamp::new(0), stream_id)
        .unwrap();
    let publish_packet = serializer.serialize(&publish_payload, false, false).unwrap();
    let publish_results = session.handle_input(&publish_packet.bytes[..]).unwrap();
    let (_, events) = split_results(&mut deserializer, publish_results);

    assert_eq!(events.len(), 1, "Unexpected number of events returned");
    let request_id = match events[0] {
        ServerSessionEvent::PublishStreamRequested {
            ref app_name,
            ref stream_path,
            ref arguments,
            request_id,
            stream_id: event_stream_id,
        } if app_name == "some_app" && stream_path == "/some_app/stream_key" => {
            assert_eq!(event_stream_id, stream_id, "Unexpected stream id");
            assert_eq!(
                arguments.get("sign"),
                Some(&"abc".to_string()),
                "Unexpected sign argument"
            );
            assert_eq!(
                arguments.get("foo"),
                Some(&"bar".to_string()),
                "Unexpected foo argument"
            );
            request_id
        }

        _ => panic!("Unexpected first event found: {:?}", events[0]),
    };

    let accept_results = session.accept_request(request_id).unwrap();
    let (responses, _) = split_results(&mut deserializer, accept_results);

    expect_status(&responses, "status", "NetStream.Publish.Start");
    assert!(session.is_publishing());
    assert_eq!(session.publish_stream_path(), Some("/some_app/stream_key"));
}

#[test]
fn rejected_publish_request_sends_bad_name_status() {
    let config = get_basic_config();
    let mut deserializer = ChunkDeserializer::new();
    let mut serializer = ChunkSerializer::new();
    let mut session = new_session(config);
    perform_connection("some_app", &mut session, &mut serializer, &mut deserializer);

    let stream_id = create_stream(&mut session, &mut serializer, &mut deserializer);
    let message = RtmpMessage::Amf0Command {
        command_name: "publish".to_string(),
        transaction_id: 5.0,
        command_object: Amf0Value::Null,
        additional_arguments: vec![
            Amf0Value::Utf8String("stream_key".to_string()),
            Amf0Value::Utf8String("live".to_string()),
        ],
    };

    let publish_payload = message
        .into_message_payload(RtmpTimestamp::new(0), stream_id)
        .unwrap();
    let publish_packet = serializer.serialize(&publish_payload, false, false).unwrap();
    let publish_results = session.handle_input(&publish_packet.bytes[..]).unwrap();
    let (_, events) = split_results(&mut deserializer, publish_results);

    let request_id = match events[0] {
        ServerSessionEvent::PublishStreamRequested { request_id, .. } => request_id,
        _ => panic!("Unexpected first event found: {:?}", events[0]),
    };

    let reject_results = session.reject_request(request_id).unwrap();
    let (responses, _) = split_results(&mut deserializer, reject_results);

    expect_status(&responses, "error", "NetStream.Publish.BadName");
    assert!(!session.is_publishing());
}

#[test]
fn rejected_play_request_sends_bad_connection_status() {
    let config = get_basic_config();
    let mut deserializer = ChunkDeserializer::new();
    let mut serializer = ChunkSerializer::new();
    let mut session = new_session(config);
    perform_connection("some_app", &mut session, &mut serializer, &mut deserializer);

    let stream_id = create_stream(&mut session, &mut serializer, &mut deserializer);
    let message = RtmpMessage::Amf0Command {
        command_name: "play".to_string(),
        transaction_id: 6.0,
        command_object: Amf0Value::Null,
        additional_arguments: vec![Amf0Value::Utf8String("stream_key".to_string())],
    };

    let payload = message
        .into_message_payload(RtmpTimestamp::new(0), stream_id)
        .unwrap();
    let packet = serializer.serialize(&payload, false, false).unwrap();
    let results = session.handle_input(&packet.bytes[..]).unwrap();
    let (_, events) = split_results(&mut deserializer, results);

    let request_id = match events[0] {
        ServerSessionEvent::PlayStreamRequested { request_id, .. } => request_id,
        _ => panic!("Unexpected first event found: {:?}", events[0]),
    };

    let reject_results = session.reject_request(request_id).unwrap();
    let (responses, _) = split_results(&mut deserializer, reject_results);

    expect_status(&responses, "error", "NetStream.Play.BadConnection");
    assert!(!session.is_playing());
}

#[test]
fn publish_with_non_string_stream_name_is_silently_ignored() {
    let config = get_basic_config();
    let mut deserializer = ChunkDeserializer::new();
    let mut serializer = ChunkSerializer::new();
    let mut session = new_session(config);
    perform_connection("some_app", &mut session, &mut serializer, &mut deserializer);

    let stream_id = create_stream(&mut session, &mut serializer, &mut deserializer);
    let message = RtmpMessage::Amf0Command {
        command_name: "publish".to_string(),
        transaction_id: 5.0,
        command_object: Amf0Value::Null,
        additional_arguments: vec![Amf0Value::Number(55.0)],
    };

    let payload = message
        .into_message_payload(RtmpTimestamp::new(0), stream_id)
        .unwrap();
    let packet = serializer.serialize(&payload, false, false).unwrap();
    let results = session.handle_input(&packet.bytes[..]).unwrap();

    assert!(results.is_empty(), "Expected no results, got {:?}", results);
}

#[test]
fn publish_with_auth_enabled_and_bad_signature_gets_unauthorized_status() {
    let mut config = get_basic_config();
    config.auth_publish = true;
    config.auth_secret = "s3".to_string();

    let mut deserializer = ChunkDeserializer::new();
    let mut serializer = ChunkSerializer::new();
    let mut session = ServerSession::new(config, remote_peer(), Arc::new(RejectAllVerifier));
    perform_connection("some_app", &mut session, &mut serializer, &mut deserializer);

    let stream_id = create_stream(&mut session, &mut serializer, &mut deserializer);
    let message = RtmpMessage::Amf0Command {
        command_name: "publish".to_string(),
        transaction_id: 5.0,
        command_object: Amf0Value::Null,
        additional_arguments: vec![
            Amf0Value::Utf8String("stream_key?sign=wrong".to_string()),
            Amf0Value::Utf8String("live".to_string()),
        ],
    };

    let payload = message
        .into_message_payload(RtmpTimestamp::new(0), stream_id)
        .unwrap();
    let packet = serializer.serialize(&payload, false, false).unwrap();
    let results = session.handle_input(&packet.bytes[..]).unwrap();
    let (responses, events) = split_results(&mut deserializer, results);

    assert!(events.is_empty(), "Expected no events, got {:?}", events);
    expect_status(&responses, "error", "NetStream.publish.Unauthorized");
    assert!(!session.is_publishing());
}

#[test]
fn publish_with_valid_signature_raises_request() {
    let mut config = get_basic_config();
    config.auth_publish = true;
    config.auth_secret = "s3".to_string();

    let mut deserializer = ChunkDeserializer::new();
    let mut serializer = ChunkSerializer::new();
    let mut session = ServerSession::new(config, remote_peer(), Arc::new(RecordingVerifier));
    perform_connection("some_app", &mut session, &mut serializer, &mut deserializer);

    let stream_id = create_stream(&mut session, &mut serializer, &mut deserializer);
    let message = RtmpMessage::Amf0Command {
        command_name: "publish".to_string(),
        transaction_id: 5.0,
        command_object: Amf0Value::Null,
        additional_arguments: vec![
            Amf0Value::Utf8String("stream_key?sign=good-signature".to_string()),
            Amf0Value::Utf8String("live".to_string()),
        ],
    };

    let payload = message
        .into_message_payload(RtmpTimestamp::new(0), stream_id)
        .unwrap();
    let packet = serializer.serialize(&payload, false, false).unwrap();
    let results = session.handle_input(&packet.bytes[..]).unwrap();
    let (_, events) = split_results(&mut deserializer, results);

    assert!(matches!(
        events.first(),
        Some(ServerSessionEvent::PublishStreamRequested { .. })
    ));
}

#[test]
fn localhost_peer_is_exempt_from_publish_auth() {
    let mut config = get_basic_config();
    config.auth_publish = true;

    let mut deserializer = ChunkDeserializer::new();
    let mut serializer = ChunkSerializer::new();
    let mut session = ServerSession::new(config, local_peer(), Arc::new(RejectAllVerifier));
    perform_connection("some_app", &mut session, &mut serializer, &mut deserializer);

    let stream_id = create_stream(&mut session, &mut serializer, &mut deserializer);
    let message = RtmpMessage::Amf0Command {
        command_name: "publish".to_string(),
        transaction_id: 5.0,
        command_object: Amf0Value::Null,
        additional_arguments: vec![
            Amf0Value::Utf8String("stream_key".to_string()),
            Amf0Value::Utf8String("live".to_string()),
        ],
    };

    let payload = message
        .into_message_payload(RtmpTimestamp::new(0), stream_id)
        .unwrap();
    let packet = serializer.serialize(&payload, false, false).unwrap();
    let results = session.handle_input(&packet.bytes[..]).unwrap();
    let (_, events) = split_results(&mut deserializer, results);

    assert!(matches!(
        events.first(),
        Some(ServerSessionEvent::PublishStreamRequested { .. })
    ));
}

#[test]
fn accepted_play_request_sends_begin_reset_start_and_sample_access() {
    let config = get_basic_config();
    let mut deserializer = ChunkDeserializer::new();
    let mut serializer = ChunkSerializer::new();
    let mut session = new_session(config);
    perform_connection("some_app", &mut session, &mut serializer, &mut deserializer);

    let stream_id = create_stream(&mut session, &mut serializer, &mut deserializer);
    let message = RtmpMessage::Amf0Command {
        command_name: "play".to_string(),
        transaction_id: 6.0,
        command_object: Amf0Value::Null,
        additional_arguments: vec![Amf0Value::Utf8String("stream_key".to_string())],
    };

    let payload = message
        .into_message_payload(RtmpTimestamp::new(0), stream_id)
        .unwrap();
    let packet = serializer.serialize(&payload, false, false).unwrap();
    let results = session.handle_input(&packet.bytes[..]).unwrap();
    let (_, events) = split_results(&mut deserializer, results);

    let request_id = match events[0] {
        ServerSessionEvent::PlayStreamRequested {
            ref stream_path,
            request_id,
            ..
        } if stream_path == "/some_app/stream_key" => request_id,
        _ => panic!("Unexpected first event found: {:?}", events[0]),
    };

    let accept_results = session.accept_request(request_id).unwrap();
    let (responses, _) = split_results(&mut deserializer, accept_results);

    assert!(
        responses.contains(&RtmpMessage::UserControl {
            event_type: UserControlEventType::StreamBegin,
            stream_id: Some(stream_id),
            buffer_length: None,
            timestamp: None,
        }),
        "No StreamBegin message in {:?}",
        responses
    );

    expect_status(&responses, "status", "NetStream.Play.Reset");
    expect_status(&responses, "status", "NetStream.Play.Start");

    let sample_access = responses.iter().any(|message| {
        matches!(message, RtmpMessage::Amf0Data { values }
            if values.first() == Some(&Amf0Value::Utf8String("|RtmpSampleAccess".to_string())))
    });
    assert!(sample_access, "No |RtmpSampleAccess message in {:?}", responses);

    assert!(session.is_playing());
    assert!(session.is_receiving_audio());
    assert!(session.is_receiving_video());
    assert!(!session.is_paused());
}

#[test]
fn second_play_on_same_session_gets_bad_connection_status() {
    let config = get_basic_config();
    let mut deserializer = ChunkDeserializer::new();
    let mut serializer = ChunkSerializer::new();
    let mut session = new_session(config);
    perform_connection("some_app", &mut session, &mut serializer, &mut deserializer);

    let stream_id = create_stream(&mut session, &mut serializer, &mut deserializer);
    start_playing(
        "stream_key",
        stream_id,
        &mut session,
        &mut serializer,
        &mut deserializer,
    );

    let message = RtmpMessage::Amf0Command {
        command_name: "play".to_string(),
        transaction_id: 7.0,
        command_object: Amf0Value::Null,
        additional_arguments: vec![Amf0Value::Utf8String("other_key".to_string())],
    };

    let payload = message
        .into_message_payload(RtmpTimestamp::new(0), stream_id)
        .unwrap();
    let packet = serializer.serialize(&payload, false, false).unwrap();
    let results = session.handle_input(&packet.bytes[..]).unwrap();
    let (responses, events) = split_results(&mut deserializer, results);

    assert!(events.is_empty(), "Expected no events, got {:?}", events);
    expect_status(&responses, "error", "NetStream.Play.BadConnection");
}

#[test]
fn pause_and_unpause_send_matching_notifications() {
    let config = get_basic_config();
    let mut deserializer = ChunkDeserializer::new();
    let mut serializer = ChunkSerializer::new();
    let mut session = new_session(config);
    perform_connection("some_app", &mut session, &mut serializer, &mut deserializer);

    let stream_id = create_stream(&mut session, &mut serializer, &mut deserializer);
    start_playing(
        "stream_key",
        stream_id,
        &mut session,
        &mut serializer,
        &mut deserializer,
    );

    let pause_message = RtmpMessage::Amf0Command {
        command_name: "pause".to_string(),
        transaction_id: 0.0,
        command_object: Amf0Value::Null,
        additional_arguments: vec![Amf0Value::Boolean(true), Amf0Value::Number(0.0)],
    };

    let payload = pause_message
        .into_message_payload(RtmpTimestamp::new(0), stream_id)
        .unwrap();
    let packet = serializer.serialize(&payload, false, false).unwrap();
    let results = session.handle_input(&packet.bytes[..]).unwrap();
    let (responses, events) = split_results(&mut deserializer, results);

    assert!(
        responses.contains(&RtmpMessage::UserControl {
            event_type: UserControlEventType::StreamEof,
            stream_id: Some(stream_id),
            buffer_length: None,
            timestamp: None,
        }),
        "No StreamEof message in {:?}",
        responses
    );
    expect_status(&responses, "status", "NetStream.Pause.Notify");
    assert!(events.contains(&ServerSessionEvent::PauseChanged { paused: true }));
    assert!(session.is_paused());

    let unpause_message = RtmpMessage::Amf0Command {
        command_name: "pause".to_string(),
        transaction_id: 0.0,
        command_object: Amf0Value::Null,
        additional_arguments: vec![Amf0Value::Boolean(false), Amf0Value::Number(0.0)],
    };

    let payload = unpause_message
        .into_message_payload(RtmpTimestamp::new(10), stream_id)
        .unwrap();
    let packet = serializer.serialize(&payload, false, false).unwrap();
    let results = session.handle_input(&packet.bytes[..]).unwrap();
    let (responses, events) = split_results(&mut deserializer, results);

    assert!(
        responses.contains(&RtmpMessage::UserControl {
            event_type: UserControlEventType::StreamBegin,
            stream_id: Some(stream_id),
            buffer_length: None,
            timestamp: None,
        }),
        "No StreamBegin message in {:?}",
        responses
    );
    expect_status(&responses, "status", "NetStream.Unpause.Notify");
    assert!(events.contains(&ServerSessionEvent::PauseChanged { paused: false }));
    assert!(!session.is_paused());
}

#[test]
fn receive_audio_and_video_commands_toggle_gates() {
    let config = get_basic_config();
    let mut deserializer = ChunkDeserializer::new();
    let mut serializer = ChunkSerializer::new();
    let mut session = new_session(config);
    perform_connection("some_app", &mut session, &mut serializer, &mut deserializer);

    let stream_id = create_stream(&mut session, &mut serializer, &mut deserializer);
    start_playing(
        "stream_key",
        stream_id,
        &mut session,
        &mut serializer,
        &mut deserializer,
    );

    for (command, value) in [("receiveAudio", false), ("receiveVideo", false)] {
        let message = RtmpMessage::Amf0Command {
            command_name: command.to_string(),
            transaction_id: 0.0,
            command_object: Amf0Value::Null,
            additional_arguments: vec![Amf0Value::Boolean(value)],
        };

        let payload = message
            .into_message_payload(RtmpTimestamp::new(0), stream_id)
            .unwrap();
        let packet = serializer.serialize(&payload, false, false).unwrap();
        let results = session.handle_input(&packet.bytes[..]).unwrap();
        consume_results(&mut deserializer, results);
    }

    assert!(!session.is_receiving_audio(), "Audio gate was not closed");
    assert!(!session.is_receiving_video(), "Video gate was not closed");
}

#[test]
fn delete_stream_during_play_sends_stop_and_raises_finished_event() {
    let config = get_basic_config();
    let mut deserializer = ChunkDeserializer::new();
    let mut serializer = ChunkSerializer::new();
    let mut session = new_session(config);
    perform_connection("some_app", &mut session, &mut serializer, &mut deserializer);

    let stream_id = create_stream(&mut session, &mut serializer, &mut deserializer);
    start_playing(
        "stream_key",
        stream_id,
        &mut session,
        &mut serializer,
        &mut deserializer,
    );

    let message = RtmpMessage::Amf0Command {
        command_name: "deleteStream".to_string(),
        transaction_id: 0.0,
        command_object: Amf0Value::Null,
        additional_arguments: vec![Amf0Value::Number(stream_id as f64)],
    };

    let payload = message
        .into_message_payload(RtmpTimestamp::new(0), stream_id)
        .unwrap();
    let packet = serializer.serialize(&payload, false, false).unwrap();
    let results = session.handle_input(&packet.bytes[..]).unwrap();
    let (responses, events) = split_results(&mut deserializer, results);

    expect_status(&responses, "status", "NetStream.Play.Stop");
    assert!(
        events.contains(&ServerSessionEvent::PlayStreamFinished {
            app_name: "some_app".to_string(),
            stream_path: "/some_app/stream_key".to_string(),
        }),
        "No PlayStreamFinished event in {:?}",
        events
    );
    assert!(!session.is_playing());
}

#[test]
fn delete_stream_during_publish_raises_finished_event() {
    let config = get_basic_config();
    let mut deserializer = ChunkDeserializer::new();
    let mut serializer = ChunkSerializer::new();
    let mut session = new_session(config);
    perform_connection("some_app", &mut session, &mut serializer, &mut deserializer);

    let stream_id = create_stream(&mut session, &mut serializer, &mut deserializer);
    start_publishing(
        "stream_key",
        stream_id,
        &mut session,
        &mut serializer,
        &mut deserializer,
    );

    let message = RtmpMessage::Amf0Command {
        command_name: "deleteStream".to_string(),
        transaction_id: 0.0,
        command_object: Amf0Value::Null,
        additional_arguments: vec![Amf0Value::Number(stream_id as f64)],
    };

    let payload = message
        .into_message_payload(RtmpTimestamp::new(0), stream_id)
        .unwrap();
    let packet = serializer.serialize(&payload, false, false).unwrap();
    let results = session.handle_input(&packet.bytes[..]).unwrap();
    let (_, events) = split_results(&mut deserializer, results);

    assert!(
        events.contains(&ServerSessionEvent::PublishStreamFinished {
            app_name: "some_app".to_string(),
            stream_path: "/some_app/stream_key".to_string(),
        }),
        "No PublishStreamFinished event in {:?}",
        events
    );
    assert!(!session.is_publishing());
}

#[test]
fn metadata_from_publisher_is_reencoded_and_raised() {
    let config = get_basic_config();
    let mut deserializer = ChunkDeserializer::new();
    let mut serializer = ChunkSerializer::new();
    let mut session = new_session(config);
    perform_connection("some_app", &mut session, &mut serializer, &mut deserializer);

    let stream_id = create_stream(&mut session, &mut serializer, &mut deserializer);
    start_publishing(
        "stream_key",
        stream_id,
        &mut session,
        &mut serializer,
        &mut deserializer,
    );

    let properties = vec![
        ("width".to_string(), Amf0Value::Number(1920_f64)),
        ("height".to_string(), Amf0Value::Number(1080_f64)),
        ("framerate".to_string(), Amf0Value::Number(30_f64)),
        ("audiosamplerate".to_string(), Amf0Value::Number(48000_f64)),
        ("stereo".to_string(), Amf0Value::Boolean(true)),
        (
            "encoder".to_string(),
            Amf0Value::Utf8String("Test Encoder".to_string()),
        ),
    ];

    let message = RtmpMessage::Amf0Data {
        values: vec![
            Amf0Value::Utf8String("@setDataFrame".to_string()),
            Amf0Value::Utf8String("onMetaData".to_string()),
            Amf0Value::EcmaArray(properties),
        ],
    };

    let metadata_payload = message
        .into_message_payload(RtmpTimestamp::new(0), stream_id)
        .unwrap();
    let metadata_packet = serializer
        .serialize(&metadata_payload, false, false)
        .unwrap();
    let metadata_results = session.handle_input(&metadata_packet.bytes[..]).unwrap();
    let (_, mut events) = split_results(&mut deserializer, metadata_results);

    assert_eq!(events.len(), 1, "Unexpected number of metadata events");

    match events.remove(0) {
        ServerSessionEvent::StreamMetadataChanged {
            app_name,
            stream_path,
            metadata,
            payload,
        } => {
            assert_eq!(app_name, "some_app", "Unexpected metadata app name");
            assert_eq!(
                stream_path, "/some_app/stream_key",
                "Unexpected metadata stream path"
            );
            assert_eq!(metadata.video_width, Some(1920), "Unexpected video width");
            assert_eq!(metadata.video_height, Some(1080), "Unexpected video height");
            assert_eq!(
                metadata.video_frame_rate,
                Some(30_f32),
                "Unexpected framerate"
            );
            assert_eq!(
                metadata.audio_sample_rate,
                Some(48000),
                "Unexpected audio sample rate"
            );
            assert_eq!(
                metadata.audio_is_stereo,
                Some(true),
                "Unexpected stereo value"
            );
            assert_eq!(
                metadata.encoder,
                Some("Test Encoder".to_string()),
                "Unexpected encoder value"
            );

            // The payload must decode back to a bare onMetaData data message
            let mut cursor = std::io::Cursor::new(&payload[..]);
            let values = cinder_amf::deserialize(&mut cursor).unwrap();
            assert_eq!(
                values[0],
                Amf0Value::Utf8String("onMetaData".to_string()),
                "Re-encoded payload does not start with onMetaData"
            );
        }

        x => panic!("Unexpected event received: {:?}", x),
    }
}

#[test]
fn audio_and_video_data_raise_events_only_while_publishing() {
    let config = get_basic_config();
    let mut deserializer = ChunkDeserializer::new();
    let mut serializer = ChunkSerializer::new();
    let mut session = new_session(config);
    perform_connection("some_app", &mut session, &mut serializer, &mut deserializer);

    let stream_id = create_stream(&mut session, &mut serializer, &mut deserializer);

    // Before publishing the data is dropped
    let audio = RtmpMessage::AudioData {
        data: Bytes::from(vec![0xaf_u8, 0x01, 0x02]),
    };
    let payload = audio
        .into_message_payload(RtmpTimestamp::new(10), stream_id)
        .unwrap();
    let packet = serializer.serialize(&payload, false, false).unwrap();
    let results = session.handle_input(&packet.bytes[..]).unwrap();
    assert!(results.is_empty(), "Expected no results, got {:?}", results);

    start_publishing(
        "stream_key",
        stream_id,
        &mut session,
        &mut serializer,
        &mut deserializer,
    );

    let audio = RtmpMessage::AudioData {
        data: Bytes::from(vec![0xaf_u8, 0x01, 0x02]),
    };
    let payload = audio
        .into_message_payload(RtmpTimestamp::new(20), stream_id)
        .unwrap();
    let packet = serializer.serialize(&payload, false, false).unwrap();
    let results = session.handle_input(&packet.bytes[..]).unwrap();
    let (_, events) = split_results(&mut deserializer, results);

    assert!(
        matches!(
            events.first(),
            Some(ServerSessionEvent::AudioDataReceived { timestamp, .. })
                if *timestamp == RtmpTimestamp::new(20)
        ),
        "Unexpected audio event: {:?}",
        events
    );

    let video = RtmpMessage::VideoData {
        data: Bytes::from(vec![0x17_u8, 0x01, 0x00]),
    };
    let payload = video
        .into_message_payload(RtmpTimestamp::new(30), stream_id)
        .unwrap();
    let packet = serializer.serialize(&payload, false, false).unwrap();
    let results = session.handle_input(&packet.bytes[..]).unwrap();
    let (_, events) = split_results(&mut deserializer, results);

    assert!(
        matches!(
            events.first(),
            Some(ServerSessionEvent::VideoDataReceived { timestamp, .. })
                if *timestamp == RtmpTimestamp::new(30)
        ),
        "Unexpected video event: {:?}",
        events
    );
}

#[test]
fn acknowledgement_sent_after_peer_window_is_reached() {
    let config = get_basic_config();
    let mut deserializer = ChunkDeserializer::new();
    let mut serializer = ChunkSerializer::new();
    let mut session = new_session(config);

    let message = RtmpMessage::WindowAcknowledgement { size: 100 };
    let payload = message
        .into_message_payload(RtmpTimestamp::new(0), 0)
        .unwrap();
    let packet = serializer.serialize(&payload, true, false).unwrap();
    let results = session.handle_input(&packet.bytes[..]).unwrap();
    consume_results(&mut deserializer, results);

    // Feed enough raw bytes to cross the 100 byte window.  The content does
    // not need to form a complete message for the counter to advance, but we
    // use real messages to keep the parser in sync.
    let mut total_results = Vec::new();
    for index in 0..30 {
        let message = RtmpMessage::Amf0Command {
            command_name: "bogusCommand".to_string(),
            transaction_id: index as f64,
            command_object: Amf0Value::Null,
            additional_arguments: Vec::new(),
        };

        let payload = message
            .into_message_payload(RtmpTimestamp::new(index), 0)
            .unwrap();
        let packet = serializer.serialize(&payload, false, false).unwrap();
        total_results.extend(session.handle_input(&packet.bytes[..]).unwrap());
    }

    let (responses, _) = split_results(&mut deserializer, total_results);
    let ack_count = responses
        .iter()
        .filter(|message| matches!(message, RtmpMessage::Acknowledgement { .. }))
        .count();

    assert!(ack_count >= 1, "Expected at least one acknowledgement");
}

#[test]
fn unpublish_notify_sends_status_and_stream_eof() {
    let config = get_basic_config();
    let mut deserializer = ChunkDeserializer::new();
    let mut serializer = ChunkSerializer::new();
    let mut session = new_session(config);
    perform_connection("some_app", &mut session, &mut serializer, &mut deserializer);

    let stream_id = create_stream(&mut session, &mut serializer, &mut deserializer);
    start_playing(
        "stream_key",
        stream_id,
        &mut session,
        &mut serializer,
        &mut deserializer,
    );

    let results = session.send_unpublish_notify().unwrap();
    let (responses, _) = split_results(&mut deserializer, results);

    expect_status(&responses, "status", "NetStream.Play.UnpublishNotify");
    assert!(
        responses.contains(&RtmpMessage::UserControl {
            event_type: UserControlEventType::StreamEof,
            stream_id: Some(stream_id),
            buffer_length: None,
            timestamp: None,
        }),
        "No StreamEof message in {:?}",
        responses
    );
}

#[test]
fn ping_request_contains_session_epoch() {
    let config = get_basic_config();
    let mut deserializer = ChunkDeserializer::new();
    let mut session = new_session(config);

    let packet = session.send_ping_request().unwrap();
    let payload = deserializer
        .get_next_message(&packet.bytes[..])
        .unwrap()
        .unwrap();
    let message = payload.to_rtmp_message().unwrap();

    match message {
        RtmpMessage::UserControl {
            event_type: UserControlEventType::PingRequest,
            timestamp: Some(_),
            ..
        } => (),
        x => panic!("Expected PingRequest, got {:?}", x),
    }
}

#[test]
fn unknown_commands_are_surfaced_but_not_fatal() {
    let config = get_basic_config();
    let mut deserializer = ChunkDeserializer::new();
    let mut serializer = ChunkSerializer::new();
    let mut session = new_session(config);
    perform_connection("some_app", &mut session, &mut serializer, &mut deserializer);

    let message = RtmpMessage::Amf0Command {
        command_name: "FCPublish".to_string(),
        transaction_id: 3.0,
        command_object: Amf0Value::Null,
        additional_arguments: vec![Amf0Value::Utf8String("stream_key".to_string())],
    };

    let payload = message
        .into_message_payload(RtmpTimestamp::new(0), 0)
        .unwrap();
    let packet = serializer.serialize(&payload, false, false).unwrap();
    let results = session.handle_input(&packet.bytes[..]).unwrap();
    let (_, events) = split_results(&mut deserializer, results);

    assert!(
        matches!(
            events.first(),
            Some(ServerSessionEvent::UnhandleableAmf0Command { command_name, .. })
                if command_name == "FCPublish"
        ),
        "Unexpected events: {:?}",
        events
    );
}
