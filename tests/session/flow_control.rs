//! Tests for session flow control

use sm_http2::{
    headers, settings_id, Frame, FlowControlScheme, ProtocolError, SessionConfig, SessionError,
    SessionEvent, StatusCode, StreamError,
};

use super::{count, inject, pair, pump};

fn credit(config: SessionConfig, initial: i64, grant: i64) -> SessionConfig {
    config
        .flow_control(FlowControlScheme::Credit)
        .initial_credit(initial)
        .receive_credit(grant)
}

#[test]
fn test_credit_unblocks_queued_send() {
    let (mut client, mut server) = pair(
        credit(SessionConfig::client(), 0, 0),
        credit(SessionConfig::server(), 0, 100),
    );

    client.open_stream(headers([(":path", "/upload")]), false).unwrap();
    client.send_data(1, vec![7u8; 100], false).unwrap();
    assert!(client.is_pending(1));
    assert_eq!(client.pending_bytes(1), 100);
    assert!(client.flow_control().is_blocked());

    pump(&mut client, &mut server);
    assert_eq!(server.stream(1).unwrap().received_data().len(), 0);
    client.drain_events();

    // Server's opening CREDIT_UPDATE(+100)
    pump(&mut server, &mut client);
    let events = client.drain_events();
    assert_eq!(count(&events, |e| *e == SessionEvent::SendNext), 1);
    assert!(!client.is_pending(1));
    assert_eq!(client.flow_control().send_allowance(), 0);

    pump(&mut client, &mut server);
    assert_eq!(server.stream(1).unwrap().received_data(), &[7u8; 100][..]);
}

#[test]
fn test_send_next_fires_once_per_unblock() {
    let (mut client, _server) = pair(
        credit(SessionConfig::client(), 0, 0),
        credit(SessionConfig::server(), 0, 0),
    );
    client.open_stream(headers([(":path", "/")]), false).unwrap();
    client.send_data(1, vec![0u8; 10], false).unwrap();
    client.transmit().unwrap();
    client.drain_events();

    inject(
        &mut client,
        vec![Frame::credit_update(0, 100), Frame::credit_update(0, 5)],
    );
    let events = client.drain_events();
    assert_eq!(count(&events, |e| *e == SessionEvent::SendNext), 1);
    assert_eq!(client.flow_control().send_allowance(), 95);
}

#[test]
fn test_negative_credit_is_protocol_error() {
    let (mut client, _server) = pair(
        credit(SessionConfig::client(), 0, 0),
        credit(SessionConfig::server(), 0, 0),
    );
    client.drain_events();
    inject(&mut client, vec![Frame::credit_update(0, -5)]);

    assert_eq!(
        client.drain_events(),
        vec![SessionEvent::Error(SessionError::Protocol(
            ProtocolError::NegativeCredit(-5)
        ))]
    );
    assert!(!client.is_closed());
}

#[test]
fn test_wrong_scheme_frame_is_reported() {
    let (mut client, _server) = pair(SessionConfig::client(), SessionConfig::server());
    client.drain_events();
    inject(&mut client, vec![Frame::credit_update(0, 5)]);

    let events = client.drain_events();
    assert!(matches!(
        events.as_slice(),
        [SessionEvent::Error(SessionError::Protocol(
            ProtocolError::SchemeMismatch { .. }
        ))]
    ));
}

#[test]
fn test_window_update_resumes_split_send() {
    let (mut client, _server) = pair(
        SessionConfig::client().initial_window_size(10),
        SessionConfig::server(),
    );
    client.open_stream(headers([(":path", "/")]), false).unwrap();
    client.send_data(1, vec![1u8; 25], true).unwrap();
    assert_eq!(client.pending_bytes(1), 15);
    client.drain_events();

    inject(&mut client, vec![Frame::window_update(0, 15)]);
    assert!(!client.is_pending(1));
    assert!(client.drain_events().contains(&SessionEvent::SendNext));
    assert!(client.stream(1).unwrap().fin_queued());
}

#[test]
fn test_settings_shrink_send_window() {
    let (mut client, mut server) = pair(
        SessionConfig::client(),
        SessionConfig::server().setting(settings_id::INITIAL_WINDOW_SIZE, 100),
    );
    pump(&mut server, &mut client);
    assert_eq!(client.flow_control().send_allowance(), 100);
    assert_eq!(
        client.peer_settings().get(&settings_id::INITIAL_WINDOW_SIZE),
        Some(&100)
    );

    client.open_stream(headers([(":path", "/")]), false).unwrap();
    client.send_data(1, vec![0u8; 150], false).unwrap();
    assert_eq!(client.pending_bytes(1), 50);
}

#[test]
fn test_receiving_beyond_window_resets_stream() {
    let (_client, mut server) = pair(
        SessionConfig::client(),
        SessionConfig::server().setting(settings_id::INITIAL_WINDOW_SIZE, 8),
    );
    server.transmit().unwrap();
    inject(
        &mut server,
        vec![
            Frame::syn_stream(1, 0, headers([(":path", "/")]), false),
            Frame::data(1, vec![0u8; 10], false),
        ],
    );

    let events = server.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::StreamError(StreamError::Protocol {
            stream_id: 1,
            error: ProtocolError::FlowControl { received: 10, allowance: 8, .. },
        })
    )));
    let sent = super::sent_frames(&mut server);
    assert!(sent.contains(&Frame::rst(1, StatusCode::FlowControlError)));
}

#[test]
fn test_consumed_bytes_are_granted_back() {
    let (mut client, mut server) = pair(
        SessionConfig::client().initial_window_size(100),
        SessionConfig::server().setting(settings_id::INITIAL_WINDOW_SIZE, 100),
    );
    pump(&mut server, &mut client);
    client.open_stream(headers([(":path", "/")]), false).unwrap();
    client.send_data(1, vec![0u8; 60], false).unwrap();
    pump(&mut client, &mut server);
    assert_eq!(client.flow_control().send_allowance(), 40);

    // Server replenishes once half its window is consumed
    pump(&mut server, &mut client);
    assert_eq!(client.flow_control().send_allowance(), 100);
}
