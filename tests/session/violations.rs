//! Tests for protocol violations and their scope

use sm_http2::{
    headers, Error, Frame, FramingError, ProtocolError, SessionConfig, SessionError,
    SessionEvent, SessionState, StatusCode, StreamError, StreamState,
};

use super::{inject, pair, sent_frames};

#[test]
fn test_wrong_parity_rejected() {
    let (_client, mut server) = pair(SessionConfig::client(), SessionConfig::server());
    server.drain_events();
    inject(
        &mut server,
        vec![Frame::syn_stream(2, 0, headers([(":path", "/")]), false)],
    );

    assert_eq!(
        server.drain_events(),
        vec![SessionEvent::Error(SessionError::Protocol(
            ProtocolError::WrongParity { stream_id: 2 }
        ))]
    );
    assert!(server.stream(2).is_none());
    assert_eq!(
        sent_frames(&mut server),
        vec![Frame::rst(2, StatusCode::ProtocolError)]
    );
}

#[test]
fn test_stream_ids_must_increase() {
    let (_client, mut server) = pair(SessionConfig::client(), SessionConfig::server());
    inject(
        &mut server,
        vec![
            Frame::syn_stream(5, 0, headers([(":path", "/")]), false),
            Frame::syn_stream(3, 0, headers([(":path", "/")]), false),
        ],
    );

    assert!(server
        .drain_events()
        .contains(&SessionEvent::Error(SessionError::Protocol(
            ProtocolError::StreamIdNotIncreasing {
                stream_id: 3,
                last: 5
            }
        ))));
    assert!(server.stream(3).is_none());
    assert_eq!(server.stream_state(5), Some(StreamState::Open));
}

#[test]
fn test_second_rst_is_stream_error() {
    let (mut client, _server) = pair(SessionConfig::client(), SessionConfig::server());
    client.open_stream(headers([(":path", "/")]), false).unwrap();
    client.open_stream(headers([(":path", "/other")]), false).unwrap();
    client.transmit().unwrap();
    client.drain_events();

    inject(&mut client, vec![Frame::rst(1, StatusCode::Cancel)]);
    assert_eq!(
        client.drain_events(),
        vec![
            SessionEvent::Reset {
                stream_id: 1,
                status: StatusCode::Cancel,
            },
            SessionEvent::StreamClosed { stream_id: 1 },
        ]
    );

    inject(&mut client, vec![Frame::rst(1, StatusCode::Cancel)]);
    assert_eq!(
        client.drain_events(),
        vec![SessionEvent::StreamError(StreamError::AlreadyClosed(1))]
    );

    // Siblings and the session are untouched
    assert_eq!(client.state(), SessionState::Opened);
    assert_eq!(client.stream_state(3), Some(StreamState::Open));
    assert!(matches!(
        client.close_stream(1, StatusCode::Cancel),
        Err(Error::Stream(StreamError::AlreadyClosed(1)))
    ));
}

#[test]
fn test_data_for_unknown_stream() {
    let (mut client, _server) = pair(SessionConfig::client(), SessionConfig::server());
    client.drain_events();
    inject(&mut client, vec![Frame::data(7, "stray", false)]);

    assert_eq!(
        client.drain_events(),
        vec![SessionEvent::Error(SessionError::Protocol(
            ProtocolError::UnknownStream(7)
        ))]
    );
    assert_eq!(
        sent_frames(&mut client),
        vec![Frame::rst(7, StatusCode::InvalidStream)]
    );
}

#[test]
fn test_data_on_stream_zero_is_not_reset() {
    let (mut client, _server) = pair(SessionConfig::client(), SessionConfig::server());
    client.drain_events();
    inject(&mut client, vec![Frame::data(0, "stray", false)]);

    assert_eq!(
        client.drain_events(),
        vec![SessionEvent::Error(SessionError::Protocol(
            ProtocolError::UnknownStream(0)
        ))]
    );
    assert!(sent_frames(&mut client).is_empty());
    assert_eq!(client.state(), SessionState::Opened);
}

#[test]
fn test_data_after_remote_fin_resets_stream() {
    let (mut client, _server) = pair(SessionConfig::client(), SessionConfig::server());
    client.open_stream(headers([(":path", "/")]), false).unwrap();
    client.transmit().unwrap();
    inject(&mut client, vec![Frame::data(1, "done", true)]);
    assert_eq!(client.stream_state(1), Some(StreamState::HalfClosedRemote));
    client.drain_events();

    inject(&mut client, vec![Frame::data(1, "more", false)]);
    let events = client.drain_events();
    assert!(events.contains(&SessionEvent::StreamError(StreamError::Protocol {
        stream_id: 1,
        error: ProtocolError::StreamClosed(1),
    })));
    assert_eq!(client.stream_state(1), Some(StreamState::Closed));
    assert_eq!(
        sent_frames(&mut client),
        vec![Frame::rst(1, StatusCode::StreamAlreadyClosed)]
    );
}

#[test]
fn test_malformed_header_block_resets_only_its_stream() {
    let (mut client, _server) = pair(SessionConfig::client(), SessionConfig::server());
    client.open_stream(headers([(":path", "/a")]), false).unwrap();
    client.open_stream(headers([(":path", "/b")]), false).unwrap();
    client.transmit().unwrap();
    client.drain_events();

    // HEADERS on stream 1, uncompressed, header count -1
    let bytes = [
        0x80, 0x03, 0x00, 0x08, 0x02, 0, 0, 4, 0, 0, 0, 1, 0xFF, 0xFF, 0xFF, 0xFF,
    ];
    client.receive(&bytes).unwrap();

    let events = client.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::StreamError(StreamError::Framing {
            stream_id: 1,
            error: FramingError::NegativeLength(_),
        })
    )));
    assert_eq!(client.stream_state(1), Some(StreamState::Closed));
    assert_eq!(client.stream_state(3), Some(StreamState::Open));
    assert_eq!(
        sent_frames(&mut client),
        vec![Frame::rst(1, StatusCode::ProtocolError)]
    );
}

#[test]
fn test_oversize_frame_tears_session_down() {
    let (mut client, _server) = pair(
        SessionConfig::client().max_frame_payload(16),
        SessionConfig::server(),
    );
    client.open_stream(headers([(":path", "/")]), false).unwrap();
    client.transmit().unwrap();
    client.drain_events();

    let bytes = sm_http2::FrameCodec::new()
        .serialize(&Frame::data(1, vec![0u8; 32], false))
        .unwrap();
    let err = client.receive(&bytes).unwrap_err();
    assert!(matches!(
        err,
        Error::Framing(FramingError::FrameTooLarge { size: 32, max: 16 })
    ));

    assert!(client.is_closed());
    let events = client.drain_events();
    assert!(matches!(
        events[0],
        SessionEvent::StreamError(StreamError::Transport { stream_id: 1, .. })
    ));
    assert_eq!(events.last(), Some(&SessionEvent::Closed));
    assert!(client.receive(&bytes).is_err());
}
