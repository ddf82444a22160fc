//! Tests for the tokio connection driver

use std::time::Duration;

use sm_http2::{
    headers, settings_id, CompressionMode, Connection, Error, Frame, FrameCodec, SessionConfig,
    SessionEvent, SessionState, StatusCode, StreamError, StreamState, TransportError,
};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

type Endpoint = (Connection, UnboundedReceiver<SessionEvent>);

async fn connect(client: SessionConfig, server: SessionConfig) -> (Endpoint, Endpoint) {
    connect_over(64 * 1024, client, server).await
}

/// Connect over a duplex pipe holding at most `buffer` unread bytes.
async fn connect_over(
    buffer: usize,
    client: SessionConfig,
    server: SessionConfig,
) -> (Endpoint, Endpoint) {
    let (a, b) = tokio::io::duplex(buffer);
    let client = Connection::start(a, client).await.unwrap();
    let server = Connection::start(b, server).await.unwrap();
    (client, server)
}

/// Wait for the first event matching `f`.
async fn next_matching<F>(events: &mut UnboundedReceiver<SessionEvent>, f: F) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if f(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Answer every opened stream with a 200 and `body`.
fn serve(server: Connection, mut events: UnboundedReceiver<SessionEvent>, body: &'static str) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let SessionEvent::StreamOpened { stream_id, .. } = event {
                let stream = server.stream(stream_id);
                stream
                    .reply(headers([(":status", "200")]), false)
                    .await
                    .unwrap();
                stream.send_data(body, true).await.unwrap();
            }
        }
    });
}

#[tokio::test]
async fn test_request_response() {
    let ((client, mut client_events), (server, server_events)) =
        connect(SessionConfig::client(), SessionConfig::server()).await;
    serve(server, server_events, "hello");

    let stream = client
        .open_stream(headers([(":path", "/a.txt")]), false)
        .await
        .unwrap();
    assert_eq!(stream.id(), 1);

    let reply = next_matching(&mut client_events, |e| {
        matches!(e, SessionEvent::Headers { stream_id: 1, .. })
    })
    .await;
    assert_eq!(
        reply,
        SessionEvent::Headers {
            stream_id: 1,
            headers: headers([(":status", "200")]),
            is_fin: false,
        }
    );
    next_matching(&mut client_events, |e| {
        matches!(e, SessionEvent::Data { stream_id: 1, is_fin: true, .. })
    })
    .await;
    assert_eq!(stream.state(), Some(StreamState::HalfClosedRemote));

    stream.send_data("", true).await.unwrap();
    timeout(WAIT, stream.closed()).await.unwrap();
    assert_eq!(stream.state(), Some(StreamState::Closed));
    assert_eq!(stream.take_received().unwrap().as_ref(), b"hello");
}

#[tokio::test]
async fn test_concurrent_streams() {
    let ((client, _client_events), (server, server_events)) =
        connect(SessionConfig::client(), SessionConfig::server()).await;
    serve(server, server_events, "body");

    let mut handles = Vec::new();
    for i in 0..8 {
        let path = format!("/file{}", i);
        let stream = client
            .open_stream(headers([(":path", path.as_str())]), true)
            .await
            .unwrap();
        handles.push(tokio::spawn(async move {
            stream.closed().await;
            stream.take_received()
        }));
    }
    for handle in handles {
        let body = timeout(WAIT, handle).await.unwrap().unwrap();
        assert_eq!(body.unwrap().as_ref(), b"body");
    }
    timeout(WAIT, client.wait_drained()).await.unwrap();
}

#[tokio::test]
async fn test_send_waits_for_window() {
    let ((client, _client_events), (_server, mut server_events)) = connect(
        SessionConfig::client().initial_window_size(16),
        SessionConfig::server().setting(settings_id::INITIAL_WINDOW_SIZE, 16),
    )
    .await;

    let stream = client
        .open_stream(headers([(":path", "/upload")]), false)
        .await
        .unwrap();
    let payload: Vec<u8> = (0..100u8).collect();
    // Resolves only after the server has granted the window back several times
    timeout(WAIT, stream.send_data(payload.clone(), true))
        .await
        .unwrap()
        .unwrap();

    let mut received = Vec::new();
    while received.len() < payload.len() {
        if let SessionEvent::Data { data, .. } =
            next_matching(&mut server_events, |e| matches!(e, SessionEvent::Data { .. })).await
        {
            received.extend_from_slice(&data);
        }
    }
    assert_eq!(received, payload);
}

#[tokio::test]
async fn test_ping_roundtrip() {
    let ((client, mut client_events), (_server, _server_events)) =
        connect(SessionConfig::client(), SessionConfig::server()).await;

    let id = client.ping().await.unwrap();
    assert_eq!(id, 1);
    let reply = next_matching(&mut client_events, |e| {
        matches!(e, SessionEvent::PingReply { .. })
    })
    .await;
    assert_eq!(reply, SessionEvent::PingReply { id: 1 });
}

#[tokio::test]
async fn test_reset_stream_fails_pending_send() {
    let ((client, _client_events), (server, mut server_events)) = connect(
        SessionConfig::client().initial_window_size(0),
        SessionConfig::server(),
    )
    .await;

    let stream = client
        .open_stream(headers([(":path", "/")]), false)
        .await
        .unwrap();
    let sender = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.send_data("stuck", false).await })
    };

    next_matching(&mut server_events, |e| {
        matches!(e, SessionEvent::StreamOpened { .. })
    })
    .await;
    server.stream(1).close(StatusCode::Cancel).await.unwrap();

    let result = timeout(WAIT, sender).await.unwrap().unwrap();
    assert!(matches!(
        result,
        Err(Error::Stream(StreamError::SendOnClosed(1)))
    ));
}

#[tokio::test]
async fn test_peer_disconnect_wakes_everyone() {
    let ((client, mut client_events), (server, _server_events)) = connect(
        SessionConfig::client().initial_window_size(0),
        SessionConfig::server(),
    )
    .await;

    let stream = client
        .open_stream(headers([(":path", "/")]), false)
        .await
        .unwrap();
    let sender = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.send_data("stuck", false).await })
    };
    drop(server);

    timeout(WAIT, client.closed()).await.unwrap();
    assert_eq!(client.state(), SessionState::Closed);
    assert!(timeout(WAIT, sender).await.unwrap().unwrap().is_err());
    timeout(WAIT, stream.closed()).await.unwrap();

    next_matching(&mut client_events, |e| {
        *e == SessionEvent::Error(TransportError::ConnectionClosed.into())
    })
    .await;
}

#[tokio::test]
async fn test_close_sends_go_away() {
    let ((client, _client_events), (server, mut server_events)) =
        connect(SessionConfig::client(), SessionConfig::server()).await;

    client.close().await.unwrap();
    assert_eq!(client.state(), SessionState::Closed);
    assert!(client
        .open_stream(headers([(":path", "/")]), false)
        .await
        .is_err());

    let event = next_matching(&mut server_events, |e| {
        matches!(e, SessionEvent::GoAway { .. })
    })
    .await;
    assert_eq!(
        event,
        SessionEvent::GoAway {
            last_good_stream_id: 0,
            status: StatusCode::Success,
        }
    );
    // The writer shutdown reaches the server as end of stream
    timeout(WAIT, server.closed()).await.unwrap();
}

#[tokio::test]
async fn test_go_away_drains_connection() {
    let ((client, _client_events), (server, mut server_events)) =
        connect(SessionConfig::client(), SessionConfig::server()).await;

    let stream = client
        .open_stream(headers([(":path", "/slow")]), false)
        .await
        .unwrap();
    next_matching(&mut server_events, |e| {
        matches!(e, SessionEvent::StreamOpened { .. })
    })
    .await;
    server.go_away(StatusCode::Success).await.unwrap();
    assert_eq!(server.state(), SessionState::Opened);

    let server_stream = server.stream(1);
    server_stream.send_data("last", true).await.unwrap();
    stream.send_data("", true).await.unwrap();

    timeout(WAIT, server.wait_drained()).await.unwrap();
    timeout(WAIT, server.closed()).await.unwrap();
    timeout(WAIT, client.closed()).await.unwrap();
}

#[tokio::test]
async fn test_bidirectional_bulk_over_small_buffer() {
    let ((client, _client_events), (server, mut server_events)) =
        connect_over(1024, SessionConfig::client(), SessionConfig::server()).await;

    let stream = client
        .open_stream(headers([(":path", "/echo")]), false)
        .await
        .unwrap();
    next_matching(&mut server_events, |e| {
        matches!(e, SessionEvent::StreamOpened { .. })
    })
    .await;
    let server_stream = server.stream(1);
    server_stream
        .reply(headers([(":status", "200")]), false)
        .await
        .unwrap();

    // Both sides fill the pipe at once; each reader must keep draining
    let upload = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.send_data(vec![0u8; 200_000], true).await })
    };
    let download = {
        let stream = server_stream.clone();
        tokio::spawn(async move { stream.send_data(vec![1u8; 200_000], true).await })
    };
    let limit = Duration::from_secs(10);
    timeout(limit, upload).await.unwrap().unwrap().unwrap();
    timeout(limit, download).await.unwrap().unwrap().unwrap();

    timeout(WAIT, stream.closed()).await.unwrap();
    timeout(WAIT, server_stream.closed()).await.unwrap();
    let downloaded = stream.take_received().unwrap();
    assert_eq!(downloaded.len(), 200_000);
    assert!(downloaded.iter().all(|b| *b == 1));
    let uploaded = server_stream.take_received().unwrap();
    assert_eq!(uploaded.len(), 200_000);
    assert!(uploaded.iter().all(|b| *b == 0));
}

#[tokio::test]
async fn test_blocked_send_returns_when_peer_goes_away() {
    let (a, peer) = tokio::io::duplex(1024);
    let (client, _events) = Connection::start(a, SessionConfig::client()).await.unwrap();
    let stream = client
        .open_stream(headers([(":path", "/upload")]), false)
        .await
        .unwrap();
    let sender = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.send_data(vec![0u8; 50_000], true).await })
    };

    // Nobody reads the peer end, so the writer stalls on a full pipe
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!sender.is_finished());

    drop(peer);
    let result = timeout(WAIT, sender).await.unwrap().unwrap();
    assert!(matches!(
        result,
        Err(Error::Transport(TransportError::SessionClosed))
    ));
    timeout(WAIT, client.closed()).await.unwrap();
}

#[tokio::test]
async fn test_send_data_resolves_after_write() {
    let (a, mut peer) = tokio::io::duplex(64 * 1024);
    let config = SessionConfig::client().compression(CompressionMode::None);
    let (client, _events) = Connection::start(a, config).await.unwrap();
    let stream = client
        .open_stream(headers([(":path", "/")]), false)
        .await
        .unwrap();
    stream.send_data("payload", true).await.unwrap();
    // Aborts both tasks, losing anything not yet written
    drop(client);

    let mut wire = Vec::new();
    timeout(WAIT, peer.read_to_end(&mut wire))
        .await
        .unwrap()
        .unwrap();
    let frames = FrameCodec::new().process(&wire).unwrap();
    assert!(frames.contains(&Frame::data(1, "payload", true)));
}

#[tokio::test]
async fn test_unserializable_frame_sends_go_away() {
    let big = 0x00FF_FFFF + 1;
    let config = SessionConfig::client()
        .compression(CompressionMode::None)
        .max_data_frame_size(big)
        .initial_window_size(big as i64);
    let (a, mut peer) = tokio::io::duplex(64 * 1024);
    let (client, _events) = Connection::start(a, config).await.unwrap();
    let reader = tokio::spawn(async move {
        let mut wire = Vec::new();
        peer.read_to_end(&mut wire).await.map(|_| wire)
    });

    let stream = client
        .open_stream(headers([(":path", "/")]), false)
        .await
        .unwrap();
    let result = timeout(WAIT, stream.send_data(vec![0u8; big], false))
        .await
        .unwrap();
    assert!(result.is_err());
    timeout(WAIT, client.closed()).await.unwrap();

    let wire = timeout(WAIT, reader).await.unwrap().unwrap().unwrap();
    let frames = FrameCodec::new().process(&wire).unwrap();
    assert_eq!(
        frames.last(),
        Some(&Frame::go_away(0, StatusCode::ProtocolError))
    );
}
