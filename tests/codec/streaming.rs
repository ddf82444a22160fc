//! Tests for incremental decoding

use sm_http2::{headers, Frame, FrameBody, FrameCodec, FramingError, StatusCode};

fn wire(frames: &[Frame]) -> Vec<u8> {
    let mut codec = FrameCodec::new();
    frames
        .iter()
        .flat_map(|f| codec.serialize(f).unwrap())
        .collect()
}

#[test]
fn test_byte_at_a_time() {
    let bytes = wire(&[
        Frame::syn_stream(1, 0, headers([(":path", "/a.txt")]), false),
        Frame::data(1, "hello", true),
    ]);

    let mut codec = FrameCodec::new();
    let mut frames = Vec::new();
    for byte in &bytes {
        codec.feed(std::slice::from_ref(byte));
        while let Some(frame) = codec.decode_next().unwrap() {
            frames.push(frame);
        }
    }

    assert_eq!(frames.len(), 2);
    assert_eq!(codec.buffered(), 0);
    assert_eq!(frames[1].body, FrameBody::Data("hello".into()));
}

#[test]
fn test_partial_header_waits() {
    let bytes = wire(&[Frame::rst(1, StatusCode::Cancel)]);
    let mut codec = FrameCodec::new();
    codec.feed(&bytes[..5]);
    assert!(codec.decode_next().unwrap().is_none());
    assert_eq!(codec.buffered(), 5);

    codec.feed(&bytes[5..]);
    assert!(codec.decode_next().unwrap().is_some());
}

#[test]
fn test_bad_frame_between_good_ones() {
    let mut bytes = wire(&[Frame::ping(1)]);
    // Control frame of unknown type 5 with a 4-byte payload
    bytes.extend_from_slice(&[0x80, 0x03, 0x00, 0x05, 0, 0, 0, 4, 0, 0, 0, 0, 1, 2, 3, 4]);
    bytes.extend(wire(&[Frame::ping(3)]));

    let mut codec = FrameCodec::new();
    codec.feed(&bytes);
    assert_eq!(codec.decode_next().unwrap().unwrap().stream_id, 1);
    assert_eq!(
        codec.decode_next().unwrap_err(),
        FramingError::UnknownFrameType(5)
    );
    assert_eq!(codec.decode_next().unwrap().unwrap().stream_id, 3);
    assert!(codec.decode_next().unwrap().is_none());
}

#[test]
fn test_reset_drops_partial_input() {
    let bytes = wire(&[Frame::ping(1)]);
    let mut codec = FrameCodec::new();
    codec.feed(&bytes[..7]);
    codec.reset();
    assert_eq!(codec.buffered(), 0);

    codec.feed(&bytes);
    assert!(codec.decode_next().unwrap().is_some());
}

#[test]
fn test_inbound_ceiling_rejects_before_buffering() {
    let bytes = wire(&[Frame::data(1, vec![0u8; 100], false)]);
    let mut codec = FrameCodec::new();
    codec.set_max_frame_payload(64);
    codec.feed(&bytes[..8]);

    let err = codec.decode_next().unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, FramingError::FrameTooLarge { size: 100, max: 64 }));
}
