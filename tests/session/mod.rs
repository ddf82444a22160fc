mod flow_control;
mod violations;

use sm_http2::{Frame, FrameCodec, Session, SessionConfig, SessionEvent};

/// Opened client/server pair.
pub fn pair(client: SessionConfig, server: SessionConfig) -> (Session, Session) {
    let mut client = Session::new(client);
    let mut server = Session::new(server);
    client.open().unwrap();
    server.open().unwrap();
    (client, server)
}

/// Move everything `from` has queued over to `to`.
pub fn pump(from: &mut Session, to: &mut Session) {
    let bytes = from.transmit().unwrap();
    to.receive(&bytes).unwrap();
}

/// Deliver hand-built frames, bypassing header compression.
pub fn inject(to: &mut Session, frames: Vec<Frame>) {
    let mut codec = FrameCodec::new();
    let mut bytes = Vec::new();
    for frame in frames {
        bytes.extend(codec.serialize(&frame.without_compression()).unwrap());
    }
    to.receive(&bytes).unwrap();
}

/// Decode whatever `session` has queued, without compression on its side.
pub fn sent_frames(session: &mut Session) -> Vec<Frame> {
    let bytes = session.transmit().unwrap();
    FrameCodec::new().process(&bytes).unwrap()
}

pub fn count<F>(events: &[SessionEvent], f: F) -> usize
where
    F: Fn(&SessionEvent) -> bool,
{
    events.iter().filter(|e| f(e)).count()
}
