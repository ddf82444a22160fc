//! Session configuration.

use crate::flow_control::FlowControlScheme;
use crate::frame::{settings_id, SettingsMap, StreamId, DEFAULT_VERSION, MAX_PAYLOAD_SIZE};
use crate::hpack::HeaderCompressionProcessor;
use crate::pipeline::Pipeline;

/// Default session-level flow control window.
pub const DEFAULT_WINDOW_SIZE: i64 = 65_536;

/// Default largest DATA payload the session emits in one frame.
pub const DEFAULT_MAX_DATA_FRAME_SIZE: usize = 16_384;

/// Default transport read buffer (64 KB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Which end of the connection this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opens odd stream ids.
    Client,
    /// Opens even stream ids.
    Server,
}

impl Role {
    /// First stream id this role allocates.
    pub fn first_stream_id(self) -> StreamId {
        match self {
            Role::Client => 1,
            Role::Server => 2,
        }
    }

    /// Whether `id` has this role's parity.
    pub fn owns(self, id: StreamId) -> bool {
        match self {
            Role::Client => id % 2 == 1,
            Role::Server => id != 0 && id % 2 == 0,
        }
    }

    pub fn peer(self) -> Role {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }
}

/// Header compression negotiated for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    /// Header blocks travel in the plain layout.
    None,
    /// Dictionary persists across frames.
    Stateful,
    /// Dictionary reset before every frame.
    Stateless,
}

/// Configuration for a [`Session`](crate::Session).
///
/// Both endpoints must agree on `version`, `flow_control` and
/// `compression`; nothing is negotiated on the wire.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub role: Role,
    pub version: u16,
    pub flow_control: FlowControlScheme,
    /// Window-update scheme: starting send and receive window.
    pub initial_window_size: i64,
    /// Credit scheme: send balance before the peer grants anything.
    pub initial_credit: i64,
    /// Credit scheme: credit granted to the peer when the session opens.
    pub receive_credit: i64,
    pub compression: CompressionMode,
    pub max_data_frame_size: usize,
    /// Inbound frames declaring a larger payload end the session.
    pub max_frame_payload: usize,
    /// Grant consumed receive allowance back to the peer automatically.
    pub auto_replenish: bool,
    /// SETTINGS sent when the session opens (skipped if empty).
    pub initial_settings: SettingsMap,
    pub read_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            role: Role::Client,
            version: DEFAULT_VERSION,
            flow_control: FlowControlScheme::WindowUpdate,
            initial_window_size: DEFAULT_WINDOW_SIZE,
            initial_credit: 0,
            receive_credit: DEFAULT_WINDOW_SIZE,
            compression: CompressionMode::Stateful,
            max_data_frame_size: DEFAULT_MAX_DATA_FRAME_SIZE,
            max_frame_payload: MAX_PAYLOAD_SIZE,
            auto_replenish: true,
            initial_settings: SettingsMap::new(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl SessionConfig {
    pub fn client() -> Self {
        Self::default()
    }

    pub fn server() -> Self {
        Self::default().role(Role::Server)
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    pub fn flow_control(mut self, scheme: FlowControlScheme) -> Self {
        self.flow_control = scheme;
        self
    }

    pub fn initial_window_size(mut self, size: i64) -> Self {
        self.initial_window_size = size;
        self
    }

    pub fn initial_credit(mut self, credit: i64) -> Self {
        self.initial_credit = credit;
        self
    }

    pub fn receive_credit(mut self, credit: i64) -> Self {
        self.receive_credit = credit;
        self
    }

    pub fn compression(mut self, mode: CompressionMode) -> Self {
        self.compression = mode;
        self
    }

    /// Clamped to at least one byte and to the 24-bit length field.
    pub fn max_data_frame_size(mut self, size: usize) -> Self {
        self.max_data_frame_size = size.clamp(1, MAX_PAYLOAD_SIZE);
        self
    }

    pub fn max_frame_payload(mut self, size: usize) -> Self {
        self.max_frame_payload = size.min(MAX_PAYLOAD_SIZE);
        self
    }

    pub fn auto_replenish(mut self, enabled: bool) -> Self {
        self.auto_replenish = enabled;
        self
    }

    /// Add one entry to the SETTINGS sent on open.
    pub fn setting(mut self, id: i32, value: i32) -> Self {
        self.initial_settings.insert(id, value);
        self
    }

    pub fn initial_settings(mut self, settings: SettingsMap) -> Self {
        self.initial_settings = settings;
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Receive window this endpoint advertises through its own SETTINGS.
    pub(crate) fn advertised_window(&self) -> i64 {
        self.initial_settings
            .get(&settings_id::INITIAL_WINDOW_SIZE)
            .map(|v| i64::from(*v))
            .unwrap_or(self.initial_window_size)
    }

    /// Fresh processor chain for one session.
    pub(crate) fn build_pipeline(&self) -> Pipeline {
        match self.compression {
            CompressionMode::None => Pipeline::new(),
            CompressionMode::Stateful => {
                Pipeline::new().with(Box::new(HeaderCompressionProcessor::stateful()))
            }
            CompressionMode::Stateless => {
                Pipeline::new().with(Box::new(HeaderCompressionProcessor::stateless()))
            }
        }
    }
}
