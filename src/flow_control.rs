//! Session-level flow control.
//!
//! Two accounting schemes share one type. Both endpoints must be configured
//! with the same scheme; frames belonging to the other scheme are protocol
//! errors.

use crate::config::SessionConfig;
use crate::error::ProtocolError;
use crate::frame::{Frame, StreamId};

/// Flow control accounting scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControlScheme {
    /// Signed window adjusted by WINDOW_UPDATE deltas and SETTINGS.
    WindowUpdate,
    /// Non-negative balance topped up by CREDIT_UPDATE.
    Credit,
}

impl FlowControlScheme {
    pub fn name(self) -> &'static str {
        match self {
            FlowControlScheme::WindowUpdate => "window-update",
            FlowControlScheme::Credit => "credit",
        }
    }
}

/// Send and receive allowance for one session.
#[derive(Debug)]
pub struct FlowControl {
    scheme: FlowControlScheme,
    /// Bytes we may still send.
    send_allowance: i64,
    /// Bytes the peer may still send us.
    recv_allowance: i64,
    /// Received bytes not yet granted back.
    consumed: i64,
    /// Grant back once this much has been consumed.
    update_threshold: i64,
    /// Window the peer's SETTINGS are measured against.
    initial_window: i64,
    /// A send could not complete for lack of allowance.
    blocked: bool,
}

impl FlowControl {
    pub fn new(scheme: FlowControlScheme, send_allowance: i64, recv_allowance: i64) -> Self {
        Self {
            scheme,
            send_allowance,
            recv_allowance,
            consumed: 0,
            update_threshold: recv_allowance / 2,
            initial_window: send_allowance,
            blocked: false,
        }
    }

    /// Starting state for a session before it opens.
    pub fn from_config(config: &SessionConfig) -> Self {
        match config.flow_control {
            FlowControlScheme::WindowUpdate => Self::new(
                FlowControlScheme::WindowUpdate,
                config.initial_window_size,
                config.advertised_window(),
            ),
            // The peer starts from the same initial credit we do
            FlowControlScheme::Credit => Self::new(
                FlowControlScheme::Credit,
                config.initial_credit,
                config.initial_credit,
            ),
        }
    }

    pub fn scheme(&self) -> FlowControlScheme {
        self.scheme
    }

    pub fn send_allowance(&self) -> i64 {
        self.send_allowance
    }

    pub fn recv_allowance(&self) -> i64 {
        self.recv_allowance
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// How many of `wanted` bytes may go out now.
    pub fn sendable(&self, wanted: usize) -> usize {
        if self.send_allowance <= 0 {
            0
        } else {
            wanted.min(self.send_allowance as usize)
        }
    }

    /// Record that we sent `n` data bytes.
    pub fn consume_send(&mut self, n: usize) {
        self.send_allowance -= n as i64;
    }

    /// Record that a send is waiting for allowance.
    pub fn mark_blocked(&mut self) {
        self.blocked = true;
    }

    /// Apply a WINDOW_UPDATE delta.
    ///
    /// Returns true when a blocked sender may resume.
    pub fn on_window_update(&mut self, delta: i64) -> Result<bool, ProtocolError> {
        self.expect_scheme(FlowControlScheme::WindowUpdate, "WINDOW_UPDATE")?;
        self.send_allowance = self.send_allowance.saturating_add(delta);
        Ok(self.check_unblocked())
    }

    /// Apply a CREDIT_UPDATE addition.
    ///
    /// Returns true when a blocked sender may resume.
    pub fn on_credit_update(&mut self, addition: i64) -> Result<bool, ProtocolError> {
        self.expect_scheme(FlowControlScheme::Credit, "CREDIT_UPDATE")?;
        if addition < 0 {
            return Err(ProtocolError::NegativeCredit(addition));
        }
        self.send_allowance = self.send_allowance.saturating_add(addition);
        Ok(self.check_unblocked())
    }

    /// Peer changed its initial window through SETTINGS.
    ///
    /// Ignored under the credit scheme.
    pub fn on_initial_window_size(&mut self, new_initial: i64) -> bool {
        if self.scheme != FlowControlScheme::WindowUpdate {
            return false;
        }
        let delta = new_initial - self.initial_window;
        self.initial_window = new_initial;
        self.send_allowance = self.send_allowance.saturating_add(delta);
        self.check_unblocked()
    }

    /// Account for `n` received data bytes on `stream_id`.
    pub fn recv_data(&mut self, stream_id: StreamId, n: usize) -> Result<(), ProtocolError> {
        if n as i64 > self.recv_allowance {
            return Err(ProtocolError::FlowControl {
                stream_id,
                received: n,
                allowance: self.recv_allowance,
            });
        }
        self.recv_allowance -= n as i64;
        self.consumed += n as i64;
        Ok(())
    }

    /// Grant `amount` more receive allowance to the peer.
    pub fn grant(&mut self, amount: i64) -> Frame {
        self.recv_allowance += amount;
        if self.update_threshold == 0 {
            self.update_threshold = self.recv_allowance / 2;
        }
        match self.scheme {
            FlowControlScheme::WindowUpdate => Frame::window_update(0, amount),
            FlowControlScheme::Credit => Frame::credit_update(0, amount),
        }
    }

    /// Grant consumed bytes back once the threshold is reached.
    pub fn take_replenish(&mut self) -> Option<Frame> {
        if self.consumed == 0 || self.consumed < self.update_threshold {
            return None;
        }
        let amount = std::mem::take(&mut self.consumed);
        Some(self.grant(amount))
    }

    fn check_unblocked(&mut self) -> bool {
        if self.blocked && self.send_allowance > 0 {
            self.blocked = false;
            true
        } else {
            false
        }
    }

    fn expect_scheme(
        &self,
        scheme: FlowControlScheme,
        frame: &'static str,
    ) -> Result<(), ProtocolError> {
        if self.scheme == scheme {
            Ok(())
        } else {
            Err(ProtocolError::SchemeMismatch {
                frame,
                scheme: self.scheme.name(),
            })
        }
    }
}
