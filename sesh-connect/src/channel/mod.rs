//! The _channels_ multiplexed over the connection, and their lifecycle.

use std::collections::VecDeque;

use sesh::msg::connect;

use crate::response::Pending;

mod window;
pub(crate) use window::{LocalWindow, RemoteWindow};

#[doc(no_inline)]
pub use connect::{ChannelOpenContext, ChannelOpenFailureReason, ChannelRequestContext};

/// The lifecycle state of a [`Channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Waiting for the peer's confirmation, or our acceptance of the peer's request.
    Opening,

    /// Both sides may send data.
    Open,

    /// Either side signaled the end of its data.
    Eof,

    /// Either side sent its close, waiting for the other one.
    Closing,

    /// Both sides closed, the channel is released.
    Closed,
}

/// A response to a _channel request_.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The request succeeded.
    Success,

    /// The request failed.
    Failure,
}

/// A chunk of outbound data, with its extended data type if any.
#[derive(Debug)]
pub(crate) struct Chunk {
    pub data_type: Option<u32>,
    pub data: VecDeque<u8>,
}

/// A logical duplex byte stream, multiplexed over the session.
#[derive(Debug)]
pub struct Channel {
    pub(crate) id: u32,
    pub(crate) remote_id: u32,
    pub(crate) kind: String,

    /// Whether the peer initiated the channel.
    pub(crate) incoming: bool,
    pub(crate) opened: bool,
    pub(crate) open: Option<Pending<u32>>,

    pub(crate) local: LocalWindow,
    pub(crate) remote: RemoteWindow,
    pub(crate) adjustments: usize,

    pub(crate) inbound: VecDeque<u8>,
    pub(crate) inbound_ext: VecDeque<u8>,
    pub(crate) outbound: VecDeque<Chunk>,

    pub(crate) eof_pending: bool,
    pub(crate) close_pending: bool,
    pub(crate) eof_sent: bool,
    pub(crate) eof_received: bool,
    pub(crate) close_sent: bool,
    pub(crate) close_received: bool,

    /// Our requests awaiting a reply, resolved in order.
    pub(crate) requests: VecDeque<Pending<Outcome>>,

    /// Peer requests we owe a reply to.
    pub(crate) replies: usize,
}

impl Channel {
    pub(crate) fn new(id: u32, kind: &str, window: u32) -> Self {
        Self {
            id,
            remote_id: 0,
            kind: kind.to_string(),
            incoming: false,
            opened: false,
            open: None,
            local: LocalWindow::new(window),
            remote: RemoteWindow::new(0, 0),
            adjustments: 0,
            inbound: Default::default(),
            inbound_ext: Default::default(),
            outbound: Default::default(),
            eof_pending: false,
            close_pending: false,
            eof_sent: false,
            eof_received: false,
            close_sent: false,
            close_received: false,
            requests: Default::default(),
            replies: 0,
        }
    }

    /// Our identifier for the channel.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The identifier the peer allocated for the channel.
    pub fn remote_id(&self) -> Option<u32> {
        self.opened.then_some(self.remote_id)
    }

    /// The channel type, like `session` or `direct-tcpip`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The current lifecycle state of the channel.
    pub fn state(&self) -> State {
        if self.close_sent && self.close_received {
            State::Closed
        } else if self.close_sent || self.close_received {
            State::Closing
        } else if !self.opened {
            State::Opening
        } else if self.eof_sent || self.eof_received {
            State::Eof
        } else {
            State::Open
        }
    }

    /// Bytes the peer may still send us before we grant more.
    pub fn local_window(&self) -> u32 {
        self.local.size()
    }

    /// Bytes we may still send before the peer grants more.
    pub fn remote_window(&self) -> u32 {
        self.remote.size()
    }

    /// The maximum size of a data packet toward the peer.
    pub fn remote_packet_size(&self) -> u32 {
        self.remote.packet()
    }

    /// Number of window adjustments received from the peer.
    pub fn adjustments(&self) -> usize {
        self.adjustments
    }

    /// Bytes written but held back by the peer's window.
    pub fn buffered(&self) -> usize {
        self.outbound.iter().map(|chunk| chunk.data.len()).sum()
    }

    /// Bytes received and not read yet, on the data stream or on the extended one.
    pub fn readable(&self, extended: bool) -> usize {
        if extended {
            self.inbound_ext.len()
        } else {
            self.inbound.len()
        }
    }

    /// Whether the peer signaled the end of its data.
    pub fn is_eof(&self) -> bool {
        self.eof_received
    }

    /// Fail every pending operation on the channel with a _no response_ condition.
    pub(crate) fn abandon(&mut self) {
        self.open.take();
        self.requests.clear();
    }
}
