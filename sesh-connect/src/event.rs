use sesh::msg::{
    connect::{ChannelOpenContext, ChannelRequestContext, GlobalRequestContext},
    trans::DisconnectReason,
};
use ssh_key::PublicKey;

/// Something that happened on the connection, to be handled by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The server sent an authentication banner.
    Banner(String),

    /// The host key of the server awaits a verification, see [`crate::connect::Connect::verify_host`].
    HostKey(PublicKey),

    /// The authentication completed.
    Authenticated {
        /// The authenticated user.
        username: String,
    },

    /// The peer requests to open a channel, to be accepted or rejected.
    ChannelOpen {
        /// Our identifier for the channel.
        channel: u32,

        /// The channel type and its fields.
        context: ChannelOpenContext,
    },

    /// Data is readable on the channel.
    Data {
        /// The channel.
        channel: u32,

        /// The extended data type, `None` for the regular data stream.
        data_type: Option<u32>,
    },

    /// The peer will not send more data on the channel.
    Eof {
        /// The channel.
        channel: u32,
    },

    /// The peer made a channel request.
    Request {
        /// The channel.
        channel: u32,

        /// Whether the peer expects a reply.
        want_reply: bool,

        /// The request type and its fields.
        context: ChannelRequestContext,
    },

    /// The channel is closed on both sides, emitted once per channel.
    Closed {
        /// The channel, whose identifier may now be reused.
        channel: u32,
    },

    /// The peer made a global request.
    GlobalRequest {
        /// Whether the peer expects a reply.
        want_reply: bool,

        /// The request type and its fields.
        context: GlobalRequestContext,
    },

    /// The session ended.
    Disconnected(DisconnectReason),
}
