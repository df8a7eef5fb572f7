//! Messages of the connection protocol (RFC 4254), with OpenSSH extensions.
//!
//! The requests and channel types carry a catch-all variant, so that
//! unknown ones can be refused instead of failing the whole connection.

use binrw::{binrw, helpers::until_eof};

use super::arch;

#[doc(no_inline)]
pub use ssh_packet::connect::{
    ChannelClose, ChannelData, ChannelEof, ChannelExtendedData, ChannelExtendedDataType,
    ChannelFailure, ChannelOpenConfirmation, ChannelSuccess, ChannelWindowAdjust, RequestFailure,
};

/// The `SSH_MSG_GLOBAL_REQUEST` message.
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big, magic = 80_u8)]
pub struct GlobalRequest {
    #[bw(calc = arch::StringAscii::new(context.name()))]
    kind: arch::StringAscii,

    /// Whether the sender expects a reply.
    pub want_reply: arch::Bool,

    /// The request name and its fields.
    #[br(args(&kind))]
    pub context: GlobalRequestContext,
}

/// The context of a global request.
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big)]
#[br(import(kind: &str))]
pub enum GlobalRequestContext {
    /// A `tcpip-forward` request.
    #[br(pre_assert(kind == GlobalRequestContext::TCPIP_FORWARD))]
    TcpipForward {
        /// Address to bind on the remote side.
        bind_address: arch::StringUtf8,

        /// Port to bind on the remote side, `0` to let the peer choose.
        bind_port: u32,
    },

    /// A `cancel-tcpip-forward` request.
    #[br(pre_assert(kind == GlobalRequestContext::CANCEL_TCPIP_FORWARD))]
    CancelTcpipForward {
        /// Address that was bound.
        bind_address: arch::StringUtf8,

        /// Port that was bound.
        bind_port: u32,
    },

    /// A `keepalive@openssh.com` request.
    #[br(pre_assert(kind == GlobalRequestContext::KEEPALIVE))]
    Keepalive,

    /// Any other request, with its raw data.
    #[br(pre_assert(!GlobalRequestContext::KNOWN.contains(&kind)))]
    Other {
        /// The request name.
        #[br(calc = arch::StringAscii::new(kind))]
        #[bw(ignore)]
        name: arch::StringAscii,

        /// The request-specific data.
        #[br(parse_with = until_eof)]
        data: Vec<u8>,
    },
}

impl GlobalRequestContext {
    const TCPIP_FORWARD: &'static str = "tcpip-forward";
    const CANCEL_TCPIP_FORWARD: &'static str = "cancel-tcpip-forward";
    const KEEPALIVE: &'static str = "keepalive@openssh.com";

    const KNOWN: &'static [&'static str] = &[
        Self::TCPIP_FORWARD,
        Self::CANCEL_TCPIP_FORWARD,
        Self::KEEPALIVE,
    ];

    /// The name of the request on the wire.
    pub fn name(&self) -> &str {
        match self {
            Self::TcpipForward { .. } => Self::TCPIP_FORWARD,
            Self::CancelTcpipForward { .. } => Self::CANCEL_TCPIP_FORWARD,
            Self::Keepalive => Self::KEEPALIVE,
            Self::Other { name, .. } => name,
        }
    }
}

/// The `SSH_MSG_REQUEST_SUCCESS` message.
#[binrw]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[brw(big, magic = 81_u8)]
pub struct RequestSuccess {
    /// Request-specific response data.
    #[br(parse_with = until_eof)]
    pub data: Vec<u8>,
}

impl RequestSuccess {
    /// The port bound by the peer in response to a `tcpip-forward` request on port `0`.
    pub fn bound_port(&self) -> Option<u32> {
        let port = self.data.get(..4)?;

        <[u8; 4]>::try_from(port).ok().map(u32::from_be_bytes)
    }
}

/// The `SSH_MSG_CHANNEL_OPEN` message.
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big, magic = 90_u8)]
pub struct ChannelOpen {
    #[bw(calc = arch::StringAscii::new(context.name()))]
    kind: arch::StringAscii,

    /// The sender's channel number.
    pub sender_channel: u32,

    /// Initial window size of the sender.
    pub initial_window_size: u32,

    /// Maximum packet size of the sender.
    pub maximum_packet_size: u32,

    /// The channel type and its fields.
    #[br(args(&kind))]
    pub context: ChannelOpenContext,
}

/// The type of a channel and its type-specific fields.
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big)]
#[br(import(kind: &str))]
pub enum ChannelOpenContext {
    /// A `session` channel.
    #[br(pre_assert(kind == ChannelOpenContext::SESSION))]
    Session,

    /// A `direct-tcpip` channel.
    #[br(pre_assert(kind == ChannelOpenContext::DIRECT_TCPIP))]
    DirectTcpip {
        /// Host to connect to.
        host_to_connect: arch::StringUtf8,

        /// Port to connect to.
        port_to_connect: u32,

        /// Address of the originator of the connection.
        originator_address: arch::StringUtf8,

        /// Port of the originator of the connection.
        originator_port: u32,
    },

    /// A `forwarded-tcpip` channel.
    #[br(pre_assert(kind == ChannelOpenContext::FORWARDED_TCPIP))]
    ForwardedTcpip {
        /// Address that was connected.
        address_connected: arch::StringUtf8,

        /// Port that was connected.
        port_connected: u32,

        /// Address of the originator of the connection.
        originator_address: arch::StringUtf8,

        /// Port of the originator of the connection.
        originator_port: u32,
    },

    /// A `x11` channel.
    #[br(pre_assert(kind == ChannelOpenContext::X11))]
    X11 {
        /// Address of the originator of the connection.
        originator_address: arch::StringUtf8,

        /// Port of the originator of the connection.
        originator_port: u32,
    },

    /// A `auth-agent@openssh.com` channel.
    #[br(pre_assert(kind == ChannelOpenContext::AUTH_AGENT))]
    AuthAgent,

    /// Any other channel type, with its raw data.
    #[br(pre_assert(!ChannelOpenContext::KNOWN.contains(&kind)))]
    Other {
        /// The channel type name.
        #[br(calc = arch::StringAscii::new(kind))]
        #[bw(ignore)]
        name: arch::StringAscii,

        /// The type-specific data.
        #[br(parse_with = until_eof)]
        data: Vec<u8>,
    },
}

impl ChannelOpenContext {
    const SESSION: &'static str = "session";
    const DIRECT_TCPIP: &'static str = "direct-tcpip";
    const FORWARDED_TCPIP: &'static str = "forwarded-tcpip";
    const X11: &'static str = "x11";
    const AUTH_AGENT: &'static str = "auth-agent@openssh.com";

    const KNOWN: &'static [&'static str] = &[
        Self::SESSION,
        Self::DIRECT_TCPIP,
        Self::FORWARDED_TCPIP,
        Self::X11,
        Self::AUTH_AGENT,
    ];

    /// The name of the channel type on the wire.
    pub fn name(&self) -> &str {
        match self {
            Self::Session => Self::SESSION,
            Self::DirectTcpip { .. } => Self::DIRECT_TCPIP,
            Self::ForwardedTcpip { .. } => Self::FORWARDED_TCPIP,
            Self::X11 { .. } => Self::X11,
            Self::AuthAgent => Self::AUTH_AGENT,
            Self::Other { name, .. } => name,
        }
    }
}

/// The reason code carried by a [`ChannelOpenFailure`] message.
#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[brw(big)]
pub enum ChannelOpenFailureReason {
    /// `SSH_OPEN_ADMINISTRATIVELY_PROHIBITED`.
    #[brw(magic = 1_u32)]
    AdministrativelyProhibited,

    /// `SSH_OPEN_CONNECT_FAILED`.
    #[brw(magic = 2_u32)]
    ConnectFailed,

    /// `SSH_OPEN_UNKNOWN_CHANNEL_TYPE`.
    #[brw(magic = 3_u32)]
    UnknownChannelType,

    /// `SSH_OPEN_RESOURCE_SHORTAGE`.
    #[brw(magic = 4_u32)]
    ResourceShortage,

    /// A reason code outside of the standard range.
    Other(u32),
}

/// The `SSH_MSG_CHANNEL_OPEN_FAILURE` message.
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big, magic = 92_u8)]
pub struct ChannelOpenFailure {
    /// The channel number given in the original open request.
    pub recipient_channel: u32,

    /// The reason for the failure.
    pub reason: ChannelOpenFailureReason,

    /// Human-readable description of the reason.
    pub description: arch::StringUtf8,

    /// Language tag.
    pub language: arch::StringAscii,
}

/// The `SSH_MSG_CHANNEL_REQUEST` message.
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big, magic = 98_u8)]
pub struct ChannelRequest {
    /// The recipient's channel number.
    pub recipient_channel: u32,

    #[bw(calc = arch::StringAscii::new(context.name()))]
    kind: arch::StringAscii,

    /// Whether the sender expects a reply.
    pub want_reply: arch::Bool,

    /// The request type and its fields.
    #[br(args(&kind))]
    pub context: ChannelRequestContext,
}

/// The type of a channel request and its type-specific fields.
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big)]
#[br(import(kind: &str))]
pub enum ChannelRequestContext {
    /// A `pty-req` request.
    #[br(pre_assert(kind == ChannelRequestContext::PTY))]
    Pty {
        /// `TERM` environment variable value.
        term: arch::StringUtf8,

        /// Terminal width, in characters.
        width_chars: u32,

        /// Terminal height, in rows.
        height_rows: u32,

        /// Terminal width, in pixels.
        width_pixels: u32,

        /// Terminal height, in pixels.
        height_pixels: u32,

        /// Encoded terminal modes.
        modes: arch::Bytes,
    },

    /// A `x11-req` request.
    #[br(pre_assert(kind == ChannelRequestContext::X11))]
    X11 {
        /// Whether only a single connection should be forwarded.
        single_connection: arch::Bool,

        /// X11 authentication protocol.
        x11_authentication_protocol: arch::StringUtf8,

        /// X11 authentication cookie.
        x11_authentication_cookie: arch::StringUtf8,

        /// X11 screen number.
        x11_screen_number: u32,
    },

    /// A `env` request.
    #[br(pre_assert(kind == ChannelRequestContext::ENV))]
    Env {
        /// Variable name.
        name: arch::StringUtf8,

        /// Variable value.
        value: arch::StringUtf8,
    },

    /// A `shell` request.
    #[br(pre_assert(kind == ChannelRequestContext::SHELL))]
    Shell,

    /// A `exec` request.
    #[br(pre_assert(kind == ChannelRequestContext::EXEC))]
    Exec {
        /// The command to execute.
        command: arch::Bytes,
    },

    /// A `subsystem` request.
    #[br(pre_assert(kind == ChannelRequestContext::SUBSYSTEM))]
    Subsystem {
        /// The subsystem name.
        name: arch::StringUtf8,
    },

    /// A `window-change` request.
    #[br(pre_assert(kind == ChannelRequestContext::WINDOW_CHANGE))]
    WindowChange {
        /// Terminal width, in characters.
        width_chars: u32,

        /// Terminal height, in rows.
        height_rows: u32,

        /// Terminal width, in pixels.
        width_pixels: u32,

        /// Terminal height, in pixels.
        height_pixels: u32,
    },

    /// A `xon-xoff` request.
    #[br(pre_assert(kind == ChannelRequestContext::XON_XOFF))]
    XonXoff {
        /// Whether the client can do flow control.
        client_can_do: arch::Bool,
    },

    /// A `signal` request.
    #[br(pre_assert(kind == ChannelRequestContext::SIGNAL))]
    Signal {
        /// Signal name, without the `SIG` prefix.
        name: arch::StringUtf8,
    },

    /// A `exit-status` request.
    #[br(pre_assert(kind == ChannelRequestContext::EXIT_STATUS))]
    ExitStatus {
        /// The exit status of the command.
        code: u32,
    },

    /// A `exit-signal` request.
    #[br(pre_assert(kind == ChannelRequestContext::EXIT_SIGNAL))]
    ExitSignal {
        /// Signal name, without the `SIG` prefix.
        name: arch::StringUtf8,

        /// Whether a core was dumped.
        core_dumped: arch::Bool,

        /// Error message.
        error_message: arch::StringUtf8,

        /// Language tag.
        language: arch::StringAscii,
    },

    /// A `auth-agent-req@openssh.com` request.
    #[br(pre_assert(kind == ChannelRequestContext::AUTH_AGENT))]
    AuthAgent,

    /// A `eow@openssh.com` request.
    #[br(pre_assert(kind == ChannelRequestContext::END_OF_WRITE))]
    EndOfWrite,

    /// Any other request, with its raw data.
    #[br(pre_assert(!ChannelRequestContext::KNOWN.contains(&kind)))]
    Other {
        /// The request name.
        #[br(calc = arch::StringAscii::new(kind))]
        #[bw(ignore)]
        name: arch::StringAscii,

        /// The request-specific data.
        #[br(parse_with = until_eof)]
        data: Vec<u8>,
    },
}

impl ChannelRequestContext {
    const PTY: &'static str = "pty-req";
    const X11: &'static str = "x11-req";
    const ENV: &'static str = "env";
    const SHELL: &'static str = "shell";
    const EXEC: &'static str = "exec";
    const SUBSYSTEM: &'static str = "subsystem";
    const WINDOW_CHANGE: &'static str = "window-change";
    const XON_XOFF: &'static str = "xon-xoff";
    const SIGNAL: &'static str = "signal";
    const EXIT_STATUS: &'static str = "exit-status";
    const EXIT_SIGNAL: &'static str = "exit-signal";
    const AUTH_AGENT: &'static str = "auth-agent-req@openssh.com";
    const END_OF_WRITE: &'static str = "eow@openssh.com";

    const KNOWN: &'static [&'static str] = &[
        Self::PTY,
        Self::X11,
        Self::ENV,
        Self::SHELL,
        Self::EXEC,
        Self::SUBSYSTEM,
        Self::WINDOW_CHANGE,
        Self::XON_XOFF,
        Self::SIGNAL,
        Self::EXIT_STATUS,
        Self::EXIT_SIGNAL,
        Self::AUTH_AGENT,
        Self::END_OF_WRITE,
    ];

    /// The name of the request on the wire.
    pub fn name(&self) -> &str {
        match self {
            Self::Pty { .. } => Self::PTY,
            Self::X11 { .. } => Self::X11,
            Self::Env { .. } => Self::ENV,
            Self::Shell => Self::SHELL,
            Self::Exec { .. } => Self::EXEC,
            Self::Subsystem { .. } => Self::SUBSYSTEM,
            Self::WindowChange { .. } => Self::WINDOW_CHANGE,
            Self::XonXoff { .. } => Self::XON_XOFF,
            Self::Signal { .. } => Self::SIGNAL,
            Self::ExitStatus { .. } => Self::EXIT_STATUS,
            Self::ExitSignal { .. } => Self::EXIT_SIGNAL,
            Self::AuthAgent => Self::AUTH_AGENT,
            Self::EndOfWrite => Self::END_OF_WRITE,
            Self::Other { name, .. } => name,
        }
    }
}
