//! Messages of the transport layer protocol (RFC 4253), with its extensions.

use binrw::binrw;

use super::arch;

#[doc(no_inline)]
pub use ssh_packet::trans::{
    Debug, Ignore, KexEcdhInit, KexEcdhReply, KexInit, KexdhInit, KexdhReply, NewKeys,
    ServiceAccept, ServiceRequest, Unimplemented,
};

/// The reason code carried by a [`Disconnect`] message.
#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[brw(big)]
pub enum DisconnectReason {
    /// `SSH_DISCONNECT_HOST_NOT_ALLOWED_TO_CONNECT`.
    #[brw(magic = 1_u32)]
    HostNotAllowedToConnect,

    /// `SSH_DISCONNECT_PROTOCOL_ERROR`.
    #[brw(magic = 2_u32)]
    ProtocolError,

    /// `SSH_DISCONNECT_KEY_EXCHANGE_FAILED`.
    #[brw(magic = 3_u32)]
    KeyExchangeFailed,

    /// `SSH_DISCONNECT_RESERVED`.
    #[brw(magic = 4_u32)]
    Reserved,

    /// `SSH_DISCONNECT_MAC_ERROR`.
    #[brw(magic = 5_u32)]
    MacError,

    /// `SSH_DISCONNECT_COMPRESSION_ERROR`.
    #[brw(magic = 6_u32)]
    CompressionError,

    /// `SSH_DISCONNECT_SERVICE_NOT_AVAILABLE`.
    #[brw(magic = 7_u32)]
    ServiceNotAvailable,

    /// `SSH_DISCONNECT_PROTOCOL_VERSION_NOT_SUPPORTED`.
    #[brw(magic = 8_u32)]
    ProtocolVersionNotSupported,

    /// `SSH_DISCONNECT_HOST_KEY_NOT_VERIFIABLE`.
    #[brw(magic = 9_u32)]
    HostKeyNotVerifiable,

    /// `SSH_DISCONNECT_CONNECTION_LOST`.
    #[brw(magic = 10_u32)]
    ConnectionLost,

    /// `SSH_DISCONNECT_BY_APPLICATION`.
    #[brw(magic = 11_u32)]
    ByApplication,

    /// `SSH_DISCONNECT_TOO_MANY_CONNECTIONS`.
    #[brw(magic = 12_u32)]
    TooManyConnections,

    /// `SSH_DISCONNECT_AUTH_CANCELLED_BY_USER`.
    #[brw(magic = 13_u32)]
    AuthCancelledByUser,

    /// `SSH_DISCONNECT_NO_MORE_AUTH_METHODS_AVAILABLE`.
    #[brw(magic = 14_u32)]
    NoMoreAuthMethodsAvailable,

    /// `SSH_DISCONNECT_ILLEGAL_USER_NAME`.
    #[brw(magic = 15_u32)]
    IllegalUserName,

    /// A reason code outside of the standard range.
    Other(u32),
}

impl From<u32> for DisconnectReason {
    fn from(code: u32) -> Self {
        match code {
            1 => Self::HostNotAllowedToConnect,
            2 => Self::ProtocolError,
            3 => Self::KeyExchangeFailed,
            4 => Self::Reserved,
            5 => Self::MacError,
            6 => Self::CompressionError,
            7 => Self::ServiceNotAvailable,
            8 => Self::ProtocolVersionNotSupported,
            9 => Self::HostKeyNotVerifiable,
            10 => Self::ConnectionLost,
            11 => Self::ByApplication,
            12 => Self::TooManyConnections,
            13 => Self::AuthCancelledByUser,
            14 => Self::NoMoreAuthMethodsAvailable,
            15 => Self::IllegalUserName,
            other => Self::Other(other),
        }
    }
}

impl From<DisconnectReason> for u32 {
    fn from(reason: DisconnectReason) -> Self {
        match reason {
            DisconnectReason::HostNotAllowedToConnect => 1,
            DisconnectReason::ProtocolError => 2,
            DisconnectReason::KeyExchangeFailed => 3,
            DisconnectReason::Reserved => 4,
            DisconnectReason::MacError => 5,
            DisconnectReason::CompressionError => 6,
            DisconnectReason::ServiceNotAvailable => 7,
            DisconnectReason::ProtocolVersionNotSupported => 8,
            DisconnectReason::HostKeyNotVerifiable => 9,
            DisconnectReason::ConnectionLost => 10,
            DisconnectReason::ByApplication => 11,
            DisconnectReason::TooManyConnections => 12,
            DisconnectReason::AuthCancelledByUser => 13,
            DisconnectReason::NoMoreAuthMethodsAvailable => 14,
            DisconnectReason::IllegalUserName => 15,
            DisconnectReason::Other(code) => code,
        }
    }
}

/// The `SSH_MSG_DISCONNECT` message.
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big, magic = 1_u8)]
pub struct Disconnect {
    /// Reason for disconnection.
    pub reason: DisconnectReason,

    /// Human-readable description of the reason.
    pub description: arch::StringUtf8,

    /// Language tag.
    pub language: arch::StringAscii,
}

/// The `SSH_MSG_EXT_INFO` message (RFC 8308).
#[binrw]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[brw(big, magic = 7_u8)]
pub struct ExtInfo {
    #[bw(calc = extensions.len() as u32)]
    count: u32,

    /// Extensions as name and value pairs.
    #[br(count = count)]
    pub extensions: Vec<Extension>,
}

/// A single extension of an [`ExtInfo`] message.
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big)]
pub struct Extension {
    /// The extension name.
    pub name: arch::StringAscii,

    /// The extension value.
    pub value: arch::Bytes,
}

/// The `SSH_MSG_KEX_DH_GEX_REQUEST` message (RFC 4419).
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big, magic = 34_u8)]
pub struct KexGexRequest {
    /// Minimal size in bits of an acceptable group.
    pub min: u32,

    /// Preferred size in bits of the group.
    pub n: u32,

    /// Maximal size in bits of an acceptable group.
    pub max: u32,
}

/// The `SSH_MSG_KEX_DH_GEX_GROUP` message (RFC 4419).
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big, magic = 31_u8)]
pub struct KexGexGroup {
    /// Safe prime.
    pub p: arch::MpInt,

    /// Generator for the subgroup.
    pub g: arch::MpInt,
}

/// The `SSH_MSG_KEX_DH_GEX_INIT` message (RFC 4419).
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big, magic = 32_u8)]
pub struct KexGexInit {
    /// Client's public value.
    pub e: arch::MpInt,
}

/// The `SSH_MSG_KEX_DH_GEX_REPLY` message (RFC 4419).
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big, magic = 33_u8)]
pub struct KexGexReply {
    /// Server's public host key.
    pub k_s: arch::Bytes,

    /// Server's public value.
    pub f: arch::MpInt,

    /// Signature of the exchange hash.
    pub signature: arch::Bytes,
}
