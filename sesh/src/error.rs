use thiserror::Error;

use crate::msg::trans::DisconnectReason;

/// The error types that can occur when manipulating this crate.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// I/O Error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// SSH Key error.
    #[error(transparent)]
    Key(#[from] ssh_key::Error),

    /// Packet integrity error.
    #[error(transparent)]
    Integrity(#[from] digest::MacError),

    /// Binary (de)serialization error.
    #[error(transparent)]
    Binary(#[from] binrw::Error),

    /// Signature error during the key-exchange.
    #[error(transparent)]
    Signature(#[from] signature::Error),

    /// Error while encrypting or decrypting messages.
    #[error("The cipher ended up in an error")]
    Cipher,

    /// The compression stream ended up in an error.
    #[error("The compression stream ended up in an error")]
    Compression,

    /// A message or a field of a message could not be parsed.
    #[error("Malformed message: {0}")]
    Malformed(&'static str),

    /// The identification line of the peer was unparseable or out of bounds.
    #[error("Invalid identification from peer: {0}")]
    Identification(&'static str),

    /// The packet length is out of the bounds accepted by the codec.
    #[error("Packet length `{0}` is out of bounds")]
    PacketLength(u32),

    /// The padding length of a packet is out of bounds.
    #[error("Packet padding is out of bounds")]
    Padding,

    /// No common kex algorithm found between both sides.
    #[error("Unable to negotiate a common kex algorithm")]
    NoCommonKex,

    /// No common key algorithm found between both sides.
    #[error("Unable to negotiate a common host key algorithm")]
    NoCommonKey,

    /// No common cipher algorithm found between both sides.
    #[error("Unable to negotiate a common encryption algorithm")]
    NoCommonCipher,

    /// No common hmac algorithm found between both sides.
    #[error("Unable to negotiate a common HMAC algorithm")]
    NoCommonHmac,

    /// No common compression algorithm found between both sides.
    #[error("Unable to negotiate a common compression algorithm")]
    NoCommonCompression,

    /// Provided algorithm wasn't supported.
    #[error("Algorithm is unsupported")]
    UnsupportedAlgorithm,

    /// Protocol error in the key-exchange.
    #[error("Error in the kex-exchange algorithm")]
    KexError,

    /// The host key of the peer has been rejected by the verifier.
    #[error("The host key of the peer has been rejected")]
    HostKeyRejected,

    /// A message was received where it was not expected.
    #[error("Unexpected message of type `{0}`")]
    UnexpectedMessage(u8),

    /// A non key-exchange message was received during a strict initial key-exchange.
    #[error("Unexpected message of type `{0}` during the strict key-exchange")]
    StrictKex(u8),

    /// The requested service is unknown.
    #[error("The requested service is unknown")]
    UnknownService,

    /// The session has been disconnected.
    #[error("The session has been disconnected: {0:?}")]
    Disconnected(DisconnectReason),

    /// The peer never answered, since the session has been torn down.
    #[error("No response from peer")]
    NoResponse,
}

impl Error {
    /// The standardized reason to send to the peer when this error is fatal to the session.
    pub fn reason(&self) -> DisconnectReason {
        match self {
            Self::Integrity(_) => DisconnectReason::MacError,
            Self::Key(_)
            | Self::Signature(_)
            | Self::NoCommonKex
            | Self::NoCommonKey
            | Self::NoCommonCipher
            | Self::NoCommonHmac
            | Self::NoCommonCompression
            | Self::UnsupportedAlgorithm
            | Self::KexError => DisconnectReason::KeyExchangeFailed,
            Self::HostKeyRejected => DisconnectReason::HostKeyNotVerifiable,
            Self::Identification(_) => DisconnectReason::ProtocolVersionNotSupported,
            Self::Cipher
            | Self::Binary(_)
            | Self::Malformed(_)
            | Self::PacketLength(_)
            | Self::Padding
            | Self::UnexpectedMessage(_)
            | Self::StrictKex(_) => DisconnectReason::ProtocolError,
            Self::Compression => DisconnectReason::CompressionError,
            Self::UnknownService => DisconnectReason::ServiceNotAvailable,
            Self::Io(_) | Self::NoResponse => DisconnectReason::ConnectionLost,
            Self::Disconnected(reason) => *reason,
        }
    }
}

/// A handy [`std::result::Result`] type alias bounding the [`enum@Error`] struct as `E`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
