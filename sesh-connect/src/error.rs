use sesh::msg::{connect::ChannelOpenFailureReason, trans::DisconnectReason};
use thiserror::Error;

/// The error types that can occur when manipulating this crate.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// Transport error.
    #[error(transparent)]
    Transport(#[from] sesh::Error),

    /// The channel has been closed.
    #[error("The channel has been closed")]
    ChannelClosed,

    /// The channel is not known to the multiplexer.
    #[error("Unknown channel `{0}`")]
    UnknownChannel(u32),

    /// The peer sent more data than the window it was granted.
    #[error("The peer exceeded the window of channel `{0}`")]
    WindowExceeded(u32),

    /// The peer refused to open the channel.
    #[error("The channel open was refused ({reason:?}): {description}")]
    OpenFailure {
        /// The reason of the refusal.
        reason: ChannelOpenFailureReason,

        /// The human-readable description sent by the peer.
        description: String,
    },

    /// The operation requires an authenticated session.
    #[error("The session is not authenticated")]
    Unauthenticated,

    /// Every authentication method was attempted and refused.
    #[error("Authentication methods exhausted")]
    AuthExhausted,

    /// The peer sent a message that is out of place in the connection protocol.
    #[error("Unexpected message of type `{0}` in the connection protocol")]
    UnexpectedMessage(u8),

    /// The peer never answered, since the session has been torn down.
    #[error("No response from peer")]
    NoResponse,

    /// I/O timed out while waiting for the peer.
    #[error("Timed out while waiting for the peer")]
    Timeout,
}

impl Error {
    /// The reason to disconnect with when this error is fatal to the session.
    pub fn reason(&self) -> DisconnectReason {
        match self {
            Self::Transport(err) => err.reason(),
            Self::AuthExhausted => DisconnectReason::NoMoreAuthMethodsAvailable,
            Self::Unauthenticated | Self::UnknownChannel(_) | Self::WindowExceeded(_) => {
                DisconnectReason::ProtocolError
            }
            Self::UnexpectedMessage(_) => DisconnectReason::ProtocolError,
            _ => DisconnectReason::ByApplication,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Transport(value.into())
    }
}

/// A handy [`std::result::Result`] type alias bounding the [`enum@Error`] struct as `E`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
