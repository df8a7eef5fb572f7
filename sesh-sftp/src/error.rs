use thiserror::Error;

use crate::msg::StatusCode;

/// The error types that can occur when manipulating this crate.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed frame contents.
    #[error(transparent)]
    Binary(#[from] binrw::Error),

    /// Error on the channel carrying the subsystem.
    #[error(transparent)]
    Connect(#[from] sesh_connect::Error),

    /// The peer sent a frame larger than the accepted maximum.
    #[error("Frame length `{0}` exceeds the maximum")]
    FrameTooLarge(u32),

    /// The peer sent a frame without any message.
    #[error("Empty frame")]
    EmptyFrame,

    /// The peer speaks an unsupported protocol version.
    #[error("Unsupported protocol version `{0}`")]
    Version(u32),

    /// The peer sent a message that is out of place.
    #[error("Unexpected message of type `{0}`")]
    UnexpectedMessage(u8),

    /// The peer answered a request with a reply of the wrong kind.
    #[error("Unexpected reply to the request")]
    UnexpectedReply,

    /// The server answered a read with an empty chunk, which would never progress.
    #[error("Empty data in the reply to a read")]
    EmptyRead,

    /// The extension has not been advertised by the server.
    #[error("The `{0}` extension is not supported by the server")]
    Unsupported(&'static str),

    /// The peer failed the request with a status.
    #[error("{code:?}: {message}")]
    Status {
        /// The status code.
        code: StatusCode,

        /// The human-readable message sent by the peer.
        message: String,
    },

    /// The peer never answered, since the subsystem has been torn down.
    #[error("No response from peer")]
    NoResponse,
}

/// A handy [`std::result::Result`] type alias bounding the [`enum@Error`] struct as `E`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
