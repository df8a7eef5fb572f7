//! Messages of the authentication protocol (RFC 4252).

use binrw::binrw;

use super::{arch, Packet};
use crate::Result;

#[doc(no_inline)]
pub use ssh_packet::userauth::{
    AuthBanner, AuthFailure, AuthMethod, AuthPkOk, AuthRequest, AuthSuccess,
};

/// The leading fields of a `SSH_MSG_USERAUTH_REQUEST`, readable whatever the method.
///
/// [`AuthRequest`] only parses the methods it knows of, this allows
/// to answer the other ones with a failure.
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big, magic = 50_u8)]
pub struct AuthRequestHeader {
    /// User name to authenticate as.
    pub username: arch::StringUtf8,

    /// Service to start after authentication.
    pub service_name: arch::StringAscii,

    /// The name of the method.
    pub method: arch::StringAscii,
}

/// The data signed by the private key in a `publickey` request, over the session identifier.
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big)]
pub struct PublickeySignedData {
    /// The session identifier.
    pub session_id: arch::Bytes,

    /// User name to authenticate as.
    #[brw(magic = 50_u8)]
    pub username: arch::StringUtf8,

    /// Service to start after authentication.
    pub service_name: arch::StringAscii,

    #[bw(calc = arch::StringAscii::new("publickey"))]
    method: arch::StringAscii,

    #[bw(calc = arch::Bool::from(true))]
    signed: arch::Bool,

    /// The public key algorithm name.
    pub algorithm: arch::Bytes,

    /// The public key blob.
    pub blob: arch::Bytes,
}

impl PublickeySignedData {
    /// The data to be signed for the `publickey` `request`, `None` for the other methods.
    pub fn new(session_id: &[u8], request: &AuthRequest) -> Option<Self> {
        match &request.method {
            AuthMethod::Publickey {
                algorithm, blob, ..
            } => Some(Self {
                session_id: session_id.to_vec().into(),
                username: request.username.clone(),
                service_name: request.service_name.clone(),
                algorithm: algorithm.clone(),
                blob: blob.clone(),
            }),
            _ => None,
        }
    }

    /// Serialize the data, ready to be signed or verified.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(Packet::write(self)?.payload)
    }
}
