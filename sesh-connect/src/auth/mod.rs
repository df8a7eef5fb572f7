//! The authentication protocol, run before the connection protocol.

use bitflags::bitflags;
use sesh::side::{client::Client, server::Server};

pub mod client;
pub mod server;

const SERVICE_NAME: &str = "ssh-userauth";
const CONNECTION_SERVICE_NAME: &str = "ssh-connection";

/// Set of authentication methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Methods(u8);

bitflags! {
   impl Methods: u8 {
        /// The SSH `none` authentication method.
        const NONE = 1 << 0;

        /// The SSH `publickey` authentication method.
        const PUBLICKEY = 1 << 1;

        /// The SSH `password` authentication method.
        const PASSWORD = 1 << 2;
    }
}

impl Methods {
    /// The names of the methods on the wire, `none` excluded.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        [(Self::PUBLICKEY, "publickey"), (Self::PASSWORD, "password")]
            .into_iter()
            .filter(|(method, _)| self.contains(*method))
            .map(|(_, name)| name)
    }
}

impl Default for Methods {
    fn default() -> Self {
        Self::NONE
    }
}

pub(crate) mod private {
    use sesh::{msg::Packet, Session};

    use crate::{Event, Result};

    /// The side-specific procedure of the authentication.
    pub trait Authenticator<S: sesh::side::Side>: std::fmt::Debug + Send {
        /// Start the procedure, once the transport is ready.
        fn start(&mut self, session: &mut Session<S>) -> Result<()>;

        /// Process a message of the authentication protocol.
        fn handle(&mut self, session: &mut Session<S>, packet: &Packet) -> Result<Option<Event>>;

        /// Whether the procedure succeeded.
        fn is_authenticated(&self) -> bool;
    }

    pub trait Sealed: sesh::side::Side + Sized {
        type Auth: Authenticator<Self>;
    }
}

/// A [`sesh::side::Side`] that can run the authentication protocol.
pub trait Side: private::Sealed {}

impl private::Sealed for Client {
    type Auth = client::Auth;
}

impl private::Sealed for Server {
    type Auth = server::Auth;
}

impl<S: private::Sealed> Side for S {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_exclude_none() {
        let methods = Methods::NONE | Methods::PASSWORD | Methods::PUBLICKEY;

        assert_eq!(
            methods.names().collect::<Vec<_>>(),
            ["publickey", "password"]
        );
        assert_eq!(Methods::default().names().count(), 0);
    }
}
