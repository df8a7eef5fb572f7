use ssh_key::PublicKey;

use crate::{
    algorithm::{Cipher, Compress, Hmac, Kex, Key, Negociate},
    msg::trans::KexInit,
    side::{client::Client, server::Server, Side},
    stream::Transport,
    Result,
};

/// Pseudo-algorithm advertising the client supports `SSH_MSG_EXT_INFO`.
pub(super) const EXT_INFO_C: &str = "ext-info-c";

/// Pseudo-algorithm advertising the server supports `SSH_MSG_EXT_INFO`.
pub(super) const EXT_INFO_S: &str = "ext-info-s";

/// Pseudo-algorithm advertising the client supports the strict key-exchange.
pub(super) const KEX_STRICT_C: &str = "kex-strict-c-v00@openssh.com";

/// Pseudo-algorithm advertising the server supports the strict key-exchange.
pub(super) const KEX_STRICT_S: &str = "kex-strict-s-v00@openssh.com";

/// The algorithms protecting a direction of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suite {
    /// The negotiated cipher.
    pub cipher: Cipher,

    /// The negotiated MAC, always [`Hmac::None`] with an AEAD cipher.
    pub hmac: Hmac,

    /// The negotiated compression.
    pub compress: Compress,
}

/// The algorithms negotiated by a key-exchange, immutable until the next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    /// The key-exchange method.
    pub kex: Kex,

    /// The server host key algorithm.
    pub key: Key,

    /// The algorithms protecting the client to server direction.
    pub client_to_server: Suite,

    /// The algorithms protecting the server to client direction.
    pub server_to_client: Suite,
}

impl Negotiated {
    /// Negotiate each category, the client being the initiator whose preference wins.
    pub fn negotiate(client: &KexInit, server: &KexInit) -> Result<Self> {
        let kex = Kex::negociate(client, server)?;
        let key = Key::negociate(client, server)?;

        let client_to_server = {
            let cipher = <Cipher as Negociate<Client>>::negociate(client, server)?;
            let hmac = if cipher.is_aead() {
                Hmac::None
            } else {
                <Hmac as Negociate<Client>>::negociate(client, server)?
            };

            Suite {
                cipher,
                hmac,
                compress: <Compress as Negociate<Client>>::negociate(client, server)?,
            }
        };
        let server_to_client = {
            let cipher = <Cipher as Negociate<Server>>::negociate(client, server)?;
            let hmac = if cipher.is_aead() {
                Hmac::None
            } else {
                <Hmac as Negociate<Server>>::negociate(client, server)?
            };

            Suite {
                cipher,
                hmac,
                compress: <Compress as Negociate<Server>>::negociate(client, server)?,
            }
        };

        Ok(Self {
            kex,
            key,
            client_to_server,
            server_to_client,
        })
    }

    /// Whether the peer's guessed key-exchange packet was built on wrong assumptions.
    pub fn guessed_wrong(&self, peer: &KexInit) -> bool {
        peer.kex_algorithms.into_iter().next() != Some(self.kex.as_ref())
            || peer.server_host_key_algorithms.into_iter().next() != Some(self.key.as_str())
    }
}

/// The keys derived from an exchange, waiting to be installed.
#[derive(Debug)]
pub(super) struct Derived {
    pub tx: Option<Transport>,
    pub rx: Option<Transport>,
}

/// The progress of a key-exchange.
pub(super) enum Stage<S: Side> {
    /// Waiting for the peer's `SSH_MSG_KEXINIT`.
    Negotiating,

    /// Running the key-exchange method.
    Exchanging(S::Exchange),

    /// Waiting for a deferred decision on the host key.
    Verifying(PublicKey),

    /// Keys are derived, waiting for both `SSH_MSG_NEWKEYS`.
    Switching,
}

/// The state of a running key-exchange.
pub(super) struct Handshake<S: Side> {
    /// Our own `SSH_MSG_KEXINIT`, and its payload.
    pub kexinit: KexInit,
    pub own: Vec<u8>,

    /// The peer's `SSH_MSG_KEXINIT` payload, once received.
    pub peer: Option<Vec<u8>>,

    pub negotiated: Option<Negotiated>,
    pub stage: Stage<S>,
    pub derived: Option<Derived>,

    /// Whether we sent our `SSH_MSG_NEWKEYS`.
    pub sent: bool,

    /// Whether we received the peer's `SSH_MSG_NEWKEYS`.
    pub received: bool,
}

impl<S: Side> Handshake<S> {
    pub fn new(kexinit: KexInit, own: Vec<u8>) -> Self {
        Self {
            kexinit,
            own,
            peer: None,
            negotiated: None,
            stage: Stage::Negotiating,
            derived: None,
            sent: false,
            received: false,
        }
    }

    /// Whether the peer is in the middle of the exchange, restricting what it may send.
    pub fn peer_exchanging(&self) -> bool {
        self.peer.is_some() && !self.received
    }

    pub fn is_complete(&self) -> bool {
        self.sent && self.received
    }
}

impl<S: Side> std::fmt::Debug for Handshake<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stage = match &self.stage {
            Stage::Negotiating => "negotiating",
            Stage::Exchanging(_) => "exchanging",
            Stage::Verifying(_) => "verifying",
            Stage::Switching => "switching",
        };

        f.debug_struct("Handshake")
            .field("stage", &stage)
            .field("negotiated", &self.negotiated)
            .field("sent", &self.sent)
            .field("received", &self.received)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{msg::arch::NameList, side::Side};

    #[test]
    fn initiator_preference_wins() {
        let mut client = Client::default().kexinit();
        let mut server = Server::default().kexinit();

        client.kex_algorithms = NameList::new(&["ecdh-sha2-nistp256", "curve25519-sha256"]);
        server.kex_algorithms = NameList::new(&["curve25519-sha256", "ecdh-sha2-nistp256"]);
        server.server_host_key_algorithms = NameList::new(&["ssh-ed25519"]);

        let negotiated = Negotiated::negotiate(&client, &server).unwrap();

        assert_eq!(negotiated.kex, Kex::EcdhSha2Nistp256);
        assert_eq!(negotiated.key, Key::Ed25519);
    }

    #[test]
    fn aead_cipher_implies_no_mac() {
        let mut client = Client::default().kexinit();
        let mut server = Server::default().kexinit();

        server.server_host_key_algorithms = NameList::new(&["ssh-ed25519"]);
        client.encryption_algorithms_client_to_server = NameList::new(&["aes128-gcm@openssh.com"]);
        client.encryption_algorithms_server_to_client = NameList::new(&["aes128-ctr"]);
        client.mac_algorithms_client_to_server = NameList::default();

        let negotiated = Negotiated::negotiate(&client, &server).unwrap();

        assert_eq!(negotiated.client_to_server.cipher, Cipher::Aes128Gcm);
        assert_eq!(negotiated.client_to_server.hmac, Hmac::None);
        assert_eq!(negotiated.server_to_client.cipher, Cipher::Aes128Ctr);
        assert_eq!(negotiated.server_to_client.hmac, Hmac::HmacSha512ETM);
    }

    #[test]
    fn missing_category_is_named() {
        let client = Client::default().kexinit();
        let mut server = Server::default().kexinit();

        server.server_host_key_algorithms = NameList::new(&["ssh-ed25519"]);
        server.encryption_algorithms_server_to_client = NameList::new(&["aes256-ctr"]);
        server.mac_algorithms_server_to_client = NameList::new(&["hmac-ripemd160"]);

        assert!(matches!(
            Negotiated::negotiate(&client, &server),
            Err(crate::Error::NoCommonHmac)
        ));

        server.mac_algorithms_server_to_client = NameList::new(&["hmac-sha2-256"]);
        server.kex_algorithms = NameList::new(&["sntrup761x25519-sha512@openssh.com"]);

        assert!(matches!(
            Negotiated::negotiate(&client, &server),
            Err(crate::Error::NoCommonKex)
        ));
    }
}
