//! Client-[`Side`] implementation of the _session_.

use std::{fmt, sync::Arc, time::Duration};

use rand::RngCore;
use ssh_packet::SshId;
use ssh_key::PublicKey;

use super::{Rekey, Side};
use crate::{
    algorithm::{Cipher, Compress, Hmac, Kex, Key},
    msg::{arch::NameList, trans::KexInit},
};

/// The decision of a [`HostVerifier`] about the server's host key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Trust the key and carry on with the key-exchange.
    Accept,

    /// Refuse the key, tearing the session down.
    Reject,

    /// Suspend the installation of the new keys until
    /// [`Session::verify_host`](crate::session::Session::verify_host) is called.
    Defer,
}

/// A capability to verify the server's host key during the key-exchange.
pub trait HostVerifier: Send + Sync {
    /// Decide whether `key` is trusted to be the server's host key.
    fn verify(&self, key: &PublicKey) -> Verdict;
}

impl<F: Fn(&PublicKey) -> Verdict + Send + Sync> HostVerifier for F {
    fn verify(&self, key: &PublicKey) -> Verdict {
        (self)(key)
    }
}

/// A _client_-side session configuration.
#[derive(Clone)]
pub struct Client {
    /// [`SshId`] for this _client_ session.
    pub id: SshId,

    /// Timeout for sending and receiving packets.
    pub timeout: Duration,

    /// Thresholds triggering a re-key.
    pub rekey: Rekey,

    /// Whether to advertise `ext-info-c` and strict key-exchange.
    pub extensions: bool,

    /// The algorithms enabled for this _client_ session.
    pub algorithms: Algorithms,

    /// The verifier deciding whether to trust the server's host key.
    pub verifier: Arc<dyn HostVerifier>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .field("rekey", &self.rekey)
            .field("extensions", &self.extensions)
            .field("algorithms", &self.algorithms)
            .finish_non_exhaustive()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self {
            id: SshId::v2(
                concat!(
                    env!("CARGO_PKG_NAME"),
                    "@client:",
                    env!("CARGO_PKG_VERSION")
                ),
                None::<&str>,
            ),
            timeout: Duration::from_secs(120),
            rekey: Default::default(),
            extensions: true,
            algorithms: Default::default(),
            verifier: Arc::new(|_: &PublicKey| Verdict::Accept),
        }
    }
}

/// Algorithms for a _client_-side session.
#[derive(Debug, Clone)]
pub struct Algorithms {
    /// Enabled algorithms for _key-exchange_.
    pub kexs: Vec<Kex>,

    /// Enabled algorithms for _server key signature_.
    pub keys: Vec<Key>,

    /// Enabled algorithms for _encryption & decryption_.
    pub ciphers: Vec<Cipher>,

    /// Enabled algorithms for _hmac_.
    pub macs: Vec<Hmac>,

    /// Enabled algorithms for _compression_.
    pub compressions: Vec<Compress>,
}

impl Default for Algorithms {
    fn default() -> Self {
        let super::server::Algorithms {
            kexs,
            ciphers,
            macs,
            compressions,
        } = Default::default();

        Self {
            kexs,
            keys: vec![
                Key::Ed25519,
                Key::Ecdsa {
                    curve: ssh_key::EcdsaCurve::NistP384,
                },
                Key::Ecdsa {
                    curve: ssh_key::EcdsaCurve::NistP256,
                },
                Key::Rsa {
                    hash: Some(ssh_key::HashAlg::Sha512),
                },
                Key::Rsa {
                    hash: Some(ssh_key::HashAlg::Sha256),
                },
                Key::Dsa,
            ],
            ciphers,
            macs,
            compressions,
        }
    }
}

impl Side for Client {
    fn id(&self) -> &SshId {
        &self.id
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn rekey(&self) -> Rekey {
        self.rekey
    }

    fn extensions(&self) -> bool {
        self.extensions
    }

    fn kexinit(&self) -> KexInit {
        let mut cookie = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut cookie);

        KexInit {
            cookie,
            kex_algorithms: NameList::new(&self.algorithms.kexs),
            server_host_key_algorithms: NameList::new(&self.algorithms.keys),
            encryption_algorithms_client_to_server: NameList::new(&self.algorithms.ciphers),
            encryption_algorithms_server_to_client: NameList::new(&self.algorithms.ciphers),
            mac_algorithms_client_to_server: NameList::new(&self.algorithms.macs),
            mac_algorithms_server_to_client: NameList::new(&self.algorithms.macs),
            compression_algorithms_client_to_server: NameList::new(&self.algorithms.compressions),
            compression_algorithms_server_to_client: NameList::new(&self.algorithms.compressions),
            languages_client_to_server: Default::default(),
            languages_server_to_client: Default::default(),
            first_kex_packet_follows: false.into(),
        }
    }
}
