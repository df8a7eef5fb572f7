//! Server-[`Side`] implementation of the _session_.

use std::time::Duration;

use rand::RngCore;
use ssh_packet::SshId;

use super::{Rekey, Side};
use crate::{
    algorithm::{key, Cipher, Compress, Hmac, Kex},
    msg::{arch::NameList, trans::KexInit},
};

#[doc(no_inline)]
pub use ssh_key::PrivateKey;

/// A _server_-side session configuration.
#[derive(Debug, Clone)]
pub struct Server {
    /// [`SshId`] for this _server_ session.
    pub id: SshId,

    /// Timeout for sending and receiving packets.
    pub timeout: Duration,

    /// Thresholds triggering a re-key.
    pub rekey: Rekey,

    /// Whether to advertise `ext-info-s` and strict key-exchange.
    pub extensions: bool,

    /// Lines sent to the client before the identification.
    pub greeting: Vec<String>,

    /// Server keys for key-exchange signature.
    pub keys: Vec<PrivateKey>,

    /// The algorithms enabled for this _server_ session.
    pub algorithms: Algorithms,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            id: SshId::v2(
                concat!(
                    env!("CARGO_PKG_NAME"),
                    "@server:",
                    env!("CARGO_PKG_VERSION")
                ),
                None::<&str>,
            ),
            timeout: Duration::from_secs(120),
            rekey: Default::default(),
            extensions: true,
            greeting: Default::default(),
            keys: Default::default(),
            algorithms: Default::default(),
        }
    }
}

/// Algorithms for a _server_-side session.
#[derive(Debug, Clone)]
pub struct Algorithms {
    /// Enabled algorithms for _key-exchange_.
    pub kexs: Vec<Kex>,

    /// Enabled algorithms for _encryption & decryption_.
    pub ciphers: Vec<Cipher>,

    /// Enabled algorithms for _hmac_.
    pub macs: Vec<Hmac>,

    /// Enabled algorithms for _compression_.
    pub compressions: Vec<Compress>,
}

impl Default for Algorithms {
    fn default() -> Self {
        Self {
            kexs: vec![
                Kex::Curve25519Sha256,
                Kex::Curve25519Sha256Libssh,
                Kex::EcdhSha2Nistp256,
                Kex::EcdhSha2Nistp384,
                Kex::DiffieHellmanGroupExchangeSha256,
                Kex::DiffieHellmanGroup16Sha512,
                Kex::DiffieHellmanGroup14Sha256,
                Kex::DiffieHellmanGroup14Sha1,
                Kex::DiffieHellmanGroupExchangeSha1,
                Kex::DiffieHellmanGroup1Sha1,
            ],
            ciphers: vec![
                Cipher::ChaCha20Poly1305,
                Cipher::Aes256Gcm,
                Cipher::Aes128Gcm,
                Cipher::Aes256Ctr,
                Cipher::Aes192Ctr,
                Cipher::Aes128Ctr,
                Cipher::Aes256Cbc,
                Cipher::Aes192Cbc,
                Cipher::Aes128Cbc,
                Cipher::TDesCbc,
            ],
            macs: vec![
                Hmac::HmacSha512ETM,
                Hmac::HmacSha256ETM,
                Hmac::HmacSha512,
                Hmac::HmacSha256,
                Hmac::HmacSha1ETM,
                Hmac::HmacSha1,
                Hmac::HmacMd5ETM,
                Hmac::HmacMd5,
            ],
            compressions: vec![Compress::None, Compress::ZlibOpenssh, Compress::Zlib],
        }
    }
}

impl Side for Server {
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
            server_host_key_algorithms: NameList::new(
                &self.keys.iter().map(key::advertised).collect::<Vec<_>>(),
            ),
            encryption_algorithms_client_to_server: NameList::new(&self.algorithms.ciphers),
            encryption_algorithms_server_to_client: NameList::new(&self.algorithms.ciphers),
            mac_algorithms_client_to_server: NameList::new(&self.algorithms.macs),
            mac_algorithms_server_to_client: NameList::new(&self.algorithms.macs),
            compression_algorithms_client_to_server: NameList::new(&self.algorithms.compressions),
            compression_algorithms_server_to_client: NameList::new(&self.algorithms.compressions),
            languages_client_to_server: NameList::default(),
            languages_server_to_client: NameList::default(),
            first_kex_packet_follows: false.into(),
        }
    }
}
