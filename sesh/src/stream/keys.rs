use secrecy::SecretBox;

use crate::algorithm::{Cipher, HashAlg, Hmac};

/// Keying material for a single direction of the transport.
#[derive(Debug, Default)]
pub(crate) struct Keys {
    /// Cipher _initialization vector_.
    pub iv: SecretBox<Vec<u8>>,

    /// Cipher _key_.
    pub key: SecretBox<Vec<u8>>,

    /// Hmac _key_.
    pub hmac: SecretBox<Vec<u8>>,
}

impl Keys {
    /// Derive the keys for the client to server direction.
    pub fn as_client(
        alg: HashAlg,
        secret: &[u8],
        hash: &[u8],
        session_id: &[u8],
        cipher: &Cipher,
        hmac: &Hmac,
    ) -> Self {
        Self {
            iv: Self::derive(alg, secret, hash, b'A', session_id, cipher.iv_size()),
            key: Self::derive(alg, secret, hash, b'C', session_id, cipher.key_size()),
            hmac: Self::derive(alg, secret, hash, b'E', session_id, hmac.size()),
        }
    }

    /// Derive the keys for the server to client direction.
    pub fn as_server(
        alg: HashAlg,
        secret: &[u8],
        hash: &[u8],
        session_id: &[u8],
        cipher: &Cipher,
        hmac: &Hmac,
    ) -> Self {
        Self {
            iv: Self::derive(alg, secret, hash, b'B', session_id, cipher.iv_size()),
            key: Self::derive(alg, secret, hash, b'D', session_id, cipher.key_size()),
            hmac: Self::derive(alg, secret, hash, b'F', session_id, hmac.size()),
        }
    }

    /// `secret` is expected to be already encoded as a `mpint`.
    fn derive(
        alg: HashAlg,
        secret: &[u8],
        hash: &[u8],
        kind: u8,
        session_id: &[u8],
        size: usize,
    ) -> SecretBox<Vec<u8>> {
        SecretBox::<Vec<u8>>::init_with_mut(|key| {
            key.extend_from_slice(&alg.digest(&[secret, hash, &[kind], session_id]));

            while key.len() < size {
                let block = alg.digest(&[secret, hash, key]);
                key.extend_from_slice(&block);
            }

            key.truncate(size);
        })
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn keys_are_extended_to_the_cipher_needs() {
        let keys = Keys::as_client(
            HashAlg::Sha1,
            &[0, 0, 0, 1, 42],
            b"hash",
            b"session",
            &Cipher::ChaCha20Poly1305,
            &Hmac::HmacSha512,
        );

        assert_eq!(keys.iv.expose_secret().len(), 0);
        assert_eq!(keys.key.expose_secret().len(), 64);
        assert_eq!(keys.hmac.expose_secret().len(), 64);

        // The first block is the plain derivation, the extension only appends to it.
        assert_eq!(
            &keys.key.expose_secret()[..20],
            HashAlg::Sha1.digest(&[&[0, 0, 0, 1, 42], b"hash", b"C", b"session"])
        );
    }

    #[test]
    fn directions_derive_distinct_keys() {
        let args = (HashAlg::Sha256, [0u8, 0, 0, 1, 7], b"hash", b"session");
        let client = Keys::as_client(
            args.0,
            &args.1,
            args.2,
            args.3,
            &Cipher::Aes128Ctr,
            &Hmac::HmacSha256,
        );
        let server = Keys::as_server(
            args.0,
            &args.1,
            args.2,
            args.3,
            &Cipher::Aes128Ctr,
            &Hmac::HmacSha256,
        );

        assert_ne!(client.key.expose_secret(), server.key.expose_secret());
        assert_ne!(client.iv.expose_secret(), server.iv.expose_secret());
    }
}
