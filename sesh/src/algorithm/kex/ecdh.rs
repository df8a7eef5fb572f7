use p256::elliptic_curve::sec1::ToEncodedPoint;

use crate::{Error, Result};

use super::Kex;

/// An ephemeral secret for the elliptic-curve based key-exchange methods.
pub enum EphemeralSecret {
    X25519(x25519_dalek::EphemeralSecret),
    NistP256(p256::ecdh::EphemeralSecret),
    NistP384(p384::ecdh::EphemeralSecret),
}

impl EphemeralSecret {
    pub fn random(kex: &Kex) -> Result<Self> {
        let mut rng = rand::thread_rng();

        Ok(match kex {
            Kex::Curve25519Sha256 | Kex::Curve25519Sha256Libssh => {
                Self::X25519(x25519_dalek::EphemeralSecret::random_from_rng(rng))
            }
            Kex::EcdhSha2Nistp256 => Self::NistP256(p256::ecdh::EphemeralSecret::random(&mut rng)),
            Kex::EcdhSha2Nistp384 => Self::NistP384(p384::ecdh::EphemeralSecret::random(&mut rng)),
            _ => return Err(Error::UnsupportedAlgorithm),
        })
    }

    /// The public key, as an octet string.
    pub fn public(&self) -> Vec<u8> {
        match self {
            Self::X25519(secret) => x25519_dalek::PublicKey::from(secret).as_bytes().to_vec(),
            Self::NistP256(secret) => secret
                .public_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
            Self::NistP384(secret) => secret
                .public_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
        }
    }

    /// Agree on the shared secret with the `peer`'s public key octet string.
    pub fn agree(self, peer: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::X25519(secret) => {
                let peer = x25519_dalek::PublicKey::from(
                    <[u8; 32]>::try_from(peer).map_err(|_| Error::KexError)?,
                );
                let shared = secret.diffie_hellman(&peer);

                if !shared.was_contributory() {
                    return Err(Error::KexError);
                }

                Ok(shared.as_bytes().to_vec())
            }
            Self::NistP256(secret) => {
                let peer = p256::PublicKey::from_sec1_bytes(peer).map_err(|_| Error::KexError)?;

                Ok(secret.diffie_hellman(&peer).raw_secret_bytes().to_vec())
            }
            Self::NistP384(secret) => {
                let peer = p384::PublicKey::from_sec1_bytes(peer).map_err(|_| Error::KexError)?;

                Ok(secret.diffie_hellman(&peer).raw_secret_bytes().to_vec())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_agree() {
        for kex in [
            Kex::Curve25519Sha256,
            Kex::EcdhSha2Nistp256,
            Kex::EcdhSha2Nistp384,
        ] {
            let client = EphemeralSecret::random(&kex).unwrap();
            let server = EphemeralSecret::random(&kex).unwrap();

            let (q_c, q_s) = (client.public(), server.public());

            assert_eq!(client.agree(&q_s).unwrap(), server.agree(&q_c).unwrap());
        }
    }

    #[test]
    fn low_order_curve25519_point_is_rejected() {
        let secret = EphemeralSecret::random(&Kex::Curve25519Sha256).unwrap();

        assert!(matches!(secret.agree(&[0; 32]), Err(Error::KexError)));
    }
}
