//! Supported algorithms for **compression**, **encryption**, **integrity** and **key-exchange**.

use std::str::FromStr;

use digest::Digest;

use crate::{
    msg::{arch::NameList, trans::KexInit},
    Error, Result,
};

pub(crate) trait Negociate<S = ()>: Sized + FromStr {
    const ERR: Error;

    fn field(kex: &KexInit) -> &NameList;

    fn negociate(clientkex: &KexInit, serverkex: &KexInit) -> Result<Self> {
        Self::field(clientkex)
            .preferred_in(Self::field(serverkex))
            .ok_or(Self::ERR)?
            .parse()
            .map_err(|_| Self::ERR)
    }
}

mod cipher;
pub use cipher::Cipher;
pub(crate) use cipher::CipherState;

mod compress;
pub use compress::Compress;
pub(crate) use compress::{Deflater, Inflater};

mod hmac;
pub use hmac::Hmac;

pub(crate) mod kex;
pub use kex::Kex;

pub(crate) mod key;
pub use key::Key;

/// The hash function underlying a key-exchange method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HashAlg {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlg {
    /// Hash the concatenation of `parts`.
    pub fn digest(&self, parts: &[&[u8]]) -> Vec<u8> {
        fn digest<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
            parts
                .iter()
                .fold(D::new(), |hasher, part| hasher.chain_update(part))
                .finalize()
                .to_vec()
        }

        match self {
            Self::Sha1 => digest::<sha1::Sha1>(parts),
            Self::Sha256 => digest::<sha2::Sha256>(parts),
            Self::Sha384 => digest::<sha2::Sha384>(parts),
            Self::Sha512 => digest::<sha2::Sha512>(parts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_of_parts_is_digest_of_concatenation() {
        assert_eq!(
            HashAlg::Sha256.digest(&[b"hello ", b"world"]),
            HashAlg::Sha256.digest(&[b"hello world"])
        );
        assert_eq!(HashAlg::Sha1.digest(&[]).len(), 20);
        assert_eq!(HashAlg::Sha384.digest(&[]).len(), 48);
        assert_eq!(HashAlg::Sha512.digest(&[]).len(), 64);
    }
}
