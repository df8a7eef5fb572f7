use aead::{AeadInPlace, KeyInit};
use cipher::{
    generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher,
    StreamCipherSeek,
};
use poly1305::Poly1305;
use strum::{AsRefStr, EnumString};
use subtle::ConstantTimeEq;

use crate::{
    msg::{arch::NameList, trans::KexInit},
    side::{client::Client, server::Server},
    Error, Result,
};

use super::Negociate;

impl Negociate<Client> for Cipher {
    const ERR: Error = Error::NoCommonCipher;

    fn field(kex: &KexInit) -> &NameList {
        &kex.encryption_algorithms_client_to_server
    }
}

impl Negociate<Server> for Cipher {
    const ERR: Error = Error::NoCommonCipher;

    fn field(kex: &KexInit) -> &NameList {
        &kex.encryption_algorithms_server_to_client
    }
}

/// SSH cipher algorithms.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Cipher {
    /// ChaCha20-Poly1305.
    #[strum(serialize = "chacha20-poly1305@openssh.com")]
    ChaCha20Poly1305,

    /// AES-256 in Galois/Counter Mode (GCM).
    #[strum(serialize = "aes256-gcm@openssh.com")]
    Aes256Gcm,

    /// AES-128 in Galois/Counter Mode (GCM).
    #[strum(serialize = "aes128-gcm@openssh.com")]
    Aes128Gcm,

    /// AES-256 in counter (CTR) mode.
    Aes256Ctr,

    /// AES-192 in counter (CTR) mode.
    Aes192Ctr,

    /// AES-128 in counter (CTR) mode.
    Aes128Ctr,

    /// AES-256 in cipher block chaining (CBC) mode.
    Aes256Cbc,

    /// AES-192 in cipher block chaining (CBC) mode.
    Aes192Cbc,

    /// AES-128 in cipher block chaining (CBC) mode.
    Aes128Cbc,

    /// TripleDES in cipher block chaining (CBC) mode.
    #[strum(serialize = "3des-cbc")]
    TDesCbc,

    /// No cipher algorithm.
    #[default]
    None,
}

impl Cipher {
    fn init<T: KeyIvInit>(key: &[u8], iv: &[u8]) -> Result<Box<T>> {
        T::new_from_slices(key, iv)
            .map(Box::new)
            .map_err(|_| Error::Cipher)
    }

    /// Create the state to encrypt outgoing packets.
    pub(crate) fn encryptor(&self, key: &[u8], iv: &[u8]) -> Result<CipherState> {
        Ok(match self {
            Self::Aes128Cbc => CipherState::Cbc(Cbc::Aes128Enc(Self::init(key, iv)?)),
            Self::Aes192Cbc => CipherState::Cbc(Cbc::Aes192Enc(Self::init(key, iv)?)),
            Self::Aes256Cbc => CipherState::Cbc(Cbc::Aes256Enc(Self::init(key, iv)?)),
            Self::TDesCbc => CipherState::Cbc(Cbc::TDesEnc(Self::init(key, iv)?)),
            _ => self.state(key, iv)?,
        })
    }

    /// Create the state to decrypt incoming packets.
    pub(crate) fn decryptor(&self, key: &[u8], iv: &[u8]) -> Result<CipherState> {
        Ok(match self {
            Self::Aes128Cbc => CipherState::Cbc(Cbc::Aes128Dec(Self::init(key, iv)?)),
            Self::Aes192Cbc => CipherState::Cbc(Cbc::Aes192Dec(Self::init(key, iv)?)),
            Self::Aes256Cbc => CipherState::Cbc(Cbc::Aes256Dec(Self::init(key, iv)?)),
            Self::TDesCbc => CipherState::Cbc(Cbc::TDesDec(Self::init(key, iv)?)),
            _ => self.state(key, iv)?,
        })
    }

    /// The state of the direction-agnostic ciphers.
    fn state(&self, key: &[u8], iv: &[u8]) -> Result<CipherState> {
        Ok(match self {
            Self::ChaCha20Poly1305 => {
                CipherState::ChaCha20Poly1305(Box::new(ChaCha20Poly1305::new(key)?))
            }
            Self::Aes256Gcm => CipherState::Gcm(Box::new(Gcm::new(
                GcmAead::Aes256(aes_gcm::Aes256Gcm::new_from_slice(key).map_err(|_| Error::Cipher)?),
                iv,
            )?)),
            Self::Aes128Gcm => CipherState::Gcm(Box::new(Gcm::new(
                GcmAead::Aes128(aes_gcm::Aes128Gcm::new_from_slice(key).map_err(|_| Error::Cipher)?),
                iv,
            )?)),
            Self::Aes256Ctr => CipherState::Ctr(Ctr::Aes256(Self::init(key, iv)?)),
            Self::Aes192Ctr => CipherState::Ctr(Ctr::Aes192(Self::init(key, iv)?)),
            Self::Aes128Ctr => CipherState::Ctr(Ctr::Aes128(Self::init(key, iv)?)),
            Self::Aes256Cbc | Self::Aes192Cbc | Self::Aes128Cbc | Self::TDesCbc => {
                return Err(Error::UnsupportedAlgorithm)
            }
            Self::None => CipherState::None,
        })
    }

    /// Whether the cipher authenticates the packets by itself, making the MAC unnecessary.
    pub fn is_aead(&self) -> bool {
        matches!(
            self,
            Self::ChaCha20Poly1305 | Self::Aes256Gcm | Self::Aes128Gcm
        )
    }

    pub(crate) fn block_size(&self) -> usize {
        match self {
            Self::None | Self::TDesCbc | Self::ChaCha20Poly1305 => 8,
            Self::Aes256Gcm
            | Self::Aes128Gcm
            | Self::Aes128Cbc
            | Self::Aes192Cbc
            | Self::Aes256Cbc
            | Self::Aes128Ctr
            | Self::Aes192Ctr
            | Self::Aes256Ctr => 16,
        }
    }

    pub(crate) fn key_size(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Aes128Gcm | Self::Aes128Cbc | Self::Aes128Ctr => 16,
            Self::TDesCbc | Self::Aes192Cbc | Self::Aes192Ctr => 24,
            Self::Aes256Gcm | Self::Aes256Cbc | Self::Aes256Ctr => 32,
            Self::ChaCha20Poly1305 => 64,
        }
    }

    pub(crate) fn iv_size(&self) -> usize {
        match self {
            Self::None | Self::ChaCha20Poly1305 => 0,
            Self::TDesCbc => 8,
            Self::Aes256Gcm | Self::Aes128Gcm => 12,
            Self::Aes128Cbc
            | Self::Aes192Cbc
            | Self::Aes256Cbc
            | Self::Aes128Ctr
            | Self::Aes192Ctr
            | Self::Aes256Ctr => 16,
        }
    }

    pub(crate) fn tag_size(&self) -> usize {
        if self.is_aead() {
            16
        } else {
            0
        }
    }
}

/// The keyed state of a cipher, for a single direction.
pub(crate) enum CipherState {
    None,
    Ctr(Ctr),
    Cbc(Cbc),
    Gcm(Box<Gcm>),
    ChaCha20Poly1305(Box<ChaCha20Poly1305>),
}

impl std::fmt::Debug for CipherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::None => "None",
            Self::Ctr(_) => "Ctr",
            Self::Cbc(_) => "Cbc",
            Self::Gcm(_) => "Gcm",
            Self::ChaCha20Poly1305(_) => "ChaCha20Poly1305",
        })
    }
}

impl CipherState {
    /// Encrypt or decrypt `buffer` in place, for the non-authenticated ciphers.
    pub fn apply(&mut self, buffer: &mut [u8]) -> Result<()> {
        fn cbc_encrypt<C: BlockEncryptMut>(cipher: &mut C, buffer: &mut [u8]) -> Result<()> {
            if buffer.len() % C::block_size() != 0 {
                return Err(Error::Cipher);
            }

            for block in buffer.chunks_exact_mut(C::block_size()) {
                cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
            }

            Ok(())
        }

        fn cbc_decrypt<C: BlockDecryptMut>(cipher: &mut C, buffer: &mut [u8]) -> Result<()> {
            if buffer.len() % C::block_size() != 0 {
                return Err(Error::Cipher);
            }

            for block in buffer.chunks_exact_mut(C::block_size()) {
                cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
            }

            Ok(())
        }

        fn ctr<C: StreamCipher>(cipher: &mut C, buffer: &mut [u8]) -> Result<()> {
            cipher
                .try_apply_keystream(buffer)
                .map_err(|_| Error::Cipher)
        }

        match self {
            Self::None => Ok(()),
            Self::Ctr(Ctr::Aes128(cipher)) => ctr(cipher.as_mut(), buffer),
            Self::Ctr(Ctr::Aes192(cipher)) => ctr(cipher.as_mut(), buffer),
            Self::Ctr(Ctr::Aes256(cipher)) => ctr(cipher.as_mut(), buffer),
            Self::Cbc(Cbc::Aes128Enc(cipher)) => cbc_encrypt(cipher.as_mut(), buffer),
            Self::Cbc(Cbc::Aes192Enc(cipher)) => cbc_encrypt(cipher.as_mut(), buffer),
            Self::Cbc(Cbc::Aes256Enc(cipher)) => cbc_encrypt(cipher.as_mut(), buffer),
            Self::Cbc(Cbc::TDesEnc(cipher)) => cbc_encrypt(cipher.as_mut(), buffer),
            Self::Cbc(Cbc::Aes128Dec(cipher)) => cbc_decrypt(cipher.as_mut(), buffer),
            Self::Cbc(Cbc::Aes192Dec(cipher)) => cbc_decrypt(cipher.as_mut(), buffer),
            Self::Cbc(Cbc::Aes256Dec(cipher)) => cbc_decrypt(cipher.as_mut(), buffer),
            Self::Cbc(Cbc::TDesDec(cipher)) => cbc_decrypt(cipher.as_mut(), buffer),
            Self::Gcm(_) | Self::ChaCha20Poly1305(_) => Err(Error::Cipher),
        }
    }
}

pub(crate) enum Ctr {
    Aes128(Box<ctr::Ctr128BE<aes::Aes128>>),
    Aes192(Box<ctr::Ctr128BE<aes::Aes192>>),
    Aes256(Box<ctr::Ctr128BE<aes::Aes256>>),
}

pub(crate) enum Cbc {
    Aes128Enc(Box<cbc::Encryptor<aes::Aes128>>),
    Aes192Enc(Box<cbc::Encryptor<aes::Aes192>>),
    Aes256Enc(Box<cbc::Encryptor<aes::Aes256>>),
    TDesEnc(Box<cbc::Encryptor<des::TdesEde3>>),
    Aes128Dec(Box<cbc::Decryptor<aes::Aes128>>),
    Aes192Dec(Box<cbc::Decryptor<aes::Aes192>>),
    Aes256Dec(Box<cbc::Decryptor<aes::Aes256>>),
    TDesDec(Box<cbc::Decryptor<des::TdesEde3>>),
}

enum GcmAead {
    Aes128(aes_gcm::Aes128Gcm),
    Aes256(aes_gcm::Aes256Gcm),
}

/// AES-GCM as specified in RFC 5647, with the packet length as associated data.
pub(crate) struct Gcm {
    aead: GcmAead,

    /// A fixed 4 bytes field, followed by the 8 bytes invocation counter.
    nonce: [u8; 12],
}

impl Gcm {
    fn new(aead: GcmAead, iv: &[u8]) -> Result<Self> {
        Ok(Self {
            aead,
            nonce: iv.try_into().map_err(|_| Error::Cipher)?,
        })
    }

    fn increment(&mut self) {
        let mut counter = [0u8; 8];
        counter.copy_from_slice(&self.nonce[4..]);

        let counter = u64::from_be_bytes(counter).wrapping_add(1);
        self.nonce[4..].copy_from_slice(&counter.to_be_bytes());
    }

    /// Encrypt the `packet` past its length field, returning the tag.
    pub fn seal(&mut self, packet: &mut [u8]) -> Result<Vec<u8>> {
        let (length, data) = packet.split_at_mut(4);
        let nonce = GenericArray::from_slice(&self.nonce);

        let tag = match &self.aead {
            GcmAead::Aes128(aead) => aead.encrypt_in_place_detached(nonce, length, data),
            GcmAead::Aes256(aead) => aead.encrypt_in_place_detached(nonce, length, data),
        }
        .map_err(|_| Error::Cipher)?;

        self.increment();

        Ok(tag.to_vec())
    }

    /// Authenticate and decrypt the `packet` past its length field.
    pub fn open(&mut self, packet: &mut [u8], tag: &[u8]) -> Result<()> {
        let (length, data) = packet.split_at_mut(4);
        let nonce = GenericArray::from_slice(&self.nonce);
        let tag = GenericArray::from_slice(tag);

        match &self.aead {
            GcmAead::Aes128(aead) => aead.decrypt_in_place_detached(nonce, length, data, tag),
            GcmAead::Aes256(aead) => aead.decrypt_in_place_detached(nonce, length, data, tag),
        }
        .map_err(|_| Error::Integrity(digest::MacError))?;

        self.increment();

        Ok(())
    }
}

/// The `chacha20-poly1305@openssh.com` construction, keyed by the sequence number.
pub(crate) struct ChaCha20Poly1305 {
    main: chacha20::Key,
    header: chacha20::Key,
}

impl ChaCha20Poly1305 {
    fn new(key: &[u8]) -> Result<Self> {
        if key.len() != 64 {
            return Err(Error::Cipher);
        }

        Ok(Self {
            main: chacha20::Key::clone_from_slice(&key[..32]),
            header: chacha20::Key::clone_from_slice(&key[32..]),
        })
    }

    fn nonce(seq: u32) -> chacha20::LegacyNonce {
        chacha20::LegacyNonce::from(u64::from(seq).to_be_bytes())
    }

    /// Prepare the payload cipher, returning the one-time Poly1305 key.
    fn main(&self, seq: u32) -> (chacha20::ChaCha20Legacy, Poly1305) {
        let mut cipher = chacha20::ChaCha20Legacy::new(&self.main, &Self::nonce(seq));

        let mut key = poly1305::Key::default();
        cipher.apply_keystream(&mut key[..]);
        cipher.seek(64u64);

        (cipher, Poly1305::new(&key))
    }

    /// Decrypt the packet length from its first 4 encrypted bytes.
    pub fn length(&self, seq: u32, encrypted: &[u8]) -> Result<u32> {
        let mut length: [u8; 4] = encrypted
            .get(..4)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(Error::Cipher)?;

        chacha20::ChaCha20Legacy::new(&self.header, &Self::nonce(seq))
            .apply_keystream(&mut length);

        Ok(u32::from_be_bytes(length))
    }

    /// Encrypt the whole `packet`, returning the tag.
    pub fn seal(&self, seq: u32, packet: &mut [u8]) -> Result<Vec<u8>> {
        if packet.len() < 4 {
            return Err(Error::Cipher);
        }

        chacha20::ChaCha20Legacy::new(&self.header, &Self::nonce(seq))
            .apply_keystream(&mut packet[..4]);

        let (mut cipher, mac) = self.main(seq);
        cipher.apply_keystream(&mut packet[4..]);

        Ok(mac.compute_unpadded(packet).to_vec())
    }

    /// Authenticate the `packet` and decrypt it past its length field.
    pub fn open(&self, seq: u32, packet: &mut [u8], tag: &[u8]) -> Result<()> {
        if packet.len() < 4 {
            return Err(Error::Cipher);
        }

        let (mut cipher, mac) = self.main(seq);
        let expected = mac.compute_unpadded(packet);

        if !bool::from(expected.as_slice().ct_eq(tag)) {
            return Err(Error::Integrity(digest::MacError));
        }

        cipher.apply_keystream(&mut packet[4..]);

        Ok(())
    }
}
