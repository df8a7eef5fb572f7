use secrecy::{ExposeSecret, SecretBox};

use crate::{
    algorithm::{Cipher, CipherState, Compress, Deflater, Hmac, Inflater},
    Result,
};

use super::Keys;

/// The algorithms and keyed state protecting a single direction of the stream.
#[derive(Debug)]
pub(crate) struct Transport {
    pub cipher: Cipher,
    pub hmac: Hmac,
    pub compress: Compress,
    pub state: CipherState,
    pub mac_key: SecretBox<Vec<u8>>,

    /// The compression stream, outgoing direction.
    pub deflater: Option<Deflater>,

    /// The compression stream, incoming direction.
    pub inflater: Option<Inflater>,
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            cipher: Cipher::None,
            hmac: Hmac::None,
            compress: Compress::None,
            state: CipherState::None,
            mac_key: Default::default(),
            deflater: None,
            inflater: None,
        }
    }
}

impl Transport {
    /// Key a transport to seal outgoing packets.
    pub fn encryptor(cipher: Cipher, hmac: Hmac, compress: Compress, keys: Keys) -> Result<Self> {
        let state = cipher.encryptor(keys.key.expose_secret(), keys.iv.expose_secret())?;
        let deflater = if compress.is_delayed() {
            None
        } else {
            compress.deflater()?
        };

        Ok(Self {
            deflater,
            ..Self::keyed(cipher, hmac, compress, state, keys)
        })
    }

    /// Key a transport to open incoming packets.
    pub fn decryptor(cipher: Cipher, hmac: Hmac, compress: Compress, keys: Keys) -> Result<Self> {
        let state = cipher.decryptor(keys.key.expose_secret(), keys.iv.expose_secret())?;
        let inflater = if compress.is_delayed() {
            None
        } else {
            compress.inflater()
        };

        Ok(Self {
            inflater,
            ..Self::keyed(cipher, hmac, compress, state, keys)
        })
    }

    fn keyed(cipher: Cipher, hmac: Hmac, compress: Compress, state: CipherState, keys: Keys) -> Self {
        // The tag of an AEAD cipher replaces the MAC.
        let hmac = if cipher.is_aead() { Hmac::None } else { hmac };

        Self {
            cipher,
            hmac,
            compress,
            state,
            mac_key: keys.hmac,
            deflater: None,
            inflater: None,
        }
    }

    /// Start the outgoing compression stream held back until authentication.
    pub fn enable_deflater(&mut self) -> Result<()> {
        if self.compress.is_delayed() && self.deflater.is_none() {
            tracing::debug!("Enabling delayed compression of outgoing packets");

            self.deflater = self.compress.deflater()?;
        }

        Ok(())
    }

    /// Start the incoming compression stream held back until authentication.
    pub fn enable_inflater(&mut self) {
        if self.compress.is_delayed() && self.inflater.is_none() {
            tracing::debug!("Enabling delayed compression of incoming packets");

            self.inflater = self.compress.inflater();
        }
    }

    pub fn block_size(&self) -> usize {
        self.cipher.block_size().max(8)
    }

    /// Whether the packet length is sent in clear or encrypted apart,
    /// excluding it from the block alignment.
    pub fn detached_length(&self) -> bool {
        self.cipher.is_aead() || self.hmac.etm()
    }

    /// The size of the trailing MAC or authentication tag.
    pub fn mac_size(&self) -> usize {
        if self.cipher.is_aead() {
            self.cipher.tag_size()
        } else {
            self.hmac.size()
        }
    }
}
