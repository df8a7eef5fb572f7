use std::{
    collections::VecDeque,
    fmt,
    io::{self, Read, Write},
};

use libflate::{
    non_blocking::zlib::Decoder,
    zlib::{EncodeOptions, Encoder, FlushMode},
};
use strum::{AsRefStr, EnumString};

use crate::{
    msg::{arch::NameList, trans::KexInit},
    side::{client::Client, server::Server},
    stream::MAX_PACKET_LENGTH,
    Error, Result,
};

use super::Negociate;

impl Negociate<Client> for Compress {
    const ERR: Error = Error::NoCommonCompression;

    fn field(kex: &KexInit) -> &NameList {
        &kex.compression_algorithms_client_to_server
    }
}

impl Negociate<Server> for Compress {
    const ERR: Error = Error::NoCommonCompression;

    fn field(kex: &KexInit) -> &NameList {
        &kex.compression_algorithms_server_to_client
    }
}

/// SSH compression algorithms.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Compress {
    /// zlib compression (OpenSSH mode), enabled once the user is authenticated.
    #[strum(serialize = "zlib@openssh.com")]
    ZlibOpenssh,

    /// zlib compression.
    Zlib,

    /// No compression algorithm.
    #[default]
    None,
}

impl Compress {
    /// Whether the compression only starts after a successful authentication.
    pub fn is_delayed(&self) -> bool {
        matches!(self, Self::ZlibOpenssh)
    }

    pub(crate) fn deflater(&self) -> Result<Option<Deflater>> {
        match self {
            Self::Zlib | Self::ZlibOpenssh => Deflater::new().map(Some),
            Self::None => Ok(None),
        }
    }

    pub(crate) fn inflater(&self) -> Option<Inflater> {
        match self {
            Self::Zlib | Self::ZlibOpenssh => Some(Inflater::new()),
            Self::None => None,
        }
    }
}

/// A zlib stream spanning every outgoing packet of a direction,
/// each payload ending on a sync flush.
pub(crate) struct Deflater {
    encoder: Encoder<Vec<u8>>,
}

impl Deflater {
    fn new() -> Result<Self> {
        let options = EncodeOptions::new().flush_mode(FlushMode::Sync);

        Ok(Self {
            encoder: Encoder::with_options(Vec::new(), options)?,
        })
    }

    pub fn compress(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        self.encoder.write_all(payload)?;
        self.encoder.flush()?;

        Ok(std::mem::take(self.encoder.as_inner_mut()))
    }
}

impl fmt::Debug for Deflater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deflater").finish_non_exhaustive()
    }
}

/// The bytes of the incoming zlib stream that were not inflated yet.
#[derive(Debug, Default)]
struct Pending(VecDeque<u8>);

impl Read for Pending {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.0.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }

        self.0.read(buf)
    }
}

/// A zlib stream spanning every incoming packet of a direction.
pub(crate) struct Inflater {
    decoder: Decoder<Pending>,
}

impl Inflater {
    fn new() -> Self {
        Self {
            decoder: Decoder::new(Pending::default()),
        }
    }

    pub fn decompress(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        self.decoder.as_inner_mut().0.extend(payload);

        let mut output = Vec::with_capacity(payload.len() * 2);
        let mut chunk = [0; 4096];

        loop {
            match self.decoder.read(&mut chunk) {
                Ok(0) => break,
                Ok(size) => {
                    output.extend_from_slice(&chunk[..size]);

                    if output.len() > MAX_PACKET_LENGTH as usize {
                        return Err(Error::Compression);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    tracing::debug!("Unable to inflate the payload: {err}");

                    return Err(Error::Compression);
                }
            }
        }

        Ok(output)
    }
}

impl fmt::Debug for Inflater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inflater").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_spans_packets() {
        let mut deflater = Compress::Zlib.deflater().unwrap().unwrap();
        let mut inflater = Compress::Zlib.inflater().unwrap();

        let payloads: [&[u8]; 4] = [b"\x5ehello", b"", b"\x5ehello hello hello", &[0x5e; 9000]];
        let compressed = payloads
            .iter()
            .map(|payload| deflater.compress(payload).unwrap())
            .collect::<Vec<_>>();

        // Every packet is flushed, so the peer can inflate it alone.
        for (payload, compressed) in payloads.iter().zip(&compressed) {
            assert_eq!(&compressed[compressed.len() - 4..], &[0, 0, 0xff, 0xff]);
            assert_eq!(&inflater.decompress(compressed).unwrap(), payload);
        }

        // The history is shared, repeated data shrinks.
        assert!(compressed[3].len() < 100);
    }

    #[test]
    fn corrupted_stream_is_an_error() {
        let mut inflater = Compress::ZlibOpenssh.inflater().unwrap();

        assert!(matches!(
            inflater.decompress(&[0x78, 0x9c, 0xff, 0xff, 0xff, 0xff]),
            Err(Error::Compression)
        ));
    }

    #[test]
    fn names_and_delay() {
        assert_eq!("zlib@openssh.com".parse::<Compress>().unwrap(), Compress::ZlibOpenssh);
        assert_eq!(Compress::Zlib.as_ref(), "zlib");
        assert!(Compress::ZlibOpenssh.is_delayed());
        assert!(!Compress::Zlib.is_delayed());
        assert!(Compress::None.deflater().unwrap().is_none());
    }
}
