//! The binary packet protocol, framing payloads into encrypted
//! and authenticated packets, and back.

use rand::RngCore;
use secrecy::ExposeSecret;

use crate::{algorithm::CipherState, msg::Packet, Error, Result};

mod keys;
pub(crate) use keys::Keys;

mod transport;
pub(crate) use transport::Transport;

/// The maximum accepted value of the `packet_length` field.
pub const MAX_PACKET_LENGTH: u32 = 256 * 1024;

/// The maximum payload accepted for sending, leaving room for
/// the padding and the compression overhead.
const MAX_PAYLOAD_LENGTH: usize = MAX_PACKET_LENGTH as usize - 1024;

/// The minimum amount of random padding in a packet.
const MIN_PADDING: usize = 4;

/// Frames outgoing payloads into packets.
#[derive(Debug, Default)]
pub(crate) struct Encoder {
    transport: Transport,
    seq: u32,
    bytes: u64,
    packets: u64,
}

impl Encoder {
    /// Frame, protect and number the `payload`, returning the bytes to send on the wire.
    pub fn encode(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let block = self.transport.block_size();
        let detached = self.transport.detached_length();

        if payload.len() > MAX_PAYLOAD_LENGTH {
            return Err(Error::PacketLength(payload.len() as u32));
        }

        let Transport {
            hmac,
            state,
            mac_key,
            deflater,
            ..
        } = &mut self.transport;

        let compressed;
        let payload = match deflater {
            Some(deflater) => {
                compressed = deflater.compress(payload)?;
                &compressed[..]
            }
            None => payload,
        };

        let unaligned = 1 + payload.len() + if detached { 0 } else { 4 };
        let mut padding = block - unaligned % block;
        if padding < MIN_PADDING {
            padding += block;
        }

        let length = 1 + payload.len() + padding;
        if length > MAX_PACKET_LENGTH as usize {
            return Err(Error::PacketLength(length as u32));
        }

        let mut packet = Vec::with_capacity(4 + length + 64);
        packet.extend_from_slice(&(length as u32).to_be_bytes());
        packet.push(padding as u8);
        packet.extend_from_slice(&payload);
        packet.resize(packet.len() + padding, 0);
        rand::thread_rng().fill_bytes(&mut packet[4 + 1 + payload.len()..]);

        match state {
            CipherState::Gcm(gcm) => {
                let tag = gcm.seal(&mut packet)?;
                packet.extend_from_slice(&tag);
            }
            CipherState::ChaCha20Poly1305(chacha) => {
                let tag = chacha.seal(self.seq, &mut packet)?;
                packet.extend_from_slice(&tag);
            }
            state if hmac.etm() => {
                state.apply(&mut packet[4..])?;

                let mac = hmac.sign(self.seq, &packet, mac_key.expose_secret())?;
                packet.extend_from_slice(&mac);
            }
            state => {
                let mac = hmac.sign(self.seq, &packet, mac_key.expose_secret())?;

                state.apply(&mut packet)?;
                packet.extend_from_slice(&mac);
            }
        }

        self.seq = self.seq.wrapping_add(1);
        self.bytes += packet.len() as u64;
        self.packets += 1;

        Ok(packet)
    }

    /// Protect the next packets with `transport`, resetting the rekey counters.
    pub fn install(&mut self, transport: Transport) {
        self.transport = transport;
        self.bytes = 0;
        self.packets = 0;
    }

    /// Start the compression held back until the user is authenticated.
    pub fn enable_compression(&mut self) -> Result<()> {
        self.transport.enable_deflater()
    }

    pub fn reset_seq(&mut self) {
        self.seq = 0;
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }
}

/// Extracts incoming packets from the bytes received on the wire.
#[derive(Debug, Default)]
pub(crate) struct Decoder {
    transport: Transport,
    seq: u32,
    buffer: Vec<u8>,

    /// The start of the unconsumed bytes in the `buffer`.
    offset: usize,

    /// The length of the packet being received, once known.
    length: Option<u32>,

    bytes: u64,
    packets: u64,
}

impl Decoder {
    /// Append received bytes to the internal buffer.
    pub fn feed(&mut self, data: &[u8]) {
        if self.offset > 0 && self.offset == self.buffer.len() {
            self.buffer.clear();
            self.offset = 0;
        } else if self.offset > self.buffer.capacity() / 2 {
            self.buffer.drain(..self.offset);
            self.offset = 0;
        }

        self.buffer.extend_from_slice(data);
    }

    /// Extract the next complete packet and its sequence number, if enough bytes were fed.
    pub fn decode(&mut self) -> Result<Option<(u32, Packet)>> {
        let block = self.transport.block_size();
        let detached = self.transport.detached_length();
        let mac_size = self.transport.mac_size();

        let Transport {
            hmac,
            state,
            mac_key,
            inflater,
            ..
        } = &mut self.transport;
        let received = &mut self.buffer[self.offset..];

        let length = match self.length {
            Some(length) => length,
            None => {
                let length = match &mut *state {
                    CipherState::ChaCha20Poly1305(chacha) if received.len() >= 4 => {
                        chacha.length(self.seq, received)?
                    }
                    CipherState::ChaCha20Poly1305(_) => return Ok(None),
                    CipherState::None | CipherState::Gcm(_) if received.len() >= 4 => {
                        u32::from_be_bytes([received[0], received[1], received[2], received[3]])
                    }
                    _ if detached && received.len() >= 4 => {
                        u32::from_be_bytes([received[0], received[1], received[2], received[3]])
                    }
                    state if !detached && received.len() >= block => {
                        // Decrypt the first block in place, the rest follows once complete.
                        state.apply(&mut received[..block])?;

                        u32::from_be_bytes([received[0], received[1], received[2], received[3]])
                    }
                    _ => return Ok(None),
                };

                let aligned = if detached { length } else { length + 4 };
                if !(5..=MAX_PACKET_LENGTH).contains(&length) || aligned as usize % block != 0 {
                    return Err(Error::PacketLength(length));
                }

                self.length = Some(length);

                length
            }
        };

        let size = 4 + length as usize;
        if received.len() < size + mac_size {
            return Ok(None);
        }

        let (packet, rest) = received.split_at_mut(size);
        let mac = &rest[..mac_size];

        match state {
            CipherState::Gcm(gcm) => gcm.open(packet, mac)?,
            CipherState::ChaCha20Poly1305(chacha) => chacha.open(self.seq, packet, mac)?,
            state if hmac.etm() => {
                hmac.verify(self.seq, packet, mac_key.expose_secret(), mac)?;
                state.apply(&mut packet[4..])?;
            }
            state => {
                state.apply(&mut packet[block..])?;
                hmac.verify(self.seq, packet, mac_key.expose_secret(), mac)?;
            }
        }

        let padding = packet[4] as usize;
        if padding < MIN_PADDING || padding + 1 > length as usize {
            return Err(Error::Padding);
        }

        let payload = &packet[5..size - padding];
        let payload = match inflater {
            Some(inflater) => inflater.decompress(payload)?,
            None => payload.to_vec(),
        };
        let packet = (self.seq, Packet { payload });

        self.offset += size + mac_size;
        self.length = None;
        self.seq = self.seq.wrapping_add(1);
        self.bytes += (size + mac_size) as u64;
        self.packets += 1;

        Ok(Some(packet))
    }

    /// Open the next packets with `transport`, resetting the rekey counters.
    pub fn install(&mut self, transport: Transport) {
        self.transport = transport;
        self.bytes = 0;
        self.packets = 0;
    }

    /// Start the decompression held back until the user is authenticated.
    pub fn enable_compression(&mut self) {
        self.transport.enable_inflater();
    }

    pub fn reset_seq(&mut self) {
        self.seq = 0;
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }
}
