//! Length-prefixed framing of the messages within the channel byte stream.

use crate::{Error, Result};

/// The maximum length of an incoming frame, a full 256KiB read with its headers.
pub const MAX_FRAME_LENGTH: u32 = 256 * 1024 + 1024;

/// Prefix the `payload` with its length.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);

    buf
}

/// A resumable frame decoder, fed with the chunks of the byte stream as they arrive.
#[derive(Debug)]
pub struct Deframer {
    buffer: Vec<u8>,
    offset: usize,
    max: u32,
}

impl Deframer {
    /// Create a decoder refusing frames larger than `max`.
    pub fn new(max: u32) -> Self {
        Self {
            buffer: Vec::new(),
            offset: 0,
            max,
        }
    }

    /// Append received bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        if self.offset > 0 && self.offset >= self.buffer.len() / 2 {
            self.buffer.drain(..self.offset);
            self.offset = 0;
        }

        self.buffer.extend_from_slice(bytes);
    }

    /// The number of bytes still needed to complete the current frame.
    pub fn needed(&self) -> usize {
        let available = &self.buffer[self.offset..];

        match *available {
            [a, b, c, d, ..] => {
                (4 + u32::from_be_bytes([a, b, c, d]) as usize).saturating_sub(available.len())
            }
            _ => 4 - available.len(),
        }
    }

    /// Take the next complete frame payload, if any.
    pub fn next(&mut self) -> Result<Option<Vec<u8>>> {
        let available = &self.buffer[self.offset..];

        let [a, b, c, d, ..] = *available else {
            return Ok(None);
        };

        let length = u32::from_be_bytes([a, b, c, d]);
        if length == 0 {
            return Err(Error::EmptyFrame);
        }
        if length > self.max {
            return Err(Error::FrameTooLarge(length));
        }

        let total = 4 + length as usize;
        if available.len() < total {
            return Ok(None);
        }

        let payload = available[4..total].to_vec();

        self.offset += total;
        if self.offset == self.buffer.len() {
            self.buffer.clear();
            self.offset = 0;
        }

        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resumes_across_chunks() {
        let mut stream = frame(b"\x01hello");
        stream.extend(frame(b"\x02world!"));

        let mut deframer = Deframer::new(MAX_FRAME_LENGTH);
        let mut frames = Vec::new();

        for byte in &stream {
            deframer.feed(std::slice::from_ref(byte));

            while let Some(payload) = deframer.next().unwrap() {
                frames.push(payload);
            }
        }

        assert_eq!(frames, [b"\x01hello".to_vec(), b"\x02world!".to_vec()]);
        assert_eq!(deframer.needed(), 4);
    }

    #[test]
    fn reports_the_missing_bytes() {
        let mut deframer = Deframer::new(MAX_FRAME_LENGTH);

        deframer.feed(&frame(b"\x01hello")[..6]);

        assert_eq!(deframer.next().unwrap(), None);
        assert_eq!(deframer.needed(), 4);
    }

    #[test]
    fn refuses_oversized_frames() {
        let mut deframer = Deframer::new(16);

        deframer.feed(&frame(&[0; 17]));

        assert!(matches!(deframer.next(), Err(Error::FrameTooLarge(17))));
    }

    #[test]
    fn refuses_empty_frames() {
        let mut deframer = Deframer::new(16);

        deframer.feed(&[0, 0, 0, 0]);

        assert!(matches!(deframer.next(), Err(Error::EmptyFrame)));
    }
}
