//! Reading of the identification line, and of the greeting that may precede it.

use ssh_packet::SshId;

use crate::{Error, Result};

/// Maximum size of the identification line, including the `CR LF`.
const MAX_ID_LENGTH: usize = 255;

/// Maximum number of greeting lines a responder may send before its identification.
const MAX_GREETING_LINES: usize = 50;

/// Maximum size of a single greeting line.
const MAX_GREETING_LENGTH: usize = 8192;

/// Parse and validate the identification `line`, without its `CR LF`.
pub fn parse(line: &str) -> Result<SshId> {
    if !line.is_ascii() {
        return Err(Error::Identification("line is not valid ASCII"));
    }

    let id: SshId = line
        .parse()
        .map_err(|_| Error::Identification("malformed identification"))?;

    match id.protoversion.as_str() {
        "2.0" | "1.99" => Ok(id),
        _ => Err(Error::Identification("unsupported protocol version")),
    }
}

/// Serialize the identification as sent on the wire, terminated by `CR LF`.
pub fn to_line(id: &SshId) -> Vec<u8> {
    format!("{id}\r\n").into_bytes()
}

/// A resumable reader for the peer's identification line.
#[derive(Debug)]
pub struct IdReader {
    buffer: Vec<u8>,
    greeting: Vec<String>,
    allow_greeting: bool,
}

impl IdReader {
    /// Create a reader, `allow_greeting` being set when the peer is the responder.
    pub fn new(allow_greeting: bool) -> Self {
        Self {
            buffer: Vec::new(),
            greeting: Vec::new(),
            allow_greeting,
        }
    }

    /// The greeting lines received so far.
    pub fn greeting(&self) -> &[String] {
        &self.greeting
    }

    /// Feed bytes into the reader, returning the identification and
    /// the unconsumed bytes following it when the line is complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Option<(SshId, Vec<u8>)>> {
        self.buffer.extend_from_slice(bytes);

        loop {
            let Some(end) = self.buffer.iter().position(|byte| *byte == b'\n') else {
                let limit = if self.allow_greeting {
                    MAX_GREETING_LENGTH
                } else {
                    MAX_ID_LENGTH
                };

                if self.buffer.len() > limit {
                    return Err(Error::Identification("line exceeds maximum length"));
                }

                return Ok(None);
            };

            let rest = self.buffer.split_off(end + 1);
            let mut line = std::mem::replace(&mut self.buffer, rest);

            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if line.starts_with(b"SSH-") {
                if line.len() + 2 > MAX_ID_LENGTH {
                    return Err(Error::Identification("line exceeds maximum length"));
                }

                let line = std::str::from_utf8(&line)
                    .map_err(|_| Error::Identification("line is not valid ASCII"))?;
                let id = parse(line)?;

                return Ok(Some((id, std::mem::take(&mut self.buffer))));
            }

            if !self.allow_greeting {
                return Err(Error::Identification("unexpected greeting from the initiator"));
            }
            if self.greeting.len() >= MAX_GREETING_LINES || line.len() > MAX_GREETING_LENGTH {
                return Err(Error::Identification("greeting is too large"));
            }

            let line = String::from_utf8_lossy(&line).into_owned();
            tracing::debug!("Peer greeting: {line}");

            self.greeting.push(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_comments() {
        let id = parse("SSH-2.0-OpenSSH_9.6 Debian-1").unwrap();

        assert_eq!(id.softwareversion, "OpenSSH_9.6");
        assert_eq!(id.comments.as_deref(), Some("Debian-1"));
        assert_eq!(to_line(&id), b"SSH-2.0-OpenSSH_9.6 Debian-1\r\n");
    }

    #[test]
    fn reject_ssh1() {
        assert!(parse("SSH-1.5-old").is_err());
        assert!(parse("SSH-1.99-compat").is_ok());
        assert!(parse("SSH-2.0-").is_err());
    }

    #[test]
    fn reader_accepts_greeting_from_responder() {
        let mut reader = IdReader::new(true);

        assert!(reader.feed(b"Welcome\r\nto the ").unwrap().is_none());

        let (id, rest) = reader
            .feed(b"server\r\nSSH-2.0-sesh\r\n\x00\x00")
            .unwrap()
            .unwrap();

        assert_eq!(id.softwareversion, "sesh");
        assert_eq!(rest, [0, 0]);
        assert_eq!(reader.greeting(), ["Welcome", "to the server"]);
    }

    #[test]
    fn reader_rejects_greeting_from_initiator() {
        let mut reader = IdReader::new(false);

        assert!(reader.feed(b"hello\r\nSSH-2.0-sesh\r\n").is_err());
    }

    #[test]
    fn reader_bounds_greeting_lines() {
        let mut reader = IdReader::new(true);
        let greeting = "line\r\n".repeat(MAX_GREETING_LINES + 1);

        assert!(reader.feed(greeting.as_bytes()).is_err());
    }
}
