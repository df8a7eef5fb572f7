//! The responder side of the protocol.
//!
//! The [`Server`] decodes the client requests into [`Request`]s for the
//! application to answer with [`Server::reply`], in any order.

use std::collections::VecDeque;

use crate::{
    frame::{self, Deframer, MAX_FRAME_LENGTH},
    msg::{
        to_vec, Extended, Extension, Hello, Limits, Reply, Request, StatusCode, INIT, VERSION,
        VERSION_MSG,
    },
    Error, Result,
};

/// The settings of a [`Server`].
#[derive(Debug, Clone)]
pub struct Config {
    /// The extensions advertised to the client in the `SSH_FXP_VERSION`.
    pub extensions: Vec<Extension>,

    /// The limits reported to the `limits@openssh.com` extension.
    pub limits: Limits,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            extensions: Extension::ALL.to_vec(),
            limits: Limits {
                max_packet_length: MAX_FRAME_LENGTH as u64,
                max_read_length: 256 * 1024,
                max_write_length: 256 * 1024,
                max_open_handles: 0,
            },
        }
    }
}

/// A file transfer server, decoding requests and encoding their replies.
#[derive(Debug)]
pub struct Server {
    config: Config,
    version: Option<u32>,

    deframer: Deframer,
    output: Vec<u8>,
    requests: VecDeque<(u32, Request)>,
}

impl Server {
    /// Create a server, waiting for the client `SSH_FXP_INIT`.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            version: None,
            deframer: Deframer::new(MAX_FRAME_LENGTH),
            output: Vec::new(),
            requests: Default::default(),
        }
    }

    /// The negotiated protocol version.
    pub fn version(&self) -> Option<u32> {
        self.version
    }

    /// Take the bytes to be sent to the client.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    /// Whether bytes are waiting to be sent to the client.
    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Take the next request to answer, along with its id.
    pub fn poll_request(&mut self) -> Option<(u32, Request)> {
        self.requests.pop_front()
    }

    /// Answer the request `id`.
    pub fn reply(&mut self, id: u32, reply: &Reply) -> Result<()> {
        tracing::trace!("-> #{id} {reply:?}");

        self.output.extend(frame::frame(&reply.encode(id)?));

        Ok(())
    }

    /// Drop the unanswered requests and any partial frame.
    pub fn shutdown(&mut self) {
        self.requests.clear();
        self.deframer = Deframer::new(MAX_FRAME_LENGTH);
    }

    /// Process bytes received from the client.
    ///
    /// Any error is fatal to the subsystem.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        self.deframer.feed(bytes);

        while let Some(payload) = self.deframer.next()? {
            self.process(&payload)?;
        }

        Ok(())
    }

    fn process(&mut self, payload: &[u8]) -> Result<()> {
        if self.version.is_none() {
            let init = Hello::decode(payload, INIT)?;
            let version = init.version.min(VERSION);
            if version < VERSION {
                return Err(Error::Version(init.version));
            }

            tracing::debug!("Negotiated version {version} with the client");

            let hello = Hello {
                version,
                extensions: self
                    .config
                    .extensions
                    .iter()
                    .map(|ext| (ext.name().to_owned(), ext.data().to_vec()))
                    .collect(),
            };
            self.output
                .extend(frame::frame(&hello.encode(VERSION_MSG)?));
            self.version = Some(version);

            return Ok(());
        }

        match Request::decode(payload) {
            Ok((id, Request::Extended(Extended::Limits)))
                if self.config.extensions.contains(&Extension::Limits) =>
            {
                let limits = to_vec(&self.config.limits)?;

                self.reply(id, &Reply::Extended(limits))?;
            }
            Ok((id, Request::Extended(extended)))
                if extended
                    .extension()
                    .is_some_and(|ext| !self.config.extensions.contains(&ext)) =>
            {
                tracing::debug!("Refusing the unadvertised `{}` extension", extended.name());

                self.reply(
                    id,
                    &Reply::status(StatusCode::OpUnsupported, "Unsupported extension"),
                )?;
            }
            Ok((id, request)) => {
                tracing::trace!("<- #{id} {request:?}");

                self.requests.push_back((id, request));
            }
            Err(Error::UnexpectedMessage(kind)) if payload.len() >= 5 => {
                let id = u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]);

                tracing::debug!("Refusing the unknown request type `{kind}`");

                self.reply(
                    id,
                    &Reply::status(StatusCode::OpUnsupported, "Unsupported request"),
                )?;
            }
            Err(err) => return Err(err),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{from_slice, Handle};

    fn replies(server: &mut Server) -> Vec<(u32, Reply)> {
        let mut deframer = Deframer::new(MAX_FRAME_LENGTH);
        deframer.feed(&server.take_output());

        std::iter::from_fn(|| deframer.next().unwrap())
            .map(|payload| Reply::decode(&payload).unwrap())
            .collect()
    }

    fn initialized(config: Config) -> Server {
        let mut server = Server::new(config);

        let init = Hello {
            version: 6,
            extensions: vec![],
        };
        server.feed(&frame::frame(&init.encode(INIT).unwrap())).unwrap();

        let mut deframer = Deframer::new(MAX_FRAME_LENGTH);
        deframer.feed(&server.take_output());
        let version = Hello::decode(&deframer.next().unwrap().unwrap(), VERSION_MSG).unwrap();
        assert_eq!(version.version, VERSION);

        server
    }

    #[test]
    fn requests_are_handed_over() {
        let mut server = initialized(Default::default());

        let request = Request::Close {
            handle: Handle(b"h".to_vec()),
        };
        server.feed(&frame::frame(&request.encode(9).unwrap())).unwrap();

        assert_eq!(server.poll_request(), Some((9, request)));

        server.reply(9, &Reply::ok()).unwrap();
        assert_eq!(replies(&mut server), [(9, Reply::ok())]);
    }

    #[test]
    fn limits_are_answered() {
        let mut server = initialized(Default::default());

        let request = Request::Extended(Extended::Limits);
        server.feed(&frame::frame(&request.encode(1).unwrap())).unwrap();

        assert_eq!(server.poll_request(), None);

        let replies = replies(&mut server);
        let [(1, Reply::Extended(data))] = replies.as_slice() else {
            panic!("Expected the limits");
        };
        assert_eq!(
            from_slice::<Limits>(data).unwrap(),
            Config::default().limits
        );
    }

    #[test]
    fn unadvertised_extensions_are_refused() {
        let mut server = initialized(Config {
            extensions: vec![],
            ..Default::default()
        });

        let request = Request::Extended(Extended::Fsync {
            handle: Handle(b"h".to_vec()),
        });
        server.feed(&frame::frame(&request.encode(2).unwrap())).unwrap();

        assert_eq!(server.poll_request(), None);
        assert!(matches!(
            replies(&mut server).as_slice(),
            [(
                2,
                Reply::Status {
                    code: StatusCode::OpUnsupported,
                    ..
                }
            )]
        ));
    }

    #[test]
    fn unknown_requests_are_refused() {
        let mut server = initialized(Default::default());

        server.feed(&frame::frame(&[99, 0, 0, 0, 5])).unwrap();

        assert!(matches!(
            replies(&mut server).as_slice(),
            [(
                5,
                Reply::Status {
                    code: StatusCode::OpUnsupported,
                    ..
                }
            )]
        ));
    }

    #[test]
    fn requests_before_init_are_fatal() {
        let mut server = Server::new(Default::default());

        let request = Request::Stat { path: "/".into() };

        assert!(matches!(
            server.feed(&frame::frame(&request.encode(0).unwrap())),
            Err(Error::UnexpectedMessage(17))
        ));
    }
}
