//! Facilities to interract with the SSH _connect_ protocol.
//!
//! The [`Connect`] wraps a [`Session`], runs the authentication and multiplexes
//! channels over it. Just like the session, it performs no I/O by itself, see
//! [`crate::Driver`] to run it over an async stream.

use sesh::{
    msg::{connect, trans::DisconnectReason, trans::Unimplemented, Packet, PacketExt},
    Session,
};

use crate::{
    auth::{private::Authenticator, Side},
    channel::{Channel, Outcome},
    mux::{Inbound, Mux},
    response::Response,
    Error, Event, Result,
};

#[doc(no_inline)]
pub use connect::{
    ChannelOpenContext, ChannelOpenFailureReason, ChannelRequestContext, GlobalRequestContext,
};

/// The channel settings of a [`Connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// The window granted to the peer on each channel, restored once half consumed.
    pub window: u32,

    /// The maximum size of the data packets we accept.
    pub packet: u32,

    /// The maximum number of concurrent channels.
    pub channels: usize,
}

impl Config {
    /// The default maximum packet size, 32KiB.
    pub const MAXIMUM_PACKET_SIZE: u32 = 32768;

    /// The default window size, 2MiB.
    pub const INITIAL_WINDOW_SIZE: u32 = 64 * Self::MAXIMUM_PACKET_SIZE;
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window: Self::INITIAL_WINDOW_SIZE,
            packet: Self::MAXIMUM_PACKET_SIZE,
            channels: 1024,
        }
    }
}

/// An outcome to a _global request_.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Global {
    /// The global request was _accepted_.
    Accepted {
        /// The port bound by the peer, for `tcpip-forward` requests on port `0`.
        bound_port: Option<u32>,
    },

    /// The global request was _rejected_.
    Rejected,
}

/// A wrapper around a [`Session`] to interract with the connect layer.
#[derive(Debug)]
pub struct Connect<S: Side> {
    session: Session<S>,
    auth: S::Auth,
    mux: Mux,

    started: bool,
    verifying: bool,
    torn: bool,
}

impl<S: Side> Connect<S> {
    /// Create a connection from the session `config`, the `auth` procedure and the channel `settings`.
    pub fn new(config: S, auth: S::Auth, settings: Config) -> Result<Self> {
        Ok(Self {
            session: Session::new(config)?,
            auth,
            mux: Mux::new(settings),
            started: false,
            verifying: false,
            torn: false,
        })
    }

    /// The underlying transport session.
    pub fn session(&self) -> &Session<S> {
        &self.session
    }

    /// Whether the authentication completed.
    pub fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated()
    }

    /// Whether the connection has been torn down.
    pub fn is_disconnected(&self) -> bool {
        self.torn
    }

    /// Take the bytes to be sent to the peer.
    pub fn take_output(&mut self) -> Vec<u8> {
        self.session.take_output()
    }

    /// Whether bytes are waiting to be sent to the peer.
    pub fn has_output(&self) -> bool {
        self.session.has_output()
    }

    /// Take the next event for the application.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.mux.poll_event()
    }

    /// Access the state of a channel.
    pub fn channel(&self, id: u32) -> Option<&Channel> {
        self.mux.channel(id)
    }

    /// Process bytes received from the peer.
    ///
    /// Any error is fatal to the connection, which is then torn down.
    pub fn feed(&mut self, data: &[u8]) -> Result<()> {
        let result = self
            .session
            .feed(data)
            .map_err(Error::from)
            .and_then(|()| self.process());

        self.check(result)
    }

    /// Resolve a deferred host key verification, see [`Event::HostKey`].
    pub fn verify_host(&mut self, accept: bool) -> Result<()> {
        self.verifying = false;

        let result = self
            .session
            .verify_host(accept)
            .map_err(Error::from)
            .and_then(|()| self.process());

        self.check(result)
    }

    /// Request a new _channel_ with the provided `context`, resolved with its identifier once confirmed.
    pub fn channel_open(&mut self, context: ChannelOpenContext) -> Result<Response<u32>> {
        self.alive()?;

        let response = self.mux.open(context)?;
        self.flush()?;

        Ok(response)
    }

    /// Accept a channel requested by the peer, see [`Event::ChannelOpen`].
    pub fn accept(&mut self, channel: u32) -> Result<()> {
        self.alive()?;

        self.mux.accept(channel)?;
        self.flush()
    }

    /// Reject a channel requested by the peer, see [`Event::ChannelOpen`].
    pub fn reject(
        &mut self,
        channel: u32,
        reason: ChannelOpenFailureReason,
        description: impl Into<String>,
    ) -> Result<()> {
        self.alive()?;

        self.mux.reject(channel, reason, description)?;
        self.flush()
    }

    /// Write `data` to the channel, held back while the peer's window is exhausted.
    pub fn write(&mut self, channel: u32, data: &[u8]) -> Result<()> {
        self.alive()?;

        self.mux.write(channel, None, data)?;
        self.flush()
    }

    /// Write `data` to the extended stream `data_type` of the channel, `1` being `stderr`.
    pub fn write_ext(&mut self, channel: u32, data_type: u32, data: &[u8]) -> Result<()> {
        self.alive()?;

        self.mux.write(channel, Some(data_type), data)?;
        self.flush()
    }

    /// Read up to `max` bytes received on the channel.
    pub fn read(&mut self, channel: u32, max: usize) -> Result<Vec<u8>> {
        let data = self.mux.read(channel, false, max)?;
        self.flush()?;

        Ok(data)
    }

    /// Read up to `max` bytes received on the extended streams of the channel.
    pub fn read_ext(&mut self, channel: u32, max: usize) -> Result<Vec<u8>> {
        let data = self.mux.read(channel, true, max)?;
        self.flush()?;

        Ok(data)
    }

    /// Signal the end of our data on the channel.
    pub fn eof(&mut self, channel: u32) -> Result<()> {
        self.alive()?;

        self.mux.eof(channel)?;
        self.flush()
    }

    /// Close the channel, [`Event::Closed`] being emitted once the peer closed it too.
    pub fn close(&mut self, channel: u32) -> Result<()> {
        self.alive()?;

        self.mux.close(channel)?;
        self.flush()
    }

    /// Make a _channel request_, the responses being matched in order.
    pub fn request(
        &mut self,
        channel: u32,
        context: ChannelRequestContext,
    ) -> Result<Response<Outcome>> {
        self.alive()?;

        let response = self
            .mux
            .request(channel, context, true)?
            .ok_or(Error::NoResponse)?;
        self.flush()?;

        Ok(response)
    }

    /// Make a _channel request_ without expecting a reply.
    pub fn notify(&mut self, channel: u32, context: ChannelRequestContext) -> Result<()> {
        self.alive()?;

        self.mux.request(channel, context, false)?;
        self.flush()
    }

    /// Reply to the oldest request of the peer on the channel, see [`Event::Request`].
    pub fn reply(&mut self, channel: u32, outcome: Outcome) -> Result<()> {
        self.alive()?;

        self.mux.reply(channel, outcome)?;
        self.flush()
    }

    /// Make a _global request_, the responses being matched in order.
    pub fn global_request(&mut self, context: GlobalRequestContext) -> Result<Response<Global>> {
        self.alive()?;

        let response = self
            .mux
            .global_request(context, true)?
            .ok_or(Error::NoResponse)?;
        self.flush()?;

        Ok(response)
    }

    /// Make a _global request_ without expecting a reply.
    pub fn global_notify(&mut self, context: GlobalRequestContext) -> Result<()> {
        self.alive()?;

        self.mux.global_request(context, false)?;
        self.flush()
    }

    /// Reply to the oldest global request of the peer, see [`Event::GlobalRequest`].
    pub fn global_reply(&mut self, outcome: Global) -> Result<()> {
        self.alive()?;

        self.mux.global_reply(outcome)?;
        self.flush()
    }

    /// Initiate a key-exchange, the channel traffic being held until it completes.
    pub fn rekey(&mut self) -> Result<()> {
        let result = self.session.rekey().map_err(Error::from);

        self.check(result)
    }

    /// Disconnect from the peer with the `reason`, failing every pending request.
    pub fn disconnect(&mut self, reason: DisconnectReason, description: impl Into<String>) {
        self.session.disconnect(reason, description);
        self.teardown();
    }

    /// Tear the connection down after the transport was lost,
    /// failing every pending request with [`Error::NoResponse`].
    pub fn shutdown(&mut self) {
        if !self.session.is_disconnected() {
            self.session
                .disconnect(DisconnectReason::ConnectionLost, "Transport lost");
        }

        self.teardown();
    }

    fn alive(&self) -> Result<()> {
        match self.session.disconnect_reason() {
            Some(reason) => Err(sesh::Error::Disconnected(reason).into()),
            None => Ok(()),
        }
    }

    /// Hand the multiplexer's messages to the session, once authenticated.
    fn flush(&mut self) -> Result<()> {
        if self.auth.is_authenticated() {
            for payload in self.mux.take_outbox() {
                self.session.send_payload(payload)?;
            }
        }

        Ok(())
    }

    fn process(&mut self) -> Result<()> {
        if !self.verifying {
            if let Some(key) = self.session.pending_host_key() {
                self.verifying = true;
                self.mux.emit(Event::HostKey(key.clone()));
            }
        }

        if !self.started && self.session.is_ready() {
            self.started = true;
            self.auth.start(&mut self.session)?;
        }

        while let Some((seq, packet)) = self.session.poll_packet() {
            self.dispatch(seq, packet)?;
        }

        self.flush()
    }

    fn dispatch(&mut self, seq: u32, packet: Packet) -> Result<()> {
        match packet.magic() {
            Some(5 | 6 | 50..=79) => {
                let authenticated = self.auth.is_authenticated();

                if let Some(event) = self.auth.handle(&mut self.session, &packet)? {
                    self.mux.emit(event);
                }

                if !authenticated && self.auth.is_authenticated() {
                    tracing::debug!(
                        "Connection authenticated, {} channels opened in the meantime",
                        self.mux.channels()
                    );
                }

                Ok(())
            }
            Some(80..=127) => {
                if !self.auth.is_authenticated() {
                    return Err(Error::Unauthenticated);
                }

                self.mux.handle(Inbound::try_from(&packet)?)
            }
            magic => {
                tracing::warn!("Unhandled message {magic:?} from peer");

                self.session.send(&Unimplemented { seq })?;

                Ok(())
            }
        }
    }

    /// Tear the connection down on fatal errors.
    fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if !self.session.is_disconnected() {
                tracing::error!("Fatal connection error: {err}");

                self.session.disconnect(err.reason(), err.to_string());
            }
        }

        if self.session.is_disconnected() {
            self.teardown();
        }

        result
    }

    fn teardown(&mut self) {
        if !self.torn {
            self.torn = true;
            self.mux.shutdown();

            let reason = self
                .session
                .disconnect_reason()
                .unwrap_or(DisconnectReason::ByApplication);

            tracing::debug!("Connection torn down with {reason:?}");

            self.mux.emit(Event::Disconnected(reason));
        }
    }
}
