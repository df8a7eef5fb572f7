//! Binding of the protocol endpoints to a `session` channel of a [`Connect`].
//!
//! Neither side performs I/O, so the application calls [`exchange`] whenever the
//! channel reports data, or after issuing requests and replies.

use sesh_connect::{
    auth::Side,
    channel::{ChannelRequestContext, Outcome},
    connect::Connect,
};

use crate::{Client, Result, Server};

/// The name of the subsystem on the `session` channel.
pub const SUBSYSTEM: &str = "sftp";

/// One end of the protocol, exchanging bytes over a channel.
pub trait Endpoint {
    /// Process bytes received from the peer.
    fn feed(&mut self, bytes: &[u8]) -> Result<()>;

    /// Take the bytes to be sent to the peer.
    fn take_output(&mut self) -> Vec<u8>;

    /// Tear the endpoint down, once the channel is gone.
    fn shutdown(&mut self);
}

impl Endpoint for Client {
    fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        Client::feed(self, bytes)
    }

    fn take_output(&mut self) -> Vec<u8> {
        Client::take_output(self)
    }

    fn shutdown(&mut self) {
        Client::shutdown(self)
    }
}

impl Endpoint for Server {
    fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        Server::feed(self, bytes)
    }

    fn take_output(&mut self) -> Vec<u8> {
        Server::take_output(self)
    }

    fn shutdown(&mut self) {
        Server::shutdown(self)
    }
}

/// Request the `sftp` subsystem on an opened `session` channel.
pub fn start<S: Side>(
    connect: &mut Connect<S>,
    channel: u32,
) -> sesh_connect::Result<sesh_connect::Response<Outcome>> {
    connect.request(
        channel,
        ChannelRequestContext::Subsystem {
            name: SUBSYSTEM.into(),
        },
    )
}

/// Whether the channel request is one for the `sftp` subsystem.
pub fn is_subsystem(context: &ChannelRequestContext) -> bool {
    matches!(context, ChannelRequestContext::Subsystem { name } if **name == *SUBSYSTEM)
}

/// Move the pending bytes both ways between the `endpoint` and the `channel`.
///
/// Errors of the endpoint are fatal to the subsystem, the channel is then closed
/// and the endpoint torn down.
pub fn exchange<S: Side>(
    connect: &mut Connect<S>,
    channel: u32,
    endpoint: &mut impl Endpoint,
) -> Result<()> {
    loop {
        let output = endpoint.take_output();
        if !output.is_empty() {
            connect.write(channel, &output)?;
        }

        let input = connect.read(channel, usize::MAX)?;
        if input.is_empty() {
            break Ok(());
        }

        if let Err(err) = endpoint.feed(&input) {
            tracing::warn!("Closing the subsystem on channel %{channel}: {err}");

            endpoint.shutdown();
            connect.close(channel)?;

            break Err(err);
        }
    }
}
