//! Session's [`Side`]s, either [`Client`] or [`Server`].

use std::{fmt::Debug, time::Duration};

use ssh_packet::SshId;

use crate::msg::trans::KexInit;

pub mod client;
use client::Client;

pub mod server;
use server::Server;

pub(crate) mod private {
    use ssh_key::PublicKey;

    use crate::{
        algorithm::{
            kex::{Advance, Transcript},
            Kex, Key,
        },
        msg::Packet,
        Result,
    };

    use super::client::Verdict;

    /// The negotiated state a key-exchange step runs in.
    pub struct Context<'c> {
        pub kex: &'c Kex,
        pub key: &'c Key,
        pub transcript: Transcript<'c>,
    }

    pub trait Sealed {
        /// Whether this side initiates the connection.
        const CLIENT: bool;

        /// The per-side state of a running key-exchange.
        type Exchange: Send;

        /// Start the key-exchange, with an optional first message to send.
        fn begin(&self, kex: &Kex) -> Result<(Self::Exchange, Option<Vec<u8>>)>;

        /// Process a key-exchange message from the peer.
        fn advance(
            &self,
            exchange: Self::Exchange,
            context: &Context<'_>,
            packet: &Packet,
        ) -> Result<Advance<Self::Exchange>>;

        /// Decide the fate of the server host key.
        fn verdict(&self, key: &PublicKey) -> Verdict;

        /// Lines to send before the identification.
        fn greeting(&self) -> &[String] {
            &[]
        }
    }

    impl Sealed for super::Client {
        const CLIENT: bool = true;

        type Exchange = crate::algorithm::kex::ClientExchange;

        fn begin(&self, kex: &Kex) -> Result<(Self::Exchange, Option<Vec<u8>>)> {
            let (exchange, payload) = kex.client_start()?;

            Ok((exchange, Some(payload)))
        }

        fn advance(
            &self,
            exchange: Self::Exchange,
            context: &Context<'_>,
            packet: &Packet,
        ) -> Result<Advance<Self::Exchange>> {
            exchange.advance(context.kex, context.key, packet, &context.transcript)
        }

        fn verdict(&self, key: &PublicKey) -> Verdict {
            self.verifier.verify(key)
        }
    }

    impl Sealed for super::Server {
        const CLIENT: bool = false;

        type Exchange = crate::algorithm::kex::ServerExchange;

        fn begin(&self, kex: &Kex) -> Result<(Self::Exchange, Option<Vec<u8>>)> {
            Ok((kex.server_start()?, None))
        }

        fn advance(
            &self,
            exchange: Self::Exchange,
            context: &Context<'_>,
            packet: &Packet,
        ) -> Result<Advance<Self::Exchange>> {
            let host = self
                .keys
                .iter()
                .find(|key| crate::algorithm::key::advertised(key) == *context.key)
                .ok_or(crate::Error::NoCommonKey)?;

            exchange.advance(context.kex, host, packet, &context.transcript)
        }

        fn verdict(&self, _: &PublicKey) -> Verdict {
            Verdict::Accept
        }

        fn greeting(&self) -> &[String] {
            &self.greeting
        }
    }
}

/// Thresholds after which the session re-keys by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rekey {
    /// Bytes sent or received in a direction.
    pub bytes: u64,

    /// Packets sent or received in a direction.
    pub packets: u64,
}

impl Default for Rekey {
    fn default() -> Self {
        Self {
            bytes: 0x40000000,
            packets: 1 << 31,
        }
    }
}

/// A side of the SSH protocol, either [`Client`] or [`Server`].
pub trait Side: private::Sealed + Debug + Send + Sync + 'static {
    /// Get the [`SshId`] for this session.
    fn id(&self) -> &SshId;

    /// Get the _timeout_ for this session.
    fn timeout(&self) -> Duration;

    /// Get the [`Rekey`] thresholds for this session.
    fn rekey(&self) -> Rekey;

    /// Whether to advertise strict key-exchange and extension negotiation.
    fn extensions(&self) -> bool;

    /// Generate a [`KexInit`] message from the config.
    fn kexinit(&self) -> KexInit;
}
