//! The transport _session_, driving the key-exchanges and carrying
//! the messages of the upper layers over the binary packet protocol.
//!
//! The [`Session`] performs no I/O by itself: bytes received from the peer
//! are handed to [`Session::feed`], and bytes to send are collected with
//! [`Session::take_output`].

use std::collections::VecDeque;

use binrw::meta::ReadMagic;
use ssh_key::PublicKey;
use ssh_packet::SshId;

use crate::{
    algorithm::kex::{Advance, Exchanged, Transcript},
    msg::{
        arch::NameList,
        encode,
        trans::{
            Disconnect, DisconnectReason, ExtInfo, Extension, Ignore, KexInit, NewKeys,
            Unimplemented,
        },
        userauth::AuthSuccess,
        Message, Packet, PacketExt,
    },
    side::{client::Verdict, private::Context, Side},
    stream::{Decoder, Encoder, Keys, Transport},
    Error, Result,
};

mod id;
use id::IdReader;

mod handshake;
use handshake::{Derived, Handshake, Stage};
pub use handshake::{Negotiated, Suite};

/// The signature algorithms advertised in `server-sig-algs`.
const SERVER_SIG_ALGS: &[&str] = &[
    "ssh-ed25519",
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "rsa-sha2-512",
    "rsa-sha2-256",
];

/// A sans-I/O SSH transport session, from either [`Side`].
#[derive(Debug)]
pub struct Session<S: Side> {
    config: S,

    reader: IdReader,
    peer_id: Option<SshId>,

    encoder: Encoder,
    decoder: Decoder,
    output: Vec<u8>,

    /// Packets for the upper layers, with their sequence number.
    inbound: VecDeque<(u32, Packet)>,

    /// Payloads from the upper layers, held during a key-exchange.
    queued: VecDeque<Vec<u8>>,

    handshake: Option<Handshake<S>>,
    negotiated: Option<Negotiated>,
    session_id: Option<Vec<u8>>,

    strict: bool,
    ready: bool,

    /// Decoding is suspended until a deferred host key verification completes.
    halted: bool,

    /// The next key-exchange packet is from a wrong guess of the peer.
    skip_next: bool,

    /// The user authentication succeeded, starting the delayed compression.
    authenticated: bool,

    /// The peer asked for `SSH_MSG_EXT_INFO`.
    ext_info: bool,
    extensions: Vec<(String, Vec<u8>)>,

    disconnected: Option<DisconnectReason>,
}

impl<S: Side> Session<S> {
    /// Create a session from the `config`, queuing our identification
    /// and our first `SSH_MSG_KEXINIT` in the output.
    pub fn new(config: S) -> Result<Self> {
        let mut output = Vec::new();

        for line in config.greeting() {
            output.extend_from_slice(line.as_bytes());
            output.extend_from_slice(b"\r\n");
        }
        output.extend_from_slice(&id::to_line(config.id()));

        let mut session = Self {
            reader: IdReader::new(S::CLIENT),
            peer_id: None,
            encoder: Default::default(),
            decoder: Default::default(),
            output,
            inbound: Default::default(),
            queued: Default::default(),
            handshake: None,
            negotiated: None,
            session_id: None,
            strict: false,
            ready: false,
            halted: false,
            skip_next: false,
            authenticated: false,
            ext_info: false,
            extensions: Default::default(),
            disconnected: None,
            config,
        };

        session.kexinit()?;

        Ok(session)
    }

    /// The configuration of this session.
    pub fn config(&self) -> &S {
        &self.config
    }

    /// The identification of the peer, once received.
    pub fn peer_id(&self) -> Option<&SshId> {
        self.peer_id.as_ref()
    }

    /// The greeting lines the server sent before its identification.
    pub fn greeting(&self) -> &[String] {
        self.reader.greeting()
    }

    /// The session identifier, fixed by the first key-exchange.
    pub fn session_id(&self) -> Option<&[u8]> {
        self.session_id.as_deref()
    }

    /// The algorithms negotiated by the last completed key-exchange.
    pub fn algorithms(&self) -> Option<&Negotiated> {
        self.negotiated.as_ref()
    }

    /// Whether the strict key-exchange is in effect.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Whether the first key-exchange completed, and no other is running.
    pub fn is_ready(&self) -> bool {
        self.ready && self.handshake.is_none()
    }

    /// Whether the session has been disconnected, by either side.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.is_some()
    }

    /// The reason the session was disconnected with, if it was.
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.disconnected
    }

    /// The value of an extension received in `SSH_MSG_EXT_INFO`.
    pub fn extension(&self, name: &str) -> Option<&[u8]> {
        self.extensions
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_slice())
    }

    /// The host key awaiting a deferred verification, see [`Session::verify_host`].
    pub fn pending_host_key(&self) -> Option<&PublicKey> {
        match &self.handshake {
            Some(Handshake {
                stage: Stage::Verifying(key),
                ..
            }) => Some(key),
            _ => None,
        }
    }

    /// Take the bytes to be sent to the peer.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    /// Whether bytes are waiting to be sent to the peer.
    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Take the next message for the upper layers, with its sequence number.
    pub fn poll_packet(&mut self) -> Option<(u32, Packet)> {
        self.inbound.pop_front()
    }

    /// Process bytes received from the peer.
    ///
    /// Any error is fatal to the session, and a `SSH_MSG_DISCONNECT` is queued in the output when relevant.
    pub fn feed(&mut self, data: &[u8]) -> Result<()> {
        self.alive()?;

        let result = self.receive(data);
        self.check(result)
    }

    /// Send a message to the peer, held back while a key-exchange is running.
    pub fn send<T: Message>(&mut self, message: &T) -> Result<()> {
        self.alive()?;

        tracing::trace!("-> {message:?}");

        self.send_payload(encode(message)?)
    }

    /// Send an already encoded message `payload`, see [`Session::send`].
    pub fn send_payload(&mut self, payload: Vec<u8>) -> Result<()> {
        self.alive()?;

        if self.is_ready() {
            let result = self.write(&payload).and_then(|_| self.rekey_if_needed());
            self.check(result)
        } else {
            self.queued.push_back(payload);

            Ok(())
        }
    }

    /// Initiate a key-exchange, if none is already running.
    pub fn rekey(&mut self) -> Result<()> {
        self.alive()?;

        if self.handshake.is_none() {
            let result = self.kexinit();
            self.check(result)?;
        }

        Ok(())
    }

    /// Resolve a deferred host key verification, see [`Verdict::Defer`].
    pub fn verify_host(&mut self, accept: bool) -> Result<()> {
        self.alive()?;

        let result = self.resolve(accept);
        self.check(result)
    }

    /// Disconnect from the peer, with the `reason` and a `description`.
    pub fn disconnect(&mut self, reason: DisconnectReason, description: impl Into<String>) {
        if self.disconnected.is_none() {
            let description: String = description.into();
            tracing::debug!("Disconnecting with {reason:?}: {description}");

            let message = Disconnect {
                reason,
                description: description.into(),
                language: Default::default(),
            };

            // Best effort, the session is torn down regardless.
            if let Err(err) = encode(&message).and_then(|payload| self.write(&payload)) {
                tracing::debug!("Unable to send the disconnect message: {err}");
            }

            self.disconnected = Some(reason);
        }
    }

    fn alive(&self) -> Result<()> {
        match self.disconnected {
            Some(reason) => Err(Error::Disconnected(reason)),
            None => Ok(()),
        }
    }

    /// Tear the session down on errors.
    fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            match err {
                Error::Disconnected(reason) => self.disconnected = Some(*reason),
                Error::Io(_) => self.disconnected = Some(DisconnectReason::ConnectionLost),
                err => {
                    tracing::error!("Fatal session error: {err}");

                    self.disconnect(err.reason(), err.to_string());
                }
            }
        }

        result
    }

    fn write(&mut self, payload: &[u8]) -> Result<()> {
        let packet = self.encoder.encode(payload)?;
        self.output.extend_from_slice(&packet);

        if !S::CLIENT && !self.authenticated && payload.first() == Some(&AuthSuccess::MAGIC) {
            self.authenticated()?;
        }

        Ok(())
    }

    /// Start the compression delayed until the user authentication, in both directions.
    fn authenticated(&mut self) -> Result<()> {
        tracing::debug!("User authenticated, starting the delayed compression if any");

        self.authenticated = true;
        self.encoder.enable_compression()?;
        self.decoder.enable_compression();

        Ok(())
    }

    fn receive(&mut self, data: &[u8]) -> Result<()> {
        if self.peer_id.is_none() {
            match self.reader.feed(data)? {
                Some((id, rest)) => {
                    tracing::debug!("Peer identified as `{id}`");

                    self.peer_id = Some(id);
                    self.decoder.feed(&rest);
                }
                None => return Ok(()),
            }
        } else {
            self.decoder.feed(data);
        }

        self.process()
    }

    fn process(&mut self) -> Result<()> {
        while !self.halted {
            let Some((seq, packet)) = self.decoder.decode()? else {
                break;
            };

            self.dispatch(seq, packet)?;
        }

        self.rekey_if_needed()
    }

    fn dispatch(&mut self, seq: u32, packet: Packet) -> Result<()> {
        let magic = packet
            .magic()
            .ok_or(Error::Malformed("empty payload"))?;

        tracing::trace!("<-({seq}) message #{magic}");

        if self.strict && !self.ready && !matches!(magic, 1 | 20 | 21 | 30..=49) {
            return Err(Error::StrictKex(magic));
        }

        match magic {
            Disconnect::MAGIC => {
                let message: Disconnect = packet.to()?;
                tracing::warn!(
                    "Peer disconnected with {:?}: {}",
                    message.reason,
                    &*message.description
                );

                Err(Error::Disconnected(message.reason))
            }
            Ignore::MAGIC => Ok(()),
            Unimplemented::MAGIC => {
                let message: Unimplemented = packet.to()?;
                tracing::warn!("Peer did not implement our message #{}", message.seq);

                Ok(())
            }
            4 => {
                let message: crate::msg::trans::Debug = packet.to()?;
                tracing::debug!("Peer debug message: {}", &*message.message);

                Ok(())
            }
            ExtInfo::MAGIC => {
                let message: ExtInfo = packet.to()?;
                tracing::debug!(
                    "Peer extensions: {:?}",
                    message
                        .extensions
                        .iter()
                        .map(|extension| &*extension.name)
                        .collect::<Vec<_>>()
                );

                self.extensions = message
                    .extensions
                    .into_iter()
                    .map(|extension| (extension.name.to_string(), extension.value.into_vec()))
                    .collect();

                Ok(())
            }
            KexInit::MAGIC => self.on_kexinit(seq, packet),
            NewKeys::MAGIC => self.on_newkeys(packet),
            30..=49 => self.on_exchange(packet),
            5 | 6 | 50..=255 => {
                if !self.ready
                    || self
                        .handshake
                        .as_ref()
                        .is_some_and(Handshake::peer_exchanging)
                {
                    return Err(Error::UnexpectedMessage(magic));
                }

                self.inbound.push_back((seq, packet));

                if S::CLIENT && !self.authenticated && magic == AuthSuccess::MAGIC {
                    self.authenticated()?;
                }

                Ok(())
            }
            _ => {
                tracing::warn!("Unimplemented message #{magic} from peer");

                self.write(&encode(&Unimplemented { seq })?)
            }
        }
    }

    /// Send our `SSH_MSG_KEXINIT`, starting a key-exchange.
    fn kexinit(&mut self) -> Result<()> {
        let mut kexinit = self.config.kexinit();

        if self.session_id.is_none() && self.config.extensions() {
            let (ext, strict) = if S::CLIENT {
                (handshake::EXT_INFO_C, handshake::KEX_STRICT_C)
            } else {
                (handshake::EXT_INFO_S, handshake::KEX_STRICT_S)
            };

            let names = kexinit
                .kex_algorithms
                .into_iter()
                .chain([ext, strict])
                .map(String::from)
                .collect::<Vec<_>>();
            kexinit.kex_algorithms = NameList::new(&names);
        }

        tracing::debug!("Starting key-exchange procedure");
        tracing::trace!("-> {kexinit:?}");

        let payload = encode(&kexinit)?;
        self.write(&payload)?;
        self.handshake = Some(Handshake::new(kexinit, payload));

        Ok(())
    }

    fn on_kexinit(&mut self, seq: u32, packet: Packet) -> Result<()> {
        if self.handshake.is_none() {
            tracing::debug!("Peer initiated a key-exchange");

            self.kexinit()?;
        }

        let peer: KexInit = packet.to()?;
        let first = self.session_id.is_none();
        let contains = |list: &NameList, name: &str| list.into_iter().any(|item| item == name);

        let Some(handshake) = self.handshake.as_mut() else {
            return Err(Error::KexError);
        };
        if handshake.peer.is_some() {
            return Err(Error::UnexpectedMessage(KexInit::MAGIC));
        }

        let (client, server) = if S::CLIENT {
            (&handshake.kexinit, &peer)
        } else {
            (&peer, &handshake.kexinit)
        };

        let negotiated = Negotiated::negotiate(client, server)?;
        tracing::debug!("Negotiated algorithms: {negotiated:?}");

        if first && self.config.extensions() {
            let (strict, ext) = if S::CLIENT {
                (handshake::KEX_STRICT_S, None)
            } else {
                (handshake::KEX_STRICT_C, Some(handshake::EXT_INFO_C))
            };

            if contains(&peer.kex_algorithms, strict) {
                if seq != 0 {
                    return Err(Error::StrictKex(KexInit::MAGIC));
                }

                tracing::debug!("Strict key-exchange is in effect");
                self.strict = true;
            }

            self.ext_info = ext.is_some_and(|ext| contains(&peer.kex_algorithms, ext));
        }

        if *peer.first_kex_packet_follows && negotiated.guessed_wrong(&peer) {
            tracing::debug!("Peer guessed the key-exchange wrong, ignoring its next packet");

            self.skip_next = true;
        }

        let (exchange, payload) = self.config.begin(&negotiated.kex)?;

        handshake.peer = Some(packet.payload);
        handshake.negotiated = Some(negotiated);
        handshake.stage = Stage::Exchanging(exchange);

        if let Some(payload) = payload {
            self.write(&payload)?;
        }

        Ok(())
    }

    fn on_exchange(&mut self, packet: Packet) -> Result<()> {
        if self.skip_next {
            self.skip_next = false;

            return Ok(());
        }

        let magic = packet.magic().unwrap_or_default();
        let Some(Handshake {
            own,
            peer: Some(peer),
            negotiated: Some(negotiated),
            stage,
            ..
        }) = self.handshake.as_mut()
        else {
            return Err(Error::UnexpectedMessage(magic));
        };
        let Stage::Exchanging(exchange) = std::mem::replace(stage, Stage::Switching) else {
            return Err(Error::UnexpectedMessage(magic));
        };
        let Some(peer_id) = &self.peer_id else {
            return Err(Error::UnexpectedMessage(magic));
        };

        let (own_id, peer_id) = (self.config.id().to_string(), peer_id.to_string());
        let ((v_c, i_c), (v_s, i_s)) = if S::CLIENT {
            ((&own_id, own), (&peer_id, peer))
        } else {
            ((&peer_id, peer), (&own_id, own))
        };

        let context = Context {
            kex: &negotiated.kex,
            key: &negotiated.key,
            transcript: Transcript {
                v_c: v_c.as_bytes(),
                v_s: v_s.as_bytes(),
                i_c,
                i_s,
            },
        };

        match self.config.advance(exchange, &context, &packet)? {
            Advance::Continue(exchange, payload) => {
                *stage = Stage::Exchanging(exchange);

                self.write(&payload)
            }
            Advance::Done(exchanged, payload) => {
                if let Some(payload) = payload {
                    self.write(&payload)?;
                }

                self.exchanged(exchanged)
            }
        }
    }

    /// Derive the keys from a completed exchange and decide on the host key.
    fn exchanged(&mut self, exchanged: Exchanged) -> Result<()> {
        let Some(handshake) = self.handshake.as_mut() else {
            return Err(Error::KexError);
        };
        let Some(negotiated) = &handshake.negotiated else {
            return Err(Error::KexError);
        };

        let session_id = self
            .session_id
            .get_or_insert_with(|| exchanged.hash.clone());

        let alg = negotiated.kex.hash();
        let (c2s, s2c) = (&negotiated.client_to_server, &negotiated.server_to_client);
        let client = Keys::as_client(
            alg,
            exchanged.secret(),
            &exchanged.hash,
            session_id,
            &c2s.cipher,
            &c2s.hmac,
        );
        let server = Keys::as_server(
            alg,
            exchanged.secret(),
            &exchanged.hash,
            session_id,
            &s2c.cipher,
            &s2c.hmac,
        );

        let outbound = |suite: &Suite, keys| {
            Transport::encryptor(suite.cipher.clone(), suite.hmac.clone(), suite.compress.clone(), keys)
        };
        let inbound = |suite: &Suite, keys| {
            Transport::decryptor(suite.cipher.clone(), suite.hmac.clone(), suite.compress.clone(), keys)
        };

        let (tx, rx) = if S::CLIENT {
            (outbound(c2s, client)?, inbound(s2c, server)?)
        } else {
            (outbound(s2c, server)?, inbound(c2s, client)?)
        };

        handshake.derived = Some(Derived {
            tx: Some(tx),
            rx: Some(rx),
        });

        match self.config.verdict(&exchanged.host_key) {
            Verdict::Accept => self.switch(),
            Verdict::Reject => Err(Error::HostKeyRejected),
            Verdict::Defer => {
                tracing::debug!("Host key verification has been deferred");

                handshake.stage = Stage::Verifying(exchanged.host_key);

                Ok(())
            }
        }
    }

    fn resolve(&mut self, accept: bool) -> Result<()> {
        if self.pending_host_key().is_none() {
            return Err(Error::KexError);
        }
        if !accept {
            return Err(Error::HostKeyRejected);
        }

        if let Some(handshake) = self.handshake.as_mut() {
            handshake.stage = Stage::Switching;
        }

        self.switch()?;

        if self.halted {
            self.halted = false;

            self.install_rx()?;
            self.process()?;
        }

        Ok(())
    }

    /// Send our `SSH_MSG_NEWKEYS` and protect the next packets with the new keys.
    fn switch(&mut self) -> Result<()> {
        let Some(tx) = self
            .handshake
            .as_mut()
            .and_then(|handshake| handshake.derived.as_mut())
            .and_then(|derived| derived.tx.take())
        else {
            return Err(Error::KexError);
        };

        self.write(&encode(&NewKeys)?)?;
        self.encoder.install(tx);
        if self.strict {
            self.encoder.reset_seq();
        }
        if self.authenticated {
            self.encoder.enable_compression()?;
        }

        if !S::CLIENT && self.ext_info && !self.ready {
            let message = ExtInfo {
                extensions: vec![Extension {
                    name: "server-sig-algs".into(),
                    value: SERVER_SIG_ALGS.join(",").into_bytes().into(),
                }],
            };

            self.write(&encode(&message)?)?;
        }

        if let Some(handshake) = self.handshake.as_mut() {
            handshake.sent = true;
        }

        self.complete()
    }

    fn on_newkeys(&mut self, _: Packet) -> Result<()> {
        match &self.handshake {
            Some(Handshake {
                stage: Stage::Verifying(_),
                ..
            }) => {
                // The next packets are protected by keys we cannot install yet.
                self.halted = true;

                Ok(())
            }
            Some(Handshake {
                stage: Stage::Switching,
                derived: Some(_),
                ..
            }) => self.install_rx(),
            _ => Err(Error::UnexpectedMessage(NewKeys::MAGIC)),
        }
    }

    fn install_rx(&mut self) -> Result<()> {
        let Some(rx) = self
            .handshake
            .as_mut()
            .and_then(|handshake| handshake.derived.as_mut())
            .and_then(|derived| derived.rx.take())
        else {
            return Err(Error::UnexpectedMessage(NewKeys::MAGIC));
        };

        self.decoder.install(rx);
        if self.strict {
            self.decoder.reset_seq();
        }
        if self.authenticated {
            self.decoder.enable_compression();
        }

        if let Some(handshake) = self.handshake.as_mut() {
            handshake.received = true;
        }

        self.complete()
    }

    /// Conclude the key-exchange once both sides switched keys, and release held messages.
    fn complete(&mut self) -> Result<()> {
        if !self.handshake.as_ref().is_some_and(Handshake::is_complete) {
            return Ok(());
        }

        if let Some(handshake) = self.handshake.take() {
            self.negotiated = handshake.negotiated;
        }

        self.ready = true;

        tracing::debug!(
            "Key-exchange success, negotiated algorithms: {:?}",
            self.negotiated
        );

        while let Some(payload) = self.queued.pop_front() {
            self.write(&payload)?;
        }

        Ok(())
    }

    fn rekey_if_needed(&mut self) -> Result<()> {
        let rekey = self.config.rekey();

        let exhausted = self.encoder.bytes() >= rekey.bytes
            || self.decoder.bytes() >= rekey.bytes
            || self.encoder.packets() >= rekey.packets
            || self.decoder.packets() >= rekey.packets;

        if self.is_ready() && exhausted {
            tracing::debug!("Rekey threshold reached");

            self.kexinit()?;
        }

        Ok(())
    }
}
