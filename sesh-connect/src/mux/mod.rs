//! The channel multiplexer, mapping channels onto the session.
//!
//! The multiplexer is sans-I/O: inbound messages are handed to [`Mux::handle`],
//! outbound payloads accumulate in an outbox drained by the [`crate::connect::Connect`].

use std::collections::VecDeque;

use binrw::meta::ReadMagic;
use sesh::msg::{connect, encode, Message};

use crate::{
    channel::{Channel, Chunk, Outcome, State},
    connect::{Config, Global},
    response::{Pending, Response},
    Error, Event, Result,
};

mod messages;
pub(crate) use messages::{Control, Data, Inbound};

mod slots;
use slots::Slots;

#[derive(Debug)]
pub(crate) struct Mux {
    config: Config,
    channels: Slots<Channel>,

    /// Our global requests awaiting a reply, and whether a bound port is expected.
    globals: VecDeque<(bool, Pending<Global>)>,

    /// Peer global requests we owe a reply to.
    global_replies: usize,

    outbox: VecDeque<Vec<u8>>,
    events: VecDeque<Event>,
}

impl Mux {
    pub fn new(config: Config) -> Self {
        Self {
            channels: Slots::new(config.channels),
            config,
            globals: Default::default(),
            global_replies: 0,
            outbox: Default::default(),
            events: Default::default(),
        }
    }

    pub fn channel(&self, id: u32) -> Option<&Channel> {
        self.channels.get(id)
    }

    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push_back(event);
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn take_outbox(&mut self) -> impl Iterator<Item = Vec<u8>> + '_ {
        self.outbox.drain(..)
    }

    fn send<T: Message>(&mut self, message: &T) -> Result<()> {
        tracing::trace!("-> {message:?}");

        self.outbox.push_back(encode(message)?);

        Ok(())
    }

    fn get(&mut self, id: u32) -> Result<&mut Channel> {
        self.channels.get_mut(id).ok_or(Error::UnknownChannel(id))
    }

    /// Request a new channel of type `context` to the peer.
    pub fn open(&mut self, context: connect::ChannelOpenContext) -> Result<Response<u32>> {
        let (pending, response) = Pending::pair();
        let window = self.config.window;

        let id = self
            .channels
            .insert_with(|id| Channel {
                open: Some(pending),
                ..Channel::new(id, context.name(), window)
            })
            .ok_or(Error::OpenFailure {
                reason: connect::ChannelOpenFailureReason::ResourceShortage,
                description: "Too many channels on this connection".into(),
            })?;

        tracing::debug!("Opening channel %{id} of type `{}`", context.name());

        self.send(&connect::ChannelOpen {
            sender_channel: id,
            initial_window_size: self.config.window,
            maximum_packet_size: self.config.packet,
            context,
        })?;

        Ok(response)
    }

    /// Accept a channel requested by the peer.
    pub fn accept(&mut self, id: u32) -> Result<()> {
        let (window, packet) = (self.config.window, self.config.packet);

        let channel = self.get(id)?;
        if !channel.incoming || channel.opened {
            return Err(Error::ChannelClosed);
        }
        channel.opened = true;

        let message = connect::ChannelOpenConfirmation {
            recipient_channel: channel.remote_id,
            sender_channel: id,
            initial_window_size: window,
            maximum_packet_size: packet,
        };

        tracing::debug!("Accepted channel %{id} from peer's %{}", channel.remote_id);

        self.send(&message)?;
        self.flush(id)
    }

    /// Reject a channel requested by the peer, releasing its identifier.
    pub fn reject(
        &mut self,
        id: u32,
        reason: connect::ChannelOpenFailureReason,
        description: impl Into<String>,
    ) -> Result<()> {
        let channel = self.get(id)?;
        if !channel.incoming || channel.opened {
            return Err(Error::ChannelClosed);
        }

        let description: String = description.into();
        let message = connect::ChannelOpenFailure {
            recipient_channel: channel.remote_id,
            reason,
            description: description.into(),
            language: Default::default(),
        };
        self.channels.remove(id);

        tracing::debug!("Rejected channel %{id} with {reason:?}");

        self.send(&message)
    }

    /// Queue `data` on the channel, sent as the peer's window allows.
    pub fn write(&mut self, id: u32, data_type: Option<u32>, data: &[u8]) -> Result<()> {
        let channel = self.get(id)?;
        if channel.eof_sent || channel.eof_pending || channel.close_sent || channel.close_pending
        {
            return Err(Error::ChannelClosed);
        }

        match channel.outbound.back_mut() {
            Some(chunk) if chunk.data_type == data_type => chunk.data.extend(data),
            _ => channel.outbound.push_back(Chunk {
                data_type,
                data: data.iter().copied().collect(),
            }),
        }

        self.flush(id)
    }

    /// Take up to `max` bytes received on the channel, granting window back to the peer.
    pub fn read(&mut self, id: u32, extended: bool, max: usize) -> Result<Vec<u8>> {
        let channel = self.get(id)?;

        let buffer = if extended {
            &mut channel.inbound_ext
        } else {
            &mut channel.inbound
        };
        let len = max.min(buffer.len());
        let data: Vec<u8> = buffer.drain(..len).collect();
        channel.local.release(len as u32);

        if channel.opened && !channel.close_sent && !channel.close_received {
            if let Some(bytes_to_add) = channel.local.adjustable() {
                let message = connect::ChannelWindowAdjust {
                    recipient_channel: channel.remote_id,
                    bytes_to_add,
                };

                tracing::debug!("Granting {bytes_to_add} bytes of window on channel %{id}");

                self.send(&message)?;
            }
        }

        self.release(id);

        Ok(data)
    }

    /// Signal the end of our data, once the buffered data is sent.
    pub fn eof(&mut self, id: u32) -> Result<()> {
        let channel = self.get(id)?;
        if channel.close_sent || channel.close_pending {
            return Err(Error::ChannelClosed);
        }
        channel.eof_pending = true;

        self.flush(id)
    }

    /// Close the channel, dropping any data held back by the window.
    pub fn close(&mut self, id: u32) -> Result<()> {
        let channel = self.get(id)?;
        if channel.close_sent || channel.close_pending {
            return Ok(());
        }

        if !channel.outbound.is_empty() {
            tracing::debug!(
                "Dropping {} buffered bytes on closing channel %{id}",
                channel.buffered()
            );

            channel.outbound.clear();
        }

        if channel.opened {
            let message = connect::ChannelClose {
                recipient_channel: channel.remote_id,
            };
            channel.close_sent = true;

            self.send(&message)?;
            self.finalize(id);
        } else if channel.incoming {
            self.reject(
                id,
                connect::ChannelOpenFailureReason::AdministrativelyProhibited,
                "Channel closed before being accepted",
            )?;
        } else {
            channel.close_pending = true;
        }

        Ok(())
    }

    /// Make a request on the channel, returning the response when `want_reply` is set.
    pub fn request(
        &mut self,
        id: u32,
        context: connect::ChannelRequestContext,
        want_reply: bool,
    ) -> Result<Option<Response<Outcome>>> {
        let channel = self.get(id)?;
        if !channel.opened || channel.close_sent || channel.close_received {
            return Err(Error::ChannelClosed);
        }

        let response = want_reply.then(|| {
            let (pending, response) = Pending::pair();
            channel.requests.push_back(pending);

            response
        });

        let message = connect::ChannelRequest {
            recipient_channel: channel.remote_id,
            want_reply: want_reply.into(),
            context,
        };
        self.send(&message)?;

        Ok(response)
    }

    /// Reply to the oldest peer request on the channel expecting a reply.
    pub fn reply(&mut self, id: u32, outcome: Outcome) -> Result<()> {
        let channel = self.get(id)?;
        if channel.replies == 0 {
            tracing::warn!("No request awaiting a reply on channel %{id}");

            return Ok(());
        }
        channel.replies -= 1;

        if channel.close_sent {
            return Ok(());
        }

        let recipient_channel = channel.remote_id;
        match outcome {
            Outcome::Success => self.send(&connect::ChannelSuccess { recipient_channel }),
            Outcome::Failure => self.send(&connect::ChannelFailure { recipient_channel }),
        }
    }

    /// Make a global request, returning the response when `want_reply` is set.
    pub fn global_request(
        &mut self,
        context: connect::GlobalRequestContext,
        want_reply: bool,
    ) -> Result<Option<Response<Global>>> {
        let response = want_reply.then(|| {
            let with_port = matches!(
                context,
                connect::GlobalRequestContext::TcpipForward { bind_port: 0, .. }
            );
            let (pending, response) = Pending::pair();
            self.globals.push_back((with_port, pending));

            response
        });

        self.send(&connect::GlobalRequest {
            want_reply: want_reply.into(),
            context,
        })?;

        Ok(response)
    }

    /// Reply to the oldest peer global request expecting a reply.
    pub fn global_reply(&mut self, outcome: Global) -> Result<()> {
        if self.global_replies == 0 {
            tracing::warn!("No global request awaiting a reply");

            return Ok(());
        }
        self.global_replies -= 1;

        match outcome {
            Global::Accepted { bound_port } => {
                let mut data = Vec::new();
                if let Some(port) = bound_port {
                    data.extend_from_slice(&port.to_be_bytes());
                }

                self.send(&connect::RequestSuccess { data })
            }
            Global::Rejected => self.send(&connect::RequestFailure),
        }
    }

    /// Send as much of the buffered data as the peer's window allows.
    fn flush(&mut self, id: u32) -> Result<()> {
        let channel = self.get(id)?;
        if !channel.opened || channel.close_sent || channel.close_received {
            return Ok(());
        }

        let recipient_channel = channel.remote_id;
        let mut messages = Vec::new();

        while let Some(chunk) = channel.outbound.front_mut() {
            let size = channel.remote.reserve(chunk.data.len());
            if size == 0 {
                break;
            }

            let data = chunk.data.drain(..size).collect::<Vec<u8>>().into();
            messages.push(match chunk.data_type {
                None => encode(&connect::ChannelData {
                    recipient_channel,
                    data,
                })?,
                Some(code) => encode(&connect::ChannelExtendedData {
                    recipient_channel,
                    data_type: messages::data_type(code),
                    data,
                })?,
            });

            if chunk.data.is_empty() {
                channel.outbound.pop_front();
            }
        }

        let eof = channel.eof_pending && channel.outbound.is_empty();
        if eof {
            channel.eof_pending = false;
            channel.eof_sent = true;
        }

        tracing::trace!(
            "Flushed {} data packets on channel %{id}, {} bytes of window left",
            messages.len(),
            channel.remote.size()
        );

        self.outbox.extend(messages);
        if eof {
            self.send(&connect::ChannelEof { recipient_channel })?;
        }

        Ok(())
    }

    /// Emit a single [`Event::Closed`] once the channel is closed on both sides,
    /// releasing it as soon as its received data is drained.
    fn finalize(&mut self, id: u32) {
        if let Some(channel) = self.channels.get_mut(id) {
            if channel.close_sent && channel.close_received {
                channel.abandon();

                tracing::debug!("Channel %{id} is closed");

                self.emit(Event::Closed { channel: id });
                self.release(id);
            }
        }
    }

    /// Free the identifier of a closed channel with no data left to read.
    fn release(&mut self, id: u32) {
        if matches!(
            self.channels.get(id),
            Some(channel) if channel.state() == State::Closed
                && channel.inbound.is_empty()
                && channel.inbound_ext.is_empty()
        ) {
            self.channels.remove(id);
        }
    }

    /// Process an inbound message of the connection protocol.
    pub fn handle(&mut self, message: Inbound) -> Result<()> {
        match message {
            Inbound::GlobalRequest(connect::GlobalRequest {
                want_reply,
                context,
            }) => {
                let want_reply = *want_reply;
                if want_reply {
                    self.global_replies += 1;
                }

                self.emit(Event::GlobalRequest {
                    want_reply,
                    context,
                });
            }
            Inbound::RequestSuccess(success) => match self.globals.pop_front() {
                Some((with_port, pending)) => pending.resolve(Ok(Global::Accepted {
                    bound_port: if with_port {
                        success.bound_port()
                    } else {
                        None
                    },
                })),
                None => tracing::warn!("Unmatched global request success from peer"),
            },
            Inbound::RequestFailure(_) => match self.globals.pop_front() {
                Some((_, pending)) => pending.resolve(Ok(Global::Rejected)),
                None => tracing::warn!("Unmatched global request failure from peer"),
            },

            Inbound::Open(open) => self.on_open(open)?,
            Inbound::OpenConfirmation(confirmation) => self.on_confirmation(confirmation)?,
            Inbound::OpenFailure(failure) => {
                let id = failure.recipient_channel;
                let channel = self.get(id)?;
                if channel.incoming || channel.opened {
                    return Err(Error::UnexpectedMessage(connect::ChannelOpenFailure::MAGIC));
                }

                tracing::debug!("Channel %{id} refused by peer with {:?}", failure.reason);

                if let Some(pending) = self.channels.remove(id).and_then(|channel| channel.open)
                {
                    pending.resolve(Err(Error::OpenFailure {
                        reason: failure.reason,
                        description: failure.description.to_string(),
                    }));
                }
            }

            Inbound::WindowAdjust(adjust) => {
                let id = adjust.recipient_channel;
                let channel = self.get(id)?;

                channel.remote.replenish(adjust.bytes_to_add);
                channel.adjustments += 1;

                tracing::debug!(
                    "Peer granted {} bytes of window on channel %{id}",
                    adjust.bytes_to_add
                );

                self.flush(id)?;
            }
            Inbound::Data(data) => self.on_data(data)?,
            Inbound::Eof(connect::ChannelEof { recipient_channel }) => {
                let channel = self.get(recipient_channel)?;
                channel.eof_received = true;

                self.emit(Event::Eof {
                    channel: recipient_channel,
                });
            }
            Inbound::Close(connect::ChannelClose { recipient_channel }) => {
                let id = recipient_channel;
                let channel = self.get(id)?;
                if channel.close_received {
                    return Err(Error::UnexpectedMessage(connect::ChannelClose::MAGIC));
                }
                channel.close_received = true;

                if !channel.close_sent {
                    let message = connect::ChannelClose {
                        recipient_channel: channel.remote_id,
                    };
                    channel.close_sent = true;
                    channel.outbound.clear();

                    self.send(&message)?;
                }

                self.finalize(id);
            }

            Inbound::Control(control) => {
                let id = control.recipient_channel();
                let channel = self.get(id)?;

                match control {
                    Control::Request(request) => {
                        if *request.want_reply {
                            channel.replies += 1;
                        }

                        self.emit(Event::Request {
                            channel: id,
                            want_reply: *request.want_reply,
                            context: request.context,
                        });
                    }
                    Control::Success(_) | Control::Failure(_) => {
                        let outcome = if matches!(control, Control::Success(_)) {
                            Outcome::Success
                        } else {
                            Outcome::Failure
                        };

                        match channel.requests.pop_front() {
                            Some(pending) => pending.resolve(Ok(outcome)),
                            None => tracing::warn!("Unmatched {outcome:?} on channel %{id}"),
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn on_open(&mut self, open: connect::ChannelOpen) -> Result<()> {
        let window = self.config.window;
        let inserted = self.channels.insert_with(|id| Channel {
            incoming: true,
            remote_id: open.sender_channel,
            remote: crate::channel::RemoteWindow::new(
                open.initial_window_size,
                open.maximum_packet_size,
            ),
            ..Channel::new(id, open.context.name(), window)
        });

        match inserted {
            Some(id) => {
                tracing::debug!(
                    "Peer requested channel %{id} of type `{}`",
                    open.context.name()
                );

                self.emit(Event::ChannelOpen {
                    channel: id,
                    context: open.context,
                });

                Ok(())
            }
            None => {
                tracing::warn!("Refusing channel from peer, too many channels open");

                self.send(&connect::ChannelOpenFailure {
                    recipient_channel: open.sender_channel,
                    reason: connect::ChannelOpenFailureReason::ResourceShortage,
                    description: "Too many channels on this connection".into(),
                    language: Default::default(),
                })
            }
        }
    }

    fn on_confirmation(&mut self, confirmation: connect::ChannelOpenConfirmation) -> Result<()> {
        let id = confirmation.recipient_channel;
        let channel = self.get(id)?;
        if channel.incoming || channel.opened {
            return Err(Error::UnexpectedMessage(
                connect::ChannelOpenConfirmation::MAGIC,
            ));
        }

        channel.opened = true;
        channel.remote_id = confirmation.sender_channel;
        channel.remote = crate::channel::RemoteWindow::new(
            confirmation.initial_window_size,
            confirmation.maximum_packet_size,
        );

        tracing::debug!(
            "Channel %{id} confirmed as peer's %{}",
            confirmation.sender_channel
        );

        if let Some(pending) = channel.open.take() {
            pending.resolve(Ok(id));
        }

        if channel.close_pending {
            channel.close_pending = false;

            self.close(id)
        } else {
            self.flush(id)
        }
    }

    fn on_data(&mut self, data: Data) -> Result<()> {
        let id = data.recipient_channel();
        let data_type = data.data_type();
        let channel = self.get(id)?;

        if !channel.opened || channel.eof_received || channel.close_received {
            return Err(Error::UnexpectedMessage(connect::ChannelData::MAGIC));
        }

        let payload = data.data();
        let size = u32::try_from(payload.len()).map_err(|_| Error::WindowExceeded(id))?;
        if channel.local.consume(size).is_none() {
            tracing::error!(
                "Peer sent {size} bytes on channel %{id} with {} bytes of window",
                channel.local.size()
            );

            return Err(Error::WindowExceeded(id));
        }

        if channel.close_sent {
            channel.local.release(size);

            return Ok(());
        }

        match data_type {
            None => channel.inbound.extend(payload),
            Some(_) => channel.inbound_ext.extend(payload),
        }

        self.emit(Event::Data {
            channel: id,
            data_type,
        });

        Ok(())
    }

    /// Tear every channel and pending request down, failing them with [`Error::NoResponse`].
    pub fn shutdown(&mut self) {
        self.globals.clear();

        let ids: Vec<u32> = self
            .channels
            .drain()
            .map(|mut channel| {
                channel.abandon();

                channel.id
            })
            .collect();

        for channel in ids {
            self.emit(Event::Closed { channel });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mux() -> Mux {
        Mux::new(Config {
            window: 1000,
            packet: 100,
            channels: 4,
        })
    }

    fn opened(mux: &mut Mux) -> (u32, Response<u32>) {
        let response = mux.open(connect::ChannelOpenContext::Session).unwrap();
        let id = 0;

        mux.handle(Inbound::OpenConfirmation(connect::ChannelOpenConfirmation {
            recipient_channel: id,
            sender_channel: 42,
            initial_window_size: 250,
            maximum_packet_size: 100,
        }))
        .unwrap();
        mux.take_outbox().for_each(drop);

        (id, response)
    }

    fn sent(mux: &mut Mux) -> Vec<u8> {
        mux.take_outbox().map(|payload| payload[0]).collect()
    }

    #[test]
    fn writes_respect_the_window() {
        let mut mux = mux();
        let (id, response) = opened(&mut mux);

        assert!(matches!(response.try_take(), Some(Ok(0))));

        mux.write(id, None, &[0; 1000]).unwrap();
        assert_eq!(sent(&mut mux), [94, 94, 94]);
        assert_eq!(mux.channel(id).unwrap().buffered(), 750);

        mux.handle(Inbound::WindowAdjust(connect::ChannelWindowAdjust {
            recipient_channel: id,
            bytes_to_add: 1000,
        }))
        .unwrap();
        assert_eq!(sent(&mut mux).len(), 8);
        assert_eq!(mux.channel(id).unwrap().buffered(), 0);
        assert_eq!(mux.channel(id).unwrap().remote_window(), 250);
    }

    #[test]
    fn eof_waits_for_buffered_data() {
        let mut mux = mux();
        let (id, _) = opened(&mut mux);

        mux.write(id, None, &[0; 300]).unwrap();
        mux.eof(id).unwrap();
        assert_eq!(sent(&mut mux), [94, 94, 94]);
        assert!(mux.write(id, None, b"late").is_err());

        mux.handle(Inbound::WindowAdjust(connect::ChannelWindowAdjust {
            recipient_channel: id,
            bytes_to_add: 100,
        }))
        .unwrap();
        assert_eq!(sent(&mut mux), [94, 96]);
    }

    #[test]
    fn window_is_adjusted_once_below_half() {
        let mut mux = mux();
        let (id, _) = opened(&mut mux);

        let data = |len| {
            Inbound::Data(Data::Data(connect::ChannelData {
                recipient_channel: id,
                data: vec![0; len].into(),
            }))
        };

        mux.handle(data(400)).unwrap();
        mux.read(id, false, usize::MAX).unwrap();
        assert!(sent(&mut mux).is_empty());

        mux.handle(data(200)).unwrap();
        mux.read(id, false, usize::MAX).unwrap();
        assert_eq!(sent(&mut mux), [93]);
        assert_eq!(mux.channel(id).unwrap().local_window(), 1000);

        mux.read(id, false, usize::MAX).unwrap();
        assert!(sent(&mut mux).is_empty());
    }

    #[test]
    fn window_grants_back_only_what_was_read() {
        let mut mux = mux();
        let (id, _) = opened(&mut mux);

        let data = |len| {
            Inbound::Data(Data::Data(connect::ChannelData {
                recipient_channel: id,
                data: vec![0; len].into(),
            }))
        };

        mux.handle(data(1000)).unwrap();

        for _ in 0..500 {
            assert_eq!(mux.read(id, false, 1).unwrap().len(), 1);
        }
        assert!(sent(&mut mux).is_empty());
        assert_eq!(mux.channel(id).unwrap().local_window(), 0);

        mux.read(id, false, 1).unwrap();
        assert_eq!(sent(&mut mux), [93]);

        let channel = mux.channel(id).unwrap();
        assert_eq!(channel.local_window(), 501);
        assert_eq!(channel.readable(false), 499);

        mux.handle(data(501)).unwrap();
        assert!(matches!(
            mux.handle(data(1)),
            Err(Error::WindowExceeded(0))
        ));
    }

    #[test]
    fn data_beyond_the_window_is_fatal() {
        let mut mux = mux();
        let (id, _) = opened(&mut mux);

        mux.handle(Inbound::Data(Data::Data(connect::ChannelData {
            recipient_channel: id,
            data: vec![0; 1000].into(),
        })))
        .unwrap();

        assert!(matches!(
            mux.handle(Inbound::Data(Data::Data(connect::ChannelData {
                recipient_channel: id,
                data: vec![0; 1].into(),
            }))),
            Err(Error::WindowExceeded(0))
        ));
    }

    #[test]
    fn requests_are_resolved_in_order() {
        let mut mux = mux();
        let (id, _) = opened(&mut mux);

        let first = mux
            .request(id, connect::ChannelRequestContext::Shell, true)
            .unwrap()
            .unwrap();
        let second = mux
            .request(
                id,
                connect::ChannelRequestContext::Exec {
                    command: b"true".to_vec().into(),
                },
                true,
            )
            .unwrap()
            .unwrap();

        mux.handle(Inbound::Control(Control::Failure(connect::ChannelFailure {
            recipient_channel: id,
        })))
        .unwrap();
        assert!(second.try_take().is_none());
        assert!(matches!(first.try_take(), Some(Ok(Outcome::Failure))));

        mux.handle(Inbound::Control(Control::Success(connect::ChannelSuccess {
            recipient_channel: id,
        })))
        .unwrap();
        assert!(matches!(second.try_take(), Some(Ok(Outcome::Success))));
    }

    #[test]
    fn close_is_emitted_once() {
        let mut mux = mux();
        let (id, _) = opened(&mut mux);

        mux.close(id).unwrap();
        mux.close(id).unwrap();
        assert_eq!(sent(&mut mux), [97]);

        mux.handle(Inbound::Close(connect::ChannelClose {
            recipient_channel: id,
        }))
        .unwrap();
        assert!(sent(&mut mux).is_empty());

        let closed: Vec<_> = std::iter::from_fn(|| mux.poll_event())
            .filter(|event| matches!(event, Event::Closed { .. }))
            .collect();
        assert_eq!(closed, [Event::Closed { channel: id }]);
        assert!(mux.channel(id).is_none());
        assert!(matches!(mux.close(id), Err(Error::UnknownChannel(0))));
    }

    #[test]
    fn unread_data_outlives_the_close() {
        let mut mux = mux();
        let (id, _) = opened(&mut mux);

        mux.handle(Inbound::Data(Data::Data(connect::ChannelData {
            recipient_channel: id,
            data: b"exit code follows".to_vec().into(),
        })))
        .unwrap();
        mux.handle(Inbound::Close(connect::ChannelClose {
            recipient_channel: id,
        }))
        .unwrap();
        assert_eq!(sent(&mut mux), [97]);

        let events: Vec<_> = std::iter::from_fn(|| mux.poll_event()).collect();
        assert!(matches!(events.as_slice(), [
            Event::Data { channel: 0, data_type: None },
            Event::Closed { channel: 0 },
        ]));

        assert_eq!(mux.channel(id).unwrap().state(), State::Closed);
        assert_eq!(mux.read(id, false, 4).unwrap(), b"exit");
        assert!(sent(&mut mux).is_empty());

        assert_eq!(mux.read(id, false, usize::MAX).unwrap(), b" code follows");
        assert!(mux.channel(id).is_none());
        assert!(mux.poll_event().is_none());
    }

    #[test]
    fn peer_close_is_answered() {
        let mut mux = mux();
        let (id, _) = opened(&mut mux);

        mux.handle(Inbound::Close(connect::ChannelClose {
            recipient_channel: id,
        }))
        .unwrap();

        assert_eq!(sent(&mut mux), [97]);
        assert_eq!(mux.channels(), 0);
    }

    #[test]
    fn refused_open_releases_the_id() {
        let mut mux = mux();
        let response = mux.open(connect::ChannelOpenContext::Session).unwrap();

        mux.handle(Inbound::OpenFailure(connect::ChannelOpenFailure {
            recipient_channel: 0,
            reason: connect::ChannelOpenFailureReason::ConnectFailed,
            description: "nope".into(),
            language: Default::default(),
        }))
        .unwrap();

        assert!(matches!(
            response.try_take(),
            Some(Err(Error::OpenFailure {
                reason: connect::ChannelOpenFailureReason::ConnectFailed,
                ..
            }))
        ));
        assert_eq!(mux.channels(), 0);
    }

    #[test]
    fn global_requests_carry_the_bound_port() {
        let mut mux = mux();

        let forward = mux
            .global_request(
                connect::GlobalRequestContext::TcpipForward {
                    bind_address: "localhost".into(),
                    bind_port: 0,
                },
                true,
            )
            .unwrap()
            .unwrap();
        let keepalive = mux
            .global_request(connect::GlobalRequestContext::Keepalive, true)
            .unwrap()
            .unwrap();

        mux.handle(Inbound::RequestSuccess(connect::RequestSuccess {
            data: 2222u32.to_be_bytes().to_vec(),
        }))
        .unwrap();
        mux.handle(Inbound::RequestFailure(connect::RequestFailure))
            .unwrap();

        assert!(matches!(
            forward.try_take(),
            Some(Ok(Global::Accepted {
                bound_port: Some(2222)
            }))
        ));
        assert!(matches!(keepalive.try_take(), Some(Ok(Global::Rejected))));
    }

    #[test]
    fn shutdown_fails_everything() {
        let mut mux = mux();
        let (id, _) = opened(&mut mux);

        let request = mux
            .request(id, connect::ChannelRequestContext::Shell, true)
            .unwrap()
            .unwrap();
        let open = mux.open(connect::ChannelOpenContext::Session).unwrap();
        let global = mux
            .global_request(connect::GlobalRequestContext::Keepalive, true)
            .unwrap()
            .unwrap();

        mux.shutdown();

        assert!(matches!(request.try_take(), Some(Err(Error::NoResponse))));
        assert!(matches!(open.try_take(), Some(Err(Error::NoResponse))));
        assert!(matches!(global.try_take(), Some(Err(Error::NoResponse))));
        assert_eq!(mux.channels(), 0);
    }
}
