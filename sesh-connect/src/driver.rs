//! An async pump running a [`Connect`] over an I/O stream.

use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use futures_time::{future::FutureExt, time::Duration};

use crate::{auth::Side, connect::Connect, response::Response, Error, Event, Result};

const BUFFER_SIZE: usize = 64 * 1024;

/// Drive a [`Connect`] over an [`AsyncRead`] + [`AsyncWrite`] stream.
#[derive(Debug)]
pub struct Driver<IO, S: Side> {
    io: IO,
    connect: Connect<S>,
    buffer: Vec<u8>,
    timeout: Duration,
}

impl<IO, S> Driver<IO, S>
where
    IO: AsyncRead + AsyncWrite + Unpin,
    S: Side,
{
    /// Create a driver for the `connect` over the `io` stream, nothing being exchanged until stepped.
    pub fn new(io: IO, connect: Connect<S>) -> Self {
        Self {
            timeout: connect.session().config().timeout().into(),
            io,
            connect,
            buffer: vec![0; BUFFER_SIZE],
        }
    }

    /// Access the driven connection.
    pub fn connect(&mut self) -> &mut Connect<S> {
        &mut self.connect
    }

    /// Release the stream and the connection.
    pub fn into_inner(self) -> (IO, Connect<S>) {
        (self.io, self.connect)
    }

    /// Write all the pending output to the stream.
    pub async fn flush(&mut self) -> Result<()> {
        let output = self.connect.take_output();

        if !output.is_empty() {
            let result = async {
                self.io.write_all(&output).await?;
                self.io.flush().await
            }
            .timeout(self.timeout)
            .await;

            if let Err(err) = result.and_then(|result| result) {
                self.connect.shutdown();

                return Err(err.into());
            }
        }

        Ok(())
    }

    /// Flush the output, then read once from the stream and process the received bytes.
    pub async fn step(&mut self) -> Result<()> {
        self.flush().await?;

        let read = match self.io.read(&mut self.buffer).timeout(self.timeout).await {
            Ok(Ok(0)) => {
                tracing::debug!("Stream closed by the peer");

                self.connect.shutdown();

                return Err(Error::NoResponse);
            }
            Ok(Ok(read)) => read,
            Ok(Err(err)) => {
                self.connect.shutdown();

                return Err(err.into());
            }
            Err(_) => {
                self.connect.shutdown();

                return Err(Error::Timeout);
            }
        };

        self.connect.feed(&self.buffer[..read])?;
        self.flush().await
    }

    /// Step until the next event is available.
    pub async fn next_event(&mut self) -> Result<Event> {
        loop {
            if let Some(event) = self.connect.poll_event() {
                break Ok(event);
            }

            self.step().await?;
        }
    }

    /// Step until the `response` is available, other events being kept for [`Self::next_event`].
    pub async fn wait<T>(&mut self, response: Response<T>) -> Result<T> {
        loop {
            if let Some(outcome) = response.try_take() {
                break outcome;
            }

            self.step().await?;
        }
    }
}
