//! Id-correlated result slots for the file operations.

use crate::{Error, Result};

/// The eventual outcome of a file operation.
///
/// Resolved once by the server's reply, or with [`Error::NoResponse`]
/// when the subsystem is torn down first.
#[derive(Debug)]
pub struct Response<T> {
    receiver: flume::Receiver<Result<T>>,
}

impl<T> Response<T> {
    /// Take the outcome if it is already available.
    pub fn try_take(&self) -> Option<Result<T>> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(flume::TryRecvError::Empty) => None,
            Err(flume::TryRecvError::Disconnected) => Some(Err(Error::NoResponse)),
        }
    }

    /// Whether the outcome is available.
    pub fn is_ready(&self) -> bool {
        !self.receiver.is_empty() || self.receiver.is_disconnected()
    }

    /// Wait for the outcome.
    pub async fn recv(self) -> Result<T> {
        self.receiver
            .recv_async()
            .await
            .unwrap_or(Err(Error::NoResponse))
    }
}

#[derive(Debug)]
pub(crate) struct Pending<T> {
    sender: flume::Sender<Result<T>>,
}

impl<T> Pending<T> {
    pub fn pair() -> (Self, Response<T>) {
        let (sender, receiver) = flume::bounded(1);

        (Self { sender }, Response { receiver })
    }

    pub fn resolve(self, outcome: Result<T>) {
        if self.sender.send(outcome).is_err() {
            tracing::trace!("Response dropped before being resolved");
        }
    }
}

/// A response which already failed.
pub(crate) fn failed<T>(err: Error) -> Response<T> {
    let (pending, response) = Pending::pair();
    pending.resolve(Err(err));

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_responses_are_ready() {
        let response = failed::<()>(Error::Unsupported("statvfs@openssh.com"));

        assert!(response.is_ready());
        assert!(matches!(
            response.try_take(),
            Some(Err(Error::Unsupported(_)))
        ));
    }
}
