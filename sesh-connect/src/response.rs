//! One-shot result slots, correlating requests with the peer's responses.

use crate::{Error, Result};

/// The eventual outcome of a request to the peer.
///
/// The response is fulfilled exactly once, either by the peer's reply or with
/// [`Error::NoResponse`] when the channel or the session is torn down first.
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

/// The fulfilling end of a [`Response`], dropping it fails the response.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_once() {
        let (pending, response) = Pending::pair();

        assert!(response.try_take().is_none());

        pending.resolve(Ok(42));

        assert!(response.is_ready());
        assert!(matches!(response.try_take(), Some(Ok(42))));
        assert!(matches!(response.try_take(), Some(Err(Error::NoResponse))));
    }

    #[test]
    fn dropping_fails_with_no_response() {
        let (pending, response) = Pending::<()>::pair();

        drop(pending);

        assert!(matches!(response.try_take(), Some(Err(Error::NoResponse))));
    }

    #[async_std::test]
    async fn awaits_the_outcome() {
        let (pending, response) = Pending::pair();

        async_std::task::spawn(async move { pending.resolve(Ok("done")) });

        assert_eq!(response.recv().await.unwrap(), "done");
    }
}
