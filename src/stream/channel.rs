use std::{
    pin::Pin,
    task::{Context, Poll, ready},
};
use tokio::sync::mpsc;

use super::{PartStream, StreamError};
use crate::part::Part;

/// Create a bounded part channel.
///
/// The capacity is the demand window: [`PartSender::send`] waits whenever
/// `capacity` parts are buffered and the consumer has not pulled any of them
/// yet, so the producer is paced by the consumer.
///
/// The stream completes normally when the sender is dropped, or with an error
/// via [`PartSender::fail`]. Dropping the receiver cancels the stream, which
/// the producer observes as failing sends.
pub fn channel(capacity: usize) -> (PartSender, PartReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (PartSender { tx }, PartReceiver { rx, done: false })
}

// ===== PartSender =====

/// Producing half of a part [`channel`].
#[derive(Debug)]
pub struct PartSender {
    tx: mpsc::Sender<Result<Part, StreamError>>,
}

impl PartSender {
    /// Send the next part, waiting until the consumer signals demand.
    ///
    /// Fails when the consumer is gone, handing the undelivered part back.
    pub async fn send(&self, part: Part) -> Result<(), SendError> {
        match self.tx.send(Ok(part)).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(item)) => Err(SendError { part: item.ok() }),
        }
    }

    /// Terminate the stream with a producer failure.
    ///
    /// Consumes the sender, a failed stream emits nothing further.
    pub async fn fail(self, error: StreamError) -> Result<(), SendError> {
        match self.tx.send(Err(error)).await {
            Ok(()) => Ok(()),
            Err(_) => Err(SendError { part: None }),
        }
    }

    /// Returns `true` if the consumer side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Completes when the consumer side is gone.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

// ===== PartReceiver =====

/// Consuming half of a part [`channel`].
#[derive(Debug)]
pub struct PartReceiver {
    rx: mpsc::Receiver<Result<Part, StreamError>>,
    done: bool,
}

impl PartStream for PartReceiver {
    fn poll_part(
        self: Pin<&mut Self>,
        cx: &mut Context,
    ) -> Poll<Option<Result<Part, StreamError>>> {
        let me = self.get_mut();

        if me.done {
            return Poll::Ready(None);
        }

        match ready!(me.rx.poll_recv(cx)) {
            Some(Ok(part)) => Poll::Ready(Some(Ok(part))),
            Some(Err(error)) => {
                // failure is terminal, drop anything the producer buffered
                me.done = true;
                me.rx.close();
                Poll::Ready(Some(Err(error)))
            },
            None => {
                me.done = true;
                Poll::Ready(None)
            },
        }
    }
}

// ===== SendError =====

/// Error returned from [`PartSender`] when the consumer side is gone.
pub struct SendError {
    part: Option<Part>,
}

impl SendError {
    /// Returns the part that could not be delivered, if any.
    pub fn into_part(self) -> Option<Part> {
        self.part
    }
}

impl std::error::Error for SendError { }

impl std::fmt::Debug for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SendError").field(&self.part).finish()
    }
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("part stream receiver dropped")
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;
    use std::future::poll_fn;

    use super::*;

    #[tokio::test]
    async fn complete_on_sender_drop() {
        let (tx, mut rx) = channel(4);

        tx.send(Part::data(Bytes::from_static(b"one"))).await.unwrap();
        tx.send(Part::data(Bytes::from_static(b"two"))).await.unwrap();
        drop(tx);

        let part = poll_fn(|cx| Pin::new(&mut rx).poll_part(cx)).await;
        assert_eq!(part.unwrap().unwrap().as_data().map(|b| &b[..]), Some(&b"one"[..]));
        let part = poll_fn(|cx| Pin::new(&mut rx).poll_part(cx)).await;
        assert_eq!(part.unwrap().unwrap().as_data().map(|b| &b[..]), Some(&b"two"[..]));
        assert!(poll_fn(|cx| Pin::new(&mut rx).poll_part(cx)).await.is_none());
        // exhausted stream stays exhausted
        assert!(poll_fn(|cx| Pin::new(&mut rx).poll_part(cx)).await.is_none());
    }

    #[tokio::test]
    async fn failure_is_terminal() {
        let (tx, mut rx) = channel(4);

        tx.send(Part::data(Bytes::from_static(b"one"))).await.unwrap();
        tx.fail(StreamError::new("framing error")).await.unwrap();

        let part = poll_fn(|cx| Pin::new(&mut rx).poll_part(cx)).await;
        assert!(part.unwrap().is_ok());
        let err = poll_fn(|cx| Pin::new(&mut rx).poll_part(cx)).await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "framing error");
        assert!(poll_fn(|cx| Pin::new(&mut rx).poll_part(cx)).await.is_none());
    }

    #[tokio::test]
    async fn send_fails_after_receiver_drop() {
        let (tx, rx) = channel(4);
        drop(rx);

        assert!(tx.is_closed());
        let err = tx.send(Part::data(Bytes::from_static(b"late"))).await.unwrap_err();
        assert!(err.into_part().is_some());
    }
}
