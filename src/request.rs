//! Streaming HTTP Request.
use pin_project_lite::pin_project;
use std::{
    mem,
    pin::Pin,
    task::{Context, Poll},
};

use crate::{
    aggregate::{Aggregate, AggregationOptions, ResultCell},
    error::RequestError,
    metadata::RequestMetadata,
    part::Part,
    stream::{PartStream, StreamError},
};

/// Streaming HTTP request.
///
/// Binds immutable [`RequestMetadata`] to a single-consumer [`PartStream`]
/// and offers two mutually exclusive ways to consume the part sequence:
///
/// - [`subscribe`] for incremental, part-by-part access
/// - [`aggregate`] to drain everything into an [`AggregatedRequest`]
///
/// Whichever is called first claims the stream, a later claim fails with an
/// already consumed error. [`metadata`] stays available in every state.
///
/// [`subscribe`]: Request::subscribe
/// [`aggregate`]: Request::aggregate
/// [`metadata`]: Request::metadata
/// [`AggregatedRequest`]: crate::AggregatedRequest
pub struct Request<S> {
    metadata: RequestMetadata,
    state: State<S>,
}

/// The part stream is moved out on the first claim, a second claim finds
/// only the consumed state.
enum State<S> {
    Idle(S),
    Consumed,
    Caching(ResultCell),
}

// ===== Constructor =====

impl<S> Request<S> {
    /// Create [`Request`] from [`RequestMetadata`] and a part stream.
    ///
    /// This is the only construction path, both fields are bound for the
    /// whole lifecycle.
    pub fn new(metadata: RequestMetadata, stream: S) -> Request<S> {
        Self {
            metadata,
            state: State::Idle(stream),
        }
    }
}

// ===== Ref =====

impl<S> Request<S> {
    /// Returns shared reference to the [`RequestMetadata`].
    ///
    /// Pure accessor, callable any number of times in any state.
    #[inline]
    pub fn metadata(&self) -> &RequestMetadata {
        &self.metadata
    }

    /// Returns `true` if the part sequence was already claimed.
    pub fn is_consumed(&self) -> bool {
        !matches!(self.state, State::Idle(_))
    }
}

// ===== Consume =====

impl<S> Request<S> {
    /// Claim the part sequence for incremental consumption.
    ///
    /// Fails with an already consumed error if the sequence was claimed
    /// before, by either this method or [`aggregate`].
    ///
    /// [`aggregate`]: Request::aggregate
    pub fn subscribe(&mut self) -> Result<Subscription<S>, RequestError> {
        match mem::replace(&mut self.state, State::Consumed) {
            State::Idle(stream) => Ok(Subscription { stream }),
            prev => {
                self.state = prev;
                Err(RequestError::already_consumed())
            },
        }
    }

    /// Claim the part sequence and drain it into an [`AggregatedRequest`].
    ///
    /// Returns immediately with a pending future, the drain itself runs on
    /// the executor selected in `options`. Data parts are concatenated in
    /// arrival order and the optional trailers are captured, combined with
    /// the metadata bound at construction.
    ///
    /// Dropping the returned future cancels the aggregation and the
    /// underlying stream, no partial result is ever observable.
    ///
    /// A second call fails with an already consumed error, unless the first
    /// call enabled [`cache_result`], in which case the memoized outcome is
    /// replayed without another subscription.
    ///
    /// [`AggregatedRequest`]: crate::AggregatedRequest
    /// [`cache_result`]: AggregationOptions::cache_result
    pub fn aggregate(&mut self, options: AggregationOptions) -> Aggregate<S>
    where
        S: PartStream + Send + 'static,
    {
        // options are checked before the stream is touched, so a rejected
        // call leaves the request unconsumed
        if let Err(error) = options.validate() {
            return Aggregate::ready(Err(error));
        }

        match mem::replace(&mut self.state, State::Consumed) {
            State::Idle(stream) => {
                let cell = options.cache_result.then(ResultCell::new);
                if let Some(cell) = &cell {
                    self.state = State::Caching(cell.clone());
                }
                Aggregate::drain(self.metadata.clone(), stream, options, cell)
            },
            State::Caching(cell) => {
                self.state = State::Caching(cell.clone());
                Aggregate::cached(cell)
            },
            State::Consumed => Aggregate::ready(Err(RequestError::already_consumed())),
        }
    }
}

impl<S> std::fmt::Debug for Request<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Idle(_) => "Idle",
            State::Consumed => "Consumed",
            State::Caching(_) => "Caching",
        };
        f.debug_struct("Request")
            .field("metadata", &self.metadata)
            .field("state", &state)
            .finish()
    }
}

// ===== Subscription =====

pin_project! {
    /// Exclusive subscription to a request's part sequence.
    ///
    /// Yields zero or more parts in arrival order, then exactly one terminal
    /// outcome: end of stream or a [`StreamError`]. Dropping the subscription
    /// cancels the stream.
    pub struct Subscription<S> {
        #[pin]
        stream: S,
    }
}

impl<S: PartStream> Subscription<S> {
    /// Tries to pull the next part.
    #[inline]
    pub fn poll_part(
        self: Pin<&mut Self>,
        cx: &mut Context,
    ) -> Poll<Option<Result<Part, StreamError>>> {
        self.project().stream.poll_part(cx)
    }

    /// Pull the next part from the sequence.
    #[inline]
    pub fn next_part(&mut self) -> impl Future<Output = Option<Result<Part, StreamError>>>
    where
        S: Unpin,
    {
        std::future::poll_fn(|cx| Pin::new(&mut *self).poll_part(cx))
    }
}

impl<S: PartStream> PartStream for Subscription<S> {
    fn poll_part(
        self: Pin<&mut Self>,
        cx: &mut Context,
    ) -> Poll<Option<Result<Part, StreamError>>> {
        self.project().stream.poll_part(cx)
    }

    fn size_hint(&self) -> (u64, Option<u64>) {
        self.stream.size_hint()
    }
}

impl<S: PartStream> futures_core::Stream for Subscription<S> {
    type Item = Result<Part, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().stream.poll_part(cx)
    }
}

impl<S> std::fmt::Debug for Subscription<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
