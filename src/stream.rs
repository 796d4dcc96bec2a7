//! Request part source.
//!
//! ## Core
//!
//! - [`PartStream`] the trait that represent a single-consumer source of
//!   request [`Part`]s
//! - [`StreamError`] an opaque, producer-defined stream failure
//!
//! ## Implementation
//!
//! - [`channel`] a bounded producer/consumer pair backed by [`tokio::sync::mpsc`]
mod channel;

pub use channel::{PartReceiver, PartSender, SendError, channel};

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use crate::part::Part;

/// A single-consumer source of request [`Part`]s.
///
/// Polling is the demand signal: the producer emits the next part only in
/// response to a poll, and parts are delivered in arrival order. The stream
/// completes exactly once, either with `None` (normal end of stream) or with
/// an error, and must not be polled afterwards. Dropping the stream cancels
/// it, which the producer may observe to stop emitting.
///
/// Request metadata never travels through the part sequence, it is held
/// separately by [`Request`].
///
/// [`Request`]: crate::Request
pub trait PartStream {
    /// Tries to pull the next part from the stream.
    fn poll_part(
        self: Pin<&mut Self>,
        cx: &mut Context,
    ) -> Poll<Option<Result<Part, StreamError>>>;

    /// Returns the bounds on the remaining body length in bytes.
    ///
    /// The first element is the lower bound, the second the upper bound, with
    /// [`None`] meaning no known upper bound.
    fn size_hint(&self) -> (u64, Option<u64>) {
        (0, None)
    }
}

// ===== StreamError =====

/// Producer-defined stream failure.
///
/// The adapter propagates this verbatim, it never retries or rewraps the
/// underlying failure. Cheaply cloneable so that a memoized aggregation can
/// replay the same failure.
#[derive(Clone)]
pub struct StreamError {
    inner: Arc<dyn std::error::Error + Send + Sync>,
}

impl StreamError {
    /// Create a stream error from any error value.
    pub fn new(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self { inner: Arc::from(error.into()) }
    }

    /// Returns reference to the underlying error.
    pub fn get_ref(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.inner
    }
}

impl From<std::io::Error> for StreamError {
    #[inline]
    fn from(v: std::io::Error) -> Self {
        Self::new(v)
    }
}

impl std::error::Error for StreamError { }

impl std::fmt::Debug for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StreamError").field(&self.inner).finish()
    }
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}
