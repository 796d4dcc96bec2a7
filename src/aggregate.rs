//! Request aggregation.
//!
//! [`Request::aggregate`] drains the part sequence into an
//! [`AggregatedRequest`], a random access snapshot that outlives the
//! originating request.
//!
//! [`Request::aggregate`]: crate::Request::aggregate
use bytes::{BufMut, Bytes, BytesMut};
use http::HeaderMap;
use pin_project_lite::pin_project;
use std::{
    mem,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    task::{Context, Poll, Waker, ready},
};
use tokio::{runtime::Handle, task::JoinHandle};

use crate::{
    error::RequestError,
    log::debug,
    metadata::RequestMetadata,
    stream::PartStream,
};

// ===== AggregationOptions =====

/// Configuration for [`Request::aggregate`].
///
/// [`Request::aggregate`]: crate::Request::aggregate
#[derive(Debug, Default)]
pub struct AggregationOptions {
    pub(crate) executor: Executor,
    pub(crate) alloc: Alloc,
    pub(crate) cache_result: bool,
    pub(crate) length_limit: Option<u64>,
}

impl AggregationOptions {
    /// Create options with the defaults: inline executor, contiguous
    /// allocation, no caching, no length limit.
    pub fn new() -> AggregationOptions {
        <_>::default()
    }

    /// Select where the drain runs.
    pub fn executor(mut self, executor: Executor) -> Self {
        self.executor = executor;
        self
    }

    /// Select how body bytes are buffered.
    pub fn alloc(mut self, alloc: Alloc) -> Self {
        self.alloc = alloc;
        self
    }

    /// Memoize the outcome, success or failure, so repeated aggregate calls
    /// replay it instead of failing with an already consumed error.
    ///
    /// Incompatible with [`Alloc::Supplied`], a caller-owned buffer cannot
    /// be handed out twice.
    pub fn cache_result(mut self, cache: bool) -> Self {
        self.cache_result = cache;
        self
    }

    /// Cap the total body size in bytes.
    ///
    /// Exceeding the cap fails the aggregation and discards everything
    /// accumulated so far.
    pub fn length_limit(mut self, limit: u64) -> Self {
        self.length_limit = Some(limit);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), RequestError> {
        if self.cache_result && matches!(self.alloc, Alloc::Supplied(_)) {
            return Err(RequestError::invalid_options(
                "cannot cache a caller-supplied buffer",
            ));
        }
        Ok(())
    }
}

/// Where the aggregation drain runs.
#[derive(Debug, Default)]
pub enum Executor {
    /// Drive the drain from wherever the returned future is polled.
    #[default]
    Inline,
    /// Spawn the drain eagerly on the given runtime.
    ///
    /// The returned future awaits the spawned task and aborts it when
    /// dropped.
    Runtime(Handle),
}

/// How body bytes are buffered during aggregation.
#[derive(Debug, Default)]
pub enum Alloc {
    /// Concatenate into a fresh buffer, pre-sized from the stream's size
    /// hint.
    #[default]
    Contiguous,
    /// Accumulate into a caller-supplied buffer.
    Supplied(BytesMut),
}

// ===== AggregatedRequest =====

/// Fully materialized request snapshot.
///
/// Combines the metadata bound at request construction with the concatenated
/// body and the optional trailers. Independent of the originating request,
/// and cheap to clone.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRequest {
    metadata: RequestMetadata,
    body: Bytes,
    trailers: Option<HeaderMap>,
}

impl AggregatedRequest {
    /// Returns shared reference to the [`RequestMetadata`].
    #[inline]
    pub fn metadata(&self) -> &RequestMetadata {
        &self.metadata
    }

    /// Returns shared reference to the body bytes.
    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns shared reference to the trailers, if any arrived.
    #[inline]
    pub fn trailers(&self) -> Option<&HeaderMap> {
        self.trailers.as_ref()
    }

    /// Consumes self into the body bytes.
    #[inline]
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Destruct into metadata, body and trailers.
    #[inline]
    pub fn into_parts(self) -> (RequestMetadata, Bytes, Option<HeaderMap>) {
        (self.metadata, self.body, self.trailers)
    }
}

// ===== Aggregate =====

pin_project! {
    /// Future returned from [`Request::aggregate`].
    ///
    /// Resolves to exactly one of: an [`AggregatedRequest`], a failure, or a
    /// cancelled outcome. Dropping it before completion cancels the
    /// aggregation and the underlying subscription, discarding any partial
    /// accumulation.
    ///
    /// [`Request::aggregate`]: crate::Request::aggregate
    pub struct Aggregate<S> {
        #[pin]
        inner: Inner<S>,
    }
}

pin_project! {
    #[project = InnerProj]
    enum Inner<S> {
        // drive the stream directly
        Drain {
            #[pin]
            stream: S,
            buffer: BytesMut,
            trailers: Option<HeaderMap>,
            metadata: Option<RequestMetadata>,
            remaining: Option<u64>,
            publisher: Publisher,
        },
        // await a drain spawned on a runtime
        Task {
            task: AbortOnDrop,
        },
        // replay a memoized outcome
        Cached {
            cell: ResultCell,
        },
        // fast-fail paths, resolved on first poll
        Ready {
            result: Option<Result<AggregatedRequest, RequestError>>,
        },
    }
}

impl<S> Aggregate<S> {
    pub(crate) fn ready(result: Result<AggregatedRequest, RequestError>) -> Self {
        Self { inner: Inner::Ready { result: Some(result) } }
    }

    pub(crate) fn cached(cell: ResultCell) -> Self {
        Self { inner: Inner::Cached { cell } }
    }
}

impl<S: PartStream + Send + 'static> Aggregate<S> {
    pub(crate) fn drain(
        metadata: RequestMetadata,
        stream: S,
        options: AggregationOptions,
        cell: Option<ResultCell>,
    ) -> Self {
        let AggregationOptions { executor, alloc, length_limit, .. } = options;

        let buffer = match alloc {
            Alloc::Contiguous => {
                let (lower, upper) = stream.size_hint();
                let mut capacity = upper.unwrap_or(lower);
                if let Some(limit) = length_limit {
                    capacity = capacity.min(limit);
                }
                BytesMut::with_capacity(capacity as usize)
            },
            Alloc::Supplied(buffer) => buffer,
        };

        let drain = Aggregate {
            inner: Inner::Drain {
                stream,
                buffer,
                trailers: None,
                metadata: Some(metadata),
                remaining: length_limit,
                publisher: Publisher::new(cell),
            },
        };

        match executor {
            Executor::Inline => drain,
            Executor::Runtime(handle) => Aggregate {
                inner: Inner::Task { task: AbortOnDrop(handle.spawn(drain)) },
            },
        }
    }
}

impl<S: PartStream> Future for Aggregate<S> {
    type Output = Result<AggregatedRequest, RequestError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project().inner.project() {
            InnerProj::Drain {
                mut stream,
                buffer,
                trailers,
                metadata,
                remaining,
                publisher,
            } => loop {
                match ready!(stream.as_mut().poll_part(cx)) {
                    Some(Ok(part)) => match part.into_data() {
                        Ok(data) => {
                            if let Some(remaining) = remaining.as_mut() {
                                let len = data.len() as u64;
                                if len > *remaining {
                                    *remaining = 0;
                                    let result = Err(RequestError::length_limit());
                                    publisher.publish(&result);
                                    return Poll::Ready(result);
                                }
                                *remaining -= len;
                            }
                            buffer.put(data);
                        },
                        Err(part) => {
                            if let Ok(map) = part.into_trailers() {
                                match trailers.as_mut() {
                                    Some(current) => current.extend(map),
                                    None => *trailers = Some(map),
                                }
                            }
                        },
                    },
                    Some(Err(error)) => {
                        let result = Err(RequestError::from(error));
                        publisher.publish(&result);
                        return Poll::Ready(result);
                    },
                    None => {
                        debug!("request aggregated, body {} bytes", buffer.len());
                        let result = Ok(AggregatedRequest {
                            metadata: metadata.take().expect("poll after complete"),
                            body: mem::take(buffer).freeze(),
                            trailers: trailers.take(),
                        });
                        publisher.publish(&result);
                        return Poll::Ready(result);
                    },
                }
            },
            InnerProj::Task { task } => {
                Poll::Ready(match ready!(Pin::new(&mut task.0).poll(cx)) {
                    Ok(result) => result,
                    Err(error) if error.is_cancelled() => Err(RequestError::cancelled()),
                    Err(error) => std::panic::resume_unwind(error.into_panic()),
                })
            },
            InnerProj::Cached { cell } => cell.poll_result(cx),
            InnerProj::Ready { result } => {
                Poll::Ready(result.take().expect("poll after complete"))
            },
        }
    }
}

impl<S> std::fmt::Debug for Aggregate<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregate").finish_non_exhaustive()
    }
}

struct AbortOnDrop(JoinHandle<Result<AggregatedRequest, RequestError>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

// ===== ResultCell =====

/// Shared memoized aggregation outcome.
///
/// Installed in the request on the first cached aggregate call; later calls
/// park on the cell until the drain publishes the terminal outcome.
#[derive(Clone)]
pub(crate) struct ResultCell {
    inner: Arc<Mutex<CellInner>>,
}

struct CellInner {
    result: Option<Result<AggregatedRequest, RequestError>>,
    wakers: Vec<Waker>,
}

impl ResultCell {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CellInner { result: None, wakers: Vec::new() })),
        }
    }

    fn publish(&self, result: Result<AggregatedRequest, RequestError>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // first terminal outcome wins
        if inner.result.is_none() {
            inner.result = Some(result);
            for waker in inner.wakers.drain(..) {
                waker.wake();
            }
        }
    }

    fn poll_result(&self, cx: &mut Context<'_>) -> Poll<Result<AggregatedRequest, RequestError>> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match &inner.result {
            Some(result) => Poll::Ready(result.clone()),
            None => {
                if !inner.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    inner.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            },
        }
    }
}

impl std::fmt::Debug for ResultCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCell").finish_non_exhaustive()
    }
}

/// Publishes the drain outcome into the [`ResultCell`], if caching.
///
/// Dropped before completion, it publishes the cancelled outcome instead so
/// later cached calls resolve rather than hang.
struct Publisher {
    cell: Option<ResultCell>,
    done: bool,
}

impl Publisher {
    fn new(cell: Option<ResultCell>) -> Self {
        Self { cell, done: false }
    }

    fn publish(&mut self, result: &Result<AggregatedRequest, RequestError>) {
        self.done = true;
        if let Some(cell) = &self.cell {
            cell.publish(result.clone());
        }
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Some(cell) = &self.cell {
            debug!("aggregation cancelled before completion");
            cell.publish(Err(RequestError::cancelled()));
        }
    }
}

#[cfg(test)]
mod test {
    use http::{Method, Uri};
    use std::future::poll_fn;

    use super::*;
    use crate::{part::Part, request::Request, stream::{StreamError, channel}};

    fn metadata() -> RequestMetadata {
        RequestMetadata::new(Method::POST, Uri::from_static("http://example.com/upload"))
    }

    /// Poll a future exactly once.
    async fn poll_once<F: Future + Unpin>(future: &mut F) -> Poll<F::Output> {
        poll_fn(|cx| Poll::Ready(Pin::new(&mut *future).poll(cx))).await
    }

    #[tokio::test]
    async fn concatenates_in_arrival_order() {
        let (tx, rx) = channel(8);
        let mut request = Request::new(metadata(), rx);

        tx.send(Part::data(Bytes::from_static(b"b1"))).await.unwrap();
        tx.send(Part::data(Bytes::from_static(b"b2"))).await.unwrap();
        tx.send(Part::data(Bytes::from_static(b"b3"))).await.unwrap();
        drop(tx);

        let aggregated = request.aggregate(AggregationOptions::new()).await.unwrap();
        assert_eq!(&aggregated.body()[..], b"b1b2b3");
        assert!(aggregated.trailers().is_none());
        assert_eq!(aggregated.metadata(), &metadata());
    }

    #[tokio::test]
    async fn captures_trailers() {
        let (tx, rx) = channel(8);
        let mut request = Request::new(metadata(), rx);

        let mut trailers = HeaderMap::new();
        trailers.insert("checksum", "abc".parse().unwrap());
        tx.send(Part::data(Bytes::from_static(b"b1"))).await.unwrap();
        tx.send(Part::trailers(trailers.clone())).await.unwrap();
        drop(tx);

        let aggregated = request.aggregate(AggregationOptions::new()).await.unwrap();
        assert_eq!(&aggregated.body()[..], b"b1");
        assert_eq!(aggregated.trailers(), Some(&trailers));
    }

    #[tokio::test]
    async fn empty_stream_yields_empty_body() {
        let (tx, rx) = channel(1);
        let mut request = Request::new(metadata(), rx);
        drop(tx);

        let aggregated = request.aggregate(AggregationOptions::new()).await.unwrap();
        assert!(aggregated.body().is_empty());
        assert!(aggregated.trailers().is_none());
    }

    #[tokio::test]
    async fn stream_failure_propagates_verbatim() {
        let (tx, rx) = channel(8);
        let mut request = Request::new(metadata(), rx);

        tx.send(Part::data(Bytes::from_static(b"b1"))).await.unwrap();
        tx.fail(StreamError::new("malformed framing")).await.unwrap();

        let err = request.aggregate(AggregationOptions::new()).await.unwrap_err();
        let inner = err.stream_error().unwrap();
        assert_eq!(inner.to_string(), "malformed framing");
        assert!(!err.is_cancelled());
    }

    #[tokio::test]
    async fn dropping_the_future_cancels_the_subscription() {
        let (tx, rx) = channel(1);
        let mut request = Request::new(metadata(), rx);

        tx.send(Part::data(Bytes::from_static(b"b1"))).await.unwrap();

        let mut pending = request.aggregate(AggregationOptions::new());
        // consumes b1, then parks on the open channel
        assert!(poll_once(&mut pending).await.is_pending());
        assert!(!tx.is_closed());

        drop(pending);
        assert!(tx.is_closed());
        let err = tx.send(Part::data(Bytes::from_static(b"b2"))).await.unwrap_err();
        assert!(err.into_part().is_some());
    }

    #[tokio::test]
    async fn cached_result_is_replayed_without_resubscribing() {
        let (tx, rx) = channel(8);
        let mut request = Request::new(metadata(), rx);

        tx.send(Part::data(Bytes::from_static(b"b1"))).await.unwrap();
        tx.send(Part::data(Bytes::from_static(b"b2"))).await.unwrap();
        drop(tx);

        let first = request
            .aggregate(AggregationOptions::new().cache_result(true))
            .await
            .unwrap();
        let second = request
            .aggregate(AggregationOptions::new().cache_result(true))
            .await
            .unwrap();

        assert_eq!(first, second);
        // same memoized buffer, not a re-aggregation
        assert_eq!(first.body().as_ptr(), second.body().as_ptr());
    }

    #[tokio::test]
    async fn concurrent_cached_calls_resolve_together() {
        let (tx, rx) = channel(8);
        let mut request = Request::new(metadata(), rx);

        tx.send(Part::data(Bytes::from_static(b"b1"))).await.unwrap();
        drop(tx);

        let first = request.aggregate(AggregationOptions::new().cache_result(true));
        let second = request.aggregate(AggregationOptions::new().cache_result(true));

        let (first, second) = tokio::join!(first, second);
        assert_eq!(first.unwrap(), second.unwrap());
    }

    #[tokio::test]
    async fn cached_failure_is_replayed() {
        let (tx, rx) = channel(8);
        let mut request = Request::new(metadata(), rx);

        tx.fail(StreamError::new("boom")).await.unwrap();

        let first = request
            .aggregate(AggregationOptions::new().cache_result(true))
            .await
            .unwrap_err();
        let second = request
            .aggregate(AggregationOptions::new().cache_result(true))
            .await
            .unwrap_err();

        assert_eq!(first.stream_error().unwrap().to_string(), "boom");
        assert_eq!(second.stream_error().unwrap().to_string(), "boom");
    }

    #[tokio::test]
    async fn length_limit_discards_partial_accumulation() {
        let (tx, rx) = channel(8);
        let mut request = Request::new(metadata(), rx);

        tx.send(Part::data(Bytes::from_static(b"abc"))).await.unwrap();
        tx.send(Part::data(Bytes::from_static(b"def"))).await.unwrap();
        drop(tx);

        let err = request
            .aggregate(AggregationOptions::new().length_limit(4))
            .await
            .unwrap_err();
        assert!(err.is_length_limit());
    }

    #[tokio::test]
    async fn invalid_options_leave_the_request_unconsumed() {
        let (tx, rx) = channel(8);
        let mut request = Request::new(metadata(), rx);

        let err = request
            .aggregate(
                AggregationOptions::new()
                    .alloc(Alloc::Supplied(BytesMut::new()))
                    .cache_result(true),
            )
            .await
            .unwrap_err();
        assert!(err.is_invalid_options());

        // rejected before any subscription, the stream is still claimable
        assert!(!request.is_consumed());
        assert!(request.subscribe().is_ok());
        drop(tx);
    }

    #[tokio::test]
    async fn supplied_buffer_is_reused() {
        let (tx, rx) = channel(8);
        let mut request = Request::new(metadata(), rx);

        tx.send(Part::data(Bytes::from_static(b"b1"))).await.unwrap();
        drop(tx);

        let mut buffer = BytesMut::with_capacity(64);
        buffer.put(&b"prefix-"[..]);
        let aggregated = request
            .aggregate(AggregationOptions::new().alloc(Alloc::Supplied(buffer)))
            .await
            .unwrap();
        assert_eq!(&aggregated.body()[..], b"prefix-b1");
    }

    #[tokio::test]
    async fn runtime_executor_drains_eagerly() {
        let (tx, rx) = channel(8);
        let mut request = Request::new(metadata(), rx);

        tx.send(Part::data(Bytes::from_static(b"b1"))).await.unwrap();
        drop(tx);

        let pending = request.aggregate(
            AggregationOptions::new()
                .executor(Executor::Runtime(Handle::current()))
                .cache_result(true),
        );
        // the spawned drain runs without the handle being polled
        drop(pending);
        tokio::task::yield_now().await;

        let aggregated = request
            .aggregate(AggregationOptions::new().cache_result(true))
            .await;
        // either the drain completed before the abort or the abort won and
        // published a cancelled outcome, never a hang and never a partial body
        match aggregated {
            Ok(aggregated) => assert_eq!(&aggregated.body()[..], b"b1"),
            Err(err) => assert!(err.is_cancelled()),
        }
    }

    #[tokio::test]
    async fn aborted_runtime_drain_publishes_cancelled() {
        let (tx, rx) = channel(1);
        let mut request = Request::new(metadata(), rx);

        // keep the sender alive so the drain can never complete
        let pending = request.aggregate(
            AggregationOptions::new()
                .executor(Executor::Runtime(Handle::current()))
                .cache_result(true),
        );
        drop(pending);
        tx.closed().await;

        let err = request
            .aggregate(AggregationOptions::new().cache_result(true))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
