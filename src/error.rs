//! Request consumption errors.
use crate::stream::StreamError;

/// Error from [`Request`] consumption operations.
///
/// Cloneable so that a memoized aggregation outcome can be replayed,
/// failures included.
///
/// [`Request`]: crate::Request
#[derive(Clone)]
pub struct RequestError {
    kind: Kind,
}

#[derive(Clone, Debug)]
enum Kind {
    AlreadyConsumed,
    InvalidOptions(&'static str),
    LengthLimit,
    Stream(StreamError),
    Cancelled,
}

impl RequestError {
    pub(crate) const fn already_consumed() -> Self {
        Self { kind: Kind::AlreadyConsumed }
    }

    pub(crate) const fn invalid_options(reason: &'static str) -> Self {
        Self { kind: Kind::InvalidOptions(reason) }
    }

    pub(crate) const fn length_limit() -> Self {
        Self { kind: Kind::LengthLimit }
    }

    pub(crate) const fn cancelled() -> Self {
        Self { kind: Kind::Cancelled }
    }

    /// Returns `true` if the part sequence was already claimed by an earlier
    /// [`subscribe`] or [`aggregate`] call.
    ///
    /// [`subscribe`]: crate::Request::subscribe
    /// [`aggregate`]: crate::Request::aggregate
    pub const fn is_already_consumed(&self) -> bool {
        matches!(self.kind, Kind::AlreadyConsumed)
    }

    /// Returns `true` if the aggregation options were rejected before any
    /// subscription occurred.
    pub const fn is_invalid_options(&self) -> bool {
        matches!(self.kind, Kind::InvalidOptions(_))
    }

    /// Returns `true` if the configured length limit was exceeded.
    pub const fn is_length_limit(&self) -> bool {
        matches!(self.kind, Kind::LengthLimit)
    }

    /// Returns `true` if the aggregation was cancelled before completion.
    ///
    /// Distinguished from failure, cancellation is an expected outcome and is
    /// not worth an error log.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, Kind::Cancelled)
    }

    /// Returns the underlying producer failure, if this error propagates one.
    pub const fn stream_error(&self) -> Option<&StreamError> {
        match &self.kind {
            Kind::Stream(error) => Some(error),
            _ => None,
        }
    }
}

impl From<StreamError> for RequestError {
    #[inline]
    fn from(v: StreamError) -> Self {
        Self { kind: Kind::Stream(v) }
    }
}

impl std::error::Error for RequestError { }

impl std::fmt::Debug for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RequestError").field(&self.kind).finish()
    }
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            Kind::AlreadyConsumed => f.write_str("request parts already consumed"),
            Kind::InvalidOptions(reason) => write!(f, "invalid aggregation options: {reason}"),
            Kind::LengthLimit => f.write_str("length limit exceeded"),
            Kind::Stream(error) => error.fmt(f),
            Kind::Cancelled => f.write_str("aggregation cancelled"),
        }
    }
}
