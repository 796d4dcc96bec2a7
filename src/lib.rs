//! Streaming HTTP Request Adapter.
//!
//! ## Core
//!
//! - [`Request`] binds immutable [`RequestMetadata`] to a single-consumer
//!   sequence of request [`Part`]s
//! - [`PartStream`] the trait that represent a source of request parts
//!
//! ## Consumption
//!
//! A request's part sequence can be claimed exactly once, by one of:
//!
//! - [`Request::subscribe`] for incremental, part-by-part access
//! - [`Request::aggregate`] to buffer everything into an [`AggregatedRequest`]
//!
//! [`Request::metadata`] is independent of the part sequence and stays
//! available in every state.
#![warn(missing_debug_implementations)]

mod log;

pub mod metadata;
pub mod part;
pub mod stream;
pub mod request;
pub mod aggregate;
pub mod error;

pub use metadata::RequestMetadata;
pub use part::Part;
pub use stream::{PartStream, StreamError};
pub use request::{Request, Subscription};
pub use aggregate::{Aggregate, AggregatedRequest, AggregationOptions, Alloc, Executor};
pub use error::RequestError;
