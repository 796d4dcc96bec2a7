//! HTTP Request Metadata.
use http::{
    HeaderMap, Method, Uri,
    uri::{Authority, Scheme},
};

/// Immutable request metadata.
///
/// Holds the request line fields and the header map. Bound exactly once at
/// [`Request`] construction and never mutated afterward, so it can be read at
/// any point of the request lifecycle, independent of part stream consumption.
///
/// [`Request`]: crate::Request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMetadata {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
}

// ===== Constructor =====

impl RequestMetadata {
    /// Create metadata with an empty header map.
    pub fn new(method: Method, uri: Uri) -> RequestMetadata {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
        }
    }

    /// Create metadata with the given header map.
    pub fn with_headers(method: Method, uri: Uri, headers: HeaderMap) -> RequestMetadata {
        Self { method, uri, headers }
    }
}

// ===== Ref =====

impl RequestMetadata {
    /// Returns shared reference to the [`Method`].
    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns shared reference to the [`Uri`].
    #[inline]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Returns the uri [`Scheme`], if any.
    #[inline]
    pub fn scheme(&self) -> Option<&Scheme> {
        self.uri.scheme()
    }

    /// Returns the uri [`Authority`], if any.
    #[inline]
    pub fn authority(&self) -> Option<&Authority> {
        self.uri.authority()
    }

    /// Returns the uri path.
    #[inline]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Returns shared reference to the [`HeaderMap`].
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}
