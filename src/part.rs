use bytes::Bytes;
use http::HeaderMap;

/// One unit of a request body and trailer sequence.
///
/// A [`PartStream`] yields data parts in arrival order, optionally followed by
/// a single trailers part which is always last.
///
/// [`PartStream`]: crate::stream::PartStream
#[derive(Debug)]
pub struct Part {
    repr: Repr,
}

#[derive(Debug)]
enum Repr {
    Data(Bytes),
    Trailers(HeaderMap),
}

impl Part {
    /// Create new body data part.
    #[inline]
    pub const fn data(data: Bytes) -> Self {
        Self { repr: Repr::Data(data) }
    }

    /// Create new trailers part.
    #[inline]
    pub const fn trailers(trailers: HeaderMap) -> Self {
        Self { repr: Repr::Trailers(trailers) }
    }

    /// Returns `true` if this is a data part.
    #[inline]
    pub const fn is_data(&self) -> bool {
        matches!(self.repr, Repr::Data(_))
    }

    /// Returns `true` if this is a trailers part.
    #[inline]
    pub const fn is_trailers(&self) -> bool {
        matches!(self.repr, Repr::Trailers(_))
    }

    /// Returns reference to the bytes if this is a data part.
    #[inline]
    pub const fn as_data(&self) -> Option<&Bytes> {
        match &self.repr {
            Repr::Data(data) => Some(data),
            Repr::Trailers(_) => None,
        }
    }

    /// Returns reference to the trailers if this is a trailers part.
    #[inline]
    pub const fn as_trailers(&self) -> Option<&HeaderMap> {
        match &self.repr {
            Repr::Trailers(trailers) => Some(trailers),
            Repr::Data(_) => None,
        }
    }

    /// Consumes self into the bytes of the data part.
    #[inline]
    pub fn into_data(self) -> Result<Bytes, Self> {
        match self.repr {
            Repr::Data(data) => Ok(data),
            Repr::Trailers(_) => Err(self),
        }
    }

    /// Consumes self into the trailers of the trailers part.
    #[inline]
    pub fn into_trailers(self) -> Result<HeaderMap, Self> {
        match self.repr {
            Repr::Trailers(trailers) => Ok(trailers),
            Repr::Data(_) => Err(self),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn part_repr() {
        let data = Part::data(Bytes::from_static(b"chunk"));
        assert!(data.is_data());
        assert!(!data.is_trailers());
        assert_eq!(data.as_data().map(|b| &b[..]), Some(&b"chunk"[..]));
        assert!(data.as_trailers().is_none());
        assert_eq!(data.into_data().ok(), Some(Bytes::from_static(b"chunk")));

        let mut map = HeaderMap::new();
        map.insert("grpc-status", "0".parse().unwrap());
        let trailers = Part::trailers(map.clone());
        assert!(trailers.is_trailers());
        assert!(trailers.as_data().is_none());
        assert_eq!(trailers.into_trailers().ok(), Some(map));

        // a mismatched destructor hands the part back
        assert!(Part::data(Bytes::new()).into_trailers().is_err());
    }
}
