use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, Uri};

/// The number of times a request has been dispatched before
///
/// Attached as an extension to every request handed to a transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Attempt(pub u32);

impl Attempt {
    /// The first dispatch of a request
    pub const FIRST: Self = Self(0);

    /// Whether this dispatch replays an earlier one
    #[inline]
    pub fn is_replay(self) -> bool {
        self.0 > 0
    }
}

/// Everything required to send, and later replay, a request
///
/// An envelope is never mutated once dispatched. Replays are separate
/// envelopes produced by [`replay()`][Self::replay].
#[derive(Clone, Debug)]
pub struct RequestEnvelope {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    attempt: Attempt,
}

impl RequestEnvelope {
    /// Constructs an envelope with no headers and an empty body
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            attempt: Attempt::FIRST,
        }
    }

    /// Constructs a `GET` envelope
    pub fn get(uri: Uri) -> Self {
        Self::new(Method::GET, uri)
    }

    /// Constructs a `POST` envelope
    pub fn post(uri: Uri) -> Self {
        Self::new(Method::POST, uri)
    }

    /// Adds a header, replacing any existing values of that header
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the body
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// The request method
    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request URI, either a path or an absolute URI
    #[inline]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The caller-provided headers
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The request body
    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// How many times this request was dispatched before
    #[inline]
    pub fn attempt(&self) -> Attempt {
        self.attempt
    }

    /// Whether this envelope replays an earlier dispatch
    #[inline]
    pub fn is_replay(&self) -> bool {
        self.attempt.is_replay()
    }

    /// Produces the envelope for the next dispatch of the same request
    #[must_use]
    pub fn replay(&self) -> Self {
        Self {
            attempt: Attempt(self.attempt.0 + 1),
            ..self.clone()
        }
    }

    /// Builds the request handed to a transport
    ///
    /// When `authorization` is given, it replaces any `Authorization`
    /// header supplied by the caller.
    pub fn to_http(&self, authorization: Option<HeaderValue>) -> http::Request<Bytes> {
        let mut request = http::Request::new(self.body.clone());
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self.uri.clone();
        *request.headers_mut() = self.headers.clone();
        if let Some(value) = authorization {
            request.headers_mut().insert(header::AUTHORIZATION, value);
        }
        request.extensions_mut().insert(self.attempt);
        request
    }
}
