//! Fetched responses and their single-read body streams.
//!
//! A [`Response`] pairs the downloader's result (status, headers, body) with
//! an echo of the request that was actually sent, so that parsing code can
//! read back headers such as `Referer` exactly as the downloader shipped
//! them. The body is a take-once stream: the content decoder consumes it a
//! single time, and dropping the response closes whatever is left.

use crate::request::Request;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::fmt;
use std::io::{Cursor, Read};

/// A single-read response body stream.
///
/// The inner reader can be taken exactly once; afterwards the body reports
/// itself as consumed. Dropping a `Body` (consumed or not) closes the
/// underlying stream.
pub struct Body(Option<Box<dyn Read + Send>>);

impl Body {
    /// An already-consumed body.
    pub fn empty() -> Self {
        Body(None)
    }

    /// Wraps an arbitrary reader.
    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        Body(Some(Box::new(reader)))
    }

    /// Takes the reader out, leaving the body consumed.
    pub(crate) fn take(&mut self) -> Option<Box<dyn Read + Send>> {
        self.0.take()
    }

    /// Whether the stream has already been taken.
    pub fn is_consumed(&self) -> bool {
        self.0.is_none()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::from_reader(Cursor::new(bytes))
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::from_reader(Cursor::new(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::from_reader(Cursor::new(text.into_bytes()))
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::from(text.to_owned())
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_consumed() {
            f.write_str("Body(consumed)")
        } else {
            f.write_str("Body(pending)")
        }
    }
}

/// A fetched response as delivered by a downloader.
#[derive(Debug)]
pub struct Response {
    /// HTTP status of the fetch.
    pub status: StatusCode,
    /// Response header bag.
    pub headers: HeaderMap,
    body: Body,
    request: Request,
}

impl Response {
    /// Assembles a response from its parts.
    ///
    /// `request` is the request the downloader actually sent, echoed back so
    /// parsing code can inspect outgoing headers after the fact.
    pub fn new(
        status: StatusCode,
        headers: HeaderMap,
        body: impl Into<Body>,
        request: Request,
    ) -> Self {
        Response {
            status,
            headers,
            body: body.into(),
            request,
        }
    }

    /// A `200 OK` response with no special headers; mostly a test helper.
    pub fn ok(body: impl Into<Body>, request: Request) -> Self {
        Response::new(StatusCode::OK, HeaderMap::new(), body, request)
    }

    /// The request this response answers, as the downloader sent it.
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub(crate) fn take_body(&mut self) -> Option<Box<dyn Read + Send>> {
        self.body.take()
    }

    /// Whether the body stream is still available for the decoder.
    pub fn body_pending(&self) -> bool {
        !self.body.is_consumed()
    }
}
