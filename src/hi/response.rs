use super::super::error::AppError;

use bytes::{Bytes, BytesMut};

use std::fmt;

/// Response body, produced lazily one chunk at a time.
pub type BodyChunks = Box<dyn Iterator<Item = Result<Bytes, AppError>>>;

pub struct FastcgiResponse {
    /// Status line without the protocol, e.g. "200 OK".
    pub status: String,
    pub headers: Vec<(String, String)>,
    pub body: BodyChunks,
}

impl FastcgiResponse {
    pub fn new<S: Into<String>>(status: S) -> FastcgiResponse {
        FastcgiResponse {
            status: status.into(),
            headers: Vec::new(),
            body: Box::new(std::iter::empty()),
        }
    }

    /// Replace any header of the same name (case-insensitively).
    pub fn set_header<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) {
        let name = name.into();
        self.clear_header(&name);
        self.headers.push((name, value.into()));
    }

    pub fn add_header<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) {
        self.headers.push((name.into(), value.into()));
    }

    pub fn clear_header(&mut self, name: &str) {
        self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
    }

    pub fn set_body<B: Into<Bytes>>(&mut self, body: B) {
        let body = body.into();
        self.body = Box::new(std::iter::once(Ok(body)));
    }

    pub fn set_chunks<I>(&mut self, chunks: I)
        where I: IntoIterator<Item = Result<Bytes, AppError>>,
              I::IntoIter: 'static
    {
        self.body = Box::new(chunks.into_iter());
    }

    /// The CGI-style header block that starts the STDOUT stream.
    pub fn header_block(&self) -> Bytes {
        let mut out = BytesMut::new();
        out.extend_from_slice(b"Status: ");
        out.extend_from_slice(self.status.as_bytes());
        out.extend_from_slice(b"\r\n");
        for (key, value) in &self.headers {
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.freeze()
    }
}

impl fmt::Debug for FastcgiResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FastcgiResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish()
    }
}
