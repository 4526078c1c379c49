use super::super::config::RequestLimits;
use super::super::error::{Error, Result};
use super::super::lowlevel::{read_params, BeginRequest};
use super::super::s11n::Role;
use super::handler::{Environ, FastcgiRequest};

use bytes::{Bytes, BytesMut};

use std::io::Cursor;

/// One input stream of a request (PARAMS, STDIN or DATA), closed by an empty record.
#[derive(Debug, Default)]
struct InputStream {
    buf: BytesMut,
    done: bool,
}

impl InputStream {
    /// Returns true when this record closed the stream.
    fn push(&mut self, what: &'static str, content: &Bytes, limit: usize) -> Result<bool> {
        if self.done {
            warn!("{} record after the end of the stream; ignoring {} bytes", what, content.len());
            return Ok(false);
        }
        if content.is_empty() {
            self.done = true;
            return Ok(true);
        }
        if self.buf.len() + content.len() > limit {
            return Err(Error::LimitExceeded { what, limit });
        }
        self.buf.extend_from_slice(content);
        Ok(false)
    }
}

/// Bookkeeping for one request between its BEGIN_REQUEST and its END_REQUEST.
#[derive(Debug)]
pub struct RequestState {
    pub role: Role,
    pub keep_connection: bool,
    params: InputStream,
    environ: Option<Environ>,
    stdin: InputStream,
    data: InputStream,
}

impl RequestState {
    pub fn new(role: Role, begin: &BeginRequest) -> RequestState {
        RequestState {
            role,
            keep_connection: begin.keep_connection,
            params: InputStream::default(),
            environ: None,
            stdin: InputStream::default(),
            data: InputStream::default(),
        }
    }

    /// Append PARAMS content; the empty record decodes everything collected so far.
    pub fn push_params(&mut self, content: &Bytes, limits: &RequestLimits) -> Result<()> {
        if self.params.push("PARAMS", content, limits.max_params_bytes)? {
            let raw = std::mem::take(&mut self.params.buf).freeze();
            let environ = params_to_environ(read_params(&raw)?);
            debug!("done reading params: {} variables", environ.len());
            self.environ = Some(environ);
        }
        Ok(())
    }

    pub fn push_stdin(&mut self, content: &Bytes, limits: &RequestLimits) -> Result<()> {
        if self.stdin.push("STDIN", content, limits.max_stdin_bytes)? {
            debug!("stdin is done: {} bytes", self.stdin.buf.len());
        }
        Ok(())
    }

    pub fn push_data(&mut self, content: &Bytes, limits: &RequestLimits) -> Result<()> {
        self.data.push("DATA", content, limits.max_stdin_bytes)?;
        Ok(())
    }

    /// Both PARAMS and STDIN have been closed.
    pub fn is_ready(&self) -> bool {
        self.environ.is_some() && self.stdin.done
    }

    pub fn into_request(self, request_id: u16) -> FastcgiRequest {
        let mut params = self.environ.unwrap_or_default();
        sanitize_environ(&mut params);
        FastcgiRequest {
            request_id,
            role: self.role,
            keep_connection: self.keep_connection,
            params,
            body: Cursor::new(self.stdin.buf.freeze()),
            data: self.data.buf.freeze(),
            errors: Vec::new(),
        }
    }
}

pub fn params_to_environ(params: Vec<(Bytes, Bytes)>) -> Environ {
    params.into_iter()
        .map(|(name, value)| {
            (String::from_utf8_lossy(&name).into_owned(),
             String::from_utf8_lossy(&value).into_owned())
        })
        .collect()
}

/// IIS puts the whole request path in SCRIPT_NAME instead of splitting it into
/// SCRIPT_NAME and PATH_INFO, so SCRIPT_NAME is blanked before the application sees it.
pub fn sanitize_environ(environ: &mut Environ) {
    environ.insert("SCRIPT_NAME".to_owned(), String::new());
    environ.entry("QUERY_STRING".to_owned()).or_insert_with(String::new);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lowlevel::write_params;
    use std::io::Read;

    fn responder() -> RequestState {
        RequestState::new(Role::Responder, &BeginRequest { role: 1, keep_connection: true })
    }

    fn encode(pairs: &[(&str, &str)]) -> Bytes {
        let mut buf = BytesMut::new();
        write_params(pairs.iter().map(|&(k, v)| (k.as_bytes(), v.as_bytes())), &mut buf).unwrap();
        buf.freeze()
    }

    #[test]
    fn ready_needs_both_streams() {
        let limits = RequestLimits::default();
        let mut state = responder();
        state.push_stdin(&Bytes::from_static(b"body"), &limits).unwrap();
        state.push_stdin(&Bytes::new(), &limits).unwrap();
        assert!(!state.is_ready());

        state.push_params(&encode(&[("REQUEST_METHOD", "POST")]), &limits).unwrap();
        assert!(!state.is_ready());
        state.push_params(&Bytes::new(), &limits).unwrap();
        assert!(state.is_ready());

        let mut request = state.into_request(9);
        assert_eq!(request.request_id, 9);
        assert_eq!(request.param("REQUEST_METHOD"), Some("POST"));
        let mut body = String::new();
        request.body.read_to_string(&mut body).unwrap();
        assert_eq!(body, "body");
    }

    #[test]
    fn pair_split_across_records() {
        let limits = RequestLimits::default();
        let encoded = encode(&[("PATH_INFO", "/a/b"), ("HTTP_HOST", "example.com")]);
        let mut state = responder();
        for piece in encoded.chunks(3) {
            state.push_params(&Bytes::copy_from_slice(piece), &limits).unwrap();
        }
        state.push_params(&Bytes::new(), &limits).unwrap();
        state.push_stdin(&Bytes::new(), &limits).unwrap();
        let request = state.into_request(1);
        assert_eq!(request.param("PATH_INFO"), Some("/a/b"));
        assert_eq!(request.param("HTTP_HOST"), Some("example.com"));
    }

    #[test]
    fn malformed_params_fail_on_completion() {
        let limits = RequestLimits::default();
        let mut state = responder();
        state.push_params(&Bytes::from_static(&[10, 10, b'x']), &limits).unwrap();
        assert!(matches!(state.push_params(&Bytes::new(), &limits), Err(Error::NameValue(_))));
    }

    #[test]
    fn stdin_limit() {
        let limits = RequestLimits { max_params_bytes: 64, max_stdin_bytes: 4 };
        let mut state = responder();
        state.push_stdin(&Bytes::from_static(b"1234"), &limits).unwrap();
        let err = state.push_stdin(&Bytes::from_static(b"5"), &limits).unwrap_err();
        assert!(matches!(err, Error::LimitExceeded { what: "STDIN", limit: 4 }));
    }

    #[test]
    fn script_name_is_blanked() {
        let mut environ = Environ::new();
        environ.insert("SCRIPT_NAME".to_owned(), "/app/index".to_owned());
        environ.insert("QUERY_STRING".to_owned(), "a=1".to_owned());
        sanitize_environ(&mut environ);
        assert_eq!(environ["SCRIPT_NAME"], "");
        assert_eq!(environ["QUERY_STRING"], "a=1");

        let mut bare = Environ::new();
        sanitize_environ(&mut bare);
        assert_eq!(bare["SCRIPT_NAME"], "");
        assert_eq!(bare["QUERY_STRING"], "");
    }
}
