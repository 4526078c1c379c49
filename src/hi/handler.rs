use super::super::error::AppError;
use super::super::s11n::Role;
use super::response::FastcgiResponse;

use bytes::Bytes;

use std::collections::HashMap;
use std::io::Cursor;

/// Decoded PARAMS of one request.
pub type Environ = HashMap<String, String>;

/// A fully assembled request, handed to the application once its PARAMS and STDIN
/// streams are both complete.
#[derive(Debug)]
pub struct FastcgiRequest {
    pub request_id: u16,
    pub role: Role,
    pub keep_connection: bool,
    pub params: Environ,
    pub body: Cursor<Bytes>,
    /// Contents of the DATA stream, if the web server sent one.
    pub data: Bytes,
    /// Anything written here goes back to the web server as the STDERR stream.
    pub errors: Vec<u8>,
}

impl FastcgiRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

pub trait Application {
    fn call(&self, request: &mut FastcgiRequest) -> Result<FastcgiResponse, AppError>;
}

impl<F> Application for F
    where F: Fn(&mut FastcgiRequest) -> Result<FastcgiResponse, AppError>
{
    fn call(&self, request: &mut FastcgiRequest) -> Result<FastcgiResponse, AppError> {
        self(request)
    }
}
