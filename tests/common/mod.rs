#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use iisfcgi::*;

use std::cell::RefCell;
use std::io::{self, Cursor, Write};
use std::rc::Rc;

/// Output half of an in-memory socket that tests can still read after the server
/// has closed its copy.
#[derive(Clone, Default)]
pub struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn memory_socket(input: Vec<u8>) -> (FileSocket<Cursor<Vec<u8>>, SharedBuf>, SharedBuf) {
    let out = SharedBuf::default();
    (FileSocket::new(Cursor::new(input), out.clone()), out)
}

/// Pins a closure to the `Application` signature.
pub fn app<F>(f: F) -> F
    where F: Fn(&mut FastcgiRequest) -> std::result::Result<FastcgiResponse, AppError>
{
    f
}

pub fn record(record_type: RecordType, request_id: u16, content: &[u8]) -> Vec<u8> {
    let record = FastcgiRecord::new(record_type, request_id, Bytes::copy_from_slice(content));
    let mut buf = BytesMut::new();
    FastcgiLowlevelCodec::new().encode(&record, &mut buf).unwrap();
    buf.to_vec()
}

pub fn begin(request_id: u16, role: Role, keep_connection: bool) -> Vec<u8> {
    let body = BeginRequest { role: role as u16, keep_connection }.to_bytes();
    record(RecordType::BeginRequest, request_id, &body)
}

pub fn encode_pairs(pairs: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    write_params(pairs.iter().map(|&(k, v)| (k.as_bytes(), v.as_bytes())), &mut buf).unwrap();
    buf.to_vec()
}

/// BEGIN_REQUEST, one PARAMS record plus terminator, the body in one STDIN record plus terminator.
pub fn full_request(request_id: u16, keep_connection: bool, pairs: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = begin(request_id, Role::Responder, keep_connection);
    out.extend(record(RecordType::Params, request_id, &encode_pairs(pairs)));
    out.extend(record(RecordType::Params, request_id, b""));
    if !body.is_empty() {
        out.extend(record(RecordType::Stdin, request_id, body));
    }
    out.extend(record(RecordType::Stdin, request_id, b""));
    out
}

pub fn decode_all(bytes: &[u8]) -> Vec<FastcgiRecord> {
    let mut sock = FileSocket::new(Cursor::new(bytes.to_vec()), Vec::new());
    let mut codec = FastcgiLowlevelCodec::new();
    let mut records = vec![];
    loop {
        match codec.decode(&mut sock, None) {
            Ok(record) => records.push(record),
            Err(Error::Eof) => break,
            Err(e) => panic!("server wrote a bad record stream: {}", e),
        }
    }
    assert_eq!(codec.short_padding_reads(), 0);
    records
}

pub fn of_type(records: &[FastcgiRecord], record_type: RecordType, request_id: u16) -> Vec<FastcgiRecord> {
    records.iter()
        .filter(|r| r.kind() == Some(record_type) && r.request_id == request_id)
        .cloned()
        .collect()
}

pub fn stream_content(records: &[FastcgiRecord], record_type: RecordType, request_id: u16) -> Vec<u8> {
    of_type(records, record_type, request_id)
        .iter()
        .flat_map(|r| r.content.to_vec())
        .collect()
}

pub fn end_requests(records: &[FastcgiRecord], request_id: u16) -> Vec<EndRequest> {
    of_type(records, RecordType::EndRequest, request_id)
        .iter()
        .map(|r| EndRequest::parse(&r.content).unwrap())
        .collect()
}

pub fn hello_response(body: &str) -> FastcgiResponse {
    let mut response = FastcgiResponse::new("200 OK");
    response.set_header("Content-Type", "text/plain");
    response.set_body(body.to_owned());
    response
}
