use super::super::config::ServerConfig;
use super::super::error::{Error, Result};
use super::super::lowlevel::*;
use super::super::s11n::*;
use super::super::signals::StopSignal;
use super::super::socket::StreamSocket;
use super::handler::Application;
use super::request::RequestState;
use super::response::FastcgiResponse;

use bytes::{Bytes, BytesMut};
use enum_primitive::FromPrimitive;

use std::any::Any;
use std::collections::HashMap;
use std::io;
use std::net::Shutdown;
use std::panic::{self, AssertUnwindSafe};

/// How a session ended without a transport fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The web server closed the stream on a record boundary.
    PeerClosed,
    /// The stream ended in the middle of a record.
    Truncated,
    /// The last request did not ask to keep the connection open.
    Released,
    /// A stop or restart was requested by signal.
    Stopped { restart: bool },
}

impl SessionEnd {
    pub fn restart(&self) -> bool {
        matches!(*self, SessionEnd::Stopped { restart: true })
    }
}

const INTERNAL_ERROR_HEADERS: &[u8] = b"Status: 500 Internal Server Error\r\n\r\n";

/// One session with the web server over a single stream. Requests are tracked by id
/// while their records arrive interleaved, and each is run to completion as soon as
/// its input is complete.
pub struct Connection<'a, S: StreamSocket + ?Sized, A: Application + ?Sized> {
    sock: &'a mut S,
    app: &'a A,
    config: &'a ServerConfig,
    stop: &'a StopSignal,
    codec: FastcgiLowlevelCodec,
    requests: HashMap<u16, RequestState>,
    keep_going: bool,
    init_header: Option<Bytes>,
}

impl<'a, S: StreamSocket + ?Sized, A: Application + ?Sized> Connection<'a, S, A> {
    /// `init_header` holds header bytes already read off the stream by the caller.
    pub fn new(
        sock: &'a mut S,
        app: &'a A,
        config: &'a ServerConfig,
        stop: &'a StopSignal,
        init_header: Option<Bytes>,
    ) -> Connection<'a, S, A> {
        Connection {
            sock,
            app,
            config,
            stop,
            codec: FastcgiLowlevelCodec::new(),
            requests: HashMap::new(),
            keep_going: true,
            init_header,
        }
    }

    pub fn short_padding_reads(&self) -> u64 {
        self.codec.short_padding_reads()
    }

    /// Process records until the session ends. The socket is shut down and closed on
    /// every way out; a transport fault is returned as an error.
    pub fn run(&mut self) -> Result<SessionEnd> {
        self.keep_going = true;
        let result = loop {
            if self.stop.is_stopping() {
                break Ok(self.stopped());
            }
            if !self.keep_going {
                break Ok(SessionEnd::Released);
            }

            let init_header = self.init_header.take();
            match self.process_input(init_header) {
                Ok(()) => (),
                Err(Error::Eof) => {
                    debug!("peer closed the stream");
                    break Ok(SessionEnd::PeerClosed);
                }
                Err(e @ Error::Truncated { .. }) => {
                    warn!("abnormal close: {}", e);
                    break Ok(SessionEnd::Truncated);
                }
                Err(Error::Io(ref e))
                    if e.kind() == io::ErrorKind::Interrupted && self.stop.is_stopping() =>
                {
                    break Ok(self.stopped());
                }
                Err(e) => {
                    error!("connection failed: {}", e);
                    break Err(e);
                }
            }
        };

        if !self.requests.is_empty() {
            debug!("dropping {} unfinished requests", self.requests.len());
            self.requests.clear();
        }
        self.cleanup_socket();
        result
    }

    fn stopped(&self) -> SessionEnd {
        let restart = self.stop.restart_requested();
        info!("stopping on signal (restart: {})", restart);
        SessionEnd::Stopped { restart }
    }

    fn cleanup_socket(&mut self) {
        if let Err(e) = self.sock.shutdown(Shutdown::Both) {
            debug!("shutdown failed: {}", e);
        }
        self.sock.close();
    }

    /// Read a single record and act on it.
    pub fn process_input(&mut self, init_header: Option<Bytes>) -> Result<()> {
        let record = self.codec.decode(&mut *self.sock, init_header)?;

        match record.kind() {
            Some(RecordType::GetValues) => self.do_get_values(&record),
            _ if record.request_id == NULL_REQUEST_ID => self.do_unknown_type(&record),
            Some(RecordType::BeginRequest) => self.do_begin_request(&record),
            Some(RecordType::AbortRequest) => self.do_abort_request(&record),
            Some(RecordType::Params) => self.do_params(&record),
            Some(RecordType::Stdin) => self.do_stdin(&record),
            Some(RecordType::Data) => self.do_data(&record),
            Some(RecordType::EndRequest)
            | Some(RecordType::Stdout)
            | Some(RecordType::Stderr)
            | Some(RecordType::GetValuesResult)
            | Some(RecordType::UnknownType)
            | None => self.do_unknown_type(&record),
        }
    }

    fn do_get_values(&mut self, record: &FastcgiRecord) -> Result<()> {
        let names = read_params(&record.content).unwrap_or_else(|e| {
            warn!("bad GET_VALUES query: {}", e);
            vec![]
        });
        let values: Vec<(Bytes, String)> = names.into_iter()
            .filter_map(|(name, _value)| {
                let value = self.config.capability(&name)?;
                Some((name, value))
            })
            .collect();
        debug!("answering GET_VALUES with {} values", values.len());

        let mut content = BytesMut::new();
        write_params(values.iter().map(|(name, value)| (&name[..], value.as_bytes())), &mut content)?;
        self.write_record(FastcgiRecord::new(RecordType::GetValuesResult, NULL_REQUEST_ID, content.freeze()))
    }

    fn do_unknown_type(&mut self, record: &FastcgiRecord) -> Result<()> {
        warn!("unknown record type {} for request {}", record.record_type, record.request_id);
        let body = Bytes::copy_from_slice(&unknown_type_body(record.record_type));
        self.write_record(FastcgiRecord::new(RecordType::UnknownType, NULL_REQUEST_ID, body))
    }

    fn do_begin_request(&mut self, record: &FastcgiRecord) -> Result<()> {
        let id = record.request_id;
        let begin = match BeginRequest::parse(&record.content) {
            Ok(begin) => begin,
            Err(e) => {
                error!("request {}: {}", id, e);
                self.forget(id);
                return self.end_request(id, APP_STATUS_REQUEST_FAILED, ProtocolStatus::RequestComplete, true);
            }
        };
        debug!("request {}: BeginRequest {:?}", id, begin);

        let role = match begin.known_role() {
            Some(role @ Role::Responder) => role,
            other => {
                warn!("request {}: unsupported role {:?} ({})", id, other, begin.role);
                self.forget(id);
                return self.end_request(id, APP_STATUS_OK, ProtocolStatus::UnknownRole, begin.keep_connection);
            }
        };

        if self.requests.insert(id, RequestState::new(role, &begin)).is_some() {
            warn!("request {}: BEGIN_REQUEST for an active request; starting over", id);
        }
        Ok(())
    }

    /// A refused BEGIN_REQUEST ends whatever request was running under the same id.
    fn forget(&mut self, id: u16) {
        if self.requests.remove(&id).is_some() {
            warn!("request {}: refused BEGIN_REQUEST ends the active request", id);
        }
    }

    fn do_abort_request(&mut self, record: &FastcgiRecord) -> Result<()> {
        let id = record.request_id;
        match self.requests.remove(&id) {
            Some(state) => {
                info!("request {} aborted by the web server", id);
                self.end_request(id, APP_STATUS_ABORTED, ProtocolStatus::RequestComplete, state.keep_connection)
            }
            None => {
                debug!("abort for unknown request {}", id);
                Ok(())
            }
        }
    }

    fn do_params(&mut self, record: &FastcgiRecord) -> Result<()> {
        let id = record.request_id;
        let pushed = match self.requests.get_mut(&id) {
            Some(state) => state.push_params(&record.content, &self.config.limits),
            None => {
                self.ignore(record);
                return Ok(());
            }
        };
        self.after_input(id, pushed)
    }

    fn do_stdin(&mut self, record: &FastcgiRecord) -> Result<()> {
        let id = record.request_id;
        let pushed = match self.requests.get_mut(&id) {
            Some(state) => state.push_stdin(&record.content, &self.config.limits),
            None => {
                self.ignore(record);
                return Ok(());
            }
        };
        self.after_input(id, pushed)
    }

    fn do_data(&mut self, record: &FastcgiRecord) -> Result<()> {
        let id = record.request_id;
        let pushed = match self.requests.get_mut(&id) {
            Some(state) => state.push_data(&record.content, &self.config.limits),
            None => {
                self.ignore(record);
                return Ok(());
            }
        };
        self.after_input(id, pushed)
    }

    fn ignore(&self, record: &FastcgiRecord) {
        warn!("type {} record for unknown request {}; ignoring", record.record_type, record.request_id);
    }

    /// Fail the request if its input was bad, otherwise run it once it is complete.
    fn after_input(&mut self, id: u16, pushed: Result<()>) -> Result<()> {
        if let Err(e) = pushed {
            error!("request {}: {}", id, e);
            let keep_connection = self.requests.remove(&id).map_or(true, |state| state.keep_connection);
            return self.end_request(id, APP_STATUS_REQUEST_FAILED, ProtocolStatus::RequestComplete, keep_connection);
        }

        if self.requests.get(&id).map_or(false, RequestState::is_ready) {
            if let Some(state) = self.requests.remove(&id) {
                return self.run_request(id, state);
            }
        }
        Ok(())
    }

    fn run_request(&mut self, id: u16, state: RequestState) -> Result<()> {
        let mut request = state.into_request(id);
        info!("request {}: {} {}",
              id,
              request.param("REQUEST_METHOD").unwrap_or("<no REQUEST_METHOD set!>"),
              request.param("REQUEST_URI").or_else(|| request.param("PATH_INFO")).unwrap_or("<no REQUEST_URI set!>"));

        let app = self.app;
        let response = match panic::catch_unwind(AssertUnwindSafe(|| app.call(&mut request))) {
            Ok(Ok(response)) => Some(response),
            Ok(Err(e)) => {
                error!("request {}: application failed: {}", id, e);
                None
            }
            Err(payload) => {
                error!("request {}: application panicked: {}", id, panic_message(&*payload));
                None
            }
        };

        let app_status = match response {
            Some(response) => self.write_response(id, response)?,
            None => {
                self.write_stream(RecordType::Stdout, id, &Bytes::from_static(INTERNAL_ERROR_HEADERS))?;
                APP_STATUS_APPLICATION_ERROR
            }
        };
        self.write_record(FastcgiRecord::new(RecordType::Stdout, id, Bytes::new()))?;

        if !request.errors.is_empty() {
            let errors = Bytes::from(std::mem::take(&mut request.errors));
            self.write_stream(RecordType::Stderr, id, &errors)?;
            self.write_record(FastcgiRecord::new(RecordType::Stderr, id, Bytes::new()))?;
        }

        self.end_request(id, app_status, ProtocolStatus::RequestComplete, request.keep_connection)
    }

    /// Stream the header block and body to STDOUT. A failing body iterator cuts the
    /// body short and is reported through the returned app status.
    fn write_response(&mut self, id: u16, response: FastcgiResponse) -> Result<u32> {
        debug!("request {}: {:?}", id, response);
        self.write_stream(RecordType::Stdout, id, &response.header_block())?;

        let mut body = response.body;
        loop {
            match panic::catch_unwind(AssertUnwindSafe(|| body.next())) {
                Ok(None) => return Ok(APP_STATUS_OK),
                Ok(Some(Ok(chunk))) => self.write_stream(RecordType::Stdout, id, &chunk)?,
                Ok(Some(Err(e))) => {
                    error!("request {}: response body failed: {}", id, e);
                    return Ok(APP_STATUS_APPLICATION_ERROR);
                }
                Err(payload) => {
                    error!("request {}: response body panicked: {}", id, panic_message(&*payload));
                    return Ok(APP_STATUS_APPLICATION_ERROR);
                }
            }
        }
    }

    fn end_request(
        &mut self,
        id: u16,
        app_status: u32,
        protocol_status: ProtocolStatus,
        keep_connection: bool,
    ) -> Result<()> {
        debug!("request {}: end, app status {}, {:?}", id, app_status, protocol_status);
        let body = EndRequest { app_status, protocol_status }.to_bytes();
        self.write_record(FastcgiRecord::new(RecordType::EndRequest, id, Bytes::copy_from_slice(&body)))?;

        if !keep_connection && self.requests.is_empty() {
            debug!("request {} did not ask to keep the connection", id);
            self.keep_going = false;
        }
        Ok(())
    }

    fn write_stream(&mut self, record_type: RecordType, id: u16, data: &Bytes) -> Result<()> {
        let mut buf = BytesMut::new();
        for record in stream_records(record_type, id, data) {
            self.codec.encode(&record, &mut buf)?;
        }
        if !buf.is_empty() {
            self.sock.send(&buf)?;
        }
        Ok(())
    }

    fn write_record(&mut self, record: FastcgiRecord) -> Result<()> {
        debug!("write: type = {:?}, request id = {}, content length = {}",
               RecordType::from_u8(record.record_type), record.request_id, record.content_length());
        let mut buf = BytesMut::with_capacity(record.wire_len());
        self.codec.encode(&record, &mut buf)?;
        self.sock.send(&buf)?;
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "<non-string panic payload>"
    }
}
