//! The process-level run loop.
//!
//! The web server launches one process per worker slot and talks to it over stdin and
//! stdout, so there is nothing to `accept()` and no socket to `select()` on. Instead the
//! loop blocks reading the first header off the stream and hands it to a single
//! `Connection`, which owns the stream until the session ends.

use super::config::ServerConfig;
use super::error::{Error, Result};
use super::hi::connection::{Connection, SessionEnd};
use super::hi::handler::Application;
use super::s11n::HEADER_LEN;
use super::signals::{SignalHandlers, StopSignal, PROCESS_STOP};
use super::socket::{FileSocket, StreamSocket};

use std::io;
use std::net::Shutdown;

pub struct Server<A: Application> {
    app: A,
    config: ServerConfig,
}

/// Shuts down and closes the socket however the session ends.
struct SocketGuard<S: StreamSocket> {
    sock: S,
}

impl<S: StreamSocket> Drop for SocketGuard<S> {
    fn drop(&mut self) {
        if let Err(e) = self.sock.shutdown(Shutdown::Both) {
            debug!("shutdown failed: {}", e);
        }
        self.sock.close();
    }
}

impl<A: Application> Server<A> {
    pub fn new(app: A, config: ServerConfig) -> Server<A> {
        Server { app, config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve the web server on this process's stdin/stdout. Returns true if the
    /// session ended because a restart (SIGHUP) was requested.
    pub fn run(&self) -> Result<bool> {
        PROCESS_STOP.reset();
        let _handlers = SignalHandlers::install()?;
        let sock = FileSocket::stdio()?.with_stop_signal(&PROCESS_STOP);
        self.run_with(sock, &PROCESS_STOP)
    }

    /// Serve one session over `sock`.
    pub fn run_with<S: StreamSocket>(&self, sock: S, stop: &StopSignal) -> Result<bool> {
        match self.config.web_server_addrs {
            Some(ref addrs) => info!("trusted web server addresses: {:?} (not verifiable on this transport)", addrs),
            None => debug!("no web server address list; accepting all"),
        }

        let mut guard = SocketGuard { sock };
        let result = self.run_single(&mut guard.sock, stop);
        drop(guard);

        match result {
            Ok(end) => {
                info!("session ended: {:?}", end);
                Ok(end.restart())
            }
            Err(e) => {
                error!("session failed: {}", e);
                Err(e)
            }
        }
    }

    fn run_single<S: StreamSocket>(&self, sock: &mut S, stop: &StopSignal) -> Result<SessionEnd> {
        if stop.is_stopping() {
            return Ok(SessionEnd::Stopped { restart: stop.restart_requested() });
        }

        // Peek one header's worth so a closed stream never gets a Connection.
        let header = match sock.recv(HEADER_LEN) {
            Ok(header) => header,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted && stop.is_stopping() => {
                return Ok(SessionEnd::Stopped { restart: stop.restart_requested() });
            }
            Err(e) => return Err(Error::Io(e)),
        };
        if header.is_empty() {
            info!("web server closed the stream before sending a record");
            return Ok(SessionEnd::PeerClosed);
        }

        let mut conn = Connection::new(sock, &self.app, &self.config, stop, Some(header));
        let end = conn.run();
        if conn.short_padding_reads() > 0 {
            warn!("{} records ended before their padding", conn.short_padding_reads());
        }
        end
    }
}
