//! Socket behavior backed by a pair of plain byte streams.
//!
//! The host web server talks to us over the process's standard input and output
//! rather than a connected socket, so the connection code is written against the
//! small socket-like `StreamSocket` trait and `FileSocket` supplies it from any
//! reader/writer pair.

use bytes::{Bytes, BytesMut};

use std::io::{self, Read, Write};
use std::net::Shutdown;

use super::signals::StopSignal;

pub trait StreamSocket {
    /// Read exactly `n` bytes, or fewer only when the stream has ended.
    fn recv(&mut self, n: usize) -> io::Result<Bytes>;

    /// Write all of `data`, returning how many bytes were written.
    fn send(&mut self, data: &[u8]) -> io::Result<usize>;

    fn shutdown(&mut self, how: Shutdown) -> io::Result<()>;

    /// Release both halves. Calling this more than once is harmless.
    fn close(&mut self);
}

pub struct FileSocket<R: Read, W: Write> {
    input: Option<R>,
    output: Option<W>,
    stop: Option<&'static StopSignal>,
}

impl<R: Read, W: Write> FileSocket<R, W> {
    pub fn new(input: R, output: W) -> FileSocket<R, W> {
        FileSocket {
            input: Some(input),
            output: Some(output),
            stop: None,
        }
    }

    /// Let a read interrupted by a signal give up once `stop` says the server is stopping.
    /// Without this, interrupted reads are simply retried.
    pub fn with_stop_signal(mut self, stop: &'static StopSignal) -> FileSocket<R, W> {
        self.stop = Some(stop);
        self
    }
}

impl FileSocket<io::Stdin, io::Stdout> {
    /// Bind to the process's standard input and output.
    ///
    /// Rust's standard streams never translate line endings, so the binary protocol
    /// passes through untouched on every platform.
    pub fn stdio() -> io::Result<FileSocket<io::Stdin, io::Stdout>> {
        let stdin = io::stdin();
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            set_close_on_exec(stdin.as_raw_fd())?;
        }
        Ok(FileSocket::new(stdin, io::stdout()))
    }
}

#[cfg(unix)]
fn set_close_on_exec(fd: std::os::unix::io::RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl<R: Read, W: Write> StreamSocket for FileSocket<R, W> {
    fn recv(&mut self, n: usize) -> io::Result<Bytes> {
        let stop = self.stop;
        let input = match self.input {
            Some(ref mut input) => input,
            None => return Ok(Bytes::new()),
        };

        let mut buf = BytesMut::zeroed(n);
        let mut filled = 0;
        while filled < n {
            match input.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(count) => filled += count,
                Err(e) => {
                    if e.kind() == io::ErrorKind::Interrupted
                        && !stop.map_or(false, |s| s.is_stopping())
                    {
                        continue;
                    }
                    return Err(e);
                }
            }
        }
        buf.truncate(filled);
        Ok(buf.freeze())
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        match self.output {
            Some(ref mut output) => {
                output.write_all(data)?;
                output.flush()?;
                Ok(data.len())
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "output stream has been shut down",
            )),
        }
    }

    fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        if let Shutdown::Read | Shutdown::Both = how {
            self.input = None;
        }
        if let Shutdown::Write | Shutdown::Both = how {
            if let Some(mut output) = self.output.take() {
                output.flush()?;
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        self.input = None;
        if let Some(mut output) = self.output.take() {
            if let Err(e) = output.flush() {
                debug!("flush on close failed: {}", e);
            }
        }
    }
}
