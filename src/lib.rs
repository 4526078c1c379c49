//! A FastCGI responder for web servers that run FastCGI applications as child
//! processes and talk to them over stdin/stdout, as IIS does, instead of over a
//! listening socket.

extern crate byteorder;
extern crate bytes;
#[macro_use] extern crate enum_primitive;
extern crate libc;
#[macro_use] extern crate log;
extern crate thiserror;

mod config;
pub mod demo;
mod error;
mod hi;
mod lowlevel;
mod s11n;
mod server;
mod signals;
mod socket;

pub use config::{parse_web_server_addrs, RequestLimits, ServerConfig};
pub use error::{AppError, Error, Result};
pub use hi::connection::{Connection, SessionEnd};
pub use hi::handler::{Application, Environ, FastcgiRequest};
pub use hi::request::sanitize_environ;
pub use hi::response::{BodyChunks, FastcgiResponse};
pub use lowlevel::{read_params, stream_records, write_params, BeginRequest, EndRequest,
                   FastcgiLowlevelCodec, FastcgiRecord};
pub use s11n::*;
pub use server::Server;
pub use signals::{SignalHandlers, StopSignal, PROCESS_STOP};
pub use socket::{FileSocket, StreamSocket};
