extern crate env_logger;
extern crate iisfcgi;
#[macro_use] extern crate log;

use env_logger::{Builder, Env, Target};
use iisfcgi::{demo, Server, ServerConfig};

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::process;

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(dir) = path.parent() {
        // The directory doesn't exist until IIS logs its first request.
        fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Logs never go to stdout: that is the FastCGI stream.
fn init_logging(log_file: Option<&Path>) {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.target(Target::Stderr);
    if let Some(path) = log_file {
        match open_log_file(path) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                builder.init();
                warn!("cannot open log file {:?}, logging to stderr: {}", path, e);
                return;
            }
        }
    }
    builder.init();
}

fn main() {
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_logging(None);
            error!("{}", e);
            process::exit(2);
        }
    };
    init_logging(Some(&config.log_file));

    let server = Server::new(demo::environ_page, config);
    info!("Starting FCGI server");
    match server.run() {
        Ok(true) => info!("restart requested; exiting"),
        Ok(false) => info!("FCGI server finished"),
        Err(e) => {
            error!("server.run() failed: {}", e);
            process::exit(1);
        }
    }
}
