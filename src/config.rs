use super::error::{Error, Result};
use super::s11n::{FCGI_MAX_CONNS, FCGI_MAX_REQS, FCGI_MPXS_CONNS};

use std::collections::HashMap;
use std::path::PathBuf;

pub const WEB_SERVER_ADDRS_VAR: &str = "FCGI_WEB_SERVER_ADDRS";
pub const MAX_CONNS_VAR: &str = "IISFCGI_MAX_CONNS";
pub const MAX_REQS_VAR: &str = "IISFCGI_MAX_REQS";
pub const MAX_PARAMS_BYTES_VAR: &str = "IISFCGI_MAX_PARAMS_BYTES";
pub const MAX_STDIN_BYTES_VAR: &str = "IISFCGI_MAX_STDIN_BYTES";

pub const LOG_FILE_NAME: &str = "iisfcgi.log";

/// Size limits for the input of a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLimits {
    pub max_params_bytes: usize,
    pub max_stdin_bytes: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        RequestLimits {
            max_params_bytes: 1_048_576, // 1 MiB
            max_stdin_bytes: 33_554_432, // 32 MiB
        }
    }
}

/// Process-wide settings, read once at startup and passed by reference afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Trusted front-end addresses. `None` accepts everything. There is no peer
    /// address to check them against on a stdio transport, so they are only logged.
    pub web_server_addrs: Option<Vec<String>>,
    /// Advertised as FCGI_MAX_CONNS.
    pub max_conns: u32,
    /// Advertised as FCGI_MAX_REQS.
    pub max_reqs: u32,
    pub limits: RequestLimits,
    pub log_file: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            web_server_addrs: None,
            max_conns: 1,
            max_reqs: 1,
            limits: RequestLimits::default(),
            log_file: std::env::temp_dir().join(LOG_FILE_NAME),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<ServerConfig> {
        ServerConfig::from_vars(std::env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Result<ServerConfig>
        where I: IntoIterator<Item = (K, V)>,
              K: Into<String>,
              V: Into<String>,
    {
        let vars: HashMap<String, String> = vars.into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let defaults = ServerConfig::default();

        let config = ServerConfig {
            web_server_addrs: vars.get(WEB_SERVER_ADDRS_VAR)
                .map(|v| parse_web_server_addrs(v))
                .filter(|addrs| !addrs.is_empty()),
            max_conns: parse_number(&vars, MAX_CONNS_VAR, defaults.max_conns)?,
            max_reqs: parse_number(&vars, MAX_REQS_VAR, defaults.max_reqs)?,
            limits: RequestLimits {
                max_params_bytes: parse_number(&vars, MAX_PARAMS_BYTES_VAR,
                                               defaults.limits.max_params_bytes)?,
                max_stdin_bytes: parse_number(&vars, MAX_STDIN_BYTES_VAR,
                                              defaults.limits.max_stdin_bytes)?,
            },
            log_file: log_dir(&vars).join(LOG_FILE_NAME),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_conns == 0 {
            return Err(Error::Config(format!("{} must be >= 1", MAX_CONNS_VAR)));
        }
        if self.max_reqs == 0 {
            return Err(Error::Config(format!("{} must be >= 1", MAX_REQS_VAR)));
        }
        if self.limits.max_params_bytes == 0 {
            return Err(Error::Config(format!("{} must be >= 1", MAX_PARAMS_BYTES_VAR)));
        }
        if self.limits.max_stdin_bytes == 0 {
            return Err(Error::Config(format!("{} must be >= 1", MAX_STDIN_BYTES_VAR)));
        }
        Ok(())
    }

    /// The answer to one FCGI_GET_VALUES query variable, if we know it.
    pub fn capability(&self, name: &[u8]) -> Option<String> {
        match name {
            n if n == FCGI_MAX_CONNS.as_bytes() => Some(self.max_conns.to_string()),
            n if n == FCGI_MAX_REQS.as_bytes() => Some(self.max_reqs.to_string()),
            // One stream, one request at a time.
            n if n == FCGI_MPXS_CONNS.as_bytes() => Some("0".to_owned()),
            _ => None,
        }
    }
}

pub fn parse_web_server_addrs(value: &str) -> Vec<String> {
    value.split(',')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_number<T: std::str::FromStr>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T>
    where T::Err: std::fmt::Display
{
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw.trim()
            .parse()
            .map_err(|e| Error::Config(format!("{}={:?}: {}", name, raw, e))),
    }
}

/// IIS swallows the standard streams, so logs go to a file: under %TEMP% by default,
/// under the IIS user's Logs directory when known, in a per-site subdirectory for
/// IIS Express.
fn log_dir(vars: &HashMap<String, String>) -> PathBuf {
    let mut dir = match vars.get("IIS_USER_HOME") {
        Some(home) => PathBuf::from(home).join("Logs"),
        None => vars.get("TEMP").map(PathBuf::from).unwrap_or_else(std::env::temp_dir),
    };
    if let Some(site) = vars.get("IISEXPRESS_SITENAME") {
        dir.push(site);
    }
    dir
}
