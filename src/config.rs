use std::{error, fmt, io};
use std::fs::File;
use std::io::prelude::*;
use std::num::ParseIntError;
use std::path::Path;
use std::time::Duration;
use crate::ntp::UnixTimestamp;

/// Where the offset lives unless configured otherwise.
pub const DEFAULT_OFFSET_FILE: &str = "sntp_server.conf";

/// Upstream server queried unless configured otherwise.
pub const DEFAULT_UPSTREAM: &str = "time.windows.com";

/// Seconds to wait for the upstream server.
pub const DEFAULT_TIMEOUT: f64 = 10.0;

#[derive(Debug)]
/// Combined error type for configuration errors.
pub enum ConfigError {
  Io(io::Error),
  Parse(toml::de::Error),
  Offset(ParseIntError),
  Invalid(String),
}

impl fmt::Display for ConfigError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match *self {
      ConfigError::Io(ref err) => write!(f, "Couldn't read config: {}", err),
      ConfigError::Parse(ref err) => write!(f, "Couldn't parse config: {}", err),
      ConfigError::Offset(ref err) => write!(f, "Offset isn't a whole number of seconds: {}", err),
      ConfigError::Invalid(ref why) => write!(f, "Invalid config: {}", why),
    }
  }
}

impl error::Error for ConfigError {
  fn source(&self) -> Option<&(dyn error::Error + 'static)> {
    match *self {
      ConfigError::Io(ref err) => Some(err),
      ConfigError::Parse(ref err) => Some(err),
      ConfigError::Offset(ref err) => Some(err),
      ConfigError::Invalid(_) => None,
    }
  }
}

impl From<io::Error> for ConfigError {
  fn from(err: io::Error) -> ConfigError {
    ConfigError::Io(err)
  }
}

impl From<toml::de::Error> for ConfigError {
  fn from(err: toml::de::Error) -> ConfigError {
    ConfigError::Parse(err)
  }
}

impl From<ParseIntError> for ConfigError {
  fn from(err: ParseIntError) -> ConfigError {
    ConfigError::Offset(err)
  }
}

#[derive(Debug, Default, Deserialize)]
/// Configuration relating to the network.
pub struct Network {
  pub ip: Option<String>,
  pub port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
/// The server we take our time from.
pub struct Upstream {
  pub host: Option<String>,
  pub port: Option<u16>,
  /// Seconds.
  pub timeout: Option<f64>,
}

impl Upstream {
  pub fn host(&self) -> &str {
    self.host.as_ref().map_or(DEFAULT_UPSTREAM, String::as_ref)
  }

  pub fn timeout(&self) -> Result<Duration, ConfigError> {
    let secs = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
    match Duration::try_from_secs_f64(secs) {
      Ok(timeout) if !timeout.is_zero() => Ok(timeout),
      _ => Err(ConfigError::Invalid(format!("upstream timeout of {} seconds", secs))),
    }
  }
}

#[derive(Debug, Deserialize)]
/// Configuration relating to the logging subsystem,
pub struct Log {
  pub level: String,
  pub file: Option<String>,
}

impl Default for Log {
  fn default() -> Log {
    Log {
      level: "INFO".to_owned(),
      file: None,
    }
  }
}

#[derive(Debug, Deserialize)]
/// Configuration relating to daemonization.
pub struct Daemon {
  pub pid_file: Option<String>,
  pub working_directory: Option<String>,
  pub user: Option<String>,
  pub user_id: Option<u32>,
  pub group: Option<String>,
  pub group_id: Option<u32>,
  pub umask: Option<u32>,
}

#[derive(Debug, Deserialize)]
/// General configuration superstructure.
pub struct Config {
  /// File holding the offset, in seconds.
  pub offset_file: Option<String>,
  /// Configuration relating to the network.
  #[serde(default)]
  pub network: Network,
  /// The server we take our time from.
  #[serde(default)]
  pub upstream: Upstream,
  /// Configuration relating to the logging subsystem,
  #[serde(default)]
  pub log: Log,
  /// Configuration relating to daemonization.
  pub daemon: Option<Daemon>,
}

impl Config {
  /// Read configuration from a file.
  pub fn read<P: AsRef<Path>>(filename: P) -> Result<Config, ConfigError> {
    let mut config_text = String::new();
    File::open(filename)?.read_to_string(&mut config_text)?;
    let config: Config = toml::from_str(config_text.as_ref())?;
    config.upstream.timeout()?;
    Ok(config)
  }

  pub fn offset_file(&self) -> &str {
    self.offset_file.as_ref().map_or(DEFAULT_OFFSET_FILE, String::as_ref)
  }
}

#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
/// Whole seconds added to every time we serve. Fixed once loaded.
pub struct Offset(i64);

impl Offset {
  pub fn new(seconds: i64) -> Offset {
    Offset(seconds)
  }

  /// Read the offset from a file holding nothing but a signed integer.
  pub fn load<P: AsRef<Path>>(filename: P) -> Result<Offset, ConfigError> {
    let mut text = String::new();
    File::open(filename)?.read_to_string(&mut text)?;
    Ok(Offset(text.trim().parse()?))
  }

  pub fn apply(&self, time: UnixTimestamp) -> UnixTimestamp {
    time.shifted(self.0)
  }
}

impl fmt::Display for Offset {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{:+} seconds", self.0)
  }
}
