#[macro_use]
extern crate log;

#[macro_use]
extern crate serde_derive;

use std::env;
use std::str::FromStr;

#[macro_use]
mod macros;

mod config;
mod daesock;
mod ntp;

const DEFAULT_CONFIG: &str = "config.toml";

/// Initialize Logging Subsystem
fn logging(cfg: &config::Log) -> Result<(), fern::InitError> {
  let level = log::LevelFilter::from_str(cfg.level.as_ref()).unwrap_or_else(|_| {
    println!("That isn't a valid loglevel. Valid loglevels:{}{}{}{}{}{}",
             "\n\tOFF",
             "\n\tERROR",
             "\n\tWARN",
             "\n\tINFO",
             "\n\tDEBUG",
             "\n\tTRACE");
    std::process::exit(1);
  });

  let mut dispatch = fern::Dispatch::new()
    .format(|out, message, record| {
      out.finish(format_args!("{} [{}] {}", record.level(), chrono::Local::now().to_rfc3339(), message))
    })
    .level(level)
    .chain(std::io::stderr());

  // If specified, log to a file
  if let Some(ref filename) = cfg.file {
    dispatch = dispatch.chain(fern::log_file(filename)?);
  }

  dispatch.apply()?;
  Ok(())
}

fn main() {
  // Apply configuration
  let config_file = env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_owned());
  let cfg = config::Config::read(&config_file).unwrap_or_else(|err| {
    println!("{}: {}", config_file, err);
    std::process::exit(1);
  });

  // Init logging
  logging(&cfg.log).unwrap_or_else(|err| {
    println!("Couldn't start logging: {}", err);
    std::process::exit(1);
  });

  // The offset is read exactly once, before we bind.
  let offset = config::Offset::load(cfg.offset_file())
    .unwrap_or_else(|err| fatal!("Couldn't load offset from {}: {}", cfg.offset_file(), err));

  let timeout = cfg.upstream.timeout().unwrap_or_else(|err| fatal!("{}", err));
  let upstream = ntp::SntpClient::new(cfg.upstream.host().to_owned(),
                                      cfg.upstream.port.unwrap_or(ntp::PORT),
                                      timeout);
  info!("Serving time from {} shifted by {} (upstream timeout {:?}).",
        upstream.host(),
        offset,
        timeout);

  // daemonize if supported and enabled
  // we bind the socket here, while we're still root
  let socket = if let Some(daemon) = cfg.daemon {
    debug!("Daemonizing");
    daesock::daemonize(daemon, cfg.network).unwrap_or_else(|err| fatal!("{}", err))
  } else {
    if cfg!(unix) && unsafe { libc::geteuid() } == 0 {
      warn!("Running as root without daemonization. This is a bad idea!");
      warn!("Enable daemonization in the configuration by adding a [daemon] section.");
    }
    daesock::get_socket(&cfg.network).unwrap_or_else(|err| fatal!("Couldn't bind to port: {}", err))
  };

  let server = ntp::Server::new(socket, offset, upstream);
  match server.local_addr() {
    Ok(addr) => info!("Now listening for clients on {}...", addr),
    Err(err) => fatal!("{}", err),
  }
  server.run()
}
