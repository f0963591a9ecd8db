use std::{error, fmt, io};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;
use super::pkt::{self, NTPMode, PACKET_LENGTH};
use super::timestamp::{NTPTimestamp, UnixTimestamp};

/// Largest reply we read from upstream.
const MAX_REPLY_LENGTH: usize = 1024;

#[derive(Debug)]
/// Why no upstream time could be obtained.
pub enum TimeSourceError {
  /// The host name couldn't be resolved.
  Resolve(String, io::Error),
  /// The host name resolved to nothing.
  NoAddress(String),
  /// No reply within the timeout.
  Timeout,
  Io(io::Error),
  /// The reply wasn't a usable server response.
  Protocol(String),
}

impl fmt::Display for TimeSourceError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match *self {
      TimeSourceError::Resolve(ref host, ref err) => write!(f, "Couldn't resolve {}: {}", host, err),
      TimeSourceError::NoAddress(ref host) => write!(f, "{} has no addresses", host),
      TimeSourceError::Timeout => write!(f, "Upstream server didn't reply in time"),
      TimeSourceError::Io(ref err) => write!(f, "Upstream query failed: {}", err),
      TimeSourceError::Protocol(ref why) => write!(f, "Bad upstream reply: {}", why),
    }
  }
}

impl error::Error for TimeSourceError {
  fn source(&self) -> Option<&(dyn error::Error + 'static)> {
    match *self {
      TimeSourceError::Resolve(_, ref err) | TimeSourceError::Io(ref err) => Some(err),
      _ => None,
    }
  }
}

impl From<io::Error> for TimeSourceError {
  fn from(err: io::Error) -> TimeSourceError {
    match err.kind() {
      io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TimeSourceError::Timeout,
      _ => TimeSourceError::Io(err),
    }
  }
}

/// Somewhere to get the current time from.
pub trait TimeSource {
  fn query(&self) -> Result<UnixTimestamp, TimeSourceError>;
}

#[derive(Debug, Clone)]
/// Queries an upstream (S)NTP server, once per call.
pub struct SntpClient {
  host: String,
  port: u16,
  timeout: Duration,
}

impl SntpClient {
  pub fn new(host: String, port: u16, timeout: Duration) -> SntpClient {
    SntpClient { host, port, timeout }
  }

  pub fn host(&self) -> &str {
    &self.host
  }

  fn resolve(&self) -> Result<SocketAddr, TimeSourceError> {
    (self.host.as_ref(), self.port)
      .to_socket_addrs()
      .map_err(|err| TimeSourceError::Resolve(self.host.clone(), err))?
      .next()
      .ok_or_else(|| TimeSourceError::NoAddress(self.host.clone()))
  }
}

impl TimeSource for SntpClient {
  fn query(&self) -> Result<UnixTimestamp, TimeSourceError> {
    let server = self.resolve()?;
    let local: SocketAddr = if server.is_ipv4() {
      (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
      (Ipv6Addr::UNSPECIFIED, 0).into()
    };

    let socket = UdpSocket::bind(local)?;
    socket.set_read_timeout(Some(self.timeout))?;
    socket.set_write_timeout(Some(self.timeout))?;

    let xmt = NTPTimestamp::from(UnixTimestamp::now());
    trace!("Querying {} ({})", self.host, server);
    socket.send_to(&pkt::NTPPacket::client_request(xmt).to_bytes(), server)?;

    let mut buf = [0u8; MAX_REPLY_LENGTH];
    let (bytes, _) = socket.recv_from(&mut buf)?;
    let reply = check_reply(&buf[..bytes], xmt)?;
    debug!("{} is at stratum {}", self.host, reply.stratum);
    Ok(reply.xmt.into())
  }
}

/// Check that `reply` answers the request we sent at `sent`.
fn check_reply(reply: &[u8], sent: NTPTimestamp) -> Result<pkt::NTPPacket, TimeSourceError> {
  let (_, pkt) = pkt::parse(reply).map_err(|_| {
    TimeSourceError::Protocol(format!("{} bytes is shorter than {}", reply.len(), PACKET_LENGTH))
  })?;

  if pkt.mode != NTPMode::Server {
    return Err(TimeSourceError::Protocol(format!("mode {:?}", pkt.mode)));
  }
  if pkt.stratum == 0 {
    let code = String::from_utf8_lossy(&pkt.refid).into_owned();
    return Err(TimeSourceError::Protocol(format!("kiss-o'-death {}", code)));
  }
  if pkt.stratum >= super::MAXSTRAT {
    return Err(TimeSourceError::Protocol(format!("unsynchronized (stratum {})", pkt.stratum)));
  }
  if pkt.org != sent {
    return Err(TimeSourceError::Protocol("originate timestamp doesn't match our request".to_owned()));
  }
  if pkt.xmt.is_zero() {
    return Err(TimeSourceError::Protocol("zero transmit timestamp".to_owned()));
  }

  Ok(pkt)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::thread;

  fn server_reply(org: NTPTimestamp, xmt: NTPTimestamp) -> pkt::NTPPacket {
    let mut reply = pkt::NTPPacket::client_request(xmt);
    reply.mode = NTPMode::Server;
    reply.stratum = 2;
    reply.org = org;
    reply
  }

  /// Answers one request with `xmt`, letting `tweak` damage the reply.
  fn fake_upstream<F>(xmt: NTPTimestamp, tweak: F) -> (u16, thread::JoinHandle<()>)
    where F: FnOnce(&mut pkt::NTPPacket) + Send + 'static
  {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = socket.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
      let mut buf = [0u8; MAX_REPLY_LENGTH];
      let (bytes, from) = socket.recv_from(&mut buf).unwrap();
      let (_, request) = pkt::parse(&buf[..bytes]).unwrap();
      assert_eq!(request.mode, NTPMode::Client);
      let mut reply = server_reply(request.xmt, xmt);
      tweak(&mut reply);
      socket.send_to(&reply.to_bytes(), from).unwrap();
    });
    (port, handle)
  }

  fn client(port: u16, timeout: Duration) -> SntpClient {
    SntpClient::new("127.0.0.1".to_owned(), port, timeout)
  }

  #[test]
  fn returns_upstream_transmit_time() {
    let xmt = NTPTimestamp { seconds: 3_208_988_800, fraction: 1 << 31 };
    let (port, handle) = fake_upstream(xmt, |_| {});
    let time = client(port, Duration::from_secs(5)).query().unwrap();
    handle.join().unwrap();
    assert_eq!(time, UnixTimestamp::new(1_000_000_000, 1 << 31));
  }

  #[test]
  fn silent_upstream_times_out() {
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = silent.local_addr().unwrap().port();
    match client(port, Duration::from_millis(100)).query() {
      Err(TimeSourceError::Timeout) => {}
      other => panic!("expected a timeout, got {:?}", other),
    }
  }

  #[test]
  fn kiss_of_death_is_a_protocol_error() {
    let xmt = NTPTimestamp { seconds: 3_208_988_800, fraction: 0 };
    let (port, handle) = fake_upstream(xmt, |reply| {
      reply.stratum = 0;
      reply.refid = *b"RATE";
    });
    let err = client(port, Duration::from_secs(5)).query().unwrap_err();
    handle.join().unwrap();
    assert_eq!(err.to_string(), "Bad upstream reply: kiss-o'-death RATE");
  }

  #[test]
  fn mismatched_originate_is_rejected() {
    let xmt = NTPTimestamp { seconds: 3_208_988_800, fraction: 0 };
    let (port, handle) = fake_upstream(xmt, |reply| reply.org = NTPTimestamp::default());
    let result = client(port, Duration::from_secs(5)).query();
    handle.join().unwrap();
    assert!(matches!(result, Err(TimeSourceError::Protocol(_))));
  }

  #[test]
  fn check_reply_rejects_short_and_client_packets() {
    let sent = NTPTimestamp { seconds: 5, fraction: 5 };
    assert!(matches!(check_reply(&[0u8; 47], sent), Err(TimeSourceError::Protocol(_))));

    let client_pkt = pkt::NTPPacket::client_request(sent).to_bytes();
    assert!(matches!(check_reply(&client_pkt, sent), Err(TimeSourceError::Protocol(_))));

    let good = server_reply(sent, NTPTimestamp { seconds: 9, fraction: 0 }).to_bytes();
    assert_eq!(check_reply(&good, sent).unwrap().xmt.seconds, 9);

    let zero = server_reply(sent, NTPTimestamp::default()).to_bytes();
    assert!(matches!(check_reply(&zero, sent), Err(TimeSourceError::Protocol(_))));
  }

  #[test]
  fn timeouts_map_to_timeout() {
    let err = TimeSourceError::from(io::Error::from(io::ErrorKind::WouldBlock));
    assert!(matches!(err, TimeSourceError::Timeout));
    let err = TimeSourceError::from(io::Error::from(io::ErrorKind::ConnectionRefused));
    assert!(matches!(err, TimeSourceError::Io(_)));
  }
}
