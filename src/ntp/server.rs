use std::{error, fmt, io};
use std::net::{SocketAddr, UdpSocket};
use crate::config::Offset;
use super::pkt::{build_response, extract_originate_time, MalformedRequest, PACKET_LENGTH};
use super::timestamp::UnixTimestamp;
use super::upstream::{TimeSource, TimeSourceError};

/// The maximum request length that will be read; the rest is discarded.
const MAX_PACKET_LENGTH: usize = 1024;

#[derive(Debug)]
/// Reasons a single request goes unanswered.
pub enum RequestError {
  TimeSource(TimeSourceError),
  Malformed(MalformedRequest),
}

impl fmt::Display for RequestError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match *self {
      RequestError::TimeSource(ref err) => write!(f, "No upstream time: {}", err),
      RequestError::Malformed(ref err) => write!(f, "Malformed request: {}", err),
    }
  }
}

impl error::Error for RequestError {
  fn source(&self) -> Option<&(dyn error::Error + 'static)> {
    match *self {
      RequestError::TimeSource(ref err) => Some(err),
      RequestError::Malformed(ref err) => Some(err),
    }
  }
}

impl From<TimeSourceError> for RequestError {
  fn from(err: TimeSourceError) -> RequestError {
    RequestError::TimeSource(err)
  }
}

impl From<MalformedRequest> for RequestError {
  fn from(err: MalformedRequest) -> RequestError {
    RequestError::Malformed(err)
  }
}

/// Answers SNTP requests on one socket, one at a time.
pub struct Server<T> {
  socket: UdpSocket,
  offset: Offset,
  source: T,
}

impl<T: TimeSource> Server<T> {
  pub fn new(socket: UdpSocket, offset: Offset, source: T) -> Server<T> {
    Server { socket, offset, source }
  }

  pub fn local_addr(&self) -> io::Result<SocketAddr> {
    self.socket.local_addr()
  }

  /// Serve until the process is killed. Socket errors are logged, not fatal.
  pub fn run(&self) -> ! {
    loop {
      if let Err(err) = self.serve_one() {
        error!("Socket error: {}", err);
      }
    }
  }

  /// Wait for one datagram and answer it if we can.
  ///
  /// Only socket errors are returned; a request we can't answer is logged
  /// and dropped without a reply.
  pub fn serve_one(&self) -> io::Result<()> {
    let mut buf = [0u8; MAX_PACKET_LENGTH];
    let (bytes, from) = self.socket.recv_from(&mut buf)?;
    let received = UnixTimestamp::now();
    info!("Received request from {}", from);

    match self.respond(&buf[..bytes], received) {
      Ok((adjusted, response)) => {
        self.socket.send_to(&response, from)?;
        info!("Sent time {} to {}", adjusted, from);
      }
      Err(err) => warn!("Dropping request from {}: {}", from, err),
    }
    Ok(())
  }

  fn respond(&self,
             request: &[u8],
             received: UnixTimestamp)
             -> Result<(UnixTimestamp, [u8; PACKET_LENGTH]), RequestError> {
    let originate = extract_originate_time(request)?;
    let adjusted = self.offset.apply(self.source.query()?);
    Ok((adjusted, build_response(adjusted, originate, received)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ntp::pkt::{self, NTPPacket};
  use crate::ntp::timestamp::NTPTimestamp;
  use std::cell::{Cell, RefCell};
  use std::collections::VecDeque;
  use std::time::Duration;

  /// Hands out scripted answers and counts queries.
  struct Scripted {
    answers: RefCell<VecDeque<Result<UnixTimestamp, TimeSourceError>>>,
    queries: Cell<usize>,
  }

  impl Scripted {
    fn new(answers: Vec<Result<UnixTimestamp, TimeSourceError>>) -> Scripted {
      Scripted {
        answers: RefCell::new(answers.into()),
        queries: Cell::new(0),
      }
    }
  }

  impl TimeSource for Scripted {
    fn query(&self) -> Result<UnixTimestamp, TimeSourceError> {
      self.queries.set(self.queries.get() + 1);
      self.answers.borrow_mut().pop_front().unwrap_or(Err(TimeSourceError::Timeout))
    }
  }

  fn setup(offset: i64, answers: Vec<Result<UnixTimestamp, TimeSourceError>>) -> (Server<Scripted>, UdpSocket) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let server = Server::new(socket, Offset::new(offset), Scripted::new(answers));
    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
    client.connect(server.local_addr().unwrap()).unwrap();
    (server, client)
  }

  fn request(xmt: NTPTimestamp) -> [u8; PACKET_LENGTH] {
    NTPPacket::client_request(xmt).to_bytes()
  }

  fn receive(client: &UdpSocket) -> io::Result<Vec<u8>> {
    let mut buf = [0u8; MAX_PACKET_LENGTH];
    let bytes = client.recv(&mut buf)?;
    Ok(buf[..bytes].to_vec())
  }

  fn assert_no_reply(client: &UdpSocket) {
    let err = receive(client).unwrap_err();
    assert!(matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut), "{:?}", err);
  }

  #[test]
  fn answers_with_offset_upstream_time() {
    let upstream = UnixTimestamp::from_secs_f64(1_000_000_000.0);
    let (server, client) = setup(5, vec![Ok(upstream)]);
    let xmt = NTPTimestamp { seconds: 3_913_056_000, fraction: 0xdead_beef };

    let before = UnixTimestamp::now();
    client.send(&request(xmt)).unwrap();
    server.serve_one().unwrap();
    let reply = receive(&client).unwrap();
    let (_, reply) = pkt::parse(&reply).unwrap();

    let expected = NTPTimestamp::from(UnixTimestamp::from_secs_f64(1_000_000_005.0));
    assert_eq!(reply.reference_timestamp, expected);
    assert_eq!(reply.xmt, expected);
    assert_eq!(reply.org, xmt);
    assert_ne!(reply.rec, expected);
    assert!(UnixTimestamp::from(reply.rec) >= before);
  }

  #[test]
  fn reply_is_always_48_bytes() {
    let (server, client) = setup(0, vec![Ok(UnixTimestamp::new(1_700_000_000, 0))]);
    let mut long = request(NTPTimestamp::default()).to_vec();
    long.extend_from_slice(&[0u8; 64]);
    client.send(&long).unwrap();
    server.serve_one().unwrap();
    assert_eq!(receive(&client).unwrap().len(), PACKET_LENGTH);
  }

  #[test]
  fn negative_offset_moves_time_back() {
    let (server, client) = setup(-3600, vec![Ok(UnixTimestamp::new(1_700_000_000, 7))]);
    client.send(&request(NTPTimestamp::default())).unwrap();
    server.serve_one().unwrap();
    let (_, reply) = pkt::parse(&receive(&client).unwrap()).unwrap();
    assert_eq!(UnixTimestamp::from(reply.xmt), UnixTimestamp::new(1_699_996_400, 7));
  }

  #[test]
  fn short_request_is_dropped_and_server_keeps_serving() {
    let (server, client) = setup(0, vec![Ok(UnixTimestamp::new(1_700_000_000, 0))]);

    client.send(&[0x23u8; 47]).unwrap();
    server.serve_one().unwrap();
    assert_no_reply(&client);
    assert_eq!(server.source.queries.get(), 0);

    client.send(&request(NTPTimestamp::default())).unwrap();
    server.serve_one().unwrap();
    assert_eq!(receive(&client).unwrap().len(), PACKET_LENGTH);
  }

  #[test]
  fn upstream_failure_is_dropped_and_server_keeps_serving() {
    let (server, client) = setup(0, vec![
      Err(TimeSourceError::Timeout),
      Err(TimeSourceError::NoAddress("time.invalid".to_owned())),
      Ok(UnixTimestamp::new(1_700_000_000, 0)),
    ]);

    for _ in 0..2 {
      client.send(&request(NTPTimestamp::default())).unwrap();
      server.serve_one().unwrap();
      assert_no_reply(&client);
    }

    client.send(&request(NTPTimestamp::default())).unwrap();
    server.serve_one().unwrap();
    let (_, reply) = pkt::parse(&receive(&client).unwrap()).unwrap();
    assert_eq!(UnixTimestamp::from(reply.xmt), UnixTimestamp::new(1_700_000_000, 0));
    assert_eq!(server.source.queries.get(), 3);
  }

  #[test]
  fn request_errors_describe_themselves() {
    let err = RequestError::from(MalformedRequest { len: 3 });
    assert_eq!(err.to_string(), "Malformed request: request of 3 bytes is shorter than the 48-byte NTP header");
    let err = RequestError::from(TimeSourceError::Timeout);
    assert_eq!(err.to_string(), "No upstream time: Upstream server didn't reply in time");
  }
}
