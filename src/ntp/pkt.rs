use nom::bits::bits;
use nom::bits::complete::take;
use nom::number::complete::{be_i8, be_u32, be_u8};
use nom::sequence::tuple;
use nom::IResult;
use std::{error, fmt};
use super::timestamp::{parse_timestamp, NTPTimestamp, UnixTimestamp};

/// Length of an NTP header without extension fields.
pub const PACKET_LENGTH: usize = 48;

/// Byte offsets of the header fields.
mod field {
  pub const LI_VN_MODE: usize = 0;
  pub const STRATUM: usize = 1;
  pub const POLL: usize = 2;
  pub const PRECISION: usize = 3;
  pub const ROOT_DELAY: usize = 4;
  pub const ROOT_DISPERSION: usize = 8;
  pub const REFERENCE_ID: usize = 12;
  pub const REFERENCE_TIMESTAMP: usize = 16;
  pub const ORIGINATE_TIMESTAMP: usize = 24;
  pub const RECEIVE_TIMESTAMP: usize = 32;
  pub const TRANSMIT_TIMESTAMP: usize = 40;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
/// A request too short to carry a transmit timestamp.
pub struct MalformedRequest {
  pub len: usize,
}

impl fmt::Display for MalformedRequest {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "request of {} bytes is shorter than the {}-byte NTP header", self.len, PACKET_LENGTH)
  }
}

impl error::Error for MalformedRequest {}

#[derive(Debug, Clone, Eq, PartialEq)]
/// Network Time Protocol Packet
pub struct NTPPacket {
  /// 2-bit field warning of leap seconds
  pub leap: u8,
  /// 3-bit integer describing current protocol version
  pub version: u8,
  /// 3-bit integer representing the mode
  pub mode: NTPMode,
  /// Indicates server stratum, or 0 for unspecified.
  pub stratum: u8,
  /// Max interval between successive messages, as exponent of 2, in seconds
  pub poll: u8,
  /// System clock precision, as exponent of 2, in seconds
  pub precision: i8,
  /// Total round-trip delay to primary reference source, in seconds.
  /// The fraction point is between bits 15 and 16.
  pub rootdelay: u32,
  /// Maximum error due to clock freq tolerance, in seconds.
  /// The fraction point is between bits 15 and 16.
  pub rootdisp: u32,
  /// Reference ID identifying reference source.
  pub refid: [u8; 4],
  /// Last time system clock set or corrected
  pub reference_timestamp: NTPTimestamp,
  /// Time when request departed client for server
  pub org: NTPTimestamp,
  /// Time when request arrived at server or reply arrived at client
  pub rec: NTPTimestamp,
  /// Time when request departed client or reply departed server
  pub xmt: NTPTimestamp,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
/// NTP packet modes
pub enum NTPMode {
  Reserved = 0,
  SymmetricActive = 1,
  SymmetricPassive = 2,
  Client = 3,
  Server = 4,
  Broadcast = 5,
  NTPControl = 6,
  ReservedPrivate = 7,
}

impl From<u8> for NTPMode {
  /// Only the low three bits are significant.
  fn from(mode: u8) -> NTPMode {
    match mode & 0b111 {
      0 => NTPMode::Reserved,
      1 => NTPMode::SymmetricActive,
      2 => NTPMode::SymmetricPassive,
      3 => NTPMode::Client,
      4 => NTPMode::Server,
      5 => NTPMode::Broadcast,
      6 => NTPMode::NTPControl,
      _ => NTPMode::ReservedPrivate,
    }
  }
}

fn parse_livemo(input: &[u8]) -> IResult<&[u8], (u8, u8, u8)> {
  bits::<_, _, nom::error::Error<(&[u8], usize)>, _, _>(tuple((
    take(2usize), // leap
    take(3usize), // version
    take(3usize), // mode
  )))(input)
}

/// Parse the fixed 48-byte header. Anything after it is left unparsed.
pub fn parse(input: &[u8]) -> IResult<&[u8], NTPPacket> {
  let (input, (leap, version, mode)) = parse_livemo(input)?;
  let (input, (stratum, poll, precision, rootdelay, rootdisp, refid)) =
    tuple((be_u8, be_u8, be_i8, be_u32, be_u32, be_u32))(input)?;
  let (input, (reference_timestamp, org, rec, xmt)) =
    tuple((parse_timestamp, parse_timestamp, parse_timestamp, parse_timestamp))(input)?;

  Ok((input,
      NTPPacket {
        leap,
        version,
        mode: NTPMode::from(mode),
        stratum,
        poll,
        precision,
        rootdelay,
        rootdisp,
        refid: refid.to_be_bytes(),
        reference_timestamp,
        org,
        rec,
        xmt,
      }))
}

impl NTPPacket {
  /// The reply this server sends.
  fn response(reference: NTPTimestamp,
              org: NTPTimestamp,
              rec: NTPTimestamp,
              xmt: NTPTimestamp)
              -> NTPPacket {
    NTPPacket {
      leap: 0,
      version: super::VERSION,
      mode: NTPMode::Server,
      stratum: super::STRATUM,
      poll: super::POLL,
      precision: super::PRECISION,
      rootdelay: 0,
      rootdisp: 0,
      refid: super::REFID,
      reference_timestamp: reference,
      org,
      rec,
      xmt,
    }
  }

  /// A bare client-mode request carrying only a transmit timestamp.
  pub fn client_request(xmt: NTPTimestamp) -> NTPPacket {
    NTPPacket {
      leap: 0,
      version: super::VERSION,
      mode: NTPMode::Client,
      stratum: 0,
      poll: 0,
      precision: 0,
      rootdelay: 0,
      rootdisp: 0,
      refid: [0; 4],
      reference_timestamp: NTPTimestamp::default(),
      org: NTPTimestamp::default(),
      rec: NTPTimestamp::default(),
      xmt,
    }
  }

  /// Serialize the header, big-endian.
  pub fn to_bytes(&self) -> [u8; PACKET_LENGTH] {
    let mut buf = [0u8; PACKET_LENGTH];
    buf[field::LI_VN_MODE] = (self.leap & 0b11) << 6 | (self.version & 0b111) << 3 | self.mode as u8;
    buf[field::STRATUM] = self.stratum;
    buf[field::POLL] = self.poll;
    buf[field::PRECISION] = self.precision as u8;
    put(&mut buf, field::ROOT_DELAY, &self.rootdelay.to_be_bytes());
    put(&mut buf, field::ROOT_DISPERSION, &self.rootdisp.to_be_bytes());
    put(&mut buf, field::REFERENCE_ID, &self.refid);
    put(&mut buf, field::REFERENCE_TIMESTAMP, &self.reference_timestamp.to_bytes());
    put(&mut buf, field::ORIGINATE_TIMESTAMP, &self.org.to_bytes());
    put(&mut buf, field::RECEIVE_TIMESTAMP, &self.rec.to_bytes());
    put(&mut buf, field::TRANSMIT_TIMESTAMP, &self.xmt.to_bytes());
    buf
  }

  /// Note anything unusual about a request. Nothing here rejects it.
  fn inspect(&self) {
    if self.version != super::VERSION {
      debug!("Request has version {}, but our version is {}.", self.version, super::VERSION);
    }
    if self.mode != NTPMode::Client {
      debug!("Request has mode {:?}, answering anyway.", self.mode);
    }
  }
}

fn put(buf: &mut [u8; PACKET_LENGTH], offset: usize, value: &[u8]) {
  buf[offset..offset + value.len()].copy_from_slice(value);
}

/// Build the response to a request.
///
/// `adjusted` fills both the reference and the transmit timestamp.
pub fn build_response(adjusted: UnixTimestamp,
                      originate: UnixTimestamp,
                      receive: UnixTimestamp)
                      -> [u8; PACKET_LENGTH] {
  let adjusted = NTPTimestamp::from(adjusted);
  NTPPacket::response(adjusted, originate.into(), receive.into(), adjusted).to_bytes()
}

/// Read the client's transmit timestamp (bytes 40-47), which we echo back
/// as the originate timestamp.
pub fn extract_originate_time(request: &[u8]) -> Result<UnixTimestamp, MalformedRequest> {
  let (rest, pkt) = parse(request).map_err(|_| MalformedRequest { len: request.len() })?;
  if !rest.is_empty() {
    trace!("Ignoring {} bytes past the header", rest.len());
  }
  pkt.inspect();
  Ok(pkt.xmt.into())
}
