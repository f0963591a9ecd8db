use chrono::{DateTime, Utc};
use nom::number::complete::be_u32;
use nom::sequence::tuple;
use nom::IResult;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use super::EPOCH_DELTA;

/// 2^32, the scale of a 32-bit binary fraction of a second.
const FRAC_SCALE: f64 = 4_294_967_296.0;

const NANOS_PER_SEC: u64 = 1_000_000_000;

#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
/// 64-bit NTP timestamp: seconds since 1900-01-01 and a binary fraction.
pub struct NTPTimestamp {
  pub seconds: u32,
  pub fraction: u32,
}

pub fn parse_timestamp(input: &[u8]) -> IResult<&[u8], NTPTimestamp> {
  let (input, (seconds, fraction)) = tuple((be_u32, be_u32))(input)?;
  Ok((input, NTPTimestamp { seconds, fraction }))
}

impl NTPTimestamp {
  /// Big-endian wire representation.
  pub fn to_bytes(&self) -> [u8; 8] {
    u64::from(*self).to_be_bytes()
  }

  pub fn is_zero(&self) -> bool {
    self.seconds == 0 && self.fraction == 0
  }
}

impl From<u64> for NTPTimestamp {
  fn from(raw: u64) -> NTPTimestamp {
    NTPTimestamp {
      seconds: (raw >> 32) as u32,
      fraction: raw as u32,
    }
  }
}

impl From<NTPTimestamp> for u64 {
  fn from(ts: NTPTimestamp) -> u64 {
    (u64::from(ts.seconds) << 32) | u64::from(ts.fraction)
  }
}

impl From<UnixTimestamp> for NTPTimestamp {
  /// Wraps modulo 2^64 for instants outside NTP era 0.
  fn from(unix: UnixTimestamp) -> NTPTimestamp {
    NTPTimestamp {
      seconds: unix.secs.wrapping_add(EPOCH_DELTA) as u32,
      fraction: unix.frac,
    }
  }
}

#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
/// An instant relative to the Unix epoch, with the same fractional
/// resolution as an NTP timestamp (2^-32 s).
///
/// `secs` is the floor of the instant, so `frac` is always the positive
/// distance past it, even before 1970.
pub struct UnixTimestamp {
  secs: i64,
  frac: u32,
}

impl UnixTimestamp {
  pub fn new(secs: i64, frac: u32) -> UnixTimestamp {
    UnixTimestamp { secs, frac }
  }

  /// The current system time.
  pub fn now() -> UnixTimestamp {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
      Ok(since) => UnixTimestamp::from_duration(since),
      Err(err) => {
        let before = UnixTimestamp::from_duration(err.duration());
        if before.frac == 0 {
          UnixTimestamp::new(-before.secs, 0)
        } else {
          UnixTimestamp::new(-before.secs - 1, before.frac.wrapping_neg())
        }
      }
    }
  }

  fn from_duration(since: Duration) -> UnixTimestamp {
    UnixTimestamp {
      secs: since.as_secs() as i64,
      frac: nanos_to_frac(since.subsec_nanos()),
    }
  }

  /// Converts floating-point seconds, rounding the fraction to the
  /// nearest 2^-32 s. A fraction that rounds up to a whole second carries.
  pub fn from_secs_f64(t: f64) -> UnixTimestamp {
    let whole = t.floor();
    let mut secs = whole as i64;
    let mut frac = ((t - whole) * FRAC_SCALE).round();
    if frac >= FRAC_SCALE {
      secs += 1;
      frac = 0.0;
    }
    UnixTimestamp { secs, frac: frac as u32 }
  }

  pub fn as_secs_f64(&self) -> f64 {
    self.secs as f64 + f64::from(self.frac) / FRAC_SCALE
  }

  /// Shift by a whole number of seconds.
  pub fn shifted(self, secs: i64) -> UnixTimestamp {
    UnixTimestamp {
      secs: self.secs.wrapping_add(secs),
      frac: self.frac,
    }
  }

  pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(self.secs, frac_to_nanos(self.frac))
  }
}

impl From<NTPTimestamp> for UnixTimestamp {
  /// Assumes NTP era 0 (1900-2036).
  fn from(ts: NTPTimestamp) -> UnixTimestamp {
    UnixTimestamp {
      secs: i64::from(ts.seconds) - EPOCH_DELTA,
      frac: ts.fraction,
    }
  }
}

impl fmt::Display for UnixTimestamp {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self.to_datetime() {
      Some(dt) => write!(f, "{}", dt.format("%a %b %e %H:%M:%S%.6f %Y UTC")),
      None => write!(f, "{:.6}s since epoch", self.as_secs_f64()),
    }
  }
}

fn nanos_to_frac(nanos: u32) -> u32 {
  (((u64::from(nanos) << 32) + NANOS_PER_SEC / 2) / NANOS_PER_SEC) as u32
}

fn frac_to_nanos(frac: u32) -> u32 {
  ((u64::from(frac) * NANOS_PER_SEC) >> 32) as u32
}
