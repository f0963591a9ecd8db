mod pkt;
mod server;
mod timestamp;
mod upstream;

pub use self::server::Server;
pub use self::timestamp::UnixTimestamp;
pub use self::upstream::SntpClient;

/// NTP Port Number
pub const PORT: u16 = 123;

/// Default port this responder listens on.
pub const LISTEN_PORT: u16 = 12345;

/// NTP Version Number
pub const VERSION: u8 = 4;

/// Seconds from the NTP epoch (1900-01-01) to the Unix epoch (1970-01-01).
pub const EPOCH_DELTA: i64 = 2_208_988_800;

/// maximum stratum number
pub const MAXSTRAT: u8 = 16;

/// Stratum we advertise: a primary reference.
pub const STRATUM: u8 = 1;

/// Poll exponent we advertise.
pub const POLL: u8 = 10;

/// Advertised clock precision, as exponent of 2 (about a microsecond).
pub const PRECISION: i8 = -20;

/// Reference identifier we advertise.
pub const REFID: [u8; 4] = *b"LOCK";
