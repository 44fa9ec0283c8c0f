//! Serial port abstraction (spec §4.1).
//!
//! [`SerialPort`] is deliberately small: open, apply a settings delta,
//! non-blocking read/write, read back the modem lines, close. Line discipline
//! (canonical mode, echo, signal generation, output post-processing) is
//! always disabled by the backend at open time -- this crate is a byte pipe,
//! and any cooked-mode translation would corrupt binary payloads passing
//! through it.

#[cfg(unix)]
pub mod posix;
#[cfg(windows)]
pub mod windows;

use crate::error::{Error, ErrorKind, Result};

/// Number of bits per character.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

/// Number of stop bits.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

/// Parity checking mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

bitflags::bitflags! {
    /// Modem control line state, as read back from `TIOCMGET` (or the
    /// Windows equivalent) for round-trip reporting.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ModemLines: u32 {
        const RTS = 0b0000_0001;
        const DTR = 0b0000_0010;
        const CTS = 0b0000_0100;
        const DSR = 0b0000_1000;
        const RI  = 0b0001_0000;
        const CD  = 0b0010_0000;
    }
}

/// A settings delta as parsed from `U`-verb tokens (spec §6): only the
/// fields that were present in the command line are `Some`, and every field
/// not recognized is silently dropped rather than rejected (spec §8
/// boundary behavior).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    pub baud_rate: Option<u32>,
    pub data_bits: Option<DataBits>,
    pub stop_bits: Option<StopBits>,
    pub parity: Option<Parity>,
    /// VTIME: tenths of a second, device-side read timeout.
    pub timeout_deciseconds: Option<u8>,
    /// VMIN: minimum bytes per read.
    pub min_read: Option<u8>,
    /// `Some(true)` asserts RTS, `Some(false)` deasserts it.
    pub rts: Option<bool>,
    /// `Some(true)` asserts DTR, `Some(false)` deasserts it.
    pub dtr: Option<bool>,
}

/// The enumerated baud rates this crate accepts for the `B` token. Anything
/// else is `Error(UnsupportedSetting)` (spec §4.1).
pub const SUPPORTED_BAUD_RATES: &[u32] = &[
    50, 75, 110, 134, 150, 200, 300, 600, 1200, 1800, 2400, 4800, 9600, 19200, 38400, 57600,
    115200, 230400, 460800, 500000, 576000, 921600,
];

impl SettingsUpdate {
    /// Parses a whitespace-separated sequence of `U`-verb tokens.
    ///
    /// Each token is a single letter followed immediately by its value, e.g.
    /// `B115200`, `D8`, `S1`, `Pn`, `T5`, `M1`, `r0`, `d1`. Unknown leading
    /// letters are ignored. A recognized letter with a malformed or
    /// unsupported value is `Error(UserInput)` or `Error(UnsupportedSetting)`
    /// and aborts parsing of the whole line: the caller must not apply a
    /// partially-parsed update (spec §4.1 "atomic from the caller's
    /// perspective").
    ///
    /// The `r`/`d` polarity is inverted on the wire for compatibility with
    /// the system this protocol was distilled from: `r0`/`d0` *assert* the
    /// line, `r1`/`d1` *deassert* it (spec §6, §9).
    pub fn parse(tokens: &str) -> Result<Self> {
        let mut update = SettingsUpdate::default();
        for token in tokens.split_whitespace() {
            let mut chars = token.chars();
            let letter = match chars.next() {
                Some(c) => c,
                None => continue,
            };
            let value = chars.as_str();
            match letter {
                'B' => {
                    let rate: u32 = value.parse().map_err(|_| {
                        Error::new(ErrorKind::UserInput, "baud rate must be numeric")
                    })?;
                    if !SUPPORTED_BAUD_RATES.contains(&rate) {
                        return Err(Error::new(
                            ErrorKind::UnsupportedSetting,
                            "baud rate not supported",
                        ));
                    }
                    update.baud_rate = Some(rate);
                }
                'D' => {
                    update.data_bits = Some(match value {
                        "5" => DataBits::Five,
                        "6" => DataBits::Six,
                        "7" => DataBits::Seven,
                        "8" => DataBits::Eight,
                        _ => {
                            return Err(Error::new(
                                ErrorKind::UserInput,
                                "number of databits not supported [5,6,7,8]",
                            ))
                        }
                    });
                }
                'S' => {
                    update.stop_bits = Some(match value {
                        "1" => StopBits::One,
                        "2" => StopBits::Two,
                        _ => {
                            return Err(Error::new(
                                ErrorKind::UserInput,
                                "number of stopbits not supported [1,2]",
                            ))
                        }
                    });
                }
                'P' => {
                    update.parity = Some(match value {
                        "n" => Parity::None,
                        "o" => Parity::Odd,
                        "e" => Parity::Even,
                        _ => {
                            return Err(Error::new(
                                ErrorKind::UserInput,
                                "parity not supported [n,o,e]",
                            ))
                        }
                    });
                }
                'T' => {
                    let v: u8 = value
                        .parse()
                        .map_err(|_| Error::new(ErrorKind::UserInput, "timeout must be numeric"))?;
                    update.timeout_deciseconds = Some(v);
                }
                'M' => {
                    let v: u8 = value
                        .parse()
                        .map_err(|_| Error::new(ErrorKind::UserInput, "vmin must be numeric"))?;
                    update.min_read = Some(v);
                }
                'r' => {
                    update.rts = Some(match value {
                        "0" => true,
                        "1" => false,
                        _ => {
                            return Err(Error::new(
                                ErrorKind::UserInput,
                                "RTS setting not supported [0,1]",
                            ))
                        }
                    });
                }
                'd' => {
                    update.dtr = Some(match value {
                        "0" => true,
                        "1" => false,
                        _ => {
                            return Err(Error::new(
                                ErrorKind::UserInput,
                                "DTR setting not supported [0,1]",
                            ))
                        }
                    });
                }
                _ => continue,
            }
        }
        Ok(update)
    }
}

/// A configurable, non-blocking byte-oriented serial device.
///
/// Implementors must disable canonical/echo/signal input processing and
/// output post-processing at open time, and must not reintroduce any of it
/// in `apply`.
#[async_trait::async_trait]
pub trait SerialPort: Send {
    /// Applies a settings delta (spec §4.1). Implementations must make this
    /// atomic: either every requested field commits, or the prior
    /// configuration is left untouched.
    async fn apply(&mut self, update: &SettingsUpdate) -> Result<()>;

    /// Waits for the device to become readable, then attempts one
    /// non-blocking read. Returns `Ok(0)` on a would-block readiness
    /// false-positive (the caller treats this as the "stuck peer" signal,
    /// not EOF -- a serial device has no EOF).
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Waits for the device to become writable, then attempts one
    /// non-blocking write. Returns `Ok(0)` on a would-block readiness
    /// false-positive.
    async fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Reads back the current modem control line state.
    fn modem_lines(&self) -> Result<ModemLines>;
}

/// Bound on consecutive would-block writes before giving up on a chunk,
/// mirroring the read-side stuck-peer threshold (spec §4.4).
pub const WRITE_STALL_LIMIT: u32 = 1024;

/// Writes all of `buf`, looping over `SerialPort::write`'s single-attempt,
/// possibly-partial semantics ("0 = would-block, may repeat", spec §4.1)
/// until every byte is delivered. Fails with `PeerStalled` if the device
/// makes no progress for `WRITE_STALL_LIMIT` consecutive attempts, rather
/// than silently dropping the remainder.
pub async fn write_all(port: &mut dyn SerialPort, mut buf: &[u8]) -> Result<()> {
    let mut idle = 0u32;
    while !buf.is_empty() {
        let n = port.write(buf).await?;
        if n == 0 {
            idle += 1;
            if idle >= WRITE_STALL_LIMIT {
                return Err(Error::new(ErrorKind::PeerStalled, "serial port stalled on write"));
            }
            continue;
        }
        idle = 0;
        buf = &buf[n..];
    }
    Ok(())
}

/// Opens and configures the device at `path` with line discipline disabled,
/// ready for non-blocking byte-pipe use.
pub async fn open(path: &str) -> Result<Box<dyn SerialPort>> {
    #[cfg(unix)]
    {
        Ok(Box::new(posix::TtyPort::open(path)?))
    }
    #[cfg(windows)]
    {
        Ok(Box::new(windows::ComPort::open(path)?))
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = path;
        Err(Error::new(
            ErrorKind::DeviceUnavailable,
            "serial I/O not implemented for this platform",
        ))
    }
}
