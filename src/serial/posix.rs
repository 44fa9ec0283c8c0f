//! Unix serial port backend.
//!
//! Opens the device with a raw `open(2)` call in non-blocking mode, disables
//! line discipline with `termios`, and exposes read/write through
//! [`tokio::io::unix::AsyncFd`] so a [`crate::pipe::Pipe`] can multiplex the
//! serial fd alongside a TCP socket in a single `select!` without a
//! dedicated OS thread. Modem control lines (RTS/DTR/CTS/DSR/RI/CD) are read
//! and set through the `TIOCMGET`/`TIOCMSET` ioctls, which `nix` does not
//! wrap directly -- bound here the same way `nix`'s own documentation binds
//! unwrapped ioctls.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::Path;

use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::sys::termios::{self, BaudRate, InputFlags, LocalFlags, OutputFlags, SetArg};

use tokio::io::unix::AsyncFd;

use crate::error::{Error, ErrorKind, Result};
use crate::serial::{DataBits, ModemLines, Parity, SerialPort, SettingsUpdate, StopBits};

nix::ioctl_read_bad!(tiocmget, libc::TIOCMGET, libc::c_int);
nix::ioctl_write_ptr_bad!(tiocmset, libc::TIOCMSET, libc::c_int);

/// Bound on spurious would-block retries per call before this port reports
/// 0 bytes transferred to the caller (spec §4.1).
const RETRY_BOUND: u32 = 8;

fn baud_const(rate: u32) -> Result<BaudRate> {
    use BaudRate::*;
    Ok(match rate {
        50 => B50,
        75 => B75,
        110 => B110,
        134 => B134,
        150 => B150,
        200 => B200,
        300 => B300,
        600 => B600,
        1200 => B1200,
        1800 => B1800,
        2400 => B2400,
        4800 => B4800,
        9600 => B9600,
        19200 => B19200,
        38400 => B38400,
        57600 => B57600,
        115200 => B115200,
        230400 => B230400,
        460800 => B460800,
        500000 => B500000,
        576000 => B576000,
        921600 => B921600,
        _ => {
            return Err(Error::new(
                ErrorKind::UnsupportedSetting,
                "baud rate not supported",
            ))
        }
    })
}

/// A thin `AsRawFd` wrapper so the fd can live inside an `AsyncFd`. The fd is
/// closed when this value (and therefore the `OwnedFd`) drops.
struct RawTty(OwnedFd);

impl AsRawFd for RawTty {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

impl std::os::fd::AsFd for RawTty {
    fn as_fd(&self) -> std::os::fd::BorrowedFd<'_> {
        self.0.as_fd()
    }
}

fn raw_read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n >= 0 {
        Ok(n as usize)
    } else {
        Err(io::Error::last_os_error())
    }
}

fn raw_write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
    if n >= 0 {
        Ok(n as usize)
    } else {
        Err(io::Error::last_os_error())
    }
}

/// A non-blocking, line-discipline-free Unix serial device.
pub struct TtyPort {
    io: AsyncFd<RawTty>,
}

impl TtyPort {
    pub fn open(path: &str) -> Result<Self> {
        let fd = open(
            Path::new(path),
            OFlag::O_RDWR | OFlag::O_NONBLOCK | OFlag::O_NOCTTY,
            Mode::empty(),
        )
        .map_err(|e| {
            Error::new(
                ErrorKind::DeviceUnavailable,
                format!("could not open \"{path}\": {e}"),
            )
        })?;

        let mut termios = termios::tcgetattr(&fd).map_err(|e| {
            Error::new(
                ErrorKind::DeviceUnavailable,
                format!("could not get configuration for \"{path}\": {e}"),
            )
        })?;

        // Disable input processing, line processing and output
        // post-processing; this is a byte pipe, not a terminal.
        termios.input_flags &= !(InputFlags::IGNBRK
            | InputFlags::BRKINT
            | InputFlags::ICRNL
            | InputFlags::INLCR
            | InputFlags::PARMRK
            | InputFlags::INPCK
            | InputFlags::ISTRIP
            | InputFlags::IXON
            | InputFlags::IXOFF);
        termios.local_flags &= !(LocalFlags::ECHO
            | LocalFlags::ECHONL
            | LocalFlags::ICANON
            | LocalFlags::IEXTEN
            | LocalFlags::ISIG);
        termios.control_flags &= !nix::sys::termios::ControlFlags::HUPCL;
        termios.control_flags |=
            nix::sys::termios::ControlFlags::CREAD | nix::sys::termios::ControlFlags::CLOCAL;
        termios.output_flags &= !OutputFlags::OPOST;

        termios::tcsetattr(&fd, SetArg::TCSADRAIN, &termios).map_err(|e| {
            Error::new(
                ErrorKind::DeviceUnavailable,
                format!("could not configure \"{path}\": {e}"),
            )
        })?;

        let io = AsyncFd::new(RawTty(fd))?;
        Ok(TtyPort { io })
    }
}

#[async_trait::async_trait]
impl SerialPort for TtyPort {
    async fn apply(&mut self, update: &SettingsUpdate) -> Result<()> {
        let fd = self.io.get_ref().as_raw_fd();
        let mut termios = termios::tcgetattr(self.io.get_ref())?;
        let mut status: libc::c_int = 0;
        unsafe { tiocmget(fd, &mut status) }.map_err(|e| {
            Error::new(ErrorKind::DeviceUnavailable, format!("could not get line status: {e}"))
        })?;

        if let Some(rate) = update.baud_rate {
            let speed = baud_const(rate)?;
            termios::cfsetispeed(&mut termios, speed)?;
            termios::cfsetospeed(&mut termios, speed)?;
        }
        if let Some(bits) = update.data_bits {
            termios.control_flags &= !nix::sys::termios::ControlFlags::CSIZE;
            termios.control_flags |= match bits {
                DataBits::Five => nix::sys::termios::ControlFlags::CS5,
                DataBits::Six => nix::sys::termios::ControlFlags::CS6,
                DataBits::Seven => nix::sys::termios::ControlFlags::CS7,
                DataBits::Eight => nix::sys::termios::ControlFlags::CS8,
            };
        }
        if let Some(stop) = update.stop_bits {
            match stop {
                StopBits::One => {
                    termios.control_flags &= !nix::sys::termios::ControlFlags::CSTOPB
                }
                StopBits::Two => {
                    termios.control_flags |= nix::sys::termios::ControlFlags::CSTOPB
                }
            }
        }
        if let Some(parity) = update.parity {
            match parity {
                Parity::None => {
                    termios.control_flags &= !nix::sys::termios::ControlFlags::PARENB
                }
                Parity::Odd => {
                    termios.control_flags |= nix::sys::termios::ControlFlags::PARENB
                        | nix::sys::termios::ControlFlags::PARODD
                }
                Parity::Even => {
                    termios.control_flags |= nix::sys::termios::ControlFlags::PARENB;
                    termios.control_flags &= !nix::sys::termios::ControlFlags::PARODD;
                }
            }
        }
        if let Some(t) = update.timeout_deciseconds {
            termios.control_chars[nix::sys::termios::SpecialCharacterIndices::VTIME as usize] = t;
        }
        if let Some(m) = update.min_read {
            termios.control_chars[nix::sys::termios::SpecialCharacterIndices::VMIN as usize] = m;
        }
        if let Some(asserted) = update.rts {
            if asserted {
                status |= libc::TIOCM_RTS;
            } else {
                status &= !libc::TIOCM_RTS;
            }
        }
        if let Some(asserted) = update.dtr {
            if asserted {
                status |= libc::TIOCM_DTR;
            } else {
                status &= !libc::TIOCM_DTR;
            }
        }

        termios::tcsetattr(self.io.get_ref(), SetArg::TCSADRAIN, &termios).map_err(|e| {
            Error::new(ErrorKind::DeviceUnavailable, format!("could not configure device: {e}"))
        })?;
        unsafe { tiocmset(fd, &status) }.map_err(|e| {
            Error::new(ErrorKind::DeviceUnavailable, format!("could not configure lines: {e}"))
        })?;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        for _ in 0..RETRY_BOUND {
            let mut guard = self.io.readable_mut().await?;
            match guard.try_io(|inner| raw_read(inner.as_raw_fd(), buf)) {
                Ok(result) => return Ok(result?),
                Err(_would_block) => continue,
            }
        }
        Ok(0)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        for _ in 0..RETRY_BOUND {
            let mut guard = self.io.writable_mut().await?;
            match guard.try_io(|inner| raw_write(inner.as_raw_fd(), buf)) {
                Ok(result) => return Ok(result?),
                Err(_would_block) => continue,
            }
        }
        Ok(0)
    }

    fn modem_lines(&self) -> Result<ModemLines> {
        let fd = self.io.get_ref().as_raw_fd();
        let mut status: libc::c_int = 0;
        unsafe { tiocmget(fd, &mut status) }
            .map_err(|e| Error::new(ErrorKind::IoFailed, format!("could not read line status: {e}")))?;
        let mut lines = ModemLines::empty();
        lines.set(ModemLines::RTS, status & libc::TIOCM_RTS != 0);
        lines.set(ModemLines::DTR, status & libc::TIOCM_DTR != 0);
        lines.set(ModemLines::CTS, status & libc::TIOCM_CTS != 0);
        lines.set(ModemLines::DSR, status & libc::TIOCM_DSR != 0);
        lines.set(ModemLines::RI, status & libc::TIOCM_RI != 0);
        lines.set(ModemLines::CD, status & libc::TIOCM_CD != 0);
        Ok(lines)
    }
}
