//! Windows serial port backend, adapted from the teacher crate's DCB-based
//! `COMPort` to this crate's [`SettingsUpdate`]/[`ModemLines`] types. Carried
//! for structural parity with the cross-platform module split; the server's
//! primary target and the only backend exercised by the test suite is Unix.

use std::io::Error as IoError;
use std::mem::MaybeUninit;
use std::os::windows::prelude::{AsRawHandle, IntoRawHandle, RawHandle};
use std::ptr::null_mut;

use windows_sys::Win32::Devices::Communication::{
    ClearCommError, EscapeCommFunction, GetCommModemStatus, GetCommState, SetCommState, CLRDTR,
    CLRRTS, COMSTAT, DCB, EVENPARITY, MS_CTS_ON, MS_DSR_ON, MS_RING_ON, MS_RLSD_ON, NOPARITY,
    ODDPARITY, ONESTOPBIT, SETDTR, SETRTS, TWOSTOPBITS,
};
use windows_sys::Win32::Foundation::{CloseHandle, GENERIC_READ, GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::Storage::FileSystem::{CreateFileW, OPEN_EXISTING};

use crate::error::{Error, ErrorKind, Result};
use crate::serial::{DataBits, ModemLines, Parity, SerialPort, SettingsUpdate, StopBits};

fn get_dcb(handle: HANDLE) -> Result<DCB> {
    let mut dcb: DCB = unsafe { std::mem::zeroed() };
    dcb.DCBlength = std::mem::size_of::<DCB>() as u32;
    if unsafe { GetCommState(handle, &mut dcb) } != 0 {
        Ok(dcb)
    } else {
        Err(IoError::last_os_error().into())
    }
}

fn set_dcb(handle: HANDLE, mut dcb: DCB) -> Result<()> {
    if unsafe { SetCommState(handle, &mut dcb) } != 0 {
        Ok(())
    } else {
        Err(IoError::last_os_error().into())
    }
}

/// A non-blocking-by-polling Windows serial device (overlapped I/O is not
/// wired up here; `read`/`write` treat `ERROR_IO_PENDING` as would-block).
pub struct ComPort {
    handle: HANDLE,
}

unsafe impl Send for ComPort {}

impl ComPort {
    pub fn open(path: &str) -> Result<Self> {
        let mut name: Vec<u16> = Vec::with_capacity(4 + path.len() + 1);
        if !path.starts_with('\\') {
            name.extend(r"\\.\".encode_utf16());
        }
        name.extend(path.encode_utf16());
        name.push(0);

        let handle = unsafe {
            CreateFileW(
                name.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                0,
                null_mut(),
                OPEN_EXISTING,
                0,
                0 as HANDLE,
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(Error::new(
                ErrorKind::DeviceUnavailable,
                format!("could not open \"{path}\": {}", IoError::last_os_error()),
            ));
        }

        let dcb = get_dcb(handle)?;
        set_dcb(handle, dcb)?;

        Ok(ComPort { handle })
    }

    fn escape_comm_function(&mut self, function: u32) -> Result<()> {
        match unsafe { EscapeCommFunction(self.handle, function) } {
            0 => Err(IoError::last_os_error().into()),
            _ => Ok(()),
        }
    }

    fn read_pin(&self, pin: u32) -> Result<bool> {
        let mut status: u32 = 0;
        match unsafe { GetCommModemStatus(self.handle, &mut status) } {
            0 => Err(IoError::last_os_error().into()),
            _ => Ok(status & pin != 0),
        }
    }
}

impl Drop for ComPort {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.handle);
        }
    }
}

impl AsRawHandle for ComPort {
    fn as_raw_handle(&self) -> RawHandle {
        self.handle as RawHandle
    }
}

impl IntoRawHandle for ComPort {
    fn into_raw_handle(self) -> RawHandle {
        self.handle as RawHandle
    }
}

#[async_trait::async_trait]
impl SerialPort for ComPort {
    async fn apply(&mut self, update: &SettingsUpdate) -> Result<()> {
        let mut dcb = get_dcb(self.handle)?;

        if let Some(rate) = update.baud_rate {
            dcb.BaudRate = rate;
        }
        if let Some(bits) = update.data_bits {
            dcb.ByteSize = match bits {
                DataBits::Five => 5,
                DataBits::Six => 6,
                DataBits::Seven => 7,
                DataBits::Eight => 8,
            };
        }
        if let Some(stop) = update.stop_bits {
            dcb.StopBits = match stop {
                StopBits::One => ONESTOPBIT,
                StopBits::Two => TWOSTOPBITS,
            } as u8;
        }
        if let Some(parity) = update.parity {
            dcb.Parity = match parity {
                Parity::None => NOPARITY,
                Parity::Odd => ODDPARITY,
                Parity::Even => EVENPARITY,
            } as u8;
        }

        set_dcb(self.handle, dcb)?;

        if let Some(asserted) = update.rts {
            self.escape_comm_function(if asserted { SETRTS } else { CLRRTS })?;
        }
        if let Some(asserted) = update.dtr {
            self.escape_comm_function(if asserted { SETDTR } else { CLRDTR })?;
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut errors: u32 = 0;
        let mut comstat = MaybeUninit::<COMSTAT>::uninit();
        if unsafe { ClearCommError(self.handle, &mut errors, comstat.as_mut_ptr()) } == 0 {
            return Err(IoError::last_os_error().into());
        }
        let available = unsafe { comstat.assume_init().cbInQue } as usize;
        if available == 0 {
            return Ok(0);
        }
        let to_read = available.min(buf.len());
        let mut read: u32 = 0;
        let ok = unsafe {
            windows_sys::Win32::Storage::FileSystem::ReadFile(
                self.handle,
                buf.as_mut_ptr(),
                to_read as u32,
                &mut read,
                null_mut(),
            )
        };
        if ok == 0 {
            return Err(IoError::last_os_error().into());
        }
        Ok(read as usize)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut written: u32 = 0;
        let ok = unsafe {
            windows_sys::Win32::Storage::FileSystem::WriteFile(
                self.handle,
                buf.as_ptr(),
                buf.len() as u32,
                &mut written,
                null_mut(),
            )
        };
        if ok == 0 {
            return Err(IoError::last_os_error().into());
        }
        Ok(written as usize)
    }

    fn modem_lines(&self) -> Result<ModemLines> {
        let mut lines = ModemLines::empty();
        lines.set(ModemLines::CTS, self.read_pin(MS_CTS_ON)?);
        lines.set(ModemLines::DSR, self.read_pin(MS_DSR_ON)?);
        lines.set(ModemLines::RI, self.read_pin(MS_RING_ON)?);
        lines.set(ModemLines::CD, self.read_pin(MS_RLSD_ON)?);
        Ok(lines)
    }
}

