//! Error kinds and propagation policy (spec §7).

use std::io;

/// Coarse classification of a failure, used by callers to decide whether a
/// channel survives the error or is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad verb, bad argument, attach to a non-existent or ineligible channel.
    /// The control channel stays alive; the caller replies `ERROR ...`.
    UserInput,
    /// `open()` failed, or a setting was rejected by the kernel.
    /// The control channel stays alive with no device acquired.
    DeviceUnavailable,
    /// A setting value was well-formed but not one this crate supports
    /// (e.g. an unrecognized baud rate).
    UnsupportedSetting,
    /// Read/write failed on an active pipe. Fatal to the channel.
    IoFailed,
    /// 1024 consecutive zero-byte reads from a readable descriptor. Fatal to
    /// the channel, treated identically to `IoFailed`.
    PeerStalled,
    /// Bind/listen failed at startup. Fatal to the whole server.
    SetupFatal,
}

/// An error produced by this crate.
#[derive(Debug, thiserror::Error)]
#[error("{description}")]
pub struct Error {
    pub kind: ErrorKind,
    pub description: String,
}

impl Error {
    pub fn new<T: Into<String>>(kind: ErrorKind, description: T) -> Self {
        Error {
            kind,
            description: description.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::new(ErrorKind::IoFailed, e.to_string())
    }
}

#[cfg(unix)]
impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Error {
        Error::new(ErrorKind::IoFailed, e.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
