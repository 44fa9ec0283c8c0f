//! `serialbridge` multiplexes TCP clients onto local serial devices.
//!
//! [`server::run`] accepts TCP connections and interprets a small
//! text control protocol on each one ([`protocol`]). A connection starts life
//! as a *control channel*; sending `O <device>` opens a serial port and `A
//! <ix>` attaches to a device already opened by another control channel,
//! turning the connection into a *data channel* that pipes raw bytes to and
//! from the serial peer ([`pipe`]). The [`registry`] tracks every live
//! channel so `A` can look targets up by a stable id, and [`task`] is the
//! per-connection supervisor that ties parsing, piping, and teardown
//! together.
//!
//! [`terminal`] is a separate, simpler mode: a direct console-to-serial
//! bridge with no network and no control protocol, used by the `bridge` CLI
//! subcommand.

pub mod channel;
pub mod cli;
pub mod error;
pub mod pipe;
pub mod protocol;
pub mod registry;
pub mod serial;
pub mod server;
pub mod task;
pub mod terminal;

pub use error::{Error, ErrorKind, Result};
pub use serial::SerialPort;
