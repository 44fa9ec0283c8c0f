//! Channel state shared between a `ChannelTask`, the `Registry`, and any
//! sibling channel that borrows the same serial port (spec §3).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::serial::SerialPort;

/// What a channel is doing right now. A channel only ever moves
/// `Control -> Data`; it never moves back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Control,
    Data,
    Terminal,
}

/// A serial port shared between its owning control channel and zero or more
/// borrower data channels. The mutex is held only for the duration of a
/// single non-blocking call into the port, not across the readiness wait
/// inside it (see the note in `pipe.rs`).
pub type SharedSerial = Arc<tokio::sync::Mutex<Box<dyn SerialPort>>>;

struct ChannelState {
    role: Role,
    serial: Option<SharedSerial>,
    is_owner: bool,
}

/// One accepted connection's identity and mutable state (spec §3's
/// `Channel`). Cheap to clone by reference: the registry and every task that
/// needs to observe or flip this channel's running flag hold an
/// `Arc<Channel>`.
pub struct Channel {
    pub id: u64,
    pub peer: SocketAddr,
    running: AtomicBool,
    state: Mutex<ChannelState>,
}

pub type ChannelHandle = Arc<Channel>;

impl Channel {
    pub fn new(id: u64, peer: SocketAddr, role: Role) -> ChannelHandle {
        Arc::new(Channel {
            id,
            peer,
            running: AtomicBool::new(true),
            state: Mutex::new(ChannelState {
                role,
                serial: None,
                is_owner: false,
            }),
        })
    }

    pub fn role(&self) -> Role {
        self.state.lock().unwrap().role
    }

    pub fn serial(&self) -> Option<SharedSerial> {
        self.state.lock().unwrap().serial.clone()
    }

    pub fn is_owner(&self) -> bool {
        self.state.lock().unwrap().is_owner
    }

    pub fn has_device(&self) -> bool {
        self.state.lock().unwrap().serial.is_some()
    }

    /// Records that this channel opened `serial` itself (the `O` verb).
    pub fn set_owned(&self, serial: SharedSerial) {
        let mut s = self.state.lock().unwrap();
        s.serial = Some(serial);
        s.is_owner = true;
    }

    /// Records that this channel borrowed `serial` from another channel (the
    /// `A` verb) and becomes a data channel.
    pub fn set_attached(&self, serial: SharedSerial) {
        let mut s = self.state.lock().unwrap();
        s.serial = Some(serial);
        s.role = Role::Data;
        s.is_owner = false;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Clears the running flag. Monotonic: once cleared it never resumes.
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}
