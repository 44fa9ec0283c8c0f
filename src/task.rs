//! Per-connection supervisor (spec §4.5): register, run the control loop,
//! fall through to the pipe once attached or opened into a data role, and
//! guarantee the serial port and registry entry are released on every exit
//! path.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;

use crate::channel::Role;
use crate::pipe;
use crate::protocol;
use crate::registry::Registry;
use crate::server::Shutdown;

pub async fn run(mut stream: TcpStream, peer: SocketAddr, registry: Arc<Registry>, shutdown: Shutdown) {
    let channel = registry.insert(peer, Role::Control).await;
    log::debug!("channel {} registered for {}", channel.id, peer);

    if let Err(e) = protocol::run(&channel, &mut stream, &registry, &shutdown).await {
        log::warn!("channel {} control error: {}", channel.id, e);
    }

    if channel.is_running() && channel.role() == Role::Data {
        if let Some(serial) = channel.serial() {
            if let Err(e) = pipe::run(&channel, &mut stream, serial).await {
                log::warn!("channel {} pipe error: {}", channel.id, e);
            }
        }
    }

    channel.request_stop();

    if channel.is_owner() {
        if let Some(serial) = channel.serial() {
            for other in registry.snapshot().await {
                if other.id == channel.id {
                    continue;
                }
                if let Some(other_serial) = other.serial() {
                    if Arc::ptr_eq(&other_serial, &serial) {
                        other.request_stop();
                    }
                }
            }
            drop(serial);
        }
        log::info!("channel {} released its device", channel.id);
    }

    registry.remove(channel.id).await;
    log::debug!("channel {} deregistered", channel.id);
}
