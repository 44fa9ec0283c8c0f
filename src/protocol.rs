//! Control-channel line parser and verb dispatch (spec §4.3).
//!
//! A `tokio::net::TcpStream` read of 0 bytes is EOF in tokio's model, unlike
//! the blocking-socket-with-select model this protocol was distilled from,
//! where a readable-but-empty descriptor is a distinct "stuck peer" signal.
//! This implementation keeps the stuck-peer counter but feeds it from timeout
//! ticks that elapse with no line completed, and treats a genuine 0-byte read
//! as an ordinary disconnect -- a deliberate adaptation, not a protocol
//! change (DESIGN.md).

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::channel::{ChannelHandle, Role};
use crate::error::{Error, ErrorKind, Result};
use crate::registry::Registry;
use crate::serial::{self, SettingsUpdate};
use crate::server::Shutdown;

const MAX_LINE: usize = 256;
const IDLE_TICK_LIMIT: u32 = 1024;

/// Drives `channel` through the control protocol until it becomes a data
/// channel, its running flag drops, or the peer disconnects. On return the
/// caller inspects `channel.role()` to decide whether to hand the socket to
/// `pipe::run`.
pub async fn run(
    channel: &ChannelHandle,
    stream: &mut TcpStream,
    registry: &Registry,
    shutdown: &Shutdown,
) -> Result<()> {
    let mut line = Vec::with_capacity(MAX_LINE);
    let mut idle_ticks: u32 = 0;
    let mut chunk = [0u8; 512];

    while channel.is_running() && channel.role() == Role::Control {
        let read = tokio::time::timeout(Duration::from_secs(1), stream.read(&mut chunk)).await;
        match read {
            Ok(Ok(0)) => return Ok(()),
            Ok(Ok(n)) => {
                idle_ticks = 0;
                for &b in &chunk[..n] {
                    match b {
                        b'\r' => continue,
                        b'\n' => {
                            dispatch(channel, stream, registry, shutdown, &line).await?;
                            line.clear();
                            if channel.role() != Role::Control {
                                return Ok(());
                            }
                        }
                        _ => {
                            line.push(b);
                            if line.len() >= MAX_LINE {
                                dispatch(channel, stream, registry, shutdown, &line).await?;
                                line.clear();
                                if channel.role() != Role::Control {
                                    return Ok(());
                                }
                            }
                        }
                    }
                }
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_elapsed) => {
                idle_ticks += 1;
                if idle_ticks >= IDLE_TICK_LIMIT {
                    return Err(Error::new(ErrorKind::PeerStalled, "control channel idle too long"));
                }
            }
        }
    }
    Ok(())
}

async fn dispatch(
    channel: &ChannelHandle,
    stream: &mut TcpStream,
    registry: &Registry,
    shutdown: &Shutdown,
    line: &[u8],
) -> Result<()> {
    if line.is_empty() {
        return Ok(());
    }
    let text = String::from_utf8_lossy(line);
    let mut chars = text.chars();
    let verb = chars.next().unwrap();
    let rest = chars.as_str().trim_start();

    let outcome = match verb {
        'I' => handle_identify(channel, stream).await,
        'A' => handle_attach(channel, registry, stream, rest).await,
        'O' => handle_open(channel, stream, rest).await,
        'U' => handle_update(channel, stream, rest).await,
        'C' => {
            channel.request_stop();
            reply_ok(stream).await
        }
        'X' => {
            shutdown.trigger();
            reply_ok(stream).await
        }
        other => reply_error(stream, &format!("unknown command: {other}")).await,
    };
    match &outcome {
        Ok(()) => log::debug!("channel {} verb '{verb}' ok", channel.id),
        Err(e) => log::debug!("channel {} verb '{verb}' failed: {}", channel.id, e.description),
    }
    outcome
}

async fn reply_ok(stream: &mut TcpStream) -> Result<()> {
    stream.write_all(b"OK\n").await?;
    Ok(())
}

async fn reply_error(stream: &mut TcpStream, message: &str) -> Result<()> {
    stream.write_all(format!("ERROR {message}\n").as_bytes()).await?;
    Ok(())
}

async fn handle_identify(channel: &ChannelHandle, stream: &mut TcpStream) -> Result<()> {
    stream.write_all(format!("{}\n", channel.id).as_bytes()).await?;
    reply_ok(stream).await
}

async fn handle_attach(
    channel: &ChannelHandle,
    registry: &Registry,
    stream: &mut TcpStream,
    arg: &str,
) -> Result<()> {
    if channel.is_owner() {
        return reply_error(stream, "cannot attach while connected to device").await;
    }
    let index: u64 = match arg.trim().parse() {
        Ok(v) => v,
        Err(_) => return reply_error(stream, "bad channel index").await,
    };
    if index == channel.id {
        return reply_error(stream, "cannot attach to self").await;
    }
    let target = match registry.lookup(index).await {
        Some(t) => t,
        None => return reply_error(stream, "no such channel").await,
    };
    let serial = match target.serial() {
        Some(s) => s,
        None => return reply_error(stream, "channel not connected to device").await,
    };
    channel.set_attached(serial);
    reply_ok(stream).await
}

async fn handle_open(channel: &ChannelHandle, stream: &mut TcpStream, path: &str) -> Result<()> {
    if channel.has_device() {
        return reply_error(stream, "already connected to device").await;
    }
    let path = path.trim();
    match serial::open(path).await {
        Ok(port) => {
            let shared = std::sync::Arc::new(tokio::sync::Mutex::new(port));
            channel.set_owned(shared);
            log::info!("channel {} opened {}", channel.id, path);
            reply_ok(stream).await
        }
        Err(e) => reply_error(stream, &e.description).await,
    }
}

async fn handle_update(channel: &ChannelHandle, stream: &mut TcpStream, tokens: &str) -> Result<()> {
    let serial = match channel.serial() {
        Some(s) => s,
        None => return reply_error(stream, "channel not connected to device").await,
    };
    let update = match SettingsUpdate::parse(tokens) {
        Ok(u) => u,
        Err(e) => return reply_error(stream, &e.description).await,
    };
    let mut port = serial.lock().await;
    match port.apply(&update).await {
        Ok(()) => reply_ok(stream).await,
        Err(e) => reply_error(stream, &e.description).await,
    }
}
