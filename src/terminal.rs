//! Direct console-to-serial bridge, no TCP, no control protocol (spec §4.7).
//!
//! Console input is line-edited through `rustyline` so an operator typing at
//! the serial peer interactively gets history and the usual readline
//! bindings; bytes arriving from the device are written straight to stdout.
//! This is the maintained-crate replacement for the source's own hand-rolled
//! line editor (spec §9).

use std::time::Duration;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::serial::{self, SerialPort, SettingsUpdate};

/// `-o`/`-O` from the CLI: open once and give up, or retry forever at a
/// 1-second cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconnect {
    Never,
    Always,
}

pub async fn run(device: &str, settings: &SettingsUpdate, reconnect: Reconnect) -> Result<()> {
    let mut input = spawn_line_reader();

    loop {
        let mut port = match open_and_configure(device, settings).await {
            Ok(port) => port,
            Err(e) => {
                log::error!("could not open {device}: {}", e.description);
                if reconnect == Reconnect::Never {
                    return Err(e);
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        log::info!("bridging {device}");
        match pipe_console(&mut *port, &mut input).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                log::warn!("lost {device}: {}", e.description);
                if reconnect == Reconnect::Never {
                    return Err(e);
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn open_and_configure(device: &str, settings: &SettingsUpdate) -> Result<Box<dyn SerialPort>> {
    let mut port = serial::open(device).await?;
    port.apply(settings).await?;
    Ok(port)
}

/// Runs console I/O against an already-open port until EOF on stdin, an I/O
/// error on the device, or the line reader's channel closes.
async fn pipe_console(port: &mut dyn SerialPort, input: &mut mpsc::Receiver<Vec<u8>>) -> Result<()> {
    let mut stdout: Stdout = tokio::io::stdout();
    let mut buf = [0u8; 1024];
    let mut tick = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            line = input.recv() => {
                match line {
                    Some(bytes) => {
                        serial::write_all(port, &bytes).await?;
                    }
                    None => return Ok(()),
                }
            }
            result = port.read(&mut buf) => {
                let n = result?;
                if n > 0 {
                    stdout.write_all(&buf[..n]).await?;
                    stdout.flush().await?;
                }
            }
            _ = tick.tick() => {}
        }
    }
}

/// Reads lines from stdin on a blocking thread via `rustyline` (which owns
/// the terminal in raw/cooked mode itself) and forwards each as a `\n`
/// terminated byte vector over a channel the async side can select on.
fn spawn_line_reader() -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        let mut editor = match DefaultEditor::new() {
            Ok(e) => e,
            Err(e) => {
                log::error!("could not start line editor: {e}");
                return;
            }
        };
        loop {
            match editor.readline("") {
                Ok(line) => {
                    let _ = editor.add_history_entry(line.as_str());
                    let mut bytes = line.into_bytes();
                    bytes.push(b'\n');
                    if tx.blocking_send(bytes).is_err() {
                        return;
                    }
                }
                Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => return,
                Err(e) => {
                    log::error!("line editor error: {e}");
                    return;
                }
            }
        }
    });
    rx
}
