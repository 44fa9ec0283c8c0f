//! Argument parsing (spec §4.8, §6).

use clap::{Parser, Subcommand};

use crate::error::{Error, ErrorKind, Result};
use crate::serial::SettingsUpdate;
use crate::terminal::Reconnect;

#[derive(Debug, Parser)]
#[command(name = "serialbridge", about = "Multiplex TCP clients onto local serial devices")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the TCP control/data server.
    Serve {
        #[arg(long, default_value_t = 5000)]
        port: u16,
    },
    /// Bridge a serial device directly to this console.
    Bridge {
        device: String,
        /// Retry at a 1-second cadence if the device is lost or unavailable.
        #[arg(long)]
        reconnect: bool,
        /// `U`-verb style settings tokens, e.g. `B115200 D8 S1 Pn`.
        settings: Vec<String>,
    },
}

impl Command {
    pub fn reconnect_mode(&self) -> Reconnect {
        match self {
            Command::Bridge { reconnect: true, .. } => Reconnect::Always,
            _ => Reconnect::Never,
        }
    }

    pub fn parsed_settings(&self) -> Result<SettingsUpdate> {
        match self {
            Command::Bridge { settings, .. } => SettingsUpdate::parse(&settings.join(" ")),
            Command::Serve { .. } => Err(Error::new(
                ErrorKind::UserInput,
                "settings only apply to the bridge subcommand",
            )),
        }
    }
}
