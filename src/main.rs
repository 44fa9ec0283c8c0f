use clap::Parser;

use serialbridge::cli::{Cli, Command};
use serialbridge::{server, terminal};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Command::Serve { port } => server::run(*port).await,
        Command::Bridge { device, .. } => {
            let reconnect = cli.command.reconnect_mode();
            let settings = match cli.command.parsed_settings() {
                Ok(s) => s,
                Err(e) => {
                    log::error!("{}", e.description);
                    std::process::exit(1);
                }
            };
            terminal::run(device, &settings, reconnect).await
        }
    };

    if let Err(e) = result {
        log::error!("{}", e.description);
        std::process::exit(1);
    }
}
