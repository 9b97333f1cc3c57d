use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use wirechat::{
    cli::{Cli, Command},
    client,
    config::{ClientConfig, ServerConfig},
    message::Identity,
    server::Server,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries chat lines only.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => {
            let config = ServerConfig::from(&args);
            config.validate()?;
            let server = Server::bind(config).await?;
            let addr = server.local_addr()?;
            info!("server listening on {}", addr);
            if let Err(err) = server.run_until_ctrl_c().await {
                warn!("server exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Client(args) => {
            let config = ClientConfig::from(&args);
            config.validate()?;
            let identity = match args.id {
                Some(id) => Identity::new(args.name, id)?,
                None => Identity::generate(args.name)?,
            };
            client::run(config, identity).await?;
        }
    }

    Ok(())
}
