//! Feed Warden - access control for a personal media server

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use feed_warden::{
    cli::{Cli, Command},
    config::Config,
    gateway::Warden,
    oauth::KeyManager,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Jwks { pretty }) => run_jwks(&cli, pretty).await,
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Print the JWKS for the persisted signing key
async fn run_jwks(cli: &Cli, pretty: bool) -> ExitCode {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if config.oauth.key_path.is_none() {
        eprintln!("oauth.key_path is not set; the server would use a fresh key on every start");
        return ExitCode::FAILURE;
    }

    let jwks = match KeyManager::new(&config.oauth).public_jwks().await {
        Ok(jwks) => jwks,
        Err(e) => {
            eprintln!("Failed to load signing key: {e}");
            return ExitCode::FAILURE;
        }
    };

    let rendered = if pretty {
        serde_json::to_string_pretty(&jwks)
    } else {
        serde_json::to_string(&jwks)
    };
    match rendered {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to serialize JWKS: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the server
async fn run_server(cli: Cli) -> ExitCode {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        clients = config.oauth.clients.len(),
        "Starting Feed Warden"
    );

    let warden = match Warden::new(config).await {
        Ok(w) => w,
        Err(e) => {
            error!("Failed to start: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = warden.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}
