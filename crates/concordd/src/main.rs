//! concordd - Concord DTU substrate daemon
//!
//! Runs the knowledge substrate: event bridge, canonical registry,
//! federation registry, news hub, and compliance runner over one store.

use clap::Parser;
use concordd::config::Config;
use concordd::server::Server;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    let filter = EnvFilter::from_default_env().add_directive(
        if config.verbose { "concordd=debug" } else { "concordd=info" }
            .parse()
            .expect("static directive"),
    );
    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
    }

    if let Err(e) = config.validate() {
        error!("invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    info!("concordd v{}", env!("CARGO_PKG_VERSION"));

    let server = match Server::new(config) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            error!("failed to initialize substrate: {}", e);
            return ExitCode::FAILURE;
        }
    };

    {
        let server = server.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("received shutdown signal");
            server.shutdown();
        });
    }

    if let Err(e) = server.run().await {
        error!("server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
