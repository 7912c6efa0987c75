// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// masterstroke-server binary.
//
// Configuration: `MASTERSTROKE_CONFIG` names a JSON config file (defaults
// otherwise); `MASTERSTROKE_PORT` overrides its port.  Log filtering follows
// `RUST_LOG`, defaulting to `info`.

use masterstroke_core::ServerConfig;
use masterstroke_core::error::{CaptureError, Result};
use masterstroke_server::CaptureServer;

const CONFIG_ENV: &str = "MASTERSTROKE_CONFIG";
const PORT_ENV: &str = "MASTERSTROKE_PORT";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    tracing::info!(port = config.port, "MASTER-STROKE capture server starting");

    let mut server = CaptureServer::new(config);
    server.start().await?;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| CaptureError::Server(format!("waiting for shutdown signal: {e}")))?;

    server.stop().await
}

fn load_config() -> Result<ServerConfig> {
    let mut config = match std::env::var_os(CONFIG_ENV) {
        Some(path) => {
            tracing::info!(path = ?path, "loading configuration");
            ServerConfig::load(path)?
        }
        None => ServerConfig::default(),
    };

    if let Ok(port) = std::env::var(PORT_ENV) {
        config.port = port
            .trim()
            .parse()
            .map_err(|_| CaptureError::Config(format!("{PORT_ENV} is not a valid port: {port:?}")))?;
    }

    Ok(config)
}
