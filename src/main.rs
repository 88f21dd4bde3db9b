use std::sync::Arc;

use phira_lobby_server::config::ServerConfig;
use phira_lobby_server::identity::HttpIdentityClient;
use phira_lobby_server::monitors::MonitorRoster;
use phira_lobby_server::server::{self, ServerState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();
    let monitors = MonitorRoster::load(&config.monitors_path).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "no monitor roster loaded, proceeding with an empty one");
        MonitorRoster::empty()
    });
    let identity = Arc::new(HttpIdentityClient::new(config.identity_base_url.clone()));

    let state = ServerState::new(config, identity, monitors);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    server::run(state, shutdown).await?;
    Ok(())
}
