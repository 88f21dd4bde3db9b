//! Shared process state and the accept loop: semaphore-gated connection
//! acceptance, per-connection task spawning, and graceful shutdown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionHandle};
use crate::error::ServerResult;
use crate::identity::IdentityClient;
use crate::monitors::MonitorRoster;
use crate::room::RoomRegistry;
use crate::session::Session;

/// Process-wide state shared by every connection's session handler.
pub struct ServerState {
    pub config: ServerConfig,
    pub identity: Arc<dyn IdentityClient>,
    pub rooms: RoomRegistry,
    pub online: StdMutex<HashMap<i32, ConnectionHandle>>,
}

impl ServerState {
    pub fn new(config: ServerConfig, identity: Arc<dyn IdentityClient>, monitors: MonitorRoster) -> Arc<Self> {
        Arc::new(Self {
            config,
            identity,
            rooms: RoomRegistry::new(monitors),
            online: StdMutex::new(HashMap::new()),
        })
    }
}

/// Binds the listener and runs the accept loop until `shutdown` resolves.
pub async fn run(state: Arc<ServerState>, shutdown: impl std::future::Future<Output = ()>) -> ServerResult<()> {
    let listener = TcpListener::bind(&state.config.bind_addr).await?;
    info!(addr = %state.config.bind_addr, "listening");

    let accept_permits = Arc::new(Semaphore::new(state.config.max_connections));

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                };

                let permit = match accept_permits.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        debug!(%peer_addr, "rejecting connection, at capacity");
                        drop(stream);
                        continue;
                    }
                };

                let state = state.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(err) = handle_connection(state, stream).await {
                        debug!(%peer_addr, error = %err, "connection ended");
                    }
                });
            }
        }
    }
}

async fn handle_connection(state: Arc<ServerState>, stream: tokio::net::TcpStream) -> ServerResult<()> {
    let (connection, handle, mut reader) = Connection::accept(
        stream,
        state.config.handshake_timeout,
        state.config.read_timeout,
        state.config.inactivity_timeout,
        state.config.health_check_interval,
        state.config.send_queue_capacity,
    )
    .await?;

    let mut session = Session::new(state, handle.clone());

    let result = loop {
        if handle.is_closed() {
            break Ok(());
        }
        match reader.read_frame().await {
            Ok(Some(payload)) => {
                if let Err(err) = session.handle_frame(&payload).await {
                    break Err(err);
                }
            }
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        }
    };

    session.on_disconnect().await;
    connection.close().await;

    if let Err(err) = &result {
        error!(error = %err, "connection closed with error");
    }
    result
}
