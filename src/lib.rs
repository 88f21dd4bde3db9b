//! A multiplayer lobby and match-coordination server for a rhythm game.
//!
//! Clients connect over a length-prefixed TCP protocol ([`codec`],
//! [`protocol`]), authenticate against an external identity service
//! ([`identity`]), then create or join named rooms ([`room`]) in which a
//! host selects a chart and all participants cycle through a ready/play/
//! finish state machine. [`connection`] and [`session`] own the per-socket
//! lifecycle; [`server`] ties everything together behind an accept loop.

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod identity;
pub mod monitors;
pub mod protocol;
pub mod room;
pub mod server;
pub mod session;

pub use config::ServerConfig;
pub use error::{RoomError, ServerError, ServerResult};
pub use server::ServerState;
