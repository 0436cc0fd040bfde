//! strelay-server: the HTTP surface over the relay engine.
//!
//! Exposes manifest relay, segment relay, and episode materialization
//! endpoints; source resolution is delegated to an external resolver service
//! over HTTP.

pub mod config;
pub mod error;
pub mod resolver;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use state::AppState;
