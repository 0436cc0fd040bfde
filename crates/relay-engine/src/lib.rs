//! relay-engine: server-side HLS relay and episode materialization.
//!
//! The engine rewrites HLS manifests so every URI routes back through the
//! relay, proxies segments and keys with the upstream identity the origin
//! expects, and can materialize a whole episode into a single file via
//! bounded-concurrency segment fetching and a multi-tier assembler.
//!
//! Discovery, scraping, and the HTTP surface live outside this crate; the
//! engine only consumes a [`resolver::StreamResolver`] and exposes the
//! [`orchestrate::Orchestrator`].

pub mod assemble;
pub mod config;
pub mod error;
pub mod fetch;
pub mod headers;
pub mod orchestrate;
pub mod proxy;
pub mod resolver;
pub mod rewrite;
pub mod select;
pub mod sniff;
pub mod token;
pub mod variant;

pub use config::{EngineConfig, RelayEndpoints};
pub use error::{RelayError, Result};
pub use orchestrate::{MaterializeOptions, MaterializedFile, Orchestrator, ProgressSnapshot};
pub use resolver::{ResolvedServer, StreamResolver, StreamSource, SubtitleTrack};
pub use token::RelayTarget;
pub use variant::Quality;
