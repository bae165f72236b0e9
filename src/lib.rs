//! earshot - a real-time conversational-awareness audio pipeline.
//!
//! Client devices stream microphone PCM over a persistent WebSocket; the
//! server decides whether nearby speech is directed at the listener and
//! emits dim/restore volume commands back, while streaming live transcript
//! text alongside.
//!
//! # Example
//!
//! ```ignore
//! use earshot::config::Config;
//! use earshot::server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(&earshot::config::default_config_path()?)?;
//!     server::run(config).await
//! }
//! ```

pub mod types;

pub mod cli;
pub mod config;
pub mod resilience;

pub mod voice_filter;
pub mod transcription;
pub mod attention;
pub mod dispatcher;
pub mod llm;

pub mod connection;
pub mod http;
pub mod pipeline;
pub mod server;

pub use config::Config;
pub use server::ServerState;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
