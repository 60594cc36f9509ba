// tier2 proxy: transparent Stratum relay with weighted job injection
//
// Miners connect here as if to their pool. Traffic to and from the origin
// pool is relayed untouched; jobs from an operator inject pool and a per-coin
// develop pool are mixed in by weight, and results for those jobs are routed
// back to the pool that issued them.

pub mod coins;
pub mod config;
pub mod error;
pub mod server;
pub mod session;
pub mod store;
pub mod stratum;
pub mod telemetry;

pub use config::Config;
pub use error::{ProxyError, Result};
pub use server::Server;
pub use session::{Session, SessionOptions};
