//! The MCP layer: lifecycle state machine, capability dispatch and the
//! client/server facades, all running over the [`crate::rpc`] peer engine.

pub mod client;
pub mod client_provider;
pub mod server;
pub mod server_provider;
pub mod session;
pub mod signal;
pub mod types;

use std::time::Duration;

pub use client::Client;
pub use client_provider::{ClientProviders, RootsProvider, SamplingProvider};
pub use server::Server;
pub use server_provider::{
    LatestVersion, PromptsProvider, ResourcesProvider, ServerProviders, ToolsProvider,
    VersionNegotiator,
};
pub use session::{Session, SessionState};
pub use signal::ChangeSignal;

pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-call deadlines applied by the facades. Expiry cancels only the call it
/// wrapped, never the peer.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    pub ping: Duration,
    pub rpc: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            ping: DEFAULT_PING_TIMEOUT,
            rpc: DEFAULT_RPC_TIMEOUT,
        }
    }
}
