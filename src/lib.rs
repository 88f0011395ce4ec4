//! A Model Context Protocol peer library: a symmetric JSON-RPC 2.0 engine
//! over any duplex byte stream, with the MCP lifecycle and capability
//! negotiation layered on top.
//!
//! The [`rpc`] module is the transport-agnostic engine (line framing, wire
//! model, peer with pending-request tracking and cancellation). The [`mcp`]
//! module adds the `Start -> Initializing -> Initialized -> End` lifecycle,
//! provider-backed capability dispatch, and the [`mcp::Client`] /
//! [`mcp::Server`] facades.

pub mod error;
pub mod mcp;
pub mod rpc;

pub use error::Error;
pub use mcp::{Client, Server, Session, SessionState};
pub use rpc::Peer;

pub type Result<T> = std::result::Result<T, Error>;
