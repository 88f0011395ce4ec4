//! Symmetric JSON-RPC 2.0 engine: framing, wire model, peer and
//! pending-request plumbing. The MCP layer in [`crate::mcp`] sits on top.

pub mod framer;
pub mod message;
pub mod peer;
pub mod pending;

pub use framer::{FrameRead, FrameWrite, LineFramer};
pub use message::{ErrorObject, Id, WireMessage};
pub use peer::{Handler, Peer};
pub use pending::{PendingRequest, Request, ResponseWriter};
