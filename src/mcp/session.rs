use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::types::{
    ClientCapabilities, ClientInfo, ServerCapabilities, ServerInfo, LATEST_PROTOCOL_VERSION,
};

/// MCP lifecycle state. Transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Start,
    Initializing,
    Initialized,
    End,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Start => "start",
            SessionState::Initializing => "initializing",
            SessionState::Initialized => "initialized",
            SessionState::End => "end",
        };
        write!(f, "{}", name)
    }
}

/// Per-connection state: identity, negotiated protocol version, both sides'
/// info and capabilities, and the lifecycle state. The session also roots the
/// connection's cancellation tree; closing it tears down the peer and every
/// task the connection spawned.
pub struct Session {
    id: String,
    token: CancellationToken,
    inner: RwLock<SessionInner>,
}

struct SessionInner {
    state: SessionState,
    protocol_version: String,
    client_info: Option<ClientInfo>,
    server_info: Option<ServerInfo>,
    client_capabilities: Option<ClientCapabilities>,
    server_capabilities: Option<ServerCapabilities>,
}

impl Session {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            token: CancellationToken::new(),
            inner: RwLock::new(SessionInner {
                state: SessionState::Start,
                protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
                client_info: None,
                server_info: None,
                client_capabilities: None,
                server_capabilities: None,
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancels everything scoped to this session and moves it to `End`.
    pub fn close(&self) {
        self.set_state(SessionState::End);
        self.token.cancel();
    }

    pub fn state(&self) -> SessionState {
        self.read().state
    }

    /// Moves the lifecycle forward. Backwards transitions are refused; the
    /// state machine only ever advances.
    pub fn set_state(&self, state: SessionState) {
        let mut inner = self.write();
        if state < inner.state {
            warn!(session = %self.id, from = %inner.state, to = %state, "refusing backwards state transition");
            return;
        }
        if state != inner.state {
            debug!(session = %self.id, from = %inner.state, to = %state, "session state");
            inner.state = state;
        }
    }

    pub fn protocol_version(&self) -> String {
        self.read().protocol_version.clone()
    }

    pub fn set_protocol_version(&self, version: impl Into<String>) {
        self.write().protocol_version = version.into();
    }

    pub fn client_info(&self) -> Option<ClientInfo> {
        self.read().client_info.clone()
    }

    pub fn set_client_info(&self, info: ClientInfo) {
        self.write().client_info = Some(info);
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.read().server_info.clone()
    }

    pub fn set_server_info(&self, info: ServerInfo) {
        self.write().server_info = Some(info);
    }

    pub fn client_capabilities(&self) -> Option<ClientCapabilities> {
        self.read().client_capabilities.clone()
    }

    pub fn set_client_capabilities(&self, caps: ClientCapabilities) {
        self.write().client_capabilities = Some(caps);
    }

    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.read().server_capabilities.clone()
    }

    pub fn set_server_capabilities(&self, caps: ServerCapabilities) {
        self.write().server_capabilities = Some(caps);
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionInner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
