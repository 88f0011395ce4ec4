use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use super::client_provider::{ClientHandler, ClientProviders};
use super::session::{Session, SessionState};
use super::signal::spawn_notifier;
use super::types::*;
use super::TimeoutConfig;
use crate::rpc::framer::LineFramer;
use crate::rpc::peer::{Handler, Peer};
use crate::{Error, Result};

/// Client-role facade: drives the initialize handshake and exposes typed
/// calls for every server capability, each gated on what the server actually
/// advertised.
pub struct Client {
    session: Arc<Session>,
    peer: Peer,
    providers: ClientProviders,
    timeouts: TimeoutConfig,
}

impl Client {
    /// Wires a client onto a duplex byte stream. No frame is sent until
    /// [`Client::initialize`].
    pub fn connect<S>(stream: S, info: ClientInfo, providers: ClientProviders) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let session = Session::new();
        session.set_client_info(info);
        session.set_client_capabilities(providers.capabilities());

        let handler = Arc::new(ClientHandler::new(session.clone(), providers.clone()));
        let (reader, writer) = LineFramer::split(stream);
        let peer = Peer::new(
            reader,
            writer,
            Some(handler as Arc<dyn Handler>),
            session.token().child_token(),
        );

        Self {
            session,
            peer,
            providers,
            timeouts: TimeoutConfig::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Negotiates protocol version and capabilities with the server. On
    /// success the session records the server's answers and moves to
    /// `Initializing`; on failure it moves to `End`.
    pub async fn initialize(&self) -> Result<ServerInitializeInfo> {
        let info = ClientInitializeInfo {
            protocol_version: self.session.protocol_version(),
            client_info: self.session.client_info().unwrap_or_default(),
            capabilities: self.session.client_capabilities().unwrap_or_default(),
        };
        debug!(method = METHOD_INITIALIZE, version = %info.protocol_version, "call");

        let reply: ServerInitializeInfo = match self
            .call(
                METHOD_INITIALIZE,
                serde_json::to_value(info)?,
                self.timeouts.rpc,
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                self.session.set_state(SessionState::End);
                return Err(e);
            }
        };

        self.session.set_state(SessionState::Initializing);
        self.session.set_protocol_version(reply.protocol_version.clone());
        self.session.set_server_capabilities(reply.capabilities.clone());
        self.session.set_server_info(reply.server_info.clone());
        info!(
            session = %self.session.id(),
            version = %reply.protocol_version,
            server = %reply.server_info.name,
            "initialized against server"
        );
        Ok(reply)
    }

    /// Tells the server negotiation is complete and moves the session to
    /// `Initialized`. Starts the roots list-changed notifier, if any.
    pub async fn initialized(&self) -> Result<()> {
        debug!(method = METHOD_INITIALIZED, "notify");
        if let Err(e) = self.peer.notify(METHOD_INITIALIZED, Value::Null).await {
            self.session.set_state(SessionState::End);
            return Err(e);
        }
        self.session.set_state(SessionState::Initialized);
        self.start_notifiers();
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        debug!(method = METHOD_PING, "call");
        match self
            .call::<Value>(METHOD_PING, Value::Null, self.timeouts.ping)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                self.session.set_state(SessionState::End);
                Err(e)
            }
        }
    }

    pub async fn prompts_list(&self, cursor: Option<String>) -> Result<ListPromptsResponse> {
        self.require_server_capability(METHOD_PROMPTS_LIST, |caps| caps.prompts.is_some())?;
        self.call(
            METHOD_PROMPTS_LIST,
            serde_json::to_value(PagedRequest { cursor })?,
            self.timeouts.rpc,
        )
        .await
    }

    pub async fn prompts_get(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<PromptGetResponse> {
        self.require_server_capability(METHOD_PROMPTS_GET, |caps| caps.prompts.is_some())?;
        self.call(
            METHOD_PROMPTS_GET,
            serde_json::to_value(PromptGetRequest {
                name: name.to_string(),
                arguments,
            })?,
            self.timeouts.rpc,
        )
        .await
    }

    pub async fn tools_list(&self, cursor: Option<String>) -> Result<ListToolsResponse> {
        self.require_server_capability(METHOD_TOOLS_LIST, |caps| caps.tools.is_some())?;
        self.call(
            METHOD_TOOLS_LIST,
            serde_json::to_value(PagedRequest { cursor })?,
            self.timeouts.rpc,
        )
        .await
    }

    pub async fn tool_call(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<ToolCallResponse> {
        self.require_server_capability(METHOD_TOOLS_CALL, |caps| caps.tools.is_some())?;
        self.call(
            METHOD_TOOLS_CALL,
            serde_json::to_value(ToolCallRequest {
                name: name.to_string(),
                arguments,
            })?,
            self.timeouts.rpc,
        )
        .await
    }

    pub async fn resources_list(&self, cursor: Option<String>) -> Result<ResourcesListResponse> {
        self.require_server_capability(METHOD_RESOURCES_LIST, |caps| caps.resources.is_some())?;
        self.call(
            METHOD_RESOURCES_LIST,
            serde_json::to_value(PagedRequest { cursor })?,
            self.timeouts.rpc,
        )
        .await
    }

    pub async fn resources_templates_list(&self) -> Result<ResourcesTemplatesListResponse> {
        self.require_server_capability(METHOD_RESOURCES_TEMPLATES_LIST, |caps| {
            caps.resources.is_some()
        })?;
        self.call(METHOD_RESOURCES_TEMPLATES_LIST, Value::Null, self.timeouts.rpc)
            .await
    }

    pub async fn resources_read(&self, uri: &str) -> Result<ResourcesReadResponse> {
        self.require_server_capability(METHOD_RESOURCES_READ, |caps| caps.resources.is_some())?;
        self.call(
            METHOD_RESOURCES_READ,
            serde_json::to_value(ResourcesReadRequest {
                uri: uri.to_string(),
            })?,
            self.timeouts.rpc,
        )
        .await
    }

    pub async fn notify_roots_list_changed(&self) -> Result<()> {
        debug!(method = NOTIFICATION_ROOTS_LIST_CHANGED, "notify");
        self.peer
            .notify(NOTIFICATION_ROOTS_LIST_CHANGED, Value::Null)
            .await
    }

    /// Ends the session: cancels the peer and every task scoped to the
    /// connection.
    pub fn close(&self) {
        self.session.close();
    }

    fn start_notifiers(&self) {
        if let Some(provider) = &self.providers.roots {
            if let Some(rx) = provider.take_list_changed() {
                spawn_notifier(
                    self.peer.clone(),
                    self.session.token().child_token(),
                    NOTIFICATION_ROOTS_LIST_CHANGED,
                    rx,
                );
            }
        }
    }

    fn require_server_capability<F>(&self, method: &str, present: F) -> Result<()>
    where
        F: FnOnce(&ServerCapabilities) -> bool,
    {
        let caps = self.session.server_capabilities().unwrap_or_default();
        if present(&caps) {
            Ok(())
        } else {
            Err(Error::MethodNotSupported(method.to_string()))
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        timeout: std::time::Duration,
    ) -> Result<T> {
        let mut pending = self.peer.call(method, params).await?;
        match tokio::time::timeout(timeout, pending.receive_response::<T>()).await {
            Ok(result) => result,
            Err(_) => {
                pending.cancel().await;
                Err(Error::Timeout(method.to_string()))
            }
        }
    }
}
