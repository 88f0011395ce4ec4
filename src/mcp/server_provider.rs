use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

use super::session::{Session, SessionState};
use super::signal::spawn_notifier;
use super::types::*;
use crate::rpc::message::ErrorObject;
use crate::rpc::peer::{Handler, Peer};
use crate::rpc::pending::{Request, ResponseWriter};
use crate::Result;

/// Picks the protocol version the server answers with, given the client's
/// requested version.
pub trait VersionNegotiator: Send + Sync {
    fn negotiate(&self, client_version: &str) -> String;
}

/// Negotiator that always answers the latest supported version.
pub struct LatestVersion;

impl VersionNegotiator for LatestVersion {
    fn negotiate(&self, _client_version: &str) -> String {
        LATEST_PROTOCOL_VERSION.to_string()
    }
}

#[async_trait]
pub trait PromptsProvider: Send + Sync {
    fn capability(&self) -> CapPrompts;

    async fn list_prompts(&self, cursor: Option<String>) -> ListPromptsResponse;

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> std::result::Result<PromptGetResponse, ErrorObject>;

    /// Change-signal receiver, taken once per session. `None` means no
    /// list-changed notifier is wanted (or it was already taken).
    fn take_list_changed(&self) -> Option<UnboundedReceiver<()>> {
        None
    }
}

#[async_trait]
pub trait ToolsProvider: Send + Sync {
    fn capability(&self) -> CapTools;

    async fn list_tools(&self, cursor: Option<String>) -> ListToolsResponse;

    async fn call_tool(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> std::result::Result<ToolCallResponse, ErrorObject>;

    fn take_list_changed(&self) -> Option<UnboundedReceiver<()>> {
        None
    }
}

#[async_trait]
pub trait ResourcesProvider: Send + Sync {
    fn capability(&self) -> CapResources;

    async fn list_resources(&self, cursor: Option<String>) -> ResourcesListResponse;

    async fn list_templates(&self) -> ResourcesTemplatesListResponse;

    /// An empty result maps to the ResourceNotFound error on the wire.
    async fn read_resource(&self, uri: &str) -> Vec<ResourceContents>;

    fn take_list_changed(&self) -> Option<UnboundedReceiver<()>> {
        None
    }
}

/// The set of providers an application plugs into a server. Absent providers
/// leave the corresponding capability unadvertised; requests for their
/// methods get `MethodNotFound`.
#[derive(Clone)]
pub struct ServerProviders {
    pub negotiator: Arc<dyn VersionNegotiator>,
    pub prompts: Option<Arc<dyn PromptsProvider>>,
    pub tools: Option<Arc<dyn ToolsProvider>>,
    pub resources: Option<Arc<dyn ResourcesProvider>>,
}

impl ServerProviders {
    pub fn new(negotiator: Arc<dyn VersionNegotiator>) -> Self {
        Self {
            negotiator,
            prompts: None,
            tools: None,
            resources: None,
        }
    }

    pub fn with_prompts(mut self, prompts: Arc<dyn PromptsProvider>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn with_tools(mut self, tools: Arc<dyn ToolsProvider>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_resources(mut self, resources: Arc<dyn ResourcesProvider>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Capability record advertised in the initialize response.
    pub fn capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            logging: None,
            prompts: self.prompts.as_ref().map(|p| p.capability()),
            resources: self.resources.as_ref().map(|p| p.capability()),
            tools: self.tools.as_ref().map(|p| p.capability()),
        }
    }
}

/// Decodes request params the lenient way: absent params mean "all defaults",
/// anything that fails to decode is the caller's InvalidParams.
fn decode_params<T: DeserializeOwned + Default>(
    params: Option<&Value>,
) -> std::result::Result<T, ErrorObject> {
    match params {
        None => Ok(T::default()),
        Some(value) => {
            serde_json::from_value(value.clone()).map_err(|_| ErrorObject::invalid_params())
        }
    }
}

/// Server-role request handler: the lifecycle state machine plus capability
/// dispatch.
pub(crate) struct ServerHandler {
    session: Arc<Session>,
    providers: ServerProviders,
    peer: OnceLock<Peer>,
}

impl ServerHandler {
    pub(crate) fn new(session: Arc<Session>, providers: ServerProviders) -> Self {
        Self {
            session,
            providers,
            peer: OnceLock::new(),
        }
    }

    /// Binds the handler to the peer it writes notifications through. Called
    /// exactly once while the connection is wired up.
    pub(crate) fn bind(&self, peer: Peer) {
        if self.peer.set(peer).is_err() {
            panic!("server handler bound to a peer twice");
        }
    }

    fn peer(&self) -> Peer {
        self.peer
            .get()
            .expect("server handler must be bound to a peer before notifiers start")
            .clone()
    }

    /// Spawns one notifier task per provider that still has its change
    /// signal. Runs on the transition to Initialized; the one-shot take in
    /// each provider keeps repeated handshakes from spawning duplicates.
    fn start_notifiers(&self) {
        let peer = self.peer();
        if let Some(provider) = &self.providers.prompts {
            if let Some(rx) = provider.take_list_changed() {
                spawn_notifier(
                    peer.clone(),
                    self.session.token().child_token(),
                    NOTIFICATION_PROMPTS_LIST_CHANGED,
                    rx,
                );
            }
        }
        if let Some(provider) = &self.providers.tools {
            if let Some(rx) = provider.take_list_changed() {
                spawn_notifier(
                    peer.clone(),
                    self.session.token().child_token(),
                    NOTIFICATION_TOOLS_LIST_CHANGED,
                    rx,
                );
            }
        }
        if let Some(provider) = &self.providers.resources {
            if let Some(rx) = provider.take_list_changed() {
                spawn_notifier(
                    peer,
                    self.session.token().child_token(),
                    NOTIFICATION_RESOURCES_LIST_CHANGED,
                    rx,
                );
            }
        }
    }

    async fn handle_start(&self, writer: ResponseWriter, request: Request) -> Result<()> {
        debug!(method = %request.method, "request in start state");
        if request.is_notification() {
            warn!(method = %request.method, "ignoring notification before initialize");
            return Ok(());
        }
        match request.method.as_str() {
            METHOD_PING => writer.write_response(&Value::Null).await,
            METHOD_INITIALIZE => {
                let info: ClientInitializeInfo = match decode_params(request.params.as_ref()) {
                    Ok(info) => info,
                    Err(e) => return writer.write_error(e).await,
                };

                self.session.set_state(SessionState::Initializing);
                self.session.set_client_capabilities(info.capabilities);
                self.session.set_client_info(info.client_info);

                let version = self.providers.negotiator.negotiate(&info.protocol_version);
                self.session.set_protocol_version(version.clone());

                let reply = ServerInitializeInfo {
                    protocol_version: version,
                    server_info: self.session.server_info().unwrap_or_default(),
                    capabilities: self.session.server_capabilities().unwrap_or_default(),
                };
                writer.write_response(&reply).await
            }
            _ => writer.write_error(ErrorObject::method_not_found()).await,
        }
    }

    async fn handle_initializing(&self, writer: ResponseWriter, request: Request) -> Result<()> {
        if request.is_notification() {
            if request.method == METHOD_INITIALIZED {
                self.session.set_state(SessionState::Initialized);
                self.start_notifiers();
            } else {
                debug!(method = %request.method, "ignoring notification while initializing");
            }
            return Ok(());
        }
        match request.method.as_str() {
            METHOD_PING => writer.write_response(&Value::Null).await,
            // `initialized` must be a notification, never a request.
            METHOD_INITIALIZED => writer.write_error(ErrorObject::invalid_request()).await,
            _ => writer.write_error(ErrorObject::method_not_found()).await,
        }
    }

    async fn handle_initialized(&self, writer: ResponseWriter, request: Request) -> Result<()> {
        if request.is_notification() {
            debug!(method = %request.method, "notification received");
            return Ok(());
        }
        match request.method.as_str() {
            METHOD_PING => writer.write_response(&Value::Null).await,
            METHOD_PROMPTS_LIST => match &self.providers.prompts {
                Some(provider) => {
                    let msg: PagedRequest = match decode_params(request.params.as_ref()) {
                        Ok(msg) => msg,
                        Err(e) => return writer.write_error(e).await,
                    };
                    let response = provider.list_prompts(msg.cursor).await;
                    writer.write_response(&response).await
                }
                None => writer.write_error(ErrorObject::method_not_found()).await,
            },
            METHOD_PROMPTS_GET => match &self.providers.prompts {
                Some(provider) => {
                    let msg: PromptGetRequest = match decode_params(request.params.as_ref()) {
                        Ok(msg) => msg,
                        Err(e) => return writer.write_error(e).await,
                    };
                    match provider.get_prompt(&msg.name, msg.arguments).await {
                        Ok(response) => writer.write_response(&response).await,
                        Err(e) => writer.write_error(e).await,
                    }
                }
                None => writer.write_error(ErrorObject::method_not_found()).await,
            },
            METHOD_TOOLS_LIST => match &self.providers.tools {
                Some(provider) => {
                    let msg: PagedRequest = match decode_params(request.params.as_ref()) {
                        Ok(msg) => msg,
                        Err(e) => return writer.write_error(e).await,
                    };
                    let response = provider.list_tools(msg.cursor).await;
                    writer.write_response(&response).await
                }
                None => writer.write_error(ErrorObject::method_not_found()).await,
            },
            METHOD_TOOLS_CALL => match &self.providers.tools {
                Some(provider) => {
                    let msg: ToolCallRequest = match decode_params(request.params.as_ref()) {
                        Ok(msg) => msg,
                        Err(e) => return writer.write_error(e).await,
                    };
                    match provider.call_tool(&msg.name, msg.arguments).await {
                        Ok(response) => writer.write_response(&response).await,
                        Err(e) => writer.write_error(e).await,
                    }
                }
                None => writer.write_error(ErrorObject::method_not_found()).await,
            },
            METHOD_RESOURCES_LIST => match &self.providers.resources {
                Some(provider) => {
                    let msg: PagedRequest = match decode_params(request.params.as_ref()) {
                        Ok(msg) => msg,
                        Err(e) => return writer.write_error(e).await,
                    };
                    let response = provider.list_resources(msg.cursor).await;
                    writer.write_response(&response).await
                }
                None => writer.write_error(ErrorObject::method_not_found()).await,
            },
            METHOD_RESOURCES_TEMPLATES_LIST => match &self.providers.resources {
                Some(provider) => {
                    let response = provider.list_templates().await;
                    writer.write_response(&response).await
                }
                None => writer.write_error(ErrorObject::method_not_found()).await,
            },
            METHOD_RESOURCES_READ => match &self.providers.resources {
                Some(provider) => {
                    let msg: ResourcesReadRequest = match decode_params(request.params.as_ref()) {
                        Ok(msg) => msg,
                        Err(e) => return writer.write_error(e).await,
                    };
                    let content = provider.read_resource(&msg.uri).await;
                    if content.is_empty() {
                        writer.write_error(resource_not_found(&msg.uri)).await
                    } else {
                        writer
                            .write_response(&ResourcesReadResponse { content })
                            .await
                    }
                }
                None => writer.write_error(ErrorObject::method_not_found()).await,
            },
            _ => writer.write_error(ErrorObject::method_not_found()).await,
        }
    }
}

#[async_trait]
impl Handler for ServerHandler {
    async fn handle_request(&self, writer: ResponseWriter, request: Request) -> Result<()> {
        match self.session.state() {
            SessionState::Start => self.handle_start(writer, request).await,
            SessionState::Initializing => self.handle_initializing(writer, request).await,
            SessionState::Initialized => self.handle_initialized(writer, request).await,
            SessionState::End => Ok(()),
        }
    }
}
