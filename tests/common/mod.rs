#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::DuplexStream;
use tokio::sync::mpsc::UnboundedReceiver;

use mcp_peer::mcp::types::*;
use mcp_peer::mcp::{
    ChangeSignal, Client, ClientProviders, PromptsProvider, ResourcesProvider, RootsProvider,
    SamplingProvider, Server, ServerProviders, SessionState, ToolsProvider, VersionNegotiator,
};
use mcp_peer::rpc::ErrorObject;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Server-side test provider covering prompts, tools and resources, with a
/// change signal per capability.
pub struct TestServerImpl {
    pub prompts_changed: ChangeSignal,
    pub tools_changed: ChangeSignal,
    pub resources_changed: ChangeSignal,
}

impl TestServerImpl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            prompts_changed: ChangeSignal::new(),
            tools_changed: ChangeSignal::new(),
            resources_changed: ChangeSignal::new(),
        })
    }
}

impl VersionNegotiator for TestServerImpl {
    fn negotiate(&self, _client_version: &str) -> String {
        LATEST_PROTOCOL_VERSION.to_string()
    }
}

#[async_trait]
impl PromptsProvider for TestServerImpl {
    fn capability(&self) -> CapPrompts {
        CapPrompts { list_changed: true }
    }

    async fn list_prompts(&self, _cursor: Option<String>) -> ListPromptsResponse {
        ListPromptsResponse {
            prompts: vec![PromptSpec {
                name: "test_prompt".to_string(),
                description: Some("Test prompt for demonstration".to_string()),
                arguments: vec![ArgumentSpec {
                    name: "question".to_string(),
                    description: Some("Question to ask".to_string()),
                    required: true,
                }],
            }],
            next_cursor: None,
        }
    }

    async fn get_prompt(
        &self,
        name: &str,
        _arguments: Option<HashMap<String, String>>,
    ) -> Result<PromptGetResponse, ErrorObject> {
        if name == "test_prompt" {
            return Ok(PromptGetResponse {
                description: Some("Test prompt for demonstration".to_string()),
                messages: vec![PromptMessage {
                    role: "assistant".to_string(),
                    content: Content::text("Question to ask"),
                }],
            });
        }
        Err(ErrorObject::new(-32601, "Prompt not found"))
    }

    fn take_list_changed(&self) -> Option<UnboundedReceiver<()>> {
        self.prompts_changed.take()
    }
}

#[async_trait]
impl ToolsProvider for TestServerImpl {
    fn capability(&self) -> CapTools {
        CapTools { list_changed: true }
    }

    async fn list_tools(&self, _cursor: Option<String>) -> ListToolsResponse {
        ListToolsResponse {
            tools: vec![ToolSpec {
                name: "test_tool".to_string(),
                description: Some("Test tool for demonstration".to_string()),
                input_schema: ToolSchema {
                    schema_type: "object".to_string(),
                    properties: HashMap::from([(
                        "param1".to_string(),
                        ParamSchema {
                            schema_type: "string".to_string(),
                            description: Some("Test parameter".to_string()),
                        },
                    )]),
                    required: vec!["param1".to_string()],
                },
            }],
            next_cursor: None,
        }
    }

    async fn call_tool(
        &self,
        name: &str,
        _arguments: HashMap<String, String>,
    ) -> Result<ToolCallResponse, ErrorObject> {
        if name == "test_tool" {
            return Ok(ToolCallResponse {
                content: vec![Content::text("Tool executed successfully")],
                is_error: false,
            });
        }
        Err(ErrorObject::new(-32601, "Tool not found"))
    }

    fn take_list_changed(&self) -> Option<UnboundedReceiver<()>> {
        self.tools_changed.take()
    }
}

#[async_trait]
impl ResourcesProvider for TestServerImpl {
    fn capability(&self) -> CapResources {
        CapResources {
            subscribe: true,
            list_changed: true,
        }
    }

    async fn list_resources(&self, _cursor: Option<String>) -> ResourcesListResponse {
        ResourcesListResponse {
            resources: vec![ResourceSpec {
                uri: "resource://test".to_string(),
                name: "Test Resource".to_string(),
                description: None,
                mime_type: Some("text/plain".to_string()),
            }],
            next_cursor: None,
        }
    }

    async fn list_templates(&self) -> ResourcesTemplatesListResponse {
        ResourcesTemplatesListResponse {
            resource_templates: vec![ResourceTemplateSpec {
                uri_template: "resource://test/{id}".to_string(),
                name: "Test Template".to_string(),
                description: None,
                mime_type: Some("text/plain".to_string()),
            }],
        }
    }

    async fn read_resource(&self, uri: &str) -> Vec<ResourceContents> {
        if uri == "resource://test/0" {
            return vec![ResourceContents {
                uri: uri.to_string(),
                mime_type: Some("text/plain".to_string()),
                text: Some("Test resource content".to_string()),
                blob: None,
            }];
        }
        Vec::new()
    }

    fn take_list_changed(&self) -> Option<UnboundedReceiver<()>> {
        self.resources_changed.take()
    }
}

/// Client-side test provider covering roots and sampling.
pub struct TestClientImpl {
    pub roots_changed: ChangeSignal,
}

impl TestClientImpl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            roots_changed: ChangeSignal::new(),
        })
    }
}

#[async_trait]
impl RootsProvider for TestClientImpl {
    fn capability(&self) -> CapRoots {
        CapRoots { list_changed: true }
    }

    async fn list_roots(&self) -> Vec<Root> {
        vec![Root {
            uri: "file://myfile".to_string(),
            name: Some("Example Root".to_string()),
        }]
    }

    fn take_list_changed(&self) -> Option<UnboundedReceiver<()>> {
        self.roots_changed.take()
    }
}

#[async_trait]
impl SamplingProvider for TestClientImpl {
    fn capability(&self) -> CapSampling {
        CapSampling {}
    }

    async fn create_message(
        &self,
        _message: SamplingMessage,
    ) -> Result<SamplingResponse, ErrorObject> {
        Ok(SamplingResponse {
            role: "assistant".to_string(),
            content: SamplingContent {
                content_type: "text".to_string(),
                text: "Hello from the model".to_string(),
                data: String::new(),
                mime_type: String::new(),
            },
            model: "test-model".to_string(),
            stop_reason: "endTurn".to_string(),
        })
    }
}

pub struct TestSetup {
    pub client: Client,
    pub server: Server,
}

pub fn server_providers(provider: &Arc<TestServerImpl>) -> ServerProviders {
    ServerProviders::new(provider.clone() as Arc<dyn VersionNegotiator>)
        .with_prompts(provider.clone())
        .with_tools(provider.clone())
        .with_resources(provider.clone())
}

pub fn client_providers(provider: &Arc<TestClientImpl>) -> ClientProviders {
    ClientProviders::new()
        .with_roots(provider.clone())
        .with_sampling(provider.clone())
}

/// Builds a connected client/server pair over an in-memory pipe.
pub fn setup_client_server(
    server_providers: ServerProviders,
    client_providers: ClientProviders,
) -> TestSetup {
    let (client_conn, server_conn): (DuplexStream, DuplexStream) = tokio::io::duplex(4096);

    let server = Server::connect(
        server_conn,
        ServerInfo {
            name: "test server".to_string(),
            version: "0.1.0".to_string(),
        },
        server_providers,
    );
    let client = Client::connect(
        client_conn,
        ClientInfo {
            name: "test client".to_string(),
            version: "0.1.0".to_string(),
        },
        client_providers,
    );

    TestSetup { client, server }
}

impl TestSetup {
    /// Runs the full initialize handshake and waits for the server side to
    /// observe it.
    pub async fn init(&self) {
        self.client.initialize().await.expect("initialize failed");
        self.client.initialized().await.expect("initialized failed");
        wait_for_state(&self.server, SessionState::Initialized).await;
    }
}

/// Polls the server session until it reaches `state` (bounded wait).
pub async fn wait_for_state(server: &Server, state: SessionState) {
    for _ in 0..100 {
        if server.session().state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "server never reached state {}, still {}",
        state,
        server.session().state()
    );
}
