mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use common::*;
use mcp_peer::mcp::types::*;
use mcp_peer::mcp::{
    ClientProviders, ServerProviders, TimeoutConfig, ToolsProvider, VersionNegotiator,
};
use mcp_peer::rpc::ErrorObject;
use mcp_peer::Error;

#[tokio::test]
async fn test_prompts_capability() {
    init_tracing();
    let server_impl = TestServerImpl::new();
    let client_impl = TestClientImpl::new();
    let setup = setup_client_server(
        server_providers(&server_impl),
        client_providers(&client_impl),
    );
    setup.init().await;

    let prompts = setup.client.prompts_list(None).await.unwrap();
    assert_eq!(prompts.prompts.len(), 1);
    assert_eq!(prompts.prompts[0].name, "test_prompt");
    assert!(prompts.prompts[0].arguments[0].required);

    let prompt = setup.client.prompts_get("test_prompt", None).await.unwrap();
    assert_eq!(prompt.messages.len(), 1);
    match &prompt.messages[0].content {
        Content::Text { text } => assert_eq!(text, "Question to ask"),
        other => panic!("expected text content, got {:?}", other),
    }

    let err = setup.client.prompts_get("bad_prompt", None).await.unwrap_err();
    match err {
        Error::Rpc(obj) => assert_eq!(obj.code, -32601),
        other => panic!("expected Rpc error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_tools_capability() {
    init_tracing();
    let server_impl = TestServerImpl::new();
    let client_impl = TestClientImpl::new();
    let setup = setup_client_server(
        server_providers(&server_impl),
        client_providers(&client_impl),
    );
    setup.init().await;

    let tools = setup.client.tools_list(None).await.unwrap();
    assert_eq!(tools.tools.len(), 1);
    assert_eq!(tools.tools[0].name, "test_tool");
    assert_eq!(tools.tools[0].input_schema.required, vec!["param1"]);

    let response = setup
        .client
        .tool_call(
            "test_tool",
            HashMap::from([("param1".to_string(), "value1".to_string())]),
        )
        .await
        .unwrap();
    assert!(!response.is_error);
    match &response.content[0] {
        Content::Text { text } => assert_eq!(text, "Tool executed successfully"),
        other => panic!("expected text content, got {:?}", other),
    }

    let err = setup
        .client
        .tool_call("nonexistent_tool", HashMap::new())
        .await
        .unwrap_err();
    match err {
        Error::Rpc(obj) => assert_eq!(obj.code, -32601),
        other => panic!("expected Rpc error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_resources_capability() {
    init_tracing();
    let server_impl = TestServerImpl::new();
    let client_impl = TestClientImpl::new();
    let setup = setup_client_server(
        server_providers(&server_impl),
        client_providers(&client_impl),
    );
    setup.init().await;

    let resources = setup.client.resources_list(None).await.unwrap();
    assert_eq!(resources.resources.len(), 1);
    assert_eq!(resources.resources[0].uri, "resource://test");

    let templates = setup.client.resources_templates_list().await.unwrap();
    assert_eq!(templates.resource_templates.len(), 1);
    assert_eq!(
        templates.resource_templates[0].uri_template,
        "resource://test/{id}"
    );

    let contents = setup.client.resources_read("resource://test/0").await.unwrap();
    assert_eq!(contents.content.len(), 1);
    assert_eq!(
        contents.content[0].text.as_deref(),
        Some("Test resource content")
    );
}

/// Scenario: a missing resource maps to -32002 with the uri in the error
/// data.
#[tokio::test]
async fn test_resource_not_found() {
    init_tracing();
    let server_impl = TestServerImpl::new();
    let client_impl = TestClientImpl::new();
    let setup = setup_client_server(
        server_providers(&server_impl),
        client_providers(&client_impl),
    );
    setup.init().await;

    let err = setup.client.resources_read("bad_resource").await.unwrap_err();
    match err {
        Error::Rpc(obj) => {
            assert_eq!(obj.code, RESOURCE_NOT_FOUND);
            let data = obj.data.expect("error data missing");
            assert_eq!(data["uri"], serde_json::json!("bad_resource"));
        }
        other => panic!("expected Rpc error, got {:?}", other),
    }
}

/// Scenario: with no tools capability advertised, the typed call fails
/// locally instead of producing a frame.
#[tokio::test]
async fn test_capability_gating_without_frames() {
    init_tracing();
    let server_impl = TestServerImpl::new();
    let client_impl = TestClientImpl::new();
    // Prompts only; tools and resources stay unadvertised.
    let providers = ServerProviders::new(server_impl.clone() as Arc<dyn VersionNegotiator>)
        .with_prompts(server_impl.clone());
    let setup = setup_client_server(providers, client_providers(&client_impl));
    setup.init().await;

    assert!(setup
        .client
        .session()
        .server_capabilities()
        .unwrap()
        .tools
        .is_none());

    let err = setup.client.tools_list(None).await.unwrap_err();
    assert!(matches!(err, Error::MethodNotSupported(_)));

    let err = setup.client.resources_read("resource://test/0").await.unwrap_err();
    assert!(matches!(err, Error::MethodNotSupported(_)));

    // The gate fires before the engine: nothing is pending, nothing was sent.
    let prompts = setup.client.prompts_list(None).await.unwrap();
    assert_eq!(prompts.prompts.len(), 1);
}

/// The server's reverse calls: roots listing and sampling, gated on the
/// client's declared capabilities.
#[tokio::test]
async fn test_server_calls_client_capabilities() {
    init_tracing();
    let server_impl = TestServerImpl::new();
    let client_impl = TestClientImpl::new();
    let setup = setup_client_server(
        server_providers(&server_impl),
        client_providers(&client_impl),
    );
    setup.init().await;

    let roots = setup.server.roots_list().await.unwrap();
    assert_eq!(roots.roots.len(), 1);
    assert_eq!(roots.roots[0].uri, "file://myfile");

    let response = setup
        .server
        .sampling_create_message(SamplingMessage {
            messages: vec![SamplingMessageItem {
                role: "user".to_string(),
                content: SamplingContent {
                    content_type: "text".to_string(),
                    text: "hello".to_string(),
                    data: String::new(),
                    mime_type: String::new(),
                },
            }],
            ..SamplingMessage::default()
        })
        .await
        .unwrap();
    assert_eq!(response.model, "test-model");
    assert_eq!(response.role, "assistant");
}

#[tokio::test]
async fn test_server_gating_on_absent_client_capability() {
    init_tracing();
    let server_impl = TestServerImpl::new();
    // Client declares nothing.
    let setup = setup_client_server(server_providers(&server_impl), ClientProviders::new());
    setup.init().await;

    let err = setup.server.roots_list().await.unwrap_err();
    assert!(matches!(err, Error::MethodNotSupported(_)));

    let err = setup
        .server
        .sampling_create_message(SamplingMessage::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MethodNotSupported(_)));
}

/// A provider that takes longer than the configured deadline.
struct SlowTools;

impl VersionNegotiator for SlowTools {
    fn negotiate(&self, _client_version: &str) -> String {
        LATEST_PROTOCOL_VERSION.to_string()
    }
}

#[async_trait]
impl ToolsProvider for SlowTools {
    fn capability(&self) -> CapTools {
        CapTools { list_changed: false }
    }

    async fn list_tools(&self, _cursor: Option<String>) -> ListToolsResponse {
        tokio::time::sleep(Duration::from_millis(500)).await;
        ListToolsResponse::default()
    }

    async fn call_tool(
        &self,
        _name: &str,
        _arguments: HashMap<String, String>,
    ) -> Result<ToolCallResponse, ErrorObject> {
        Ok(ToolCallResponse::default())
    }
}

/// A deadline expiry cancels the one slow call and leaves the session usable.
#[tokio::test]
async fn test_call_timeout_cancels_only_that_call() {
    init_tracing();
    let slow = Arc::new(SlowTools);
    let providers = ServerProviders::new(slow.clone() as Arc<dyn VersionNegotiator>)
        .with_tools(slow.clone());
    let TestSetup { client, server: _server } = setup_client_server(providers, ClientProviders::new());
    let client = client.with_timeouts(TimeoutConfig {
        ping: Duration::from_secs(5),
        rpc: Duration::from_millis(50),
    });

    client.initialize().await.unwrap();
    client.initialized().await.unwrap();

    let err = client.tools_list(None).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));

    // The peer survives the cancelled call.
    client.ping().await.unwrap();
}
