use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::server_provider::{ServerHandler, ServerProviders};
use super::session::Session;
use super::types::*;
use super::TimeoutConfig;
use crate::rpc::framer::LineFramer;
use crate::rpc::peer::{Handler, Peer};
use crate::{Error, Result};

/// Server-role facade: owns the session and the peer, serves the capability
/// providers, and offers the typed calls a server may direct at its client.
pub struct Server {
    session: Arc<Session>,
    peer: Peer,
    timeouts: TimeoutConfig,
}

impl Server {
    /// Wires a server onto a duplex byte stream. The peer starts serving
    /// immediately; the session stays in `Start` until the client's
    /// initialize handshake arrives.
    pub fn connect<S>(stream: S, info: ServerInfo, providers: ServerProviders) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let session = Session::new();
        session.set_server_info(info);
        session.set_server_capabilities(providers.capabilities());

        let handler = Arc::new(ServerHandler::new(session.clone(), providers));
        let (reader, writer) = LineFramer::split(stream);
        let peer = Peer::new(
            reader,
            writer,
            Some(handler.clone() as Arc<dyn Handler>),
            session.token().child_token(),
        );
        handler.bind(peer.clone());

        Self {
            session,
            peer,
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

    pub async fn ping(&self) -> Result<()> {
        debug!(method = METHOD_PING, "call");
        self.call::<Value>(METHOD_PING, Value::Null, self.timeouts.ping)
            .await
            .map(|_| ())
    }

    /// Asks the client for its root list. Gated on the client's advertised
    /// roots capability; nothing is sent when it is absent.
    pub async fn roots_list(&self) -> Result<RootsListResponse> {
        self.require_client_capability(METHOD_ROOTS_LIST, |caps| caps.roots.is_some())?;
        self.call(METHOD_ROOTS_LIST, Value::Null, self.timeouts.rpc)
            .await
    }

    /// Asks the client to sample a model completion.
    pub async fn sampling_create_message(&self, message: SamplingMessage) -> Result<SamplingResponse> {
        self.require_client_capability(METHOD_SAMPLING_CREATE_MESSAGE, |caps| {
            caps.sampling.is_some()
        })?;
        self.call(
            METHOD_SAMPLING_CREATE_MESSAGE,
            serde_json::to_value(message)?,
            self.timeouts.rpc,
        )
        .await
    }

    pub async fn notify_prompts_list_changed(&self) -> Result<()> {
        debug!(method = NOTIFICATION_PROMPTS_LIST_CHANGED, "notify");
        self.peer
            .notify(NOTIFICATION_PROMPTS_LIST_CHANGED, Value::Null)
            .await
    }

    pub async fn notify_tools_list_changed(&self) -> Result<()> {
        debug!(method = NOTIFICATION_TOOLS_LIST_CHANGED, "notify");
        self.peer
            .notify(NOTIFICATION_TOOLS_LIST_CHANGED, Value::Null)
            .await
    }

    pub async fn notify_resources_list_changed(&self) -> Result<()> {
        debug!(method = NOTIFICATION_RESOURCES_LIST_CHANGED, "notify");
        self.peer
            .notify(NOTIFICATION_RESOURCES_LIST_CHANGED, Value::Null)
            .await
    }

    /// Ends the session: cancels the peer and every task scoped to the
    /// connection.
    pub fn close(&self) {
        self.session.close();
    }

    fn require_client_capability<F>(&self, method: &str, present: F) -> Result<()>
    where
        F: FnOnce(&ClientCapabilities) -> bool,
    {
        let caps = self.session.client_capabilities().unwrap_or_default();
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
