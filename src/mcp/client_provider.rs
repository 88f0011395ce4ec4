use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

use super::session::Session;
use super::types::*;
use crate::rpc::message::ErrorObject;
use crate::rpc::peer::Handler;
use crate::rpc::pending::{Request, ResponseWriter};
use crate::Result;

#[async_trait]
pub trait RootsProvider: Send + Sync {
    fn capability(&self) -> CapRoots;

    async fn list_roots(&self) -> Vec<Root>;

    /// Change-signal receiver, taken once per session.
    fn take_list_changed(&self) -> Option<UnboundedReceiver<()>> {
        None
    }
}

#[async_trait]
pub trait SamplingProvider: Send + Sync {
    fn capability(&self) -> CapSampling;

    async fn create_message(
        &self,
        message: SamplingMessage,
    ) -> std::result::Result<SamplingResponse, ErrorObject>;
}

/// Providers an application plugs into a client.
#[derive(Clone, Default)]
pub struct ClientProviders {
    pub roots: Option<Arc<dyn RootsProvider>>,
    pub sampling: Option<Arc<dyn SamplingProvider>>,
}

impl ClientProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_roots(mut self, roots: Arc<dyn RootsProvider>) -> Self {
        self.roots = Some(roots);
        self
    }

    pub fn with_sampling(mut self, sampling: Arc<dyn SamplingProvider>) -> Self {
        self.sampling = Some(sampling);
        self
    }

    /// Capability record sent in the initialize request.
    pub fn capabilities(&self) -> ClientCapabilities {
        ClientCapabilities {
            roots: self.roots.as_ref().map(|p| p.capability()),
            sampling: self.sampling.as_ref().map(|p| p.capability()),
        }
    }
}

/// Client-role request handler: serves the server's reverse calls.
pub(crate) struct ClientHandler {
    session: Arc<Session>,
    providers: ClientProviders,
}

impl ClientHandler {
    pub(crate) fn new(session: Arc<Session>, providers: ClientProviders) -> Self {
        Self { session, providers }
    }
}

#[async_trait]
impl Handler for ClientHandler {
    async fn handle_request(&self, writer: ResponseWriter, request: Request) -> Result<()> {
        if request.is_notification() {
            debug!(session = %self.session.id(), method = %request.method, "notification received");
            return Ok(());
        }
        match request.method.as_str() {
            METHOD_PING => writer.write_response(&Value::Null).await,
            METHOD_ROOTS_LIST => match &self.providers.roots {
                Some(provider) => {
                    let roots = provider.list_roots().await;
                    writer.write_response(&RootsListResponse { roots }).await
                }
                None => writer.write_error(ErrorObject::method_not_found()).await,
            },
            METHOD_SAMPLING_CREATE_MESSAGE => match &self.providers.sampling {
                Some(provider) => {
                    let message: SamplingMessage = match request.params {
                        Some(params) => match serde_json::from_value(params) {
                            Ok(message) => message,
                            Err(_) => {
                                return writer.write_error(ErrorObject::invalid_params()).await
                            }
                        },
                        None => {
                            return writer.write_error(ErrorObject::invalid_params()).await;
                        }
                    };
                    match provider.create_message(message).await {
                        Ok(response) => writer.write_response(&response).await,
                        Err(e) => writer.write_error(e).await,
                    }
                }
                None => writer.write_error(ErrorObject::method_not_found()).await,
            },
            _ => writer.write_error(ErrorObject::method_not_found()).await,
        }
    }
}
