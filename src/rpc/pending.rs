use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::message::{self, ErrorObject, Id};
use crate::{Error, Result};

/// Response payload delivered from the dispatcher into a pending slot.
#[derive(Debug, Clone)]
pub(crate) struct ResponseData {
    pub result: Option<Value>,
    pub error: Option<ErrorObject>,
}

/// The pending-request registry: the only shared mutable structure in the
/// engine. Critical sections are insert on call, lookup on dispatch and
/// delete on completion; nothing is held across an await.
pub(crate) type PendingMap = Arc<Mutex<HashMap<Id, mpsc::Sender<ResponseData>>>>;

pub(crate) fn lock_pending(map: &PendingMap) -> MutexGuard<'_, HashMap<Id, mpsc::Sender<ResponseData>>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to an in-flight outbound call. Exactly one of
/// [`PendingRequest::receive_response`] or [`PendingRequest::cancel`]
/// terminates it; dropping the handle removes the registry entry as well.
#[derive(Debug)]
pub struct PendingRequest {
    id: Id,
    rx: mpsc::Receiver<ResponseData>,
    token: CancellationToken,
    pending: PendingMap,
}

impl PendingRequest {
    pub(crate) fn new(
        id: Id,
        rx: mpsc::Receiver<ResponseData>,
        token: CancellationToken,
        pending: PendingMap,
    ) -> Self {
        Self {
            id,
            rx,
            token,
            pending,
        }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Blocks until the response arrives or the call is cancelled. A success
    /// result is deserialized into `T`; an error result comes back as
    /// [`Error::Rpc`]; cancellation (per-call or whole-peer) comes back as
    /// [`Error::ContextCancelled`].
    pub async fn receive_response<T: DeserializeOwned>(&mut self) -> Result<T> {
        let outcome = tokio::select! {
            // A response that raced with cancellation still wins.
            biased;
            response = self.rx.recv() => response,
            _ = self.token.cancelled() => None,
        };
        self.remove_entry();
        match outcome {
            Some(ResponseData {
                error: Some(error), ..
            }) => Err(Error::Rpc(error)),
            Some(ResponseData { result, .. }) => {
                Ok(serde_json::from_value(result.unwrap_or(Value::Null))?)
            }
            None => Err(Error::ContextCancelled),
        }
    }

    /// Cancels the call and closes the response slot. After this returns the
    /// dispatcher can no longer deliver into the slot.
    pub async fn cancel(&mut self) {
        self.token.cancel();
        self.remove_entry();
        self.rx.close();
        while self.rx.recv().await.is_some() {}
    }

    fn remove_entry(&self) {
        lock_pending(&self.pending).remove(&self.id);
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.token.cancel();
        self.remove_entry();
    }
}

/// Write capability bound to a single incoming request id (`None` for
/// notifications). Both methods consume the writer, so each request gets at
/// most one response frame.
pub struct ResponseWriter {
    id: Option<Id>,
    out: mpsc::Sender<Vec<u8>>,
}

impl ResponseWriter {
    pub(crate) fn new(id: Option<Id>, out: mpsc::Sender<Vec<u8>>) -> Self {
        Self { id, out }
    }

    pub fn id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    pub async fn write_response<T: Serialize>(self, result: &T) -> Result<()> {
        let value = serde_json::to_value(result)?;
        let frame = message::response_frame(self.id.as_ref(), &value)?;
        self.out
            .send(frame)
            .await
            .map_err(|_| Error::ContextCancelled)
    }

    pub async fn write_error(self, error: ErrorObject) -> Result<()> {
        let frame = message::error_frame(self.id.as_ref(), &error)?;
        self.out
            .send(frame)
            .await
            .map_err(|_| Error::ContextCancelled)
    }
}

/// An incoming request or notification as seen by a [`super::peer::Handler`].
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub params: Option<Value>,
    pub(crate) id: Option<Id>,
}

impl Request {
    pub fn id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}
