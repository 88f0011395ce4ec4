use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tracing::{debug, error, warn};

use super::framer::{FrameRead, FrameWrite};
use super::message::{self, Id, WireMessage};
use super::pending::{lock_pending, PendingMap, PendingRequest, Request, ResponseData, ResponseWriter};
use crate::{Error, Result};

/// Application-side handler for incoming requests and notifications. For
/// notifications the writer carries no id and is normally just dropped.
///
/// Returning an error tears the peer down; protocol-level failures should be
/// written through the [`ResponseWriter`] instead.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle_request(&self, writer: ResponseWriter, request: Request) -> Result<()>;
}

/// A symmetric JSON-RPC 2.0 endpoint. One peer owns one connection: a reader
/// task, a writer task and a dispatcher task, spawned once at construction.
/// Cloning is cheap and shares the same engine.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

struct PeerInner {
    token: CancellationToken,
    out_tx: mpsc::Sender<Vec<u8>>,
    pending: PendingMap,
    next_id: AtomicI32,
}

impl Peer {
    /// Builds the peer over split framer halves. `token` scopes the peer's
    /// lifetime; cancelling it stops all worker tasks and resolves every
    /// pending call with [`Error::ContextCancelled`].
    pub fn new<R, W>(reader: R, writer: W, handler: Option<Arc<dyn Handler>>, token: CancellationToken) -> Self
    where
        R: FrameRead + 'static,
        W: FrameWrite + 'static,
    {
        // Capacity 1 on both frame channels: a slow peer throttles local
        // senders, a slow local handler throttles the reader.
        let (out_tx, out_rx) = mpsc::channel(1);
        let (in_tx, in_rx) = mpsc::channel(1);

        let inner = Arc::new(PeerInner {
            token,
            out_tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicI32::new(1),
        });

        tokio::spawn(read_loop(Box::new(reader), in_tx, inner.token.clone()));
        tokio::spawn(write_loop(Box::new(writer), out_rx, inner.token.clone()));
        tokio::spawn(dispatch_loop(in_rx, inner.clone(), handler));

        Self { inner }
    }

    /// Sends a request and returns the pending handle. The caller must
    /// eventually call [`PendingRequest::receive_response`] or
    /// [`PendingRequest::cancel`].
    pub async fn call(&self, method: &str, params: Value) -> Result<PendingRequest> {
        if self.inner.token.is_cancelled() {
            return Err(Error::ContextCancelled);
        }

        let id = Id::Number(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let params = option_params(&params);
        let frame = message::request_frame(Some(&id), method, params)?;

        let (tx, rx) = mpsc::channel(1);
        lock_pending(&self.inner.pending).insert(id.clone(), tx);
        let call_token = self.inner.token.child_token();

        if self.inner.out_tx.send(frame).await.is_err() {
            lock_pending(&self.inner.pending).remove(&id);
            return Err(Error::ContextCancelled);
        }
        debug!(id = %id, method, "request enqueued");

        Ok(PendingRequest::new(
            id,
            rx,
            call_token,
            self.inner.pending.clone(),
        ))
    }

    /// Sends a notification; returns as soon as the frame is enqueued.
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        if self.inner.token.is_cancelled() {
            return Err(Error::ContextCancelled);
        }
        let frame = message::request_frame(None, method, option_params(&params))?;
        self.inner
            .out_tx
            .send(frame)
            .await
            .map_err(|_| Error::ContextCancelled)?;
        debug!(method, "notification enqueued");
        Ok(())
    }

    /// Tears the peer down: worker tasks exit and pending calls resolve with
    /// [`Error::ContextCancelled`].
    pub fn cancel(&self) {
        self.inner.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Number of calls still awaiting a response.
    pub fn pending_count(&self) -> usize {
        lock_pending(&self.inner.pending).len()
    }
}

fn option_params(params: &Value) -> Option<&Value> {
    if params.is_null() {
        None
    } else {
        Some(params)
    }
}

async fn read_loop(
    mut reader: Box<dyn FrameRead>,
    in_tx: mpsc::Sender<Vec<u8>>,
    token: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => return,
            frame = reader.read_frame() => frame,
        };
        match frame {
            Ok(frame) => {
                let sent = tokio::select! {
                    _ = token.cancelled() => return,
                    sent = in_tx.send(frame) => sent,
                };
                if sent.is_err() {
                    return;
                }
            }
            Err(Error::Eof) => {
                debug!("reader: end of stream");
                token.cancel();
                return;
            }
            Err(e) => {
                error!(error = %e, "reader: failed to read frame");
                token.cancel();
                return;
            }
        }
    }
}

async fn write_loop(
    mut writer: Box<dyn FrameWrite>,
    mut out_rx: mpsc::Receiver<Vec<u8>>,
    token: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => break,
            frame = out_rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        if let Err(e) = writer.write_frame(&frame).await {
            error!(error = %e, "writer: failed to write frame");
            token.cancel();
            break;
        }
    }
    out_rx.close();
    if let Err(e) = writer.close().await {
        debug!(error = %e, "writer: close failed");
    }
}

async fn dispatch_loop(
    mut in_rx: mpsc::Receiver<Vec<u8>>,
    inner: Arc<PeerInner>,
    handler: Option<Arc<dyn Handler>>,
) {
    loop {
        let frame = tokio::select! {
            _ = inner.token.cancelled() => break,
            frame = in_rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        if let Err(e) = dispatch_frame(&inner, handler.as_ref(), frame).await {
            error!(error = %e, "dispatcher: fatal error handling frame");
            inner.token.cancel();
            break;
        }
    }
    // Closing every slot resolves the remaining waiters with cancellation.
    lock_pending(&inner.pending).clear();
}

async fn dispatch_frame(
    inner: &PeerInner,
    handler: Option<&Arc<dyn Handler>>,
    frame: Vec<u8>,
) -> Result<()> {
    match message::classify(&frame) {
        Err(parse_error) => {
            warn!(
                frame = %String::from_utf8_lossy(&frame),
                "dispatcher: undecodable frame, answering with null-id parse error"
            );
            let reply = message::error_frame(None, &parse_error)?;
            let _ = inner.out_tx.send(reply).await;
            Ok(())
        }
        Ok(WireMessage::Response { id, result }) => {
            deliver(
                inner,
                &id,
                ResponseData {
                    result: Some(result),
                    error: None,
                },
            );
            Ok(())
        }
        Ok(WireMessage::Error {
            id: Some(id),
            error,
        }) => {
            deliver(
                inner,
                &id,
                ResponseData {
                    result: None,
                    error: Some(error),
                },
            );
            Ok(())
        }
        Ok(WireMessage::Error { id: None, error }) => {
            // Uncorrelated wire-level error: every pending call gets to see
            // it, otherwise a malformed remote would hang all waiters.
            warn!(code = error.code, "dispatcher: error response without an id, broadcasting");
            let senders: Vec<_> = lock_pending(&inner.pending).values().cloned().collect();
            for tx in senders {
                let _ = tx.try_send(ResponseData {
                    result: None,
                    error: Some(error.clone()),
                });
            }
            Ok(())
        }
        Ok(WireMessage::Request { id, method, params }) => {
            handle_incoming(inner, handler, Some(id), method, params).await
        }
        Ok(WireMessage::Notification { method, params }) => {
            handle_incoming(inner, handler, None, method, params).await
        }
    }
}

/// Delivery is "clone the sender under the lock, send outside it": a slot
/// that was closed or already filled in the meantime drops the response
/// silently, which is also how duplicate response frames die.
fn deliver(inner: &PeerInner, id: &Id, response: ResponseData) {
    let tx = lock_pending(&inner.pending).get(id).cloned();
    match tx {
        Some(tx) => {
            if tx.try_send(response).is_err() {
                debug!(id = %id, "dispatcher: slot closed or full, response dropped");
            }
        }
        None => debug!(id = %id, "dispatcher: response for unknown request dropped"),
    }
}

async fn handle_incoming(
    inner: &PeerInner,
    handler: Option<&Arc<dyn Handler>>,
    id: Option<Id>,
    method: String,
    params: Option<Value>,
) -> Result<()> {
    let Some(handler) = handler else {
        return Err(Error::NoHandler(method));
    };
    let writer = ResponseWriter::new(id.clone(), inner.out_tx.clone());
    handler
        .handle_request(writer, Request { method, params, id })
        .await
}
