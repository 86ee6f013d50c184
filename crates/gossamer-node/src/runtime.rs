//! Envelope runtime: outbound queue, message ids and RPC reply routing.

use crate::error::NodeError;
use crate::protocol::{Body, Envelope, Payload};
use async_trait::async_trait;
use gossamer_broadcast::{BroadcastPayload, GatewayError, NodeId, RpcGateway};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};

pub struct Runtime {
    node_id: OnceCell<NodeId>,
    next_msg_id: AtomicU64,
    outbound: mpsc::UnboundedSender<Envelope>,
    pending: Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>,
}

impl Runtime {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Envelope>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let runtime = Arc::new(Self {
            node_id: OnceCell::new(),
            next_msg_id: AtomicU64::new(1),
            outbound,
            pending: Mutex::new(HashMap::new()),
        });
        (runtime, outbound_rx)
    }

    pub fn node_id(&self) -> Option<&NodeId> {
        self.node_id.get()
    }

    /// Set the node id; returns false if it was already set
    pub fn set_node_id(&self, id: NodeId) -> bool {
        self.node_id.set(id).is_ok()
    }

    fn next_msg_id(&self) -> u64 {
        self.next_msg_id.fetch_add(1, Ordering::Relaxed)
    }

    fn emit(&self, dest: &NodeId, body: Body) -> Result<(), NodeError> {
        let src = self.node_id().cloned().ok_or(NodeError::NotInitialized)?;
        self.outbound
            .send(Envelope {
                src,
                dest: dest.clone(),
                body,
            })
            .map_err(|_| NodeError::OutboundClosed)
    }

    /// Reply to a request that arrived as `request_src -> request_dest`.
    ///
    /// Before `init` the reply is sent from `request_dest`, the id the
    /// sender addressed us by.
    pub fn reply(
        &self,
        request_src: &NodeId,
        request_dest: &NodeId,
        in_reply_to: Option<u64>,
        payload: Payload,
    ) -> Result<(), NodeError> {
        let src = self.node_id().unwrap_or(request_dest).clone();
        self.outbound
            .send(Envelope {
                src,
                dest: request_src.clone(),
                body: Body {
                    msg_id: Some(self.next_msg_id()),
                    in_reply_to,
                    payload,
                },
            })
            .map_err(|_| NodeError::OutboundClosed)
    }

    /// Send a request and wait for the matching reply.
    ///
    /// The reply body is returned as raw JSON and never interpreted here, so
    /// an `error` reply completes the call like any other.
    pub async fn rpc(
        &self,
        dest: &NodeId,
        payload: Payload,
        timeout: Duration,
    ) -> Result<serde_json::Value, NodeError> {
        let msg_id = self.next_msg_id();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().insert(msg_id, reply_tx);

        let sent = self.emit(
            dest,
            Body {
                msg_id: Some(msg_id),
                in_reply_to: None,
                payload,
            },
        );
        if let Err(e) = sent {
            self.pending.lock().remove(&msg_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(_)) => Err(NodeError::OutboundClosed),
            Err(_) => {
                self.pending.lock().remove(&msg_id);
                Err(NodeError::RpcTimeout {
                    dest: dest.clone(),
                    msg_id,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Hand a reply body to the RPC numbered `in_reply_to`. Returns false if
    /// nobody was waiting on it.
    pub fn resolve_reply(&self, in_reply_to: u64, body: serde_json::Value) -> bool {
        let waiter = self.pending.lock().remove(&in_reply_to);
        match waiter {
            Some(reply_tx) => reply_tx.send(body).is_ok(),
            None => false,
        }
    }

    pub fn pending_rpcs(&self) -> usize {
        self.pending.lock().len()
    }
}

/// [`RpcGateway`] over the envelope runtime
pub struct EnvelopeGateway {
    runtime: Arc<Runtime>,
    timeout: Duration,
}

impl EnvelopeGateway {
    pub fn new(runtime: Arc<Runtime>, timeout: Duration) -> Self {
        Self { runtime, timeout }
    }
}

#[async_trait]
impl RpcGateway<i64> for EnvelopeGateway {
    async fn send(&self, neighbor: &NodeId, payload: BroadcastPayload<i64>) -> Result<(), GatewayError> {
        // Any reply completes the call, including an error body.
        match self
            .runtime
            .rpc(neighbor, Payload::broadcast_batch(payload.values), self.timeout)
            .await
        {
            Ok(_) => Ok(()),
            Err(NodeError::RpcTimeout { timeout_ms, .. }) => Err(GatewayError::Timeout {
                neighbor: neighbor.clone(),
                timeout_ms,
            }),
            Err(NodeError::OutboundClosed) => Err(GatewayError::Closed),
            Err(e) => Err(GatewayError::send_failed(neighbor, e.to_string())),
        }
    }
}

/// Write envelopes as JSON lines until every sender is gone or shutdown
/// flips, draining whatever is already queued before returning.
pub async fn write_envelopes<W>(
    mut outbound_rx: mpsc::UnboundedReceiver<Envelope>,
    mut writer: W,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), NodeError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            envelope = outbound_rx.recv() => {
                match envelope {
                    Some(envelope) => write_line(&mut writer, &envelope).await?,
                    None => break,
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    while let Ok(envelope) = outbound_rx.try_recv() {
                        write_line(&mut writer, &envelope).await?;
                    }
                    break;
                }
            }
        }
    }
    writer.flush().await?;
    Ok(())
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, envelope: &Envelope) -> Result<(), NodeError> {
    let mut line = serde_json::to_vec(envelope)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
