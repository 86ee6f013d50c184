//! Message handlers and the stdin/stdout serving loop.
//!
//! Each input line is handled on its own task, so a broadcast waiting for
//! topology never stalls the reader. Replies go through the runtime's
//! outbound queue and are written by a single writer.

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::protocol::{Body, Envelope, ErrorCode, Payload, RawEnvelope, Value};
use crate::runtime::{write_envelopes, EnvelopeGateway, Runtime};
use gossamer_broadcast::{BroadcastEngine, InboundBroadcast, NodeId};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

pub struct Node {
    config: NodeConfig,
    runtime: Arc<Runtime>,
    engine: OnceCell<BroadcastEngine<Value>>,
    next_generated: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
}

impl Node {
    pub fn new(config: NodeConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<Envelope>) {
        let (runtime, outbound_rx) = Runtime::new();
        let (shutdown_tx, _) = watch::channel(false);
        let node = Arc::new(Self {
            config,
            runtime,
            engine: OnceCell::new(),
            next_generated: AtomicU64::new(1),
            shutdown_tx,
        });
        (node, outbound_rx)
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// The broadcast engine, once `init` has been handled
    pub fn engine(&self) -> Option<&BroadcastEngine<Value>> {
        self.engine.get()
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Stop the scheduler and let the writer drain
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Handle one input line: a reply to one of our RPCs or a request.
    pub async fn handle_line(&self, line: &str) -> Result<(), NodeError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        let raw: RawEnvelope = serde_json::from_str(line)?;

        // Replies are routed on `in_reply_to` alone; their content is never
        // parsed, so any body completes the waiting RPC.
        if let Some(in_reply_to) = raw.in_reply_to() {
            let resolved = match in_reply_to {
                Some(id) => self.runtime.resolve_reply(id, raw.body),
                None => false,
            };
            if !resolved {
                tracing::debug!(src = %raw.src, "Reply matched no pending RPC");
            }
            return Ok(());
        }

        let msg_id = raw.msg_id();
        let message_type = raw.message_type().unwrap_or("<missing>").to_string();
        match serde_json::from_value::<Body>(raw.body) {
            Ok(body) => {
                self.handle_request(&raw.src, &raw.dest, msg_id, &message_type, body.payload)
                    .await
            }
            Err(e) => {
                tracing::warn!(src = %raw.src, message_type = %message_type, error = %e, "Malformed request");
                self.runtime.reply(
                    &raw.src,
                    &raw.dest,
                    msg_id,
                    Payload::error(ErrorCode::MalformedRequest, format!("malformed {message_type}: {e}")),
                )
            }
        }
    }

    async fn handle_request(
        &self,
        src: &NodeId,
        dest: &NodeId,
        msg_id: Option<u64>,
        message_type: &str,
        payload: Payload,
    ) -> Result<(), NodeError> {
        let reply = |payload: Payload| self.runtime.reply(src, dest, msg_id, payload);

        if let Payload::Init { node_id, node_ids } = payload {
            self.init(node_id, node_ids);
            return reply(Payload::InitOk);
        }

        let Some(engine) = self.engine.get() else {
            if matches!(payload, Payload::Unknown) {
                return reply(unsupported(message_type));
            }
            return reply(Payload::error(
                ErrorCode::TemporarilyUnavailable,
                "node has not received init",
            ));
        };

        match payload {
            Payload::Echo { echo } => reply(Payload::EchoOk { echo }),
            Payload::Generate => {
                let n = self.next_generated.fetch_add(1, Ordering::Relaxed);
                reply(Payload::GenerateOk {
                    id: format!("{}-{n}", engine.local_id()),
                })
            }
            Payload::Broadcast { message, messages } => {
                match InboundBroadcast::from_parts(message, messages) {
                    Ok(broadcast) => {
                        engine.accept(broadcast).await;
                        reply(Payload::BroadcastOk)
                    }
                    Err(e) => reply(Payload::error(ErrorCode::MalformedRequest, e.to_string())),
                }
            }
            Payload::Read => reply(Payload::ReadOk {
                messages: engine.read(),
            }),
            Payload::Topology { topology } => {
                // Acknowledge first; the assignment itself is first-write-wins.
                reply(Payload::TopologyOk)?;
                engine.apply_topology(&topology);
                Ok(())
            }
            Payload::Error { code, text } => {
                tracing::warn!(src = %src, code, text = %text, "Error message without in_reply_to");
                Ok(())
            }
            Payload::Unknown => reply(unsupported(message_type)),
            Payload::Init { .. }
            | Payload::InitOk
            | Payload::EchoOk { .. }
            | Payload::GenerateOk { .. }
            | Payload::BroadcastOk
            | Payload::ReadOk { .. }
            | Payload::TopologyOk => {
                tracing::debug!(src = %src, message_type, "Ignoring unsolicited reply");
                Ok(())
            }
        }
    }

    fn init(&self, node_id: NodeId, node_ids: Vec<NodeId>) {
        if !self.runtime.set_node_id(node_id.clone()) {
            tracing::warn!(node = %node_id, "Duplicate init ignored");
            return;
        }

        let gateway = Arc::new(EnvelopeGateway::new(
            Arc::clone(&self.runtime),
            self.config.rpc_timeout(),
        ));
        let engine = self.engine.get_or_init(|| {
            BroadcastEngine::new(node_id.clone(), gateway, self.config.broadcast_config())
        });
        engine.spawn_scheduler(self.shutdown_signal());

        tracing::info!(node = %node_id, cluster_size = node_ids.len(), "Node initialized");
    }
}

fn unsupported(message_type: &str) -> Payload {
    Payload::error(
        ErrorCode::NotSupported,
        format!("unsupported message type: {message_type}"),
    )
}

/// Serve envelopes from `reader` until EOF, writing replies to `writer`.
///
/// On EOF, handlers still running get up to the RPC timeout to finish
/// before the scheduler stops and the writer drains.
pub async fn serve<R, W>(config: NodeConfig, reader: R, writer: W) -> Result<(), NodeError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let grace = config.rpc_timeout();
    let (node, outbound_rx) = Node::new(config);
    let writer_task = write_envelopes(outbound_rx, writer, node.shutdown_signal());

    let reader_task = async {
        let mut handlers = JoinSet::new();
        let mut lines = reader.lines();
        let result = loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let node = Arc::clone(&node);
                    handlers.spawn(async move {
                        if let Err(e) = node.handle_line(&line).await {
                            tracing::warn!(error = %e, "Failed to handle message");
                        }
                    });
                    while handlers.try_join_next().is_some() {}
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(NodeError::from(e)),
            }
        };

        tracing::info!(in_flight = handlers.len(), "Input closed, shutting down");
        let drained = tokio::time::timeout(grace, async {
            while handlers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(abandoned = handlers.len(), "Handlers still waiting at shutdown");
        }
        node.shutdown();
        result
    };

    let (read, write) = tokio::join!(reader_task, writer_task);
    read?;
    write
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    async fn next_body(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Body {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap()
            .body
    }

    fn line(src: &str, body: serde_json::Value) -> String {
        json!({"src": src, "dest": "n1", "body": body}).to_string()
    }

    async fn initialized() -> (Arc<Node>, mpsc::UnboundedReceiver<Envelope>) {
        let (node, mut rx) = Node::new(NodeConfig::default());
        node.handle_line(&line(
            "c0",
            json!({"type": "init", "msg_id": 1, "node_id": "n1", "node_ids": ["n1", "n2"]}),
        ))
        .await
        .unwrap();
        assert_eq!(next_body(&mut rx).await.payload, Payload::InitOk);
        (node, rx)
    }

    #[tokio::test]
    async fn requests_before_init_are_temporarily_unavailable() {
        let (node, mut rx) = Node::new(NodeConfig::default());
        node.handle_line(&line("c1", json!({"type": "read", "msg_id": 3})))
            .await
            .unwrap();

        let body = next_body(&mut rx).await;
        assert_eq!(body.in_reply_to, Some(3));
        assert!(matches!(body.payload, Payload::Error { code: 11, .. }));
    }

    #[tokio::test]
    async fn generate_ids_are_unique_and_prefixed() {
        let (node, mut rx) = initialized().await;
        for msg_id in 2..4 {
            node.handle_line(&line("c1", json!({"type": "generate", "msg_id": msg_id})))
                .await
                .unwrap();
        }
        let first = next_body(&mut rx).await.payload;
        let second = next_body(&mut rx).await.payload;
        assert_eq!(first, Payload::GenerateOk { id: "n1-1".into() });
        assert_eq!(second, Payload::GenerateOk { id: "n1-2".into() });
    }

    #[tokio::test]
    async fn broadcast_without_values_is_malformed() {
        let (node, mut rx) = initialized().await;
        node.handle_line(&line("c1", json!({"type": "broadcast", "msg_id": 2})))
            .await
            .unwrap();

        let body = next_body(&mut rx).await;
        assert_eq!(body.in_reply_to, Some(2));
        assert!(matches!(body.payload, Payload::Error { code: 12, .. }));
    }

    #[tokio::test]
    async fn duplicate_init_keeps_first_identity() {
        let (node, mut rx) = initialized().await;
        node.handle_line(&line(
            "c0",
            json!({"type": "init", "msg_id": 2, "node_id": "n9", "node_ids": ["n9"]}),
        ))
        .await
        .unwrap();

        assert_eq!(next_body(&mut rx).await.payload, Payload::InitOk);
        assert_eq!(node.engine().unwrap().local_id(), &NodeId::from("n1"));
    }

    #[tokio::test]
    async fn stray_reply_is_dropped() {
        let (node, mut rx) = initialized().await;
        node.handle_line(&line(
            "n2",
            json!({"type": "broadcast_ok", "in_reply_to": 77}),
        ))
        .await
        .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reply_with_unexpected_shape_still_completes_rpc() {
        let (node, mut rx) = initialized().await;
        let caller = {
            let runtime = Arc::clone(node.runtime());
            tokio::spawn(async move {
                runtime
                    .rpc(&"n2".into(), Payload::broadcast_batch(vec![1]), Duration::from_secs(1))
                    .await
            })
        };

        let request = rx.recv().await.unwrap();
        let msg_id = request.body.msg_id.unwrap();
        node.handle_line(&line(
            "n2",
            json!({"type": "error", "in_reply_to": msg_id, "code": 11, "text": 5}),
        ))
        .await
        .unwrap();

        let reply = caller.await.unwrap().unwrap();
        assert_eq!(reply["code"], 11);
        assert_eq!(node.runtime().pending_rpcs(), 0);
    }

    #[tokio::test]
    async fn serve_replies_until_eof() {
        let input = [
            line("c0", json!({"type": "init", "msg_id": 1, "node_id": "n1", "node_ids": ["n1"]})),
            line("c1", json!({"type": "echo", "msg_id": 2, "echo": "hi"})),
            line("c1", json!({"type": "topology", "msg_id": 3, "topology": {"n1": []}})),
        ]
        .join("\n");

        let mut out = Vec::new();
        serve(NodeConfig::default(), input.as_bytes(), &mut out)
            .await
            .unwrap();

        let replies: Vec<Envelope> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(replies.len(), 3);
        assert!(replies.iter().all(|r| r.src == NodeId::from("n1")));
        assert!(replies
            .iter()
            .any(|r| r.body.payload == Payload::EchoOk { echo: json!("hi") }));
    }
}
