//! Forwarding of client commands to the current leader.
//!
//! A follower wraps the client's commands in a `RAFT.ENTRY` request and
//! sends it over its leader connection. The reply is delivered by the tick
//! context through `on_reply`, translated, and handed back to the waiting
//! caller. If the connection drops first, the caller gets
//! `TIMEOUT no reply from leader` since the command may or may not have
//! been applied.

use crate::config::ForwardingConfig;
use crate::error::ProxyError;
use crate::metrics::LayerMetrics;
use crate::proxy::reply::{translate, ClientReply, LeaderReply};
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Command name the leader accepts forwarded entries under.
pub const ENTRY_COMMAND: &str = "RAFT.ENTRY";

/// The client commands carried by one forwarded entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandBatch {
    /// Commands, each as its argument list.
    pub commands: Vec<Vec<Vec<u8>>>,
}

impl CommandBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    /// Batch holding a single command.
    pub fn single<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        let mut batch = Self::new();
        batch.push(args);
        batch
    }

    /// Append a command.
    pub fn push<I, A>(&mut self, args: I)
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.commands
            .push(args.into_iter().map(|a| a.as_ref().to_vec()).collect());
    }

    /// Number of commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Serialize into an entry payload.
    pub fn encode(&self) -> Result<Bytes, ProxyError> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }

    /// Deserialize an entry payload.
    pub fn decode(payload: &[u8]) -> Result<Self, ProxyError> {
        Ok(bincode::deserialize(payload)?)
    }
}

impl Default for CommandBatch {
    fn default() -> Self {
        Self::new()
    }
}

/// One request written to the leader connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    /// Id the reply is matched against.
    pub request_id: u64,
    /// Command name, always `ENTRY_COMMAND`.
    pub command: &'static str,
    /// Serialized `CommandBatch`.
    pub payload: Bytes,
}

/// Connection to the current leader.
pub trait LeaderLink: Send + Sync + 'static {
    /// Whether a connection handle exists and is connected.
    fn is_ready(&self) -> bool;

    /// Queue `request` on the connection.
    fn send(&self, request: ForwardRequest) -> Result<(), ProxyError>;
}

/// Sends commands to the leader and routes replies back to their callers.
pub struct LeaderForwarder<L> {
    /// Leader connection.
    link: Arc<L>,

    /// Configuration.
    config: ForwardingConfig,

    /// Requests awaiting a reply.
    pending: DashMap<u64, oneshot::Sender<LeaderReply>>,

    /// Counter for generating unique request ids.
    next_request_id: AtomicU64,

    /// Metrics.
    metrics: Arc<LayerMetrics>,
}

impl<L: LeaderLink> LeaderForwarder<L> {
    /// Create a forwarder over `link`.
    pub fn new(link: Arc<L>, config: ForwardingConfig, metrics: Arc<LayerMetrics>) -> Self {
        Self {
            link,
            config,
            pending: DashMap::new(),
            next_request_id: AtomicU64::new(1),
            metrics,
        }
    }

    /// The leader connection.
    pub fn link(&self) -> &Arc<L> {
        &self.link
    }

    /// Number of requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Forward `batch` to the leader and wait for its translated reply.
    ///
    /// Fails with `NoLeader` before anything is sent if the connection is
    /// not ready or refuses the request.
    pub async fn forward(&self, batch: &CommandBatch) -> Result<ClientReply, ProxyError> {
        if !self.link.is_ready() {
            return Err(ProxyError::NoLeader);
        }

        if self.pending.len() >= self.config.max_pending {
            return Err(ProxyError::ServerBusy {
                pending: self.pending.len(),
            });
        }

        let payload = batch.encode()?;
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, tx);
        let _pending = PendingGuard {
            pending: &self.pending,
            request_id,
        };

        tracing::debug!(
            request_id = request_id,
            commands = batch.len(),
            "Forwarding commands to leader"
        );

        let request = ForwardRequest {
            request_id,
            command: ENTRY_COMMAND,
            payload,
        };
        if let Err(e) = self.link.send(request) {
            tracing::warn!(request_id = request_id, error = %e, "Failed to send to leader");
            return Err(ProxyError::NoLeader);
        }
        self.metrics.forwards_sent.inc();

        let reply = match rx.await {
            Ok(reply) => reply,
            Err(_) => {
                self.metrics.forward_timeouts.inc();
                tracing::debug!(request_id = request_id, "Leader connection dropped before reply");
                return Err(ProxyError::LeaderTimeout);
            }
        };

        translate(&reply).map_err(|e| {
            self.metrics.forward_bad_replies.inc();
            e
        })
    }

    /// Forward `batch` and fold any failure into an error reply.
    pub async fn forward_for_client(&self, batch: &CommandBatch) -> ClientReply {
        match self.forward(batch).await {
            Ok(reply) => reply,
            Err(e) => ClientReply::error(e.client_message()),
        }
    }

    /// Deliver the leader's reply to request `request_id`.
    ///
    /// Returns false if nothing was waiting for it.
    pub fn on_reply(&self, request_id: u64, reply: LeaderReply) -> bool {
        match self.pending.remove(&request_id) {
            Some((_, tx)) => {
                // The caller may have gone away; nothing to do then.
                let _ = tx.send(reply);
                true
            }
            None => {
                tracing::debug!(request_id = request_id, "Reply for unknown forwarded request");
                false
            }
        }
    }

    /// Fail every pending request after the leader connection dropped.
    ///
    /// Returns how many requests were failed.
    pub fn on_connection_lost(&self) -> usize {
        let ids: Vec<u64> = self.pending.iter().map(|e| *e.key()).collect();
        let mut failed = 0;
        for id in ids {
            if self.pending.remove(&id).is_some() {
                failed += 1;
            }
        }
        if failed > 0 {
            tracing::warn!(failed = failed, "Leader connection lost with requests in flight");
        }
        failed
    }
}

/// Removes a request from the pending map when its caller returns or is dropped.
struct PendingGuard<'a> {
    pending: &'a DashMap<u64, oneshot::Sender<LeaderReply>>,
    request_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.request_id);
    }
}

impl<L> std::fmt::Debug for LeaderForwarder<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderForwarder")
            .field("pending", &self.pending.len())
            .field("max_pending", &self.config.max_pending)
            .finish()
    }
}
