//! Leader link backed by a channel.

use crate::error::ProxyError;
use crate::proxy::{ForwardRequest, LeaderLink};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Leader link that hands every request to a channel the test reads from.
#[derive(Debug)]
pub struct ChannelLeaderLink {
    ready: AtomicBool,
    tx: mpsc::UnboundedSender<ForwardRequest>,
}

impl ChannelLeaderLink {
    /// Ready link and the receiving end of its requests.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ForwardRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = Self {
            ready: AtomicBool::new(true),
            tx,
        };
        (link, rx)
    }

    /// Mark the connection up or down.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }
}

impl LeaderLink for ChannelLeaderLink {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn send(&self, request: ForwardRequest) -> Result<(), ProxyError> {
        self.tx.send(request).map_err(|_| ProxyError::NoLeader)
    }
}
