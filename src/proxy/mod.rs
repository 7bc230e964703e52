//! Forwarding of client commands from followers to the leader.

mod forwarder;
mod reply;

pub use forwarder::{CommandBatch, ForwardRequest, LeaderForwarder, LeaderLink, ENTRY_COMMAND};
pub use reply::{translate, ClientReply, LeaderReply, BAD_REPLY};
