//! Leader replies and their translation for the original client.

use crate::error::ProxyError;
use bytes::Bytes;

/// Message used in place of a reply element that cannot be translated.
pub const BAD_REPLY: &str = "ERR bad reply from leader";

/// A reply received from the leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaderReply {
    /// Bulk string.
    Str(Bytes),
    /// Array of nested replies.
    Array(Vec<LeaderReply>),
    /// Integer.
    Integer(i64),
    /// Nil.
    Nil,
    /// Simple status string.
    Status(String),
    /// Error string.
    Error(String),
    /// A reply kind this layer does not understand.
    Unknown(u8),
}

/// A reply as written back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientReply {
    /// Bulk string.
    Str(Bytes),
    /// Array.
    Array(Vec<ClientReply>),
    /// Integer.
    Integer(i64),
    /// Null.
    Null,
    /// Simple string.
    Simple(String),
    /// Error.
    Error(String),
}

impl ClientReply {
    /// Error reply carrying `message`.
    pub fn error(message: impl Into<String>) -> Self {
        ClientReply::Error(message.into())
    }

    /// The `OK` simple string.
    pub fn ok() -> Self {
        ClientReply::Simple("OK".to_string())
    }

    /// Whether this is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, ClientReply::Error(_))
    }
}

/// Translate a leader reply into the equivalent client reply.
///
/// An unknown kind at the top level fails the whole reply. Unknown elements
/// nested in an array are replaced by a `BAD_REPLY` error element and the
/// rest of the array is kept.
pub fn translate(reply: &LeaderReply) -> Result<ClientReply, ProxyError> {
    let translated = match reply {
        LeaderReply::Str(s) => ClientReply::Str(s.clone()),
        LeaderReply::Array(elements) => ClientReply::Array(
            elements
                .iter()
                .map(|e| translate(e).unwrap_or_else(|_| ClientReply::error(BAD_REPLY)))
                .collect(),
        ),
        LeaderReply::Integer(n) => ClientReply::Integer(*n),
        LeaderReply::Nil => ClientReply::Null,
        LeaderReply::Status(s) => ClientReply::Simple(s.clone()),
        LeaderReply::Error(s) => ClientReply::Error(s.clone()),
        LeaderReply::Unknown(kind) => {
            tracing::debug!(kind = *kind, "Untranslatable reply kind from leader");
            return Err(ProxyError::LeaderReplyError);
        }
    };
    Ok(translated)
}
