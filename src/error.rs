//! Error types for the snapshot and log-cache layer.

use thiserror::Error;

/// Result type alias for snapshot layer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the snapshot layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Snapshot create/load errors.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Leader forwarding errors.
    #[error("proxy error: {0}")]
    Proxy(#[from] ProxyError),

    /// Host store errors.
    #[error("host error: {0}")]
    Host(#[from] HostError),

    /// Consensus engine errors.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Durable log errors.
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
}

/// Snapshot lifecycle errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// The engine had no compactable log prefix, or a snapshot is already running.
    #[error("operation failed, nothing to compact")]
    NothingToCompact,

    /// The metadata record is missing or has a malformed shape.
    #[error("corrupt snapshot metadata: {0}")]
    CorruptMetadata(String),

    /// The encoded configuration could not be parsed.
    #[error("corrupt configuration entry: {0}")]
    CorruptConfigEntry(String),

    /// The engine refused to begin loading the snapshot.
    #[error("stale snapshot at term {term}, index {index}")]
    StaleSnapshot { term: u64, index: u64 },

    /// Another snapshot create or load is active.
    #[error("snapshot operation already in progress")]
    InProgress,

    /// The host replication report could not be parsed.
    #[error("invalid replication report: {0}")]
    InvalidReport(String),
}

/// Leader forwarding errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    /// No leader connection, or it is not ready yet.
    #[error("no leader connection available")]
    NoLeader,

    /// The leader replied with something that cannot be translated.
    #[error("bad reply from leader")]
    LeaderReplyError,

    /// The leader connection dropped before a reply arrived.
    ///
    /// Whether the command was applied is unknown.
    #[error("no reply from leader")]
    LeaderTimeout,

    /// Too many forwarded commands are awaiting replies.
    #[error("server busy: too many pending forwards ({pending})")]
    ServerBusy { pending: usize },

    /// The command batch could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ProxyError {
    /// The error line returned to the client.
    pub fn client_message(&self) -> String {
        match self {
            ProxyError::NoLeader => "NOLEADER no leader connection available".to_string(),
            ProxyError::LeaderReplyError => "ERR bad reply from leader".to_string(),
            ProxyError::LeaderTimeout => "TIMEOUT no reply from leader".to_string(),
            ProxyError::ServerBusy { .. } => "BUSY too many pending forwards".to_string(),
            ProxyError::Serialization(e) => format!("ERR {}", e),
        }
    }
}

/// Host key-value store errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The key holds a value of a different type.
    #[error("wrong type for key {0}")]
    WrongType(String),

    /// The host rejected the command.
    #[error("command rejected: {0}")]
    Rejected(String),

    /// The host could not be reached.
    #[error("host unavailable: {0}")]
    Unavailable(String),
}

/// Consensus engine errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Nothing can be compacted right now.
    #[error("nothing to compact")]
    NothingToCompact,

    /// A snapshot is already being taken or loaded.
    #[error("snapshot already in progress")]
    SnapshotInProgress,

    /// The snapshot is not newer than the applied state.
    #[error("snapshot index {index} already applied")]
    AlreadyApplied { index: u64 },

    /// Node already present in the registry.
    #[error("node already exists: {0}")]
    NodeExists(u32),

    /// Node missing from the registry.
    #[error("node not found: {0}")]
    NodeNotFound(u32),

    /// Internal engine error.
    #[error("engine internal: {0}")]
    Internal(String),
}

/// Durable log errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    /// Log gap detected: the new entry is not contiguous with the log.
    #[error("log gap detected: last_index={last_index}, first_new={first_new}")]
    LogGap { last_index: u64, first_new: u64 },

    /// Entry was compacted away.
    #[error("log compacted at index {0}")]
    Compacted(u64),

    /// Entries passed to append are not contiguous among themselves.
    #[error("non-contiguous entries: prev={prev_index}, curr={curr_index}")]
    NonContiguous { prev_index: u64, curr_index: u64 },

    /// Entry index beyond the end of the log.
    #[error("entry not found: index {0}")]
    EntryNotFound(u64),
}

impl From<bincode::Error> for ProxyError {
    fn from(e: bincode::Error) -> Self {
        ProxyError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages() {
        assert_eq!(
            ProxyError::LeaderTimeout.client_message(),
            "TIMEOUT no reply from leader"
        );
        assert_eq!(
            ProxyError::LeaderReplyError.client_message(),
            "ERR bad reply from leader"
        );
    }

    #[test]
    fn test_nothing_to_compact_display() {
        let err: Error = SnapshotError::NothingToCompact.into();
        assert!(err.to_string().contains("operation failed, nothing to compact"));
    }
}
