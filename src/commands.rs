//! Administrative commands: `COMPACT` and `LOADSNAPSHOT <host:port>`.

use crate::consensus::ConsensusEngine;
use crate::error::{Error, Result, SnapshotError};
use crate::host::HostStore;
use crate::proxy::ClientReply;
use crate::snapshot::{LoadHandshake, SnapshotManager};
use crate::types::NodeAddr;
use tracing::{info, warn};

/// Reply to a compaction that had nothing to do.
pub const NOTHING_TO_COMPACT: &str = "ERR operation failed, nothing to compact?";

/// A parsed administrative command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// Take a snapshot and compact the log.
    Compact,
    /// Pull the dataset from `source` and load its snapshot.
    LoadSnapshot {
        /// Node to pull from.
        source: NodeAddr,
    },
}

impl AdminCommand {
    /// Parse a command from its arguments, name first. Names are
    /// case-insensitive.
    pub fn parse<A: AsRef<str>>(args: &[A]) -> Result<Self> {
        let Some((name, rest)) = args.split_first() else {
            return Err(Error::Config("empty command".to_string()));
        };

        match name.as_ref().to_ascii_uppercase().as_str() {
            "COMPACT" => {
                if !rest.is_empty() {
                    return Err(wrong_arity("COMPACT"));
                }
                Ok(AdminCommand::Compact)
            }
            "LOADSNAPSHOT" => {
                let [addr] = rest else {
                    return Err(wrong_arity("LOADSNAPSHOT"));
                };
                let source = addr
                    .as_ref()
                    .parse::<NodeAddr>()
                    .map_err(|e| Error::Config(e.to_string()))?;
                Ok(AdminCommand::LoadSnapshot { source })
            }
            other => Err(Error::Config(format!("unknown command '{}'", other))),
        }
    }
}

fn wrong_arity(name: &str) -> Error {
    Error::Config(format!("wrong number of arguments for '{}'", name))
}

/// Run `COMPACT`.
pub fn handle_compact<E: ConsensusEngine, H: HostStore>(
    manager: &SnapshotManager<E, H>,
) -> ClientReply {
    match manager.perform_snapshot() {
        Ok(_) => {
            let engine = manager.engine().lock();
            info!(
                current_index = engine.current_index(),
                commit_index = engine.commit_index(),
                log_count = engine.log_count(),
                "Compaction complete"
            );
            ClientReply::ok()
        }
        Err(Error::Snapshot(SnapshotError::NothingToCompact)) => ClientReply::error(NOTHING_TO_COMPACT),
        Err(e) => ClientReply::error(format!("ERR {}", e)),
    }
}

/// Run `LOADSNAPSHOT`.
///
/// Always replies `OK`: a directive the host refuses is dropped without
/// telling the caller.
pub fn handle_load_snapshot<E: ConsensusEngine, H: HostStore>(
    handshake: &LoadHandshake<E, H>,
    source: &NodeAddr,
) -> ClientReply {
    if let Err(e) = handshake.load_from(source) {
        warn!(source = %source, error = %e, "Load snapshot directive not started");
    }
    ClientReply::ok()
}

/// Run a parsed command.
pub fn execute<E: ConsensusEngine, H: HostStore>(
    handshake: &LoadHandshake<E, H>,
    command: &AdminCommand,
) -> ClientReply {
    match command {
        AdminCommand::Compact => handle_compact(handshake.manager()),
        AdminCommand::LoadSnapshot { source } => handle_load_snapshot(handshake, source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SnapshotConfig;
    use crate::metrics::LayerMetrics;
    use crate::snapshot::HandshakeState;
    use crate::testing::{MemEngine, MemHost};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn handshake(engine: MemEngine, host: MemHost) -> LoadHandshake<MemEngine, MemHost> {
        LoadHandshake::new(Arc::new(SnapshotManager::new(
            Arc::new(Mutex::new(engine)),
            crate::host::shared(host),
            NodeAddr::new("local", 5001),
            SnapshotConfig::default(),
            Arc::new(LayerMetrics::new()),
        )))
    }

    #[test]
    fn test_parse() {
        assert_eq!(AdminCommand::parse(&["compact"]).unwrap(), AdminCommand::Compact);
        assert_eq!(
            AdminCommand::parse(&["LOADSNAPSHOT", "10.0.0.2:5002"]).unwrap(),
            AdminCommand::LoadSnapshot {
                source: NodeAddr::new("10.0.0.2", 5002)
            }
        );
        assert!(AdminCommand::parse::<&str>(&[]).is_err());
        assert!(AdminCommand::parse(&["COMPACT", "now"]).is_err());
        assert!(AdminCommand::parse(&["LOADSNAPSHOT"]).is_err());
        assert!(AdminCommand::parse(&["LOADSNAPSHOT", "nohost"]).is_err());
        assert!(AdminCommand::parse(&["LOADSNAPSHOT", "h:0"]).is_err());
        assert!(AdminCommand::parse(&["SHUTDOWN"]).is_err());
    }

    #[test]
    fn test_compact_replies() {
        let hs = handshake(MemEngine::new(1), MemHost::new());
        assert_eq!(
            execute(&hs, &AdminCommand::Compact),
            ClientReply::error(NOTHING_TO_COMPACT)
        );

        let mut engine = MemEngine::new(1);
        engine.append_entries(3);
        engine.commit(3);
        let hs = handshake(engine, MemHost::new());
        assert_eq!(execute(&hs, &AdminCommand::Compact), ClientReply::ok());
    }

    #[test]
    fn test_load_snapshot_always_ok() {
        let mut host = MemHost::new();
        host.reject_replication(true);
        let hs = handshake(MemEngine::new(1), host);
        let command = AdminCommand::LoadSnapshot {
            source: NodeAddr::new("n2", 5002),
        };

        assert_eq!(execute(&hs, &command), ClientReply::ok());
        assert_eq!(hs.state(), HandshakeState::Idle);

        hs.manager().host().lock().reject_replication(false);
        assert_eq!(execute(&hs, &command), ClientReply::ok());
        assert!(matches!(hs.state(), HandshakeState::AwaitingSync { .. }));
    }
}
