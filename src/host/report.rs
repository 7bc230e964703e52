//! Parsing of the host replication status report.
//!
//! The report is a list of `key: value` lines. Section headers (`# ...`),
//! blank lines and lines without a colon are skipped.

use crate::error::SnapshotError;

/// Key reporting the state of the link to the replication source.
pub const LINK_STATUS_KEY: &str = "master_link_status";

/// Link status value meaning the link is up.
pub const LINK_UP: &str = "up";

/// Key reporting whether the initial sync is still running.
pub const SYNC_IN_PROGRESS_KEY: &str = "master_sync_in_progress";

/// Sync-in-progress value meaning the sync finished.
pub const SYNC_DONE: &str = "0";

/// Replication progress derived from one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationStatus {
    /// The link to the source is up.
    pub link_up: bool,
    /// The full sync has not finished. Assumed true unless the report says otherwise.
    pub sync_in_progress: bool,
}

impl ReplicationStatus {
    /// Parse a raw report.
    pub fn parse(report: &[u8]) -> Result<Self, SnapshotError> {
        let text = std::str::from_utf8(report)
            .map_err(|e| SnapshotError::InvalidReport(e.to_string()))?;

        let mut status = Self {
            link_up: false,
            sync_in_progress: true,
        };

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };

            match (key.trim(), value.trim()) {
                (LINK_STATUS_KEY, LINK_UP) => status.link_up = true,
                (SYNC_IN_PROGRESS_KEY, SYNC_DONE) => status.sync_in_progress = false,
                _ => {}
            }
        }

        Ok(status)
    }

    /// Whether the full state transfer is complete.
    pub fn is_complete(&self) -> bool {
        self.link_up && !self.sync_in_progress
    }
}
