//! Snapshot metadata codec.
//!
//! # Record Layout
//!
//! Metadata lives in a single keyspace hash record with three fields:
//!
//! ```text
//! last_included_term  = "<decimal>"
//! last_included_index = "<decimal>"
//! cfg                 = "<id>,<active>,<voting>,<host>:<port>;..."
//! ```
//!
//! `active` and `voting` are written as `0`/`1`. Hosts containing `;`, `,`
//! or `:` cannot be represented.

use crate::consensus::MemberInfo;
use crate::error::SnapshotError;
use crate::types::{NodeAddr, NodeId, SnapshotCfgEntry, SnapshotMetadata};
use bytes::Bytes;
use std::collections::HashSet;
use tracing::error;

/// Field holding the last included term.
pub const LAST_INCLUDED_TERM: &str = "last_included_term";

/// Field holding the last included index.
pub const LAST_INCLUDED_INDEX: &str = "last_included_index";

/// Field holding the encoded configuration.
pub const CFG: &str = "cfg";

const RECORD_SEPARATOR: char = ';';
const FIELD_SEPARATOR: u8 = b',';

/// Build the configuration to snapshot from the registry.
///
/// Members whose addition is not committed yet are left out. The local node
/// takes its address from `local_addr`; every other member from its
/// connection.
pub fn committed_configuration(
    members: &[MemberInfo],
    local_id: NodeId,
    local_addr: &NodeAddr,
) -> Vec<SnapshotCfgEntry> {
    let mut configuration = Vec::with_capacity(members.len());

    for member in members {
        if !member.addition_committed {
            continue;
        }

        let addr = if member.id == local_id {
            local_addr.clone()
        } else if let Some(addr) = &member.addr {
            addr.clone()
        } else {
            error!(node_id = member.id, "Registry member has no address, leaving it out of the snapshot");
            continue;
        };

        configuration.push(SnapshotCfgEntry::new(
            member.id,
            member.active,
            member.voting_committed,
            addr,
        ));
    }

    configuration
}

/// Encode a configuration as `id,active,voting,host:port` records joined by `;`.
pub fn encode_configuration(configuration: &[SnapshotCfgEntry]) -> String {
    let mut out = String::new();
    for (i, entry) in configuration.iter().enumerate() {
        if i > 0 {
            out.push(RECORD_SEPARATOR);
        }
        out.push_str(&format!(
            "{},{},{},{}",
            entry.node_id,
            u8::from(entry.active),
            u8::from(entry.voting),
            entry.addr
        ));
    }
    out
}

/// Decode a configuration string.
///
/// Any malformed record rejects the whole configuration. Empty records (as
/// in `"a;;b"` or an empty string) are skipped.
pub fn decode_configuration(encoded: &str) -> Result<Vec<SnapshotCfgEntry>, SnapshotError> {
    let mut configuration = Vec::new();
    let mut seen = HashSet::new();

    for record in encoded.split(RECORD_SEPARATOR).filter(|r| !r.is_empty()) {
        let entry = decode_record(record)
            .ok_or_else(|| SnapshotError::CorruptConfigEntry(record.to_string()))?;

        if !seen.insert(entry.node_id) {
            return Err(SnapshotError::CorruptConfigEntry(format!(
                "duplicate node id {} in {:?}",
                entry.node_id, record
            )));
        }
        configuration.push(entry);
    }

    Ok(configuration)
}

fn decode_record(record: &str) -> Option<SnapshotCfgEntry> {
    let (id, rest) = consume_int(record.as_bytes(), FIELD_SEPARATOR)?;
    let (active, rest) = consume_int(rest, FIELD_SEPARATOR)?;
    let (voting, rest) = consume_int(rest, FIELD_SEPARATOR)?;

    let node_id = NodeId::try_from(id).ok()?;
    let addr: NodeAddr = std::str::from_utf8(rest).ok()?.parse().ok()?;

    Some(SnapshotCfgEntry::new(node_id, active != 0, voting != 0, addr))
}

/// Consume a strictly decimal integer terminated by `delim`.
///
/// Returns the value and the input after the delimiter, or `None` if a
/// non-digit appears first, there are no digits, the delimiter is missing,
/// or the value overflows.
fn consume_int(input: &[u8], delim: u8) -> Option<(u64, &[u8])> {
    let end = input.iter().position(|&b| b == delim)?;
    let digits = &input[..end];
    if digits.is_empty() {
        return None;
    }

    let mut value: u64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add(u64::from(b - b'0'))?;
    }

    Some((value, &input[end + 1..]))
}

/// Field/value pairs for the metadata record.
pub fn encode_metadata(metadata: &SnapshotMetadata) -> [(&'static str, String); 3] {
    [
        (LAST_INCLUDED_TERM, metadata.last_included_term.to_string()),
        (LAST_INCLUDED_INDEX, metadata.last_included_index.to_string()),
        (CFG, encode_configuration(&metadata.configuration)),
    ]
}

/// Rebuild metadata from the record's field/value pairs.
///
/// Field order does not matter and unknown fields are ignored. All three
/// known fields must be present.
pub fn decode_metadata(fields: &[(Bytes, Bytes)]) -> Result<SnapshotMetadata, SnapshotError> {
    let mut term = None;
    let mut index = None;
    let mut configuration = None;

    for (name, value) in fields {
        match &name[..] {
            n if n == LAST_INCLUDED_TERM.as_bytes() => {
                term = Some(parse_decimal(LAST_INCLUDED_TERM, value)?);
            }
            n if n == LAST_INCLUDED_INDEX.as_bytes() => {
                index = Some(parse_decimal(LAST_INCLUDED_INDEX, value)?);
            }
            n if n == CFG.as_bytes() => {
                let cfg = std::str::from_utf8(value).map_err(|_| {
                    SnapshotError::CorruptConfigEntry("cfg is not valid UTF-8".to_string())
                })?;
                configuration = Some(decode_configuration(cfg)?);
            }
            _ => {}
        }
    }

    let missing = |field: &str| SnapshotError::CorruptMetadata(format!("missing field {}", field));
    Ok(SnapshotMetadata {
        last_included_term: term.ok_or_else(|| missing(LAST_INCLUDED_TERM))?,
        last_included_index: index.ok_or_else(|| missing(LAST_INCLUDED_INDEX))?,
        configuration: configuration.ok_or_else(|| missing(CFG))?,
    })
}

fn parse_decimal(field: &str, value: &[u8]) -> Result<u64, SnapshotError> {
    let invalid = || {
        SnapshotError::CorruptMetadata(format!(
            "invalid {} value {:?}",
            field,
            String::from_utf8_lossy(value)
        ))
    };

    if value.is_empty() || !value.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(invalid)
}
