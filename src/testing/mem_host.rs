//! In-memory host store.

use crate::error::HostError;
use crate::host::HostStore;
use crate::types::NodeAddr;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};

const IDLE_REPORT: &str = "# Replication\r\nrole:master\r\nconnected_slaves:0\r\n";

#[derive(Debug, Clone)]
enum Value {
    Hash(Vec<(Bytes, Bytes)>),
    Str(Bytes),
}

/// Host store fake.
///
/// Replication is scripted: each `replication_report` call pops the next
/// queued report, and a dataset staged with `stage_dataset` lands in the
/// keyspace when the replica detaches, as if the transfer had delivered it.
#[derive(Debug, Default)]
pub struct MemHost {
    keyspace: HashMap<String, Value>,
    reports: VecDeque<Bytes>,
    staged: Option<HashMap<String, Value>>,
    replicating_from: Option<NodeAddr>,
    reject_replication: bool,
    fail_writes: bool,
    writes: usize,
    report_requests: usize,
    detaches: usize,
}

impl MemHost {
    /// Empty host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of `field` in the hash record `key`.
    pub fn field(&self, key: &str, field: &str) -> Option<Bytes> {
        match self.keyspace.get(key)? {
            Value::Hash(fields) => fields
                .iter()
                .find(|(f, _)| &f[..] == field.as_bytes())
                .map(|(_, v)| v.clone()),
            Value::Str(_) => None,
        }
    }

    /// Plain string stored under `key`.
    pub fn string(&self, key: &str) -> Option<Bytes> {
        match self.keyspace.get(key)? {
            Value::Str(value) => Some(value.clone()),
            Value::Hash(_) => None,
        }
    }

    /// Write hash fields directly, without counting a write.
    pub fn set_raw_fields(&mut self, key: &str, fields: &[(&str, &str)]) {
        let owned: Vec<(&str, String)> = fields.iter().map(|(f, v)| (*f, v.to_string())).collect();
        self.put_fields(key, &owned);
    }

    /// Store a plain string under `key`.
    pub fn set_string(&mut self, key: &str, value: Bytes) {
        self.keyspace.insert(key.to_string(), Value::Str(value));
    }

    /// Number of `set_fields` calls that succeeded.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Make every `set_fields` call fail.
    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Make `replicate_from` fail.
    pub fn reject_replication(&mut self, reject: bool) {
        self.reject_replication = reject;
    }

    /// Current replication source.
    pub fn replicating_from(&self) -> Option<&NodeAddr> {
        self.replicating_from.as_ref()
    }

    /// Queue a replication report.
    pub fn push_report(&mut self, report: &str) {
        self.reports.push_back(Bytes::copy_from_slice(report.as_bytes()));
    }

    /// Queue a raw replication report.
    pub fn push_report_bytes(&mut self, report: Vec<u8>) {
        self.reports.push_back(Bytes::from(report));
    }

    /// Number of reports requested.
    pub fn report_requests(&self) -> usize {
        self.report_requests
    }

    /// Number of times the replica detached.
    pub fn detach_count(&self) -> usize {
        self.detaches
    }

    /// Copy `source`'s keyspace so it replaces this one on the next detach.
    pub fn stage_dataset(&mut self, source: &MemHost) {
        self.staged = Some(source.keyspace.clone());
    }

    fn put_fields(&mut self, key: &str, fields: &[(&str, String)]) {
        let entry = self
            .keyspace
            .entry(key.to_string())
            .or_insert_with(|| Value::Hash(Vec::new()));
        if let Value::Str(_) = entry {
            *entry = Value::Hash(Vec::new());
        }
        let Value::Hash(existing) = entry else {
            return;
        };

        for (field, value) in fields {
            let value = Bytes::copy_from_slice(value.as_bytes());
            match existing.iter_mut().find(|(f, _)| &f[..] == field.as_bytes()) {
                Some((_, v)) => *v = value,
                None => existing.push((Bytes::copy_from_slice(field.as_bytes()), value)),
            }
        }
    }
}

impl HostStore for MemHost {
    fn set_fields(&mut self, key: &str, fields: &[(&str, String)]) -> Result<(), HostError> {
        if self.fail_writes {
            return Err(HostError::Unavailable("writes disabled".to_string()));
        }
        if let Some(Value::Str(_)) = self.keyspace.get(key) {
            return Err(HostError::WrongType(key.to_string()));
        }
        self.put_fields(key, fields);
        self.writes += 1;
        Ok(())
    }

    fn get_all_fields(&mut self, key: &str) -> Result<Vec<(Bytes, Bytes)>, HostError> {
        match self.keyspace.get(key) {
            None => Ok(Vec::new()),
            Some(Value::Hash(fields)) => Ok(fields.clone()),
            Some(Value::Str(_)) => Err(HostError::WrongType(key.to_string())),
        }
    }

    fn replicate_from(&mut self, source: &NodeAddr) -> Result<(), HostError> {
        if self.reject_replication {
            return Err(HostError::Rejected(format!("cannot replicate from {}", source)));
        }
        self.replicating_from = Some(source.clone());
        Ok(())
    }

    fn detach_replica(&mut self) -> Result<(), HostError> {
        self.replicating_from = None;
        self.detaches += 1;
        if let Some(keyspace) = self.staged.take() {
            self.keyspace = keyspace;
        }
        Ok(())
    }

    fn replication_report(&mut self) -> Result<Bytes, HostError> {
        self.report_requests += 1;
        Ok(self
            .reports
            .pop_front()
            .unwrap_or_else(|| Bytes::from_static(IDLE_REPORT.as_bytes())))
    }
}
