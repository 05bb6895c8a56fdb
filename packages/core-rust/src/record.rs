//! Audit record contract and the default log entry type.
//!
//! [`AuditRecord`] is the surface the interception engine writes into just
//! before a record is persisted. [`LogEntry`] is the in-tree implementation
//! used by the bundled store; persistence layers with their own schema
//! implement the trait on their own type.

use serde::{Deserialize, Serialize};

use crate::types::Actor;

/// Provenance fields of a record that is about to be persisted.
pub trait AuditRecord {
    /// The actor already set by the caller, if any.
    fn actor(&self) -> Option<&Actor>;

    fn set_actor(&mut self, actor: Actor);

    fn set_remote_addr(&mut self, remote_addr: Option<String>);

    fn set_path(&mut self, path: Option<String>);

    fn set_domain_object_id(&mut self, domain_object_id: Option<String>);

    fn set_approval_id(&mut self, approval_id: String);

    fn set_is_approval(&mut self, is_approval: bool);

    /// Request correlation id already set by the caller, if any.
    fn cid(&self) -> Option<&str>;

    fn set_cid(&mut self, cid: String);
}

/// Kind of change a log entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    Create,
    Update,
    Delete,
    Access,
}

/// A single audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Assigned by the store on commit.
    pub id: Option<u64>,
    pub action: LogAction,
    /// Human-readable description of the changed object.
    pub object_repr: String,
    /// Field-level diff, `{"field": [old, new]}`.
    pub changes: serde_json::Value,
    pub actor: Option<Actor>,
    pub remote_addr: Option<String>,
    pub path: Option<String>,
    pub domain_object_id: Option<String>,
    pub approval_id: Option<String>,
    pub is_approval: bool,
    pub cid: Option<String>,
    /// Milliseconds since the Unix epoch, assigned by the store on commit.
    pub timestamp_ms: i64,
}

impl LogEntry {
    /// Creates an unattributed entry with empty changes.
    #[must_use]
    pub fn new(action: LogAction, object_repr: impl Into<String>) -> Self {
        Self {
            id: None,
            action,
            object_repr: object_repr.into(),
            changes: serde_json::Value::Object(serde_json::Map::new()),
            actor: None,
            remote_addr: None,
            path: None,
            domain_object_id: None,
            approval_id: None,
            is_approval: false,
            cid: None,
            timestamp_ms: 0,
        }
    }

    /// Sets the changes payload.
    #[must_use]
    pub fn with_changes(mut self, changes: serde_json::Value) -> Self {
        self.changes = changes;
        self
    }

    /// Pre-attributes the entry to an explicit actor.
    #[must_use]
    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = Some(actor);
        self
    }
}

impl AuditRecord for LogEntry {
    fn actor(&self) -> Option<&Actor> {
        self.actor.as_ref()
    }

    fn set_actor(&mut self, actor: Actor) {
        self.actor = Some(actor);
    }

    fn set_remote_addr(&mut self, remote_addr: Option<String>) {
        self.remote_addr = remote_addr;
    }

    fn set_path(&mut self, path: Option<String>) {
        self.path = path;
    }

    fn set_domain_object_id(&mut self, domain_object_id: Option<String>) {
        self.domain_object_id = domain_object_id;
    }

    fn set_approval_id(&mut self, approval_id: String) {
        self.approval_id = Some(approval_id);
    }

    fn set_is_approval(&mut self, is_approval: bool) {
        self.is_approval = is_approval;
    }

    fn cid(&self) -> Option<&str> {
        self.cid.as_deref()
    }

    fn set_cid(&mut self, cid: String) {
        self.cid = Some(cid);
    }
}
