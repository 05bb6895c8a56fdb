//! Audit log persistence seam.
//!
//! [`AuditStore`] is where audit records are committed. Implementations
//! call the [`PersistHook`] immediately before the commit and skip record
//! creation entirely while logging is disabled in the caller's context.
//! [`MemoryAuditStore`] keeps committed entries in memory; useful for tests
//! and for embedding where durability is handled elsewhere.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use provenance_core::LogEntry;
use tracing::{debug, trace};

use crate::registry::PersistHook;
use crate::slot::current_slot;

/// Destination for audit log entries.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Attributes and commits `entry`.
    ///
    /// Returns the committed entry, or `None` if logging is disabled in the
    /// calling context.
    async fn persist(&self, entry: LogEntry) -> Option<LogEntry>;
}

/// In-memory `AuditStore`.
pub struct MemoryAuditStore {
    hook: Arc<dyn PersistHook>,
    entries: Mutex<Vec<LogEntry>>,
    next_id: AtomicU64,
}

impl MemoryAuditStore {
    /// Creates an empty store that attributes entries through `hook`.
    ///
    /// Entry ids start at 1.
    #[must_use]
    pub fn new(hook: Arc<dyn PersistHook>) -> Self {
        Self {
            hook,
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Snapshot of all committed entries, in commit order.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn persist(&self, mut entry: LogEntry) -> Option<LogEntry> {
        if current_slot().is_disabled() {
            debug!(object = %entry.object_repr, "audit logging disabled, entry dropped");
            return None;
        }

        let outcome = self.hook.before_persist(&mut entry);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        entry.id = Some(id);
        entry.timestamp_ms = now_millis();
        trace!(id, outcome = outcome.as_str(), "audit entry committed");

        self.entries.lock().push(entry.clone());
        Some(entry)
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
