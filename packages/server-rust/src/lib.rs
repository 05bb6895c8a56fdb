//! Provenance Server — scoped request provenance and persist-time audit attribution.
//!
//! Writes made while handling a request are attributed to that request's
//! actor, client address, and resource without the persistence layer having
//! to carry them: scopes record provenance on the execution context, and the
//! store's [`PersistHook`] pulls it in right before each commit.

pub mod middleware;
pub mod registry;
pub mod scope;
pub mod slot;
pub mod store;

pub use middleware::{HttpRequest, ProvenanceLayer, ProvenanceService};
pub use registry::{
    DispatchOutcome, InterceptorEntry, InterceptorRegistry, PersistHook, RegistryError,
};
pub use scope::{ActorScope, DisabledGuard, Provenance, ScopeGuard, ScopeKind};
pub use slot::{
    current_slot, resolve_slot, task_slot, with_slot, with_slot_sync, ContextSlot, PopResult,
    SlotOrigin,
};
pub use store::{AuditStore, MemoryAuditStore};
