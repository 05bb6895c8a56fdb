//! Process-wide interceptor registry and the persist hook contract.
//!
//! Every open scope registers one [`InterceptorEntry`] under its token. The
//! persistence layer calls [`PersistHook::before_persist`] right before it
//! commits an audit record; the registry offers the record to every entry
//! and each entry applies itself only if its token is the one on top of the
//! calling context's slot.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use provenance_core::{Actor, AuditRecord, ProvenanceContext, Token};
use tracing::{debug, trace};

use crate::slot::{current_slot, ContextSlot};

/// Errors returned by registry mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("token {0} is already registered")]
    DuplicateToken(Token),
}

/// What a dispatch did to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The interceptor bound to `token` attributed the record.
    Applied { token: Token },
    /// No scope is open in the calling context.
    NoContext,
    /// A scope is open but logging is disabled in the calling context.
    Disabled,
    /// A scope is open but no registered interceptor carries its token.
    Unmatched,
}

impl DispatchOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::NoContext => "no_context",
            Self::Disabled => "disabled",
            Self::Unmatched => "unmatched",
        }
    }
}

/// Interceptor registered for one open scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptorEntry {
    pub token: Token,
    /// Actor attributed to records written in the scope, if known.
    pub actor: Option<Actor>,
}

impl InterceptorEntry {
    #[must_use]
    pub fn new(token: Token, actor: Option<Actor>) -> Self {
        Self { token, actor }
    }

    /// Writes the scope's provenance into `record`.
    ///
    /// The actor is only set when the caller has not set one. Address, path
    /// and object id always overwrite; the approval id only when present.
    fn apply(&self, ctx: &ProvenanceContext, cid: Option<&str>, record: &mut dyn AuditRecord) {
        if record.actor().is_none() {
            if let Some(actor) = &self.actor {
                record.set_actor(actor.clone());
            }
        }

        record.set_remote_addr(ctx.remote_addr.clone());
        record.set_path(ctx.path.clone());
        record.set_domain_object_id(ctx.domain_object_id.clone());

        if let Some(approval_id) = &ctx.approval_id {
            record.set_approval_id(approval_id.clone());
            record.set_is_approval(true);
        }

        if record.cid().is_none() {
            if let Some(cid) = cid {
                record.set_cid(cid.to_string());
            }
        }
    }
}

/// Called by the persistence layer immediately before an audit record is
/// committed. Implementations must never fail the write.
pub trait PersistHook: Send + Sync {
    fn before_persist(&self, record: &mut dyn AuditRecord) -> DispatchOutcome;
}

/// Concurrent table of live interceptors keyed by token.
///
/// Entries are held by strong reference until explicitly unregistered.
#[derive(Debug, Default)]
pub struct InterceptorRegistry {
    entries: DashMap<Token, Arc<InterceptorEntry>>,
}

impl InterceptorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `entry` under its token.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateToken`] if the token is already
    /// registered; the existing entry is left untouched.
    pub fn register(&self, entry: InterceptorEntry) -> Result<(), RegistryError> {
        let token = entry.token;
        match self.entries.entry(token) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateToken(token)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(entry));
                debug!(%token, "interceptor registered");
                Ok(())
            }
        }
    }

    /// Removes the entry for `token`. Returns `false` if it was not present.
    pub fn unregister(&self, token: Token) -> bool {
        let removed = self.entries.remove(&token).is_some();
        if removed {
            debug!(%token, "interceptor unregistered");
        }
        removed
    }

    #[must_use]
    pub fn contains(&self, token: Token) -> bool {
        self.entries.contains_key(&token)
    }

    /// Actor bound to the interceptor for `token`.
    #[must_use]
    pub fn actor_of(&self, token: Token) -> Option<Actor> {
        self.entries
            .get(&token)
            .and_then(|entry| entry.value().actor.clone())
    }

    /// Number of live interceptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Offers `record` to every live interceptor on behalf of the calling
    /// execution context.
    pub fn dispatch(&self, record: &mut dyn AuditRecord) -> DispatchOutcome {
        self.dispatch_in(&current_slot(), record)
    }

    /// Offers `record` to every live interceptor on behalf of `slot`.
    pub fn dispatch_in(&self, slot: &ContextSlot, record: &mut dyn AuditRecord) -> DispatchOutcome {
        let Some(current) = slot.current() else {
            trace!(outcome = "no_context", "dispatch");
            return DispatchOutcome::NoContext;
        };
        let disabled = slot.is_disabled();
        let cid = slot.request().and_then(|req| req.correlation_id.clone());

        // Snapshot so no shard lock is held while interceptors run.
        let snapshot: Vec<Arc<InterceptorEntry>> = self
            .entries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut outcome = DispatchOutcome::Unmatched;
        for entry in &snapshot {
            if entry.token != current.token {
                continue;
            }
            if disabled {
                outcome = DispatchOutcome::Disabled;
                continue;
            }
            entry.apply(&current, cid.as_deref(), record);
            outcome = DispatchOutcome::Applied { token: entry.token };
        }

        trace!(
            token = %current.token,
            interceptors = snapshot.len(),
            outcome = outcome.as_str(),
            "dispatch"
        );
        outcome
    }
}

impl PersistHook for InterceptorRegistry {
    fn before_persist(&self, record: &mut dyn AuditRecord) -> DispatchOutcome {
        self.dispatch(record)
    }
}

#[cfg(test)]
mod tests {
    use provenance_core::{LogAction, LogEntry};

    use super::*;

    fn open(slot: &ContextSlot, registry: &InterceptorRegistry, actor: &str) -> Token {
        let token = Token::generate();
        let mut ctx = ProvenanceContext::new(token);
        ctx.remote_addr = Some("10.0.0.5".to_string());
        ctx.path = Some("orders".to_string());
        ctx.domain_object_id = Some("7".to_string());
        slot.push_current(Arc::new(ctx));
        registry
            .register(InterceptorEntry::new(token, Some(Actor::new(actor))))
            .unwrap();
        token
    }

    fn entry() -> LogEntry {
        LogEntry::new(LogAction::Update, "Order #7")
    }

    #[test]
    fn outcome_labels() {
        let applied = DispatchOutcome::Applied {
            token: Token::generate(),
        };
        assert_eq!(applied.as_str(), "applied");
        assert_eq!(DispatchOutcome::NoContext.as_str(), "no_context");
        assert_eq!(DispatchOutcome::Disabled.as_str(), "disabled");
        assert_eq!(DispatchOutcome::Unmatched.as_str(), "unmatched");
        assert!(matches!(applied, DispatchOutcome::Applied { .. }));
    }

    #[test]
    fn register_rejects_duplicate_token() {
        let registry = InterceptorRegistry::new();
        let token = Token::generate();
        registry
            .register(InterceptorEntry::new(token, Some(Actor::new("1"))))
            .unwrap();

        let err = registry
            .register(InterceptorEntry::new(token, Some(Actor::new("2"))))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateToken(token));
        assert_eq!(registry.actor_of(token), Some(Actor::new("1")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = InterceptorRegistry::new();
        let token = Token::generate();
        registry.register(InterceptorEntry::new(token, None)).unwrap();

        assert!(registry.unregister(token));
        assert!(!registry.unregister(token));
        assert!(!registry.unregister(Token::generate()));
        assert!(registry.is_empty());
    }

    #[test]
    fn dispatch_without_context_leaves_record_alone() {
        let registry = InterceptorRegistry::new();
        registry
            .register(InterceptorEntry::new(Token::generate(), Some(Actor::new("1"))))
            .unwrap();

        let slot = ContextSlot::new();
        let mut record = entry();
        assert_eq!(registry.dispatch_in(&slot, &mut record), DispatchOutcome::NoContext);
        assert_eq!(record, entry());
    }

    #[test]
    fn dispatch_applies_matching_interceptor_only() {
        let registry = InterceptorRegistry::new();
        let other_slot = ContextSlot::new();
        open(&other_slot, &registry, "other");

        let slot = ContextSlot::new();
        let token = open(&slot, &registry, "mine");

        let mut record = entry();
        assert_eq!(
            registry.dispatch_in(&slot, &mut record),
            DispatchOutcome::Applied { token }
        );
        assert_eq!(record.actor, Some(Actor::new("mine")));
        assert_eq!(record.remote_addr.as_deref(), Some("10.0.0.5"));
        assert_eq!(record.path.as_deref(), Some("orders"));
        assert_eq!(record.domain_object_id.as_deref(), Some("7"));
        assert!(record.approval_id.is_none());
        assert!(!record.is_approval);
    }

    #[test]
    fn existing_actor_is_preserved() {
        let registry = InterceptorRegistry::new();
        let slot = ContextSlot::new();
        open(&slot, &registry, "scope-actor");

        let mut record = entry().with_actor(Actor::new("explicit"));
        record.remote_addr = Some("stale".to_string());
        registry.dispatch_in(&slot, &mut record);

        assert_eq!(record.actor, Some(Actor::new("explicit")));
        assert_eq!(record.remote_addr.as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn approval_id_marks_record_as_approval() {
        let registry = InterceptorRegistry::new();
        let slot = ContextSlot::new();
        let token = Token::generate();
        let mut ctx = ProvenanceContext::new(token);
        ctx.approval_id = Some("Q1".to_string());
        slot.push_current(Arc::new(ctx));
        registry.register(InterceptorEntry::new(token, None)).unwrap();

        let mut record = entry();
        registry.dispatch_in(&slot, &mut record);
        assert_eq!(record.approval_id.as_deref(), Some("Q1"));
        assert!(record.is_approval);
        assert!(record.actor.is_none());
    }

    #[test]
    fn disabled_slot_skips_mutation() {
        let registry = InterceptorRegistry::new();
        let slot = ContextSlot::new();
        open(&slot, &registry, "1");
        slot.set_disabled(true);

        let mut record = entry();
        assert_eq!(registry.dispatch_in(&slot, &mut record), DispatchOutcome::Disabled);
        assert_eq!(record, entry());
    }

    #[test]
    fn unregistered_token_is_unmatched() {
        let registry = InterceptorRegistry::new();
        let slot = ContextSlot::new();
        let token = open(&slot, &registry, "1");
        registry.unregister(token);

        let mut record = entry();
        assert_eq!(registry.dispatch_in(&slot, &mut record), DispatchOutcome::Unmatched);
        assert!(record.actor.is_none());
    }

    #[test]
    fn correlation_id_fills_missing_cid() {
        let registry = InterceptorRegistry::new();
        let slot = ContextSlot::new();
        slot.set_request(Some(Arc::new(provenance_core::RequestInfo {
            correlation_id: Some("corr-9".to_string()),
            ..Default::default()
        })));
        open(&slot, &registry, "1");

        let mut fresh = entry();
        registry.dispatch_in(&slot, &mut fresh);
        assert_eq!(fresh.cid.as_deref(), Some("corr-9"));

        let mut preset = entry();
        preset.cid = Some("keep".to_string());
        registry.dispatch_in(&slot, &mut preset);
        assert_eq!(preset.cid.as_deref(), Some("keep"));
    }

    #[test]
    fn persist_hook_is_object_safe() {
        fn _assert_object_safe(_: &Arc<dyn PersistHook>) {}
    }
}
