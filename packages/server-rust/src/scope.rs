//! Scope management: the public entry points for attributing writes.
//!
//! A scope is an RAII guard. Entering pushes a fresh [`ProvenanceContext`]
//! onto the caller's [`ContextSlot`] and registers an interceptor under the
//! same token; dropping the guard pops the context and unregisters the
//! interceptor. Because exit is `Drop`, it runs on normal return, `?`
//! propagation, panic unwind, and when an async task holding the guard is
//! cancelled.
//!
//! ```ignore
//! let engine = Provenance::global();
//! let _scope = engine.enter_actor_scope(ActorScope::new(Some(actor)));
//! {
//!     let _approval = engine.enter_approval_scope("Q1");
//!     store.persist(entry).await; // attributed with approval Q1
//! }
//! store.persist(other).await; // attributed to `actor`, no approval
//! ```

use std::future::Future;
use std::sync::{Arc, OnceLock};

use provenance_core::{
    Actor, AuditRecord, ExtractConfig, InboundRequest, ProvenanceContext, RequestInfo, Token,
};
use tracing::{debug, warn};

use crate::registry::{DispatchOutcome, InterceptorEntry, InterceptorRegistry, PersistHook};
use crate::slot::{
    current_slot, resolve_slot, task_slot, with_slot, ContextSlot, PopResult, SlotOrigin,
};

static GLOBAL: OnceLock<Provenance> = OnceLock::new();

/// Which entry point opened a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Actor,
    Approval,
}

impl ScopeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Actor => "actor",
            Self::Approval => "approval",
        }
    }
}

/// Provenance to attach to writes made inside an actor scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActorScope {
    pub actor: Option<Actor>,
    pub remote_addr: Option<String>,
    pub path: Option<String>,
    pub domain_object_id: Option<String>,
    pub approval_id: Option<String>,
}

impl ActorScope {
    #[must_use]
    pub fn new(actor: Option<Actor>) -> Self {
        Self {
            actor,
            ..Self::default()
        }
    }

    /// Takes actor, address, path and object id from an extracted request.
    #[must_use]
    pub fn from_request_info(info: &RequestInfo) -> Self {
        Self {
            actor: info.actor.clone(),
            remote_addr: info.remote_addr.clone(),
            path: info.path.clone(),
            domain_object_id: info.domain_object_id.clone(),
            approval_id: None,
        }
    }

    #[must_use]
    pub fn with_remote_addr(mut self, remote_addr: impl Into<String>) -> Self {
        self.remote_addr = Some(remote_addr.into());
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_domain_object_id(mut self, id: impl Into<String>) -> Self {
        self.domain_object_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_approval_id(mut self, approval_id: impl Into<String>) -> Self {
        self.approval_id = Some(approval_id.into());
        self
    }
}

/// Scope manager. Cheap to clone; clones share one interceptor registry.
#[derive(Debug, Clone, Default)]
pub struct Provenance {
    registry: Arc<InterceptorRegistry>,
    config: Arc<ExtractConfig>,
}

impl Provenance {
    /// Creates an engine with its own registry and default extraction rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: ExtractConfig) -> Self {
        Self {
            registry: Arc::new(InterceptorRegistry::new()),
            config: Arc::new(config),
        }
    }

    /// The process-wide engine.
    #[must_use]
    pub fn global() -> &'static Provenance {
        GLOBAL.get_or_init(Provenance::new)
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<InterceptorRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    /// Opens a scope attributing writes to `scope`'s actor and fields.
    ///
    /// From async code prefer [`Provenance::scoped`]; a task without its own
    /// slot gets a detached one here.
    pub fn enter_actor_scope(&self, scope: ActorScope) -> ScopeGuard {
        self.open(caller_slot(ScopeKind::Actor), ScopeKind::Actor, scope)
    }

    /// Opens a scope with actor, address, path and object id derived from
    /// `req`. A given `approval_id` marks writes as part of that approval.
    pub fn enter_request_scope<R>(&self, req: &R, approval_id: Option<String>) -> ScopeGuard
    where
        R: InboundRequest + ?Sized,
    {
        let info = RequestInfo::extract(req, self.config());
        let mut scope = ActorScope::from_request_info(&info);
        let kind = if approval_id.is_some() {
            ScopeKind::Approval
        } else {
            ScopeKind::Actor
        };
        scope.approval_id = approval_id;
        self.open(caller_slot(kind), kind, scope)
    }

    /// Runs `fut` inside an actor scope on a slot of its own.
    ///
    /// The slot starts with the caller's request and disabled flag, so
    /// futures polled concurrently by one task (`join!`, `select!`) never
    /// see each other's scopes. The scope exits when `fut` completes or is
    /// dropped.
    pub async fn scoped<F: Future>(&self, scope: ActorScope, fut: F) -> F::Output {
        let slot = Arc::new(task_slot().map_or_else(ContextSlot::new, |parent| parent.child()));
        let guard = self.open(Arc::clone(&slot), ScopeKind::Actor, scope);
        with_slot(slot, async move {
            let _guard = guard;
            fut.await
        })
        .await
    }

    /// Opens a scope marking writes as part of approval `approval_id`.
    ///
    /// Actor, address, path and object id are re-derived from the request
    /// recorded on the caller's slot. Without one they are inherited from the
    /// enclosing scope, if any.
    pub fn enter_approval_scope(&self, approval_id: impl Into<String>) -> ScopeGuard {
        let slot = caller_slot(ScopeKind::Approval);
        let scope = if let Some(request) = slot.request() {
            ActorScope::from_request_info(&request)
        } else if let Some(parent) = slot.current() {
            ActorScope {
                actor: self.registry.actor_of(parent.token),
                remote_addr: parent.remote_addr.clone(),
                path: parent.path.clone(),
                domain_object_id: parent.domain_object_id.clone(),
                approval_id: None,
            }
        } else {
            ActorScope::default()
        };
        self.open(slot, ScopeKind::Approval, scope.with_approval_id(approval_id))
    }

    /// Disables audit logging in the caller's context until the guard drops.
    pub fn enter_disabled_scope(&self) -> DisabledGuard {
        let (slot, origin) = resolve_slot();
        if origin == SlotOrigin::Detached {
            warn!("logging disabled on a detached slot; writes in this task are still logged");
        }
        DisabledGuard::enter(slot)
    }

    /// Whether audit logging is disabled in the caller's context.
    ///
    /// Record creation sites check this before building a record at all.
    #[must_use]
    pub fn is_logging_disabled(&self) -> bool {
        current_slot().is_disabled()
    }

    fn open(&self, slot: Arc<ContextSlot>, kind: ScopeKind, scope: ActorScope) -> ScopeGuard {
        let token = loop {
            let token = Token::generate();
            match self
                .registry
                .register(InterceptorEntry::new(token, scope.actor.clone()))
            {
                Ok(()) => break token,
                Err(err) => warn!(%err, kind = kind.as_str(), "regenerating scope token"),
            }
        };

        slot.push_current(Arc::new(ProvenanceContext {
            token,
            remote_addr: scope.remote_addr,
            path: scope.path,
            domain_object_id: scope.domain_object_id,
            approval_id: scope.approval_id,
        }));

        debug!(
            %token,
            kind = kind.as_str(),
            actor = scope.actor.as_ref().map(|a| a.id.as_str()),
            depth = slot.depth(),
            "scope entered"
        );

        ScopeGuard {
            token,
            kind,
            slot,
            registry: Arc::clone(&self.registry),
        }
    }
}

/// The caller's slot, warning when the scope about to be opened on it can
/// never be observed.
fn caller_slot(kind: ScopeKind) -> Arc<ContextSlot> {
    let (slot, origin) = resolve_slot();
    if origin == SlotOrigin::Detached {
        warn!(
            kind = kind.as_str(),
            origin = origin.as_str(),
            "scope entered in a tokio task without a provenance slot; writes stay unattributed, use Provenance::scoped"
        );
    }
    slot
}

impl PersistHook for Provenance {
    fn before_persist(&self, record: &mut dyn AuditRecord) -> DispatchOutcome {
        self.registry.dispatch(record)
    }
}

/// An open actor or approval scope. Dropping it exits the scope.
#[must_use = "the scope exits as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ScopeGuard {
    token: Token,
    kind: ScopeKind,
    slot: Arc<ContextSlot>,
    registry: Arc<InterceptorRegistry>,
}

impl ScopeGuard {
    #[must_use]
    pub fn token(&self) -> Token {
        self.token
    }

    #[must_use]
    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    /// Exits the scope now.
    pub fn exit(self) {}
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let token = self.token;
        match self.slot.pop_current(token) {
            PopResult::Top => {}
            PopResult::OutOfOrder => {
                warn!(%token, kind = self.kind.as_str(), "scope exited while an inner scope was still open");
            }
            PopResult::Missing => {
                warn!(%token, kind = self.kind.as_str(), "scope context already gone on exit");
            }
        }
        self.registry.unregister(token);
        debug!(%token, kind = self.kind.as_str(), depth = self.slot.depth(), "scope exited");
    }
}

/// Disabled-logging scope. Restores the previous flag value on drop.
#[must_use = "logging is re-enabled as soon as the guard is dropped"]
#[derive(Debug)]
pub struct DisabledGuard {
    slot: Arc<ContextSlot>,
    previous: bool,
}

impl DisabledGuard {
    fn enter(slot: Arc<ContextSlot>) -> Self {
        let previous = slot.set_disabled(true);
        debug!(previous, "audit logging disabled");
        Self { slot, previous }
    }
}

impl Drop for DisabledGuard {
    fn drop(&mut self) {
        self.slot.set_disabled(self.previous);
    }
}
