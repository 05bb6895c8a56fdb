//! Execution-context-local provenance storage.
//!
//! Each request (or OS thread, outside of request handling) owns one
//! [`ContextSlot`]. Scopes push onto its stack on entry and pop on exit, so
//! the top of the stack is always the innermost active scope.
//!
//! The slot for the caller is resolved by [`current_slot`]: a task-local
//! slot installed with [`with_slot`]/[`with_slot_sync`] wins. Outside a
//! tokio runtime the calling thread's own slot is used. Inside a runtime
//! without a task-local slot the caller gets a detached, empty slot: tasks
//! interleave on worker threads, so a per-thread slot would hand one task's
//! scope to another. Spawned tasks do not inherit the task-local slot.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use provenance_core::{ProvenanceContext, RequestInfo, Token};

tokio::task_local! {
    static TASK_SLOT: Arc<ContextSlot>;
}

thread_local! {
    static THREAD_SLOT: Arc<ContextSlot> = Arc::new(ContextSlot::new());
}

/// Per-execution-context provenance state.
#[derive(Debug, Default)]
pub struct ContextSlot {
    stack: Mutex<Vec<Arc<ProvenanceContext>>>,
    disabled: AtomicBool,
    request: Mutex<Option<Arc<RequestInfo>>>,
}

/// Result of removing a context from the slot's stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopResult {
    /// The token was on top and was popped.
    Top,
    /// The token was found below the top and removed from there.
    OutOfOrder,
    /// The token was not on the stack.
    Missing,
}

impl ContextSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `ctx` the current context, keeping the previous one beneath it.
    pub fn push_current(&self, ctx: Arc<ProvenanceContext>) {
        self.stack.lock().push(ctx);
    }

    /// Removes the context bound to `token`.
    pub fn pop_current(&self, token: Token) -> PopResult {
        let mut stack = self.stack.lock();
        match stack.iter().rposition(|ctx| ctx.token == token) {
            Some(pos) if pos + 1 == stack.len() => {
                stack.pop();
                PopResult::Top
            }
            Some(pos) => {
                stack.remove(pos);
                PopResult::OutOfOrder
            }
            None => PopResult::Missing,
        }
    }

    /// The innermost active context, if any scope is open.
    #[must_use]
    pub fn current(&self) -> Option<Arc<ProvenanceContext>> {
        self.stack.lock().last().cloned()
    }

    /// Number of open scopes on this slot.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.lock().len()
    }

    /// Sets the disabled flag, returning the previous value.
    pub fn set_disabled(&self, disabled: bool) -> bool {
        self.disabled.swap(disabled, Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    /// Records the request being handled in this context.
    pub fn set_request(&self, request: Option<Arc<RequestInfo>>) {
        *self.request.lock() = request;
    }

    /// The request being handled in this context, if recorded.
    #[must_use]
    pub fn request(&self) -> Option<Arc<RequestInfo>> {
        self.request.lock().clone()
    }

    /// A new slot with this slot's request and disabled flag but no open
    /// scopes.
    #[must_use]
    pub fn child(&self) -> Self {
        let child = Self::new();
        child.set_request(self.request());
        child.set_disabled(self.is_disabled());
        child
    }
}

/// Where [`resolve_slot`] found the caller's slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOrigin {
    /// Installed for the current task by [`with_slot`]/[`with_slot_sync`].
    Task,
    /// The calling OS thread's slot; only used outside a tokio runtime.
    Thread,
    /// Fresh slot shared with nobody. Scopes entered on it are never seen
    /// by a later dispatch, so writes go unattributed.
    Detached,
}

impl SlotOrigin {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Thread => "thread",
            Self::Detached => "detached",
        }
    }
}

/// The slot of the calling execution context and where it came from.
#[must_use]
pub fn resolve_slot() -> (Arc<ContextSlot>, SlotOrigin) {
    if let Some(slot) = task_slot() {
        return (slot, SlotOrigin::Task);
    }
    if tokio::runtime::Handle::try_current().is_ok() {
        return (Arc::new(ContextSlot::new()), SlotOrigin::Detached);
    }
    (THREAD_SLOT.with(Arc::clone), SlotOrigin::Thread)
}

/// The slot of the calling execution context.
#[must_use]
pub fn current_slot() -> Arc<ContextSlot> {
    resolve_slot().0
}

/// The slot installed for the current task, if any.
#[must_use]
pub fn task_slot() -> Option<Arc<ContextSlot>> {
    TASK_SLOT.try_with(Arc::clone).ok()
}

/// Runs `fut` with `slot` as its execution context.
pub async fn with_slot<F: Future>(slot: Arc<ContextSlot>, fut: F) -> F::Output {
    TASK_SLOT.scope(slot, fut).await
}

/// Runs `f` with `slot` as its execution context.
pub fn with_slot_sync<R>(slot: Arc<ContextSlot>, f: impl FnOnce() -> R) -> R {
    TASK_SLOT.sync_scope(slot, f)
}
