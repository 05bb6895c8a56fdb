//! Request scope adapters.
//!
//! [`ProvenanceLayer`] wraps an HTTP service so that every request runs in
//! its own [`ContextSlot`] with an actor scope derived from the request.
//! [`Provenance::handle_request`] does the same for synchronous callers.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::ConnectInfo;
use http::Request;
use provenance_core::{Identity, InboundRequest, RequestInfo};
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::scope::{ActorScope, Provenance};
use crate::slot::{with_slot, with_slot_sync, ContextSlot};

/// [`InboundRequest`] view over an `http::Request`.
///
/// The peer address comes from axum's `ConnectInfo<SocketAddr>` extension
/// and the identity from an [`Identity`] extension set by the auth layer.
#[derive(Debug)]
pub struct HttpRequest<'a, B>(pub &'a Request<B>);

impl<B> InboundRequest for HttpRequest<'_, B> {
    fn header(&self, name: &str) -> Option<&str> {
        self.0.headers().get(name).and_then(|v| v.to_str().ok())
    }

    fn peer_addr(&self) -> Option<String> {
        self.0
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
    }

    fn identity(&self) -> Option<&Identity> {
        self.0.extensions().get::<Identity>()
    }

    fn path(&self) -> &str {
        self.0.uri().path()
    }
}

impl Provenance {
    /// Runs `next` as the handling of `req`: in a fresh execution context,
    /// with `req` recorded as its current request and an actor scope derived
    /// from it. The scope exits when `next` returns or unwinds.
    pub fn handle_request<R, T>(&self, req: &R, next: impl FnOnce() -> T) -> T
    where
        R: InboundRequest + ?Sized,
    {
        let info = Arc::new(RequestInfo::extract(req, self.config()));
        let slot = Arc::new(ContextSlot::new());
        slot.set_request(Some(Arc::clone(&info)));

        with_slot_sync(slot, || {
            let _scope = self.enter_actor_scope(ActorScope::from_request_info(&info));
            next()
        })
    }
}

// ---------------------------------------------------------------------------
// ProvenanceLayer
// ---------------------------------------------------------------------------

/// Tower layer that opens a request-derived actor scope around each request.
#[derive(Debug, Clone)]
pub struct ProvenanceLayer {
    engine: Provenance,
}

impl ProvenanceLayer {
    #[must_use]
    pub fn new(engine: Provenance) -> Self {
        Self { engine }
    }
}

impl<S> Layer<S> for ProvenanceLayer {
    type Service = ProvenanceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ProvenanceService {
            inner,
            engine: self.engine.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// ProvenanceService
// ---------------------------------------------------------------------------

/// Service wrapper that runs the inner service inside the request's scope.
#[derive(Debug, Clone)]
pub struct ProvenanceService<S> {
    inner: S,
    engine: Provenance,
}

impl<S, B> Service<Request<B>> for ProvenanceService<S>
where
    S: Service<Request<B>> + Send + 'static,
    S::Future: Send + 'static,
    B: 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let info = Arc::new(RequestInfo::extract(&HttpRequest(&req), self.engine.config()));

        let span = info_span!(
            "provenance",
            path = info.path.as_deref(),
            remote_addr = info.remote_addr.as_deref(),
            actor = info.actor.as_ref().map(|a| a.id.as_str()),
        );

        let slot = Arc::new(ContextSlot::new());
        slot.set_request(Some(Arc::clone(&info)));

        // The guard exists before the inner service sees the request so that
        // work done eagerly in `call` is attributed too.
        let guard = with_slot_sync(Arc::clone(&slot), || {
            self.engine
                .enter_actor_scope(ActorScope::from_request_info(&info))
        });
        let fut = with_slot_sync(Arc::clone(&slot), || self.inner.call(req));

        Box::pin(
            with_slot(slot, async move {
                let _guard = guard;
                fut.await
            })
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
