//! Global and per-route middleware.
//!
//! A [`Middleware`] turns the shared [`RequestContext`] into an [`Operation`] that either lets
//! the request through ([`Flow::Continue`]) or answers it on the spot ([`Flow::Respond`]).
//!
//! Every middleware of a [`MiddlewareStack`] is spawned as a concurrent child of the request
//! task, in registration order, and they race against the same context. Nothing orders their
//! completion: state they share through the context has to tolerate interleaved writes.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use http::Response;
use seasaw_http::{BoxError, ResponseBody};
use tracing::debug;

use crate::context::RequestContext;
use crate::operation::{Operation, OperationError, Scope, until};

/// What a middleware decided about the request.
#[derive(Debug)]
pub enum Flow {
    Continue,
    /// Skip the handler and answer with this response.
    Respond(Response<ResponseBody>),
}

pub trait Middleware: Send + Sync + 'static {
    fn call(&self, ctx: RequestContext) -> Operation<Flow>;
}

impl<F> Middleware for F
where
    F: Fn(RequestContext) -> Operation<Flow> + Send + Sync + 'static,
{
    fn call(&self, ctx: RequestContext) -> Operation<Flow> {
        self(ctx)
    }
}

/// A middleware built from an async closure, see [`middleware_fn`].
pub struct MiddlewareFn<F> {
    f: F,
}

impl<F> fmt::Debug for MiddlewareFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareFn").finish_non_exhaustive()
    }
}

impl<F, Fut, Err> Middleware for MiddlewareFn<F>
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Flow, Err>> + Send + 'static,
    Err: Into<BoxError> + 'static,
{
    fn call(&self, ctx: RequestContext) -> Operation<Flow> {
        until((self.f)(ctx))
    }
}

/// Wraps an async closure as a [`Middleware`]; it is cancelled at any `.await` once the
/// request is torn down.
///
/// ```
/// use seasaw::middleware::{middleware_fn, Flow};
/// use seasaw::RequestContext;
///
/// let stamp = middleware_fn(|ctx: RequestContext| async move {
///     ctx.state().insert("seen", true);
///     Ok::<_, std::convert::Infallible>(Flow::Continue)
/// });
/// # let _ = stamp;
/// ```
pub fn middleware_fn<F, Fut, Err>(f: F) -> MiddlewareFn<F>
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Flow, Err>> + Send + 'static,
    Err: Into<BoxError> + 'static,
{
    MiddlewareFn { f }
}

/// The ordered global middleware of an application.
#[derive(Default, Clone)]
pub struct MiddlewareStack {
    entries: Vec<Arc<dyn Middleware>>,
}

impl fmt::Debug for MiddlewareStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareStack").field("len", &self.entries.len()).finish()
    }
}

impl MiddlewareStack {
    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.entries.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs every middleware against `ctx` as concurrent children of `scope`.
    ///
    /// All of them are started before any is awaited, and the call returns only once every one
    /// has settled. A failure does not cancel the siblings; once all have settled the first
    /// failure in registration order is returned. Without failures, the first
    /// [`Flow::Respond`] in registration order wins.
    pub async fn execute(&self, ctx: &RequestContext, scope: &Scope) -> Result<Flow, OperationError> {
        let tasks = self.entries.iter().map(|middleware| scope.spawn(middleware.call(ctx.clone()))).collect::<Vec<_>>();

        let mut flow = Flow::Continue;
        let mut failure = None;
        for (index, task) in tasks.into_iter().enumerate() {
            match task.join().await {
                Ok(Flow::Respond(response)) if matches!(flow, Flow::Continue) => {
                    debug!(index, "middleware answered the request");
                    flow = Flow::Respond(response);
                }
                Ok(_) => {}
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(flow),
        }
    }
}
