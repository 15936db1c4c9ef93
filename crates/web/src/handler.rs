//! Route handlers and the shapes of what they return.
//!
//! A handler may answer right away, hand back a future, or hand back an [`Operation`]. All
//! three are captured by [`Reply`], and [`Reply::resolve`] turns any of them into a settled
//! response under the scope of the running request.

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use futures::{FutureExt, TryFutureExt};
use http::Response;
use seasaw_http::{BoxError, ResponseBody};

use crate::context::RequestContext;
use crate::operation::{Operation, OperationError, Scope, until};

/// Serves a matched request.
///
/// `B` is the typed body the handler expects, `()` unless the route validates its body.
/// Any `Fn(RequestContext<B>) -> R` where `R: IntoReply` is a handler.
pub trait Handler<B = ()>: Send + Sync + 'static {
    fn call(&self, ctx: RequestContext<B>) -> Reply;
}

impl<B, F, R> Handler<B> for F
where
    F: Fn(RequestContext<B>) -> R + Send + Sync + 'static,
    R: IntoReply,
{
    fn call(&self, ctx: RequestContext<B>) -> Reply {
        self(ctx).into_reply()
    }
}

/// A handler result, in one of the three shapes a handler may produce.
pub enum Reply {
    Immediate(Response<ResponseBody>),
    Deferred(BoxFuture<'static, Result<Response<ResponseBody>, BoxError>>),
    Suspendable(Operation<Response<ResponseBody>>),
}

impl Reply {
    pub fn deferred<F, E>(future: F) -> Self
    where
        F: Future<Output = Result<Response<ResponseBody>, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::Deferred(future.map_err(Into::into).boxed())
    }

    /// Settles the reply. Immediate responses are used as they are; the other shapes run to
    /// completion as children of `scope`.
    pub async fn resolve(self, scope: &Scope) -> Result<Response<ResponseBody>, OperationError> {
        match self {
            Self::Immediate(response) => Ok(response),
            Self::Deferred(future) => scope.run(until(future)).await,
            Self::Suspendable(operation) => scope.run(operation).await,
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate(response) => f.debug_tuple("Immediate").field(&response.status()).finish(),
            Self::Deferred(_) => f.write_str("Deferred"),
            Self::Suspendable(_) => f.write_str("Suspendable"),
        }
    }
}

pub trait IntoReply {
    fn into_reply(self) -> Reply;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Reply {
        self
    }
}

impl IntoReply for Response<ResponseBody> {
    fn into_reply(self) -> Reply {
        Reply::Immediate(self)
    }
}

impl IntoReply for Operation<Response<ResponseBody>> {
    fn into_reply(self) -> Reply {
        Reply::Suspendable(self)
    }
}
