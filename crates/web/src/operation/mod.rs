//! Cancellable units of structured-concurrency work.
//!
//! An [`Operation`] is a deferred computation that only starts once it is handed to a
//! [`Scope`], either with [`Scope::run`] (start and wait) or [`Scope::spawn`] (start as a
//! concurrent child and return a [`Task`]). Every operation receives the child scope it runs
//! in, so it can spawn children of its own; those children never outlive it.
//!
//! Cancellation is cooperative. Tearing a scope down cancels every descendant at its next
//! suspension point (any `.await`), waits for all of them to unwind, and then runs the cleanups
//! registered with [`Scope::defer`].
//!
//! ```
//! use seasaw::operation::{Operation, Scope};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let root = Scope::root();
//! let answer = root
//!     .run(Operation::new(|scope| async move {
//!         let child = scope.spawn(Operation::ready(21));
//!         Ok::<_, seasaw::BoxError>(child.join().await? * 2)
//!     }))
//!     .await;
//!
//! assert_eq!(answer.unwrap(), 42);
//! root.close().await;
//! # }
//! ```

mod scope;

use std::convert::Infallible;
use std::fmt;
use std::future::{self, Future};

use futures::future::BoxFuture;
use futures::{FutureExt, TryFutureExt};
use seasaw_http::BoxError;

pub use scope::{OperationError, Scope, Task};

type Body<T> = Box<dyn FnOnce(Scope) -> BoxFuture<'static, Result<T, BoxError>> + Send>;

/// A suspendable computation producing `T`, started by a [`Scope`].
pub struct Operation<T> {
    body: Body<T>,
}

impl<T: Send + 'static> Operation<T> {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Scope) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        Self { body: Box::new(move |scope| f(scope).boxed()) }
    }

    /// An operation that settles immediately with `value`.
    pub fn ready(value: T) -> Self {
        Self::new(move |_| future::ready(Ok(value)))
    }

    /// An operation that settles immediately with `error`.
    pub fn fail(error: impl Into<BoxError>) -> Self {
        let error = error.into();
        Self::new(move |_| future::ready(Err(error)))
    }

    pub(crate) fn enter(self, scope: Scope) -> BoxFuture<'static, Result<T, BoxError>> {
        (self.body)(scope)
    }
}

impl<T> fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation").finish_non_exhaustive()
    }
}

/// Lifts an already-running future into an operation that settles when the future does.
pub fn until<T, E, Fut>(future: Fut) -> Operation<T>
where
    T: Send + 'static,
    E: Into<BoxError> + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    Operation::new(move |_| future.map_err(Into::into))
}

/// Parks the caller forever. The only way out is the cancellation of an enclosing scope.
pub async fn suspend() -> Infallible {
    future::pending().await
}
