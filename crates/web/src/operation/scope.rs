use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::BoxFuture;
use seasaw_http::BoxError;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::trace;

use super::Operation;

/// How an operation failed to produce a value.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("operation failed: {0}")]
    Failed(#[source] BoxError),

    #[error("operation was cancelled")]
    Cancelled,

    #[error("operation panicked: {0}")]
    Panicked(String),
}

impl OperationError {
    /// True when this error, or a failure wrapping it, came from cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Failed(e) => e.downcast_ref::<OperationError>().is_some_and(Self::is_cancelled),
            Self::Panicked(_) => false,
        }
    }
}

/// A lifetime boundary for a tree of tasks.
///
/// Cloning a scope yields another handle to the same boundary.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<Inner>,
}

struct Inner {
    token: CancellationToken,
    tracker: TaskTracker,
    cleanups: Mutex<Vec<BoxFuture<'static, ()>>>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("cancelled", &self.is_cancelled())
            .field("tasks", &self.inner.tracker.len())
            .finish()
    }
}

impl Scope {
    pub fn root() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// A scope that is cancelled whenever this one is.
    pub fn child(&self) -> Self {
        Self::with_token(self.inner.token.child_token())
    }

    fn with_token(token: CancellationToken) -> Self {
        Self { inner: Arc::new(Inner { token, tracker: TaskTracker::new(), cleanups: Mutex::new(Vec::new()) }) }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Resolves once this scope has been cancelled.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await;
    }

    /// Starts `operation` as a concurrent child and returns without waiting for it.
    pub fn spawn<T: Send + 'static>(&self, operation: Operation<T>) -> Task<T> {
        let scope = self.child();
        let handle = self.inner.tracker.spawn(scope.clone().drive(operation));
        Task { scope, handle }
    }

    /// Starts `operation` as a child and waits for it to settle.
    pub async fn run<T: Send + 'static>(&self, operation: Operation<T>) -> Result<T, OperationError> {
        self.spawn(operation).join().await
    }

    /// Registers a cleanup to run when this scope is closed, after every child has unwound.
    /// Cleanups run in reverse registration order.
    pub fn defer<F>(&self, cleanup: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cleanups().push(cleanup.boxed());
    }

    /// Cancels every descendant, waits for all of them to unwind, then runs deferred cleanups.
    pub async fn close(&self) {
        self.inner.token.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;

        let cleanups = std::mem::take(&mut *self.cleanups());
        for cleanup in cleanups.into_iter().rev() {
            cleanup.await;
        }
    }

    fn cleanups(&self) -> MutexGuard<'_, Vec<BoxFuture<'static, ()>>> {
        self.inner.cleanups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn drive<T: Send + 'static>(self, operation: Operation<T>) -> Result<T, OperationError> {
        let scope = self.clone();
        let future = AssertUnwindSafe(async move { operation.enter(scope).await }).catch_unwind();

        let result = tokio::select! {
            biased;
            () = self.inner.token.cancelled() => Err(OperationError::Cancelled),
            settled = future => match settled {
                Ok(result) => result.map_err(OperationError::Failed),
                Err(panic) => Err(OperationError::Panicked(panic_message(panic.as_ref()))),
            },
        };

        // children never outlive the operation that spawned them
        self.close().await;
        trace!(cancelled = matches!(result, Err(OperationError::Cancelled)), "operation settled");
        result
    }
}

/// A handle to a spawned operation.
#[derive(Debug)]
pub struct Task<T> {
    scope: Scope,
    handle: JoinHandle<Result<T, OperationError>>,
}

impl<T> Task<T> {
    /// Waits for the task to settle.
    pub async fn join(self) -> Result<T, OperationError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(OperationError::Panicked(panic_message(e.into_panic().as_ref()))),
            Err(_) => Err(OperationError::Cancelled),
        }
    }

    /// Cancels the task. It unwinds at its next suspension point.
    pub fn halt(&self) {
        self.scope.inner.token.cancel();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}
