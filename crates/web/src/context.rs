//! Per-request state shared by middleware and handlers.
//!
//! This module contains:
//! - [`RequestContext`]: the raw request, its path parameters, a [`StateBag`], a
//!   [`ResponseAccumulator`] and, once validated, a typed body
//! - [`StateBag`]: a free-form, typed key/value store scoped to one request
//! - [`ResponseAccumulator`]: headers and a status override merged into the final response
//!
//! A context is created for every incoming request and dropped once the response has been
//! produced. Cloning it is cheap; all clones observe the same state, which is how concurrently
//! running middleware communicate.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use dashmap::DashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, Uri};
use seasaw_http::{PathParams, ResponseBody};
use serde::de::DeserializeOwned;

/// The context handed to middleware and handlers.
///
/// `B` is the typed request body. It is `()` until the validation pipeline has parsed and
/// checked the payload, at which point the handler receives a `RequestContext<T>`.
pub struct RequestContext<B = ()> {
    shared: Arc<Shared>,
    body: B,
}

struct Shared {
    request: Request<Bytes>,
    params: PathParams,
    state: StateBag,
    response: ResponseAccumulator,
}

impl RequestContext {
    /// Creates the context for `request`, taking the path parameters the route table stored in
    /// its extensions.
    pub fn new(mut request: Request<Bytes>) -> Self {
        let params = request.extensions_mut().remove::<PathParams>().unwrap_or_default();
        let shared = Shared { request, params, state: StateBag::default(), response: ResponseAccumulator::default() };
        Self { shared: Arc::new(shared), body: () }
    }
}

impl<B> RequestContext<B> {
    pub fn request(&self) -> &Request<Bytes> {
        &self.shared.request
    }

    pub fn method(&self) -> &Method {
        self.shared.request.method()
    }

    pub fn uri(&self) -> &Uri {
        self.shared.request.uri()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.shared.request.headers()
    }

    /// The buffered request body, as received.
    pub fn raw_body(&self) -> &Bytes {
        self.shared.request.body()
    }

    pub fn params(&self) -> &PathParams {
        &self.shared.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.shared.params.get(name)
    }

    /// Deserializes the query string; a request without one decodes from an empty string.
    pub fn query<T: DeserializeOwned>(&self) -> Result<T, serde_urlencoded::de::Error> {
        serde_urlencoded::from_str(self.uri().query().unwrap_or_default())
    }

    pub fn state(&self) -> &StateBag {
        &self.shared.state
    }

    pub fn response(&self) -> &ResponseAccumulator {
        &self.shared.response
    }

    pub fn body(&self) -> &B {
        &self.body
    }

    pub fn into_body(self) -> B {
        self.body
    }

    /// The same request, carrying `body` as its typed payload.
    pub fn with_body<T>(self, body: T) -> RequestContext<T> {
        RequestContext { shared: self.shared, body }
    }

    /// A context sharing this request's state but without a typed body.
    pub fn untyped(&self) -> RequestContext {
        RequestContext { shared: Arc::clone(&self.shared), body: () }
    }

    /// Merges the accumulated headers and status override into `response`.
    pub fn finish(&self, mut response: Response<ResponseBody>) -> Response<ResponseBody> {
        self.shared.response.apply_to(&mut response);
        response
    }
}

impl<B: Clone> Clone for RequestContext<B> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared), body: self.body.clone() }
    }
}

impl<B: fmt::Debug> fmt::Debug for RequestContext<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", self.method())
            .field("uri", self.uri())
            .field("params", self.params())
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

type StateValue = Arc<dyn Any + Send + Sync>;

/// String-keyed request state. Keys are not namespaced; the last write to a key wins.
#[derive(Default)]
pub struct StateBag {
    inner: DashMap<String, StateValue>,
}

impl StateBag {
    pub fn insert<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.inner.insert(key.into(), Arc::new(value));
    }

    /// Returns the value under `key` if it exists and has type `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = Arc::clone(self.inner.get(key)?.value());
        value.downcast::<T>().ok()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.inner.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for StateBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.inner.iter().map(|entry| entry.key().clone())).finish()
    }
}

/// Response headers and status collected while the request is handled.
///
/// Writes from concurrent middleware are serialized; for a given header name the last write
/// wins. When merged, accumulated headers replace same-named headers of the response and a
/// status override replaces its status.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    inner: Mutex<Accumulated>,
}

#[derive(Debug, Default, Clone)]
struct Accumulated {
    headers: HeaderMap,
    status: Option<StatusCode>,
}

impl ResponseAccumulator {
    pub fn insert_header(&self, name: HeaderName, value: HeaderValue) {
        self.lock().headers.insert(name, value);
    }

    pub fn set_status(&self, status: StatusCode) {
        self.lock().status = Some(status);
    }

    pub fn headers(&self) -> HeaderMap {
        self.lock().headers.clone()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.lock().status
    }

    fn apply_to(&self, response: &mut Response<ResponseBody>) {
        let accumulated = self.lock().clone();
        if let Some(status) = accumulated.status {
            *response.status_mut() = status;
        }
        let mut current = None;
        for (name, value) in accumulated.headers {
            // the iterator yields a name only for the first value of each header
            if let Some(name) = name {
                response.headers_mut().remove(&name);
                current = Some(name);
            }
            if let Some(name) = &current {
                response.headers_mut().append(name.clone(), value);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Accumulated> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
