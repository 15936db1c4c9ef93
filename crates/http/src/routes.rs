//! The route table handed to the server.
//!
//! A table maps a path pattern to a slot, and a slot is either a precomputed static response or
//! a set of handlers keyed by method. Patterns may capture segments with `:name` and end with a
//! `*name` catch-all; captured values reach the handler as [`PathParams`] in the request
//! extensions.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, Request, Response};
use matchit::Params;
use tracing::debug;

use crate::ResponseBody;
use crate::error::{BoxError, RouteError};
use crate::handler::{Handler, NotFound};

type InnerRouter<T> = matchit::Router<T>;

/// Named segments captured from the request path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    inner: Vec<(String, String)>,
}

impl PathParams {
    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn get(&self, key: impl AsRef<str>) -> Option<&str> {
        let key = key.as_ref();
        self.inner.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl From<Params<'_, '_>> for PathParams {
    fn from(params: Params<'_, '_>) -> Self {
        Self { inner: params.iter().map(|(k, v)| (k.to_owned(), v.to_owned())).collect() }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PathParams {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self { inner: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }
}

enum Slot {
    Static(Response<ResponseBody>),
    Methods(HashMap<Method, Arc<dyn Handler>>),
}

/// A built, immutable route table.
pub struct RouteTable {
    inner_router: InnerRouter<Slot>,
    fallback: Box<dyn Handler>,
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable").finish_non_exhaustive()
    }
}

impl RouteTable {
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::new()
    }

    /// Dispatches one request: a static entry, then the handler registered for the method,
    /// then the fallback.
    pub async fn handle(&self, mut req: Request<Bytes>) -> Result<Response<ResponseBody>, BoxError> {
        let path = req.uri().path().to_owned();

        if let Ok(matched) = self.inner_router.at(&path) {
            match matched.value {
                Slot::Static(response) if is_retrieval(req.method()) => return Ok(response.clone()),
                Slot::Static(_) => {}
                Slot::Methods(methods) => {
                    if let Some(handler) = methods.get(req.method()) {
                        req.extensions_mut().insert(PathParams::from(matched.params));
                        return handler.call(req).await;
                    }
                }
            }
        }

        debug!(method = %req.method(), path = %path, "no route matched, using fallback");
        self.fallback.call(req).await
    }
}

fn is_retrieval(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD
}

pub struct RouteTableBuilder {
    slots: BTreeMap<String, Slot>,
    fallback: Option<Box<dyn Handler>>,
}

impl fmt::Debug for RouteTableBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTableBuilder").field("paths", &self.slots.keys().collect::<Vec<_>>()).finish_non_exhaustive()
    }
}

impl RouteTableBuilder {
    fn new() -> Self {
        Self { slots: BTreeMap::new(), fallback: None }
    }

    /// Registers `handler` for `(path, method)`, replacing any earlier registration of the pair.
    #[must_use]
    pub fn insert(mut self, path: &str, method: Method, handler: impl Handler + 'static) -> Self {
        self.insert_arc(path, method, Arc::new(handler));
        self
    }

    pub fn insert_arc(&mut self, path: &str, method: Method, handler: Arc<dyn Handler>) {
        let slot = self.slots.entry(normalize_path(path)).or_insert_with(|| Slot::Methods(HashMap::new()));
        match slot {
            Slot::Methods(methods) => {
                methods.insert(method, handler);
            }
            Slot::Static(_) => *slot = Slot::Methods(HashMap::from([(method, handler)])),
        }
    }

    /// Installs a precomputed response in the slot for `path`, replacing whatever was there.
    ///
    /// The path is matched exactly; `:name` and `*name` segments are not captures here.
    #[must_use]
    pub fn insert_static(mut self, path: &str, response: Response<ResponseBody>) -> Self {
        self.slots.insert(literal_path(path), Slot::Static(response));
        self
    }

    #[must_use]
    pub fn fallback(mut self, handler: impl Handler + 'static) -> Self {
        self.fallback = Some(Box::new(handler));
        self
    }

    pub fn build(self) -> Result<RouteTable, RouteError> {
        let mut inner_router = InnerRouter::new();
        for (path, slot) in self.slots {
            inner_router.insert(path.as_str(), slot).map_err(|e| RouteError::insert(&path, e))?;
        }

        Ok(RouteTable { inner_router, fallback: self.fallback.unwrap_or_else(|| Box::new(NotFound)) })
    }
}

/// Rewrites `:name` and `*name` segments into the matcher's `{name}` and `{*name}` form.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{name}}}")
            } else if let Some(name) = segment.strip_prefix('*') {
                let name = if name.is_empty() { "wildcard" } else { name };
                format!("{{*{name}}}")
            } else {
                segment.to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Escapes the matcher's capture braces so `path` only ever matches itself.
fn literal_path(path: &str) -> String {
    path.replace('{', "{{").replace('}', "}}")
}
