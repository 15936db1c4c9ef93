use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;

use http::{Request, Response, StatusCode};

use crate::body::ResponseBody;
use crate::error::BoxError;
use crate::response;

/// A leaf of the route table: turns one buffered request into a response.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, req: Request<Bytes>) -> Result<Response<ResponseBody>, BoxError>;
}

#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<Err, F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync,
    Err: Into<BoxError>,
    Fut: Future<Output = Result<Response<ResponseBody>, Err>> + Send,
{
    async fn call(&self, req: Request<Bytes>) -> Result<Response<ResponseBody>, BoxError> {
        (self.f)(req).await.map_err(Into::into)
    }
}

pub fn make_handler<F, Err, Ret>(f: F) -> HandlerFn<F>
where
    Err: Into<BoxError>,
    Ret: Future<Output = Result<Response<ResponseBody>, Err>>,
    F: Fn(Request<Bytes>) -> Ret,
{
    HandlerFn { f }
}

/// The default fallback: `404` with the JSON string `"Not Found"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFound;

#[async_trait]
impl Handler for NotFound {
    async fn call(&self, _req: Request<Bytes>) -> Result<Response<ResponseBody>, BoxError> {
        Ok(response::json_with_status(StatusCode::NOT_FOUND, &"Not Found"))
    }
}
