//! Request body validation placed in front of a handler.
//!
//! [`validate`] wraps a handler expecting a `RequestContext<T>` into one accepting the raw
//! request. The wrapper parses the body as JSON, runs it through a [`Schema`], and only then
//! calls the inner handler with the typed value attached. Anything that fails along the way
//! is answered with `400` and never reaches the handler.

use std::fmt;
use std::marker::PhantomData;

use seasaw_http::response;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::error;

use crate::context::RequestContext;
use crate::handler::{Handler, Reply};

/// Code reported when the request body is not JSON.
pub const INVALID_JSON_CODE: &str = "E000400";

/// Why a payload was rejected by a schema.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{summary}")]
pub struct ValidationErrors {
    summary: String,
}

impl ValidationErrors {
    pub fn new(summary: impl Into<String>) -> Self {
        Self { summary: summary.into() }
    }

    /// Human readable description of every problem found.
    pub fn summary(&self) -> &str {
        &self.summary
    }
}

/// Turns an untyped JSON payload into `T`, or explains why it can't.
pub trait Schema<T>: Send + Sync + 'static {
    fn validate(&self, input: Value) -> Result<T, ValidationErrors>;
}

impl<T, F> Schema<T> for F
where
    F: Fn(Value) -> Result<T, ValidationErrors> + Send + Sync + 'static,
{
    fn validate(&self, input: Value) -> Result<T, ValidationErrors> {
        self(input)
    }
}

/// A schema that accepts whatever deserializes into `T`.
pub struct JsonSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSchema<T> {
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T> Default for JsonSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSchema").field("target", &std::any::type_name::<T>()).finish()
    }
}

impl<T: DeserializeOwned + 'static> Schema<T> for JsonSchema<T> {
    fn validate(&self, input: Value) -> Result<T, ValidationErrors> {
        serde_json::from_value(input).map_err(|e| ValidationErrors::new(e.to_string()))
    }
}

/// A handler guarded by a body schema, see [`validate`].
pub struct Validated<S, T, H> {
    schema: S,
    handler: H,
    _body: PhantomData<fn() -> T>,
}

impl<S, T, H> fmt::Debug for Validated<S, T, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validated").field("body", &std::any::type_name::<T>()).finish_non_exhaustive()
    }
}

/// Guards `handler` with `schema`.
///
/// ```
/// use seasaw::handler::Handler;
/// use seasaw::validation::{validate, JsonSchema};
/// use seasaw::{response, RequestContext};
///
/// #[derive(serde::Deserialize)]
/// struct Login {
///     email: String,
/// }
///
/// let login = validate(JsonSchema::<Login>::new(), |ctx: RequestContext<Login>| {
///     response::json(&ctx.body().email)
/// });
/// # fn assert_handler(_: &impl Handler) {}
/// # assert_handler(&login);
/// ```
pub fn validate<S, T, H>(schema: S, handler: H) -> Validated<S, T, H>
where
    S: Schema<T>,
    H: Handler<T>,
    T: Send + 'static,
{
    Validated { schema, handler, _body: PhantomData }
}

impl<S, T, H> Handler for Validated<S, T, H>
where
    S: Schema<T>,
    H: Handler<T>,
    T: Send + 'static,
{
    fn call(&self, ctx: RequestContext) -> Reply {
        let input = match serde_json::from_slice::<Value>(ctx.raw_body()) {
            Ok(input) => input,
            Err(e) => {
                error!(url = %ctx.uri(), method = %ctx.method(), cause = %e, "{}-{} parsed body failed", ctx.uri(), ctx.method());
                return Reply::Immediate(response::bad_request(&json!({
                    "message": "Invalid JSON in request body",
                    "code": INVALID_JSON_CODE,
                })));
            }
        };

        match self.schema.validate(input) {
            Ok(body) => self.handler.call(ctx.with_body(body)),
            Err(errors) => {
                error!(url = %ctx.uri(), method = %ctx.method(), summary = errors.summary(), "request body rejected by schema");
                Reply::Immediate(response::bad_request(&json!({ "message": errors.summary() })))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Scope;
    use bytes::Bytes;
    use http::{Request, Response, StatusCode};
    use mockall::mock;
    use seasaw_http::ResponseBody;
    use serde::Deserialize;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    struct Credentials {
        email: String,
        password: String,
    }

    mock! {
        CredentialSchema {}

        impl Schema<Credentials> for CredentialSchema {
            fn validate(&self, input: Value) -> Result<Credentials, ValidationErrors>;
        }
    }

    fn credentials(input: Value) -> Result<Credentials, ValidationErrors> {
        let credentials: Credentials = serde_json::from_value(input).map_err(|e| ValidationErrors::new(e.to_string()))?;
        if credentials.email.contains('@') { Ok(credentials) } else { Err(ValidationErrors::new("email: must be an email address")) }
    }

    fn context(body: &'static str) -> RequestContext {
        RequestContext::new(Request::post("/login").body(Bytes::from_static(body.as_bytes())).unwrap())
    }

    fn login(calls: &Arc<AtomicUsize>) -> impl Handler<Credentials> + use<> {
        let calls = Arc::clone(calls);
        move |ctx: RequestContext<Credentials>| {
            calls.fetch_add(1, Ordering::SeqCst);
            response::json(&ctx.body().email)
        }
    }

    async fn respond(handler: &dyn Handler, body: &'static str) -> (StatusCode, Value) {
        let response: Response<ResponseBody> = handler.call(context(body)).resolve(&Scope::root()).await.unwrap();
        let status = response.status();
        (status, serde_json::from_slice(&response.into_body().into_bytes()).unwrap())
    }

    #[tokio::test]
    async fn valid_body_reaches_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = validate(credentials, login(&calls));

        let (status, body) = respond(&handler, r#"{"email":"a@b.com","password":"x"}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!("a@b.com"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn schema_rejection_skips_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = validate(credentials, login(&calls));

        let (status, body) = respond(&handler, r#"{"email":"not-an-email","password":"x"}"#).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "email: must be an email address");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_field_is_a_schema_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = validate(JsonSchema::<Credentials>::new(), login(&calls));

        let (status, body) = respond(&handler, r#"{"email":"not-an-email"}"#).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().is_some_and(|message| message.contains("password")));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_json_never_reaches_schema() {
        let mut schema = MockCredentialSchema::new();
        schema.expect_validate().never();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = validate(schema, login(&calls));

        let (status, body) = respond(&handler, "email=a@b.com").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "message": "Invalid JSON in request body", "code": "E000400" }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn schema_sees_parsed_payload() {
        let mut schema = MockCredentialSchema::new();
        schema
            .expect_validate()
            .withf(|input| input["email"] == "a@b.com")
            .times(1)
            .returning(|input| Ok(serde_json::from_value(input).unwrap()));
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = validate(schema, login(&calls));

        let (status, _) = respond(&handler, r#"{"email":"a@b.com","password":"x"}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
