//! A route and middleware registry whose request handling runs as cancellable, structured
//! operations.
//!
//! An [`App`] collects static responses, routes and global middleware. Once it listens, every
//! matched request becomes a child task of the application's root
//! [`Scope`](operation::Scope): middleware run concurrently against a shared
//! [`RequestContext`], an optional body schema guards the handler, and whatever the handler
//! returns (a response, a future or an [`Operation`](operation::Operation)) is settled under
//! the same task. Shutting down cancels all of it before the server stops.
//!
//! ```no_run
//! use seasaw::validation::JsonSchema;
//! use seasaw::{response, App, RequestContext, RouteOptions};
//!
//! #[derive(serde::Deserialize)]
//! struct Login {
//!     email: String,
//!     password: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), seasaw::StartError> {
//!     App::new()
//!         .get("/", |_ctx: RequestContext| response::json(&"Hello World!"))
//!         .post_with(
//!             "/login",
//!             |ctx: RequestContext<Login>| response::json(&ctx.body().email),
//!             RouteOptions::new().body(JsonSchema::<Login>::new()),
//!         )
//!         .start(|_| {})
//!         .await
//! }
//! ```

mod app;
mod context;
mod error;
mod options;

pub mod handler;
pub mod middleware;
pub mod operation;
pub mod validation;

pub use app::{App, AppService, BodySpec, Route, RouteOptions, Running, Unvalidated, ValidatedBody};
pub use context::{RequestContext, ResponseAccumulator, StateBag};
pub use error::StartError;
pub use handler::{Handler, IntoReply, Reply};
pub use middleware::{Flow, Middleware, middleware_fn};
pub use options::AppOptions;
pub use seasaw_http::{BoxError, PathParams, ResponseBody, response};
