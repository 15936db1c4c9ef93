//! The application: a registry of routes, static responses and middleware, and the glue that
//! binds it to the HTTP server.
//!
//! Registration consumes and returns the [`App`], so an application reads as one builder chain.
//! Nothing is checked while registering; the route table is built when the application is turned
//! into a service or starts listening, and a conflicting pattern is reported then.
//!
//! Every matched request is dispatched as a child task of the application's root [`Scope`]:
//! global middleware first, then the route's `before` hook, then the handler, whose [`Reply`] is
//! settled under the same task. Shutting down closes the root scope, which cancels every
//! in-flight request before the server itself is stopped.

use std::convert::Infallible;
use std::fmt;
use std::future;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, Request, Response};
use seasaw_http::handler::make_handler;
use seasaw_http::{BoxError, Cancelled, ResponseBody, RouteError, RouteTable, Server, ServerConfig, ServerHandle, response};
use tracing::{Level, debug, error, info};
use tracing_subscriber::FmtSubscriber;

use crate::context::RequestContext;
use crate::error::StartError;
use crate::handler::{Handler, Reply};
use crate::middleware::{Flow, Middleware, MiddlewareStack};
use crate::operation::{Operation, OperationError, Scope, suspend};
use crate::options::AppOptions;
use crate::validation::{Schema, validate};

/// A registered route.
#[derive(Clone)]
pub struct Route {
    method: Method,
    path: String,
    handler: Arc<dyn Handler>,
    before: Option<Arc<dyn Middleware>>,
}

impl Route {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn mounted(self, prefix: &str) -> Self {
        Self { path: format!("{prefix}{}", self.path), ..self }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("before", &self.before.is_some())
            .finish_non_exhaustive()
    }
}

/// Per-route settings: an optional body schema and an optional `before` hook.
///
/// ```
/// use seasaw::validation::JsonSchema;
/// use seasaw::RouteOptions;
///
/// #[derive(serde::Deserialize)]
/// struct Login {
///     email: String,
/// }
///
/// let options = RouteOptions::new().body(JsonSchema::<Login>::new());
/// # let _ = options;
/// ```
pub struct RouteOptions<V = Unvalidated> {
    body: V,
    before: Option<Arc<dyn Middleware>>,
}

impl RouteOptions {
    pub fn new() -> Self {
        Self { body: Unvalidated, before: None }
    }
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> RouteOptions<V> {
    /// Validates the request body with `schema` before the handler runs.
    pub fn body<S, T>(self, schema: S) -> RouteOptions<ValidatedBody<S, T>>
    where
        S: Schema<T>,
    {
        RouteOptions { body: ValidatedBody { schema, _body: PhantomData }, before: self.before }
    }

    /// Runs `middleware` after the global middleware and before the handler. Answering with
    /// [`Flow::Respond`] skips the handler.
    #[must_use]
    pub fn before(mut self, middleware: impl Middleware) -> Self {
        self.before = Some(Arc::new(middleware));
        self
    }
}

impl<V> fmt::Debug for RouteOptions<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteOptions")
            .field("body", &std::any::type_name::<V>())
            .field("before", &self.before.is_some())
            .finish()
    }
}

/// The route takes the request body as it is.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unvalidated;

/// The route validates its body with `S`, producing a `T`.
pub struct ValidatedBody<S, T> {
    schema: S,
    _body: PhantomData<fn() -> T>,
}

/// How a route's body is prepared for its handler.
pub trait BodySpec {
    /// What the handler finds in [`RequestContext::body`].
    type Body: Send + 'static;

    fn wrap<H: Handler<Self::Body>>(self, handler: H) -> Arc<dyn Handler>;
}

impl BodySpec for Unvalidated {
    type Body = ();

    fn wrap<H: Handler>(self, handler: H) -> Arc<dyn Handler> {
        Arc::new(handler)
    }
}

impl<S, T> BodySpec for ValidatedBody<S, T>
where
    S: Schema<T>,
    T: Send + 'static,
{
    type Body = T;

    fn wrap<H: Handler<T>>(self, handler: H) -> Arc<dyn Handler> {
        Arc::new(validate(self.schema, handler))
    }
}

macro_rules! method_routes {
    ($($name:ident, $name_with:ident => $method:ident;)*) => {
        $(
            #[doc = concat!("Registers `handler` for `", stringify!($method), " path`.")]
            #[must_use]
            pub fn $name<H: Handler>(self, path: &str, handler: H) -> Self {
                self.route(Method::$method, path, handler)
            }

            #[doc = concat!("Registers `handler` for `", stringify!($method), " path` with per-route options.")]
            #[must_use]
            pub fn $name_with<V, H>(self, path: &str, handler: H, options: RouteOptions<V>) -> Self
            where
                V: BodySpec,
                H: Handler<V::Body>,
            {
                self.route_with(Method::$method, path, handler, options)
            }
        )*
    };
}

const CUSTOM_METHOD: &[u8] = b"CUSTOM";

/// An application under construction.
///
/// ```no_run
/// use seasaw::{response, App, AppOptions, RequestContext};
///
/// #[tokio::main]
/// async fn main() -> Result<(), seasaw::StartError> {
///     App::with_options(AppOptions::default().port(8080))
///         .get("/", |_ctx: RequestContext| response::json(&"Hello World!"))
///         .get("/users/:id", |ctx: RequestContext| response::json(&ctx.param("id")))
///         .start(|running| println!("listening on {}", running.local_addr()))
///         .await
/// }
/// ```
#[derive(Default)]
pub struct App {
    options: AppOptions,
    statics: Vec<(String, Response<ResponseBody>)>,
    routes: Vec<Route>,
    middleware: MiddlewareStack,
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("options", &self.options)
            .field("statics", &self.statics.iter().map(|(path, _)| path).collect::<Vec<_>>())
            .field("routes", &self.routes)
            .field("middleware", &self.middleware)
            .finish()
    }
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: AppOptions) -> Self {
        Self { options, ..Self::default() }
    }

    pub fn options(&self) -> &AppOptions {
        &self.options
    }

    /// Every registered route, in registration order. A `(method, path)` pair registered twice
    /// appears twice; the later entry is the one served.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Serves `response` for `GET` and `HEAD` requests to exactly `path`, ahead of any route
    /// registered on the same path.
    #[must_use]
    pub fn static_response(mut self, path: &str, response: Response<ResponseBody>) -> Self {
        self.statics.push((path.to_owned(), response));
        self
    }

    method_routes! {
        get, get_with => GET;
        post, post_with => POST;
        put, put_with => PUT;
        patch, patch_with => PATCH;
        delete, delete_with => DELETE;
    }

    /// Registers `handler` for the extension method `CUSTOM`.
    #[must_use]
    pub fn custom<H: Handler>(self, path: &str, handler: H) -> Self {
        self.route(custom_method(), path, handler)
    }

    #[must_use]
    pub fn custom_with<V, H>(self, path: &str, handler: H, options: RouteOptions<V>) -> Self
    where
        V: BodySpec,
        H: Handler<V::Body>,
    {
        self.route_with(custom_method(), path, handler, options)
    }

    #[must_use]
    pub fn route<H: Handler>(self, method: Method, path: &str, handler: H) -> Self {
        self.route_with(method, path, handler, RouteOptions::new())
    }

    #[must_use]
    pub fn route_with<V, H>(mut self, method: Method, path: &str, handler: H, options: RouteOptions<V>) -> Self
    where
        V: BodySpec,
        H: Handler<V::Body>,
    {
        let RouteOptions { body, before } = options;
        self.routes.push(Route { method, path: path.to_owned(), handler: body.wrap(handler), before });
        self
    }

    /// Appends a global middleware. Middleware start in registration order and run
    /// concurrently.
    #[must_use]
    pub fn use_middleware(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Merges the routes of `router`, each mounted under the router's own prefix.
    ///
    /// Only routes are merged; the router's middleware and static responses stay behind.
    #[must_use]
    pub fn group(self, router: App) -> Self {
        self.group_at("", router)
    }

    /// Like [`App::group`], with `prefix` placed in front of the router's own prefix.
    #[must_use]
    pub fn group_at(mut self, prefix: &str, router: App) -> Self {
        let mount = format!("{prefix}{}", router.options.prefix);
        self.routes = merge(self.routes, &mount, router.routes);
        self
    }

    /// Builds the route table and returns a service answering requests in-process.
    pub fn into_service(self) -> Result<AppService, StartError> {
        let root = Scope::root();
        let table = self.route_table(&root)?;
        Ok(AppService { root, table: Arc::new(table) })
    }

    /// Builds the route table and starts accepting connections on the configured address.
    pub async fn listen(self) -> Result<Running, StartError> {
        let config = ServerConfig { hostname: self.options.hostname.clone(), port: self.options.port, ..ServerConfig::default() };
        let root = Scope::root();
        let table = self.route_table(&root)?;

        let server = Server::builder().config(config).routes(table).build()?.bind().await?;
        Ok(Running { root, server })
    }

    /// Starts listening, calls `callback`, and serves until Ctrl-C or `SIGTERM`, then shuts
    /// down.
    ///
    /// A log subscriber at the configured `log_level` is installed unless one is already set.
    pub async fn start<F>(self, callback: F) -> Result<(), StartError>
    where
        F: FnOnce(&Running),
    {
        init_tracing(&self.options.log_level);

        let running = self.listen().await?;
        callback(&running);

        tokio::select! {
            () = running.park() => {}
            () = shutdown_signal() => info!("shutdown signal received"),
        }

        running.shutdown().await;
        Ok(())
    }

    fn route_table(&self, root: &Scope) -> Result<RouteTable, RouteError> {
        let middleware = Arc::new(self.middleware.clone());

        let mut builder = RouteTable::builder();
        for route in &self.routes {
            let (path, method) = (route.path.clone(), route.method.clone());
            let route = Arc::new(route.clone());
            let root = root.clone();
            let middleware = Arc::clone(&middleware);
            let handler = make_handler(move |req: Request<Bytes>| {
                dispatch(root.clone(), Arc::clone(&middleware), Arc::clone(&route), req)
            });
            builder.insert_arc(&path, method, Arc::new(handler));
        }

        // statics replace the whole slot, so they go in last
        self.statics
            .iter()
            .fold(builder, |builder, (path, response)| builder.insert_static(path, response.clone()))
            .build()
    }
}

fn custom_method() -> Method {
    // an upper-case token is always a valid extension method
    Method::from_bytes(CUSTOM_METHOD).unwrap_or_default()
}

fn merge(mut routes: Vec<Route>, mount: &str, grouped: Vec<Route>) -> Vec<Route> {
    routes.extend(grouped.into_iter().map(|route| route.mounted(mount)));
    routes
}

async fn dispatch(
    root: Scope,
    middleware: Arc<MiddlewareStack>,
    route: Arc<Route>,
    req: Request<Bytes>,
) -> Result<Response<ResponseBody>, BoxError> {
    let ctx = RequestContext::new(req);
    let method = ctx.method().clone();
    let path = ctx.uri().path().to_owned();
    debug!(method = %method, path = %path, "dispatch request");

    let outcome = root
        .run(Operation::new(move |scope| async move { respond(&scope, &middleware, &route, ctx).await.map_err(BoxError::from) }))
        .await;

    match outcome {
        Ok(response) => Ok(response),
        // a cancelled child surfaced through `?` is a handler fault, not a torn down request
        Err(e) if matches!(e, OperationError::Cancelled) || root.is_cancelled() => {
            debug!(method = %method, path = %path, "request cancelled");
            Err(Cancelled.into())
        }
        Err(e) => {
            error!(method = %method, path = %path, cause = %e, "request handler failed");
            Ok(response::internal_error())
        }
    }
}

async fn respond(
    scope: &Scope,
    middleware: &MiddlewareStack,
    route: &Route,
    ctx: RequestContext,
) -> Result<Response<ResponseBody>, OperationError> {
    if let Flow::Respond(response) = middleware.execute(&ctx, scope).await? {
        return Ok(ctx.finish(response));
    }

    if let Some(before) = &route.before {
        if let Flow::Respond(response) = scope.run(before.call(ctx.clone())).await? {
            return Ok(ctx.finish(response));
        }
    }

    let reply: Reply = route.handler.call(ctx.clone());
    let response = reply.resolve(scope).await?;
    Ok(ctx.finish(response))
}

/// A built application answering requests without a socket.
#[derive(Clone)]
pub struct AppService {
    root: Scope,
    table: Arc<RouteTable>,
}

impl fmt::Debug for AppService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppService").field("root", &self.root).finish_non_exhaustive()
    }
}

impl AppService {
    /// Dispatches one request. An error means the request was cancelled by shutdown and
    /// produced no response.
    pub async fn handle(&self, req: Request<Bytes>) -> Result<Response<ResponseBody>, BoxError> {
        self.table.handle(req).await
    }

    /// Cancels every in-flight request and waits for them to unwind.
    pub async fn shutdown(&self) {
        self.root.close().await;
    }
}

/// A listening application.
#[derive(Debug)]
pub struct Running {
    root: Scope,
    server: ServerHandle,
}

impl Running {
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn hostname(&self) -> String {
        self.server.hostname()
    }

    pub fn port(&self) -> u16 {
        self.server.port()
    }

    /// Suspends until the application is shut down.
    pub async fn park(&self) {
        let _ = self.root.run(Operation::new(|_| parked())).await;
    }

    /// Cancels every in-flight request, waits for them to unwind, then stops the server.
    pub async fn shutdown(self) {
        info!(address = %self.server.local_addr(), "shutting down");
        self.root.close().await;
        self.server.stop().await;
    }
}

async fn parked() -> Result<Infallible, BoxError> {
    match suspend().await {}
}

fn init_tracing(log_level: &str) {
    let level = log_level.parse::<Level>().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        debug!("global tracing subscriber already set");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(cause = %e, "failed to install ctrl-c handler");
            future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(cause = %e, "failed to install SIGTERM handler");
                future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
