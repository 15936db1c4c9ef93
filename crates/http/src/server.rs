//! Binds a [`RouteTable`] to a TCP listener.
//!
//! The wire protocol is handled by `hyper`'s HTTP/1 connection; this module owns the accept
//! loop, buffers request bodies up to [`ServerConfig::max_body_size`], and coordinates a
//! graceful stop: the listener is dropped first, then open connections get
//! [`ServerConfig::shutdown_timeout`] to finish.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{BoxError, ServerError};
use crate::routes::RouteTable;
use crate::{ResponseBody, response};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub hostname: String,
    pub port: u16,
    /// Requests with a larger body are answered with `413`.
    pub max_body_size: usize,
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { hostname: "0.0.0.0".into(), port: 3000, max_body_size: 16 * 1024 * 1024, shutdown_timeout: Duration::from_secs(10) }
    }
}

#[derive(Debug)]
pub struct ServerBuilder {
    config: ServerConfig,
    routes: Option<RouteTable>,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { config: ServerConfig::default(), routes: None }
    }

    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn routes(mut self, routes: RouteTable) -> Self {
        self.routes = Some(routes);
        self
    }

    pub fn build(self) -> Result<Server, ServerBuildError> {
        let routes = self.routes.ok_or(ServerBuildError::MissingRoutes)?;
        Ok(Server { config: self.config, routes: Arc::new(routes) })
    }
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("route table must be set")]
    MissingRoutes,
}

#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    routes: Arc<RouteTable>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Binds the listener and starts accepting connections in the background.
    pub async fn bind(self) -> Result<ServerHandle, ServerError> {
        let address = format!("{}:{}", self.config.hostname, self.config.port);
        let tcp_listener = TcpListener::bind(address.as_str()).await.map_err(|e| ServerError::bind(&address, e))?;
        let local_addr = tcp_listener.local_addr()?;
        info!(address = %local_addr, "start listening");

        let shutdown = CancellationToken::new();
        let accept_loop = tokio::spawn(accept_loop(tcp_listener, self.routes, self.config, shutdown.clone()));

        Ok(ServerHandle { local_addr, shutdown, accept_loop })
    }
}

/// A running server.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    accept_loop: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn hostname(&self) -> String {
        self.local_addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stops accepting connections and resolves once open connections have drained or the
    /// shutdown timeout elapsed.
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.accept_loop.await {
            error!(cause = %e, "accept loop terminated abnormally");
        }
        info!(address = %self.local_addr, "server stopped");
    }
}

async fn accept_loop(tcp_listener: TcpListener, routes: Arc<RouteTable>, config: ServerConfig, shutdown: CancellationToken) {
    let graceful = GracefulShutdown::new();
    let builder = http1::Builder::new();

    loop {
        let (tcp_stream, remote_addr) = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = tcp_listener.accept() => match accepted {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            },
        };

        let routes = Arc::clone(&routes);
        let max_body_size = config.max_body_size;
        let service = service_fn(move |req: Request<Incoming>| {
            let routes = Arc::clone(&routes);
            async move { serve_request(&routes, req, max_body_size).await }
        });

        let connection = graceful.watch(builder.serve_connection(TokioIo::new(tcp_stream), service));
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(cause = %e, remote = %remote_addr, "connection closed with error");
            }
        });
    }

    drop(tcp_listener);
    info!("stop accepting, waiting for open connections");

    tokio::select! {
        () = graceful.shutdown() => info!("all connections closed"),
        () = tokio::time::sleep(config.shutdown_timeout) => warn!(timeout = ?config.shutdown_timeout, "connections still open after shutdown timeout"),
    }
}

/// A handler failure on its way back to hyper, which closes the connection without a response.
#[derive(Debug, Error)]
#[error("{0}")]
struct Unanswered(BoxError);

async fn serve_request(routes: &RouteTable, req: Request<Incoming>, max_body_size: usize) -> Result<Response<ResponseBody>, Unanswered> {
    let (parts, body) = req.into_parts();

    let bytes = match Limited::new(body, max_body_size).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            warn!(method = %parts.method, path = parts.uri.path(), limit = max_body_size, "request body too large");
            return Ok(response::empty(StatusCode::PAYLOAD_TOO_LARGE));
        }
        Err(e) => {
            warn!(cause = %e, method = %parts.method, path = parts.uri.path(), "read request body error");
            return Ok(response::empty(StatusCode::BAD_REQUEST));
        }
    };

    routes.handle(Request::from_parts(parts, bytes)).await.map_err(Unanswered)
}
