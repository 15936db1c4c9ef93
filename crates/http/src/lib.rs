//! The HTTP layer underneath `seasaw`.
//!
//! This crate is the collaborator the dispatch engine is layered on. It knows nothing about
//! middleware, request contexts or operations; it only:
//!
//! - builds a [`RouteTable`] keyed by path pattern and then by method,
//! - answers unmatched requests through a fallback (`404` with JSON `"Not Found"` by default),
//! - buffers request bodies and hands each route a `Request<Bytes>`,
//! - binds the table to a TCP listener through `hyper` and stops it gracefully.
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use http::{Method, Request};
//! use seasaw_http::handler::make_handler;
//! use seasaw_http::{response, BoxError, RouteTable, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let routes = RouteTable::builder()
//!         .insert("/", Method::GET, make_handler(|_req: Request<Bytes>| async {
//!             Ok::<_, BoxError>(response::json(&"Hello World!"))
//!         }))
//!         .build()?;
//!
//!     let server = Server::builder()
//!         .config(ServerConfig { port: 8080, ..ServerConfig::default() })
//!         .routes(routes)
//!         .build()?
//!         .bind()
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

mod body;
mod error;
mod routes;
mod server;

pub mod handler;
pub mod response;

pub use body::ResponseBody;
pub use error::{BoxError, Cancelled, RouteError, ServerError};
pub use routes::{normalize_path, PathParams, RouteTable, RouteTableBuilder};
pub use server::{Server, ServerBuildError, ServerBuilder, ServerConfig, ServerHandle};
