use seasaw_http::{RouteError, ServerBuildError, ServerError};
use thiserror::Error;

/// Failures while turning an application into a running server.
///
/// These are configuration problems and surface once, at startup.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("route table error: {0}")]
    Route(#[from] RouteError),

    #[error("server build error: {0}")]
    Build(#[from] ServerBuildError),

    #[error("server error: {0}")]
    Server(#[from] ServerError),
}
