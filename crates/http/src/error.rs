use std::error::Error;
use std::io;
use thiserror::Error;

/// The dynamic error type returned by route handlers.
pub type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bind {address} error: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ServerError {
    pub fn bind<S: ToString>(address: S, source: io::Error) -> Self {
        Self::Bind { address: address.to_string(), source }
    }
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid route '{path}': {source}")]
    Insert {
        path: String,
        #[source]
        source: matchit::InsertError,
    },
}

impl RouteError {
    pub fn insert<S: ToString>(path: S, source: matchit::InsertError) -> Self {
        Self::Insert { path: path.to_string(), source }
    }
}

/// Returned to the server when a request finished without producing a response.
#[derive(Debug, Error)]
#[error("request was cancelled before a response was produced")]
pub struct Cancelled;
