use thiserror::Error;

/// Errors produced by the gateway stack.
///
/// Bus and database failures never surface here: the link retries and
/// the store logs, both by contract.
#[derive(Debug, Error)]
pub enum HomedError {
    #[error("config error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type HomedResult<T> = Result<T, HomedError>;
