use thiserror::Error;

/// Failure of a round trip below the command layer
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout")]
    Timeout,
}

/// Errors returned by [`Limiter`](crate::Limiter) and [`Pipeline`](crate::Pipeline)
///
/// Any error aborts the whole call or batch: no result handle is populated.
#[derive(Error, Debug)]
pub enum Error {
    /// The round trip itself failed; never retried here
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The store rejected a command with an error reply
    #[error("store returned error: {0}")]
    Command(String),

    /// Procedures kept disappearing from the store cache
    #[error("too many retries: procedures still missing after {reloads} reloads")]
    TooManyRetries { reloads: u32 },

    /// A reply had an unexpected shape, cardinality or type
    #[error("malformed reply: {0}")]
    MalformedReply(String),

    /// The request was rejected before contacting the store
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The caller-supplied deadline elapsed
    #[error("deadline elapsed")]
    Timeout,

    /// A result handle was read before a successful `exec`
    #[error("result not ready: pipeline has not been executed successfully")]
    NotReady,
}

pub type Result<T> = std::result::Result<T, Error>;
