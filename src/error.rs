use thiserror::Error;

/// Failure talking to the remote object store.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Connection, timeout or TLS failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Store answered with a non-success status
    #[error("remote returned {status}: {code}")]
    Status { status: u16, code: String },

    /// Remote artifact could not be decoded
    #[error("remote log is malformed: {0}")]
    Format(#[from] LogFormatError),

    /// Request could not be signed or built
    #[error("invalid request: {0}")]
    Request(String),
}

/// The measurement log artifact is structurally unreadable.
#[derive(Error, Debug)]
pub enum LogFormatError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("csv writer error: {0}")]
    Writer(String),
}

/// Failure in the local durable cache.
#[derive(Error, Debug)]
pub enum LocalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Format(#[from] LogFormatError),
}
