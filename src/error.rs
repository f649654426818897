use thiserror::Error;

/// Failures that end a connection's session.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("peer disconnected before sending a display name")]
    Handshake,

    #[error("transport error")]
    Io(#[from] std::io::Error),

    #[error("display name {name:?} is already taken")]
    DuplicateMember { name: String },
}

/// Write-side failures, scoped to a single recipient.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("connection is closed")]
    Closed,

    #[error("outbound queue is full")]
    Backlogged,
}
