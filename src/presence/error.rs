use std::{future::Future, time::Duration};

use thiserror::Error;

use super::room::RoomId;

/// Failure talking to the shared presence store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("presence store answered with HTTP {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("presence store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// The store no longer knows our peer id; only a fresh join recovers.
    pub fn is_unknown_peer(&self) -> bool {
        matches!(self, StoreError::Status(404 | 410))
    }
}

/// Errors the user gets to see. Loop failures never end up here.
#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("not signed in; sign in before going online")]
    Unauthenticated,
    #[error("could not join room {room}: {source}")]
    JoinFailed {
        room: RoomId,
        #[source]
        source: StoreError,
    },
}

/// Bound a store call; an elapsed deadline counts as a failure.
pub async fn with_timeout<T, F>(limit: Duration, request: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, request).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}
