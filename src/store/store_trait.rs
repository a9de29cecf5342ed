use async_trait::async_trait;

use crate::SessionPayload;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Encoding failed with: {0}")]
    Encode(String),

    #[error("Decoding failed with: {0}")]
    Decode(String),

    #[error("{0}")]
    Backend(String),
}

/// Pluggable persistence for session payloads, keyed by session id.
///
/// Distinct ids are independent; no cross-key locking is assumed. Backends
/// must tolerate last-writer-wins semantics when concurrent requests write
/// the same id.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Gets the payload stored at `session_id`, if any.
    async fn get(&self, session_id: &str) -> Result<Option<SessionPayload>, Error>;

    /// Writes `payload` at `session_id`, replacing any previous payload.
    async fn set(&self, session_id: &str, payload: &SessionPayload) -> Result<(), Error>;

    /// Removes the payload stored at `session_id`.
    ///
    /// Removing an unknown id is not an error.
    async fn destroy(&self, session_id: &str) -> Result<(), Error>;

    /// The payload a freshly issued session starts from.
    fn default_payload(&self) -> SessionPayload {
        SessionPayload::new()
    }

    /// A stable backend name, bound into the session content hash so a
    /// session is tied to the store that persisted it.
    fn name(&self) -> &'static str;
}
