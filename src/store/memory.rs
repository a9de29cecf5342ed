use dashmap::DashMap;

use crate::SessionPayload;
use crate::store::{Error, SessionStore};
use async_trait::async_trait;

pub(crate) fn serialize_payload(payload: &SessionPayload) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(payload).map_err(|e| Error::Encode(e.to_string()))
}

pub(crate) fn deserialize_payload(bytes: &[u8]) -> Result<SessionPayload, Error> {
    serde_json::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))
}

/// An in-memory session store.
///
/// Payloads live in a concurrent map as serialized JSON and do not survive a
/// process restart. This is the reference/test backend.
///
/// ### Note
///
/// Do not use this in a production environment.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    data: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions currently held.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionPayload>, Error> {
        self.data
            .get(session_id)
            .map(|bytes| deserialize_payload(&bytes))
            .transpose()
    }

    async fn set(&self, session_id: &str, payload: &SessionPayload) -> Result<(), Error> {
        let bytes = serialize_payload(payload)?;
        self.data.insert(session_id.to_owned(), bytes);
        Ok(())
    }

    async fn destroy(&self, session_id: &str) -> Result<(), Error> {
        self.data.remove(session_id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}
