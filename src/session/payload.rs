use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::store;

/// The mutable key-value data held by a session.
///
/// Values are stored as JSON so payloads stay schemaless across handlers; a
/// payload is owned by the session that created or restored it and is
/// replaced wholesale on reload and regeneration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionPayload {
    data: Map<String, Value>,
}

impl SessionPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets and deserializes the value at `key`.
    ///
    /// Returns `None` when the key is absent or the stored value does not
    /// deserialize to `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Serializes and stores `value` at `key`, replacing any previous value.
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), store::Error> {
        let value =
            serde_json::to_value(value).map_err(|e| store::Error::Encode(e.to_string()))?;
        self.data.insert(key.to_owned(), value);
        Ok(())
    }

    /// Removes the value at `key`, returning whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.data.remove(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn as_map(&self) -> &Map<String, Value> {
        &self.data
    }
}
