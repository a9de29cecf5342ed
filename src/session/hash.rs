use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::SessionPayload;

/// Content hash over a session's logical state, used only for local change
/// detection.
///
/// The input is stringified canonically (object keys in sorted order, so the
/// digest is independent of insertion order) and digested with SHA-256.
/// serde_json already normalizes non-finite floats to null before they reach
/// this point.
pub(crate) fn hash_session(
    id: &str,
    encrypted_id: &str,
    store_name: &str,
    payload: &SessionPayload,
) -> String {
    let mut canonical = String::with_capacity(256);
    let mut body = serde_json::Map::new();
    body.insert("encrypted_id".to_owned(), Value::String(encrypted_id.to_owned()));
    body.insert("id".to_owned(), Value::String(id.to_owned()));
    body.insert("payload".to_owned(), Value::Object(payload.as_map().clone()));
    body.insert("store".to_owned(), Value::String(store_name.to_owned()));

    write_canonical(&Value::Object(body), &mut canonical);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by_key(|(key, _)| key.as_str());

            out.push('{');
            for (i, (key, value)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_independent_of_insertion_order() {
        let mut first = SessionPayload::new();
        first.set("alpha", 1).unwrap();
        first.set("beta", "two").unwrap();

        let mut second = SessionPayload::new();
        second.set("beta", "two").unwrap();
        second.set("alpha", 1).unwrap();

        assert_eq!(
            hash_session("sid", "enc", "in_memory", &first),
            hash_session("sid", "enc", "in_memory", &second),
        );
    }

    #[test]
    fn test_hash_is_type_sensitive() {
        let mut boolean = SessionPayload::new();
        boolean.set("flag", true).unwrap();

        let mut string = SessionPayload::new();
        string.set("flag", "true").unwrap();

        assert_ne!(
            hash_session("sid", "enc", "in_memory", &boolean),
            hash_session("sid", "enc", "in_memory", &string),
        );
    }

    #[test]
    fn test_hash_binds_identity_and_store() {
        let payload = SessionPayload::new();

        let base = hash_session("sid", "enc", "in_memory", &payload);
        assert_ne!(base, hash_session("other", "enc", "in_memory", &payload));
        assert_ne!(base, hash_session("sid", "other", "in_memory", &payload));
        assert_ne!(base, hash_session("sid", "enc", "redis", &payload));
    }

    #[test]
    fn test_canonical_nested_values() {
        let mut first = SessionPayload::new();
        first
            .set("user", serde_json::json!({"name": "Jo", "id": 1, "tags": ["a", "b"]}))
            .unwrap();

        let mut second = SessionPayload::new();
        second
            .set("user", serde_json::json!({"id": 1, "tags": ["a", "b"], "name": "Jo"}))
            .unwrap();

        assert_eq!(
            hash_session("sid", "enc", "in_memory", &first),
            hash_session("sid", "enc", "in_memory", &second),
        );
    }
}
