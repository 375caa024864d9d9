use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of the serialized spec.
///
/// `serde_json` keeps object keys ordered, so two specs that differ only in
/// key order produce the same digest.
pub fn spec_digest(spec: &Value) -> String {
    let mut hasher = Sha256::new();
    // Serializing a `Value` cannot fail: its map keys are always strings.
    hasher.update(spec.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Stable key used to match a rendered child against an existing child.
///
/// The discriminator is the explicit `key` when one is given, otherwise the
/// digest of `spec`. Without an explicit key any spec edit changes the
/// identity, so the old child is disposed and a new one created; controllers
/// that want in-place updates must supply a key that survives spec edits.
pub fn identity(component_type: &str, name: &str, spec: &Value, key: Option<&str>) -> String {
    let discriminator = match key {
        Some(key) if !key.is_empty() => key.to_owned(),
        _ => spec_digest(spec),
    };
    format!("{component_type}:{name}:{discriminator}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn explicit_key_is_used_verbatim() {
        let id = identity("process", "web", &json!({"cmd": "serve"}), Some("web-v1"));
        assert_eq!(id, "process:web:web-v1");
    }

    #[test]
    fn empty_key_falls_back_to_digest() {
        let spec = json!({"cmd": "serve"});
        let with_empty = identity("process", "web", &spec, Some(""));
        let without = identity("process", "web", &spec, None);
        assert_eq!(with_empty, without);
        assert!(without.starts_with("process:web:"));
        assert_eq!(without.len(), "process:web:".len() + 64);
    }

    #[test]
    fn identical_inputs_are_stable() {
        let a = identity("volume", "data", &json!({"size": 10, "driver": "local"}), None);
        let b = identity("volume", "data", &json!({"driver": "local", "size": 10}), None);
        assert_eq!(a, b);
    }

    #[test]
    fn spec_change_changes_identity_without_key() {
        let a = identity("file", "motd", &json!({"content": "hello"}), None);
        let b = identity("file", "motd", &json!({"content": "goodbye"}), None);
        assert_ne!(a, b);
    }

    #[test]
    fn spec_change_keeps_identity_with_key() {
        let a = identity("file", "motd", &json!({"content": "hello"}), Some("motd"));
        let b = identity("file", "motd", &json!({"content": "goodbye"}), Some("motd"));
        assert_eq!(a, b);
    }

    #[test]
    fn type_and_name_participate() {
        let spec = json!({});
        assert_ne!(
            identity("file", "a", &spec, None),
            identity("process", "a", &spec, None)
        );
        assert_ne!(
            identity("file", "a", &spec, None),
            identity("file", "b", &spec, None)
        );
    }

    #[test]
    fn digest_of_null_spec_is_known_value() {
        // sha256("null")
        assert_eq!(
            spec_digest(&Value::Null),
            "74234e98afe7498fb5daf1f36ac2d78acc339464f950703b8c019892f982b90b"
        );
    }
}
