#![allow(clippy::missing_errors_doc, clippy::explicit_auto_deref)]
use jsonschema::{Draft, JSONSchema};
use serde_json::json;
use serde_json::Value;

// Structural guard only; fingerprint syntax is checked entry by entry afterwards.
pub static KEYLIST_SCHEMA: std::sync::LazyLock<Value> = std::sync::LazyLock::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "$id": "https://keysync.dev/schema/keylist.json",
        "type": "object",
        "required": ["metadata", "keys"],
        "properties": {
            "metadata": {
                "type": "object",
                "required": ["signature_uri"],
                "properties": {
                    "signature_uri": {"type": "string", "minLength": 1},
                    "comment": {"type": "string"}
                }
            },
            "keys": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "required": ["fingerprint"],
                    "properties": {
                        "fingerprint": {"type": "string"},
                        "name": {"type": "string"},
                        "revoked": {"type": "boolean"}
                    }
                }
            }
        },
        "additionalProperties": true
    })
});

/// Check a parsed keylist against [`KEYLIST_SCHEMA`], joining every violation
/// into one message.
pub fn validate_keylist(v: &Value) -> Result<(), String> {
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&*KEYLIST_SCHEMA)
        .map_err(|e| format!("invalid keylist schema: {e}"))?;
    if let Err(errs) = compiled.validate(v) {
        let mut msgs = Vec::new();
        for e in errs {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                msgs.push(e.to_string());
            } else {
                msgs.push(format!("{path}: {e}"));
            }
        }
        return Err(format!("keylist schema violation: {}", msgs.join("; ")));
    }
    Ok(())
}
