//! Uniform operation-result envelope
//!
//! Every host operation answers with `{"success": false, "message": ...}` on
//! failure, or `{"success": true, ...}` with operation-specific fields on
//! success. Nothing crosses the operation boundary as an error value; the
//! envelope is the whole contract.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::PathBuf;

/// Build a failure envelope.
pub fn failure(message: impl Into<String>) -> Value {
    json!({ "success": false, "message": message.into() })
}

/// Build a success envelope, flattening the payload's fields next to
/// `success: true`.
pub fn success<T: Serialize>(payload: &T) -> Value {
    match serde_json::to_value(payload) {
        Ok(Value::Object(mut fields)) => {
            fields.insert("success".to_string(), Value::Bool(true));
            Value::Object(fields)
        }
        Ok(Value::Null) => {
            let mut fields = Map::new();
            fields.insert("success".to_string(), Value::Bool(true));
            Value::Object(fields)
        }
        Ok(other) => json!({ "success": true, "result": other }),
        Err(e) => failure(format!("failed to encode result: {}", e)),
    }
}

// ============================================================================
// Operation arguments
// ============================================================================

/// Which launch root a `start` request resolves against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RootSelector {
    /// Shipped, read-only content under the application root.
    #[default]
    Static,
    /// Content staged into the sandbox by `assemble`.
    Dynamic,
}

/// Arguments for `clear`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearArgs {
    #[serde(default = "ClearArgs::default_zone")]
    pub zone: String,
}

impl ClearArgs {
    fn default_zone() -> String {
        "all".to_string()
    }
}

impl Default for ClearArgs {
    fn default() -> Self {
        Self {
            zone: Self::default_zone(),
        }
    }
}

/// Arguments for `prepare` and `assemble`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigArgs {
    pub config: String,
}

/// Arguments for `start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartArgs {
    pub path: String,
    #[serde(default)]
    pub root: RootSelector,
}

/// Arguments for `kill` and `read-output`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PidArgs {
    pub pid: u32,
}

/// Arguments for `resolve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveArgs {
    pub path: String,
}

// ============================================================================
// Operation results
// ============================================================================

/// Success payload of `clear`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cleared {
    pub message: String,
}

/// Success payload of `prepare`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prepared {
    /// Zone names actually prepared, in config order.
    pub prepared: Vec<String>,
}

/// Success payload of `assemble`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assembled {
    pub message: String,
}

/// Success payload of `start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Started {
    pub pid: u32,
    /// Display name of the launched file (its base name).
    pub launched: String,
}

/// Success payload of `kill`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Killed {
    pub message: String,
}

/// Success payload of `list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessList {
    pub pids: Vec<u32>,
    pub count: usize,
}

/// Success payload of `kill-all`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KilledAll {
    pub killed: usize,
}

/// Success payload of `resolve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolved {
    pub path: PathBuf,
}

/// Success payload of `end-session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEnded {
    pub message: String,
}

/// Success payload of `read-output`.
///
/// Output bytes are opaque binary; they cross the envelope base64-encoded so
/// any transport that carries JSON can carry them unharmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrainedOutput {
    pub pid: u32,
    pub stdout: String,
    pub stderr: String,
    pub stdout_bytes: usize,
    pub stderr_bytes: usize,
}

impl DrainedOutput {
    /// Encode freshly drained stream bytes for the wire.
    pub fn from_bytes(pid: u32, stdout: &[u8], stderr: &[u8]) -> Self {
        Self {
            pid,
            stdout: BASE64.encode(stdout),
            stderr: BASE64.encode(stderr),
            stdout_bytes: stdout.len(),
            stderr_bytes: stderr.len(),
        }
    }

    /// Decode the stdout payload back to raw bytes.
    pub fn decode_stdout(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.stdout)
    }

    /// Decode the stderr payload back to raw bytes.
    pub fn decode_stderr(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_shape() {
        let v = failure("bad input");
        assert_eq!(v["success"], Value::Bool(false));
        assert_eq!(v["message"], Value::String("bad input".to_string()));
    }

    #[test]
    fn test_success_flattens_payload() {
        let v = success(&Started {
            pid: 42,
            launched: "demo.js".to_string(),
        });
        assert_eq!(v["success"], Value::Bool(true));
        assert_eq!(v["pid"], json!(42));
        assert_eq!(v["launched"], json!("demo.js"));
        assert!(v.get("message").is_none());
    }

    #[test]
    fn test_drained_output_round_trip() {
        let out = DrainedOutput::from_bytes(7, b"hello\n", &[0xff, 0x00, 0x7f]);
        assert_eq!(out.stdout_bytes, 6);
        assert_eq!(out.stderr_bytes, 3);
        assert_eq!(out.decode_stdout().unwrap(), b"hello\n");
        assert_eq!(out.decode_stderr().unwrap(), vec![0xff, 0x00, 0x7f]);
    }

    #[test]
    fn test_clear_args_default_zone() {
        let args: ClearArgs = serde_json::from_value(json!({})).unwrap();
        assert_eq!(args.zone, "all");

        let args: ClearArgs = serde_json::from_value(json!({ "zone": "levels" })).unwrap();
        assert_eq!(args.zone, "levels");
    }

    #[test]
    fn test_root_selector_default_and_names() {
        let args: StartArgs = serde_json::from_value(json!({ "path": "a.js" })).unwrap();
        assert_eq!(args.root, RootSelector::Static);

        let args: StartArgs =
            serde_json::from_value(json!({ "path": "a.js", "root": "dynamic" })).unwrap();
        assert_eq!(args.root, RootSelector::Dynamic);
    }
}
