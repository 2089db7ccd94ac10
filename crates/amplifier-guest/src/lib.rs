//! Shared wire contract for out-of-process Amplifier modules compiled to
//! WebAssembly components.
//!
//! `amplifier-core`'s loader falls back to the WASM component path when a
//! module id isn't found in the native registry (see
//! `amplifier_core::loader`). A component module is its own crate (one of
//! the `tests/fixtures/wasm/src/*` shapes -- `echo-tool`, `echo-provider`,
//! `passthrough-orchestrator`, `memory-context`, `deny-hook`,
//! `auto-approve`), built with `cargo-component` against its own local
//! `wit/` world definition; that per-module WIT text isn't part of this
//! crate (and wasn't retrieved into this pack), so the component-model
//! export wiring itself is left to each module's own build. What lives
//! here is the stable data contract both sides agree on: the Rust
//! mirrors of the kernel's wire shapes (`ToolResult`, `HookResult`,
//! `ApprovalRequest`, etc. from `amplifier_core::models`), independent of
//! `amplifier-core` itself since a `wasm32-unknown-unknown` guest can't
//! pull in a crate built around `tokio`.
//!
//! The `kernel-stub` feature (default-on) is what this crate builds under
//! for native/host-side consumers -- the data contract and the
//! `Guest*` traits below. A real wasm component build additionally runs
//! `cargo-component` against the module's own `wit/` world to generate
//! the actual export glue; that path doesn't touch this feature.
//!
//! # Envelope
//!
//! Calls cross the component boundary as a `GuestEnvelope`: a `prost`
//! message carrying a `method` tag and a `payload_json` field holding the
//! serde-encoded domain value. `prost` gives the envelope itself a stable,
//! independently-versionable wire schema; the payload stays JSON so the
//! domain types below can evolve without a `.proto` recompile on both
//! sides of the boundary.

use prost::Message;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The call envelope that crosses the host/guest boundary.
///
/// `method` names the exported function being invoked (e.g. `"execute"`
/// for a tool module, `"complete"` for a provider module); `payload_json`
/// is the serde-encoded argument or return value.
#[derive(Clone, PartialEq, Default, Message)]
pub struct GuestEnvelope {
    #[prost(string, tag = "1")]
    pub method: String,
    #[prost(string, tag = "2")]
    pub payload_json: String,
}

/// An error produced by a guest module, carried back across the boundary
/// as plain text rather than a typed error enum -- the host only needs to
/// log or surface it, never match on its variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestError {
    pub message: String,
}

impl GuestError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl std::fmt::Display for GuestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for GuestError {}

/// Encodes `method` + a JSON-serializable payload into a `GuestEnvelope`,
/// then into its `prost`-encoded bytes.
pub fn encode_call<T: Serialize>(method: &str, payload: &T) -> Result<Vec<u8>, GuestError> {
    let payload_json =
        serde_json::to_string(payload).map_err(|e| GuestError::new(format!("encode payload: {e}")))?;
    let envelope = GuestEnvelope {
        method: method.to_string(),
        payload_json,
    };
    Ok(envelope.encode_to_vec())
}

/// Decodes `bytes` as a `GuestEnvelope`, then the payload as `T`. Returns
/// the method name alongside the decoded payload so dispatch can route on
/// it without a second pass over the bytes.
pub fn decode_call<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<(String, T), GuestError> {
    let envelope =
        GuestEnvelope::decode(bytes).map_err(|e| GuestError::new(format!("decode envelope: {e}")))?;
    let payload = serde_json::from_str(&envelope.payload_json)
        .map_err(|e| GuestError::new(format!("decode payload for '{}': {e}", envelope.method)))?;
    Ok((envelope.method, payload))
}

// ---------------------------------------------------------------------------
// Tool contract
// ---------------------------------------------------------------------------

/// Mirrors `amplifier_core::models::ToolResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Mirrors `amplifier_core::messages::ToolSpec`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}

/// A synchronous tool module export. Component exports are synchronous
/// calls in the wasm component model; async orchestration on the host
/// side awaits the host-level `Tool::execute` wrapper that invokes this.
pub trait GuestTool {
    fn name(&self) -> String;
    fn get_spec(&self) -> ToolSpec;
    fn execute(&self, input: serde_json::Value) -> Result<ToolResult, GuestError>;
}

// ---------------------------------------------------------------------------
// Provider contract
// ---------------------------------------------------------------------------

/// Mirrors `amplifier_core::models::ModelInfo`/`ProviderInfo` loosely --
/// guest providers are expected to be simple/test fixtures (the real
/// provider surface area lives natively), so this intentionally carries
/// only the fields a fixture needs to round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

pub trait GuestProvider {
    fn get_info(&self) -> ProviderInfo;
    fn list_models(&self) -> Result<Vec<ModelInfo>, GuestError>;
    /// `request`/response are passed as opaque JSON (the full
    /// `ChatRequest`/`ChatResponse` shapes) rather than mirrored field for
    /// field -- a fixture provider only needs to round-trip what it's
    /// given.
    fn complete(&self, request: serde_json::Value) -> Result<serde_json::Value, GuestError>;
}

// ---------------------------------------------------------------------------
// Context contract
// ---------------------------------------------------------------------------

pub trait GuestContext {
    fn add_message(&self, message: serde_json::Value) -> Result<(), GuestError>;
    fn get_messages(&self) -> Result<Vec<serde_json::Value>, GuestError>;
    fn set_messages(&self, messages: Vec<serde_json::Value>) -> Result<(), GuestError>;
    fn clear(&self) -> Result<(), GuestError>;
}

// ---------------------------------------------------------------------------
// Orchestrator contract
// ---------------------------------------------------------------------------

pub trait GuestOrchestrator {
    /// `context`/`providers`/`tools`/`hooks`/`coordinator` cross the
    /// boundary as opaque JSON the same way `Session::execute` serializes
    /// them for the native `Orchestrator::execute` call; a guest
    /// orchestrator is expected to be a fixture (passthrough, fixed
    /// response), not a full reimplementation of the turn loop.
    fn execute(&self, prompt: String, context: serde_json::Value) -> Result<String, GuestError>;
}

// ---------------------------------------------------------------------------
// Hook contract
// ---------------------------------------------------------------------------

/// Mirrors `amplifier_core::models::HookAction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookAction {
    Continue,
    Deny,
    Modify,
    AskUser,
    InjectContext,
}

/// Mirrors `amplifier_core::models::HookResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookResult {
    pub action: HookAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_data: Option<serde_json::Value>,
}

impl Default for HookResult {
    fn default() -> Self {
        Self {
            action: HookAction::Continue,
            reason: None,
            modified_data: None,
        }
    }
}

pub trait GuestHook {
    fn handle(&self, event: String, data: serde_json::Value) -> Result<HookResult, GuestError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        n: i32,
    }

    #[test]
    fn envelope_round_trips_payload() {
        let bytes = encode_call("ping", &Ping { n: 7 }).unwrap();
        let (method, decoded): (String, Ping) = decode_call(&bytes).unwrap();
        assert_eq!(method, "ping");
        assert_eq!(decoded, Ping { n: 7 });
    }

    #[test]
    fn decode_call_rejects_garbage_bytes() {
        let result: Result<(String, Ping), GuestError> = decode_call(&[0xff, 0xfe, 0xfd]);
        assert!(result.is_err());
    }

    #[test]
    fn hook_result_default_is_continue() {
        let result = HookResult::default();
        assert_eq!(result.action, HookAction::Continue);
        assert!(result.reason.is_none());
    }

    #[test]
    fn tool_result_serializes_without_null_fields() {
        let result = ToolResult {
            success: true,
            output: Some(serde_json::json!("ok")),
            error: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("error").is_none());
    }

    struct EchoTool;

    impl GuestTool for EchoTool {
        fn name(&self) -> String {
            "echo".to_string()
        }

        fn get_spec(&self) -> ToolSpec {
            ToolSpec {
                name: "echo".to_string(),
                description: Some("echoes input".to_string()),
                parameters: serde_json::json!({}),
            }
        }

        fn execute(&self, input: serde_json::Value) -> Result<ToolResult, GuestError> {
            Ok(ToolResult {
                success: true,
                output: Some(input),
                error: None,
            })
        }
    }

    #[test]
    fn guest_tool_contract_is_object_safe() {
        let tool: Box<dyn GuestTool> = Box::new(EchoTool);
        let result = tool.execute(serde_json::json!({"a": 1})).unwrap();
        assert!(result.success);
        assert_eq!(result.output, Some(serde_json::json!({"a": 1})));
    }
}
