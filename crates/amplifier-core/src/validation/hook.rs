//! Hook handler module validator.
//!
//! Dispatches a synthetic event through the handler directly (not via
//! [`crate::hooks::HookRegistry`]) to confirm it tolerates an unknown event
//! name and returns a well-formed [`crate::models::HookResult`] rather than
//! erroring.

use std::sync::Arc;

use serde_json::json;

use crate::models::{CheckSeverity, ModuleType, ValidationCheck, ValidationResult};
use crate::traits::HookHandler;

const PROBE_EVENT: &str = "validation:probe";

/// Validates a mounted [`HookHandler`] instance.
pub struct HookValidator;

impl Default for HookValidator {
    fn default() -> Self {
        Self
    }
}

impl HookValidator {
    pub fn new() -> Self {
        Self
    }

    pub async fn validate(&self, module_path: &str, hook: &Arc<dyn HookHandler>) -> ValidationResult {
        let mut result = ValidationResult::new(ModuleType::Hook, module_path);

        match hook.handle(PROBE_EVENT, json!({})).await {
            Ok(hook_result) => result.add(ValidationCheck {
                name: "hook_handle".into(),
                passed: true,
                message: format!(
                    "HookHandler.handle() returned action '{:?}' for an unrecognised probe event",
                    hook_result.action
                ),
                severity: CheckSeverity::Info,
            }),
            Err(e) => result.add(ValidationCheck {
                name: "hook_handle".into(),
                passed: false,
                message: format!("HookHandler.handle() errored on a probe event: {e}"),
                severity: CheckSeverity::Warning,
            }),
        }

        result
    }
}
