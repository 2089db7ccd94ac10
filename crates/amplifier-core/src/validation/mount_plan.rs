//! Mount plan structure validation.
//!
//! Validates the *shape* of a mount plan (a deep-merged settings document)
//! before the loader touches it. This is distinct from the per-type
//! validators in this module, which check that a already-mounted instance
//! satisfies its trait's contract -- `MountPlanValidator` only checks that
//! the plan itself is well-formed JSON, so loader errors come with a
//! precise path instead of a panic three layers down.

use serde_json::Value;

use crate::models::{CheckSeverity, ValidationCheck};

const REQUIRED_SESSION_FIELDS: &[&str] = &["orchestrator", "context"];
const OPTIONAL_SECTIONS: &[&str] = &["providers", "tools", "hooks", "agents"];

/// Result of validating a mount plan's structure.
///
/// Kept separate from [`crate::models::ValidationResult`] because mount
/// plans are not tied to a single `ModuleType` -- a plan touches all of
/// them at once.
#[derive(Debug, Clone, Default)]
pub struct MountPlanValidationResult {
    pub checks: Vec<ValidationCheck>,
}

impl MountPlanValidationResult {
    pub fn add(&mut self, check: ValidationCheck) {
        self.checks.push(check);
    }

    pub fn passed(&self) -> bool {
        self.checks
            .iter()
            .all(|c| c.passed || c.severity != CheckSeverity::Error)
    }

    pub fn errors(&self) -> Vec<&ValidationCheck> {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.severity == CheckSeverity::Error)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&ValidationCheck> {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.severity == CheckSeverity::Warning)
            .collect()
    }

    pub fn summary(&self) -> String {
        let passed_count = self.checks.iter().filter(|c| c.passed).count();
        let status = if self.passed() { "PASSED" } else { "FAILED" };
        format!(
            "{status}: {passed_count}/{} checks passed ({} errors, {} warnings)",
            self.checks.len(),
            self.errors().len(),
            self.warnings().len()
        )
    }

    pub fn format_errors(&self) -> String {
        let errors = self.errors();
        if errors.is_empty() {
            return "No errors".to_string();
        }
        let mut lines = vec!["Mount plan validation failed:".to_string(), String::new()];
        for (i, error) in errors.iter().enumerate() {
            lines.push(format!("  {}. [{}] {}", i + 1, error.name, error.message));
        }
        lines.push(String::new());
        lines.push(format!("Total: {} error(s)", errors.len()));
        lines.join("\n")
    }
}

fn check(
    result: &mut MountPlanValidationResult,
    name: impl Into<String>,
    passed: bool,
    message: impl Into<String>,
    severity: CheckSeverity,
) {
    result.add(ValidationCheck {
        name: name.into(),
        passed,
        message: message.into(),
        severity,
    });
}

/// Validates mount plan structure before module loading.
///
/// Does NOT validate module importability (the loader's job) or protocol
/// compliance (the per-type validators' job in this module) -- only that
/// the plan dict itself is well-formed.
pub struct MountPlanValidator;

impl Default for MountPlanValidator {
    fn default() -> Self {
        Self
    }
}

impl MountPlanValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, mount_plan: &Value) -> MountPlanValidationResult {
        let mut result = MountPlanValidationResult::default();

        if !self.validate_root_structure(&mut result, mount_plan) {
            return result;
        }

        if let Some(session) = mount_plan.get("session") {
            self.validate_session(&mut result, session);
        }

        for section in OPTIONAL_SECTIONS {
            if *section == "agents" {
                continue;
            }
            if let Some(modules) = mount_plan.get(*section) {
                self.validate_module_list(&mut result, modules, section);
            }
        }

        result
    }

    fn validate_root_structure(
        &self,
        result: &mut MountPlanValidationResult,
        mount_plan: &Value,
    ) -> bool {
        let Some(obj) = mount_plan.as_object() else {
            check(
                result,
                "root_type",
                false,
                format!("mount plan must be an object, got {}", type_name(mount_plan)),
                CheckSeverity::Error,
            );
            return false;
        };

        check(
            result,
            "root_type",
            true,
            "mount plan is an object",
            CheckSeverity::Info,
        );

        if !obj.contains_key("session") {
            check(
                result,
                "session_present",
                false,
                "mount plan missing required 'session' section",
                CheckSeverity::Error,
            );
        } else {
            check(
                result,
                "session_present",
                true,
                "session section present",
                CheckSeverity::Info,
            );
        }

        let mut known: Vec<&str> = OPTIONAL_SECTIONS.to_vec();
        known.push("session");
        let unknown: Vec<&String> = obj.keys().filter(|k| !known.contains(&k.as_str())).collect();
        if !unknown.is_empty() {
            check(
                result,
                "unknown_sections",
                false,
                format!("unknown sections will be ignored: {unknown:?}"),
                CheckSeverity::Warning,
            );
        }

        true
    }

    fn validate_session(&self, result: &mut MountPlanValidationResult, session: &Value) {
        let Some(obj) = session.as_object() else {
            check(
                result,
                "session_type",
                false,
                format!("session section must be an object, got {}", type_name(session)),
                CheckSeverity::Error,
            );
            return;
        };

        for field in REQUIRED_SESSION_FIELDS {
            match obj.get(*field) {
                None => check(
                    result,
                    format!("session_{field}_present"),
                    false,
                    format!("session section missing required '{field}' field"),
                    CheckSeverity::Error,
                ),
                Some(spec) => self.validate_module_spec(result, spec, &format!("session.{field}")),
            }
        }
    }

    fn validate_module_list(
        &self,
        result: &mut MountPlanValidationResult,
        modules: &Value,
        section_name: &str,
    ) {
        let Some(list) = modules.as_array() else {
            check(
                result,
                format!("{section_name}_type"),
                false,
                format!(
                    "'{section_name}' section must be a list, got {}",
                    type_name(modules)
                ),
                CheckSeverity::Error,
            );
            return;
        };

        if list.is_empty() {
            check(
                result,
                format!("{section_name}_empty"),
                true,
                format!("'{section_name}' section is empty"),
                CheckSeverity::Info,
            );
            return;
        }

        for (i, spec) in list.iter().enumerate() {
            self.validate_module_spec(result, spec, &format!("{section_name}[{i}]"));
        }
    }

    fn validate_module_spec(
        &self,
        result: &mut MountPlanValidationResult,
        spec: &Value,
        path: &str,
    ) {
        let Some(obj) = spec.as_object() else {
            check(
                result,
                format!("{path}_type"),
                false,
                format!("module spec at {path} must be an object, got {}", type_name(spec)),
                CheckSeverity::Error,
            );
            return;
        };

        match obj.get("module") {
            None => check(
                result,
                format!("{path}_module_required"),
                false,
                format!(
                    "module spec at {path} missing required 'module' field. Got: {spec}. \
                     Expected: {{\"module\": \"module-name\", \"source\": \"...\", \"config\": {{...}}}}"
                ),
                CheckSeverity::Error,
            ),
            Some(Value::String(s)) if s.is_empty() => check(
                result,
                format!("{path}_module_empty"),
                false,
                format!("module path at {path} cannot be empty"),
                CheckSeverity::Error,
            ),
            Some(Value::String(s)) => check(
                result,
                format!("{path}_module_valid"),
                true,
                format!("module path '{s}' at {path} is valid"),
                CheckSeverity::Info,
            ),
            Some(other) => check(
                result,
                format!("{path}_module_type"),
                false,
                format!(
                    "module path at {path} must be a string, got {}",
                    type_name(other)
                ),
                CheckSeverity::Error,
            ),
        }

        if let Some(config) = obj.get("config") {
            if !config.is_object() {
                check(
                    result,
                    format!("{path}_config_type"),
                    false,
                    format!("config at {path} must be an object, got {}", type_name(config)),
                    CheckSeverity::Error,
                );
            }
        }

        if let Some(source) = obj.get("source") {
            if !source.is_string() && !source.is_object() {
                check(
                    result,
                    format!("{path}_source_type"),
                    false,
                    format!(
                        "source at {path} must be a string or object, got {}",
                        type_name(source)
                    ),
                    CheckSeverity::Error,
                );
            }
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
