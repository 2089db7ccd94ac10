//! Provider module validator.
//!
//! Mirrors [`super::tool::ToolValidator`]'s rationale: protocol compliance
//! is enforced by the compiler via `Arc<dyn Provider>`, so this validator
//! checks semantic well-formedness of an already-mounted provider --
//! non-empty identity, a usable `ProviderInfo`, and that `list_models`
//! actually resolves instead of hanging or erroring.

use std::sync::Arc;

use crate::models::{CheckSeverity, ModuleType, ValidationCheck, ValidationResult};
use crate::traits::Provider;

/// Validates a mounted [`Provider`] instance.
pub struct ProviderValidator;

impl Default for ProviderValidator {
    fn default() -> Self {
        Self
    }
}

impl ProviderValidator {
    pub fn new() -> Self {
        Self
    }

    pub async fn validate(&self, module_path: &str, provider: &Arc<dyn Provider>) -> ValidationResult {
        let mut result = ValidationResult::new(ModuleType::Provider, module_path);

        let name = provider.name();
        if name.is_empty() {
            result.add(ValidationCheck {
                name: "provider_name".into(),
                passed: false,
                message: "Provider.name() must be a non-empty string".into(),
                severity: CheckSeverity::Error,
            });
        } else {
            result.add(ValidationCheck {
                name: "provider_name".into(),
                passed: true,
                message: format!("provider has name '{name}'"),
                severity: CheckSeverity::Info,
            });
        }

        let info = provider.get_info();
        if info.id.is_empty() {
            result.add(ValidationCheck {
                name: "provider_get_info".into(),
                passed: false,
                message: "ProviderInfo.id must be a non-empty string".into(),
                severity: CheckSeverity::Error,
            });
        } else {
            result.add(ValidationCheck {
                name: "provider_get_info".into(),
                passed: true,
                message: "Provider.get_info() returns a usable ProviderInfo".into(),
                severity: CheckSeverity::Info,
            });
        }

        match provider.list_models().await {
            Ok(models) => result.add(ValidationCheck {
                name: "provider_list_models".into(),
                passed: true,
                message: format!("Provider.list_models() returned {} model(s)", models.len()),
                severity: CheckSeverity::Info,
            }),
            Err(e) => result.add(ValidationCheck {
                name: "provider_list_models".into(),
                passed: false,
                message: format!("Provider.list_models() failed: {e}"),
                severity: CheckSeverity::Warning,
            }),
        }

        result
    }
}
