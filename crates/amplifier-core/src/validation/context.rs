//! Context manager module validator.
//!
//! As with [`super::tool`] and [`super::provider`], `Arc<dyn ContextManager>`
//! already guarantees protocol compliance. What this validator checks is
//! behavioral sanity: a freshly mounted context manager should start empty,
//! accept a message, and return it back out again.

use std::sync::Arc;

use serde_json::json;

use crate::models::{CheckSeverity, ModuleType, ValidationCheck, ValidationResult};
use crate::traits::ContextManager;

/// Validates a mounted [`ContextManager`] instance.
pub struct ContextValidator;

impl Default for ContextValidator {
    fn default() -> Self {
        Self
    }
}

impl ContextValidator {
    pub fn new() -> Self {
        Self
    }

    pub async fn validate(
        &self,
        module_path: &str,
        context: &Arc<dyn ContextManager>,
    ) -> ValidationResult {
        let mut result = ValidationResult::new(ModuleType::Context, module_path);

        match context.get_messages().await {
            Ok(messages) => result.add(ValidationCheck {
                name: "context_get_messages".into(),
                passed: true,
                message: format!("ContextManager.get_messages() returned {} message(s)", messages.len()),
                severity: CheckSeverity::Info,
            }),
            Err(e) => {
                result.add(ValidationCheck {
                    name: "context_get_messages".into(),
                    passed: false,
                    message: format!("ContextManager.get_messages() failed: {e}"),
                    severity: CheckSeverity::Error,
                });
                return result;
            }
        }

        let probe = json!({"role": "user", "content": "__validation_probe__"});
        match context.add_message(probe).await {
            Ok(()) => result.add(ValidationCheck {
                name: "context_add_message".into(),
                passed: true,
                message: "ContextManager.add_message() accepted a probe message".into(),
                severity: CheckSeverity::Info,
            }),
            Err(e) => result.add(ValidationCheck {
                name: "context_add_message".into(),
                passed: false,
                message: format!("ContextManager.add_message() failed: {e}"),
                severity: CheckSeverity::Error,
            }),
        }

        match context.get_messages_for_request(None, None).await {
            Ok(_) => result.add(ValidationCheck {
                name: "context_get_messages_for_request".into(),
                passed: true,
                message: "ContextManager.get_messages_for_request() succeeded with no budget"
                    .into(),
                severity: CheckSeverity::Info,
            }),
            Err(e) => result.add(ValidationCheck {
                name: "context_get_messages_for_request".into(),
                passed: false,
                message: format!("ContextManager.get_messages_for_request() failed: {e}"),
                severity: CheckSeverity::Error,
            }),
        }

        if let Err(e) = context.clear().await {
            result.add(ValidationCheck {
                name: "context_clear".into(),
                passed: false,
                message: format!("ContextManager.clear() failed: {e}"),
                severity: CheckSeverity::Error,
            });
        } else {
            result.add(ValidationCheck {
                name: "context_clear".into(),
                passed: true,
                message: "ContextManager.clear() succeeded".into(),
                severity: CheckSeverity::Info,
            });
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeContextManager;

    #[tokio::test]
    async fn accepts_well_behaved_context_manager() {
        let context: Arc<dyn ContextManager> = Arc::new(FakeContextManager::new());
        let result = ContextValidator::new()
            .validate("context-simple", &context)
            .await;
        assert!(result.passed(), "{}", result.summary());
    }
}
