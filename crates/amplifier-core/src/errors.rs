//! Error types for the Amplifier kernel.
//!
//! This module defines the full error taxonomy:
//!
//! - [`AmplifierError`] — top-level enum wrapping all component errors
//! - [`ProviderError`] — maps to the Python `LLMError` hierarchy (8 variants)
//! - [`SessionError`] — session lifecycle errors
//! - [`HookError`] — hook dispatch errors
//! - [`ToolError`] — tool execution errors
//!
//! All types derive `Serialize` so errors can cross the JSON boundary
//! to the PyO3 bridge.

use serde::Serialize;

// -- ProviderError --

/// LLM provider error taxonomy.
///
/// Maps 1:1 to Python's `llm_errors.py` hierarchy:
///
/// | Python class              | Rust variant             |
/// |---------------------------|--------------------------|
/// | `LLMError`                | `ProviderError::Other`   |
/// | `RateLimitError`          | `ProviderError::RateLimit` |
/// | `AuthenticationError`     | `ProviderError::Authentication` |
/// | `ContextLengthError`      | `ProviderError::ContextLength` |
/// | `ContentFilterError`      | `ProviderError::ContentFilter` |
/// | `InvalidRequestError`     | `ProviderError::InvalidRequest` |
/// | `ProviderUnavailableError`| `ProviderError::Unavailable` |
/// | `LLMTimeoutError`         | `ProviderError::Timeout` |
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ProviderError {
    /// Provider rate limit exceeded (HTTP 429 or equivalent).
    /// Retryable by default.
    #[error("{message}")]
    RateLimit {
        message: String,
        provider: Option<String>,
        retry_after: Option<f64>,
    },

    /// Invalid or missing API credentials (HTTP 401/403).
    #[error("{message}")]
    Authentication {
        message: String,
        provider: Option<String>,
    },

    /// Request exceeds the model's context window.
    #[error("{message}")]
    ContextLength {
        message: String,
        provider: Option<String>,
    },

    /// Content blocked by the provider's safety filter.
    #[error("{message}")]
    ContentFilter {
        message: String,
        provider: Option<String>,
    },

    /// Malformed request rejected by the provider (HTTP 400/422).
    #[error("{message}")]
    InvalidRequest {
        message: String,
        provider: Option<String>,
    },

    /// Provider service unavailable (HTTP 5xx, network error).
    /// Retryable by default.
    #[error("{message}")]
    Unavailable {
        message: String,
        provider: Option<String>,
        status_code: Option<u16>,
    },

    /// Request timed out before the provider responded.
    /// Retryable by default.
    #[error("{message}")]
    Timeout {
        message: String,
        provider: Option<String>,
    },

    /// Generic LLM error (maps to Python's base `LLMError`).
    #[error("{message}")]
    Other {
        message: String,
        provider: Option<String>,
        status_code: Option<u16>,
        retryable: bool,
    },
}

impl ProviderError {
    /// Whether the caller should consider retrying the request.
    ///
    /// Matches Python defaults: `RateLimit`, `Unavailable`, and `Timeout`
    /// are retryable by default. `Other` carries an explicit flag.
    pub fn retryable(&self) -> bool {
        match self {
            Self::RateLimit { .. } => true,
            Self::Unavailable { .. } => true,
            Self::Timeout { .. } => true,
            Self::Other { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Seconds to wait before retrying, if available.
    ///
    /// Only `RateLimit` carries this field (parsed from the provider's
    /// `Retry-After` header).
    pub fn retry_after(&self) -> Option<f64> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

// -- SessionError --

/// Session lifecycle errors.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum SessionError {
    /// Session has not been initialized yet.
    #[error("session not initialized")]
    NotInitialized,

    /// A required configuration field is missing.
    #[error("missing required config: {field}")]
    ConfigMissing { field: String },

    /// Session has already completed.
    #[error("session already completed")]
    AlreadyCompleted,

    /// No session directory matches the given id.
    #[error("session '{session_id}' not found")]
    NotFound { session_id: String },

    /// Session id failed validation (empty, path traversal, etc.).
    #[error("invalid session id: {session_id}")]
    InvalidId { session_id: String },

    /// A partial id prefix matched more than one session.
    #[error("ambiguous session id '{partial_id}' matches {matches} sessions")]
    Ambiguous { partial_id: String, matches: usize },

    /// A named agent has no entry in the spawner's agent configuration map.
    #[error("agent '{agent_name}' not found in configuration")]
    AgentNotFound { agent_name: String },

    /// Catch-all for other session errors.
    #[error("{message}")]
    Other { message: String },
}

// -- HookError --

/// Hook dispatch errors.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum HookError {
    /// A hook handler failed during dispatch.
    #[error("hook handler failed: {message}")]
    HandlerFailed {
        message: String,
        handler_name: Option<String>,
    },

    /// Hook dispatch timed out.
    #[error("hook dispatch timeout")]
    Timeout,

    /// Catch-all for other hook errors.
    #[error("{message}")]
    Other { message: String },
}

// -- ToolError --

/// Tool execution errors.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ToolError {
    /// Tool execution failed.
    #[error("tool execution failed: {message}")]
    ExecutionFailed {
        message: String,
        stdout: Option<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    /// Requested tool was not found.
    #[error("tool not found: {name}")]
    NotFound { name: String },

    /// Catch-all for other tool errors.
    #[error("{message}")]
    Other { message: String },
}

// -- ContextError --

/// Context management errors.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ContextError {
    /// Context compaction failed.
    #[error("context compaction failed: {message}")]
    CompactionFailed { message: String },

    /// Catch-all for other context errors.
    #[error("{message}")]
    Other { message: String },
}

// -- ModuleValidationError --

/// Raised when a module fails type-specific validation before mounting.
///
/// Message format matches the Python kernel:
/// `Module '<id>' failed validation: {summary}. Errors: {details}`.
#[derive(Debug, thiserror::Error, Serialize)]
#[error("Module '{module_id}' failed validation: {summary}. Errors: {details}")]
pub struct ModuleValidationError {
    pub module_id: String,
    pub summary: String,
    pub details: String,
}

// -- BundleError --

/// Bundle discovery, fetch, and composition errors.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum BundleError {
    /// No bundle found with the given name.
    #[error("bundle not found: {name}")]
    NotFound { name: String },

    /// An `include` entry could not be resolved (cycle or missing target).
    #[error("failed to resolve include '{include}': {message}")]
    IncludeUnresolved { include: String, message: String },

    /// Remote bundle fetch failed (network error, bad digest, etc.).
    #[error("failed to fetch bundle '{name}': {message}")]
    FetchFailed { name: String, message: String },

    /// Bundle manifest failed schema/semantic validation.
    #[error(transparent)]
    Validation(#[from] BundleValidationError),

    /// Catch-all for other bundle errors.
    #[error("{message}")]
    Other { message: String },
}

/// A bundle manifest failed validation before preparation.
#[derive(Debug, thiserror::Error, Serialize)]
#[error("bundle '{bundle_name}' failed validation: {message}")]
pub struct BundleValidationError {
    pub bundle_name: String,
    pub message: String,
}

// -- ScopeNotAvailableError --

/// A settings scope's backing directory could not be resolved (e.g. no
/// project root found for the `project`/`local` scopes, or `$HOME` unset
/// for the `global` scope).
#[derive(Debug, thiserror::Error, Serialize)]
#[error("settings scope '{scope}' is not available: {message}")]
pub struct ScopeNotAvailableError {
    pub scope: String,
    pub message: String,
}

// -- IoError --

/// Wraps a filesystem failure (settings write, bundle cache, install-state
/// persistence). `std::io::Error` itself isn't `Serialize`, so the message
/// is captured at the point of conversion.
#[derive(Debug, thiserror::Error, Serialize)]
#[error("I/O error: {message}")]
pub struct IoError {
    pub message: String,
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

// -- JsonError --

/// Wraps a JSON (de)serialization failure (transcript line, metadata
/// document, session metadata shape). `serde_json::Error` isn't
/// `Serialize`, so its message is captured at the point of conversion.
#[derive(Debug, thiserror::Error, Serialize)]
#[error("JSON error: {message}")]
pub struct JsonError {
    pub message: String,
}

impl From<serde_json::Error> for JsonError {
    fn from(err: serde_json::Error) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for AmplifierError {
    fn from(err: serde_json::Error) -> Self {
        JsonError::from(err).into()
    }
}

// -- ApprovalTimeoutError --

/// No approval response was received within the allotted timeout.
#[derive(Debug, thiserror::Error, Serialize)]
#[error("approval request timed out after {timeout}s: {prompt}")]
pub struct ApprovalTimeoutError {
    pub prompt: String,
    pub timeout: f64,
}

// -- AmplifierError --

/// Top-level error enum wrapping all component errors.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum AmplifierError {
    /// An LLM provider error.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A session lifecycle error.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A hook dispatch error.
    #[error(transparent)]
    Hook(#[from] HookError),

    /// A tool execution error.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// A context management error.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// A module failed validation before mounting.
    #[error(transparent)]
    ModuleValidation(#[from] ModuleValidationError),

    /// A bundle could not be discovered, fetched, or composed.
    #[error(transparent)]
    Bundle(#[from] BundleError),

    /// A settings scope's directory could not be resolved.
    #[error(transparent)]
    ScopeNotAvailable(#[from] ScopeNotAvailableError),

    /// An approval request timed out with no configured default applied yet.
    #[error(transparent)]
    ApprovalTimeout(#[from] ApprovalTimeoutError),

    /// A filesystem operation failed (settings write, cache, install state).
    #[error(transparent)]
    Io(#[from] IoError),

    /// A JSON document failed to (de)serialize.
    #[error(transparent)]
    Json(#[from] JsonError),
}

impl From<std::io::Error> for AmplifierError {
    fn from(err: std::io::Error) -> Self {
        IoError::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_error_default_not_retryable() {
        let err = ProviderError::Authentication {
            message: "bad key".into(),
            provider: Some("anthropic".into()),
        };
        assert!(!err.retryable());
    }

    #[test]
    fn rate_limit_error_is_retryable() {
        let err = ProviderError::RateLimit {
            message: "429".into(),
            provider: Some("openai".into()),
            retry_after: Some(1.5),
        };
        assert!(err.retryable());
        assert_eq!(err.retry_after(), Some(1.5));
    }

    #[test]
    fn provider_unavailable_is_retryable() {
        let err = ProviderError::Unavailable {
            message: "503".into(),
            provider: None,
            status_code: Some(503),
        };
        assert!(err.retryable());
    }

    #[test]
    fn timeout_is_retryable() {
        let err = ProviderError::Timeout {
            message: "timed out".into(),
            provider: Some("gemini".into()),
        };
        assert!(err.retryable());
    }

    #[test]
    fn amplifier_error_wraps_provider_error() {
        let inner = ProviderError::RateLimit {
            message: "429".into(),
            provider: None,
            retry_after: None,
        };
        let outer = AmplifierError::Provider(inner);
        assert!(matches!(outer, AmplifierError::Provider(_)));
    }

    #[test]
    fn session_error_display() {
        let err = SessionError::NotInitialized;
        assert_eq!(err.to_string(), "session not initialized");
    }

    #[test]
    fn module_validation_error_message_format() {
        let err = ModuleValidationError {
            module_id: "bash-tool".into(),
            summary: "FAILED: 1/2 checks passed (1 errors, 0 warnings)".into(),
            details: "missing execute()".into(),
        };
        assert_eq!(
            err.to_string(),
            "Module 'bash-tool' failed validation: FAILED: 1/2 checks passed (1 errors, 0 warnings). Errors: missing execute()"
        );
    }

    #[test]
    fn bundle_error_wraps_validation_error() {
        let inner = BundleValidationError {
            bundle_name: "my-bundle".into(),
            message: "missing required field 'modules'".into(),
        };
        let outer = BundleError::from(inner);
        assert!(matches!(outer, BundleError::Validation(_)));
    }

    #[test]
    fn scope_not_available_error_display() {
        let err = ScopeNotAvailableError {
            scope: "project".into(),
            message: "no project root found".into(),
        };
        assert!(err.to_string().contains("project"));
    }

    #[test]
    fn amplifier_error_wraps_bundle_error() {
        let inner = BundleError::NotFound {
            name: "missing-bundle".into(),
        };
        let outer = AmplifierError::from(inner);
        assert!(matches!(outer, AmplifierError::Bundle(_)));
    }

    #[test]
    fn errors_are_serializable() {
        let err = ProviderError::RateLimit {
            message: "429".into(),
            provider: Some("openai".into()),
            retry_after: Some(2.0),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("429"));
    }
}
