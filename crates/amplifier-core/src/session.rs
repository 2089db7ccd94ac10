//! AmplifierSession — lifecycle management for agent sessions.
//!
//! The session is the top-level entry point: create → initialize → execute → cleanup.
//! It owns a [`Coordinator`] and manages session identity, status tracking,
//! and event emission.
//!
//! # Design
//!
//! The Python `AmplifierSession` handles both module loading (via `ModuleLoader`)
//! and runtime lifecycle. In Rust, module loading stays in Python (via the PyO3
//! bridge). The Rust session provides the runtime lifecycle after modules are
//! mounted externally.
//!
//! # Connections
//!
//! - Owns a [`Coordinator`](crate::coordinator::Coordinator) for module access.
//! - Emits lifecycle events via [`HookRegistry`](crate::hooks::HookRegistry), with
//!   `:debug`/`:raw` tiers gated by `session.debug`/`session.raw_debug` config.
//! - Tracks status via [`SessionState`](crate::models::SessionState); emits
//!   `cancel:completed` whenever a turn observes the cancellation token
//!   tripped, and `session:end` only once at least one turn has executed.
//! - Carries a `trace_id` shared by an entire spawn chain (see
//!   [`crate::session_spawner`]); children emit `session:fork` once, at
//!   first-turn initialization.

use std::collections::HashMap;

use std::sync::Arc;

use serde_json::Value;

use crate::coordinator::Coordinator;
use crate::errors::{AmplifierError, SessionError};
use crate::events;
use crate::models::SessionState;
use crate::traits::{ApprovalProvider, DisplaySystem};
use crate::utils::{redact_secrets, truncate_values};

/// `:debug` event payloads truncate string leaves beyond this length.
const DEBUG_TRUNCATE_LEN: usize = 180;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for creating an `AmplifierSession`.
///
/// Mirrors the Python config dict with validation for required fields.
#[derive(Debug)]
pub struct SessionConfig {
    /// Full session configuration (the "mount plan").
    pub config: HashMap<String, Value>,
}

impl SessionConfig {
    /// Create a `SessionConfig` from a JSON value, validating required fields.
    ///
    /// Requires `session.orchestrator` and `session.context` to be present.
    pub fn from_value(value: Value) -> Result<Self, SessionError> {
        let obj = match value.as_object() {
            Some(o) => o,
            None => {
                return Err(SessionError::ConfigMissing {
                    field: "config must be a JSON object".into(),
                });
            }
        };

        let session = obj
            .get("session")
            .and_then(|v| v.as_object());

        let has_orchestrator = session
            .and_then(|s| s.get("orchestrator"))
            .is_some();

        if !has_orchestrator {
            return Err(SessionError::ConfigMissing {
                field: "session.orchestrator".into(),
            });
        }

        let has_context = session
            .and_then(|s| s.get("context"))
            .is_some();

        if !has_context {
            return Err(SessionError::ConfigMissing {
                field: "session.context".into(),
            });
        }

        let config: HashMap<String, Value> = obj
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self { config })
    }

    /// Create a minimal config for testing.
    ///
    /// Sets `session.orchestrator` and `session.context` to the given values.
    pub fn minimal(orchestrator: &str, context: &str) -> Self {
        let mut config = HashMap::new();
        config.insert(
            "session".into(),
            serde_json::json!({
                "orchestrator": orchestrator,
                "context": context,
            }),
        );
        Self { config }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// An Amplifier session managing the lifecycle of an agent execution.
///
/// # Lifecycle
///
/// 1. **Create** — `Session::new(config, session_id, parent_id)`
/// 2. **Mount modules** — caller mounts orchestrator, context, providers, tools
///    on `coordinator_mut()`
/// 3. **Mark initialized** — `set_initialized()` (or auto-init on execute)
/// 4. **Execute** — `execute(prompt)` runs the orchestrator loop
/// 5. **Cleanup** — `cleanup()` runs cleanup functions
///
/// # Example
///
/// ```rust
/// use amplifier_core::session::{Session, SessionConfig};
///
/// let config = SessionConfig::minimal("loop-basic", "context-simple");
/// let session = Session::new(config, None, None);
/// assert!(!session.session_id().is_empty());
/// ```
pub struct Session {
    session_id: String,
    parent_id: Option<String>,
    trace_id: String,
    coordinator: Coordinator,
    initialized: bool,
    status: SessionState,
    is_resumed: bool,
    fork_emitted: bool,
    /// Number of `execute()` calls that reached the orchestrator. Gates
    /// `session:end` in [`Session::cleanup`]: no turn, no event.
    turn_count: u64,
}

impl Session {
    /// Create a new session.
    ///
    /// # Arguments
    ///
    /// * `config` — Session configuration (mount plan).
    /// * `session_id` — Optional session ID. If `None`, a UUID v4 is generated.
    /// * `parent_id` — Optional parent session ID (for child/forked sessions).
    pub fn new(
        config: SessionConfig,
        session_id: Option<String>,
        parent_id: Option<String>,
    ) -> Self {
        let id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let coordinator = Coordinator::new(config.config);

        // Set default fields for all hook events
        coordinator.hooks().set_default_fields(serde_json::json!({
            "session_id": id,
            "parent_id": parent_id,
        }));

        Self {
            trace_id: id.clone(),
            session_id: id,
            parent_id,
            coordinator,
            initialized: false,
            status: SessionState::Running,
            is_resumed: false,
            fork_emitted: false,
            turn_count: 0,
        }
    }

    /// Create a session that is marked as resumed (emits session:resume instead of session:start).
    pub fn new_resumed(
        config: SessionConfig,
        session_id: String,
        parent_id: Option<String>,
    ) -> Self {
        let mut session = Self::new(config, Some(session_id), parent_id);
        session.is_resumed = true;
        session
    }

    /// Create a session with an inherited approval/display system, the
    /// way a spawned sub-session inherits its parent's UX systems rather
    /// than prompting the user twice.
    pub fn new_with_ux(
        config: SessionConfig,
        session_id: Option<String>,
        parent_id: Option<String>,
        approval_system: Option<Arc<dyn ApprovalProvider>>,
        display_system: Option<Arc<dyn DisplaySystem>>,
    ) -> Self {
        let id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut coordinator = Coordinator::new_with_session(id.clone(), parent_id.clone(), config.config);
        if let Some(approval) = approval_system {
            coordinator = coordinator.with_approval_system(approval);
        }
        if let Some(display) = display_system {
            coordinator = coordinator.with_display_system(display);
        }
        coordinator.hooks().set_default_fields(serde_json::json!({
            "session_id": id,
            "parent_id": parent_id,
        }));

        Self {
            trace_id: id.clone(),
            session_id: id,
            parent_id,
            coordinator,
            initialized: false,
            status: SessionState::Running,
            is_resumed: false,
            fork_emitted: false,
            turn_count: 0,
        }
    }

    /// Overrides the trace id, used when spawning or resuming a child
    /// session so the whole delegation chain shares the root's trace id
    /// instead of each hop minting its own.
    pub fn with_trace_id(mut self, trace_id: String) -> Self {
        self.trace_id = trace_id;
        self
    }

    /// The session ID.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The parent session ID (if this is a child session).
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// The trace id shared across an entire spawn chain. Defaults to the
    /// session's own id for top-level sessions; a spawned child inherits
    /// its parent's trace id via [`Session::with_trace_id`].
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Current session status as a string (matching Python's status field).
    pub fn status(&self) -> &str {
        match &self.status {
            SessionState::Running => "running",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
            SessionState::Cancelled => "cancelled",
        }
    }

    /// Current session state enum.
    pub fn state(&self) -> &SessionState {
        &self.status
    }

    /// Whether the session has been initialized.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Immutable reference to the coordinator.
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Mutable reference to the coordinator (for mounting modules).
    pub fn coordinator_mut(&mut self) -> &mut Coordinator {
        &mut self.coordinator
    }

    /// Mark the session as initialized.
    ///
    /// In the Rust kernel, module loading is done externally (by the Python
    /// bridge or test harness). This method marks the session ready for
    /// execution after modules have been mounted.
    pub fn set_initialized(&mut self) {
        self.initialized = true;
    }

    /// Clear the initialized flag (used during cleanup).
    ///
    /// After cleanup, the session is no longer ready for execution.
    pub fn clear_initialized(&mut self) {
        self.initialized = false;
    }

    fn debug_enabled(&self) -> bool {
        self.coordinator
            .config()
            .get("session")
            .and_then(|s| s.get("debug"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    fn raw_debug_enabled(&self) -> bool {
        self.coordinator
            .config()
            .get("session")
            .and_then(|s| s.get("raw_debug"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Emits `base`, then (gated by `session.debug`/`session.raw_debug`
    /// config) the `:debug` (redacted + truncated at 180 chars) and
    /// `:raw` (redacted only) tiers of the same event.
    async fn emit_tiered(&self, base: &str, debug_event: &str, raw_event: &str, payload: Value) {
        self.coordinator.hooks().emit(base, payload.clone()).await;
        if self.debug_enabled() {
            let redacted = redact_secrets(&payload);
            let truncated = truncate_values(&redacted, DEBUG_TRUNCATE_LEN);
            self.coordinator.hooks().emit(debug_event, truncated).await;
        }
        if self.raw_debug_enabled() {
            let redacted = redact_secrets(&payload);
            self.coordinator.hooks().emit(raw_event, redacted).await;
        }
    }

    /// Execute a prompt using the mounted orchestrator.
    ///
    /// Auto-emits `session:start` (or `session:resume`) event, then delegates
    /// to the orchestrator. Tracks status transitions on success, failure,
    /// or cancellation, emitting `cancel:completed` whenever the cancellation
    /// token was observed tripped on return.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotInitialized` if not initialized
    /// - `SessionError::Other("No orchestrator mounted")` if no orchestrator
    /// - `SessionError::Other("No context manager mounted")` if no context
    /// - `SessionError::Other("No providers mounted")` if providers map is empty
    /// - Any `AmplifierError` from the orchestrator
    pub async fn execute(&mut self, prompt: &str) -> Result<String, AmplifierError> {
        if !self.initialized {
            return Err(AmplifierError::Session(SessionError::NotInitialized));
        }

        // Children emit session:fork once, at first-turn initialization,
        // in addition to (not instead of) the per-turn start/resume event.
        if self.parent_id.is_some() && !self.fork_emitted {
            self.emit_tiered(
                events::SESSION_FORK,
                events::SESSION_FORK_DEBUG,
                events::SESSION_FORK_RAW,
                serde_json::json!({
                    "session_id": self.session_id,
                    "parent": self.parent_id,
                }),
            )
            .await;
            self.fork_emitted = true;
        }

        // Emit lifecycle event
        let (event, debug_event, raw_event) = if self.is_resumed {
            (events::SESSION_RESUME, events::SESSION_RESUME_DEBUG, events::SESSION_RESUME_RAW)
        } else {
            (events::SESSION_START, events::SESSION_START_DEBUG, events::SESSION_START_RAW)
        };

        self.emit_tiered(
            event,
            debug_event,
            raw_event,
            serde_json::json!({
                "session_id": self.session_id,
                "parent_id": self.parent_id,
            }),
        )
        .await;

        // Get orchestrator
        let orchestrator = self.coordinator.orchestrator().ok_or_else(|| {
            AmplifierError::Session(SessionError::Other {
                message: "No orchestrator mounted".into(),
            })
        })?;

        // Get context
        let context = self.coordinator.context().ok_or_else(|| {
            AmplifierError::Session(SessionError::Other {
                message: "No context manager mounted".into(),
            })
        })?;

        // Get providers
        let providers = self.coordinator.providers();
        if providers.is_empty() {
            return Err(AmplifierError::Session(SessionError::Other {
                message: "No providers mounted".into(),
            }));
        }

        // Get tools
        let tools = self.coordinator.tools();

        // Execute orchestrator
        self.status = SessionState::Running;
        self.turn_count += 1;

        match orchestrator
            .execute(
                prompt.to_string(),
                context,
                providers,
                tools,
                serde_json::json!({}), // hooks placeholder (serialised)
                serde_json::json!({}), // coordinator placeholder (serialised)
            )
            .await
        {
            Ok(result) => {
                // Check cancellation
                if self.coordinator.cancellation().is_cancelled() {
                    self.status = SessionState::Cancelled;
                    self.emit_cancel_completed(None).await;
                } else {
                    self.status = SessionState::Completed;
                }
                Ok(result)
            }
            Err(e) => {
                if self.coordinator.cancellation().is_cancelled() {
                    self.status = SessionState::Cancelled;
                    self.emit_cancel_completed(Some(e.to_string())).await;
                } else {
                    self.status = SessionState::Failed;
                }
                Err(e)
            }
        }
    }

    /// Emits `cancel:completed` once a turn observes the cancellation token
    /// tripped, carrying whether it was an immediate (vs. graceful) stop and
    /// the error the orchestrator returned, if any.
    async fn emit_cancel_completed(&self, error: Option<String>) {
        self.coordinator
            .hooks()
            .emit(
                events::CANCEL_COMPLETED,
                serde_json::json!({
                    "session_id": self.session_id,
                    "was_immediate": self.coordinator.cancellation().is_immediate(),
                    "error": error,
                }),
            )
            .await;
    }

    /// Clean up session resources.
    ///
    /// Emits `session:end` (only if at least one turn was executed) and
    /// runs all cleanup functions registered on the coordinator.
    pub async fn cleanup(&self) {
        if self.turn_count > 0 {
            self.coordinator
                .hooks()
                .emit(
                    events::SESSION_END,
                    serde_json::json!({
                        "session_id": self.session_id,
                        "status": self.status(),
                    }),
                )
                .await;
        }

        // Run coordinator cleanup
        self.coordinator.cleanup().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
