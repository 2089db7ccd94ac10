//! ModuleCoordinator — central coordination hub for the Amplifier kernel.
//!
//! The coordinator holds mount points for all module types, a capability
//! registry for inter-module communication, contribution channels for
//! data aggregation, cleanup functions, and the hook/cancellation subsystems.
//!
//! # Design
//!
//! The Python `ModuleCoordinator` uses dynamic typing extensively. In Rust
//! we use typed fields for the four primary module slots (orchestrator,
//! context, providers, tools) and typed accessor methods. Capabilities
//! are stored as `serde_json::Value` for maximum flexibility.
//!
//! # Connections
//!
//! - Holds a [`HookRegistry`](crate::hooks::HookRegistry) for event dispatch.
//! - Holds a [`CancellationToken`](crate::cancellation::CancellationToken)
//!   for cooperative cancellation.
//! - Stores modules as `Arc<dyn Trait>` from [`crate::traits`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::cancellation::CancellationToken;
use crate::errors::AmplifierError;
use crate::events;
use crate::hooks::HookRegistry;
use crate::models::{ApprovalDefault, ApprovalRequest, HookAction, HookResult, UserMessageLevel};
use crate::traits::{
    ApprovalProvider, ContextManager, DisplaySystem, ModuleSourceResolver, Orchestrator, Provider,
    Tool,
};

// ---------------------------------------------------------------------------
// Type aliases for cleanup and contributor callbacks
// ---------------------------------------------------------------------------

/// An async cleanup function: `() -> Future<Output = ()>`.
pub type CleanupFn = Box<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// An async contributor callback: `() -> Future<Output = Result<Value, ...>>`.
pub type ContributorCallback = Box<
    dyn Fn() -> Pin<Box<dyn Future<Output = Result<Value, Box<dyn std::error::Error + Send + Sync>>> + Send>>
        + Send
        + Sync,
>;

/// A registered contributor with name and callback.
struct ContributorEntry {
    name: String,
    callback: ContributorCallback,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Central coordination hub for module mount points, capabilities, and services.
///
/// Holds the four primary module slots (orchestrator, context manager,
/// providers, tools), plus the hook registry and cancellation token.
///
/// # Example
///
/// ```rust
/// use amplifier_core::coordinator::Coordinator;
///
/// let coord = Coordinator::new(Default::default());
/// assert!(coord.tools().is_empty());
/// ```
pub struct Coordinator {
    // -- Module mount points (typed) --
    orchestrator: Mutex<Option<Arc<dyn Orchestrator>>>,
    context: Mutex<Option<Arc<dyn ContextManager>>>,
    providers: Mutex<HashMap<String, Arc<dyn Provider>>>,
    tools: Mutex<HashMap<String, Arc<dyn Tool>>>,
    /// Agent definitions. Unlike the other mount points, agents are
    /// app-layer data (prompts/overlay config), not loaded modules, so
    /// they are stored as opaque `Value`s rather than `Arc<dyn Trait>`.
    agents: Mutex<HashMap<String, Value>>,
    module_source_resolver: Mutex<Option<Arc<dyn ModuleSourceResolver>>>,

    // -- Subsystems --
    hooks: HookRegistry,
    cancellation: CancellationToken,

    // -- UX services (optional; absence is handled gracefully) --
    approval_system: Option<Arc<dyn ApprovalProvider>>,
    display_system: Option<Arc<dyn DisplaySystem>>,

    // -- Capabilities & contributions --
    capabilities: Mutex<HashMap<String, Value>>,
    channels: Mutex<HashMap<String, Vec<ContributorEntry>>>,

    // -- Cleanup --
    cleanup_functions: Mutex<Vec<CleanupFn>>,

    // -- Session identity & config --
    session_id: String,
    parent_id: Option<String>,
    config: HashMap<String, Value>,

    // -- Turn tracking --
    current_turn_injections: Mutex<usize>,
}

impl Coordinator {
    /// Create a new coordinator with the given session config.
    pub fn new(config: HashMap<String, Value>) -> Self {
        Self::new_with_session(uuid::Uuid::new_v4().to_string(), None, config)
    }

    /// Create a coordinator bound to a specific session/parent id.
    ///
    /// Mirrors the Python `ModuleCoordinator(session=...)` constructor,
    /// which reads `session.session_id` / `session.parent_id` lazily via
    /// properties. Rust has no such back-reference, so the session hands
    /// its identity to the coordinator directly at construction.
    pub fn new_with_session(
        session_id: String,
        parent_id: Option<String>,
        config: HashMap<String, Value>,
    ) -> Self {
        Self {
            orchestrator: Mutex::new(None),
            context: Mutex::new(None),
            providers: Mutex::new(HashMap::new()),
            tools: Mutex::new(HashMap::new()),
            agents: Mutex::new(HashMap::new()),
            module_source_resolver: Mutex::new(None),
            hooks: HookRegistry::new(),
            cancellation: CancellationToken::new(),
            approval_system: None,
            display_system: None,
            capabilities: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            cleanup_functions: Mutex::new(Vec::new()),
            session_id,
            parent_id,
            config,
            current_turn_injections: Mutex::new(0),
        }
    }

    /// Create a coordinator with empty config (convenience for tests).
    pub fn new_for_test() -> Self {
        Self::new(HashMap::new())
    }

    /// Attach an approval system (builder-style). No-op if already set.
    pub fn with_approval_system(mut self, approval_system: Arc<dyn ApprovalProvider>) -> Self {
        self.approval_system = Some(approval_system);
        self
    }

    /// Attach a display system (builder-style).
    pub fn with_display_system(mut self, display_system: Arc<dyn DisplaySystem>) -> Self {
        self.display_system = Some(display_system);
        self
    }

    /// The mounted approval system, if any. Used to hand the same
    /// approval provider down to a spawned child session.
    pub fn approval_system(&self) -> Option<Arc<dyn ApprovalProvider>> {
        self.approval_system.clone()
    }

    /// The mounted display system, if any. Used to hand the same
    /// display system down to a spawned child session.
    pub fn display_system(&self) -> Option<Arc<dyn DisplaySystem>> {
        self.display_system.clone()
    }

    // -- Session identity --

    /// This session's unique id.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Parent session id, if this is a spawned child.
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    // -- Module mount/get: Orchestrator --

    /// Set the orchestrator module (single slot).
    pub fn set_orchestrator(&self, orchestrator: Arc<dyn Orchestrator>) {
        *self.orchestrator.lock().unwrap() = Some(orchestrator);
    }

    /// Get the orchestrator module, if mounted.
    pub fn orchestrator(&self) -> Option<Arc<dyn Orchestrator>> {
        self.orchestrator.lock().unwrap().clone()
    }

    // -- Module mount/get: ContextManager --

    /// Set the context manager module (single slot).
    pub fn set_context(&self, context: Arc<dyn ContextManager>) {
        *self.context.lock().unwrap() = Some(context);
    }

    /// Get the context manager module, if mounted.
    pub fn context(&self) -> Option<Arc<dyn ContextManager>> {
        self.context.lock().unwrap().clone()
    }

    // -- Module mount/get: Providers --

    /// Mount a provider by name.
    pub fn mount_provider(&self, name: &str, provider: Arc<dyn Provider>) {
        self.providers
            .lock()
            .unwrap()
            .insert(name.to_string(), provider);
    }

    /// Get a single provider by name.
    pub fn get_provider(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.lock().unwrap().get(name).cloned()
    }

    /// Get all mounted providers as a snapshot.
    pub fn providers(&self) -> HashMap<String, Arc<dyn Provider>> {
        self.providers.lock().unwrap().clone()
    }

    /// Unmount a provider by name. Returns `true` if it was present.
    pub fn unmount_provider(&self, name: &str) -> bool {
        self.providers.lock().unwrap().remove(name).is_some()
    }

    // -- Module mount/get: Tools --

    /// Mount a tool by name.
    pub fn mount_tool(&self, name: &str, tool: Arc<dyn Tool>) {
        self.tools
            .lock()
            .unwrap()
            .insert(name.to_string(), tool);
    }

    /// Get a single tool by name.
    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.lock().unwrap().get(name).cloned()
    }

    /// Get all mounted tools as a snapshot.
    pub fn tools(&self) -> HashMap<String, Arc<dyn Tool>> {
        self.tools.lock().unwrap().clone()
    }

    /// Unmount a tool by name. Returns `true` if it was present.
    pub fn unmount_tool(&self, name: &str) -> bool {
        self.tools.lock().unwrap().remove(name).is_some()
    }

    // -- Module mount/get: Agents --

    /// Mount an agent definition by name.
    pub fn mount_agent(&self, name: &str, definition: Value) {
        self.agents.lock().unwrap().insert(name.to_string(), definition);
    }

    /// Get a single agent definition by name.
    pub fn get_agent(&self, name: &str) -> Option<Value> {
        self.agents.lock().unwrap().get(name).cloned()
    }

    /// Get all mounted agent definitions as a snapshot.
    pub fn agents(&self) -> HashMap<String, Value> {
        self.agents.lock().unwrap().clone()
    }

    /// Unmount an agent by name. Returns `true` if it was present.
    pub fn unmount_agent(&self, name: &str) -> bool {
        self.agents.lock().unwrap().remove(name).is_some()
    }

    // -- Module mount/get: module-source-resolver --

    /// Set the module source resolver (single slot).
    pub fn set_module_source_resolver(&self, resolver: Arc<dyn ModuleSourceResolver>) {
        *self.module_source_resolver.lock().unwrap() = Some(resolver);
    }

    /// Get the module source resolver, if mounted.
    pub fn module_source_resolver(&self) -> Option<Arc<dyn ModuleSourceResolver>> {
        self.module_source_resolver.lock().unwrap().clone()
    }

    // -- Injection limits --

    /// Per-turn injection budget in (approximate) tokens, read from
    /// `session.injection_budget_per_turn`. `None` means unlimited.
    pub fn injection_budget_per_turn(&self) -> Option<i64> {
        self.config
            .get("session")
            .and_then(|s| s.get("injection_budget_per_turn"))
            .and_then(|v| v.as_i64())
    }

    /// Maximum size in characters for a single injected context message.
    /// `None` means unlimited.
    pub fn injection_size_limit(&self) -> Option<i64> {
        self.config
            .get("session")
            .and_then(|s| s.get("injection_size_limit"))
            .and_then(|v| v.as_i64())
    }

    // -- Subsystem accessors --

    /// Reference to the hook registry.
    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Reference to the cancellation token.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    // -- Config --

    /// Session configuration.
    pub fn config(&self) -> &HashMap<String, Value> {
        &self.config
    }

    // -- Capabilities --

    /// Register a capability (inter-module communication).
    pub fn register_capability(&self, name: &str, value: Value) {
        self.capabilities
            .lock()
            .unwrap()
            .insert(name.to_string(), value);
    }

    /// Get a registered capability.
    pub fn get_capability(&self, name: &str) -> Option<Value> {
        self.capabilities.lock().unwrap().get(name).cloned()
    }

    // -- Contribution channels --

    /// Register a contributor to a named channel.
    ///
    /// # Arguments
    ///
    /// * `channel` — Channel name (e.g., `"observability.events"`).
    /// * `name` — Module name for debugging.
    /// * `callback` — Async callback that returns a `Value` contribution.
    pub fn register_contributor(
        &self,
        channel: &str,
        name: &str,
        callback: ContributorCallback,
    ) {
        let entry = ContributorEntry {
            name: name.to_string(),
            callback,
        };
        self.channels
            .lock()
            .unwrap()
            .entry(channel.to_string())
            .or_default()
            .push(entry);
    }

    /// Collect contributions from a channel.
    ///
    /// Calls each registered contributor and returns non-error results.
    /// Errors in individual contributors are logged and skipped.
    pub async fn collect_contributions(&self, channel: &str) -> Vec<Value> {
        // Snapshot callbacks to avoid holding lock during async calls
        let entries: Vec<(String, _)> = {
            let channels = self.channels.lock().unwrap();
            match channels.get(channel) {
                Some(entries) => entries
                    .iter()
                    .map(|e| {
                        let fut = (e.callback)();
                        (e.name.clone(), fut)
                    })
                    .collect(),
                None => return Vec::new(),
            }
        };

        let mut results = Vec::new();
        for (_name, fut) in entries {
            match fut.await {
                Ok(value) => results.push(value),
                Err(_e) => {
                    // Log and skip, matching Python behaviour
                    continue;
                }
            }
        }
        results
    }

    // -- Cleanup --

    /// Register a cleanup function to be called on shutdown.
    pub fn register_cleanup(&self, cleanup_fn: CleanupFn) {
        self.cleanup_functions.lock().unwrap().push(cleanup_fn);
    }

    /// Run all cleanup functions in reverse registration order.
    ///
    /// Errors in one cleanup function do not prevent subsequent functions
    /// from running (matching Python behaviour).
    pub async fn cleanup(&self) {
        // Take functions out to avoid holding lock during async calls
        let functions: Vec<_> = {
            let mut fns = self.cleanup_functions.lock().unwrap();
            let taken: Vec<_> = fns.drain(..).collect();
            taken
        };

        // Execute in reverse order
        for cleanup_fn in functions.iter().rev() {
            let fut = cleanup_fn();
            if let Err(e) = tokio::task::spawn(fut).await {
                eprintln!("Error during cleanup: {e}");
            }
        }
    }

    // -- Turn management --

    /// Reset per-turn tracking. Call at turn boundaries.
    pub fn reset_turn(&self) {
        *self.current_turn_injections.lock().unwrap() = 0;
        // Note: cancellation is NOT reset here (persists across turns)
    }

    /// Current injection count for this turn.
    pub fn current_turn_injections(&self) -> usize {
        *self.current_turn_injections.lock().unwrap()
    }

    /// Increment the injection counter.
    pub fn increment_injections(&self, count: usize) {
        *self.current_turn_injections.lock().unwrap() += count;
    }

    // -- Cancellation --

    /// Request cancellation of the current turn.
    ///
    /// If the request changes the cancellation state, emits
    /// [`events::CANCEL_REQUESTED`] with the running-tool snapshot, then
    /// triggers any registered cancellation callbacks.
    pub async fn request_cancel(&self, immediate: bool) {
        let changed = if immediate {
            self.cancellation.request_immediate()
        } else {
            self.cancellation.request_graceful()
        };

        if changed {
            let level = if immediate { "immediate" } else { "graceful" };
            let running_tools: Vec<String> =
                self.cancellation.running_tools().into_iter().collect();
            self.hooks
                .emit(
                    events::CANCEL_REQUESTED,
                    serde_json::json!({
                        "level": level,
                        "running_tools": running_tools,
                        "running_tool_names": self.cancellation.running_tool_names(),
                    }),
                )
                .await;
            self.cancellation.trigger_callbacks().await;
        }
    }

    // -- Hook result routing --

    /// Route a [`HookResult`] returned from hook dispatch to its side effect.
    ///
    /// Matches the Python `process_hook_result` routing table:
    ///
    /// 1. `inject_context` with non-empty `context_injection` → inject into
    ///    the context manager (or fail loudly if oversized).
    /// 2. `ask_user` → resolve immediately via the approval system and
    ///    return the approval's own result (short-circuits the rest).
    /// 3. `user_message` set → surface via the display system (or log).
    /// 4. `suppress_output` → logged at debug level only.
    ///
    /// Returns the (possibly unchanged) result, except for `ask_user` where
    /// the approval outcome's `HookResult` is returned instead.
    pub async fn process_hook_result(
        &self,
        result: HookResult,
        event: &str,
        hook_name: &str,
    ) -> Result<HookResult, AmplifierError> {
        if result.action == HookAction::InjectContext && result.context_injection.is_some() {
            if result.ephemeral && result.append_to_last_tool_result {
                self.handle_append_to_last_tool_result(&result).await?;
            } else {
                self.handle_context_injection(&result, hook_name, event)
                    .await?;
            }
        }

        if result.action == HookAction::AskUser {
            return Ok(self.handle_approval_request(&result, hook_name).await);
        }

        if let Some(message) = &result.user_message {
            self.handle_user_message(message, &result, hook_name);
        }

        if result.suppress_output {
            log::debug!("hook '{hook_name}' suppressed output for event '{event}'");
        }

        Ok(result)
    }

    async fn handle_context_injection(
        &self,
        result: &HookResult,
        hook_name: &str,
        event: &str,
    ) -> Result<(), AmplifierError> {
        let content = result.context_injection.clone().unwrap_or_default();

        if let Some(limit) = self.injection_size_limit() {
            if content.len() as i64 > limit {
                return Err(crate::errors::ContextError::Other {
                    message: format!(
                        "context injection from '{hook_name}' exceeds size limit: {} > {limit}",
                        content.len()
                    ),
                }
                .into());
            }
        }

        let tokens = (content.len() / 4) as i64;
        if let Some(budget) = self.injection_budget_per_turn() {
            let current = self.current_turn_injections() as i64;
            if current + tokens > budget {
                log::warn!(
                    "hook '{hook_name}' injection exceeds per-turn budget ({} + {tokens} > {budget}); allowing anyway",
                    current
                );
            }
        }

        self.increment_injections(tokens.max(0) as usize);

        if !result.ephemeral {
            if let Some(context) = self.context() {
                let role = match result.context_injection_role {
                    crate::models::ContextInjectionRole::System => "system",
                    crate::models::ContextInjectionRole::User => "user",
                    crate::models::ContextInjectionRole::Assistant => "assistant",
                };
                context
                    .add_message(serde_json::json!({
                        "role": role,
                        "content": content,
                        "metadata": {
                            "source": "hook",
                            "hook_name": hook_name,
                            "event": event,
                            "timestamp": chrono::Utc::now().to_rfc3339(),
                        }
                    }))
                    .await?;
            }
        }

        log::info!("hook '{hook_name}' injected context for event '{event}'");
        Ok(())
    }

    /// `context_injection` + `ephemeral` + `append_to_last_tool_result`:
    /// append to the last `tool` message in context if one exists,
    /// otherwise insert a new message. Never persisted as its own turn --
    /// this is for patching feedback onto a tool call that already ran.
    async fn handle_append_to_last_tool_result(
        &self,
        result: &HookResult,
    ) -> Result<(), AmplifierError> {
        let content = result.context_injection.clone().unwrap_or_default();
        let Some(context) = self.context() else {
            return Ok(());
        };

        let mut messages = context.get_messages().await?;
        let last_tool_index = messages
            .iter()
            .rposition(|m| m.get("role").and_then(Value::as_str) == Some("tool"));

        match last_tool_index {
            Some(idx) => {
                let existing = messages[idx]
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let merged = format!("{existing}\n{content}");
                if let Some(obj) = messages[idx].as_object_mut() {
                    obj.insert("content".to_string(), Value::String(merged));
                }
                context.set_messages(messages).await?;
            }
            None => {
                context
                    .add_message(serde_json::json!({"role": "tool", "content": content}))
                    .await?;
            }
        }

        Ok(())
    }

    async fn handle_approval_request(&self, result: &HookResult, hook_name: &str) -> HookResult {
        let prompt = result
            .approval_prompt
            .clone()
            .unwrap_or_else(|| format!("Approval requested by '{hook_name}'"));
        let options = result
            .approval_options
            .clone()
            .unwrap_or_else(|| vec!["Allow".to_string(), "Deny".to_string()]);

        log::info!("hook '{hook_name}' requested approval: {prompt}");

        let Some(approval_system) = &self.approval_system else {
            log::error!("ask_user from '{hook_name}' but no approval system is mounted");
            return HookResult {
                action: HookAction::Deny,
                reason: Some("No approval system available".into()),
                ..Default::default()
            };
        };

        let request = ApprovalRequest {
            prompt: prompt.clone(),
            options,
            timeout: result.approval_timeout,
            default: result.approval_default.clone(),
        };

        match approval_system.request_approval(request).await {
            Ok(response) if !response.approved => HookResult {
                action: HookAction::Deny,
                reason: Some(format!("User denied: {prompt}")),
                ..Default::default()
            },
            Ok(_) => HookResult {
                action: HookAction::Continue,
                ..Default::default()
            },
            Err(_) => {
                if result.approval_default == ApprovalDefault::Deny {
                    HookResult {
                        action: HookAction::Deny,
                        reason: Some(format!("Approval timed out: {prompt}")),
                        ..Default::default()
                    }
                } else {
                    HookResult {
                        action: HookAction::Continue,
                        ..Default::default()
                    }
                }
            }
        }
    }

    fn handle_user_message(&self, message: &str, result: &HookResult, hook_name: &str) {
        let source_name = result
            .user_message_source
            .clone()
            .unwrap_or_else(|| hook_name.to_string());
        let level = result.user_message_level.clone();

        match &self.display_system {
            Some(display) => display.show_message(message, level, &format!("hook:{source_name}")),
            None => match level {
                UserMessageLevel::Error => log::error!("[hook:{source_name}] {message}"),
                UserMessageLevel::Warning => log::warn!("[hook:{source_name}] {message}"),
                UserMessageLevel::Info => log::info!("[hook:{source_name}] {message}"),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        FakeContextManager, FakeOrchestrator, FakeProvider, FakeTool,
    };

    // ---------------------------------------------------------------
    // Tool mount/get
    // ---------------------------------------------------------------

    #[test]
    fn mount_and_get_tool() {
        let coord = Coordinator::new_for_test();
        let tool = Arc::new(FakeTool::new("echo", "echoes"));
        coord.mount_tool("echo", tool);
        let retrieved = coord.get_tool("echo").unwrap();
        assert_eq!(retrieved.name(), "echo");
    }

    #[test]
    fn get_tool_returns_none_when_missing() {
        let coord = Coordinator::new_for_test();
        assert!(coord.get_tool("nonexistent").is_none());
    }

    #[test]
    fn get_all_tools_returns_correct_map() {
        let coord = Coordinator::new_for_test();
        let t1 = Arc::new(FakeTool::new("echo", "echoes"));
        let t2 = Arc::new(FakeTool::new("bash", "runs bash"));
        coord.mount_tool("echo", t1);
        coord.mount_tool("bash", t2);

        let all = coord.tools();
        assert_eq!(all.len(), 2);
        assert!(all.contains_key("echo"));
        assert!(all.contains_key("bash"));
    }

    #[test]
    fn unmount_removes_tool() {
        let coord = Coordinator::new_for_test();
        let tool = Arc::new(FakeTool::new("echo", "echoes"));
        coord.mount_tool("echo", tool);
        assert!(coord.get_tool("echo").is_some());

        let removed = coord.unmount_tool("echo");
        assert!(removed);
        assert!(coord.get_tool("echo").is_none());
    }

    #[test]
    fn unmount_nonexistent_returns_false() {
        let coord = Coordinator::new_for_test();
        assert!(!coord.unmount_tool("nonexistent"));
    }

    #[test]
    fn tools_empty_initially() {
        let coord = Coordinator::new_for_test();
        assert!(coord.tools().is_empty());
    }

    // ---------------------------------------------------------------
    // Provider mount/get
    // ---------------------------------------------------------------

    #[test]
    fn mount_and_get_provider() {
        let coord = Coordinator::new_for_test();
        let provider = Arc::new(FakeProvider::new("test", "hi"));
        coord.mount_provider("test", provider);
        let retrieved = coord.get_provider("test").unwrap();
        assert_eq!(retrieved.name(), "test");
    }

    #[test]
    fn get_all_providers() {
        let coord = Coordinator::new_for_test();
        let p1 = Arc::new(FakeProvider::new("openai", "hi"));
        let p2 = Arc::new(FakeProvider::new("anthropic", "hello"));
        coord.mount_provider("openai", p1);
        coord.mount_provider("anthropic", p2);

        let all = coord.providers();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn unmount_provider() {
        let coord = Coordinator::new_for_test();
        let provider = Arc::new(FakeProvider::new("test", "hi"));
        coord.mount_provider("test", provider);
        assert!(coord.unmount_provider("test"));
        assert!(coord.get_provider("test").is_none());
    }

    // ---------------------------------------------------------------
    // Orchestrator and ContextManager (single-slot)
    // ---------------------------------------------------------------

    #[test]
    fn orchestrator_none_initially() {
        let coord = Coordinator::new_for_test();
        assert!(coord.orchestrator().is_none());
    }

    #[test]
    fn set_and_get_orchestrator() {
        let coord = Coordinator::new_for_test();
        let orch = Arc::new(FakeOrchestrator::new("ok"));
        coord.set_orchestrator(orch);
        assert!(coord.orchestrator().is_some());
    }

    #[test]
    fn context_none_initially() {
        let coord = Coordinator::new_for_test();
        assert!(coord.context().is_none());
    }

    #[test]
    fn set_and_get_context() {
        let coord = Coordinator::new_for_test();
        let ctx = Arc::new(FakeContextManager::new());
        coord.set_context(ctx);
        assert!(coord.context().is_some());
    }

    // ---------------------------------------------------------------
    // Config
    // ---------------------------------------------------------------

    #[test]
    fn config_access() {
        let mut config = HashMap::new();
        config.insert(
            "session".into(),
            serde_json::json!({"orchestrator": "loop-basic"}),
        );
        let coord = Coordinator::new(config);
        assert_eq!(
            coord.config().get("session"),
            Some(&serde_json::json!({"orchestrator": "loop-basic"}))
        );
    }

    // ---------------------------------------------------------------
    // Capabilities
    // ---------------------------------------------------------------

    #[test]
    fn capability_registration_and_retrieval() {
        let coord = Coordinator::new_for_test();
        coord.register_capability("feature-x", serde_json::json!(true));
        assert_eq!(
            coord.get_capability("feature-x"),
            Some(serde_json::json!(true))
        );
    }

    #[test]
    fn get_capability_returns_none_when_missing() {
        let coord = Coordinator::new_for_test();
        assert_eq!(coord.get_capability("nonexistent"), None);
    }

    // ---------------------------------------------------------------
    // Contribution channels
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn contribution_channels() {
        let coord = Coordinator::new_for_test();
        coord.register_contributor(
            "events",
            "mod-a",
            Box::new(|| Box::pin(async { Ok(serde_json::json!(["event1", "event2"])) })),
        );
        coord.register_contributor(
            "events",
            "mod-b",
            Box::new(|| Box::pin(async { Ok(serde_json::json!(["event3"])) })),
        );
        let results = coord.collect_contributions("events").await;
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn contribution_empty_channel() {
        let coord = Coordinator::new_for_test();
        let results = coord.collect_contributions("nonexistent").await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn contribution_error_skipped() {
        let coord = Coordinator::new_for_test();
        coord.register_contributor(
            "events",
            "failing",
            Box::new(|| {
                Box::pin(async {
                    Err("contributor failed".into())
                })
            }),
        );
        coord.register_contributor(
            "events",
            "succeeding",
            Box::new(|| Box::pin(async { Ok(serde_json::json!("ok")) })),
        );
        let results = coord.collect_contributions("events").await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0], serde_json::json!("ok"));
    }

    // ---------------------------------------------------------------
    // Cleanup
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn cleanup_runs_in_reverse_order() {
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let coord = Coordinator::new_for_test();

        let o1 = order.clone();
        coord.register_cleanup(Box::new(move || {
            let o = o1.clone();
            Box::pin(async move {
                o.lock().await.push(1);
            })
        }));
        let o2 = order.clone();
        coord.register_cleanup(Box::new(move || {
            let o = o2.clone();
            Box::pin(async move {
                o.lock().await.push(2);
            })
        }));

        coord.cleanup().await;
        assert_eq!(*order.lock().await, vec![2, 1]); // Reverse order
    }

    // ---------------------------------------------------------------
    // Turn management
    // ---------------------------------------------------------------

    #[test]
    fn reset_turn_resets_injection_count() {
        let coord = Coordinator::new_for_test();
        coord.increment_injections(10);
        assert_eq!(coord.current_turn_injections(), 10);
        coord.reset_turn();
        assert_eq!(coord.current_turn_injections(), 0);
    }

    // ---------------------------------------------------------------
    // Hooks and cancellation accessible
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn hooks_accessible() {
        let coord = Coordinator::new_for_test();
        // Emit on hooks — should return Continue with no handlers
        let result = coord
            .hooks()
            .emit("test:event", serde_json::json!({}))
            .await;
        assert_eq!(result.action, crate::models::HookAction::Continue);
    }

    #[test]
    fn cancellation_token_accessible() {
        let coord = Coordinator::new_for_test();
        assert!(!coord.cancellation().is_cancelled());
        coord.cancellation().request_graceful();
        assert!(coord.cancellation().is_graceful());
    }

    // ---------------------------------------------------------------
    // Agents mount point
    // ---------------------------------------------------------------

    #[test]
    fn mount_and_get_agent() {
        let coord = Coordinator::new_for_test();
        coord.mount_agent("reviewer", serde_json::json!({"prompt": "review code"}));
        assert_eq!(
            coord.get_agent("reviewer"),
            Some(serde_json::json!({"prompt": "review code"}))
        );
        assert_eq!(coord.agents().len(), 1);
        assert!(coord.unmount_agent("reviewer"));
        assert!(coord.get_agent("reviewer").is_none());
    }

    // ---------------------------------------------------------------
    // Session identity
    // ---------------------------------------------------------------

    #[test]
    fn session_identity_from_constructor() {
        let coord = Coordinator::new_with_session(
            "sess-1".into(),
            Some("parent-1".into()),
            HashMap::new(),
        );
        assert_eq!(coord.session_id(), "sess-1");
        assert_eq!(coord.parent_id(), Some("parent-1"));
    }

    // ---------------------------------------------------------------
    // Injection limits
    // ---------------------------------------------------------------

    #[test]
    fn injection_limits_read_from_config() {
        let mut config = HashMap::new();
        config.insert(
            "session".into(),
            serde_json::json!({"injection_budget_per_turn": 1000, "injection_size_limit": 4000}),
        );
        let coord = Coordinator::new(config);
        assert_eq!(coord.injection_budget_per_turn(), Some(1000));
        assert_eq!(coord.injection_size_limit(), Some(4000));
    }

    #[test]
    fn injection_limits_default_unlimited() {
        let coord = Coordinator::new_for_test();
        assert_eq!(coord.injection_budget_per_turn(), None);
        assert_eq!(coord.injection_size_limit(), None);
    }

    // ---------------------------------------------------------------
    // process_hook_result: inject_context
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn process_hook_result_injects_context_into_context_manager() {
        let coord = Coordinator::new_for_test();
        let ctx = Arc::new(FakeContextManager::new());
        coord.set_context(ctx.clone());

        let result = HookResult {
            action: HookAction::InjectContext,
            context_injection: Some("linter found an issue".into()),
            ..Default::default()
        };
        let routed = coord
            .process_hook_result(result, "tool:post", "linter-hook")
            .await
            .unwrap();
        assert_eq!(routed.action, HookAction::InjectContext);

        let messages = ctx.get_messages().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["content"], "linter found an issue");
    }

    #[tokio::test]
    async fn process_hook_result_ephemeral_injection_skips_context_manager() {
        let coord = Coordinator::new_for_test();
        let ctx = Arc::new(FakeContextManager::new());
        coord.set_context(ctx.clone());

        let result = HookResult {
            action: HookAction::InjectContext,
            context_injection: Some("ephemeral note".into()),
            ephemeral: true,
            ..Default::default()
        };
        coord
            .process_hook_result(result, "tool:post", "hook")
            .await
            .unwrap();

        assert!(ctx.get_messages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn process_hook_result_appends_to_existing_last_tool_message() {
        let coord = Coordinator::new_for_test();
        let ctx = Arc::new(FakeContextManager::new());
        ctx.add_message(serde_json::json!({"role": "tool", "content": "ran ls"}))
            .await
            .unwrap();
        coord.set_context(ctx.clone());

        let result = HookResult {
            action: HookAction::InjectContext,
            context_injection: Some("stderr: permission denied".into()),
            ephemeral: true,
            append_to_last_tool_result: true,
            ..Default::default()
        };
        coord
            .process_hook_result(result, "tool:post", "linter-hook")
            .await
            .unwrap();

        let messages = ctx.get_messages().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0]["content"],
            "ran ls\nstderr: permission denied"
        );
    }

    #[tokio::test]
    async fn process_hook_result_appends_new_message_when_no_tool_message_exists() {
        let coord = Coordinator::new_for_test();
        let ctx = Arc::new(FakeContextManager::new());
        coord.set_context(ctx.clone());

        let result = HookResult {
            action: HookAction::InjectContext,
            context_injection: Some("stderr: permission denied".into()),
            ephemeral: true,
            append_to_last_tool_result: true,
            ..Default::default()
        };
        coord
            .process_hook_result(result, "tool:post", "linter-hook")
            .await
            .unwrap();

        let messages = ctx.get_messages().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "tool");
        assert_eq!(messages[0]["content"], "stderr: permission denied");
    }

    #[tokio::test]
    async fn process_hook_result_rejects_oversized_injection() {
        let coord = {
            let mut config = HashMap::new();
            config.insert(
                "session".into(),
                serde_json::json!({"injection_size_limit": 5}),
            );
            Coordinator::new(config)
        };
        let result = HookResult {
            action: HookAction::InjectContext,
            context_injection: Some("this is way too long".into()),
            ..Default::default()
        };
        let err = coord
            .process_hook_result(result, "tool:post", "hook")
            .await
            .unwrap_err();
        assert!(matches!(err, AmplifierError::Context(_)));
    }

    // ---------------------------------------------------------------
    // process_hook_result: ask_user
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn process_hook_result_ask_user_approved_continues() {
        let coord = Coordinator::new_for_test()
            .with_approval_system(Arc::new(crate::testing::FakeApprovalProvider::approving()));
        let result = HookResult {
            action: HookAction::AskUser,
            approval_prompt: Some("allow write?".into()),
            ..Default::default()
        };
        let routed = coord
            .process_hook_result(result, "tool:pre", "policy-hook")
            .await
            .unwrap();
        assert_eq!(routed.action, HookAction::Continue);
    }

    #[tokio::test]
    async fn process_hook_result_ask_user_denied_denies() {
        let coord = Coordinator::new_for_test()
            .with_approval_system(Arc::new(crate::testing::FakeApprovalProvider::denying()));
        let result = HookResult {
            action: HookAction::AskUser,
            approval_prompt: Some("allow write?".into()),
            ..Default::default()
        };
        let routed = coord
            .process_hook_result(result, "tool:pre", "policy-hook")
            .await
            .unwrap();
        assert_eq!(routed.action, HookAction::Deny);
    }

    #[tokio::test]
    async fn process_hook_result_ask_user_without_approval_system_denies() {
        let coord = Coordinator::new_for_test();
        let result = HookResult {
            action: HookAction::AskUser,
            approval_prompt: Some("allow write?".into()),
            ..Default::default()
        };
        let routed = coord
            .process_hook_result(result, "tool:pre", "policy-hook")
            .await
            .unwrap();
        assert_eq!(routed.action, HookAction::Deny);
        assert_eq!(
            routed.reason.as_deref(),
            Some("No approval system available")
        );
    }

    // ---------------------------------------------------------------
    // request_cancel
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn request_cancel_emits_event_and_is_idempotent() {
        let coord = Coordinator::new_for_test();
        coord.request_cancel(false).await;
        assert!(coord.cancellation().is_graceful());

        // Second identical request should not re-emit (state unchanged).
        coord.request_cancel(false).await;
        assert!(coord.cancellation().is_graceful());

        coord.request_cancel(true).await;
        assert!(coord.cancellation().is_immediate());
    }
}
