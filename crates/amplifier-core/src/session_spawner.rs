//! Sub-session spawning and resume for agent delegation.
//!
//! Grounded in `amplifier_app_cli/session_spawner.py`'s `spawn_sub_session`/
//! `resume_sub_session`. Several pieces of that file are app-layer glue that
//! has no counterpart in this pure-Rust kernel and are intentionally *not*
//! reproduced here:
//!
//! - `sys.path` sharing (a dynamic-import mechanism specific to the Python
//!   module loader) and the `module_paths`/`bundle_package_paths` bookkeeping
//!   that feeds it.
//! - The `mention_resolver`/`mention_deduplicator` capability objects --
//!   `@mention` routing is an app-layer concern and the kernel has no
//!   mention-resolver trait of its own, so `BundleContext::mention_mappings`
//!   is always persisted empty by this module; an app layer that tracks
//!   mentions is expected to populate that field itself before `save()`.
//!   `BundleContext::module_paths` *is* carried through: `extract_bundle_context`
//!   reads it from the parent's mounted [`crate::traits::ModuleSourceResolver::known_module_paths`],
//!   and `resume_sub_session` remounts a resolver backed by that snapshot
//!   before `mount_config` runs.
//! - Provider preference lists (`apply_provider_preferences`, an ordered
//!   fallback chain with glob-matched models) -- its backing function lives
//!   in `amplifier_foundation`, not retrieved into this pack. Only the
//!   legacy single `provider_override`/`model_override` path is implemented.
//! - `parent_messages` injection -- the Python docstring itself notes this
//!   parameter is unused (superseded by tool-level context formatting) and
//!   "kept for potential future use"; it is omitted here rather than carried
//!   as dead surface.
//!
//! What *is* reproduced faithfully is the eleven-step spawn algorithm and
//! resume algorithm as described by the call site: agent overlay lookup,
//! config merge, tool/hook inheritance filtering, provider override,
//! orchestrator config override, child id generation, child construction
//! with inherited UX/resolver/cancellation, recursion-depth tracking,
//! instruction execution with a temporary `orchestrator:complete` capture
//! hook, transcript/metadata persistence, and cleanup.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use rand::RngCore;
use serde_json::{Map, Value};

use crate::errors::{AmplifierError, HookError, SessionError};
use crate::events;
use crate::loader::ModuleLoader;
use crate::models::{BundleContext, HookResult, SourceHint};
use crate::session::{Session, SessionConfig};
use crate::session_store::SessionStore;
use crate::traits::{HookHandler, ModuleSourceResolver, ResolvedSource};

// ---------------------------------------------------------------------------
// Inheritance policies
// ---------------------------------------------------------------------------

/// Tool inheritance policy for a spawned child: either an allowlist
/// (`inherit_tools`) or a blocklist (`exclude_tools`). Modules the agent
/// overlay declares explicitly are always preserved regardless of policy.
#[derive(Debug, Clone, Default)]
pub struct ToolInheritance {
    pub exclude_tools: Vec<String>,
    pub inherit_tools: Option<Vec<String>>,
}

/// Hook inheritance policy, same shape as [`ToolInheritance`].
#[derive(Debug, Clone, Default)]
pub struct HookInheritance {
    pub exclude_hooks: Vec<String>,
    pub inherit_hooks: Option<Vec<String>>,
}

/// Optional knobs for [`spawn_sub_session`]. All fields default to "inherit
/// everything, no overrides".
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub sub_session_id: Option<String>,
    pub tool_inheritance: Option<ToolInheritance>,
    pub hook_inheritance: Option<HookInheritance>,
    pub orchestrator_config: Option<Value>,
    pub provider_override: Option<String>,
    pub model_override: Option<String>,
    /// Depth in the self-delegation chain; incremented by the caller for
    /// `self`, reset to 0 for named agents. Used by the app layer to cap
    /// recursive self-delegation.
    pub self_delegation_depth: i64,
}

/// Outcome of a spawn or resume call.
#[derive(Debug, Clone)]
pub struct SpawnResult {
    pub output: String,
    pub session_id: String,
    pub status: String,
    pub turn_count: i64,
    pub metadata: Value,
}

// ---------------------------------------------------------------------------
// Child id generation
// ---------------------------------------------------------------------------

/// Generates a child session id following the W3C Trace-Context span
/// pattern: `{parent_id}-{16 hex chars}_{agent_name}`. The span is 8 random
/// bytes, matching the fixed-length, filesystem-safe id Python generates via
/// `amplifier_foundation.generate_sub_session_id` (not retrieved into this
/// pack -- only the format is visible at the call site).
pub fn generate_sub_session_id(agent_name: &str, parent_session_id: &str) -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    let span: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{parent_session_id}-{span}_{agent_name}")
}

/// Extracts the 16-hex-char span from a sub-session id of the form
/// `{parent_id}-{span}_{agent_name}`, for short-id resolution. Returns
/// `None` for ids that don't follow that shape (e.g. top-level sessions).
fn extract_child_span(sub_session_id: &str) -> Option<String> {
    if !sub_session_id.contains('_') || !sub_session_id.contains('-') {
        return None;
    }
    let base = sub_session_id.rsplit_once('_')?.0;
    Some(base.rsplit_once('-')?.1.to_string())
}

// ---------------------------------------------------------------------------
// Config overlay
// ---------------------------------------------------------------------------

/// Deep-merges `overlay` onto `base`: nested objects recurse key-by-key,
/// everything else (scalars, arrays) is replaced outright. Same semantics as
/// [`crate::settings`]'s scope-overlay merge -- `agent_config.py`'s
/// `merge_configs` wasn't retrieved into this pack, but the call site treats
/// an agent overlay exactly like a settings overlay (a full list replaces,
/// it doesn't concatenate).
fn merge_agent_config(base: &Value, overlay: &Value) -> Value {
    let mut merged = base.clone();
    deep_merge(&mut merged, overlay.clone());
    merged
}

fn deep_merge(base: &mut Value, overlay: Value) {
    let Value::Object(overlay_map) = overlay else {
        *base = overlay;
        return;
    };
    if !base.is_object() {
        *base = Value::Object(Map::new());
    }
    let base_map = base.as_object_mut().expect("converted to object above");
    for (key, value) in overlay_map {
        match base_map.get_mut(&key) {
            Some(existing) if existing.is_object() && value.is_object() => {
                deep_merge(existing, value);
            }
            _ => {
                base_map.insert(key, value);
            }
        }
    }
}

fn module_names(list: &[Value]) -> HashSet<String> {
    list.iter()
        .filter_map(|entry| entry.get("module").and_then(Value::as_str).map(str::to_string))
        .collect()
}

/// Filters `config[section]` (a list of `{module, config}` entries) per an
/// allowlist-or-blocklist policy, always preserving `explicit` modules. A
/// no-op if `inheritance` specifies neither list.
fn filter_module_list(config: &mut Value, section: &str, exclude: &[String], inherit: Option<&[String]>, explicit: &HashSet<String>) {
    let Some(list) = config.get(section).and_then(Value::as_array).cloned() else {
        return;
    };
    if list.is_empty() {
        return;
    }

    let filtered: Vec<Value> = match inherit {
        Some(allow) => list
            .into_iter()
            .filter(|entry| {
                let module = entry.get("module").and_then(Value::as_str).unwrap_or_default();
                allow.iter().any(|m| m == module) || explicit.contains(module)
            })
            .collect(),
        None if !exclude.is_empty() => list
            .into_iter()
            .filter(|entry| {
                let module = entry.get("module").and_then(Value::as_str).unwrap_or_default();
                !exclude.iter().any(|m| m == module) || explicit.contains(module)
            })
            .collect(),
        None => return,
    };

    if let Some(obj) = config.as_object_mut() {
        obj.insert(section.to_string(), Value::Array(filtered));
    }
}

/// Promotes the provider matching `provider_id` to priority 0 (highest
/// precedence), optionally overriding its model. Matches the provider's
/// module id flexibly: the bare id, `provider-{id}`, or `{id}` with a
/// `provider-` prefix stripped. If `provider_id` is `None` but a model is
/// given, applies to whichever provider currently has the lowest (most
/// preferred) priority. Logs a warning and leaves config unchanged if no
/// match is found, or if a matched entry's shape isn't an object -- same
/// graceful-degrade policy as [`crate::hooks`]'s `merge_json`, never a panic
/// over config sourced from a bundle/agent definition.
fn apply_provider_override(config: &mut Value, provider_id: Option<&str>, model: Option<&str>) {
    if provider_id.is_none() && model.is_none() {
        return;
    }
    let Some(providers) = config.get("providers").and_then(Value::as_array).cloned() else {
        log::warn!("provider override specified but no providers in config");
        return;
    };
    if providers.is_empty() {
        log::warn!("provider override specified but no providers in config");
        return;
    }

    let target_idx = if let Some(id) = provider_id {
        providers.iter().position(|p| {
            let module = p.get("module").and_then(Value::as_str).unwrap_or_default();
            module == id || module.strip_prefix("provider-") == Some(id) || module == format!("provider-{id}")
        })
    } else {
        providers
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| {
                p.get("config")
                    .and_then(|c| c.get("priority"))
                    .and_then(Value::as_i64)
                    .unwrap_or(100)
            })
            .map(|(i, _)| i)
    };

    let Some(target_idx) = target_idx else {
        log::warn!("provider '{provider_id:?}' not found in config");
        return;
    };

    let mut new_providers = Vec::with_capacity(providers.len());
    for (i, provider) in providers.into_iter().enumerate() {
        let mut provider = provider;
        if i == target_idx {
            match provider.as_object_mut() {
                Some(entry) => {
                    let cfg = entry.entry("config").or_insert_with(|| Value::Object(Map::new()));
                    match cfg.as_object_mut() {
                        Some(cfg_obj) => {
                            cfg_obj.insert("priority".to_string(), Value::from(0));
                            if let Some(model) = model {
                                cfg_obj.insert("model".to_string(), Value::String(model.to_string()));
                            }
                            log::info!("provider override applied: priority=0, model={:?}", model);
                        }
                        None => log::warn!("provider at index {i} has a non-object 'config'; skipping override"),
                    }
                }
                None => log::warn!("provider entry at index {i} is not an object; skipping override"),
            }
        }
        new_providers.push(provider);
    }

    if let Some(obj) = config.as_object_mut() {
        obj.insert("providers".to_string(), Value::Array(new_providers));
    }
}

/// Shallow-merges `orchestrator_config` into `session.orchestrator.config`,
/// creating the path if absent. Caller's values take precedence, matching
/// Python's `dict.update()`. Returns a [`SessionError`] instead of panicking
/// if `config`, `session`, `orchestrator`, or its nested `config` turn out
/// not to be objects -- config sourced from a bundle/agent overlay is
/// external input, not an invariant this module can assert on.
fn apply_orchestrator_override(config: &mut Value, orchestrator_config: &Value) -> Result<(), SessionError> {
    let Some(overrides) = orchestrator_config.as_object() else { return Ok(()) };

    let shape_error = |field: &str| SessionError::Other {
        message: format!("cannot apply orchestrator override: '{field}' is not an object"),
    };

    let root = config.as_object_mut().ok_or_else(|| shape_error("config"))?;
    let session = root
        .entry("session")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| shape_error("session"))?;
    let orchestrator = session
        .entry("orchestrator")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| shape_error("session.orchestrator"))?;
    let orch_config = orchestrator
        .entry("config")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| shape_error("session.orchestrator.config"))?;
    for (key, value) in overrides {
        orch_config.insert(key.clone(), value.clone());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// orchestrator:complete capture hook
// ---------------------------------------------------------------------------

/// Captures the payload of the next `orchestrator:complete` emission so the
/// spawn/resume caller can enrich its return value with `status`,
/// `turn_count`, and `metadata` once execution finishes.
struct CompletionCapture {
    data: Mutex<Value>,
}

impl CompletionCapture {
    fn new() -> Self {
        Self {
            data: Mutex::new(Value::Object(Map::new())),
        }
    }

    fn snapshot(&self) -> Value {
        self.data.lock().unwrap().clone()
    }
}

impl HookHandler for CompletionCapture {
    fn handle(&self, _event: &str, data: Value) -> Pin<Box<dyn Future<Output = Result<HookResult, HookError>> + Send + '_>> {
        Box::pin(async move {
            *self.data.lock().unwrap() = data;
            Ok(HookResult::default())
        })
    }
}

// ---------------------------------------------------------------------------
// Mount plan application
// ---------------------------------------------------------------------------

/// Mounts a merged session config onto a freshly constructed child session.
/// Same ordering as [`crate::bundle::PreparedBundle::create_session`]:
/// context and orchestrator first, then providers/tools/hooks, then agent
/// definitions.
async fn mount_config(loader: &ModuleLoader, session: &Session, config: &Value) -> Result<(), AmplifierError> {
    let empty_config = || Value::Object(Map::new());
    let coordinator = session.coordinator();

    if let Some(session_section) = config.get("session").and_then(Value::as_object) {
        if let Some(id) = session_section.get("context").and_then(|s| s.get("module")).and_then(Value::as_str) {
            let cfg = session_section.get("context").and_then(|s| s.get("config")).cloned().unwrap_or_else(empty_config);
            loader.load_and_mount_with_retry(coordinator, id, cfg).await?;
        }
        if let Some(id) = session_section.get("orchestrator").and_then(|s| s.get("module")).and_then(Value::as_str) {
            let cfg = session_section.get("orchestrator").and_then(|s| s.get("config")).cloned().unwrap_or_else(empty_config);
            loader.load_and_mount_with_retry(coordinator, id, cfg).await?;
        }
    }

    for section in ["providers", "tools", "hooks"] {
        let Some(list) = config.get(section).and_then(Value::as_array) else {
            continue;
        };
        for entry in list {
            let Some(module_id) = entry.get("module").and_then(Value::as_str) else {
                continue;
            };
            let cfg = entry.get("config").cloned().unwrap_or_else(empty_config);
            loader.load_and_mount_with_retry(coordinator, module_id, cfg).await?;
        }
    }

    if let Some(agents) = config.get("agents").and_then(Value::as_object) {
        for (name, definition) in agents {
            coordinator.mount_agent(name, definition.clone());
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// spawn_sub_session
// ---------------------------------------------------------------------------

/// Spawns a child session overlaying `agent_name`'s configuration onto
/// `parent`'s, executes `instruction`, persists the child's transcript and
/// metadata, and cleans up. See the module doc for what's deliberately
/// out of scope.
pub async fn spawn_sub_session(
    agent_name: &str,
    instruction: &str,
    parent: &Session,
    agent_configs: &HashMap<String, Value>,
    loader: &ModuleLoader,
    store: &SessionStore,
    options: SpawnOptions,
) -> Result<SpawnResult, AmplifierError> {
    // Step 1: resolve the agent overlay ("self" = empty overlay).
    let agent_config = if agent_name == "self" {
        log::debug!("self-delegation: using parent config without agent overlay");
        Value::Object(Map::new())
    } else {
        agent_configs
            .get(agent_name)
            .cloned()
            .ok_or_else(|| SessionError::AgentNotFound { agent_name: agent_name.to_string() })?
    };

    // Step 2: deep-merge parent config with the overlay.
    let parent_config = config_as_value(parent.coordinator().config());
    let mut merged_config = merge_agent_config(&parent_config, &agent_config);

    // Step 3: tool/hook inheritance filtering, preserving explicit overlay modules.
    if let Some(policy) = &options.tool_inheritance {
        let explicit = agent_config.get("tools").and_then(Value::as_array).map(|l| module_names(l)).unwrap_or_default();
        filter_module_list(&mut merged_config, "tools", &policy.exclude_tools, policy.inherit_tools.as_deref(), &explicit);
    }
    if let Some(policy) = &options.hook_inheritance {
        let explicit = agent_config.get("hooks").and_then(Value::as_array).map(|l| module_names(l)).unwrap_or_default();
        filter_module_list(&mut merged_config, "hooks", &policy.exclude_hooks, policy.inherit_hooks.as_deref(), &explicit);
    }

    // Step 4: legacy single provider/model override.
    if options.provider_override.is_some() || options.model_override.is_some() {
        apply_provider_override(&mut merged_config, options.provider_override.as_deref(), options.model_override.as_deref());
    }

    // Step 5: orchestrator config override.
    if let Some(orchestrator_config) = &options.orchestrator_config {
        apply_orchestrator_override(&mut merged_config, orchestrator_config)?;
    }

    // Step 6: child session id.
    let sub_session_id = options.sub_session_id.unwrap_or_else(|| generate_sub_session_id(agent_name, parent.session_id()));

    // Step 7: construct the child session, inheriting UX systems and the module source resolver.
    let session_config = SessionConfig::from_value(merged_config.clone())?;
    let child = Session::new_with_ux(
        session_config,
        Some(sub_session_id.clone()),
        Some(parent.session_id().to_string()),
        parent.coordinator().approval_system(),
        parent.coordinator().display_system(),
    )
    .with_trace_id(parent.trace_id().to_string());
    if let Some(resolver) = parent.coordinator().module_source_resolver() {
        child.coordinator().set_module_source_resolver(resolver);
    }

    mount_config(loader, &child, &merged_config).await?;

    // Step 8: cancellation propagation, recursion depth, spawn/resume re-registration.
    parent.coordinator().cancellation().register_child(child.coordinator().cancellation().clone());
    child.coordinator().register_capability("self_delegation_depth", Value::from(options.self_delegation_depth));
    log::debug!("registered child cancellation token for sub-session {sub_session_id}");
    // Grandchild spawn/resume capabilities aren't representable as stored
    // values in this kernel's `Value`-typed capability registry (unlike
    // Python's closures); the app layer re-derives them from `loader`/
    // `store` rather than storing them as coordinator capabilities.

    let mut child_session = child;
    child_session.set_initialized();

    // Step 9: execute with a temporary orchestrator:complete capture hook.
    let capture = std::sync::Arc::new(CompletionCapture::new());
    let unregister = child_session
        .coordinator()
        .hooks()
        .register(events::ORCHESTRATOR_COMPLETE, capture.clone(), 999, Some("_spawn_capture".to_string()));
    let execute_result = child_session.execute(instruction).await;
    unregister();
    let response = execute_result?;

    // Step 10: persist transcript + metadata (bundle_context frozen at spawn time).
    let context = child_session.coordinator().context();
    let transcript = match &context {
        Some(ctx) => ctx.get_messages().await.unwrap_or_default(),
        None => Vec::new(),
    };

    let trace_id = child_session.trace_id().to_string();
    let child_span = extract_child_span(&sub_session_id);
    let completion = capture.snapshot();

    let metadata = serde_json::json!({
        "session_id": sub_session_id,
        "parent_id": parent.session_id(),
        "trace_id": trace_id,
        "agent_name": agent_name,
        "child_span": child_span,
        "created": chrono::Utc::now().to_rfc3339(),
        "config": merged_config,
        "agent_overlay": agent_config,
        "turn_count": 1,
        "bundle_context": extract_bundle_context(parent),
        "self_delegation_depth": options.self_delegation_depth,
    });

    store.save(&sub_session_id, &transcript, &metadata)?;
    log::debug!("sub-session {sub_session_id} state persisted");

    // Step 11: unregister cancellation and clean up.
    parent.coordinator().cancellation().unregister_child(child_session.coordinator().cancellation());
    child_session.cleanup().await;

    Ok(SpawnResult {
        output: response,
        session_id: sub_session_id,
        status: completion.get("status").and_then(Value::as_str).unwrap_or("success").to_string(),
        turn_count: completion.get("turn_count").and_then(Value::as_i64).unwrap_or(1),
        metadata: completion.get("metadata").cloned().unwrap_or_else(|| Value::Object(Map::new())),
    })
}

/// Extracts the bundle context persisted alongside a spawned child: the
/// parent's mounted [`ModuleSourceResolver::known_module_paths`] snapshot,
/// frozen at spawn time so `resume_sub_session` can rebuild an equivalent
/// resolver without the parent session (or its process) still being around.
/// `mention_mappings` stays empty -- see module doc for why.
fn extract_bundle_context(parent: &Session) -> BundleContext {
    let module_paths = parent
        .coordinator()
        .module_source_resolver()
        .map(|resolver| resolver.known_module_paths())
        .unwrap_or_default();
    BundleContext {
        module_paths,
        ..BundleContext::default()
    }
}

fn config_as_value(config: &HashMap<String, Value>) -> Value {
    Value::Object(config.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<Map<String, Value>>())
}

// ---------------------------------------------------------------------------
// Resume-time resolver reconstruction
// ---------------------------------------------------------------------------

/// A [`ModuleSourceResolver`] rebuilt purely from a frozen
/// `bundle_context.module_paths` snapshot -- no live settings files or
/// environment involved, since the resume call may be running in a process
/// that never had the original bundle mounted. Anything not in the map
/// resolves to `None`, deferring to the loader's native/installed lookup,
/// same fallback behavior as [`crate::settings::SettingsBackedResolver`].
struct BundleMapResolver {
    module_paths: HashMap<String, String>,
}

impl ModuleSourceResolver for BundleMapResolver {
    fn resolve(
        &self,
        module_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ResolvedSource>, AmplifierError>> + Send + '_>> {
        let found = self.module_paths.get(module_id).map(|path| ResolvedSource {
            path: path.clone(),
            hint: SourceHint::Path { path: path.clone() },
        });
        Box::pin(async move { Ok(found) })
    }

    fn known_module_paths(&self) -> HashMap<String, String> {
        self.module_paths.clone()
    }
}

// ---------------------------------------------------------------------------
// resume_sub_session
// ---------------------------------------------------------------------------

/// Resumes a previously spawned sub-session: loads transcript + metadata,
/// reconstructs the child with fresh UX systems (approval history and
/// display nesting are not preserved across resume, by design) and a
/// [`BundleMapResolver`] rebuilt from `bundle_context.module_paths`, replays
/// the transcript, executes the new instruction, and persists the update.
pub async fn resume_sub_session(
    sub_session_id: &str,
    instruction: &str,
    loader: &ModuleLoader,
    store: &SessionStore,
) -> Result<SpawnResult, AmplifierError> {
    if !store.exists(sub_session_id) {
        return Err(SessionError::NotFound { session_id: sub_session_id.to_string() }.into());
    }

    let (transcript, metadata) = store.load(sub_session_id)?;

    let merged_config = metadata.get("config").cloned().ok_or_else(|| {
        AmplifierError::Session(SessionError::Other {
            message: format!("corrupted session metadata for '{sub_session_id}': missing config"),
        })
    })?;
    let parent_id = metadata.get("parent_id").and_then(Value::as_str).map(str::to_string);
    let agent_name = metadata.get("agent_name").and_then(Value::as_str).unwrap_or("unknown").to_string();
    let self_delegation_depth = metadata.get("self_delegation_depth").and_then(Value::as_i64).unwrap_or(0);
    let trace_id = metadata
        .get("trace_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| sub_session_id.to_string());

    log::debug!("resuming sub-session {sub_session_id} (agent={agent_name}, parent={parent_id:?}); UX state not preserved");

    let session_config = SessionConfig::from_value(merged_config.clone())?;
    let mut child_session = Session::new_resumed(session_config, sub_session_id.to_string(), parent_id.clone())
        .with_trace_id(trace_id);

    let bundle_context: BundleContext = metadata
        .get("bundle_context")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e: serde_json::Error| {
            AmplifierError::Session(SessionError::Other {
                message: format!("corrupted bundle_context for '{sub_session_id}': {e}"),
            })
        })?
        .unwrap_or_default();
    if !bundle_context.module_paths.is_empty() {
        child_session
            .coordinator()
            .set_module_source_resolver(std::sync::Arc::new(BundleMapResolver { module_paths: bundle_context.module_paths.clone() }));
    }

    mount_config(loader, &child_session, &merged_config).await?;
    child_session.set_initialized();

    child_session.coordinator().register_capability("self_delegation_depth", Value::from(self_delegation_depth));
    // `Session::execute` below emits `session:resume` itself (and
    // `session:fork` if `parent_id` is set) once the transcript is restored.

    if let Some(context) = child_session.coordinator().context() {
        for message in &transcript {
            context.add_message(message.clone()).await?;
        }
    } else {
        log::warn!("context module does not support add_message() -- transcript not restored for session {sub_session_id}");
    }

    let capture = std::sync::Arc::new(CompletionCapture::new());
    let unregister = child_session
        .coordinator()
        .hooks()
        .register(events::ORCHESTRATOR_COMPLETE, capture.clone(), 999, Some("_spawn_capture".to_string()));
    let execute_result = child_session.execute(instruction).await;
    unregister();
    let response = execute_result?;

    let updated_transcript = match child_session.coordinator().context() {
        Some(ctx) => ctx.get_messages().await.unwrap_or_default(),
        None => Vec::new(),
    };

    let mut updated_metadata = metadata;
    if let Some(obj) = updated_metadata.as_object_mut() {
        obj.insert("turn_count".to_string(), Value::from(updated_transcript.len() as i64));
        obj.insert("last_updated".to_string(), Value::String(chrono::Utc::now().to_rfc3339()));
    }
    store.save(sub_session_id, &updated_transcript, &updated_metadata)?;
    log::debug!(
        "sub-session {sub_session_id} state updated (turn {})",
        updated_metadata.get("turn_count").and_then(Value::as_i64).unwrap_or_default()
    );

    child_session.cleanup().await;

    let completion = capture.snapshot();
    Ok(SpawnResult {
        output: response,
        session_id: sub_session_id.to_string(),
        status: completion.get("status").and_then(Value::as_str).unwrap_or("success").to_string(),
        turn_count: completion.get("turn_count").and_then(Value::as_i64).unwrap_or(1),
        metadata: completion.get("metadata").cloned().unwrap_or_else(|| Value::Object(Map::new())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::Coordinator;
    use crate::loader::ModuleLoader;
    use crate::models::ModuleType;
    use crate::testing::{FakeContextManager, FakeOrchestrator, FakeProvider, FakeTool};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn test_loader() -> ModuleLoader {
        let loader = ModuleLoader::new();
        loader.register_native(
            "orchestrator-basic",
            ModuleType::Orchestrator,
            "1.0.0",
            "test orchestrator",
            Arc::new(|_cfg| Ok(crate::loader::MountedModule::Orchestrator(Arc::new(FakeOrchestrator::new("child done"))))),
        );
        loader.register_native(
            "context-simple",
            ModuleType::Context,
            "1.0.0",
            "test context manager",
            Arc::new(|_cfg| Ok(crate::loader::MountedModule::Context(Arc::new(FakeContextManager::new())))),
        );
        loader.register_native(
            "provider-test",
            ModuleType::Provider,
            "1.0.0",
            "test provider",
            Arc::new(|_cfg| Ok(crate::loader::MountedModule::Provider(Arc::new(FakeProvider::new("provider-test", "hi"))))),
        );
        loader.register_native(
            "tool-bash",
            ModuleType::Tool,
            "1.0.0",
            "runs shell commands",
            Arc::new(|_cfg| Ok(crate::loader::MountedModule::Tool(Arc::new(FakeTool::new("bash", "runs shell commands"))))),
        );
        loader
    }

    fn base_mount_plan() -> Value {
        json!({
            "session": {
                "orchestrator": {"module": "orchestrator-basic"},
                "context": {"module": "context-simple"},
            },
            "providers": [{"module": "provider-test"}],
            "tools": [{"module": "tool-bash"}],
        })
    }

    fn parent_session() -> Session {
        let config = SessionConfig::from_value(base_mount_plan()).unwrap();
        let mut session = Session::new(config, Some("parent1".to_string()), None);
        session.coordinator_mut().set_orchestrator(Arc::new(FakeOrchestrator::new("parent done")));
        session.coordinator_mut().set_context(Arc::new(FakeContextManager::new()));
        session.coordinator_mut().mount_provider("provider-test", Arc::new(FakeProvider::new("provider-test", "hi")));
        session.set_initialized();
        session
    }

    #[test]
    fn generate_sub_session_id_has_expected_shape() {
        let id = generate_sub_session_id("researcher", "parent1");
        assert!(id.starts_with("parent1-"));
        assert!(id.ends_with("_researcher"));
        let span = extract_child_span(&id).unwrap();
        assert_eq!(span.len(), 16);
    }

    #[test]
    fn extract_child_span_none_for_top_level_ids() {
        assert_eq!(extract_child_span("abc123"), None);
    }

    #[test]
    fn merge_agent_config_recurses_objects_and_replaces_scalars() {
        let base = json!({"session": {"orchestrator": {"module": "a"}}, "name": "parent"});
        let overlay = json!({"session": {"context": {"module": "b"}}, "name": "child"});
        let merged = merge_agent_config(&base, &overlay);
        assert_eq!(merged["session"]["orchestrator"]["module"], "a");
        assert_eq!(merged["session"]["context"]["module"], "b");
        assert_eq!(merged["name"], "child");
    }

    #[test]
    fn filter_module_list_exclude_policy_preserves_explicit() {
        let mut config = json!({"tools": [{"module": "tool-bash"}, {"module": "tool-task"}]});
        let explicit: HashSet<String> = ["tool-task".to_string()].into_iter().collect();
        filter_module_list(&mut config, "tools", &["tool-task".to_string()], None, &explicit);
        let tools = config["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 2, "explicit module survives exclusion");
    }

    #[test]
    fn filter_module_list_allowlist_drops_unlisted() {
        let mut config = json!({"tools": [{"module": "tool-bash"}, {"module": "tool-task"}]});
        filter_module_list(&mut config, "tools", &[], Some(&["tool-bash".to_string()]), &HashSet::new());
        let tools = config["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["module"], "tool-bash");
    }

    #[test]
    fn apply_provider_override_promotes_matching_provider() {
        let mut config = json!({"providers": [{"module": "provider-openai", "config": {"priority": 10}}, {"module": "provider-anthropic", "config": {"priority": 20}}]});
        apply_provider_override(&mut config, Some("anthropic"), Some("claude-sonnet"));
        assert_eq!(config["providers"][1]["config"]["priority"], 0);
        assert_eq!(config["providers"][1]["config"]["model"], "claude-sonnet");
        assert_eq!(config["providers"][0]["config"]["priority"], 10);
    }

    #[test]
    fn apply_orchestrator_override_merges_into_nested_path() {
        let mut config = json!({"session": {"orchestrator": {"module": "loop-basic"}}});
        apply_orchestrator_override(&mut config, &json!({"min_delay_between_calls_ms": 500})).unwrap();
        assert_eq!(config["session"]["orchestrator"]["config"]["min_delay_between_calls_ms"], 500);
    }

    #[test]
    fn apply_orchestrator_override_errors_instead_of_panicking_on_non_object_session() {
        let mut config = json!({"session": "not-an-object"});
        let err = apply_orchestrator_override(&mut config, &json!({"min_delay_between_calls_ms": 500})).unwrap_err();
        assert!(err.to_string().contains("session"));
    }

    #[tokio::test]
    async fn spawn_sub_session_with_self_inherits_parent_config_unchanged() {
        let parent = parent_session();
        let loader = test_loader();
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf()).unwrap();

        let result = spawn_sub_session("self", "do the thing", &parent, &HashMap::new(), &loader, &store, SpawnOptions::default())
            .await
            .unwrap();

        assert_eq!(result.output, "child done");
        assert!(result.session_id.starts_with("parent1-"));
        assert!(store.exists(&result.session_id));
    }

    #[tokio::test]
    async fn spawn_sub_session_rejects_unknown_agent_name() {
        let parent = parent_session();
        let loader = test_loader();
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf()).unwrap();

        let err = spawn_sub_session("researcher", "go", &parent, &HashMap::new(), &loader, &store, SpawnOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AmplifierError::Session(SessionError::AgentNotFound { .. })));
    }

    #[tokio::test]
    async fn bundle_map_resolver_resolves_known_paths_and_none_otherwise() {
        let resolver = BundleMapResolver {
            module_paths: [("tool-bash".to_string(), "/bundles/tool-bash".to_string())].into_iter().collect(),
        };
        assert_eq!(resolver.resolve("tool-bash").await.unwrap().unwrap().path, "/bundles/tool-bash");
        assert!(resolver.resolve("tool-other").await.unwrap().is_none());
        assert_eq!(resolver.known_module_paths().get("tool-bash").unwrap(), "/bundles/tool-bash");
    }

    #[tokio::test]
    async fn extract_bundle_context_populates_module_paths_from_mounted_resolver() {
        let parent = parent_session();
        parent
            .coordinator()
            .set_module_source_resolver(Arc::new(BundleMapResolver {
                module_paths: [("tool-bash".to_string(), "/bundles/tool-bash".to_string())].into_iter().collect(),
            }));

        let ctx = extract_bundle_context(&parent);
        assert_eq!(ctx.module_paths.get("tool-bash").unwrap(), "/bundles/tool-bash");
        assert!(ctx.mention_mappings.is_empty());
    }

    #[tokio::test]
    async fn extract_bundle_context_is_empty_without_a_mounted_resolver() {
        let parent = parent_session();
        let ctx = extract_bundle_context(&parent);
        assert!(ctx.module_paths.is_empty());
    }

    #[tokio::test]
    async fn spawn_then_resume_carries_module_paths_through_bundle_context() {
        let parent = parent_session();
        parent
            .coordinator()
            .set_module_source_resolver(Arc::new(BundleMapResolver {
                module_paths: [("tool-bash".to_string(), "/bundles/tool-bash".to_string())].into_iter().collect(),
            }));
        let loader = test_loader();
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf()).unwrap();

        let spawned = spawn_sub_session("self", "first turn", &parent, &HashMap::new(), &loader, &store, SpawnOptions::default())
            .await
            .unwrap();

        let (_, metadata) = store.load(&spawned.session_id).unwrap();
        let bundle_context: BundleContext = serde_json::from_value(metadata["bundle_context"].clone()).unwrap();
        assert_eq!(bundle_context.module_paths.get("tool-bash").unwrap(), "/bundles/tool-bash");

        // resume_sub_session must not error while reconstructing a resolver from that snapshot.
        let resumed = resume_sub_session(&spawned.session_id, "second turn", &loader, &store).await.unwrap();
        assert_eq!(resumed.session_id, spawned.session_id);
    }

    #[tokio::test]
    async fn spawn_sub_session_applies_agent_overlay_and_persists_metadata() {
        let parent = parent_session();
        let loader = test_loader();
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf()).unwrap();

        let mut agent_configs = HashMap::new();
        agent_configs.insert("researcher".to_string(), json!({"instruction": "You research things."}));

        let result = spawn_sub_session("researcher", "find facts", &parent, &agent_configs, &loader, &store, SpawnOptions::default())
            .await
            .unwrap();

        let (_, metadata) = store.load(&result.session_id).unwrap();
        assert_eq!(metadata["agent_name"], "researcher");
        assert_eq!(metadata["parent_id"], "parent1");
        assert_eq!(metadata["agent_overlay"]["instruction"], "You research things.");
    }

    #[tokio::test]
    async fn resume_sub_session_replays_transcript_and_executes_again() {
        let parent = parent_session();
        let loader = test_loader();
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf()).unwrap();

        let spawned = spawn_sub_session("self", "first turn", &parent, &HashMap::new(), &loader, &store, SpawnOptions::default())
            .await
            .unwrap();

        let resumed = resume_sub_session(&spawned.session_id, "second turn", &loader, &store).await.unwrap();
        assert_eq!(resumed.output, "child done");
        assert_eq!(resumed.session_id, spawned.session_id);

        let (_, metadata) = store.load(&spawned.session_id).unwrap();
        assert!(metadata.get("last_updated").is_some());
    }

    #[tokio::test]
    async fn resume_sub_session_errors_when_session_missing() {
        let loader = test_loader();
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf()).unwrap();

        let err = resume_sub_session("does-not-exist", "go", &loader, &store).await.unwrap_err();
        assert!(matches!(err, AmplifierError::Session(SessionError::NotFound { .. })));
    }

    #[test]
    fn coordinator_cancellation_is_accessible_for_propagation() {
        let coordinator = Coordinator::new_for_test();
        assert!(!coordinator.cancellation().is_cancelled());
    }
}
