//! Scope-aware YAML settings and the settings-backed module source resolver.
//!
//! Ported from `amplifier_app_cli/lib/settings.py` and
//! `amplifier_app_cli/module_manager.py`. Four scopes, most-specific wins:
//! session > local (`.amplifier/settings.local.yaml`, gitignored) > project
//! (`.amplifier/settings.yaml`, team-shared) > global
//! (`~/.amplifier/settings.yaml`, user defaults). Malformed or missing
//! scope files are skipped rather than treated as errors -- matches the
//! Python kernel's `except Exception: pass` around each scope read.
//!
//! [`SettingsBackedResolver`] implements [`crate::traits::ModuleSourceResolver`]
//! using the five-step order from the module loading design: env override →
//! workspace override → user settings override → bundle mapping → installed
//! package (the last step returns `None`, deferring to the loader's native
//! registry).

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::RwLock;

use serde_json::{Map, Value};

use crate::errors::{AmplifierError, IoError, ScopeNotAvailableError};
use crate::models::SourceHint;
use crate::traits::{ModuleSourceResolver, ResolvedSource};

/// Settings scope, most-specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Session,
    Local,
    Project,
    Global,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Local => "local",
            Self::Project => "project",
            Self::Global => "global",
        }
    }
}

/// Standard settings file locations for the default amplifier layout.
#[derive(Debug, Clone)]
pub struct SettingsPaths {
    pub global_settings: PathBuf,
    pub project_settings: PathBuf,
    pub local_settings: PathBuf,
    pub session_settings: Option<PathBuf>,
}

impl SettingsPaths {
    /// `~/.amplifier/settings.yaml`, `./.amplifier/settings.yaml`,
    /// `./.amplifier/settings.local.yaml`.
    pub fn default_paths() -> Result<Self, AmplifierError> {
        let home = dirs::home_dir().ok_or_else(|| ScopeNotAvailableError {
            scope: "global".into(),
            message: "could not determine home directory".into(),
        })?;
        let cwd = std::env::current_dir()?;
        Ok(Self {
            global_settings: home.join(".amplifier").join("settings.yaml"),
            project_settings: cwd.join(".amplifier").join("settings.yaml"),
            local_settings: cwd.join(".amplifier").join("settings.local.yaml"),
            session_settings: None,
        })
    }

    /// Same as [`Self::default_paths`] but also sets `session_settings` to
    /// `~/.amplifier/projects/<project_slug>/sessions/<session_id>/settings.yaml`.
    pub fn with_session(session_id: &str, project_slug: &str) -> Result<Self, AmplifierError> {
        let mut paths = Self::default_paths()?;
        let home = dirs::home_dir().ok_or_else(|| ScopeNotAvailableError {
            scope: "session".into(),
            message: "could not determine home directory".into(),
        })?;
        paths.session_settings = Some(
            home.join(".amplifier")
                .join("projects")
                .join(project_slug)
                .join("sessions")
                .join(session_id)
                .join("settings.yaml"),
        );
        Ok(paths)
    }
}

fn read_yaml_file(path: &Path) -> Value {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<Value>(&contents) {
            Ok(value) => value,
            Err(err) => {
                log::warn!("failed to parse settings file {}: {err}", path.display());
                Value::Object(Map::new())
            }
        },
        Err(_) => Value::Object(Map::new()),
    }
}

/// Merge `overlay` into `base` in place. Only recurses when both sides are
/// objects at a given key; otherwise the overlay value replaces outright
/// (matches the Python `_deep_merge`, which never merges into a non-dict).
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

fn get_path<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Simple scope-aware settings manager with deep-merge across scopes.
pub struct AppSettings {
    pub paths: SettingsPaths,
}

impl AppSettings {
    pub fn new(paths: SettingsPaths) -> Self {
        Self { paths }
    }

    pub fn with_default_paths() -> Result<Self, AmplifierError> {
        Ok(Self::new(SettingsPaths::default_paths()?))
    }

    /// A new `AppSettings` with session scope enabled, all other scopes
    /// carried over unchanged.
    pub fn with_session(&self, session_id: &str, project_slug: &str) -> Result<Self, AmplifierError> {
        Ok(Self::new(SettingsPaths::with_session(session_id, project_slug)?))
    }

    /// Load and deep-merge settings from every available scope, most
    /// specific last. Missing or malformed scopes are skipped, never fail
    /// the merge.
    pub fn get_merged_settings(&self) -> Value {
        let mut result = Value::Object(Map::new());
        let mut scope_paths = vec![
            &self.paths.global_settings,
            &self.paths.project_settings,
            &self.paths.local_settings,
        ];
        if let Some(session) = &self.paths.session_settings {
            scope_paths.push(session);
        }
        for path in scope_paths {
            if !path.exists() {
                continue;
            }
            let content = read_yaml_file(path);
            if content.is_object() {
                deep_merge(&mut result, content);
            } else {
                log::warn!(
                    "settings file {} did not parse to a mapping; skipping",
                    path.display()
                );
            }
        }
        result
    }

    // ----- Bundle settings -----

    pub fn get_active_bundle(&self) -> Option<String> {
        get_path(&self.get_merged_settings(), &["bundle", "active"])
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn set_active_bundle(&self, name: &str, scope: Scope) -> Result<(), AmplifierError> {
        let mut settings = self.read_scope(scope)?;
        ensure_object(&mut settings, "bundle").insert("active".into(), Value::String(name.into()));
        self.write_scope(scope, settings)
    }

    /// Clears `bundle.active` only, preserving `bundle.added`/`bundle.app` so
    /// lower-priority scopes can still contribute them.
    pub fn clear_active_bundle(&self, scope: Scope) -> Result<(), AmplifierError> {
        let mut settings = self.read_scope(scope)?;
        if let Some(bundle) = settings.get_mut("bundle").and_then(Value::as_object_mut) {
            bundle.remove("active");
            if bundle.is_empty() {
                settings.as_object_mut().unwrap().remove("bundle");
            }
            self.write_scope(scope, settings)?;
        }
        Ok(())
    }

    /// App bundles are composed onto every session after the primary
    /// bundle. Reads `bundle.app` (a list of URIs).
    pub fn get_app_bundles(&self) -> Vec<String> {
        get_path(&self.get_merged_settings(), &["bundle", "app"])
            .and_then(Value::as_array)
            .map(|list| list.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn add_app_bundle(&self, uri: &str, scope: Scope) -> Result<(), AmplifierError> {
        let mut settings = self.read_scope(scope)?;
        let bundle = ensure_object(&mut settings, "bundle");
        let list = bundle
            .entry("app")
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .expect("bundle.app is always an array");
        if !list.iter().any(|v| v.as_str() == Some(uri)) {
            list.push(Value::String(uri.into()));
        }
        self.write_scope(scope, settings)
    }

    pub fn remove_app_bundle(&self, uri: &str, scope: Scope) -> Result<bool, AmplifierError> {
        let mut settings = self.read_scope(scope)?;
        let Some(bundle) = settings.get_mut("bundle").and_then(Value::as_object_mut) else {
            return Ok(false);
        };
        let Some(list) = bundle.get_mut("app").and_then(Value::as_array_mut) else {
            return Ok(false);
        };
        let before = list.len();
        list.retain(|v| v.as_str() != Some(uri));
        let removed = list.len() != before;
        if removed {
            if list.is_empty() {
                bundle.remove("app");
            }
            if bundle.is_empty() {
                settings.as_object_mut().unwrap().remove("bundle");
            }
            self.write_scope(scope, settings)?;
        }
        Ok(removed)
    }

    /// User-added bundle name → URI mappings (`bundle.added`), merged
    /// across all scopes.
    pub fn get_added_bundles(&self) -> HashMap<String, String> {
        get_path(&self.get_merged_settings(), &["bundle", "added"])
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn add_bundle(&self, name: &str, uri: &str, scope: Scope) -> Result<(), AmplifierError> {
        let mut settings = self.read_scope(scope)?;
        let bundle = ensure_object(&mut settings, "bundle");
        let added = bundle
            .entry("added")
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .expect("bundle.added is always an object");
        added.insert(name.into(), Value::String(uri.into()));
        self.write_scope(scope, settings)
    }

    pub fn remove_added_bundle(&self, name: &str, scope: Scope) -> Result<bool, AmplifierError> {
        let mut settings = self.read_scope(scope)?;
        let Some(bundle) = settings.get_mut("bundle").and_then(Value::as_object_mut) else {
            return Ok(false);
        };
        let Some(added) = bundle.get_mut("added").and_then(Value::as_object_mut) else {
            return Ok(false);
        };
        let removed = added.remove(name).is_some();
        if removed {
            if added.is_empty() {
                bundle.remove("added");
            }
            if bundle.is_empty() {
                settings.as_object_mut().unwrap().remove("bundle");
            }
            self.write_scope(scope, settings)?;
        }
        Ok(removed)
    }

    // ----- Provider settings -----

    pub fn get_provider(&self) -> Option<Value> {
        self.get_merged_settings().get("provider").cloned()
    }

    pub fn set_provider(&self, provider_config: Value, scope: Scope) -> Result<(), AmplifierError> {
        let mut settings = self.read_scope(scope)?;
        settings
            .as_object_mut()
            .expect("scope settings root is always an object")
            .insert("provider".into(), provider_config);
        self.write_scope(scope, settings)
    }

    pub fn clear_provider(&self, scope: Scope) -> Result<(), AmplifierError> {
        let mut settings = self.read_scope(scope)?;
        if let Some(obj) = settings.as_object_mut() {
            obj.remove("provider");
        }
        self.write_scope(scope, settings)
    }

    // ----- Provider overrides (config.providers) -----

    pub fn get_provider_overrides(&self) -> Vec<Value> {
        get_path(&self.get_merged_settings(), &["config", "providers"])
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_scope_provider_overrides(&self, scope: Scope) -> Result<Vec<Value>, AmplifierError> {
        let settings = self.read_scope(scope)?;
        Ok(get_path(&settings, &["config", "providers"])
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Persist a provider override at `scope`. The new/updated provider is
    /// moved to the front (becomes active); other priority-1 providers are
    /// demoted to priority 10.
    pub fn set_provider_override(&self, provider_entry: Value, scope: Scope) -> Result<(), AmplifierError> {
        let module_id = provider_entry.get("module").and_then(Value::as_str).map(str::to_string);
        let existing = self.get_scope_provider_overrides(scope)?;
        let mut others = Vec::with_capacity(existing.len());
        for mut provider in existing {
            if provider.get("module").and_then(Value::as_str).map(str::to_string) == module_id {
                continue;
            }
            if let Some(config) = provider.get_mut("config").and_then(Value::as_object_mut) {
                if config.get("priority").and_then(Value::as_i64) == Some(1) {
                    config.insert("priority".into(), Value::from(10));
                }
            }
            others.push(provider);
        }
        let mut new_list = vec![provider_entry];
        new_list.extend(others);

        let mut settings = self.read_scope(scope)?;
        ensure_object(&mut settings, "config").insert("providers".into(), Value::Array(new_list));
        self.write_scope(scope, settings)
    }

    pub fn clear_provider_override(&self, scope: Scope) -> Result<bool, AmplifierError> {
        let mut settings = self.read_scope(scope)?;
        let Some(config) = settings.get_mut("config").and_then(Value::as_object_mut) else {
            return Ok(false);
        };
        let had_providers = matches!(config.get("providers"), Some(Value::Array(list)) if !list.is_empty());
        if !had_providers {
            return Ok(false);
        }
        config.remove("providers");
        if config.is_empty() {
            settings.as_object_mut().unwrap().remove("config");
        }
        self.write_scope(scope, settings)?;
        Ok(true)
    }

    // ----- Source overrides (sources.modules / sources.bundles) -----

    pub fn get_module_sources(&self) -> HashMap<String, String> {
        get_path(&self.get_merged_settings(), &["sources", "modules"])
            .and_then(Value::as_object)
            .map(|m| m.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
            .unwrap_or_default()
    }

    pub fn add_source_override(&self, identifier: &str, source_uri: &str, scope: Scope) -> Result<(), AmplifierError> {
        let mut settings = self.read_scope(scope)?;
        let sources = ensure_object(&mut settings, "sources");
        let modules = sources
            .entry("modules")
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .expect("sources.modules is always an object");
        modules.insert(identifier.into(), Value::String(source_uri.into()));
        self.write_scope(scope, settings)
    }

    pub fn remove_source_override(&self, identifier: &str, scope: Scope) -> Result<bool, AmplifierError> {
        self.remove_sources_entry("modules", identifier, scope)
    }

    pub fn get_bundle_sources(&self) -> HashMap<String, String> {
        get_path(&self.get_merged_settings(), &["sources", "bundles"])
            .and_then(Value::as_object)
            .map(|m| m.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
            .unwrap_or_default()
    }

    pub fn add_bundle_source_override(&self, identifier: &str, source_uri: &str, scope: Scope) -> Result<(), AmplifierError> {
        let mut settings = self.read_scope(scope)?;
        let sources = ensure_object(&mut settings, "sources");
        let bundles = sources
            .entry("bundles")
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .expect("sources.bundles is always an object");
        bundles.insert(identifier.into(), Value::String(source_uri.into()));
        self.write_scope(scope, settings)
    }

    pub fn remove_bundle_source_override(&self, identifier: &str, scope: Scope) -> Result<bool, AmplifierError> {
        self.remove_sources_entry("bundles", identifier, scope)
    }

    fn remove_sources_entry(&self, section: &str, identifier: &str, scope: Scope) -> Result<bool, AmplifierError> {
        let mut settings = self.read_scope(scope)?;
        let Some(sources) = settings.get_mut("sources").and_then(Value::as_object_mut) else {
            return Ok(false);
        };
        let Some(entries) = sources.get_mut(section).and_then(Value::as_object_mut) else {
            return Ok(false);
        };
        let removed = entries.remove(identifier).is_some();
        if removed {
            if entries.is_empty() {
                sources.remove(section);
            }
            if sources.is_empty() {
                settings.as_object_mut().unwrap().remove("sources");
            }
            self.write_scope(scope, settings)?;
        }
        Ok(removed)
    }

    // ----- Module overrides (overrides.<module-id>.{source,config}) -----

    pub fn get_module_overrides(&self) -> Map<String, Value> {
        get_path(&self.get_merged_settings(), &["overrides"])
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_source_overrides(&self) -> HashMap<String, String> {
        self.get_module_overrides()
            .iter()
            .filter_map(|(id, entry)| entry.get("source").and_then(Value::as_str).map(|s| (id.clone(), s.to_string())))
            .collect()
    }

    pub fn get_config_overrides(&self) -> HashMap<String, Value> {
        self.get_module_overrides()
            .iter()
            .filter_map(|(id, entry)| entry.get("config").map(|c| (id.clone(), c.clone())))
            .collect()
    }

    pub fn set_module_override(
        &self,
        module_id: &str,
        source: Option<String>,
        config: Option<Value>,
        scope: Scope,
    ) -> Result<(), AmplifierError> {
        let mut settings = self.read_scope(scope)?;
        let overrides = ensure_object(&mut settings, "overrides");
        let mut entry = Map::new();
        if let Some(source) = source {
            entry.insert("source".into(), Value::String(source));
        }
        if let Some(config) = config {
            entry.insert("config".into(), config);
        }
        if entry.is_empty() {
            overrides.remove(module_id);
        } else {
            overrides.insert(module_id.into(), Value::Object(entry));
        }
        self.write_scope(scope, settings)
    }

    pub fn remove_module_override(&self, module_id: &str, scope: Scope) -> Result<bool, AmplifierError> {
        let mut settings = self.read_scope(scope)?;
        let Some(overrides) = settings.get_mut("overrides").and_then(Value::as_object_mut) else {
            return Ok(false);
        };
        let removed = overrides.remove(module_id).is_some();
        if removed {
            self.write_scope(scope, settings)?;
        }
        Ok(removed)
    }

    // ----- Scope utilities -----

    /// Project/local scopes require a `.amplifier` directory in the cwd (or
    /// at least not being directly in `$HOME` with no project context).
    /// Global is always available; session requires `with_session()`.
    pub fn is_scope_available(&self, scope: Scope) -> bool {
        match scope {
            Scope::Global => true,
            Scope::Session => self.paths.session_settings.is_some(),
            Scope::Project | Scope::Local => {
                let Ok(cwd) = std::env::current_dir() else {
                    return true;
                };
                if cwd.join(".amplifier").exists() {
                    return true;
                }
                match dirs::home_dir() {
                    Some(home) if home == cwd => false,
                    _ => true,
                }
            }
        }
    }

    pub fn scope_path(&self, scope: Scope) -> Result<&Path, ScopeNotAvailableError> {
        match scope {
            Scope::Global => Ok(&self.paths.global_settings),
            Scope::Project => Ok(&self.paths.project_settings),
            Scope::Local => Ok(&self.paths.local_settings),
            Scope::Session => self.paths.session_settings.as_deref().ok_or_else(|| ScopeNotAvailableError {
                scope: "session".into(),
                message: "session scope requires with_session() first".into(),
            }),
        }
    }

    fn read_scope(&self, scope: Scope) -> Result<Value, AmplifierError> {
        Ok(read_yaml_file(self.scope_path(scope)?))
    }

    fn write_scope(&self, scope: Scope, settings: Value) -> Result<(), AmplifierError> {
        let path = self.scope_path(scope)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml::to_string(&settings).map_err(|err| IoError {
            message: format!("failed to serialize settings: {err}"),
        })?;
        std::fs::write(path, yaml)?;
        Ok(())
    }
}

fn ensure_object<'a>(root: &'a mut Value, key: &str) -> &'a mut Map<String, Value> {
    if !root.is_object() {
        *root = Value::Object(Map::new());
    }
    root.as_object_mut()
        .unwrap()
        .entry(key)
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .expect("settings section is always an object")
}

// ---------------------------------------------------------------------------
// ModuleManager
// ---------------------------------------------------------------------------

/// Module type as tracked by settings-level module management. Distinct
/// from [`crate::models::ModuleType`]: this one carries the settings-key
/// mapping (`tools`/`hooks`/`agents`/`providers`/`orchestrators`/`contexts`)
/// and includes `Agent`, which has no mount point of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagedModuleType {
    Tool,
    Hook,
    Agent,
    Provider,
    Orchestrator,
    Context,
}

impl ManagedModuleType {
    fn settings_key(&self) -> &'static str {
        match self {
            Self::Tool => "tools",
            Self::Hook => "hooks",
            Self::Agent => "agents",
            Self::Provider => "providers",
            Self::Orchestrator => "orchestrators",
            Self::Context => "contexts",
        }
    }

    fn from_settings_key(key: &str) -> Option<Self> {
        Some(match key {
            "tools" => Self::Tool,
            "hooks" => Self::Hook,
            "agents" => Self::Agent,
            "providers" => Self::Provider,
            "orchestrators" => Self::Orchestrator,
            "contexts" => Self::Context,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Hook => "hook",
            Self::Agent => "agent",
            Self::Provider => "provider",
            Self::Orchestrator => "orchestrator",
            Self::Context => "context",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleInfo {
    pub module_id: String,
    pub module_type: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddModuleResult {
    pub module_id: String,
    pub module_type: String,
    pub scope: String,
    pub file: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoveModuleResult {
    pub module_id: String,
    pub scope: String,
    pub removed: bool,
}

/// Adds/removes/lists modules in the `modules.<tools|hooks|...>` sections of
/// scoped settings. Ported from `amplifier_app_cli/module_manager.py`.
pub struct ModuleManager {
    settings: AppSettings,
}

impl ModuleManager {
    pub fn new(settings: AppSettings) -> Self {
        Self { settings }
    }

    pub fn add_module(
        &self,
        module_id: &str,
        module_type: ManagedModuleType,
        scope: Scope,
        config: Option<Value>,
        source: Option<String>,
    ) -> Result<AddModuleResult, AmplifierError> {
        let mut entry = Map::new();
        entry.insert("module".into(), Value::String(module_id.into()));
        if let Some(source) = &source {
            entry.insert("source".into(), Value::String(source.clone()));
        }
        if let Some(config) = config {
            entry.insert("config".into(), config);
        }

        let file = self.settings.scope_path(scope)?.to_path_buf();
        let mut settings = self.settings.read_scope(scope)?;
        let modules = ensure_object(&mut settings, "modules");
        let list = modules
            .entry(module_type.settings_key())
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .expect("modules section entries are always arrays");

        let already_present = list
            .iter()
            .any(|m| m.get("module").and_then(Value::as_str) == Some(module_id));
        if already_present {
            log::warn!("module '{module_id}' already exists at {} scope", scope.as_str());
        } else {
            list.push(Value::Object(entry));
            self.settings.write_scope(scope, settings)?;
            log::info!("added {} '{module_id}' at {} scope", module_type.as_str(), scope.as_str());
        }

        Ok(AddModuleResult {
            module_id: module_id.to_string(),
            module_type: module_type.as_str().to_string(),
            scope: scope.as_str().to_string(),
            file,
        })
    }

    pub fn remove_module(&self, module_id: &str, scope: Scope) -> Result<RemoveModuleResult, AmplifierError> {
        let mut settings = self.settings.read_scope(scope)?;
        let Some(modules) = settings.get_mut("modules").and_then(Value::as_object_mut) else {
            log::warn!("no modules configured at {} scope", scope.as_str());
            return Ok(RemoveModuleResult {
                module_id: module_id.to_string(),
                scope: scope.as_str().to_string(),
                removed: false,
            });
        };

        let mut removed = false;
        let keys: Vec<String> = modules.keys().cloned().collect();
        for key in keys {
            let Some(list) = modules.get_mut(&key).and_then(Value::as_array_mut) else {
                continue;
            };
            let before = list.len();
            list.retain(|m| m.get("module").and_then(Value::as_str) != Some(module_id));
            if list.len() != before {
                removed = true;
            }
            if list.is_empty() {
                modules.remove(&key);
            }
        }
        if modules.is_empty() {
            settings.as_object_mut().unwrap().remove("modules");
        }

        if removed {
            self.settings.write_scope(scope, settings)?;
            log::info!("removed module '{module_id}' from {} scope", scope.as_str());
        } else {
            log::warn!("module '{module_id}' not found at {} scope", scope.as_str());
        }

        Ok(RemoveModuleResult {
            module_id: module_id.to_string(),
            scope: scope.as_str().to_string(),
            removed,
        })
    }

    pub fn get_current_modules(&self) -> Vec<ModuleInfo> {
        let merged = self.settings.get_merged_settings();
        let Some(modules) = merged.get("modules").and_then(Value::as_object) else {
            return Vec::new();
        };

        let mut result = Vec::new();
        for (key, list) in modules {
            let Some(module_type) = ManagedModuleType::from_settings_key(key) else {
                continue;
            };
            let Some(list) = list.as_array() else { continue };
            for item in list {
                if let Some(id) = item.get("module").and_then(Value::as_str) {
                    result.push(ModuleInfo {
                        module_id: id.to_string(),
                        module_type: module_type.as_str().to_string(),
                        source: "settings".to_string(),
                    });
                }
            }
        }
        result
    }
}

// ---------------------------------------------------------------------------
// SettingsBackedResolver
// ---------------------------------------------------------------------------

fn parse_source_uri(uri: &str) -> SourceHint {
    if let Some(rest) = uri.strip_prefix("git+") {
        let (url, reference) = match rest.rsplit_once('@') {
            Some((url, reference)) => (url.to_string(), reference.to_string()),
            None => (rest.to_string(), "main".to_string()),
        };
        let looks_like_sha = reference.len() == 40 && reference.chars().all(|c| c.is_ascii_hexdigit());
        if looks_like_sha {
            SourceHint::GitPinned { url, sha: reference }
        } else {
            SourceHint::Git { url, reference }
        }
    } else if let Some(rest) = uri.strip_prefix("tarball+") {
        let (url, digest) = match rest.split_once('#') {
            Some((url, fragment)) => (url.to_string(), fragment.trim_start_matches("sha256=").to_string()),
            None => (rest.to_string(), String::new()),
        };
        SourceHint::Tarball { url, digest }
    } else if uri == "installed" {
        SourceHint::Installed
    } else {
        SourceHint::Path { path: uri.to_string() }
    }
}

fn path_for_hint(hint: &SourceHint) -> String {
    match hint {
        SourceHint::Installed => String::new(),
        SourceHint::Path { path } => path.clone(),
        SourceHint::Git { url, .. } | SourceHint::GitPinned { url, .. } => url.clone(),
        SourceHint::Tarball { url, .. } => url.clone(),
    }
}

/// Environment variable prefix for per-module source overrides, e.g.
/// `AMPLIFIER_MODULE_SOURCE_TOOL_BASH=/local/checkout/tool-bash`.
pub const ENV_SOURCE_PREFIX: &str = "AMPLIFIER_MODULE_SOURCE_";

fn env_var_name(module_id: &str) -> String {
    format!(
        "{ENV_SOURCE_PREFIX}{}",
        module_id.to_uppercase().replace(['-', '.'], "_")
    )
}

/// Implements the module source resolution order: env override →
/// workspace override → user settings override (`overrides.<id>.source`) →
/// bundle mapping → installed package (returns `None`, deferring to the
/// loader's native registry).
///
/// Resolving a `Git`/`GitPinned`/`Tarball` hint here only records the
/// *intent*; actually fetching the content into the content-addressed
/// cache is [`crate::bundle`]'s job during `prepare()`.
pub struct SettingsBackedResolver {
    settings: AppSettings,
    workspace_search_paths: Vec<PathBuf>,
    bundle_module_paths: RwLock<HashMap<String, String>>,
}

impl SettingsBackedResolver {
    pub fn new(settings: AppSettings) -> Self {
        Self {
            settings,
            workspace_search_paths: vec![PathBuf::from(".amplifier/modules")],
            bundle_module_paths: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_workspace_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.workspace_search_paths = paths;
        self
    }

    /// Installs the bundle's module-id → resolved-path mapping, used as the
    /// fourth resolution step. Called by [`crate::bundle`] after composing
    /// a mount plan.
    pub fn set_bundle_module_paths(&self, mapping: HashMap<String, String>) {
        *self.bundle_module_paths.write().unwrap() = mapping;
    }

    fn env_override(&self, module_id: &str) -> Option<SourceHint> {
        std::env::var(env_var_name(module_id)).ok().map(|v| parse_source_uri(&v))
    }

    fn workspace_override(&self, module_id: &str) -> Option<SourceHint> {
        self.workspace_search_paths.iter().find_map(|base| {
            let candidate = base.join(module_id);
            candidate.is_dir().then(|| SourceHint::Path {
                path: candidate.to_string_lossy().to_string(),
            })
        })
    }

    fn user_settings_override(&self, module_id: &str) -> Option<SourceHint> {
        self.settings.get_source_overrides().get(module_id).map(|uri| parse_source_uri(uri))
    }

    fn bundle_mapping(&self, module_id: &str) -> Option<SourceHint> {
        self.bundle_module_paths
            .read()
            .unwrap()
            .get(module_id)
            .map(|path| SourceHint::Path { path: path.clone() })
    }
}

impl ModuleSourceResolver for SettingsBackedResolver {
    fn resolve(
        &self,
        module_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ResolvedSource>, AmplifierError>> + Send + '_>> {
        let hint = self
            .env_override(module_id)
            .or_else(|| self.workspace_override(module_id))
            .or_else(|| self.user_settings_override(module_id))
            .or_else(|| self.bundle_mapping(module_id));
        Box::pin(async move {
            Ok(hint.map(|hint| ResolvedSource {
                path: path_for_hint(&hint),
                hint,
            }))
        })
    }

    fn known_module_paths(&self) -> HashMap<String, String> {
        self.bundle_module_paths.read().unwrap().clone()
    }
}
