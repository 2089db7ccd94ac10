//! Install-state tracking so the loader can skip redundant dependency
//! fetches for module crates that haven't changed.
//!
//! Ported from `amplifier_foundation/modules/install_state.py`. The Python
//! original fingerprints `pyproject.toml`/`requirements.txt` and keys
//! invalidation on the Python interpreter's path and mtime (catching `uv
//! tool install --force` recreating the venv underneath a stable path).
//! This crate's module units are Cargo packages, not Python packages, and
//! there's no interpreter to swap out from underneath a running process --
//! the closest analogue is the amplifier binary itself being replaced on
//! disk after a build, so fingerprinting uses `Cargo.toml` and invalidation
//! keys on `std::env::current_exe()`'s path and mtime instead.
//!
//! Self-healing: corrupted JSON, a version mismatch, or a changed exe
//! fingerprint all just produce fresh empty state rather than an error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const VERSION: u32 = 1;
const FILENAME: &str = "install-state.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct ModuleEntry {
    deps_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct State {
    version: u32,
    exe_path: String,
    exe_mtime: Option<i64>,
    modules: HashMap<String, ModuleEntry>,
}

/// Tracks per-module dependency fingerprints under `<cache_dir>/install-state.json`.
pub struct InstallStateManager {
    state_file: PathBuf,
    state: State,
    dirty: bool,
}

impl InstallStateManager {
    /// `cache_dir` is typically `~/.amplifier/cache`.
    pub fn new(cache_dir: &Path) -> Self {
        let state_file = cache_dir.join(FILENAME);
        let state = Self::load(&state_file);
        Self {
            state_file,
            state,
            dirty: false,
        }
    }

    fn exe_identity() -> (String, Option<i64>) {
        let exe_path = std::env::current_exe().unwrap_or_default();
        let mtime = std::fs::metadata(&exe_path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64);
        (exe_path.to_string_lossy().to_string(), mtime)
    }

    fn fresh_state() -> State {
        let (exe_path, exe_mtime) = Self::exe_identity();
        State {
            version: VERSION,
            exe_path,
            exe_mtime,
            modules: HashMap::new(),
        }
    }

    fn load(state_file: &Path) -> State {
        let Ok(contents) = std::fs::read_to_string(state_file) else {
            return Self::fresh_state();
        };
        let Ok(data) = serde_json::from_str::<State>(&contents) else {
            log::debug!("creating fresh install state: {} failed to parse", state_file.display());
            return Self::fresh_state();
        };
        if data.version != VERSION {
            log::debug!(
                "creating fresh install state (version {} != {VERSION})",
                data.version
            );
            return Self::fresh_state();
        }
        let (exe_path, exe_mtime) = Self::exe_identity();
        if data.exe_path != exe_path {
            log::debug!(
                "clearing install state (executable changed: {} -> {exe_path})",
                data.exe_path
            );
            return Self::fresh_state();
        }
        if exe_mtime.is_none() || data.exe_mtime != exe_mtime {
            log::debug!(
                "clearing install state (executable mtime changed: {:?} -> {exe_mtime:?})",
                data.exe_mtime
            );
            return Self::fresh_state();
        }
        data
    }

    fn compute_fingerprint(module_path: &Path) -> String {
        let manifest = module_path.join("Cargo.toml");
        let Ok(content) = std::fs::read(&manifest) else {
            return "none".to_string();
        };
        let mut hasher = Sha256::new();
        hasher.update(b"Cargo.toml");
        hasher.update(&content);
        format!("sha256:{:x}", hasher.finalize())
    }

    fn path_key(module_path: &Path) -> String {
        std::fs::canonicalize(module_path)
            .unwrap_or_else(|_| module_path.to_path_buf())
            .to_string_lossy()
            .to_string()
    }

    /// True if `module_path`'s `Cargo.toml` fingerprint matches the last
    /// recorded install.
    pub fn is_installed(&self, module_path: &Path) -> bool {
        let key = Self::path_key(module_path);
        let Some(entry) = self.state.modules.get(&key) else {
            return false;
        };
        let current = Self::compute_fingerprint(module_path);
        if current != entry.deps_hash {
            log::debug!(
                "fingerprint mismatch for {}: {} -> {current}",
                module_path.display(),
                entry.deps_hash
            );
            return false;
        }
        true
    }

    /// Record that `module_path` was successfully installed at its current
    /// fingerprint.
    pub fn mark_installed(&mut self, module_path: &Path) {
        let key = Self::path_key(module_path);
        let fingerprint = Self::compute_fingerprint(module_path);
        self.state.modules.insert(key, ModuleEntry { deps_hash: fingerprint });
        self.dirty = true;
    }

    /// Clear state for one module (`Some`) or every module (`None`).
    pub fn invalidate(&mut self, module_path: Option<&Path>) {
        match module_path {
            None => {
                if !self.state.modules.is_empty() {
                    self.state.modules.clear();
                    self.dirty = true;
                    log::debug!("invalidated all module install states");
                }
            }
            Some(path) => {
                let key = Self::path_key(path);
                if self.state.modules.remove(&key).is_some() {
                    self.dirty = true;
                    log::debug!("invalidated install state for {}", path.display());
                }
            }
        }
    }

    /// Persist state to disk if changed. Atomic: writes a tempfile sibling
    /// then renames over the target.
    pub fn save(&mut self) -> std::io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let parent = self.state_file.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".install-state-")
            .suffix(".tmp")
            .tempfile_in(parent)?;
        {
            use std::io::Write;
            let json = serde_json::to_vec_pretty(&self.state)?;
            tmp.write_all(&json)?;
            tmp.flush()?;
        }
        tmp.persist(&self.state_file).map_err(|err| err.error)?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_cargo_toml(dir: &Path, contents: &str) {
        std::fs::write(dir.join("Cargo.toml"), contents).unwrap();
    }

    #[test]
    fn fresh_state_reports_nothing_installed() {
        let cache = tempdir().unwrap();
        let module = tempdir().unwrap();
        write_cargo_toml(module.path(), "[package]\nname = \"x\"\n");

        let manager = InstallStateManager::new(cache.path());
        assert!(!manager.is_installed(module.path()));
    }

    #[test]
    fn mark_installed_then_is_installed_true_until_manifest_changes() {
        let cache = tempdir().unwrap();
        let module = tempdir().unwrap();
        write_cargo_toml(module.path(), "[package]\nname = \"x\"\nversion = \"0.1.0\"\n");

        let mut manager = InstallStateManager::new(cache.path());
        manager.mark_installed(module.path());
        assert!(manager.is_installed(module.path()));

        write_cargo_toml(module.path(), "[package]\nname = \"x\"\nversion = \"0.2.0\"\n");
        assert!(!manager.is_installed(module.path()));
    }

    #[test]
    fn save_persists_and_reload_keeps_installed_state() {
        let cache = tempdir().unwrap();
        let module = tempdir().unwrap();
        write_cargo_toml(module.path(), "[package]\nname = \"x\"\n");

        {
            let mut manager = InstallStateManager::new(cache.path());
            manager.mark_installed(module.path());
            manager.save().unwrap();
        }

        let reloaded = InstallStateManager::new(cache.path());
        assert!(reloaded.is_installed(module.path()));
    }

    #[test]
    fn invalidate_one_module_leaves_others() {
        let cache = tempdir().unwrap();
        let module_a = tempdir().unwrap();
        let module_b = tempdir().unwrap();
        write_cargo_toml(module_a.path(), "[package]\nname = \"a\"\n");
        write_cargo_toml(module_b.path(), "[package]\nname = \"b\"\n");

        let mut manager = InstallStateManager::new(cache.path());
        manager.mark_installed(module_a.path());
        manager.mark_installed(module_b.path());

        manager.invalidate(Some(module_a.path()));
        assert!(!manager.is_installed(module_a.path()));
        assert!(manager.is_installed(module_b.path()));
    }

    #[test]
    fn invalidate_all_clears_every_module() {
        let cache = tempdir().unwrap();
        let module_a = tempdir().unwrap();
        write_cargo_toml(module_a.path(), "[package]\nname = \"a\"\n");

        let mut manager = InstallStateManager::new(cache.path());
        manager.mark_installed(module_a.path());
        manager.invalidate(None);
        assert!(!manager.is_installed(module_a.path()));
    }

    #[test]
    fn save_without_changes_is_a_noop() {
        let cache = tempdir().unwrap();
        let manager_state_file = cache.path().join(FILENAME);
        let mut manager = InstallStateManager::new(cache.path());
        manager.save().unwrap();
        assert!(!manager_state_file.exists());
    }

    #[test]
    fn corrupted_state_file_self_heals_to_fresh_state() {
        let cache = tempdir().unwrap();
        std::fs::create_dir_all(cache.path()).unwrap();
        std::fs::write(cache.path().join(FILENAME), "{ not json").unwrap();

        let module = tempdir().unwrap();
        write_cargo_toml(module.path(), "[package]\nname = \"x\"\n");

        let manager = InstallStateManager::new(cache.path());
        assert!(!manager.is_installed(module.path()));
    }
}
