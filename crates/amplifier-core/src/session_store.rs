//! Session persistence: atomic save/load of a session's transcript and
//! metadata, lookup by (possibly partial) id, and retention cleanup.
//!
//! Ported from `amplifier_app_cli/session_store.py`. Sessions live under
//! `<base_dir>/<session_id>/` as `transcript.jsonl` + `metadata.json`,
//! each with a `.backup` sibling written by [`crate::utils::write_with_backup`].
//! Transcript and metadata are kept as `serde_json::Value` rather than a
//! fixed struct for the transcript (messages are provider-shaped, not a
//! single Rust type) -- metadata is likewise read/written as `Value` so
//! `update_metadata`'s shallow merge can add or overwrite arbitrary keys
//! the way Python's `dict.update()` does, while `get_metadata` still
//! deserializes into [`crate::models::SessionMetadata`] for callers that
//! want the typed view.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::{AmplifierError, SessionError};
use crate::models::SessionMetadata;
use crate::utils::{backup_path_for, project_slug, read_with_backup_recovery, sanitize_message, write_with_backup};

const TRANSCRIPT_FILE: &str = "transcript.jsonl";
const METADATA_FILE: &str = "metadata.json";
const CONFIG_FILE: &str = "config.md";

/// `true` for a top-level session id (a bare UUID); `false` for a
/// spawned sub-session, whose id is `{parent_id}-{span}_{agent_name}`.
pub fn is_top_level_session(session_id: &str) -> bool {
    !session_id.contains('_')
}

/// Extracts a bundle name from a session's `bundle` metadata field,
/// stripping the `bundle:` prefix if present. Returns `None` if the
/// field is absent, empty, or the literal `"unknown"`.
pub fn extract_session_mode(metadata: &Value) -> Option<String> {
    let bundle = metadata.get("bundle").and_then(Value::as_str)?;
    if bundle.is_empty() || bundle == "unknown" {
        return None;
    }
    Some(bundle.strip_prefix("bundle:").unwrap_or(bundle).to_string())
}

fn validate_session_id(session_id: &str) -> Result<(), AmplifierError> {
    let trimmed = session_id.trim();
    if trimmed.is_empty() || trimmed.contains('/') || trimmed.contains('\\') || trimmed == "." || trimmed == ".." {
        return Err(SessionError::InvalidId {
            session_id: session_id.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Filesystem-backed session persistence, rooted at a single directory.
pub struct SessionStore {
    base_dir: PathBuf,
}

impl SessionStore {
    /// Opens (creating if needed) a session store rooted at `base_dir`.
    pub fn new(base_dir: PathBuf) -> Result<Self, AmplifierError> {
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Opens the default location: `~/.amplifier/projects/<project-slug>/sessions/`.
    pub fn with_default_location() -> Result<Self, AmplifierError> {
        let home = dirs::home_dir().ok_or_else(|| {
            AmplifierError::from(crate::errors::ScopeNotAvailableError {
                scope: "global".to_string(),
                message: "could not determine home directory".to_string(),
            })
        })?;
        let slug = project_slug()?;
        Self::new(home.join(".amplifier").join("projects").join(slug).join("sessions"))
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(session_id)
    }

    /// Saves `transcript` and `metadata` atomically. `system`/`developer`
    /// role messages are dropped from the persisted transcript -- they're
    /// provider-merged context, not conversation history.
    pub fn save(&self, session_id: &str, transcript: &[Value], metadata: &Value) -> Result<(), AmplifierError> {
        validate_session_id(session_id)?;
        let dir = self.session_dir(session_id);
        std::fs::create_dir_all(&dir)?;

        self.save_transcript(&dir, transcript)?;
        self.save_metadata(&dir, metadata)?;

        log::debug!("session {session_id} saved successfully");
        Ok(())
    }

    fn save_transcript(&self, dir: &Path, transcript: &[Value]) -> Result<(), AmplifierError> {
        let mut lines = Vec::new();
        for message in transcript {
            let role = message.get("role").and_then(Value::as_str).unwrap_or_default();
            if role == "system" || role == "developer" {
                continue;
            }
            lines.push(serde_json::to_string(&sanitize_message(message))?);
        }
        let content = if lines.is_empty() {
            String::new()
        } else {
            format!("{}\n", lines.join("\n"))
        };
        write_with_backup(&dir.join(TRANSCRIPT_FILE), &content)
    }

    fn save_metadata(&self, dir: &Path, metadata: &Value) -> Result<(), AmplifierError> {
        let content = serde_json::to_string_pretty(metadata)?;
        write_with_backup(&dir.join(METADATA_FILE), &content)
    }

    /// Loads a session's transcript and metadata, recovering from
    /// `.backup` siblings on corruption.
    pub fn load(&self, session_id: &str) -> Result<(Vec<Value>, Value), AmplifierError> {
        validate_session_id(session_id)?;
        let dir = self.session_dir(session_id);
        if !dir.exists() {
            return Err(SessionError::NotFound {
                session_id: session_id.to_string(),
            }
            .into());
        }

        let transcript = self.load_transcript(&dir);
        let metadata = self.load_metadata(&dir, session_id);
        log::debug!("session {session_id} loaded successfully");
        Ok((transcript, metadata))
    }

    fn load_transcript(&self, dir: &Path) -> Vec<Value> {
        let path = dir.join(TRANSCRIPT_FILE);
        read_with_backup_recovery(&path, |contents| {
            let mut messages = Vec::new();
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                messages.push(serde_json::from_str::<Value>(line).ok()?);
            }
            Some(messages)
        })
        .unwrap_or_default()
    }

    fn load_metadata(&self, dir: &Path, session_id: &str) -> Value {
        let path = dir.join(METADATA_FILE);
        let backup = backup_path_for(&path);
        if !path.exists() && !backup.exists() {
            return Value::Object(serde_json::Map::new());
        }

        if let Some(metadata) =
            read_with_backup_recovery(&path, |contents| serde_json::from_str::<Value>(contents).ok())
        {
            return metadata;
        }

        log::warn!("both metadata files corrupted for {session_id}, returning minimal metadata");
        serde_json::json!({
            "session_id": session_id,
            "recovered": true,
            "recovery_time": chrono::Utc::now().to_rfc3339(),
        })
    }

    /// Shallow-merges `updates` into the session's existing metadata
    /// (matching Python's `dict.update()`) and persists the result.
    pub fn update_metadata(&self, session_id: &str, updates: &Value) -> Result<Value, AmplifierError> {
        validate_session_id(session_id)?;
        let dir = self.session_dir(session_id);
        if !dir.exists() {
            return Err(SessionError::NotFound {
                session_id: session_id.to_string(),
            }
            .into());
        }

        let mut metadata = self.load_metadata(&dir, session_id);
        if let (Some(base), Some(overlay)) = (metadata.as_object_mut(), updates.as_object()) {
            for (key, value) in overlay {
                base.insert(key.clone(), value.clone());
            }
        }

        self.save_metadata(&dir, &metadata)?;
        log::debug!(
            "session {session_id} metadata updated: {:?}",
            updates.as_object().map(|o| o.keys().collect::<Vec<_>>()).unwrap_or_default()
        );
        Ok(metadata)
    }

    /// Reads metadata without loading the (potentially large) transcript.
    pub fn get_metadata(&self, session_id: &str) -> Result<SessionMetadata, AmplifierError> {
        validate_session_id(session_id)?;
        let dir = self.session_dir(session_id);
        if !dir.exists() {
            return Err(SessionError::NotFound {
                session_id: session_id.to_string(),
            }
            .into());
        }
        let raw = self.load_metadata(&dir, session_id);
        Ok(serde_json::from_value(raw)?)
    }

    pub fn exists(&self, session_id: &str) -> bool {
        if validate_session_id(session_id).is_err() {
            return false;
        }
        self.session_dir(session_id).is_dir()
    }

    /// Resolves a (possibly partial, prefix-matched) session id to the
    /// single session it identifies.
    pub fn find_session(&self, partial_id: &str, top_level_only: bool) -> Result<String, AmplifierError> {
        let partial_id = partial_id.trim();
        if partial_id.is_empty() {
            return Err(SessionError::InvalidId {
                session_id: partial_id.to_string(),
            }
            .into());
        }

        if self.exists(partial_id) && (!top_level_only || is_top_level_session(partial_id)) {
            return Ok(partial_id.to_string());
        }

        let matches: Vec<String> = self
            .list_sessions(top_level_only)
            .into_iter()
            .filter(|id| id.starts_with(partial_id))
            .collect();

        match matches.len() {
            0 => Err(SessionError::NotFound {
                session_id: partial_id.to_string(),
            }
            .into()),
            1 => Ok(matches.into_iter().next().unwrap()),
            n => Err(SessionError::Ambiguous {
                partial_id: partial_id.to_string(),
                matches: n,
            }
            .into()),
        }
    }

    /// Lists session ids, newest (by directory mtime) first.
    pub fn list_sessions(&self, top_level_only: bool) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.base_dir) else {
            return Vec::new();
        };

        let mut sessions: Vec<(String, std::time::SystemTime)> = Vec::new();
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else { continue };
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            if top_level_only && !is_top_level_session(&name) {
                continue;
            }
            let mtime = entry.metadata().and_then(|m| m.modified()).unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            sessions.push((name, mtime));
        }

        sessions.sort_by(|a, b| b.1.cmp(&a.1));
        sessions.into_iter().map(|(name, _)| name).collect()
    }

    /// Persists a YAML-frontmatter config snapshot for a session.
    pub fn save_config_snapshot(&self, session_id: &str, config: &Value) -> Result<(), AmplifierError> {
        validate_session_id(session_id)?;
        let dir = self.session_dir(session_id);
        std::fs::create_dir_all(&dir)?;

        let yaml = serde_yaml::to_string(config)
            .map_err(|err| AmplifierError::Session(SessionError::Other { message: format!("failed to serialize config snapshot: {err}") }))?;
        let content = format!("---\n{yaml}---\n\nConfig snapshot for session {session_id}\n");
        write_with_backup(&dir.join(CONFIG_FILE), &content)
    }

    /// Removes sessions whose directory wasn't modified in the last
    /// `days` days. Returns the number of sessions removed.
    pub fn cleanup_old_sessions(&self, days: i64) -> Result<usize, AmplifierError> {
        if days < 0 {
            return Err(AmplifierError::Session(SessionError::Other {
                message: "days must be non-negative".to_string(),
            }));
        }

        let Ok(entries) = std::fs::read_dir(&self.base_dir) else {
            return Ok(0);
        };

        let cutoff = std::time::SystemTime::now() - std::time::Duration::from_secs(days as u64 * 86_400);
        let mut removed = 0;
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else { continue };
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let Ok(metadata) = entry.metadata() else { continue };
            let Ok(mtime) = metadata.modified() else { continue };
            if mtime < cutoff {
                if let Err(err) = std::fs::remove_dir_all(entry.path()) {
                    log::error!("failed to remove old session {name}: {err}");
                    continue;
                }
                log::info!("removed old session: {name}");
                removed += 1;
            }
        }

        if removed > 0 {
            log::info!("cleaned up {removed} old sessions");
        }
        Ok(removed)
    }
}
