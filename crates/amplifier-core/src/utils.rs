//! Small, standalone utilities shared across the session store, bundle
//! fetcher, and observability paths: atomic file writes with a backup
//! sibling, JSON sanitization for transcript persistence, and
//! redaction/truncation helpers for anything destined for a log line.
//!
//! Grounded in `amplifier_core/utils/truncate.py` (`truncate_values`,
//! `redact_secrets`) and the atomic-write/backup pattern described by
//! `session_store.py`'s `write_with_backup` usage (the function itself
//! lives in `amplifier_foundation`, not retrieved into this pack -- its
//! contract is clear enough from the call sites to reimplement: write the
//! new content, keep the previous file as `.backup` rather than
//! discarding it).

use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

use serde_json::{Map, Value};

use crate::errors::AmplifierError;

/// Known sensitive key name fragments, checked case-insensitively.
/// Mechanism, not policy -- a hook module can layer stricter
/// organization-specific patterns on top of this always-on baseline.
fn sensitive_keys() -> &'static HashSet<&'static str> {
    static KEYS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    KEYS.get_or_init(|| {
        [
            "api_key",
            "apikey",
            "api-key",
            "secret",
            "password",
            "token",
            "credential",
            "credentials",
            "private_key",
            "privatekey",
            "auth",
            "authorization",
        ]
        .into_iter()
        .collect()
    })
}

/// Recursively truncates string leaf values longer than `max_length`,
/// preserving structure. Non-string leaves pass through unchanged.
pub fn truncate_values(value: &Value, max_length: usize) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), truncate_values(v, max_length)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(list) => Value::Array(list.iter().map(|v| truncate_values(v, max_length)).collect()),
        Value::String(s) if s.chars().count() > max_length => {
            let truncated: String = s.chars().take(max_length).collect();
            let remaining = s.chars().count() - max_length;
            Value::String(format!("{truncated}... (truncated {remaining} chars)"))
        }
        other => other.clone(),
    }
}

/// Recursively replaces values at known-sensitive keys with
/// `"[REDACTED]"`. Key matching is case-insensitive substring-free exact
/// match against [`sensitive_keys`].
pub fn redact_secrets(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    if sensitive_keys().contains(k.to_lowercase().as_str()) {
                        (k.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (k.clone(), redact_secrets(v))
                    }
                })
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(list) => Value::Array(list.iter().map(redact_secrets).collect()),
        other => other.clone(),
    }
}

/// Strips ASCII control characters (except `\n`/`\r`/`\t`) and lone
/// (unpaired) UTF-16 surrogates from a string before it's serialized for
/// an LLM or a transcript file. Rust strings can't actually contain an
/// unpaired surrogate (they're always valid UTF-8), so that half of the
/// Python behaviour is a no-op here; the control-character strip is the
/// part that matters.
pub fn sanitize_string(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

/// Recursively sanitizes every string leaf in a JSON value with
/// [`sanitize_string`], leaving structure and non-string leaves
/// untouched. Used before persisting a message to `transcript.jsonl` and
/// before handing `ToolResult` output back to a provider.
pub fn sanitize_for_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize_for_json(v)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(list) => Value::Array(list.iter().map(sanitize_for_json).collect()),
        Value::String(s) => Value::String(sanitize_string(s)),
        other => other.clone(),
    }
}

/// Sanitizes a single chat message for transcript persistence: JSON-safe
/// leaf values only, via [`sanitize_for_json`]. Separated from that
/// function (even though it's currently a thin wrapper) because the
/// Python original draws the same distinction -- `sanitize_message`
/// assumes a message-shaped dict while `sanitize_for_json` is the
/// general-purpose recursive sanitizer it's built from.
pub fn sanitize_message(message: &Value) -> Value {
    sanitize_for_json(message)
}

/// Writes `content` to `path` atomically (tempfile sibling + rename),
/// first preserving whatever was previously at `path` as a `.backup`
/// sibling. Matches `session_store.py`'s write-then-recover-from-backup
/// pattern: the backup is never itself written non-atomically relative
/// to the primary, since it's simply the file that was already durably
/// on disk before this call.
pub fn write_with_backup(path: &Path, content: &str) -> Result<(), AmplifierError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    if path.exists() {
        let backup_path = backup_path_for(path);
        std::fs::copy(path, &backup_path)?;
    }

    let mut tmp = tempfile::Builder::new()
        .prefix(".write-with-backup-")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    {
        use std::io::Write;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;
    }
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

/// Reads `path`, falling back to its `.backup` sibling if the primary is
/// missing or fails to parse/read, matching `session_store.py`'s
/// `_load_transcript`/`_load_metadata` recovery order. `parse` converts
/// raw file contents into `T`; returns `None` if both the primary and the
/// backup are absent or unreadable.
pub fn read_with_backup_recovery<T>(
    path: &Path,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    if let Ok(contents) = std::fs::read_to_string(path) {
        if let Some(parsed) = parse(&contents) {
            return Some(parsed);
        }
        log::warn!("failed to parse {}, trying backup", path.display());
    }

    let backup_path = backup_path_for(path);
    if let Ok(contents) = std::fs::read_to_string(&backup_path) {
        if let Some(parsed) = parse(&contents) {
            log::info!("recovered {} from backup", path.display());
            return Some(parsed);
        }
        log::error!("backup for {} also corrupted", path.display());
    }

    None
}

pub(crate) fn backup_path_for(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".backup");
    path.with_file_name(name)
}

/// Derives a deterministic, filesystem-safe slug for the current working
/// directory, used to scope session storage and settings per project.
/// Ported from `amplifier_app_cli/project_utils.py::get_project_slug`.
pub fn project_slug() -> Result<String, AmplifierError> {
    let cwd = std::env::current_dir()?.canonicalize()?;
    let mut slug = cwd
        .to_string_lossy()
        .replace('/', "-")
        .replace('\\', "-")
        .replace(':', "");
    if !slug.starts_with('-') {
        slug = format!("-{slug}");
    }
    Ok(slug)
}
