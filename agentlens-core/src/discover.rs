//! Session file discovery
//!
//! Finds provider session logs on disk using glob patterns rooted at each
//! provider's data directory. Discovery is best-effort: unreadable files are
//! skipped, missing roots yield empty results.

use crate::config::ProviderOverrides;
use crate::error::{Error, Result};
use crate::event::Provider;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// One discovered session log file.
#[derive(Debug, Clone)]
pub struct SessionFile {
    pub path: PathBuf,
    pub provider: Provider,
    pub modified_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Default data root for a provider (e.g. `~/.claude`).
pub fn default_root(provider: Provider) -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    Some(match provider {
        Provider::ClaudeCode => home.join(".claude"),
        Provider::Codex => home.join(".codex"),
        Provider::Gemini => home.join(".gemini"),
    })
}

/// Glob patterns for a provider's session files, relative to its root.
pub fn session_patterns(provider: Provider) -> &'static [&'static str] {
    match provider {
        Provider::ClaudeCode => &["projects/*/*.jsonl"],
        Provider::Codex => &["sessions/*/*/*/rollout-*.jsonl"],
        Provider::Gemini => &["tmp/*/chats/*.jsonl", "tmp/*/chats/*.json"],
    }
}

/// Discover all session files for one provider under `root`.
pub fn discover(provider: Provider, root: &PathBuf) -> Result<Vec<SessionFile>> {
    let mut files = Vec::new();

    for pattern in session_patterns(provider) {
        let full_pattern = root.join(pattern);
        let pattern_str = full_pattern.to_string_lossy();

        let entries = glob::glob(&pattern_str).map_err(|e| Error::Parse {
            provider: provider.to_string(),
            message: format!("Invalid glob pattern: {}", e),
        })?;

        for entry in entries.flatten() {
            let metadata = std::fs::metadata(&entry).ok();
            let now = Utc::now();
            let (size, modified) = metadata
                .map(|m| {
                    (
                        m.len(),
                        m.modified().ok().map(DateTime::from).unwrap_or(now),
                    )
                })
                .unwrap_or((0, now));

            files.push(SessionFile {
                path: entry,
                provider,
                modified_at: modified,
                size_bytes: size,
            });
        }
    }

    Ok(files)
}

/// Discover session files for every provider, honoring path overrides.
///
/// Providers with no resolvable root are skipped silently.
pub fn discover_all(overrides: &ProviderOverrides) -> Vec<SessionFile> {
    let mut files = Vec::new();

    let roots = [
        (
            Provider::ClaudeCode,
            overrides
                .claude_code_path
                .clone()
                .or_else(|| default_root(Provider::ClaudeCode)),
        ),
        (
            Provider::Codex,
            overrides
                .codex_path
                .clone()
                .or_else(|| default_root(Provider::Codex)),
        ),
        (
            Provider::Gemini,
            overrides
                .gemini_path
                .clone()
                .or_else(|| default_root(Provider::Gemini)),
        ),
    ];

    for (provider, root) in roots {
        let Some(root) = root else { continue };
        if !root.exists() {
            continue;
        }
        match discover(provider, &root) {
            Ok(found) => files.extend(found),
            Err(e) => {
                tracing::warn!(provider = %provider, error = %e, "discovery failed");
            }
        }
    }

    files.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_discover_claude_layout() {
        let dir = tempfile::tempdir().unwrap();
        let project_dir = dir.path().join("projects").join("-home-u-dev");
        std::fs::create_dir_all(&project_dir).unwrap();
        let mut f = std::fs::File::create(project_dir.join("session-1.jsonl")).unwrap();
        writeln!(f, "{{}}").unwrap();

        let files = discover(Provider::ClaudeCode, &dir.path().to_path_buf()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].provider, Provider::ClaudeCode);
        assert!(files[0].size_bytes > 0);
    }

    #[test]
    fn test_discover_missing_root() {
        let files = discover(
            Provider::Codex,
            &PathBuf::from("/nonexistent/path/xyz"),
        )
        .unwrap();
        assert!(files.is_empty());
    }
}
