//! Shell-style expansion and resolution of configuration-supplied paths.

use regex::Regex;
use std::env;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

fn env_var_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("environment variable pattern")
    })
}

/// Expand `$VAR`/`${VAR}` environment variables and a leading `~` in a
/// configuration path value. Unset variables are left as written.
pub fn expanded_path(value: &str) -> PathBuf {
    let expanded = env_var_pattern().replace_all(value, |caps: &regex::Captures| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        env::var(name).unwrap_or_else(|_| caps[0].to_string())
    });
    expand_user(expanded.as_ref())
}

/// Expand the path, resolve symlinks, and normalize `..`/`.` components.
///
/// Does not require the path to exist; existence policy belongs to the
/// caller (see `rundesc::Req::resolved`).
pub fn resolved_path(value: &str) -> PathBuf {
    resolve_lossy(&expanded_path(value))
}

/// Canonicalize a path, falling back to lexical normalization against the
/// current directory when the path does not (yet) exist on disk.
pub fn resolve_lossy(path: &Path) -> PathBuf {
    match path.canonicalize() {
        Ok(resolved) => resolved,
        Err(_) => absolutize(path),
    }
}

fn expand_user(value: &str) -> PathBuf {
    if let Some(rest) = value.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if value == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(value)
}

fn absolutize(path: &Path) -> PathBuf {
    let mut out = if path.is_absolute() {
        PathBuf::new()
    } else {
        env::current_dir().unwrap_or_default()
    };
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}
