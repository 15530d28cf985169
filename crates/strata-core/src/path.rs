use std::path::{Component, Path, PathBuf};

/// Replace platform separators with `/`.
pub fn to_system_independent(text: &str) -> String {
    text.replace('\\', "/")
}

/// Normalize a repository location so that the same repository configured as
/// `file:/repo/`, `/repo` or `C:\repo\` maps to a single index.
///
/// Trailing slashes are trimmed and separators are made system independent.
/// URLs keep their scheme.
pub fn normalize_path_or_url(text: &str) -> String {
    let text = to_system_independent(text.trim());
    let trimmed = text.trim_end_matches('/');
    if trimmed.is_empty() {
        // `/` alone is still a valid (root) location.
        return if text.starts_with('/') {
            "/".to_string()
        } else {
            String::new()
        };
    }
    trimmed.to_string()
}

/// Lexically normalize `path`: drop `.` components and fold `..` into the
/// preceding component. Symlinks are not resolved.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Canonicalize `path` when it exists (without Windows verbatim prefixes),
/// falling back to lexical normalization.
pub fn canonical_path(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| normalize_path(path))
}
