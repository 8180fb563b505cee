use anyhow::{Context, Result};
use std::path::PathBuf;

/// Find the git root directory by searching upward from current directory.
pub fn find_git_root() -> Option<PathBuf> {
    let current = std::env::current_dir().ok()?;
    let mut path = current.as_path();

    loop {
        if path.join(".git").exists() {
            return Some(path.to_path_buf());
        }
        path = path.parent()?;
    }
}

/// Resolve the workspace root: explicit path, else git root, else cwd.
pub fn resolve_workspace_root(workspace_root: Option<String>) -> Result<PathBuf> {
    if let Some(path) = workspace_root {
        return PathBuf::from(&path)
            .canonicalize()
            .with_context(|| format!("Failed to canonicalize provided workspace root: {}", path));
    }
    match find_git_root() {
        Some(root) => Ok(root),
        None => std::env::current_dir().context("Failed to get current directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_root_is_canonicalized() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("a");
        std::fs::create_dir(&nested).unwrap();
        let raw = format!("{}/a/../a", tmp.path().display());

        let resolved = resolve_workspace_root(Some(raw)).unwrap();
        assert_eq!(resolved, nested.canonicalize().unwrap());
    }

    #[test]
    fn test_missing_root_is_an_error() {
        assert!(resolve_workspace_root(Some("/definitely/not/here".to_string())).is_err());
    }
}
