//! Engine configuration.
//!
//! Values come from CLI flags first, then the environment, then defaults.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_URL_ENV: &str = "CONSTRUCTOR_API_URL";
pub const API_KEY_ENV: &str = "CONSTRUCTOR_API_KEY";
pub const MODEL_ENV: &str = "CONSTRUCTOR_MODEL";

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 120;

/// Generation endpoint settings.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

impl GenerationConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: non_empty_env(API_URL_ENV).unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_key: non_empty_env(API_KEY_ENV),
            model: non_empty_env(MODEL_ENV).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout_secs: DEFAULT_GENERATION_TIMEOUT_SECS,
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Sandbox base for every file the engine touches
    pub workspace_root: PathBuf,
    /// Where generated files land, relative to `workspace_root`
    pub output_dir: String,
    /// Holds checkpoint records
    pub data_dir: PathBuf,
    pub max_attempts: u32,
    pub backoff_unit: Duration,
    pub checkpoint_cap: usize,
    pub classifier_history_cap: usize,
    pub flow_log_cap: usize,
    pub command_timeout: Duration,
}

impl EngineConfig {
    /// Defaults rooted at `workspace_root`, with data under `~/.constructor`
    /// unless `data_dir` is given.
    pub fn new(workspace_root: impl Into<PathBuf>, data_dir: Option<String>) -> Result<Self> {
        let data_dir = match data_dir {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .context("Could not determine home directory")?
                .join(".constructor"),
        };
        Ok(Self::with_dirs(workspace_root, data_dir))
    }

    pub fn with_dirs(workspace_root: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            output_dir: "generated".to_string(),
            data_dir: data_dir.into(),
            max_attempts: 3,
            backoff_unit: Duration::from_secs(1),
            checkpoint_cap: 10,
            classifier_history_cap: 200,
            flow_log_cap: 500,
            command_timeout: Duration::from_secs(60),
        }
    }

    /// Checkpoint records for this workspace, keyed by its canonical path.
    pub fn checkpoint_dir(&self) -> PathBuf {
        let root = self
            .workspace_root
            .canonicalize()
            .unwrap_or_else(|_| self.workspace_root.clone());
        self.data_dir
            .join("checkpoints")
            .join(workspace_key(&root))
    }
}

/// First 16 hex chars of sha256 over the workspace path.
pub fn workspace_key(root: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(root.to_string_lossy().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::with_dirs("/tmp/ws", "/tmp/data");
        assert_eq!(config.output_dir, "generated");
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.checkpoint_cap, 10);
        assert!(config
            .checkpoint_dir()
            .starts_with(PathBuf::from("/tmp/data/checkpoints")));
    }

    #[test]
    fn test_checkpoint_dir_is_per_workspace() {
        let a = EngineConfig::with_dirs("/tmp/ws-a", "/tmp/data");
        let b = EngineConfig::with_dirs("/tmp/ws-b", "/tmp/data");
        assert_ne!(a.checkpoint_dir(), b.checkpoint_dir());
        assert_eq!(
            a.checkpoint_dir(),
            EngineConfig::with_dirs("/tmp/ws-a", "/tmp/data").checkpoint_dir()
        );
        assert_eq!(workspace_key(Path::new("/tmp/ws-a")).len(), 16);
    }

    #[test]
    fn test_explicit_data_dir_wins() {
        let config = EngineConfig::new("/tmp/ws", Some("/tmp/elsewhere".to_string())).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/elsewhere"));
    }
}
