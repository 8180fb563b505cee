//! File/command toolkit contract.
//!
//! Every implementation is responsible for its own sandbox: path
//! containment, extension and command allow-lists, size caps.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::recovery::Outcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Npm,
    Pip,
}

impl PackageManager {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Pip => "pip",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Outcome for CommandOutput {
    fn failure(&self) -> Option<String> {
        if self.success {
            return None;
        }
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        Some(format!(
            "command exited with {}: {}",
            self.exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            detail
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntryInfo {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Issue reported by the pattern-based error detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedIssue {
    pub line: usize,
    pub severity: Severity,
    pub message: String,
}

/// Shape of the project under the sandbox root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub total_files: usize,
    pub by_extension: BTreeMap<String, usize>,
    pub frameworks: Vec<String>,
    pub entry_points: Vec<String>,
}

impl ProjectSummary {
    /// One-paragraph description used to enrich phase 1.
    pub fn describe(&self) -> String {
        if self.total_files == 0 {
            return "Empty project.".to_string();
        }
        let mut top: Vec<(&String, &usize)> = self.by_extension.iter().collect();
        top.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        let kinds = top
            .iter()
            .take(5)
            .map(|(ext, n)| format!("{} .{}", n, ext))
            .collect::<Vec<_>>()
            .join(", ");

        let mut out = format!("{} files ({})", self.total_files, kinds);
        if !self.frameworks.is_empty() {
            out.push_str(&format!("; frameworks: {}", self.frameworks.join(", ")));
        }
        if !self.entry_points.is_empty() {
            out.push_str(&format!("; entry points: {}", self.entry_points.join(", ")));
        }
        out.push('.');
        out
    }
}

/// Sandboxed file and command operations. Paths are relative to `root()`.
#[async_trait]
pub trait Toolkit: Send + Sync {
    /// Canonical sandbox root.
    fn root(&self) -> &Path;

    fn read_file(&self, path: &str) -> Result<String>;

    /// Write `content`, creating parent directories. Returns the absolute path written.
    fn write_file(&self, path: &str, content: &str) -> Result<PathBuf>;

    fn list_directory(&self, path: &str) -> Result<Vec<DirEntryInfo>>;

    async fn run_command(&self, cmd: &str, timeout: Duration) -> Result<CommandOutput>;

    async fn install_package(&self, name: &str, manager: PackageManager) -> Result<CommandOutput>;

    fn detect_errors(&self, lines: &[&str], language: &str) -> Vec<DetectedIssue>;

    fn analyze_project(&self) -> Result<ProjectSummary>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_output_failure_prefers_stderr() {
        let out = CommandOutput {
            success: false,
            exit_code: Some(1),
            stdout: "progress".to_string(),
            stderr: "E404 not found".to_string(),
        };
        assert_eq!(
            out.failure().as_deref(),
            Some("command exited with 1: E404 not found")
        );
        assert!(CommandOutput {
            success: true,
            ..Default::default()
        }
        .failure()
        .is_none());
    }

    #[test]
    fn test_project_summary_describe() {
        let mut summary = ProjectSummary {
            total_files: 3,
            ..Default::default()
        };
        summary.by_extension.insert("js".to_string(), 2);
        summary.by_extension.insert("html".to_string(), 1);
        summary.frameworks.push("express".to_string());
        assert_eq!(
            summary.describe(),
            "3 files (2 .js, 1 .html); frameworks: express."
        );
        assert_eq!(ProjectSummary::default().describe(), "Empty project.");
    }
}
