//! Local toolkit confined to a workspace directory.
//!
//! Every path-accepting call is resolved and checked against the canonical
//! root; the check runs on each call, not only at construction.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::toolkit::{
    CommandOutput, DetectedIssue, DirEntryInfo, PackageManager, ProjectSummary, Severity, Toolkit,
};

/// Maximum size of a file read or written through the toolkit (1MB).
pub const MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Extensions the toolkit is allowed to write.
pub const WRITABLE_EXTENSIONS: &[&str] = &[
    "html", "htm", "css", "scss", "js", "jsx", "mjs", "ts", "tsx", "json", "py", "md", "txt",
    "svg", "xml", "yml", "yaml", "toml", "vue",
];

/// Programs `run_command` may start.
const ALLOWED_COMMANDS: &[&str] = &["npm", "pip", "pip3", "python", "python3", "node", "git"];

const SHELL_METACHARACTERS: &[char] = &[';', '|', '&', '>', '<', '`', '$', '\n'];

const SKIP_DIRS: &[&str] = &[".git", "node_modules", "target", "__pycache__", ".venv", "venv"];

/// Maximum walk depth for project analysis.
const ANALYZE_MAX_DEPTH: usize = 6;

pub struct SandboxToolkit {
    root: PathBuf,
    install_timeout: Duration,
}

impl SandboxToolkit {
    /// Create a toolkit rooted at `root` (created if missing).
    pub fn new(root: impl AsRef<Path>, install_timeout: Duration) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)
            .with_context(|| format!("Failed to create workspace root: {:?}", root))?;
        let root = root
            .canonicalize()
            .with_context(|| format!("Failed to canonicalize workspace root: {:?}", root))?;
        Ok(Self {
            root,
            install_timeout,
        })
    }

    /// Resolve `path` inside the sandbox.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let candidate = Path::new(path);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        confine(&self.root, &joined)
    }

    fn check_size(&self, path: &Path) -> Result<()> {
        let size = fs::metadata(path)
            .with_context(|| format!("Failed to stat {:?}", path))?
            .len();
        if size > MAX_FILE_SIZE {
            bail!("File {:?} is too large ({} bytes)", path, size);
        }
        Ok(())
    }
}

/// Check an absolute `path` against the canonical `root`.
///
/// Rejects anything whose lexical form escapes the root, and anything
/// whose nearest existing ancestor resolves (through symlinks) outside it.
/// Returns the normalized path.
pub fn confine(root: &Path, path: &Path) -> Result<PathBuf> {
    let normalized = normalize(path);
    if !normalized.starts_with(root) {
        bail!("Path {:?} is outside the workspace", path);
    }

    let mut existing = normalized.as_path();
    while !existing.exists() {
        match existing.parent() {
            Some(parent) => existing = parent,
            None => break,
        }
    }
    let resolved = existing
        .canonicalize()
        .with_context(|| format!("Failed to resolve {:?}", existing))?;
    if !resolved.starts_with(root) {
        bail!("Path {:?} resolves outside the workspace", path);
    }
    Ok(normalized)
}

/// Lexically remove `.` and `..` components.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub fn is_writable_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| WRITABLE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn valid_package_name(name: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^@?[A-Za-z0-9][A-Za-z0-9._/-]*$").expect("package regex is valid"))
        .is_match(name)
        && name.len() <= 100
}

#[async_trait]
impl Toolkit for SandboxToolkit {
    fn root(&self) -> &Path {
        &self.root
    }

    fn read_file(&self, path: &str) -> Result<String> {
        let resolved = self.resolve(path)?;
        self.check_size(&resolved)?;
        fs::read_to_string(&resolved).with_context(|| format!("Failed to read {}", path))
    }

    fn write_file(&self, path: &str, content: &str) -> Result<PathBuf> {
        let resolved = self.resolve(path)?;
        if !is_writable_extension(&resolved) {
            bail!("Writing files of this type is not allowed: {}", path);
        }
        if content.len() as u64 > MAX_FILE_SIZE {
            bail!("Content for {} is too large ({} bytes)", path, content.len());
        }
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        fs::write(&resolved, content).with_context(|| format!("Failed to write {}", path))?;
        debug!("Wrote {} bytes to {:?}", content.len(), resolved);
        Ok(resolved)
    }

    fn list_directory(&self, path: &str) -> Result<Vec<DirEntryInfo>> {
        let resolved = self.resolve(path)?;
        let mut entries = Vec::new();
        for entry in
            fs::read_dir(&resolved).with_context(|| format!("Failed to list {}", path))?
        {
            let entry = entry?;
            let metadata = entry.metadata()?;
            entries.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().to_string(),
                is_dir: metadata.is_dir(),
                size: metadata.len(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn run_command(&self, cmd: &str, timeout: Duration) -> Result<CommandOutput> {
        if cmd.contains(SHELL_METACHARACTERS) {
            bail!("Command contains forbidden characters: {}", cmd);
        }
        let mut parts = cmd.split_whitespace();
        let Some(program) = parts.next() else {
            bail!("Empty command");
        };
        if !ALLOWED_COMMANDS.contains(&program) {
            bail!("Command not allowed: {}", program);
        }
        let args: Vec<&str> = parts.collect();
        if args.iter().any(|a| a.contains("..")) {
            bail!("Command arguments may not leave the workspace: {}", cmd);
        }

        debug!("Running command in sandbox: {}", cmd);
        let child = Command::new(program)
            .args(&args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", program))?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.with_context(|| format!("Failed to run {}", cmd))?,
            Err(_) => bail!("Command timed out after {:?}: {}", timeout, cmd),
        };

        Ok(CommandOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn install_package(&self, name: &str, manager: PackageManager) -> Result<CommandOutput> {
        if !valid_package_name(name) {
            bail!("Invalid package name: {}", name);
        }
        let cmd = match manager {
            PackageManager::Npm => format!("npm install {}", name),
            PackageManager::Pip => format!("pip install {}", name),
        };
        info!("Installing {} with {}", name, manager.as_str());
        self.run_command(&cmd, self.install_timeout).await
    }

    fn detect_errors(&self, lines: &[&str], language: &str) -> Vec<DetectedIssue> {
        detect_errors(lines, language)
    }

    fn analyze_project(&self) -> Result<ProjectSummary> {
        let mut summary = ProjectSummary::default();
        let walker = WalkDir::new(&self.root)
            .max_depth(ANALYZE_MAX_DEPTH)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || e.file_name()
                        .to_str()
                        .map(|n| !SKIP_DIRS.contains(&n))
                        .unwrap_or(true)
            });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Error walking workspace: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            summary.total_files += 1;
            let ext = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
                .unwrap_or_else(|| "(none)".to_string());
            *summary.by_extension.entry(ext).or_insert(0) += 1;

            if entry.depth() == 1 {
                let name = entry.file_name().to_string_lossy().to_string();
                if matches!(
                    name.as_str(),
                    "index.html" | "main.py" | "app.py" | "server.js" | "index.js" | "bot.py"
                ) {
                    summary.entry_points.push(name);
                }
            }
        }
        summary.entry_points.sort();
        summary.frameworks = detect_frameworks(&self.root);
        Ok(summary)
    }
}

fn detect_frameworks(root: &Path) -> Vec<String> {
    const JS: &[&str] = &["react", "vue", "next", "express", "svelte", "vite", "tailwindcss"];
    const PY: &[&str] = &["flask", "django", "fastapi", "aiogram", "python-telegram-bot"];

    let mut found = Vec::new();
    if let Ok(raw) = fs::read_to_string(root.join("package.json")) {
        if let Ok(pkg) = serde_json::from_str::<serde_json::Value>(&raw) {
            for section in ["dependencies", "devDependencies"] {
                if let Some(deps) = pkg.get(section).and_then(|d| d.as_object()) {
                    for name in JS {
                        if deps.contains_key(*name) && !found.iter().any(|f| f == name) {
                            found.push(name.to_string());
                        }
                    }
                }
            }
        }
    }
    if let Ok(raw) = fs::read_to_string(root.join("requirements.txt")) {
        let lowered = raw.to_lowercase();
        for name in PY {
            let listed = lowered.lines().any(|l| {
                l.trim()
                    .split(|c: char| "=<>~[ ".contains(c))
                    .next()
                    .map(|pkg| pkg == *name)
                    .unwrap_or(false)
            });
            if listed {
                found.push(name.to_string());
            }
        }
    }
    found
}

struct IssuePattern {
    languages: &'static [&'static str],
    pattern: &'static str,
    severity: Severity,
    message: &'static str,
}

const ISSUE_PATTERNS: &[IssuePattern] = &[
    IssuePattern {
        languages: &["*"],
        pattern: r"\b(TODO|FIXME|XXX)\b",
        severity: Severity::Warning,
        message: "Unfinished code marker",
    },
    IssuePattern {
        languages: &["javascript", "typescript"],
        pattern: r"\beval\s*\(",
        severity: Severity::Error,
        message: "eval() executes arbitrary code",
    },
    IssuePattern {
        languages: &["javascript", "typescript"],
        pattern: r"\bdocument\.write\s*\(",
        severity: Severity::Warning,
        message: "document.write blocks rendering",
    },
    IssuePattern {
        languages: &["javascript", "typescript"],
        pattern: r"\bconsole\.log\s*\(",
        severity: Severity::Warning,
        message: "Leftover console.log",
    },
    IssuePattern {
        languages: &["javascript", "typescript"],
        pattern: r"^\s*var\s",
        severity: Severity::Warning,
        message: "Use let/const instead of var",
    },
    IssuePattern {
        languages: &["javascript", "typescript"],
        pattern: r"[^=!<>]==[^=]",
        severity: Severity::Warning,
        message: "Loose equality, prefer ===",
    },
    IssuePattern {
        languages: &["python"],
        pattern: r"^\s*print\s+[^(\s=]",
        severity: Severity::Error,
        message: "Python 2 print statement",
    },
    IssuePattern {
        languages: &["python"],
        pattern: r"^\s*except\s*:",
        severity: Severity::Warning,
        message: "Bare except clause",
    },
    IssuePattern {
        languages: &["python"],
        pattern: r"\beval\s*\(|\bexec\s*\(",
        severity: Severity::Error,
        message: "eval/exec executes arbitrary code",
    },
    IssuePattern {
        languages: &["html"],
        pattern: r#"(src|href)=["']http://"#,
        severity: Severity::Warning,
        message: "Insecure http:// resource",
    },
    IssuePattern {
        languages: &["html"],
        pattern: r"(?i)lorem ipsum",
        severity: Severity::Warning,
        message: "Placeholder text left in page",
    },
    IssuePattern {
        languages: &["css"],
        pattern: r"!important",
        severity: Severity::Warning,
        message: "!important overrides the cascade",
    },
];

fn compiled_patterns() -> &'static Vec<(&'static IssuePattern, Regex)> {
    static COMPILED: OnceLock<Vec<(&'static IssuePattern, Regex)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        ISSUE_PATTERNS
            .iter()
            .filter_map(|p| match Regex::new(p.pattern) {
                Ok(re) => Some((p, re)),
                Err(e) => {
                    warn!("Invalid issue pattern '{}': {}", p.pattern, e);
                    None
                }
            })
            .collect()
    })
}

/// Pattern-based error detector over source lines.
pub fn detect_errors(lines: &[&str], language: &str) -> Vec<DetectedIssue> {
    let mut issues = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        for (pattern, re) in compiled_patterns() {
            let applies = pattern
                .languages
                .iter()
                .any(|l| *l == "*" || *l == language);
            if applies && re.is_match(line) {
                issues.push(DetectedIssue {
                    line: idx + 1,
                    severity: pattern.severity,
                    message: pattern.message.to_string(),
                });
            }
        }
        if language == "html" && line.contains("<img") && !line.contains("alt=") {
            issues.push(DetectedIssue {
                line: idx + 1,
                severity: Severity::Warning,
                message: "Image without alt text".to_string(),
            });
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn toolkit(tmp: &TempDir) -> SandboxToolkit {
        SandboxToolkit::new(tmp.path(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_write_and_read_inside_root() {
        let tmp = TempDir::new().unwrap();
        let tk = toolkit(&tmp);
        let written = tk.write_file("site/index.html", "<html></html>").unwrap();
        assert!(written.starts_with(tk.root()));
        assert_eq!(tk.read_file("site/index.html").unwrap(), "<html></html>");
        assert_eq!(tk.list_directory("site").unwrap()[0].name, "index.html");
    }

    #[test]
    fn test_traversal_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let tk = toolkit(&tmp);
        assert!(tk.write_file("../escape.html", "x").is_err());
        assert!(tk.write_file("a/../../escape.html", "x").is_err());
        assert!(tk.read_file("/etc/passwd").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let tk = toolkit(&tmp);
        std::os::unix::fs::symlink(outside.path(), tmp.path().join("link")).unwrap();
        assert!(tk.write_file("link/index.html", "x").is_err());
    }

    #[test]
    fn test_extension_allow_list() {
        let tmp = TempDir::new().unwrap();
        let tk = toolkit(&tmp);
        assert!(tk.write_file("run.sh", "rm -rf /").is_err());
        assert!(tk.write_file("app.exe", "x").is_err());
        assert!(tk.write_file("styles.css", "body{}").is_ok());
    }

    #[tokio::test]
    async fn test_command_allow_list() {
        let tmp = TempDir::new().unwrap();
        let tk = toolkit(&tmp);
        assert!(tk.run_command("rm -rf .", Duration::from_secs(1)).await.is_err());
        assert!(tk
            .run_command("npm install x; rm -rf /", Duration::from_secs(1))
            .await
            .is_err());
        assert!(tk
            .install_package("bad name", PackageManager::Npm)
            .await
            .is_err());
    }

    #[test]
    fn test_detect_errors() {
        let js = ["var x = 1;", "eval(code);", "const ok = 2;"];
        let issues = detect_errors(&js, "javascript");
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[1].severity, Severity::Error);
        assert_eq!(issues[1].line, 2);

        let html = ["<img src=\"a.png\">", "<img src=\"b.png\" alt=\"b\">"];
        let issues = detect_errors(&html, "html");
        assert_eq!(issues.len(), 1);

        let py = ["print 'hi'", "print('hi')"];
        assert_eq!(detect_errors(&py, "python").len(), 1);
    }

    #[test]
    fn test_analyze_project() {
        let tmp = TempDir::new().unwrap();
        let tk = toolkit(&tmp);
        tk.write_file("index.html", "<html></html>").unwrap();
        tk.write_file("js/app.js", "const a = 1;").unwrap();
        tk.write_file(
            "package.json",
            r#"{"dependencies": {"express": "^4.0.0"}}"#,
        )
        .unwrap();
        fs::create_dir_all(tmp.path().join("node_modules/x")).unwrap();
        fs::write(tmp.path().join("node_modules/x/index.js"), "").unwrap();

        let summary = tk.analyze_project().unwrap();
        assert_eq!(summary.total_files, 3);
        assert_eq!(summary.entry_points, vec!["index.html"]);
        assert_eq!(summary.frameworks, vec!["express"]);
    }
}
