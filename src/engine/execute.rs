//! Phase 6 helpers: parse generated files, sanitize them, detect dependencies.
//!
//! The service drives the I/O. Everything here is pure over its inputs apart
//! from the containment check, which resolves existing ancestors on disk.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

use crate::collab::{is_writable_extension, normalize, PackageManager, MAX_FILE_SIZE};
use crate::recovery::Outcome;

/// Installs attempted per package manager; the rest are reported as manual.
pub const MAX_INSTALLS_PER_ECOSYSTEM: usize = 3;

const NPM_INSTALLABLE: &[&str] = &[
    "express", "cors", "dotenv", "axios", "lodash", "dayjs", "chart.js", "body-parser", "uuid",
];

const PIP_INSTALLABLE: &[&str] = &[
    "flask", "flask-cors", "requests", "python-telegram-bot", "python-dotenv", "fastapi",
    "uvicorn", "pydantic", "beautifulsoup4",
];

const NODE_BUILTINS: &[&str] = &[
    "fs", "path", "http", "https", "os", "url", "crypto", "events", "util", "child_process",
    "stream", "zlib", "net", "readline", "assert", "buffer",
];

const PYTHON_STDLIB: &[&str] = &[
    "os", "sys", "json", "re", "time", "datetime", "math", "random", "typing", "logging",
    "pathlib", "collections", "asyncio", "itertools", "functools", "subprocess", "unittest",
    "dataclasses", "enum", "uuid", "hashlib", "base64", "csv", "sqlite3", "http", "urllib",
    "threading", "traceback", "string", "io", "shutil", "tempfile", "argparse", "copy",
];

/// Python module name -> pip package, where they differ.
const PIP_ALIASES: &[(&str, &str)] = &[
    ("telegram", "python-telegram-bot"),
    ("dotenv", "python-dotenv"),
    ("bs4", "beautifulsoup4"),
    ("yaml", "pyyaml"),
    ("PIL", "pillow"),
    ("flask_cors", "flask-cors"),
];

/// Default name for a fenced block without a file name, by language tag.
const FENCE_DEFAULT_NAMES: &[(&str, &str)] = &[
    ("html", "index.html"),
    ("css", "styles.css"),
    ("javascript", "script.js"),
    ("js", "script.js"),
    ("typescript", "index.ts"),
    ("ts", "index.ts"),
    ("python", "main.py"),
    ("py", "main.py"),
    ("json", "data.json"),
    ("yaml", "config.yml"),
    ("yml", "config.yml"),
    ("markdown", "README.md"),
    ("md", "README.md"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    #[serde(alias = "name", alias = "filename")]
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct FilesEnvelope {
    files: Vec<GeneratedFile>,
}

/// Generator reply split into files.
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub text: String,
    pub files: Vec<GeneratedFile>,
}

impl Outcome for ParsedResponse {
    fn failure(&self) -> Option<String> {
        if self.files.is_empty() {
            Some("syntax: no files could be parsed from the generated response".to_string())
        } else {
            None
        }
    }
}

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```([^\n`]*)\n(.*?)```").expect("fence regex is valid"))
}

fn files_from_json(raw: &str) -> Option<Vec<GeneratedFile>> {
    serde_json::from_str::<FilesEnvelope>(raw.trim())
        .ok()
        .map(|env| env.files)
        .filter(|files| !files.is_empty())
}

/// Extract files from a generator reply.
///
/// A `{"files": [...]}` JSON block wins. Otherwise every fenced code block
/// becomes a file, named by a file name in its info string or by language.
pub fn parse_files(text: &str) -> Vec<GeneratedFile> {
    for caps in fence_regex().captures_iter(text) {
        let info = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        if info.eq_ignore_ascii_case("json") || info.is_empty() {
            if let Some(files) = files_from_json(&caps[2]) {
                return files;
            }
        }
    }
    if let Some(files) = files_from_json(text) {
        return files;
    }

    let mut files: Vec<GeneratedFile> = Vec::new();
    for caps in fence_regex().captures_iter(text) {
        let info = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        let mut tokens = info.split_whitespace();
        let first = tokens.next().unwrap_or("");
        let explicit = std::iter::once(first)
            .chain(tokens)
            .find(|t| t.contains('.'))
            .map(str::to_string);
        let name = explicit.or_else(|| {
            FENCE_DEFAULT_NAMES
                .iter()
                .find(|(lang, _)| lang.eq_ignore_ascii_case(first))
                .map(|(_, name)| name.to_string())
        });
        let Some(name) = name else {
            debug!("Skipping fenced block with info '{}'", info);
            continue;
        };
        let name = unique_name(&files, name);
        files.push(GeneratedFile {
            path: name,
            content: caps[2].to_string(),
        });
    }
    files
}

fn unique_name(existing: &[GeneratedFile], name: String) -> String {
    if !existing.iter().any(|f| f.path == name) {
        return name;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), format!(".{}", ext)),
        None => (name.clone(), String::new()),
    };
    (2..)
        .map(|n| format!("{}-{}{}", stem, n, ext))
        .find(|candidate| !existing.iter().any(|f| &f.path == candidate))
        .unwrap_or(name)
}

/// A generated file cleared for writing.
#[derive(Debug, Clone)]
pub struct AcceptedFile {
    pub name: String,
    /// Path relative to the sandbox root, as handed to the toolkit
    pub relative: String,
    pub absolute: PathBuf,
    pub content: String,
}

#[derive(Debug, Default)]
pub struct Sanitized {
    pub accepted: Vec<AcceptedFile>,
    pub rejected: Vec<(String, String)>,
}

/// Keep only the base name of each file, enforce the extension allow-list and
/// check that the resolved path stays inside `target_dir` and `root`.
///
/// `root` must be canonical. `target_dir` must be absolute.
pub fn sanitize_files(files: &[GeneratedFile], target_dir: &Path, root: &Path) -> Sanitized {
    let target_dir = normalize(target_dir);
    let mut out = Sanitized::default();

    for file in files {
        let name = match Path::new(&file.path).file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => {
                out.rejected
                    .push((file.path.clone(), "invalid file name".to_string()));
                continue;
            }
        };
        if name.starts_with('.') {
            out.rejected
                .push((file.path.clone(), "hidden files are not allowed".to_string()));
            continue;
        }
        if !is_writable_extension(Path::new(&name)) {
            out.rejected
                .push((file.path.clone(), "file type not allowed".to_string()));
            continue;
        }
        if file.content.len() as u64 > MAX_FILE_SIZE {
            out.rejected
                .push((file.path.clone(), "file is too large".to_string()));
            continue;
        }

        let absolute = normalize(&target_dir.join(&name));
        if !absolute.starts_with(&target_dir) || !absolute.starts_with(root) {
            out.rejected
                .push((file.path.clone(), "path escapes the output directory".to_string()));
            continue;
        }
        if !resolves_inside(&absolute, root) {
            out.rejected
                .push((file.path.clone(), "path resolves outside the workspace".to_string()));
            continue;
        }

        let relative = match absolute.strip_prefix(root) {
            Ok(rel) => rel.to_string_lossy().to_string(),
            Err(_) => {
                out.rejected
                    .push((file.path.clone(), "path escapes the workspace".to_string()));
                continue;
            }
        };

        if out.accepted.iter().any(|a| a.name == name) {
            out.rejected
                .push((file.path.clone(), "duplicate file name".to_string()));
            continue;
        }
        out.accepted.push(AcceptedFile {
            name,
            relative,
            absolute,
            content: file.content.clone(),
        });
    }
    out
}

/// Canonicalize the nearest existing ancestor and check it is under `root`.
fn resolves_inside(path: &Path, root: &Path) -> bool {
    let mut existing = path;
    while !existing.exists() {
        match existing.parent() {
            Some(parent) => existing = parent,
            None => return false,
        }
    }
    existing
        .canonicalize()
        .map(|resolved| resolved.starts_with(root))
        .unwrap_or(false)
}

/// Outcome of the dependency step.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyReport {
    pub detected: Vec<String>,
    pub installed: Vec<String>,
    pub failed: Vec<String>,
    /// Detected but not installed automatically
    pub manual: Vec<String>,
}

fn js_import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"require\(\s*['"]([^'"./][^'"]*)['"]\s*\)|import\s+(?:[^'";]*?\s+from\s+)?['"]([^'"./][^'"]*)['"]"#,
        )
        .expect("js import regex is valid")
    })
}

fn py_import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(?:import\s+([A-Za-z_]\w*)|from\s+([A-Za-z_]\w*)[\w.]*\s+import\b)")
            .expect("python import regex is valid")
    })
}

fn npm_package(spec: &str) -> Option<String> {
    if spec.starts_with("node:") {
        return None;
    }
    let mut parts = spec.split('/');
    let first = parts.next()?;
    let name = if first.starts_with('@') {
        format!("{}/{}", first, parts.next()?)
    } else {
        first.to_string()
    };
    if NODE_BUILTINS.contains(&name.as_str()) {
        return None;
    }
    Some(name)
}

fn pip_package(module: &str) -> Option<String> {
    if PYTHON_STDLIB.contains(&module) {
        return None;
    }
    let package = PIP_ALIASES
        .iter()
        .find(|(m, _)| *m == module)
        .map(|(_, p)| p.to_string())
        .unwrap_or_else(|| module.to_lowercase());
    Some(package)
}

fn push_unique(list: &mut Vec<(PackageManager, String)>, manager: PackageManager, name: String) {
    if !list.iter().any(|(m, n)| *m == manager && *n == name) {
        list.push((manager, name));
    }
}

/// Third-party packages referenced by the generated files, in first-seen order.
pub fn detect_dependencies(files: &BTreeMap<String, String>) -> Vec<(PackageManager, String)> {
    let local_modules: Vec<&str> = files
        .keys()
        .filter_map(|name| name.strip_suffix(".py"))
        .collect();

    let mut found = Vec::new();
    for (name, content) in files {
        let ext = name.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
        match ext {
            "js" | "jsx" | "mjs" | "ts" | "tsx" => {
                for caps in js_import_regex().captures_iter(content) {
                    let spec = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str());
                    if let Some(pkg) = spec.and_then(npm_package) {
                        push_unique(&mut found, PackageManager::Npm, pkg);
                    }
                }
            }
            "py" => {
                for caps in py_import_regex().captures_iter(content) {
                    let module = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str());
                    let Some(module) = module else { continue };
                    if local_modules.contains(&module) {
                        continue;
                    }
                    if let Some(pkg) = pip_package(module) {
                        push_unique(&mut found, PackageManager::Pip, pkg);
                    }
                }
            }
            "txt" if name.ends_with("requirements.txt") => {
                for line in content.lines() {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    let pkg = line
                        .split(|c: char| "=<>~[; ".contains(c))
                        .next()
                        .unwrap_or("")
                        .to_lowercase();
                    if !pkg.is_empty() {
                        push_unique(&mut found, PackageManager::Pip, pkg);
                    }
                }
            }
            "json" if name.ends_with("package.json") => {
                if let Ok(pkg) = serde_json::from_str::<serde_json::Value>(content) {
                    if let Some(deps) = pkg.get("dependencies").and_then(|d| d.as_object()) {
                        for dep in deps.keys() {
                            push_unique(&mut found, PackageManager::Npm, dep.clone());
                        }
                    }
                }
            }
            _ => {}
        }
    }
    found
}

/// Split detected packages into automatic installs and manual ones.
pub fn install_plan(
    detected: &[(PackageManager, String)],
) -> (Vec<(PackageManager, String)>, Vec<String>) {
    let mut install = Vec::new();
    let mut manual = Vec::new();
    for (manager, name) in detected {
        let allowed = match manager {
            PackageManager::Npm => NPM_INSTALLABLE.contains(&name.as_str()),
            PackageManager::Pip => PIP_INSTALLABLE.contains(&name.as_str()),
        };
        let used = install.iter().filter(|(m, _)| m == manager).count();
        if allowed && used < MAX_INSTALLS_PER_ECOSYSTEM {
            install.push((*manager, name.clone()));
        } else {
            manual.push(format!("{} install {}", manager.as_str(), name));
        }
    }
    (install, manual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_json_block() {
        let text = "Here you go:\n```json\n{\"files\": [{\"path\": \"index.html\", \"content\": \"<html></html>\"}, {\"name\": \"styles.css\", \"content\": \"body{}\"}]}\n```\nEnjoy.";
        let files = parse_files(text);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "index.html");
        assert_eq!(files[1].path, "styles.css");
    }

    #[test]
    fn test_parse_fenced_fallback() {
        let text = "```html\n<html></html>\n```\n```css styles/main.css\nbody{}\n```\n```js\nconst a = 1;\n```\n```js\nconst b = 2;\n```\n```\nplain\n```";
        let files = parse_files(text);
        let names: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            names,
            vec!["index.html", "styles/main.css", "script.js", "script-2.js"]
        );
        assert_eq!(files[2].content, "const a = 1;\n");
    }

    #[test]
    fn test_sanitize_keeps_basename_and_rejects_bad_types() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let out = root.join("generated");
        let files = vec![
            GeneratedFile {
                path: "../../etc/evil.html".to_string(),
                content: "x".to_string(),
            },
            GeneratedFile {
                path: "run.sh".to_string(),
                content: "x".to_string(),
            },
            GeneratedFile {
                path: ".env".to_string(),
                content: "x".to_string(),
            },
            GeneratedFile {
                path: "..".to_string(),
                content: "x".to_string(),
            },
        ];
        let result = sanitize_files(&files, &out, &root);
        assert_eq!(result.accepted.len(), 1);
        assert_eq!(result.accepted[0].name, "evil.html");
        assert_eq!(result.accepted[0].relative, "generated/evil.html");
        assert!(result.accepted[0].absolute.starts_with(&out));
        assert_eq!(result.rejected.len(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn test_sanitize_rejects_symlinked_output_dir() {
        let tmp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("generated")).unwrap();
        let files = vec![GeneratedFile {
            path: "index.html".to_string(),
            content: "x".to_string(),
        }];
        let result = sanitize_files(&files, &root.join("generated"), &root);
        assert!(result.accepted.is_empty());
        assert_eq!(result.rejected[0].1, "path resolves outside the workspace");
    }

    #[test]
    fn test_detect_dependencies_and_install_plan() {
        let mut files = BTreeMap::new();
        files.insert(
            "server.js".to_string(),
            "const express = require('express');\nconst fs = require('fs');\nimport axios from 'axios';\nimport './local.js';\nimport { x } from '@scope/pkg/sub';".to_string(),
        );
        files.insert(
            "bot.py".to_string(),
            "import os\nfrom telegram.ext import Updater\nimport helpers\nimport numpy".to_string(),
        );
        files.insert("helpers.py".to_string(), "import json".to_string());

        let detected = detect_dependencies(&files);
        let names: Vec<&str> = detected.iter().map(|(_, n)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["python-telegram-bot", "numpy", "express", "axios", "@scope/pkg"]
        );

        let (install, manual) = install_plan(&detected);
        assert_eq!(install.len(), 3);
        assert_eq!(
            manual,
            vec!["pip install numpy".to_string(), "npm install @scope/pkg".to_string()]
        );
    }

    #[test]
    fn test_install_cap_per_ecosystem() {
        let detected: Vec<(PackageManager, String)> = ["express", "cors", "dotenv", "axios"]
            .iter()
            .map(|n| (PackageManager::Npm, n.to_string()))
            .collect();
        let (install, manual) = install_plan(&detected);
        assert_eq!(install.len(), MAX_INSTALLS_PER_ECOSYSTEM);
        assert_eq!(manual, vec!["npm install axios".to_string()]);
    }

    #[test]
    fn test_empty_parse_is_failure() {
        let parsed = ParsedResponse {
            text: "nothing here".to_string(),
            files: parse_files("nothing here"),
        };
        assert!(parsed.failure().is_some());
    }
}
