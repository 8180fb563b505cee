//! Change impact estimation.
//!
//! Walks the project in-process (respecting .gitignore through
//! `ignore::WalkBuilder`) and matches language-specific import patterns,
//! bare symbol usages and test-file naming conventions. Results are never
//! cached: every call rescans the tree.

use ignore::WalkBuilder;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::domain::{Impact, RiskLevel, Usage};

/// Maximum number of symbol usages collected.
pub const MAX_USAGES: usize = 20;

/// Files larger than this are not searched.
const MAX_SEARCH_FILE_SIZE: u64 = 1024 * 1024;

/// Directory names never searched.
const SKIP_DIRS: &[&str] = &[
    ".git", "node_modules", "target", "dist", "build", "__pycache__", ".venv", "venv",
];

const SEARCHABLE_EXTENSIONS: &[&str] = &[
    "py", "js", "jsx", "ts", "tsx", "mjs", "cjs", "vue", "svelte", "html", "htm", "css", "scss",
];

/// (family, keywords) for breaking-change detection in the change description.
const BREAKING_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "remove",
        &["elimina", "eliminar", "borra", "borrar", "quita", "quitar", "remove", "delete", "drop"],
    ),
    ("rename", &["renombra", "renombrar", "rename", "cambia el nombre"]),
    ("deprecate", &["deprecar", "deprecate", "obsoleto", "obsolete"]),
    (
        "signature",
        &["firma", "signature", "parámetro", "parametro", "parameter", "argumento", "argument"],
    ),
    ("return_type", &["tipo de retorno", "return type", "retorna otro", "returns a different"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Script,
    Python,
    Web,
}

impl Family {
    fn of(ext: &str) -> Option<Self> {
        match ext {
            "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" | "vue" | "svelte" => Some(Family::Script),
            "py" => Some(Family::Python),
            "html" | "htm" | "css" | "scss" => Some(Family::Web),
            _ => None,
        }
    }

    /// Families whose files may import a file of this family.
    fn importer_extensions(&self) -> &'static [&'static str] {
        match self {
            Family::Script => &["js", "jsx", "ts", "tsx", "mjs", "cjs", "vue", "svelte", "html", "htm"],
            Family::Python => &["py"],
            Family::Web => &["html", "htm", "css", "scss", "js", "jsx", "ts", "tsx"],
        }
    }
}

pub struct ChangeImpactAnalyzer {
    root: PathBuf,
}

impl ChangeImpactAnalyzer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn analyze_impact(&self, file_path: &str, change_description: &str) -> Impact {
        let target = self.resolve(file_path);
        let files = self.project_files();

        let importers = self.find_importers(&target, &files);
        let usages = match symbol_in(change_description) {
            Some(symbol) => self.find_usages(&symbol, &target, &files),
            None => Vec::new(),
        };
        let tests = self.find_tests(&target, &files);
        let breaking_changes = breaking_changes(change_description);
        let risk_level = risk_level(
            importers.len(),
            usages.len(),
            tests.len(),
            !breaking_changes.is_empty(),
        );

        debug!(
            "Impact of {}: {} importers, {} usages, {} tests, risk {}",
            file_path,
            importers.len(),
            usages.len(),
            tests.len(),
            risk_level.as_str()
        );

        Impact {
            file: file_path.to_string(),
            importers,
            usages,
            tests,
            breaking_changes,
            risk_level,
        }
    }

    fn resolve(&self, file_path: &str) -> PathBuf {
        let path = Path::new(file_path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    fn project_files(&self) -> Vec<PathBuf> {
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .standard_filters(true)
            .follow_links(false)
            .filter_entry(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map(|name| !SKIP_DIRS.contains(&name))
                    .unwrap_or(true)
            });

        let mut files = Vec::new();
        for entry in builder.build() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Error walking directory: {}", e);
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let searchable = extension(path)
                .map(|ext| SEARCHABLE_EXTENSIONS.contains(&ext.as_str()))
                .unwrap_or(false);
            if searchable {
                files.push(path.to_path_buf());
            }
        }
        files
    }

    fn find_importers(&self, target: &Path, files: &[PathBuf]) -> Vec<String> {
        let Some(ext) = extension(target) else {
            return Vec::new();
        };
        let Some(family) = Family::of(&ext) else {
            return Vec::new();
        };
        let patterns = import_patterns(target, family);
        if patterns.is_empty() {
            return Vec::new();
        }

        let mut importers = Vec::new();
        for file in files {
            if same_file(file, target) {
                continue;
            }
            let importer_ext = extension(file).unwrap_or_default();
            if !family.importer_extensions().contains(&importer_ext.as_str()) {
                continue;
            }
            let Some(content) = read_searchable(file) else {
                continue;
            };
            if patterns.iter().any(|p| p.is_match(&content)) {
                importers.push(self.relative(file));
            }
        }
        importers.sort();
        importers
    }

    fn find_usages(&self, symbol: &str, target: &Path, files: &[PathBuf]) -> Vec<Usage> {
        let Ok(pattern) = Regex::new(&format!(r"\b{}\b", regex::escape(symbol))) else {
            return Vec::new();
        };

        let mut usages = Vec::new();
        for file in files {
            if same_file(file, target) {
                continue;
            }
            let Some(content) = read_searchable(file) else {
                continue;
            };
            for (idx, line) in content.lines().enumerate() {
                if pattern.is_match(line) {
                    usages.push(Usage {
                        file: self.relative(file),
                        line: idx + 1,
                        usage: line.trim().to_string(),
                    });
                    if usages.len() >= MAX_USAGES {
                        return usages;
                    }
                }
            }
        }
        usages
    }

    fn find_tests(&self, target: &Path, files: &[PathBuf]) -> Vec<String> {
        let Some(stem) = target.file_stem().and_then(|s| s.to_str()) else {
            return Vec::new();
        };
        let stem = stem.to_lowercase();

        let mut tests: Vec<String> = files
            .iter()
            .filter(|f| !same_file(f, target))
            .filter(|f| {
                let name = f
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.to_lowercase())
                    .unwrap_or_default();
                is_test_file_name(&name, f) && name.contains(&stem)
            })
            .map(|f| self.relative(f))
            .collect();
        tests.sort();
        tests
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn read_searchable(path: &Path) -> Option<String> {
    let metadata = fs::metadata(path).ok()?;
    if metadata.len() > MAX_SEARCH_FILE_SIZE {
        return None;
    }
    fs::read_to_string(path).ok()
}

fn import_patterns(target: &Path, family: Family) -> Vec<Regex> {
    let Some(stem) = target.file_stem().and_then(|s| s.to_str()) else {
        return Vec::new();
    };
    let name = target
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(stem);
    let stem = regex::escape(stem);
    let name = regex::escape(name);

    let sources = match family {
        Family::Script => vec![
            format!(r#"from\s+['"][^'"]*\b{}(\.\w+)?['"]"#, stem),
            format!(r#"require\(\s*['"][^'"]*\b{}(\.\w+)?['"]\s*\)"#, stem),
            format!(r#"import\s+['"][^'"]*\b{}(\.\w+)?['"]"#, stem),
            format!(r#"import\(\s*['"][^'"]*\b{}(\.\w+)?['"]\s*\)"#, stem),
            format!(r#"src=["'][^"']*\b{}["']"#, name),
        ],
        Family::Python => vec![
            format!(r"(?m)^\s*from\s+[\w.]*\b{}\b\s+import\b", stem),
            format!(r"(?m)^\s*import\s+[\w., ]*\b{}\b", stem),
        ],
        Family::Web => vec![
            format!(r#"href=["'][^"']*\b{}["']"#, name),
            format!(r#"src=["'][^"']*\b{}["']"#, name),
            format!(r#"@import\s+(url\()?["']?[^"';)]*\b{}"#, name),
            format!(r#"import\s+['"][^'"]*\b{}['"]"#, name),
        ],
    };

    sources
        .iter()
        .filter_map(|s| match Regex::new(s) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("Invalid import pattern '{}': {}", s, e);
                None
            }
        })
        .collect()
}

fn is_test_file_name(lower_name: &str, path: &Path) -> bool {
    let in_test_dir = path.components().any(|c| {
        matches!(
            c.as_os_str().to_str(),
            Some("tests") | Some("test") | Some("__tests__") | Some("spec")
        )
    });
    in_test_dir
        || lower_name.starts_with("test_")
        || lower_name.contains("_test.")
        || lower_name.contains(".test.")
        || lower_name.contains(".spec.")
}

/// Function or class named in a change description.
fn symbol_in(description: &str) -> Option<String> {
    crate::intent::extract::function_reference(description)
}

pub fn breaking_changes(description: &str) -> Vec<String> {
    let lowered = description.to_lowercase();
    BREAKING_KEYWORDS
        .iter()
        .filter_map(|(family, keywords)| {
            keywords
                .iter()
                .find(|kw| lowered.contains(*kw))
                .map(|kw| format!("{}: '{}'", family, kw))
        })
        .collect()
}

pub fn risk_level(importers: usize, usages: usize, tests: usize, breaking: bool) -> RiskLevel {
    if breaking || importers > 5 || usages > 10 {
        RiskLevel::High
    } else if importers > 2 || usages > 5 || (tests == 0 && importers > 0) {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_removal_is_high_risk_without_importers() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "cart.js", "export function calcularTotal(items) { return 0; }\n");

        let analyzer = ChangeImpactAnalyzer::new(tmp.path());
        let impact = analyzer.analyze_impact("cart.js", "elimina la función calcularTotal");

        assert!(impact.importers.is_empty());
        assert!(impact.breaking_changes.iter().any(|b| b.starts_with("remove")));
        assert_eq!(impact.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_finds_script_importers_usages_and_tests() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "src/cart.js", "export function calcularTotal(items) {}\n");
        write(
            root,
            "src/checkout.js",
            "import { calcularTotal } from './cart';\nconst t = calcularTotal([]);\n",
        );
        write(root, "src/legacy.js", "const cart = require('./cart.js');\n");
        write(root, "src/other.js", "console.log('cartography');\n");
        write(root, "tests/cart.test.js", "import { calcularTotal } from '../src/cart';\n");
        write(root, "node_modules/lib/cart.js", "require('./cart')\n");

        let analyzer = ChangeImpactAnalyzer::new(root);
        let impact = analyzer.analyze_impact("src/cart.js", "optimiza la función calcularTotal");

        assert_eq!(
            impact.importers,
            vec!["src/checkout.js", "src/legacy.js", "tests/cart.test.js"]
        );
        assert_eq!(impact.tests, vec!["tests/cart.test.js"]);
        assert_eq!(impact.usages.len(), 3);
        assert!(impact.breaking_changes.is_empty());
        assert_eq!(impact.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn test_python_importers() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "utils.py", "def helper():\n    pass\n");
        write(root, "main.py", "from utils import helper\n");
        write(root, "cli.py", "import os, utils\n");
        write(root, "unrelated.py", "import utilsx\n");

        let impact = ChangeImpactAnalyzer::new(root).analyze_impact("utils.py", "add logging");
        assert_eq!(impact.importers, vec!["cli.py", "main.py"]);
        assert_eq!(impact.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn test_risk_thresholds() {
        assert_eq!(risk_level(0, 0, 0, true), RiskLevel::High);
        assert_eq!(risk_level(6, 0, 3, false), RiskLevel::High);
        assert_eq!(risk_level(0, 11, 0, false), RiskLevel::High);
        assert_eq!(risk_level(3, 0, 1, false), RiskLevel::Medium);
        assert_eq!(risk_level(0, 6, 0, false), RiskLevel::Medium);
        assert_eq!(risk_level(1, 0, 0, false), RiskLevel::Medium);
        assert_eq!(risk_level(1, 0, 1, false), RiskLevel::Low);
        assert_eq!(risk_level(0, 0, 0, false), RiskLevel::Low);
    }
}
