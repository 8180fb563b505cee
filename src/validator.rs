//! Pre-execution checks for file actions.
//!
//! Blocks only on structural problems (a missing file, a stale edit target).
//! Syntax problems in the new content are reported as warnings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::ValidationResult;

/// A proposed file action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Write {
        path: PathBuf,
        content: String,
    },
    Edit {
        path: PathBuf,
        /// Text that must still be present verbatim in the current file
        old: Option<String>,
        new: String,
    },
    Delete {
        path: PathBuf,
    },
}

impl Action {
    pub fn path(&self) -> &Path {
        match self {
            Action::Write { path, .. } | Action::Edit { path, .. } | Action::Delete { path } => {
                path
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Write { .. } => "write",
            Action::Edit { .. } => "edit",
            Action::Delete { .. } => "delete",
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct PreExecutionValidator;

impl PreExecutionValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, action: &Action) -> ValidationResult {
        let mut result = ValidationResult::new();
        let path = action.path();
        let exists = path.is_file();
        result.check("file_exists", exists);

        match action {
            Action::Write { content, .. } => {
                if exists {
                    result.warn(format!(
                        "File {} already exists and will be overwritten",
                        path.display()
                    ));
                }
                self.check_syntax(path, content, &mut result);
            }
            Action::Edit { old, new, .. } => {
                if !exists {
                    result.error(format!("File {} does not exist", path.display()));
                } else {
                    if let Some(old) = old {
                        self.check_target_present(path, old, &mut result);
                    }
                    self.check_syntax(path, new, &mut result);
                }
            }
            Action::Delete { .. } => {
                if !exists {
                    result.error(format!("File {} does not exist", path.display()));
                }
            }
        }

        result.check("imports_available", self.check_imports_available(action));
        result.check(
            "no_concurrent_modification",
            self.check_no_concurrent_modification(action),
        );

        debug!(
            "Validated {} on {}: valid={} errors={} warnings={}",
            action.kind(),
            path.display(),
            result.valid,
            result.errors.len(),
            result.warnings.len()
        );
        result
    }

    /// Optimistic concurrency guard: the edit target must still be in the file.
    fn check_target_present(&self, path: &Path, old: &str, result: &mut ValidationResult) {
        match std::fs::read_to_string(path) {
            Ok(current) => {
                let present = current.contains(old);
                result.check("target_present", present);
                if !present {
                    result.error(format!(
                        "Content to replace was not found in {}; the file changed since it was read",
                        path.display()
                    ));
                }
            }
            Err(e) => {
                result.check("target_present", false);
                result.error(format!("Could not read {}: {}", path.display(), e));
            }
        }
    }

    fn check_syntax(&self, path: &Path, content: &str, result: &mut ValidationResult) {
        match check_syntax(path, content) {
            Ok(()) => result.check("syntax_valid", true),
            Err(msg) => {
                result.check("syntax_valid", false);
                result.warn(format!("Possible syntax problem in {}: {}", path.display(), msg));
            }
        }
    }

    /// Extension point: dependency availability. Always passes for now.
    fn check_imports_available(&self, _action: &Action) -> bool {
        true
    }

    /// Extension point: detection of concurrent writers. Always passes for now.
    fn check_no_concurrent_modification(&self, _action: &Action) -> bool {
        true
    }
}

/// Language-aware structural parse of `content`.
pub fn check_syntax(path: &Path, content: &str) -> Result<(), String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "json" => serde_json::from_str::<serde_json::Value>(content)
            .map(|_| ())
            .map_err(|e| e.to_string()),
        "js" | "jsx" | "ts" | "tsx" | "mjs" | "css" | "scss" | "java" | "rs" | "go" | "php" => {
            check_balanced(content, CommentStyle::CLike)
        }
        "py" => check_balanced(content, CommentStyle::Hash),
        _ => Ok(()),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CommentStyle {
    CLike,
    Hash,
}

/// Bracket balance, skipping string literals and comments.
fn check_balanced(content: &str, style: CommentStyle) -> Result<(), String> {
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut chars = content.chars().peekable();
    let mut line = 1;
    let mut in_string: Option<char> = None;

    while let Some(c) = chars.next() {
        if c == '\n' {
            line += 1;
        }
        if let Some(quote) = in_string {
            if c == '\\' {
                if chars.next() == Some('\n') {
                    line += 1;
                }
            } else if c == quote {
                in_string = None;
            } else if c == '\n' && quote != '`' && style == CommentStyle::CLike {
                return Err(format!("unterminated string literal on line {}", line - 1));
            }
            continue;
        }

        match c {
            '"' | '\'' | '`' => in_string = Some(c),
            '#' if style == CommentStyle::Hash => skip_line(&mut chars, &mut line),
            '/' if style == CommentStyle::CLike && chars.peek() == Some(&'/') => {
                skip_line(&mut chars, &mut line)
            }
            '/' if style == CommentStyle::CLike && chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                    }
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, open_line)) => {
                        return Err(format!(
                            "'{}' on line {} does not match '{}' opened on line {}",
                            c, line, open, open_line
                        ))
                    }
                    None => return Err(format!("unexpected '{}' on line {}", c, line)),
                }
            }
            _ => {}
        }
    }

    if let Some(quote) = in_string {
        return Err(format!("unterminated {} string", quote));
    }
    match stack.pop() {
        Some((open, open_line)) => Err(format!("'{}' opened on line {} is never closed", open, open_line)),
        None => Ok(()),
    }
}

fn skip_line(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, line: &mut usize) {
    for c in chars.by_ref() {
        if c == '\n' {
            *line += 1;
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_edit_missing_file_fails_before_target_check() {
        let tmp = TempDir::new().unwrap();
        let action = Action::Edit {
            path: tmp.path().join("missing.js"),
            old: Some("x".to_string()),
            new: "let y = 1;".to_string(),
        };
        let result = PreExecutionValidator::new().validate(&action);
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("does not exist"));
        assert!(!result.checks.contains_key("target_present"));
    }

    #[test]
    fn test_edit_against_stale_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("app.js");
        std::fs::write(&path, "const total = 1;\n").unwrap();

        let validator = PreExecutionValidator::new();
        let stale = Action::Edit {
            path: path.clone(),
            old: Some("const total = 2;".to_string()),
            new: "const total = 3;".to_string(),
        };
        let result = validator.validate(&stale);
        assert!(!result.valid);
        assert_eq!(result.checks.get("target_present"), Some(&false));

        let fresh = Action::Edit {
            path,
            old: Some("const total = 1;".to_string()),
            new: "const total = 3;".to_string(),
        };
        assert!(validator.validate(&fresh).valid);
    }

    #[test]
    fn test_syntax_problems_are_warnings() {
        let tmp = TempDir::new().unwrap();
        let action = Action::Write {
            path: tmp.path().join("data.json"),
            content: "{ not json".to_string(),
        };
        let result = PreExecutionValidator::new().validate(&action);
        assert!(result.valid);
        assert_eq!(result.checks.get("syntax_valid"), Some(&false));
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_delete_missing_file_is_error() {
        let tmp = TempDir::new().unwrap();
        let action = Action::Delete {
            path: tmp.path().join("gone.txt"),
        };
        let result = PreExecutionValidator::new().validate(&action);
        assert!(!result.valid);
        assert_eq!(result.checks.get("imports_available"), Some(&true));
        assert_eq!(result.checks.get("no_concurrent_modification"), Some(&true));
    }

    #[test]
    fn test_check_balanced() {
        assert!(check_syntax(Path::new("a.js"), "function f() { return [1, 2]; }").is_ok());
        assert!(check_syntax(Path::new("a.js"), "// }\nconst s = \"{\";").is_ok());
        assert!(check_syntax(Path::new("a.js"), "function f() { return 1;").is_err());
        assert!(check_syntax(Path::new("a.py"), "def f(x):\n    return (x + 1\n").is_err());
        assert!(check_syntax(Path::new("a.py"), "# (\nprint('ok')\n").is_ok());
        assert!(check_syntax(Path::new("a.html"), "<div>").is_ok());
    }
}
