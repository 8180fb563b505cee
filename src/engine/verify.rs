//! Phase 7: structural checks plus the toolkit's pattern detector.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::collab::{Severity, Toolkit};
use crate::domain::Impact;
use crate::validator::check_syntax;

const ERROR_PENALTY: i32 = 15;
const WARNING_PENALTY: i32 = 5;

/// Minimum score for a result to count as passing.
pub const PASSING_SCORE: u8 = 70;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCheck {
    pub file: String,
    pub check: String,
    pub passed: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub score: u8,
    pub passed: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub checks: Vec<FileCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<Impact>,
}

/// Detector language for a file name.
pub fn language_of(name: &str) -> Option<&'static str> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "html" | "htm" => Some("html"),
        "css" | "scss" => Some("css"),
        "js" | "jsx" | "mjs" => Some("javascript"),
        "ts" | "tsx" => Some("typescript"),
        "py" => Some("python"),
        "json" => Some("json"),
        _ => None,
    }
}

struct Collector<'a> {
    report: &'a mut VerificationReport,
    file: &'a str,
}

impl Collector<'_> {
    /// Record a check; a failure becomes an error or a warning.
    fn check(&mut self, name: &str, passed: bool, severity: Severity, message: &str) {
        self.report.checks.push(FileCheck {
            file: self.file.to_string(),
            check: name.to_string(),
            passed,
        });
        if !passed {
            let line = format!("{}: {}", self.file, message);
            match severity {
                Severity::Error => self.report.errors.push(line),
                Severity::Warning => self.report.warnings.push(line),
            }
        }
    }
}

fn structural_checks(c: &mut Collector<'_>, language: &str, content: &str) {
    let lowered = content.to_lowercase();
    match language {
        "html" => {
            c.check(
                "doctype",
                lowered.contains("<!doctype html"),
                Severity::Warning,
                "missing <!DOCTYPE html>",
            );
            c.check(
                "closed_html",
                lowered.contains("</html>"),
                Severity::Error,
                "document is not closed with </html>",
            );
            c.check(
                "viewport",
                lowered.contains("name=\"viewport\"") || lowered.contains("name='viewport'"),
                Severity::Warning,
                "no viewport meta tag, page will not be responsive",
            );
            c.check(
                "title",
                lowered.contains("<title>"),
                Severity::Warning,
                "missing <title>",
            );
        }
        "css" => {
            c.check(
                "responsive",
                lowered.contains("@media") || lowered.contains("clamp(") || lowered.contains("grid"),
                Severity::Warning,
                "no responsive rules (@media, grid or clamp)",
            );
        }
        "javascript" | "typescript" => {
            c.check(
                "modern_syntax",
                content.contains("const ") || content.contains("let ") || content.contains("=>"),
                Severity::Warning,
                "no modern syntax (const/let/arrow functions)",
            );
        }
        "python" => {
            let has_code = content.lines().any(|l| {
                let t = l.trim();
                !t.is_empty() && !t.starts_with('#')
            });
            c.check("not_empty", has_code, Severity::Error, "file has no code");
        }
        _ => {}
    }
}

/// Score generated files: 100 minus 15 per error and 5 per warning.
pub fn verify(
    files: &BTreeMap<String, String>,
    toolkit: &dyn Toolkit,
    impact: Option<Impact>,
) -> VerificationReport {
    let mut report = VerificationReport::default();

    for (name, content) in files {
        let mut c = Collector {
            report: &mut report,
            file: name,
        };
        c.check(
            "not_empty",
            !content.trim().is_empty(),
            Severity::Error,
            "file is empty",
        );

        let Some(language) = language_of(name) else {
            continue;
        };

        let syntax = check_syntax(Path::new(name), content);
        let syntax_message = syntax.as_ref().err().cloned().unwrap_or_default();
        c.check(
            "syntax",
            syntax.is_ok(),
            Severity::Error,
            &format!("syntax error: {}", syntax_message),
        );
        structural_checks(&mut c, language, content);

        if language != "json" {
            let lines: Vec<&str> = content.lines().collect();
            for issue in toolkit.detect_errors(&lines, language) {
                let line = format!("{}:{}: {}", name, issue.line, issue.message);
                match issue.severity {
                    Severity::Error => report.errors.push(line),
                    Severity::Warning => report.warnings.push(line),
                }
            }
        }
    }

    let score = 100
        - ERROR_PENALTY * report.errors.len() as i32
        - WARNING_PENALTY * report.warnings.len() as i32;
    report.score = score.clamp(0, 100) as u8;
    report.passed = report.errors.is_empty() && report.score >= PASSING_SCORE;
    report.impact = impact;
    report
}

impl VerificationReport {
    pub fn summary(&self) -> String {
        format!(
            "score {}/100, {} error(s), {} warning(s)",
            self.score,
            self.errors.len(),
            self.warnings.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::SandboxToolkit;
    use std::time::Duration;
    use tempfile::TempDir;

    const GOOD_HTML: &str = "<!DOCTYPE html>\n<html>\n<head>\n<meta name=\"viewport\" content=\"width=device-width\">\n<title>Test</title>\n</head>\n<body><img src=\"a.png\" alt=\"a\"></body>\n</html>\n";

    fn toolkit(tmp: &TempDir) -> SandboxToolkit {
        SandboxToolkit::new(tmp.path(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_clean_files_score_full() {
        let tmp = TempDir::new().unwrap();
        let mut files = BTreeMap::new();
        files.insert("index.html".to_string(), GOOD_HTML.to_string());
        files.insert(
            "styles.css".to_string(),
            "body { margin: 0; }\n@media (max-width: 600px) { body { padding: 1rem; } }\n"
                .to_string(),
        );
        files.insert("script.js".to_string(), "const x = () => 1;\n".to_string());

        let report = verify(&files, &toolkit(&tmp), None);
        assert_eq!(report.score, 100, "{:?}", report);
        assert!(report.passed);
    }

    #[test]
    fn test_penalties() {
        let tmp = TempDir::new().unwrap();
        let mut files = BTreeMap::new();
        // unbalanced braces (error), no modern syntax (warning), var (warning)
        files.insert("app.js".to_string(), "var x = 1;\nfunction f() {\n".to_string());

        let report = verify(&files, &toolkit(&tmp), None);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.warnings.len(), 2);
        assert_eq!(report.score, 75);
        assert!(!report.passed);
    }

    #[test]
    fn test_score_is_clamped() {
        let tmp = TempDir::new().unwrap();
        let mut files = BTreeMap::new();
        for i in 0..8 {
            files.insert(format!("f{}.json", i), "{ broken".to_string());
        }
        let report = verify(&files, &toolkit(&tmp), None);
        assert_eq!(report.score, 0);
    }
}
