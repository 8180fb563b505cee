//! Phase 8 report.

use crate::intent::Language;
use crate::tasks::TaskSummary;

use super::session::ConstructorSession;

pub fn build_report(session: &ConstructorSession, tasks: &TaskSummary) -> String {
    let language = session
        .analysis
        .as_ref()
        .map(|a| a.language)
        .unwrap_or(Language::Es);
    let mut out = String::new();

    out.push_str(match language {
        Language::Es => "Listo. Resumen de la entrega:\n",
        Language::En => "Done. Delivery summary:\n",
    });

    if !session.generated_files.is_empty() {
        let names: Vec<&str> = session.generated_files.keys().map(String::as_str).collect();
        out.push_str(&format!("Files generated: {}\n", names.join(", ")));
    }
    if session.written_files.is_empty() {
        out.push_str("Files written to disk: none\n");
    } else {
        out.push_str(&format!(
            "Files written to disk: {}\n",
            session.written_files.join(", ")
        ));
    }
    for (file, reason) in &session.rejected_files {
        out.push_str(&format!("Skipped {}: {}\n", file, reason));
    }

    if let Some(deps) = &session.dependencies {
        if !deps.installed.is_empty() {
            out.push_str(&format!("Dependencies installed: {}\n", deps.installed.join(", ")));
        }
        if !deps.failed.is_empty() {
            out.push_str(&format!("Dependencies that failed: {}\n", deps.failed.join(", ")));
        }
        if !deps.manual.is_empty() {
            out.push_str("Manual install required:\n");
            for cmd in &deps.manual {
                out.push_str(&format!("  {}\n", cmd));
            }
        }
    }

    if let Some(verification) = &session.verification {
        out.push_str(&format!("Verification: {}\n", verification.summary()));
        for error in verification.errors.iter().take(5) {
            out.push_str(&format!("  error: {}\n", error));
        }
        if let Some(impact) = &verification.impact {
            out.push_str(&format!(
                "Impact on {}: {} risk, {} importer(s), {} test file(s)\n",
                impact.file,
                impact.risk_level.as_str(),
                impact.importers.len(),
                impact.tests.len()
            ));
        }
    }

    if let Some(id) = &session.checkpoint_id {
        out.push_str(&format!("Checkpoint: {} (use it to roll back)\n", id));
    }
    out.push_str(&format!(
        "Tasks: {}/{} completed",
        tasks.completed, tasks.total
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::execute::DependencyReport;

    #[test]
    fn test_report_lists_files_and_manual_installs() {
        let mut session = ConstructorSession::new("u1");
        session
            .generated_files
            .insert("index.html".to_string(), "<html></html>".to_string());
        session.written_files.push("generated/index.html".to_string());
        session.dependencies = Some(DependencyReport {
            detected: vec!["numpy".to_string()],
            manual: vec!["pip install numpy".to_string()],
            ..Default::default()
        });
        session.checkpoint_id = Some("cp_0000abcd".to_string());

        let report = build_report(
            &session,
            &TaskSummary {
                total: 4,
                completed: 4,
                ..Default::default()
            },
        );
        assert!(report.contains("Files written to disk: generated/index.html"));
        assert!(report.contains("  pip install numpy"));
        assert!(report.contains("cp_0000abcd"));
        assert!(report.ends_with("Tasks: 4/4 completed"));
    }
}
