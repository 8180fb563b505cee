use anyhow::Result;
use serde_json::json;

use crate::engine::ConstructorService;
use crate::workflow::WorkflowCatalog;

/// Print the analysis and workflow for a message without running it.
pub async fn run_classify(service: &ConstructorService, message: &str) -> Result<()> {
    let analysis = service.analyze_message(message);
    let workflow = WorkflowCatalog::decide_workflow(&analysis.intent);
    let out = json!({
        "analysis": analysis,
        "workflow": workflow,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

pub async fn run_impact(service: &ConstructorService, file: &str, description: &str) -> Result<()> {
    let impact = service.analyze_impact(file, description);
    println!("{}", serde_json::to_string_pretty(&impact)?);
    Ok(())
}
