use anyhow::Result;

use crate::engine::ConstructorService;

pub async fn run_checkpoints(service: &ConstructorService) -> Result<()> {
    let checkpoints = service.list_checkpoints();
    if checkpoints.is_empty() {
        println!("No checkpoints.");
        return Ok(());
    }

    for cp in &checkpoints {
        println!(
            "{}  {}  {} file(s)  {}",
            cp.id,
            cp.created_at.format("%Y-%m-%d %H:%M:%S"),
            cp.files.len(),
            cp.description
        );
    }
    Ok(())
}

pub async fn run_rollback(service: &ConstructorService, id: &str) -> Result<()> {
    let report = service.rollback_checkpoint(id)?;
    for path in &report.restored {
        println!("✅ Restored {}", path);
    }
    for (path, reason) in &report.failed {
        println!("❌ {}: {}", path, reason);
    }
    if !report.failed.is_empty() {
        anyhow::bail!("{} file(s) could not be restored", report.failed.len());
    }
    println!("Rolled back to {}.", report.checkpoint_id);
    Ok(())
}
