use anyhow::Result;

use crate::engine::{ConstructorService, MessageResult};

pub async fn run_send(service: &ConstructorService, user: &str, message: &str) -> Result<()> {
    let result = service.process_message(user, message).await;
    print_result(&result);
    if !result.success {
        anyhow::bail!("Request failed in phase {}", result.phase_name);
    }
    Ok(())
}

/// Human-readable rendering of one reply.
pub(super) fn print_result(result: &MessageResult) {
    let marker = if result.success { "✅" } else { "❌" };
    println!("{} [{}/8 {}]", marker, result.phase, result.phase_name);
    println!("{}", result.response);

    if let Some(help) = &result.needs_help {
        println!("\n⚠️  {}", help.title);
        for error in &help.errors {
            println!("   - {}", error);
        }
    }
    if let Some(verification) = &result.verification {
        println!("\n🔍 Verification: {}", verification.summary());
    }
    if result.awaiting_input {
        println!("\n💬 Waiting for your reply.");
    }
}
