use anyhow::Result;
use std::io::{self, BufRead, Write};

use crate::engine::ConstructorService;

use super::send::print_result;

const HISTORY_LINES: usize = 10;

/// Interactive loop. `/status`, `/history`, `/reset` and `/exit` are handled locally.
pub async fn run_chat(service: &ConstructorService, user: &str) -> Result<()> {
    println!("🏗️  Constructor chat as '{}'. Type /exit to quit.\n", user);
    let stdin = io::stdin();

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();

        match line {
            "" => continue,
            "/exit" | "/quit" => break,
            "/reset" => {
                let snapshot = service.reset_session(user).await;
                println!("Session reset ({}).\n", snapshot.session_id);
            }
            "/history" => {
                for record in service.classification_history(HISTORY_LINES) {
                    println!(
                        "{}  {:<16} {:.2}  {}",
                        record.classified_at.format("%H:%M:%S"),
                        record.intent_type.as_str(),
                        record.confidence,
                        record.message
                    );
                }
                println!();
            }
            "/status" => match service.get_session_status(user).await {
                Some(status) => println!("{}\n", serde_json::to_string_pretty(&status)?),
                None => println!("No session yet.\n"),
            },
            message => {
                let result = service.process_message(user, message).await;
                print_result(&result);
                println!();
            }
        }
    }

    Ok(())
}
