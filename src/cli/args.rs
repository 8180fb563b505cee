use clap::{Parser, Subcommand};

/// Constructor - turns natural-language requests into working files
#[derive(Parser)]
#[command(name = "constructor")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Run as MCP server over stdio
    #[arg(long)]
    pub mcp: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Workspace root (auto-detects git root if absent)
    #[arg(short = 'w', long)]
    pub workspace_root: Option<String>,

    /// Directory for checkpoints. Defaults to ~/.constructor
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Generation model (overrides CONSTRUCTOR_MODEL)
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send a single message and print the reply
    Send {
        /// User the conversation belongs to
        #[arg(short, long, default_value = "cli")]
        user: String,

        message: String,
    },
    /// Interactive conversation on stdin
    Chat {
        #[arg(short, long, default_value = "cli")]
        user: String,
    },
    /// Show how a message would be classified and which workflow it gets
    Classify { message: String },
    /// Analyze the impact of changing a file
    Impact {
        file: String,

        /// What the change does
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// List retained checkpoints
    Checkpoints,
    /// Restore the files recorded in a checkpoint
    Rollback { id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send() {
        let cli = Cli::parse_from(["constructor", "-w", "/tmp/ws", "send", "-u", "ana", "hola"]);
        assert_eq!(cli.workspace_root.as_deref(), Some("/tmp/ws"));
        match cli.command {
            Some(Commands::Send { user, message }) => {
                assert_eq!(user, "ana");
                assert_eq!(message, "hola");
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn test_mcp_flag_without_command() {
        let cli = Cli::parse_from(["constructor", "--mcp", "--data-dir", "/tmp/data"]);
        assert!(cli.mcp);
        assert!(cli.command.is_none());
        assert_eq!(cli.data_dir.as_deref(), Some("/tmp/data"));
    }
}
