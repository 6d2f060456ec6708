//! Session command handler.

use super::{open_pipeline, print_json};
use clap::{Args, Subcommand};
use synapse_core::{config::AppConfig, AppResult};
use synapse_knowledge::SessionId;

/// Session management
#[derive(Args, Debug)]
pub struct SessionCommand {
    #[command(subcommand)]
    pub action: SessionAction,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum SessionAction {
    /// Create a new session
    Create,
    /// List sessions
    List,
    /// Delete a session with its documents, passages and chat history
    Delete {
        /// Session identifier
        id: SessionId,
    },
    /// Delete every expired session
    Purge,
}

impl SessionCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let pipeline = open_pipeline(config).await?;

        match &self.action {
            SessionAction::Create => {
                let session = pipeline.create_session().await?;
                if self.json {
                    print_json(&serde_json::to_value(&session)?)?;
                } else {
                    println!("{}", session.id);
                    tracing::info!(expires_at = %session.expires_at, "Session created");
                }
            }
            SessionAction::List => {
                let sessions = pipeline.sessions().list().await?;
                if self.json {
                    print_json(&serde_json::to_value(&sessions)?)?;
                } else if sessions.is_empty() {
                    println!("No sessions");
                } else {
                    for session in sessions {
                        println!(
                            "{}  {} document(s)  expires {}",
                            session.id,
                            session.document_count,
                            session.expires_at.format("%Y-%m-%d %H:%M UTC")
                        );
                    }
                }
            }
            SessionAction::Delete { id } => {
                let removed = pipeline.delete_session(*id).await?;
                if self.json {
                    print_json(&serde_json::json!({
                        "session": id,
                        "passagesRemoved": removed,
                    }))?;
                } else {
                    println!("Deleted session {} ({} passages removed)", id, removed);
                }
            }
            SessionAction::Purge => {
                let purged = pipeline.purge_expired().await?;
                if self.json {
                    print_json(&serde_json::json!({ "purged": purged }))?;
                } else {
                    println!("Purged {} expired session(s)", purged.len());
                }
            }
        }

        Ok(())
    }
}
