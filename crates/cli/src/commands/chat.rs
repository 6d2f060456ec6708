//! Interactive chat over documents ingested in the same process.

use super::ask::ask_streaming;
use super::ingest::print_report;
use super::open_pipeline;
use clap::Args;
use std::path::PathBuf;
use synapse_core::{config::AppConfig, AppResult};
use synapse_knowledge::AskOptions;
use synapse_prompt::Language;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Ingest documents into a fresh session and answer questions from stdin
#[derive(Args, Debug)]
pub struct ChatCommand {
    /// Files or directories to upload before chatting
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Answer language (en, id)
    #[arg(short, long, default_value = "id")]
    pub lang: Language,

    /// Skip reranking of retrieved passages
    #[arg(long)]
    pub no_rerank: bool,

    /// Keep the session after exiting
    #[arg(long)]
    pub keep: bool,
}

impl ChatCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let pipeline = open_pipeline(config).await?;
        let session = pipeline.create_session().await?;
        tracing::info!(session = %session.id, "Chat session started");

        let report = pipeline.ingest_paths(session.id, &self.paths).await?;
        print_report(&report);

        let options = AskOptions {
            rerank: self.no_rerank.then_some(false),
            ..AskOptions::default()
        };

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            eprint!("> ");
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let question = line.trim();
            if question.is_empty() {
                continue;
            }
            if matches!(question, "exit" | "quit") {
                break;
            }

            // A failed question does not end the conversation
            if let Err(e) =
                ask_streaming(&pipeline, session.id, question, self.lang, options.clone()).await
            {
                eprintln!("error: {}", e);
            }
        }

        if self.keep {
            println!("Session kept: {}", session.id);
        } else {
            pipeline.delete_session(session.id).await?;
        }
        Ok(())
    }
}
