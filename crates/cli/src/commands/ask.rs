//! Ask command handler.
//!
//! Answers a question from a session's documents, streaming by default.

use super::{open_pipeline, print_json, warn_if_ephemeral};
use clap::Args;
use futures::StreamExt;
use std::io::Write;
use synapse_core::{config::AppConfig, AppError, AppResult};
use synapse_knowledge::{Answer, AnswerEvent, AnswerStream, AskOptions, Pipeline, SessionId};
use synapse_prompt::Language;

/// Ask a question about a session's documents
#[derive(Args, Debug)]
pub struct AskCommand {
    /// The question to ask
    pub question: String,

    /// Session to answer from
    #[arg(short, long)]
    pub session: SessionId,

    /// Answer language (en, id)
    #[arg(short, long, default_value = "id")]
    pub lang: Language,

    /// Passages shown to the model (default: retrieval_top_k)
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Disable streaming
    #[arg(long)]
    pub no_stream: bool,

    /// Skip reranking of retrieved passages
    #[arg(long)]
    pub no_rerank: bool,

    /// Output as JSON (implies --no-stream)
    #[arg(long)]
    pub json: bool,
}

impl AskCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!(session = %self.session, lang = %self.lang, "Executing ask command");

        let pipeline = open_pipeline(config).await?;
        warn_if_ephemeral(&pipeline);

        let options = AskOptions {
            rerank: self.no_rerank.then_some(false),
            top_k: self.top_k,
            history: None,
        };

        if self.json {
            let answer = pipeline
                .ask(self.session, &self.question, self.lang, options)
                .await?;
            print_json(&answer_json(&answer, self.session))
        } else if self.no_stream {
            let answer = pipeline
                .ask(self.session, &self.question, self.lang, options)
                .await?;
            println!("{}", answer.text);
            print_citations(&answer);
            Ok(())
        } else {
            ask_streaming(&pipeline, self.session, &self.question, self.lang, options).await
        }
    }
}

/// Ask and print fragments as they arrive. Ctrl-C abandons the answer.
pub(crate) async fn ask_streaming(
    pipeline: &Pipeline,
    session: SessionId,
    question: &str,
    language: Language,
    options: AskOptions,
) -> AppResult<()> {
    let mut stream = pipeline
        .ask_stream(session, question, language, options)
        .await?;

    tokio::select! {
        outcome = render_stream(&mut stream) => return outcome,
        _ = tokio::signal::ctrl_c() => {}
    }

    stream.cancel();
    println!();
    tracing::info!("Answer cancelled");
    Ok(())
}

async fn render_stream(stream: &mut AnswerStream) -> AppResult<()> {
    let mut stdout = std::io::stdout();

    while let Some(event) = stream.next().await {
        match event {
            AnswerEvent::Fragment(text) => {
                print!("{}", text);
                stdout.flush().ok();
            }
            AnswerEvent::Completed(answer) => {
                if !answer.grounded {
                    // Fallback answers arrive without fragments
                    print!("{}", answer.text);
                }
                println!();
                print_citations(&answer);
                return Ok(());
            }
            AnswerEvent::Failed(e) => {
                println!();
                return Err(e);
            }
        }
    }

    Err(AppError::Other("answer stream closed unexpectedly".to_string()))
}

fn print_citations(answer: &Answer) {
    if answer.citations.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for citation in &answer.citations {
        println!(
            "  [{}] {} ({}): {}",
            citation.label, citation.document_name, citation.position, citation.text
        );
    }
}

fn answer_json(answer: &Answer, session: SessionId) -> serde_json::Value {
    serde_json::json!({
        "session": session,
        "answer": answer.text,
        "grounded": answer.grounded,
        "citations": answer.citations,
    })
}
