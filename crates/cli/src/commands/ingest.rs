//! Ingest command handler.

use super::{open_pipeline, print_json, warn_if_ephemeral};
use clap::Args;
use std::path::PathBuf;
use synapse_core::{config::AppConfig, AppError, AppResult};
use synapse_knowledge::{IngestReport, SessionId};

/// Upload documents into a session
#[derive(Args, Debug)]
pub struct IngestCommand {
    /// Session to ingest into
    #[arg(short, long)]
    pub session: SessionId,

    /// Files or directories (PDF, DOCX, TXT, Markdown)
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl IngestCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!(session = %self.session, paths = self.paths.len(), "Executing ingest command");

        let pipeline = open_pipeline(config).await?;
        warn_if_ephemeral(&pipeline);

        let report = pipeline.ingest_paths(self.session, &self.paths).await?;

        if self.json {
            print_json(&report_json(&report))?;
        } else {
            print_report(&report);
        }

        if report.ingested.is_empty() && !report.failed.is_empty() {
            return Err(AppError::Other(format!(
                "none of {} document(s) could be ingested",
                report.failed.len()
            )));
        }
        Ok(())
    }
}

pub(crate) fn print_report(report: &IngestReport) {
    for doc in &report.ingested {
        println!(
            "  + {} ({} passages, {} new)",
            doc.document.filename, doc.passages, doc.added
        );
    }
    for failed in &report.failed {
        println!("  ! {}: {}", failed.name, failed.error);
    }
    println!(
        "Ingested {} document(s), {} new passages in {:.2}s",
        report.ingested.len(),
        report.passages_added(),
        report.duration_secs
    );
}

fn report_json(report: &IngestReport) -> serde_json::Value {
    serde_json::json!({
        "ingested": report.ingested,
        "failed": report
            .failed
            .iter()
            .map(|f| serde_json::json!({ "document": f.name, "error": f.error.to_string() }))
            .collect::<Vec<_>>(),
        "passagesAdded": report.passages_added(),
        "durationSecs": report.duration_secs,
    })
}
