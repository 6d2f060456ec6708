//! Command handlers for the Synapse CLI.

pub mod ask;
pub mod chat;
pub mod ingest;
pub mod session;

pub use ask::AskCommand;
pub use chat::ChatCommand;
pub use ingest::IngestCommand;
pub use session::SessionCommand;

use std::time::Duration;
use synapse_core::{config::AppConfig, AppError, AppResult};
use synapse_knowledge::{IndexBackend, Pipeline, PipelineConfig};
use synapse_llm::{create_client, ClientSettings};

/// Open the workspace pipeline with the configured generation backend.
pub async fn open_pipeline(config: &AppConfig) -> AppResult<Pipeline> {
    config.validate()?;
    let pipeline_config = PipelineConfig::load(&config.workspace)?;

    let api_key = config.resolve_api_key();
    let llm = create_client(&ClientSettings {
        provider: &config.provider,
        model: &config.model,
        endpoint: config.endpoint.as_deref(),
        api_key: api_key.as_deref(),
        timeout: Duration::from_secs(pipeline_config.generation_timeout_secs),
    })
    .map_err(AppError::Config)?;

    tracing::debug!(
        provider = llm.provider_name(),
        model = llm.default_model(),
        "Generation client ready"
    );
    Pipeline::open(&config.workspace, pipeline_config, llm).await
}

/// Print a value as pretty JSON on stdout.
pub fn print_json(value: &serde_json::Value) -> AppResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Memory-backed passages do not outlive this process.
pub fn warn_if_ephemeral(pipeline: &Pipeline) {
    if pipeline.config().index_backend == IndexBackend::Memory {
        tracing::warn!(
            "index_backend is 'memory': passages are not kept between invocations; \
             use `synapse chat` or set index_backend: lancedb in .synapse/pipeline.yaml"
        );
    }
}
