//! CLI command implementations.

use anyhow::{Context, Result, bail};
use pipehook_config::{
    ExpressionContext, SystemConfig, load_system_config, parse_pipeline, render_pipeline,
};
use pipehook_converter::Converter;
use pipehook_core::{DeliveryId, Event, Source, WorkflowSpec};
use std::path::{Path, PathBuf};
use tracing::info;

pub fn validate(path: &Path, render: bool) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    match parse_pipeline(&content) {
        Ok(pipeline) => {
            if render {
                print!("{}", render_pipeline(&pipeline));
            } else {
                println!(
                    "Configuration is valid ({} tasks, {} params)",
                    pipeline.tasks.len(),
                    pipeline.params.len()
                );
            }
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

pub struct ConvertArgs {
    pub definition: PathBuf,
    pub event: PathBuf,
    pub event_type: String,
    pub delivery_id: Option<String>,
    pub volume: String,
    pub config: Option<PathBuf>,
    pub namespace: Option<String>,
}

pub fn convert(args: ConvertArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => load_system_config(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => SystemConfig::default(),
    };
    if let Some(namespace) = args.namespace {
        config.server.namespace = namespace;
    }

    let definition = std::fs::read_to_string(&args.definition)
        .with_context(|| format!("failed to read {}", args.definition.display()))?;
    let payload = std::fs::read_to_string(&args.event)
        .with_context(|| format!("failed to read {}", args.event.display()))?;
    let delivery_id = match args.delivery_id {
        Some(id) => DeliveryId::new(id)?,
        None => DeliveryId::generate(),
    };

    let workflow = convert_payload(
        &config,
        &definition,
        &args.event_type,
        delivery_id,
        &payload,
        &args.volume,
    )?;
    println!("{}", serde_json::to_string_pretty(&workflow)?);
    Ok(())
}

/// Convert a definition against a webhook payload, as the server would.
fn convert_payload(
    config: &SystemConfig,
    definition: &str,
    event_type: &str,
    delivery_id: DeliveryId,
    payload: &str,
    volume: &str,
) -> Result<WorkflowSpec> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("event payload is not JSON")?;
    let event = Event::from_github(event_type, delivery_id, &payload)?;
    let Some(source) = Source::from_event(&event) else {
        bail!("{} events are not built", event.kind());
    };

    let pipeline = parse_pipeline(definition)?;
    let ctx = ExpressionContext::build(&event)?;
    let workflow = Converter::new(&config.converter, &config.server.namespace).convert(
        &pipeline,
        &source,
        volume,
        &ctx,
    )?;

    info!(name = workflow.name(), tasks = workflow.tasks().len(), "Converted pipeline");
    Ok(workflow)
}
