//! SISAS demo runner
//!
//! Loads configuration, wires the five built-in vehicles onto one substrate,
//! runs a document through them and prints a JSON health report.
//!
//! Environment:
//! - `SISAS_CONFIG`: YAML config file (default `config/sisas.yaml`)
//! - `SISAS_DOCUMENT`: document to analyse (default: a built-in sample)
//! - `SISAS_EXPORT`: write the event log here as JSONL after the run

use anyhow::{Context, Result};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use sisas::config::{SubstrateConfig, CONFIG_PATH_ENV};
use sisas::contracts::IrrigationContract;
use sisas::events::ExportFormat;
use sisas::signals::SignalContext;
use sisas::utils::telemetry::init_telemetry;
use sisas::vehicles::{
    ContextScoper, DocumentLoader, EvidenceExtractor, QualityMetrics, RunOutcome, SignalIrrigator,
    Vehicle,
};
use sisas::Substrate;

const DEFAULT_CONFIG: &str = "config/sisas.yaml";
const IRRIGATION_CONTRACT: &str = "irr-document";

const SAMPLE_DOCUMENT: &str = "# Diagnosis\n\
In 2023 the municipality recorded 12 flood events affecting 4,500 households.\n\n\
# Strategy\n\
We will expand drainage capacity by 30% and may relocate 2 markets.\n\n\
# Budget\n\
The plan commits 1.2 million to works between 2024 and 2027.";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let config_path = std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG));
    let config = SubstrateConfig::load(Some(config_path.as_path()))
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let _telemetry = init_telemetry(&config.logging)
        .map_err(|e| anyhow::anyhow!("initialising telemetry: {e}"))?;

    let (source_file, content) = match std::env::var("SISAS_DOCUMENT") {
        Ok(path) => {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading document {path}"))?;
            (path, content)
        }
        Err(_) => ("sample-plan.md".to_string(), SAMPLE_DOCUMENT.to_string()),
    };

    let substrate = Substrate::new(config).await.context("building substrate")?;
    let handles = substrate.handles().clone();

    let loader = Arc::new(DocumentLoader::new(handles.clone()));
    let scoper = Arc::new(ContextScoper::new(handles.clone()));
    let extractor = Arc::new(EvidenceExtractor::new(handles.clone()));
    let quality = Arc::new(QualityMetrics::new(handles.clone()));
    let irrigator = Arc::new(SignalIrrigator::new(handles.clone()));

    let vehicles: [Arc<dyn Vehicle>; 5] = [
        loader.clone(),
        scoper.clone(),
        extractor.clone(),
        quality.clone(),
        irrigator.clone(),
    ];
    for vehicle in vehicles {
        substrate.register_vehicle(vehicle).await?;
    }

    substrate
        .contracts()
        .register_irrigation(
            IrrigationContract::new(IRRIGATION_CONTRACT, source_file.clone(), SignalIrrigator::ID)
                .with_required_vehicles([
                    DocumentLoader::ID,
                    ContextScoper::ID,
                    EvidenceExtractor::ID,
                ]),
        )
        .await?;

    let document = json!({
        "source_file": source_file,
        "content": content,
        "metadata": {"title": "Municipal development plan", "jurisdiction": "demo"},
        "expected_sections": ["Diagnosis", "Strategy", "Budget", "Monitoring"],
    });

    let ingest = SignalContext::new("document", &source_file, "ingestion");
    report(DocumentLoader::ID, loader.run(&document, &ingest).await?);
    let scoping = SignalContext::new("document", &source_file, "scoping");
    report(ContextScoper::ID, scoper.run(&document, &scoping).await?);
    let extraction = SignalContext::new("document", &source_file, "extraction");
    report(EvidenceExtractor::ID, extractor.run(&document, &extraction).await?);

    substrate
        .contracts()
        .update_irrigation(IRRIGATION_CONTRACT, |c| {
            c.with_vehicle_available(DocumentLoader::ID)
                .with_vehicle_available(ContextScoper::ID)
                .with_vehicle_available(EvidenceExtractor::ID)
                .with_upstream_complete()
        })
        .await?;

    let delivered = substrate.dispatch().await;
    info!("Delivered {} queued messages", delivered);

    let analysis = SignalContext::new("pipeline", &source_file, "analysis");
    report(QualityMetrics::ID, quality.run(&json!({}), &analysis).await?);
    let irrigation = SignalContext::new("pipeline", &source_file, "irrigation");
    report(
        SignalIrrigator::ID,
        irrigator
            .run(&json!({"irrigation_contract": IRRIGATION_CONTRACT}), &irrigation)
            .await?,
    );
    substrate.dispatch().await;

    let health = substrate.health().await;
    println!("{}", serde_json::to_string_pretty(&health)?);

    if let Ok(path) = std::env::var("SISAS_EXPORT") {
        let written = substrate
            .event_log()
            .export_to(PathBuf::from(&path).as_path(), ExportFormat::Jsonl)
            .await
            .with_context(|| format!("exporting event log to {path}"))?;
        info!("Exported {} events to {}", written, path);
    }

    substrate.shutdown().await;
    Ok(())
}

fn report(vehicle_id: &str, outcome: RunOutcome) {
    info!("{}: {} signal(s) published", vehicle_id, outcome.published.len());
    for rejected in outcome.rejected {
        warn!("{}: {} rejected: {}", vehicle_id, rejected.signal_type, rejected.reason);
    }
}
