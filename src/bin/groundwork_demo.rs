//! Groundwork demo
//!
//! Seeds the classic worldview, lets genesis correct it, learns about a
//! porcelain doll from text and shows what the engine will and will not
//! claim along the way.
//!
//! Usage: `groundwork-demo [--journal <path>] [--config <file.json>]`
//! Logging follows `RUST_LOG` (default `groundwork=info`).

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use groundwork::{
    Action, EngineConfig, GroundResult, GroundedEngine, MaterialSandbox, PhrasebookInterface,
    Worldview,
};

const DOCUMENT: &str = "Porcelain dolls are brittle. A rubber ball is not brittle. \
                        Glass bottles do not bounce.";

struct Args {
    journal: Option<PathBuf>,
    config: Option<PathBuf>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        journal: None,
        config: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--journal" | "-j" => {
                args.journal = Some(it.next().ok_or("--journal requires a path")?.into());
            }
            "--config" | "-c" => {
                args.config = Some(it.next().ok_or("--config requires a path")?.into());
            }
            "--help" | "-h" => {
                println!("usage: groundwork-demo [--journal <path>] [--config <file.json>]");
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(args)
}

fn load_config(args: &Args) -> GroundResult<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| {
                groundwork::GroundError::storage(format!("cannot read {}: {e}", path.display()))
            })?;
            EngineConfig::from_json_str(&text)?
        }
        None => EngineConfig::default(),
    };
    if let Some(journal) = &args.journal {
        config.store.journal_path = Some(journal.clone());
    }
    Ok(config)
}

fn show(engine: &GroundedEngine, entity: &str, action: Action, allow_unverified: bool) {
    match engine.reason(entity, action, allow_unverified) {
        Ok(prediction) => {
            for effect in &prediction.effects {
                info!(
                    entity,
                    %action,
                    allow_unverified,
                    outcome = %effect.attribute,
                    value = %effect.value,
                    status = %effect.status,
                    "prediction"
                );
            }
        }
        Err(err) if err.is_no_applicable_belief() => {
            info!(entity, %action, allow_unverified, "unknown");
        }
        Err(err) => error!(entity, %action, error = %err, "reasoning failed"),
    }
}

fn run(args: &Args) -> GroundResult<()> {
    let config = load_config(args)?;
    let engine = GroundedEngine::start(
        config,
        Arc::new(MaterialSandbox::new()),
        &Worldview::classic()?,
    )?;

    show(&engine, "rubber_ball", Action::Drop, false);
    show(&engine, "glass_bottle", Action::Drop, false);

    let phrasebook = PhrasebookInterface::new("demo-document")?;
    let intake = engine.ingest_document(&phrasebook, DOCUMENT)?;
    info!(
        accepted = intake.accepted.len(),
        duplicates = intake.duplicates,
        "document ingested"
    );

    show(&engine, "porcelain_doll", Action::Drop, false);
    show(&engine, "porcelain_doll", Action::Drop, true);

    let report = engine.run_until_settled(16)?;
    info!(
        rounds = report.rounds,
        verified = report.verified,
        corrected = report.corrected,
        rejected = report.rejected,
        "learning settled"
    );

    show(&engine, "porcelain_doll", Action::Drop, false);
    show(&engine, "glass_bottle", Action::Drop, false);

    for record in engine.store().audit_trail()? {
        info!(
            belief = %record.belief,
            scenario = %record.scenario,
            predicted = %record.predicted,
            verdict = %record.verdict,
            "audit"
        );
    }
    engine.shutdown()
}

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("groundwork=info")))
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("error: {message}");
            std::process::exit(2);
        }
    };
    if let Err(err) = run(&args) {
        error!(error = %err, "demo failed");
        std::process::exit(1);
    }
}
