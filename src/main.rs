use std::path::Path;
use std::process::ExitCode;

use tracing::{error, info};

use rota::config::Config;
use rota::engine::{Engine, ValidationReport};
use rota::model::Event;
use rota::store::{InMemoryStore, PgShiftSource};

/// Parse one JSON-encoded edit per line; blank lines are skipped.
fn read_edits(path: &Path) -> Result<Vec<Event>, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    let mut edits = Vec::new();
    for (n, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(line).map_err(|e| format!("{}:{}: {e}", path.display(), n + 1))?;
        edits.push(event);
    }
    Ok(edits)
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    rota::observability::init(config.metrics_port)?;

    // `rota` validates; `rota record <edits.jsonl>` journals the edits first.
    let args: Vec<String> = std::env::args().skip(1).collect();
    let edits = match args.as_slice() {
        [] => None,
        [cmd, path] if cmd == "record" => Some(read_edits(Path::new(path))?),
        _ => {
            error!("usage: rota [record <edits.jsonl>]");
            return Ok(ExitCode::from(2));
        }
    };

    let engine = Engine::new(config.rules, config.policy).with_max_shifts(config.max_shifts);
    info!("rota validator");
    info!("  rules: {:?}", config.rules);
    info!("  policy: {}", config.policy);
    info!("  max_shifts: {}", config.max_shifts);

    let report = match &config.database_url {
        Some(_) if edits.is_some() => {
            error!("record writes to the journal; unset ROTA_DATABASE_URL");
            return Ok(ExitCode::from(2));
        }
        Some(url) => {
            info!("  source: postgres");
            let source = PgShiftSource::connect(url).await?;
            engine.validate_week_parallel(&source).await
        }
        None => {
            info!("  source: journal {}", config.journal_path.display());
            let source =
                InMemoryStore::open_journal(&config.journal_path)?.with_compact_threshold(config.compact_threshold);
            if let Some(edits) = &edits {
                source.record(edits)?;
                info!("recorded {} edits", edits.len());
            }
            engine.validate_week_parallel(&source).await
        }
    };

    let report: ValidationReport = match report {
        Ok(report) => report,
        Err(e) => {
            error!("validation failed: {e}");
            return Ok(ExitCode::from(2));
        }
    };

    let json = report.to_json()?;
    println!("{}", String::from_utf8_lossy(&json));

    if report.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
