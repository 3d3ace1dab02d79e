//! Status Command
//!
//! Zone status and recent runs, read from the database written by `run`.

use crate::cli::ui::{Output, styled_state, styled_status};
use crate::cli::util::open_database;
use crate::config::Config;
use crate::types::{Result, ZoneStatus};

pub fn run(config: &Config, zone: Option<&str>, limit: usize, format: &str) -> Result<()> {
    let db = open_database(config)?;
    let (statuses, runs) = match &db {
        Some(db) => (db.load_zone_statuses()?, db.recent_runs(zone, limit)?),
        None => (Vec::new(), Vec::new()),
    };

    // Configured zones that never ran still get a row
    let mut zones: Vec<ZoneStatus> = config
        .zones
        .iter()
        .filter(|z| zone.is_none_or(|name| name == z.name))
        .map(|z| {
            statuses
                .iter()
                .find(|s| s.zone == z.name)
                .cloned()
                .unwrap_or_else(|| ZoneStatus::new(&z.name))
        })
        .collect();
    zones.sort_by(|a, b| a.zone.cmp(&b.zone));

    if format == "json" {
        let body = serde_json::json!({
            "database": config.storage.database_path,
            "zones": zones,
            "recent_runs": runs.iter().map(|r| serde_json::json!({
                "request_id": r.request_id,
                "zone": r.zone,
                "priority": r.priority,
                "state": r.state,
                "attempt": r.attempt,
                "retry_of": r.retry_of,
                "provider": r.provider,
                "cache_hit": r.cache_hit,
                "fallback": r.fallback,
                "score": r.score,
                "error": r.error,
                "finished_at": r.finished_at,
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let output = Output::new();
    if db.is_none() {
        output.info("No runs recorded yet. Start the pipeline with 'tidyzone run'.");
    }

    output.section("Zones");
    if zones.is_empty() {
        println!("  (none configured)");
    }
    for status in &zones {
        let score = status
            .score
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let last_run = status
            .last_run
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  {:<16} {:<11} {:>3}  {:<16} {}",
            status.zone,
            styled_status(status.status),
            score,
            styled_state(status.state),
            last_run
        );
        if let Some(error) = &status.last_error {
            println!("  {:<16} {}", "", console::style(error).red());
        }
    }

    if !runs.is_empty() {
        output.section("Recent runs");
        for run in &runs {
            let detail = match (&run.error, &run.provider) {
                (Some(error), _) => error.clone(),
                (None, Some(provider)) if run.cache_hit => format!("{} (cached)", provider),
                (None, Some(provider)) => provider.clone(),
                (None, None) if run.cache_hit => "cached".to_string(),
                (None, None) => String::new(),
            };
            println!(
                "  {} {:<8} {:<16} {:<9} {:<10} {}",
                run.finished_at.format("%H:%M:%S"),
                &run.request_id[..run.request_id.len().min(8)],
                run.zone,
                run.priority,
                run.state,
                detail
            );
        }
    }
    Ok(())
}
