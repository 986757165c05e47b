use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;

use super::{CliFlags, open_store};
use crate::core::config::ModelsConfig;
use crate::core::pipeline::trigger::{Scope, TriggerAdapter};
use crate::core::store::MatchRecord;
use crate::core::terminal::{GuideSection, print_error, print_info, print_success};

pub async fn run_fixtures_command(flags: &CliFlags) -> Result<()> {
    let sub_cmd = flags.positional.first().map(String::as_str).unwrap_or("");
    match sub_cmd {
        "import" => {
            let Some(file) = flags.positional.get(1) else {
                print_error("Usage: matchday fixtures import <file.json>");
                return Ok(());
            };
            let records = read_fixture_file(Path::new(file)).await?;
            let (_, store) = open_store(flags).await?;
            for record in &records {
                store.upsert_match(record).await?;
            }
            print_success(&format!("Imported {} fixture(s) from {}", records.len(), file));
        }
        "list" | "ls" => {
            let scope = Scope::parse(flags.positional.get(1).map(String::as_str).unwrap_or("all"))?;
            let (config, store) = open_store(flags).await?;
            let trigger = TriggerAdapter::new(store, &config.models);
            let fixtures = trigger.resolve(&scope, Utc::now()).await?;
            if fixtures.is_empty() {
                print_info(&format!("No fixtures for scope '{}'", scope));
                return Ok(());
            }
            let mut section = GuideSection::new(&format!("Fixtures · {}", scope));
            for ctx in &fixtures {
                let teams = format!(
                    "{} vs {}",
                    ctx.home_team.as_deref().unwrap_or("?"),
                    ctx.away_team.as_deref().unwrap_or("?")
                );
                let kickoff = ctx
                    .kickoff_at
                    .map(|k| k.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_else(|| "TBD".to_string());
                section = section.command(&ctx.match_id, &format!("{} · {}", teams, kickoff));
            }
            section
                .blank()
                .text(&planned_jobs_line(&config.models, fixtures.len()))
                .print();
            println!();
        }
        _ => {
            GuideSection::new("matchday fixtures")
                .command("import <file.json>", "Upsert a JSON array of fixtures")
                .command("list [scope]", "Show the fixtures a scope resolves to")
                .print();
            println!();
        }
    }
    Ok(())
}

async fn read_fixture_file(path: &Path) -> Result<Vec<MatchRecord>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    parse_fixtures(&content).with_context(|| format!("parsing {}", path.display()))
}

pub(crate) fn parse_fixtures(content: &str) -> Result<Vec<MatchRecord>> {
    let records: Vec<MatchRecord> = serde_json::from_str(content)?;
    if let Some(bad) = records.iter().find(|r| r.context.match_id.trim().is_empty()) {
        anyhow::bail!("fixture with empty match_id: {:?}", bad.context);
    }
    Ok(records)
}

fn planned_jobs_line(models: &ModelsConfig, fixtures: usize) -> String {
    let per_fixture = 1 + models.prediction_models.len();
    format!(
        "A full trigger plans up to {} job(s): 1 preview + {} prediction(s) per fixture",
        fixtures * per_fixture,
        models.prediction_models.len()
    )
}
