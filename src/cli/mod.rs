mod daemon;
mod dead_letters;
mod fixtures;
mod trigger;

use anyhow::{Context, Result, anyhow};
use console::style;
use std::path::PathBuf;

use crate::core::config::PipelineConfig;
use crate::core::store::ContentStore;
use crate::core::terminal::{self, GuideSection, print_error, print_success};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Core")
        .command("run", "Start the pipeline daemon (workers, schedules, API)")
        .command("trigger <scope>", "Ask a running daemon to enqueue generation jobs")
        .print();

    GuideSection::new("Operations")
        .command("dead-letters list", "List dead-lettered jobs (--status, --limit)")
        .command("dead-letters show <id>", "Show one dead-letter entry")
        .command("dead-letters replay <id>", "Re-enqueue a dead-lettered job")
        .command("dead-letters purge <id>", "Delete a dead-letter entry")
        .command("fixtures import <file>", "Upsert fixtures from a JSON array")
        .command("fixtures list [scope]", "Show the fixtures a scope resolves to")
        .command("verify", "Check the store's uniqueness constraints")
        .print();

    GuideSection::new("Scopes")
        .hint("matchday trigger all", "every scheduled upcoming fixture")
        .hint("matchday trigger next:48h", "fixtures kicking off in the next 48 hours")
        .hint(
            "matchday trigger window:2026-10-17T00:00:00Z/2026-10-19T00:00:00Z",
            "",
        )
        .hint("matchday trigger match:M100 --kinds preview", "")
        .print();

    println!(
        "\n {} {} <command> [--config <path>]\n",
        style("Usage:").bold(),
        style("matchday").green()
    );
}

/// Flags shared by every command, plus the positional arguments left over.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CliFlags {
    pub config: Option<PathBuf>,
    pub kinds: Vec<String>,
    pub api_url: Option<String>,
    pub limit: Option<usize>,
    pub status: Option<String>,
    pub positional: Vec<String>,
}

pub(crate) fn parse_flags(args: &[String], start: usize) -> Result<CliFlags> {
    let mut flags = CliFlags::default();
    let mut i = start;
    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "--config" | "-c" | "--kinds" | "-k" | "--api-url" | "--limit" | "-n" | "--status" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("{} expects a value", arg))?
                    .clone();
                match arg {
                    "--config" | "-c" => flags.config = Some(PathBuf::from(value)),
                    "--kinds" | "-k" => {
                        flags.kinds = value
                            .split(',')
                            .map(|k| k.trim().to_string())
                            .filter(|k| !k.is_empty())
                            .collect()
                    }
                    "--api-url" => flags.api_url = Some(value),
                    "--limit" | "-n" => {
                        flags.limit = Some(
                            value
                                .parse()
                                .with_context(|| format!("invalid --limit '{}'", value))?,
                        )
                    }
                    _ => flags.status = Some(value),
                }
                i += 2;
            }
            _ => {
                flags.positional.push(args[i].clone());
                i += 1;
            }
        }
    }
    Ok(flags)
}

/// Load config, install logging, and open the store. Used by the offline commands.
pub(crate) async fn open_store(flags: &CliFlags) -> Result<(PipelineConfig, ContentStore)> {
    let config = PipelineConfig::load(flags.config.as_deref()).await?;
    crate::logging::init(&config.log_level, config.log_file.as_deref())?;
    let path = config.database_path();
    let store = ContentStore::open(&path)
        .await
        .with_context(|| format!("opening store at {}", path.display()))?;
    Ok((config, store))
}

async fn run_verify(flags: &CliFlags) -> Result<()> {
    let (config, store) = open_store(flags).await?;
    store.verify_constraints().await?;
    print_success(&format!(
        "Uniqueness constraints present in {}",
        config.database_path().display()
    ));
    Ok(())
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    let cmd = args[1].as_str();
    if matches!(cmd, "help" | "--help" | "-h") {
        print_help();
        return Ok(());
    }
    let flags = parse_flags(&args, 2)?;

    match cmd {
        "run" => daemon::run_daemon(&flags).await,
        "trigger" => trigger::run_trigger_command(&flags).await,
        "dead-letters" | "dlq" => dead_letters::run_dead_letter_command(&flags).await,
        "fixtures" => fixtures::run_fixtures_command(&flags).await,
        "verify" => run_verify(&flags).await,
        other => {
            print_error(&format!("Unknown command '{}'", other));
            print_help();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_trigger_flags() {
        let args = argv(&[
            "matchday",
            "trigger",
            "next:48h",
            "--kinds",
            "preview, prediction",
            "--api-url",
            "http://10.0.0.5:7878",
        ]);
        let flags = parse_flags(&args, 2).unwrap();
        assert_eq!(flags.positional, vec!["next:48h"]);
        assert_eq!(flags.kinds, vec!["preview", "prediction"]);
        assert_eq!(flags.api_url.as_deref(), Some("http://10.0.0.5:7878"));
        assert_eq!(flags.config, None);
    }

    #[test]
    fn flags_may_precede_positionals() {
        let args = argv(&[
            "matchday",
            "dead-letters",
            "--config",
            "/etc/matchday.toml",
            "list",
            "--status",
            "open",
            "-n",
            "20",
        ]);
        let flags = parse_flags(&args, 2).unwrap();
        assert_eq!(flags.positional, vec!["list"]);
        assert_eq!(flags.config, Some(PathBuf::from("/etc/matchday.toml")));
        assert_eq!(flags.status.as_deref(), Some("open"));
        assert_eq!(flags.limit, Some(20));
    }

    #[test]
    fn missing_or_bad_flag_values_are_errors() {
        assert!(parse_flags(&argv(&["matchday", "run", "--config"]), 2).is_err());
        assert!(parse_flags(&argv(&["matchday", "dlq", "--limit", "many"]), 2).is_err());
    }
}
