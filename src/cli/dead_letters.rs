use anyhow::{Result, anyhow};
use console::style;

use super::{CliFlags, open_store};
use crate::core::store::{DeadLetterEntry, DeadLetterStatus, ReplayOutcome};
use crate::core::terminal::{GuideSection, print_error, print_info, print_success, print_warn};

const DEFAULT_LIMIT: usize = 50;

pub async fn run_dead_letter_command(flags: &CliFlags) -> Result<()> {
    let sub_cmd = flags.positional.first().map(String::as_str).unwrap_or("list");
    let entry_id = flags.positional.get(1).map(String::as_str);

    match (sub_cmd, entry_id) {
        ("list" | "ls", _) => {
            let status = match flags.status.as_deref() {
                None => None,
                Some(raw) => Some(
                    DeadLetterStatus::parse(raw)
                        .ok_or_else(|| anyhow!("Unknown status '{}'. Use open or replayed", raw))?,
                ),
            };
            let (_, store) = open_store(flags).await?;
            let entries = store
                .list_dead_letters(status, flags.limit.unwrap_or(DEFAULT_LIMIT))
                .await?;
            if entries.is_empty() {
                print_info("No dead letters.");
                return Ok(());
            }
            let mut section = GuideSection::new(&format!("Dead letters ({})", entries.len()));
            for entry in &entries {
                section = section.command(&entry.entry_id, &summary(entry));
            }
            section.print();
            println!();
        }
        ("show", Some(id)) => {
            let (_, store) = open_store(flags).await?;
            match store.get_dead_letter(id).await? {
                Some(entry) => print_entry(&entry),
                None => print_error(&format!("Dead letter '{}' not found", id)),
            }
        }
        ("replay", Some(id)) => {
            let (_, store) = open_store(flags).await?;
            match store.replay_dead_letter(id).await? {
                ReplayOutcome::Enqueued { job_id } => {
                    print_success(&format!("Replayed '{}' as job {}", id, job_id))
                }
                ReplayOutcome::Coalesced { job_id } => print_info(&format!(
                    "A job for the same key is already queued ({}). Replay attached to it",
                    job_id
                )),
                ReplayOutcome::AlreadyReplayed => {
                    print_warn(&format!("Dead letter '{}' was already replayed", id))
                }
                ReplayOutcome::NotFound => print_error(&format!("Dead letter '{}' not found", id)),
            }
        }
        ("purge" | "rm", Some(id)) => {
            let (_, store) = open_store(flags).await?;
            if store.purge_dead_letter(id).await? {
                print_success(&format!("Purged dead letter '{}'", id));
            } else {
                print_error(&format!("Dead letter '{}' not found", id));
            }
        }
        _ => {
            GuideSection::new("matchday dead-letters")
                .command("list [--status open|replayed] [--limit N]", "List entries, newest first")
                .command("show <id>", "Show one entry")
                .command("replay <id>", "Re-enqueue the job at attempt 1")
                .command("purge <id>", "Delete the entry")
                .print();
            println!();
        }
    }
    Ok(())
}

fn summary(entry: &DeadLetterEntry) -> String {
    format!(
        "{} {} · {} after {} attempt(s) · {}",
        entry.job.kind.as_str(),
        entry.job.match_id,
        entry.job.model_id,
        entry.attempts_made,
        match entry.status {
            DeadLetterStatus::Open => style("open").yellow().to_string(),
            DeadLetterStatus::Replayed => style("replayed").dim().to_string(),
        }
    )
}

fn print_entry(entry: &DeadLetterEntry) {
    let mut section = GuideSection::new(&format!("Dead letter {}", entry.entry_id))
        .status("Key", &entry.natural_key)
        .status("Kind", entry.job.kind.as_str())
        .status("Match", &entry.job.match_id)
        .status("Model", &entry.job.model_id)
        .status("Attempts", &entry.attempts_made.to_string())
        .status("Class", entry.error_class.as_str())
        .status("Failed at", &entry.failed_at.to_rfc3339())
        .status("Status", entry.status.as_str());
    if let Some(job_id) = &entry.replay_job_id {
        section = section.status("Replay job", job_id);
    }
    section.blank().text(&entry.last_error).print();
    println!();
}
