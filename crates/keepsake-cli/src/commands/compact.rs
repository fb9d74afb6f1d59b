use clap::Parser;
use keepsake::MemoryManager;

use crate::error::CliResult;
use crate::output::{OutputFormat, print_json, table};

#[derive(Parser)]
pub struct CompactCommand {
    #[clap(
        long,
        help = "Sweep every owner over the compaction threshold instead of only --owner"
    )]
    pub all: bool,
}

impl CompactCommand {
    pub async fn execute(
        &self,
        manager: &MemoryManager,
        owner: &str,
        format: OutputFormat,
    ) -> CliResult<()> {
        let scope = if self.all { None } else { Some(owner) };
        let report = manager.trigger_compaction(scope).await;

        match format {
            OutputFormat::Json => print_json(&report)?,
            OutputFormat::Table => {
                println!("Compaction Results");
                println!("==================\n");

                if report.results.is_empty() {
                    println!(
                        "Nothing to compact ({} owners scanned).",
                        report.owners_scanned
                    );
                    return Ok(());
                }

                let mut table = table(&[
                    "Owner",
                    "Deduplicated",
                    "Merged",
                    "Summarized",
                    "Pruned",
                    "Memories",
                    "Tokens Saved",
                ]);

                for result in &report.results {
                    if result.skipped {
                        table.add_row([
                            result.owner_id.clone(),
                            "skipped".to_string(),
                            "-".to_string(),
                            "-".to_string(),
                            "-".to_string(),
                            result.memories_before.to_string(),
                            "-".to_string(),
                        ]);
                        continue;
                    }
                    table.add_row([
                        result.owner_id.clone(),
                        result.deduplicated.to_string(),
                        format!("{} ({} groups)", result.merged_memories, result.merged_groups),
                        result.summarized.to_string(),
                        result.pruned.to_string(),
                        format!("{} -> {}", result.memories_before, result.memories_after),
                        result.tokens_saved.to_string(),
                    ]);
                }

                println!("{table}\n");

                println!(
                    "Total: {} owners scanned, {} tokens saved, {} errors",
                    report.owners_scanned,
                    report.tokens_saved(),
                    report.errors
                );
            }
        }

        Ok(())
    }
}
