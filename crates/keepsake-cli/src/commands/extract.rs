use clap::Parser;
use keepsake::MemoryManager;
use keepsake::manager::RememberOptions;

use crate::error::CliResult;
use crate::output::{OutputFormat, print_json, table, truncate_string};

#[derive(Parser)]
pub struct ExtractCommand {
    #[clap(help = "User message to extract memories from")]
    pub message: String,

    #[clap(long, help = "Store the extracted memories instead of only showing them")]
    pub save: bool,
}

impl ExtractCommand {
    pub async fn execute(
        &self,
        manager: &MemoryManager,
        owner: &str,
        format: OutputFormat,
    ) -> CliResult<()> {
        if self.save {
            return self.save_message(manager, owner, format).await;
        }

        let result = manager.extract(&self.message).await;

        match format {
            OutputFormat::Json => {
                print_json(&serde_json::json!({
                    "memories": result.memories,
                    "entities": result.entities,
                    "stats": result.stats,
                }))?;
            }
            OutputFormat::Table => {
                if result.memories.is_empty() && result.entities.is_empty() {
                    println!("Nothing worth remembering in this message.");
                } else {
                    if !result.memories.is_empty() {
                        let mut table = table(&[
                            "Content",
                            "Type",
                            "Category",
                            "Importance",
                            "Confidence",
                            "Key",
                        ]);
                        for candidate in &result.memories {
                            table.add_row([
                                truncate_string(&candidate.content, 50),
                                candidate.memory_type.to_string(),
                                candidate.category.clone(),
                                format!("{:.2}", candidate.importance),
                                format!("{:.2}", candidate.confidence),
                                candidate.dedupe_key.clone().unwrap_or_else(|| "-".to_string()),
                            ]);
                        }
                        println!("{table}");
                    }

                    if !result.entities.is_empty() {
                        let mut table = table(&["Entity", "Type", "Description"]);
                        for entity in &result.entities {
                            table.add_row([
                                entity.name.clone(),
                                entity.entity_type.to_string(),
                                truncate_string(&entity.description, 40),
                            ]);
                        }
                        println!("{table}");
                    }
                }

                let stats = &result.stats;
                println!(
                    "\nRules: {} matched, {} rejected | LLM: {} ({} candidates)",
                    stats.rule_matches,
                    stats.rejected,
                    if stats.llm_invoked { "used" } else { "skipped" },
                    stats.llm_candidates
                );
                println!("Dry run. Pass --save to store these memories.");
            }
        }

        Ok(())
    }

    async fn save_message(
        &self,
        manager: &MemoryManager,
        owner: &str,
        format: OutputFormat,
    ) -> CliResult<()> {
        let report = manager
            .remember_message(owner, &self.message, RememberOptions::default())
            .await?;

        match format {
            OutputFormat::Json => print_json(&report)?,
            OutputFormat::Table => {
                if report.outcomes.is_empty() {
                    println!("Nothing worth remembering in this message.");
                    return Ok(());
                }

                let mut table = table(&["Action", "ID", "Content", "Reason"]);
                for outcome in &report.outcomes {
                    let (id, content) = match outcome.memory {
                        Some(ref memory) => (
                            truncate_string(&memory.id.to_string(), 8),
                            truncate_string(&memory.content, 50),
                        ),
                        None => ("-".to_string(), "-".to_string()),
                    };
                    table.add_row([
                        outcome.action.as_str().to_string(),
                        id,
                        content,
                        outcome.reason.clone().unwrap_or_default(),
                    ]);
                }
                println!("{table}");

                if !report.entities.is_empty() {
                    let names: Vec<_> = report.entities.iter().map(|e| e.name.as_str()).collect();
                    println!("Entities: {}", names.join(", "));
                }
            }
        }

        Ok(())
    }
}
