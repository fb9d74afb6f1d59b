use clap::Parser;
use keepsake::MemoryManager;

use crate::error::CliResult;
use crate::output::{OutputFormat, print_json, table};

#[derive(Parser)]
pub struct DecayCommand {}

impl DecayCommand {
    /// Decay sweeps every owner, so the global owner flag does not apply
    pub async fn execute(&self, manager: &MemoryManager, format: OutputFormat) -> CliResult<()> {
        let result = manager.trigger_decay().await;

        match format {
            OutputFormat::Json => print_json(&result)?,
            OutputFormat::Table => {
                if result.skipped {
                    println!("Decay skipped: disabled, or another process holds the decay lease.");
                    return Ok(());
                }

                let mut table = table(&["Metric", "Value"]);
                table.add_row(["Decayed", &result.decayed.to_string()]);
                table.add_row(["Archived", &result.archived.to_string()]);
                table.add_row(["Deleted (stale)", &result.deleted.to_string()]);
                table.add_row(["Deleted (expired)", &result.expired.to_string()]);
                table.add_row(["Errors", &result.errors.to_string()]);
                table.add_row(["Batches", &result.batches.to_string()]);
                table.add_row(["Duration", &format!("{} ms", result.duration_ms)]);
                println!("{table}");
            }
        }

        Ok(())
    }
}
