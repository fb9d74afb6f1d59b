use clap::Parser;
use keepsake::MemoryManager;
use keepsake::manager::MemoryStats;

use crate::error::CliResult;
use crate::output::{OutputFormat, print_json, table};

#[derive(Parser)]
pub struct StatsCommand {
    #[clap(long, help = "Also show the breakdown by memory type")]
    pub by_type: bool,
}

impl StatsCommand {
    pub async fn execute(
        &self,
        manager: &MemoryManager,
        owner: &str,
        format: OutputFormat,
    ) -> CliResult<()> {
        let stats = manager.get_stats(owner).await?;

        match format {
            OutputFormat::Json => print_json(&stats)?,
            OutputFormat::Table => self.print_table(&stats),
        }

        Ok(())
    }

    fn print_table(&self, stats: &MemoryStats) {
        println!("Keepsake Statistics for {}", stats.owner_id);
        println!("======================\n");

        let mut tiers = table(&["Tier", "Count"]);
        for (tier, count) in &stats.by_tier {
            tiers.add_row([tier.to_string(), count.to_string()]);
        }
        println!("{tiers}\n");

        if self.by_type {
            let mut types = table(&["Type", "Count"]);
            for (memory_type, count) in &stats.by_type {
                types.add_row([memory_type.to_string(), count.to_string()]);
            }
            println!("{types}\n");
        }

        println!(
            "Total: {} memories ({} archived, {} pending, {} without embeddings)",
            stats.total, stats.archived, stats.pending, stats.unvectored
        );
        println!(
            "Average importance: {:.3} | Estimated tokens: {} | Entities: {}",
            stats.average_importance, stats.estimated_tokens, stats.entities
        );
    }
}
