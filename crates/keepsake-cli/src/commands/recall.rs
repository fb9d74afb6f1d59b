use clap::Parser;
use keepsake::MemoryManager;
use keepsake::manager::{RecallHit, RecallMode, RecallOptions};
use keepsake::memory::MemoryType;

use crate::error::CliResult;
use crate::output::{OutputFormat, format_timestamp, print_json, table, truncate_string};

#[derive(Parser)]
pub struct RecallCommand {
    #[clap(help = "What to look for")]
    pub query: String,

    #[clap(long, short, default_value = "10", help = "Maximum number of results")]
    pub limit: usize,

    #[clap(long, help = "Match content text instead of embeddings")]
    pub lexical: bool,

    #[clap(long, short, help = "Restrict to one memory type")]
    pub r#type: Option<String>,

    #[clap(long, help = "Restrict to one category")]
    pub category: Option<String>,

    #[clap(long, help = "Minimum cosine similarity for semantic matches")]
    pub min_similarity: Option<f32>,

    #[clap(long, help = "Include archived memories")]
    pub archived: bool,
}

impl RecallCommand {
    pub async fn execute(
        &self,
        manager: &MemoryManager,
        owner: &str,
        format: OutputFormat,
    ) -> CliResult<()> {
        let mut options = RecallOptions::query(self.query.clone()).with_limit(self.limit);
        if self.lexical {
            options = options.lexical();
        }
        if let Some(ref t) = self.r#type {
            options = options.with_memory_types(vec![t.parse::<MemoryType>()?]);
        }
        if let Some(ref category) = self.category {
            options = options.with_category(category.clone());
        }
        if let Some(similarity) = self.min_similarity {
            options = options.with_min_similarity(similarity);
        }
        if self.archived {
            options = options.include_archived();
        }

        let hits = manager.recall(owner, options).await?;

        match format {
            OutputFormat::Json => print_json(&hits)?,
            OutputFormat::Table => print_hits(&hits),
        }

        Ok(())
    }
}

fn print_hits(hits: &[RecallHit]) {
    if hits.is_empty() {
        println!("No matching memories.");
        return;
    }

    let mut table = table(&["ID", "Content", "Type", "Similarity", "Score", "Created"]);
    for hit in hits {
        table.add_row([
            truncate_string(&hit.memory.id.to_string(), 8),
            truncate_string(&hit.memory.content, 50),
            hit.memory.memory_type.to_string(),
            hit.similarity.map_or_else(|| "-".to_string(), |s| format!("{s:.3}")),
            format!("{:.3}", hit.score),
            format_timestamp(&hit.memory.created_at),
        ]);
    }

    println!("{table}");
    let mode = match hits[0].mode {
        RecallMode::Semantic => "semantic",
        RecallMode::Lexical => "lexical fallback",
        RecallMode::Filter => "filter",
    };
    println!("\n{} results ({mode} recall)", hits.len());
}
