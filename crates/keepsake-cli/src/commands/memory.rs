use clap::{Parser, Subcommand};
use keepsake::MemoryManager;
use keepsake::manager::{RememberAction, RememberOptions};
use keepsake::memory::{ConflictStrategy, Memory, MemoryInput, MemoryType};
use keepsake::storage::{MemoryQuery, QueryOrder};
use uuid::Uuid;

use crate::error::CliResult;
use crate::output::{OutputFormat, format_timestamp, print_json, table, truncate_string};

#[derive(Parser)]
pub struct MemoryCommand {
    #[clap(subcommand)]
    pub command: MemorySubcommand,
}

#[derive(Subcommand)]
pub enum MemorySubcommand {
    #[clap(about = "List memories")]
    List(ListArgs),

    #[clap(about = "Show memory details")]
    Show(ShowArgs),

    #[clap(about = "Delete a memory")]
    Delete(DeleteArgs),

    #[clap(about = "Manually add a memory, resolving conflicts with existing ones")]
    Add(AddArgs),

    #[clap(about = "Accept or reject a memory awaiting confirmation")]
    Confirm(ConfirmArgs),
}

#[derive(Parser)]
pub struct ListArgs {
    #[clap(
        long,
        short,
        default_value = "20",
        help = "Maximum number of memories to display"
    )]
    pub limit: usize,

    #[clap(
        long,
        short,
        help = "Filter by memory type (fact, preference, decision, summary, feedback)"
    )]
    pub r#type: Option<String>,

    #[clap(long, help = "Filter by category")]
    pub category: Option<String>,

    #[clap(long, help = "Show only archived memories")]
    pub archived: bool,

    #[clap(long, help = "Show only memories awaiting confirmation")]
    pub pending: bool,
}

#[derive(Parser)]
pub struct ShowArgs {
    #[clap(help = "Memory ID (UUID format)")]
    pub id: String,
}

#[derive(Parser)]
pub struct DeleteArgs {
    #[clap(help = "Memory ID to delete (UUID format)")]
    pub id: String,
}

#[derive(Parser)]
pub struct AddArgs {
    #[clap(help = "Memory content text")]
    pub text: String,

    #[clap(long, short, default_value = "fact", help = "Memory type")]
    pub r#type: String,

    #[clap(long, default_value = "general", help = "Category")]
    pub category: String,

    #[clap(long, short, default_value = "0.5", help = "Importance in [0, 1]")]
    pub importance: f32,

    #[clap(long, help = "Dedupe key, e.g. user:gpa")]
    pub key: Option<String>,

    #[clap(
        long,
        help = "Conflict strategy (keep_latest, keep_highest, keep_oldest, merge, keep_both, ask_user)"
    )]
    pub strategy: Option<String>,

    #[clap(long, help = "Store without checking for conflicts")]
    pub force: bool,
}

#[derive(Parser)]
pub struct ConfirmArgs {
    #[clap(help = "Pending memory ID (UUID format)")]
    pub id: String,

    #[clap(long, help = "Reject the pending memory instead of accepting it")]
    pub reject: bool,
}

impl MemoryCommand {
    pub async fn execute(
        &self,
        manager: &MemoryManager,
        owner: &str,
        format: OutputFormat,
    ) -> CliResult<()> {
        match &self.command {
            MemorySubcommand::List(args) => Self::list(manager, owner, args, format).await,
            MemorySubcommand::Show(args) => Self::show(manager, owner, args, format).await,
            MemorySubcommand::Delete(args) => Self::delete(manager, owner, args, format).await,
            MemorySubcommand::Add(args) => Self::add(manager, owner, args, format).await,
            MemorySubcommand::Confirm(args) => Self::confirm(manager, owner, args, format).await,
        }
    }

    async fn list(
        manager: &MemoryManager,
        owner: &str,
        args: &ListArgs,
        format: OutputFormat,
    ) -> CliResult<()> {
        let mut query = MemoryQuery::for_owner(owner)
            .ordered_by(QueryOrder::CreatedDesc)
            .with_limit(args.limit);
        if let Some(ref t) = args.r#type {
            query = query.with_memory_types(vec![t.parse::<MemoryType>()?]);
        }
        if let Some(ref category) = args.category {
            query = query.with_category(category.clone());
        }
        if args.archived {
            query = query.with_archived(true);
        }
        if args.pending {
            query = query.with_pending(true);
        }

        let memories = manager.store().list(&query).await?;

        match format {
            OutputFormat::Json => {
                let output: Vec<_> = memories.iter().map(summary_json).collect();
                print_json(&output)?;
            }
            OutputFormat::Table => {
                if memories.is_empty() {
                    println!("No memories found.");
                    return Ok(());
                }

                let mut table = table(&[
                    "ID",
                    "Content",
                    "Type",
                    "Category",
                    "Importance",
                    "Status",
                    "Created",
                ]);
                for memory in &memories {
                    table.add_row([
                        truncate_string(&memory.id.to_string(), 8),
                        truncate_string(&memory.content, 50),
                        memory.memory_type.to_string(),
                        memory.category.clone(),
                        format!("{:.2}", memory.importance),
                        status(memory).to_string(),
                        format_timestamp(&memory.created_at),
                    ]);
                }

                println!("{table}");
                println!("\nTotal: {} memories", memories.len());
            }
        }

        Ok(())
    }

    async fn show(
        manager: &MemoryManager,
        owner: &str,
        args: &ShowArgs,
        format: OutputFormat,
    ) -> CliResult<()> {
        let id = Uuid::parse_str(&args.id)?;
        let memory = manager
            .get_memory(owner, id)
            .await?
            .ok_or_else(|| format!("Memory not found: {}", args.id))?;

        match format {
            OutputFormat::Json => {
                let mut output = serde_json::to_value(&memory)?;
                if let Some(object) = output.as_object_mut() {
                    // vectors are noise on a terminal
                    object.remove("embedding");
                    object.insert(
                        "embedding_size".to_string(),
                        memory.embedding.as_ref().map_or(0, Vec::len).into(),
                    );
                }
                print_json(&output)?;
            }
            OutputFormat::Table => {
                let mut table = table(&["Property", "Value"]);

                table.add_row(["ID", &memory.id.to_string()]);
                table.add_row(["Owner", &memory.owner_id]);
                table.add_row(["Content", &memory.content]);
                table.add_row(["Type", memory.memory_type.as_str()]);
                table.add_row(["Category", &memory.category]);
                table.add_row(["Importance", &format!("{:.4}", memory.importance)]);
                table.add_row(["Status", status(&memory)]);
                table.add_row(["Dedupe Key", memory.dedupe_key().unwrap_or("-")]);
                table.add_row(["Created", &memory.created_at.to_rfc3339()]);
                table.add_row(["Updated", &memory.updated_at.to_rfc3339()]);
                table.add_row([
                    "Last Accessed",
                    &memory
                        .last_accessed_at
                        .map_or_else(|| "-".to_string(), |t| t.to_rfc3339()),
                ]);
                table.add_row(["Access Count", &memory.access_count.to_string()]);
                table.add_row([
                    "Expires",
                    &memory
                        .expires_at
                        .map_or_else(|| "-".to_string(), |t| t.to_rfc3339()),
                ]);
                table.add_row([
                    "Embedding Size",
                    &memory.embedding.as_ref().map_or(0, Vec::len).to_string(),
                ]);
                for (key, value) in &memory.metadata {
                    table.add_row([format!("meta.{key}"), value.to_string()]);
                }

                println!("{table}");
            }
        }

        Ok(())
    }

    async fn delete(
        manager: &MemoryManager,
        owner: &str,
        args: &DeleteArgs,
        format: OutputFormat,
    ) -> CliResult<()> {
        let id = Uuid::parse_str(&args.id)?;
        let deleted = manager.forget(owner, id).await?;

        match format {
            OutputFormat::Json => {
                print_json(&serde_json::json!({
                    "id": args.id,
                    "deleted": deleted,
                }))?;
            }
            OutputFormat::Table => {
                if deleted {
                    println!("Memory {} deleted successfully.", args.id);
                } else {
                    println!("Memory {} not found.", args.id);
                }
            }
        }

        Ok(())
    }

    async fn add(
        manager: &MemoryManager,
        owner: &str,
        args: &AddArgs,
        format: OutputFormat,
    ) -> CliResult<()> {
        let memory_type: MemoryType = args.r#type.parse()?;
        let mut input = MemoryInput::new(memory_type, args.category.clone(), args.text.clone())
            .with_importance(args.importance)
            .with_metadata(keepsake::memory::meta::SOURCE, "manual");
        if let Some(ref key) = args.key {
            input = input.with_dedupe_key(key.clone());
        }

        let mut options = RememberOptions::default();
        if let Some(ref strategy) = args.strategy {
            options = options.with_strategy(strategy.parse::<ConflictStrategy>()?);
        }
        if args.force {
            options = options.skip_conflict_check();
        }

        let outcome = manager.remember_detailed(owner, input, options).await?;

        match format {
            OutputFormat::Json => print_json(&outcome)?,
            OutputFormat::Table => {
                println!("Action: {}", outcome.action.as_str());
                if let Some(ref memory) = outcome.memory {
                    println!("ID: {}", memory.id);
                    println!("Content: {}", memory.content);
                }
                if let Some(existing) = outcome.existing_id {
                    println!("Existing: {existing}");
                }
                if let Some(ref reason) = outcome.reason {
                    println!("Reason: {reason}");
                }
                if outcome.action == RememberAction::Pending {
                    println!("\nRun `keepsake-cli memory confirm <id>` to accept it.");
                }
            }
        }

        Ok(())
    }

    async fn confirm(
        manager: &MemoryManager,
        owner: &str,
        args: &ConfirmArgs,
        format: OutputFormat,
    ) -> CliResult<()> {
        let id = Uuid::parse_str(&args.id)?;
        let confirmed = manager.confirm_pending(owner, id, !args.reject).await?;

        match format {
            OutputFormat::Json => {
                print_json(&serde_json::json!({
                    "id": args.id,
                    "accepted": confirmed.is_some(),
                    "memory": confirmed,
                }))?;
            }
            OutputFormat::Table => match confirmed {
                Some(memory) => println!("Memory {} accepted: {}", memory.id, memory.content),
                None => println!("Memory {} rejected and deleted.", args.id),
            },
        }

        Ok(())
    }
}

fn status(memory: &Memory) -> &'static str {
    if memory.is_pending() {
        "pending"
    } else if memory.is_archived() {
        "archived"
    } else {
        "active"
    }
}

pub(crate) fn summary_json(memory: &Memory) -> serde_json::Value {
    serde_json::json!({
        "id": memory.id.to_string(),
        "content": &memory.content,
        "type": memory.memory_type,
        "category": &memory.category,
        "importance": memory.importance,
        "status": status(memory),
        "access_count": memory.access_count,
        "created_at": memory.created_at.to_rfc3339(),
    })
}
