use std::path::Path;

use clap::Parser;
use keepsake::config::Config;
use serde_json::Value;

use crate::error::CliResult;
use crate::output::{OutputFormat, print_json, table};

#[derive(Parser)]
pub struct ConfigCommand {
    #[clap(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Parser)]
pub enum ConfigSubcommand {
    #[clap(about = "Show the effective configuration, command-line overrides included")]
    Show {
        #[clap(long, help = "Only show one section, e.g. decay")]
        section: Option<String>,
    },
}

impl ConfigCommand {
    pub fn execute(
        &self,
        config: &Config,
        config_path: Option<&Path>,
        format: OutputFormat,
    ) -> CliResult<()> {
        match &self.command {
            ConfigSubcommand::Show { section } => {
                Self::show(config, config_path, section.as_deref(), format)
            }
        }
    }

    fn show(
        config: &Config,
        config_path: Option<&Path>,
        section: Option<&str>,
        format: OutputFormat,
    ) -> CliResult<()> {
        let mut sections = match serde_json::to_value(config)? {
            Value::Object(map) => map,
            _ => return Err("Configuration did not serialize to a table".into()),
        };
        if let Some(name) = section {
            let value = sections
                .remove(name)
                .ok_or_else(|| format!("Unknown config section: {name}"))?;
            sections = serde_json::Map::new();
            sections.insert(name.to_string(), value);
        }

        match format {
            OutputFormat::Json => print_json(&sections)?,
            OutputFormat::Table => {
                match config_path {
                    Some(path) => println!("Configuration from: {}", path.display()),
                    None => println!("Configuration: (defaults or first file found)"),
                }
                println!("==============================\n");

                for (name, value) in &sections {
                    println!("[{name}]");
                    let mut settings = table(&["Setting", "Value"]);
                    let mut rows = Vec::new();
                    flatten("", value, &mut rows);
                    for (key, value) in rows {
                        settings.add_row([key, value]);
                    }
                    println!("{settings}\n");
                }
            }
        }

        Ok(())
    }
}

/// Nested tables become dotted keys so every section fits two columns
fn flatten(prefix: &str, value: &Value, rows: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&key, child, rows);
            }
        }
        Value::String(s) if s.is_empty() => rows.push((prefix.to_string(), "(not set)".into())),
        Value::String(s) => rows.push((prefix.to_string(), s.clone())),
        Value::Null => rows.push((prefix.to_string(), "(not set)".into())),
        other => rows.push((prefix.to_string(), other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_uses_dotted_keys() {
        let value = serde_json::json!({
            "tier": { "hot": 0.7, "warm": 0.4 },
            "api_url": "",
            "enabled": false,
        });
        let mut rows = Vec::new();
        flatten("", &value, &mut rows);

        assert!(rows.contains(&("tier.hot".to_string(), "0.7".to_string())));
        assert!(rows.contains(&("api_url".to_string(), "(not set)".to_string())));
        assert!(rows.contains(&("enabled".to_string(), "false".to_string())));
    }

    #[test]
    fn test_every_default_section_serializes() {
        let value = serde_json::to_value(Config::default()).unwrap();
        let sections = value.as_object().unwrap();
        for name in ["storage", "embedding", "llm", "decay", "compaction", "scheduler"] {
            assert!(sections.contains_key(name), "missing section {name}");
        }
    }
}
