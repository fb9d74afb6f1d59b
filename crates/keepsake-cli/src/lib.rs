pub mod commands;
pub mod error;
pub mod output;

pub use commands::{
    CompactCommand, ConfigCommand, DecayCommand, ExtractCommand, MemoryCommand, RecallCommand,
    StatsCommand,
};
pub use error::{CliError, CliResult};
pub use output::{OutputFormat, format_timestamp, truncate_string};
