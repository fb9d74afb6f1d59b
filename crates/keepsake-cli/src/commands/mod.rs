pub mod compact;
pub mod config;
pub mod decay;
pub mod extract;
pub mod memory;
pub mod recall;
pub mod stats;

pub use compact::CompactCommand;
pub use config::ConfigCommand;
pub use decay::DecayCommand;
pub use extract::ExtractCommand;
pub use memory::MemoryCommand;
pub use recall::RecallCommand;
pub use stats::StatsCommand;
