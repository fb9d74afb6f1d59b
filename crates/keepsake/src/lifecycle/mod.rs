//! Background lifecycle: decay, compaction and the scheduler that drives them

pub mod clock;
pub mod compaction;
pub mod decay;
pub mod lock;
pub mod scheduler;
pub mod summarizer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use compaction::{CompactionConfig, CompactionEngine, CompactionReport, CompactionResult};
pub use decay::{
    AccessBatchResult, AccessTracker, DecayConfig, DecayEngine, DecayResult, NoopAccessTracker,
};
pub use lock::{FileLockProvider, InMemoryLockProvider, LockLease, LockProvider, lease_ttl};
pub use scheduler::{MaintenanceScheduler, SchedulerHandle};
pub use summarizer::{ExtractiveSummarizer, LlmSummarizer, Summarizer};
