//! Partition orchestration: the per-partition pipeline and the scheduler
//! running many of them concurrently.

mod progress;
pub mod repair;
mod scheduler;
mod unit;

pub use progress::{Progress, ProgressSnapshot};
pub use repair::{plan_repair, RepairPlan};
pub use scheduler::{PartitionRunner, Scheduler, SchedulerConfig, SchedulerStats};
pub use unit::{PartitionResult, PartitionStatus, PipelineSettings, Stage, UnitPipeline};
