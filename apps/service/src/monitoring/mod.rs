/// Network monitoring engine
///
/// This module is responsible for:
/// - Deciding when to sample (schedulers)
/// - Probing reachability and collecting per-source fields
/// - Persisting, pruning and reporting samples
/// - Reacting to preference changes at runtime
pub mod aggregator;
pub mod controller;
pub mod events;
pub mod monitor_loop;
pub mod probe;
pub mod report;
pub mod scheduler;
pub mod sources;
pub mod sysfs;
pub mod timing;
pub mod types;
pub mod validation;
pub mod wake;

pub use aggregator::{FieldSource, SampleAggregator};
pub use controller::MonitorController;
pub use monitor_loop::MonitorLoop;
pub use probe::ReachabilityProbe;
pub use scheduler::SchedulerEnv;
