//! The scheduling engine: host queues, the global scheduler, statistics,
//! and bandwidth throttling

mod host_queue;
#[allow(clippy::module_inception)]
mod scheduler;
mod status;
mod throttle;

pub use host_queue::{EvictedHost, HostQueue, Partition, RobotsState};
pub use scheduler::{CompletedFetch, FetchAssignment, RequestScheduler};
pub use status::FetcherStatus;
pub use throttle::BandwidthThrottle;
