//! Live tier: reference queries against running language analyzers.
//!
//! Each language gets a pool of analyzer processes sized from the host's
//! cores and memory. A batch is split across the pool, every connection runs
//! its shard on its own event loop, and failed requests are retried after
//! restarting the analyzer. Nodes that still fail resolve to empty lists.
mod connection;
mod health;
mod launcher;
mod pool;
mod session;
mod sizing;
pub mod transport;

pub use connection::{plan_chunks, AnalyzerConnection, ConnectionContext, ShardJob, ShardResult};
pub use health::{restart_backoff, AttemptOutcome, ConnectionHealth};
pub use launcher::{kill_process_tree, AnalyzerIo, AnalyzerLauncher, ProcessLauncher};
pub use pool::{shard_round_robin, LiveQueryPool, LiveStats, LiveStatsSnapshot};
pub use session::{AnalyzerSession, QueryKind};
pub use sizing::{compute_pool_size, HostResources, PoolSizer};
