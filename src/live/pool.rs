use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::connection::{AnalyzerConnection, ConnectionContext, ShardJob, ShardResult};
use super::launcher::{AnalyzerLauncher, ProcessLauncher};
use super::session::QueryKind;
use super::sizing::{HostResources, PoolSizer};
use crate::config::ResolverConfig;
use crate::errors::Result;
use crate::languages::LanguageRegistry;
use crate::progress::ProgressTracker;
use crate::types::{dedup_nodes, empty_resolution_map, DefinitionNode, Language, ResolutionMap};

/// Counters shared by every connection of a pool.
#[derive(Debug, Default)]
pub struct LiveStats {
    requests: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    restarts: AtomicU64,
    nodes_resolved: AtomicU64,
    nodes_failed: AtomicU64,
    connections_started: AtomicU64,
}

impl LiveStats {
    pub fn record_requests(&self, n: usize) {
        self.requests.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_failures(&self, n: usize) {
        self.failures.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resolved_nodes(&self, n: usize) {
        self.nodes_resolved.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_failed_nodes(&self, n: usize) {
        self.nodes_failed.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_connection_started(&self) {
        self.connections_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LiveStatsSnapshot {
        LiveStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            nodes_resolved: self.nodes_resolved.load(Ordering::Relaxed),
            nodes_failed: self.nodes_failed.load(Ordering::Relaxed),
            connections_started: self.connections_started.load(Ordering::Relaxed),
            connections: 0,
        }
    }
}

/// Point-in-time copy of [`LiveStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LiveStatsSnapshot {
    /// Requests sent to analyzers, retries included.
    pub requests: u64,
    /// Requests that failed or timed out.
    pub failures: u64,
    pub retries: u64,
    pub restarts: u64,
    pub nodes_resolved: u64,
    pub nodes_failed: u64,
    pub connections_started: u64,
    /// Connections currently alive.
    pub connections: usize,
}

/// Deals `nodes` into `n` shards, one node at a time.
///
/// Shard sizes differ by at most one. Returns no shards when `n` is zero.
pub fn shard_round_robin(nodes: Vec<DefinitionNode>, n: usize) -> Vec<Vec<DefinitionNode>> {
    if n == 0 {
        return Vec::new();
    }
    let mut shards: Vec<Vec<DefinitionNode>> = (0..n).map(|_| Vec::new()).collect();
    for (i, node) in nodes.into_iter().enumerate() {
        shards[i % n].push(node);
    }
    shards
}

/// Pools of live analyzer connections, one pool per language.
///
/// Pools are created on first use and sized from host resources read once
/// at construction. Batches are sharded across a pool's connections and run
/// concurrently; nodes that cannot be resolved map to empty lists.
pub struct LiveQueryPool {
    project_root: PathBuf,
    registry: Arc<LanguageRegistry>,
    sizer: PoolSizer,
    context: ConnectionContext,
    pools: Mutex<HashMap<Language, Vec<Arc<AnalyzerConnection>>>>,
    next_connection_id: AtomicUsize,
    shut_down: AtomicBool,
}

impl LiveQueryPool {
    /// Creates a pool that launches the registry's analyzer processes.
    pub fn new(project_root: &Path, config: &ResolverConfig, registry: Arc<LanguageRegistry>) -> Self {
        let launcher = Arc::new(ProcessLauncher::new(Arc::clone(&registry)));
        Self::with_launcher(project_root, config, registry, launcher, HostResources::detect())
    }

    /// Creates a pool with a custom launcher and a known host.
    pub fn with_launcher(
        project_root: &Path,
        config: &ResolverConfig,
        registry: Arc<LanguageRegistry>,
        launcher: Arc<dyn AnalyzerLauncher>,
        host: HostResources,
    ) -> Self {
        let sizer = PoolSizer::new(
            host,
            config.pool_size,
            config.reserved_memory_mb,
            config.max_pool_size,
        );
        let context = ConnectionContext {
            launcher,
            project_root: project_root.to_path_buf(),
            timeouts: config.timeouts(),
            max_chunk_size: config.max_chunk_size.max(1),
            max_attempts: config.max_attempts.max(1),
            restart_backoff: config.restart_backoff(),
            shutdown_grace: config.shutdown_grace(),
            stats: Arc::new(LiveStats::default()),
        };
        Self {
            project_root: project_root.to_path_buf(),
            registry,
            sizer,
            context,
            pools: Mutex::new(HashMap::new()),
            next_connection_id: AtomicUsize::new(1),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn host(&self) -> &HostResources {
        self.sizer.host()
    }

    /// How many connections a language gets.
    pub fn pool_size_for(&self, language: Language) -> usize {
        match self.registry.get(language) {
            Some(caps) => self.sizer.size_for(&caps.profile),
            None => 1,
        }
    }

    /// Returns up to `count` running connections for a language, starting
    /// the missing ones in parallel.
    ///
    /// Existing connections are reused. A connection that fails to start is
    /// logged and left out, so the result may be shorter than `count`.
    pub fn acquire_pool(&self, language: Language, count: usize) -> Vec<Arc<AnalyzerConnection>> {
        let Ok(mut pools) = self.pools.lock() else {
            return Vec::new();
        };
        let pool = pools.entry(language).or_default();
        pool.retain(|c| c.is_running());

        let missing = count.saturating_sub(pool.len());
        if missing > 0 && !self.shut_down.load(Ordering::SeqCst) {
            info!("starting {} {} analyzer connection(s)", missing, language);
            let started: Vec<Result<AnalyzerConnection>> = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..missing)
                    .map(|_| {
                        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
                        let ctx = self.context.clone();
                        scope.spawn(move || AnalyzerConnection::start(id, language, ctx))
                    })
                    .collect();
                handles
                    .into_iter()
                    .filter_map(|h| h.join().ok())
                    .collect()
            });
            for connection in started {
                match connection {
                    Ok(c) => pool.push(Arc::new(c)),
                    Err(e) => warn!("{} analyzer failed to start: {}", language, e),
                }
            }
        }

        pool.iter().take(count).cloned().collect()
    }

    /// Resolves references for every node through live analyzers.
    pub fn resolve_batch(&self, nodes: &[DefinitionNode]) -> ResolutionMap {
        self.run_batch(QueryKind::References, nodes)
    }

    /// Resolves the definition site of every node through live analyzers.
    pub fn definition_batch(&self, nodes: &[DefinitionNode]) -> ResolutionMap {
        self.run_batch(QueryKind::Definition, nodes)
    }

    fn node_language(&self, node: &DefinitionNode) -> Option<Language> {
        node.language
            .or_else(|| self.registry.language_for_path(&node.file_path))
            .filter(|l| self.registry.get(*l).is_some())
    }

    fn run_batch(&self, kind: QueryKind, nodes: &[DefinitionNode]) -> ResolutionMap {
        let mut results = empty_resolution_map(nodes);
        if nodes.is_empty() || self.shut_down.load(Ordering::SeqCst) {
            return results;
        }

        let unique = dedup_nodes(nodes);
        let mut by_language: HashMap<Language, Vec<DefinitionNode>> = HashMap::new();
        let mut undetected = 0usize;
        for node in unique {
            match self.node_language(&node) {
                Some(language) => by_language.entry(language).or_default().push(node),
                None => undetected += 1,
            }
        }
        if undetected > 0 {
            debug!("{} node(s) have no detectable language; left empty", undetected);
        }

        let total: usize = by_language.values().map(Vec::len).sum();
        let progress = Arc::new(ProgressTracker::new("live references", total));
        let (reply_tx, reply_rx) = crossbeam_channel::unbounded::<ShardResult>();
        let mut unsubmitted = 0usize;

        for (language, language_nodes) in by_language {
            let connections = self.acquire_pool(language, self.pool_size_for(language));
            if connections.is_empty() {
                warn!(
                    "no {} analyzer available; {} node(s) left empty",
                    language,
                    language_nodes.len()
                );
                unsubmitted += language_nodes.len();
                continue;
            }
            debug!(
                "{}: {} node(s) across {} connection(s)",
                language,
                language_nodes.len(),
                connections.len()
            );

            let shards = shard_round_robin(language_nodes, connections.len());
            for (connection, shard) in connections.iter().zip(shards) {
                if shard.is_empty() {
                    continue;
                }
                let size = shard.len();
                let job = ShardJob {
                    kind,
                    nodes: shard,
                    progress: Some(Arc::clone(&progress)),
                    reply: reply_tx.clone(),
                };
                if let Err(e) = connection.submit(job) {
                    warn!("{}", e);
                    unsubmitted += size;
                }
            }
        }
        drop(reply_tx);

        let mut failed = unsubmitted;
        for shard in reply_rx.iter() {
            failed += shard.failed.len();
            for (id, references) in shard.references {
                results.insert(id, references);
            }
        }

        progress.finish();
        if failed > 0 {
            warn!("{} node(s) could not be resolved live", failed);
        }
        results
    }

    pub fn stats(&self) -> LiveStatsSnapshot {
        let mut snapshot = self.context.stats.snapshot();
        snapshot.connections = self.connection_count();
        snapshot
    }

    /// Running connections across all languages.
    pub fn connection_count(&self) -> usize {
        match self.pools.lock() {
            Ok(pools) => pools
                .values()
                .flat_map(|p| p.iter())
                .filter(|c| c.is_running())
                .count(),
            Err(_) => 0,
        }
    }

    /// Stops every connection, forcing those that exceed the grace period.
    ///
    /// Best-effort and idempotent; later batches resolve to empty lists.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let connections: Vec<Arc<AnalyzerConnection>> = match self.pools.lock() {
            Ok(mut pools) => pools.drain().flat_map(|(_, p)| p).collect(),
            Err(_) => return,
        };
        if connections.is_empty() {
            return;
        }
        info!("shutting down {} analyzer connection(s)", connections.len());
        let grace = self.context.shutdown_grace;
        std::thread::scope(|scope| {
            for connection in &connections {
                scope.spawn(move || connection.shutdown(grace));
            }
        });
    }
}

impl Drop for LiveQueryPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
