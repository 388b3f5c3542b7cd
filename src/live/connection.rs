use std::ops::Range;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::health::{restart_backoff, AttemptOutcome, ConnectionHealth};
use super::launcher::{kill_process_tree, AnalyzerLauncher};
use super::pool::LiveStats;
use super::session::{AnalyzerSession, QueryKind};
use crate::config::TimeoutPolicy;
use crate::errors::{Result, SymrefError};
use crate::progress::ProgressTracker;
use crate::types::{DefinitionNode, Language, Reference};

/// A shard of nodes handed to one connection.
pub struct ShardJob {
    pub kind: QueryKind,
    pub nodes: Vec<DefinitionNode>,
    pub progress: Option<Arc<ProgressTracker>>,
    pub reply: Sender<ShardResult>,
}

/// What a connection produced for one shard.
///
/// Every node of the shard lands in exactly one of the two lists.
#[derive(Debug, Default)]
pub struct ShardResult {
    pub references: Vec<(String, Vec<Reference>)>,
    pub failed: Vec<String>,
}

enum Command {
    Run(ShardJob),
    Shutdown,
}

/// Settings shared by every connection of a pool.
#[derive(Clone)]
pub struct ConnectionContext {
    pub launcher: Arc<dyn AnalyzerLauncher>,
    pub project_root: PathBuf,
    pub timeouts: TimeoutPolicy,
    pub max_chunk_size: usize,
    pub max_attempts: u32,
    pub restart_backoff: Duration,
    pub shutdown_grace: Duration,
    pub stats: Arc<LiveStats>,
}

/// Handle to one pooled analyzer.
///
/// The analyzer is driven by a dedicated thread running its own
/// single-threaded tokio runtime; shards are queued to it and answered over a
/// channel, so the handle itself never blocks on the analyzer.
pub struct AnalyzerConnection {
    id: usize,
    language: Language,
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    pid: Arc<AtomicU32>,
    stopped: Receiver<()>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl AnalyzerConnection {
    /// Starts the connection thread and blocks until its analyzer is ready.
    pub fn start(id: usize, language: Language, ctx: ConnectionContext) -> Result<Self> {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let pid = Arc::new(AtomicU32::new(0));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);
        let (stopped_tx, stopped) = crossbeam_channel::bounded::<()>(1);

        let worker_cancel = cancel.clone();
        let worker_pid = Arc::clone(&pid);
        let thread = std::thread::Builder::new()
            .name(format!("symref-{}-{}", language, id))
            .spawn(move || {
                let _stopped = stopped_tx;
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.into()));
                        return;
                    }
                };
                runtime.block_on(async move {
                    let mut worker = ConnectionWorker {
                        id,
                        language,
                        ctx,
                        session: None,
                        health: ConnectionHealth::Healthy,
                        launches: 0,
                        pid: worker_pid,
                    };
                    if let Err(e) = worker.restart().await {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                    let _ = ready_tx.send(Ok(()));
                    worker.run(command_rx, worker_cancel).await;
                });
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(SymrefError::Connection {
                    message: "connection thread exited before the analyzer was ready".to_string(),
                    language: language.to_string(),
                })
            }
        }

        Ok(Self {
            id,
            language,
            commands,
            cancel,
            pid,
            stopped,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Whether the connection thread is still accepting work.
    pub fn is_running(&self) -> bool {
        matches!(self.stopped.try_recv(), Err(TryRecvError::Empty))
    }

    /// Queues a shard. The result arrives on the job's reply channel.
    pub fn submit(&self, job: ShardJob) -> Result<()> {
        self.commands
            .send(Command::Run(job))
            .map_err(|_| SymrefError::Connection {
                message: format!("connection {} is stopped", self.id),
                language: self.language.to_string(),
            })
    }

    /// Asks the connection to stop and waits up to `grace` for it.
    ///
    /// A connection that does not stop in time has its analyzer process
    /// group killed and its loop cancelled. Never fails.
    pub fn shutdown(&self, grace: Duration) {
        let _ = self.commands.send(Command::Shutdown);

        if let Err(RecvTimeoutError::Timeout) = self.stopped.recv_timeout(grace) {
            warn!(
                "{} connection {} did not stop within {:?}; forcing",
                self.language, self.id, grace
            );
            let pid = self.pid.load(Ordering::SeqCst);
            if pid != 0 {
                kill_process_tree(pid);
            }
            self.cancel.cancel();
            if let Err(RecvTimeoutError::Timeout) =
                self.stopped.recv_timeout(Duration::from_secs(1))
            {
                warn!(
                    "{} connection {} is still running; detaching it",
                    self.language, self.id
                );
                return;
            }
        }

        let handle = self.thread.lock().ok().and_then(|mut t| t.take());
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

/// Splits a shard of `len` nodes into consecutive chunks of at most
/// `max_chunk_size`. Each chunk gets its own deadline.
pub fn plan_chunks(len: usize, max_chunk_size: usize) -> Vec<Range<usize>> {
    let size = max_chunk_size.max(1);
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

/// State owned by a connection's thread.
struct ConnectionWorker {
    id: usize,
    language: Language,
    ctx: ConnectionContext,
    session: Option<AnalyzerSession>,
    health: ConnectionHealth,
    launches: u32,
    pid: Arc<AtomicU32>,
}

impl ConnectionWorker {
    async fn run(&mut self, mut commands: mpsc::UnboundedReceiver<Command>, cancel: CancellationToken) {
        loop {
            let command = tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => command,
            };
            match command {
                Some(Command::Run(job)) => {
                    let outcome = tokio::select! {
                        _ = cancel.cancelled() => None,
                        result = self.execute_shard(job.kind, &job.nodes, job.progress.as_deref()) => Some(result),
                    };
                    let result = outcome.unwrap_or_else(|| ShardResult {
                        references: Vec::new(),
                        failed: job.nodes.iter().map(|n| n.id.clone()).collect(),
                    });
                    let _ = job.reply.send(result);
                    if cancel.is_cancelled() {
                        break;
                    }
                }
                Some(Command::Shutdown) | None => {
                    if let Some(session) = self.session.take() {
                        session.shutdown(self.ctx.shutdown_grace / 2).await;
                    }
                    self.pid.store(0, Ordering::SeqCst);
                    debug!("{} connection {} stopped", self.language, self.id);
                    return;
                }
            }
        }

        if let Some(session) = self.session.take() {
            session.kill().await;
        }
        self.pid.store(0, Ordering::SeqCst);
        debug!("{} connection {} cancelled", self.language, self.id);
    }

    /// Runs a shard in chunks of at most `max_chunk_size`, one after another.
    async fn execute_shard(
        &mut self,
        kind: QueryKind,
        nodes: &[DefinitionNode],
        progress: Option<&ProgressTracker>,
    ) -> ShardResult {
        let mut result = ShardResult::default();
        for range in plan_chunks(nodes.len(), self.ctx.max_chunk_size) {
            let chunk = &nodes[range];
            let (resolved, failed) = self.execute_chunk(kind, chunk).await;
            result.references.extend(resolved);
            result.failed.extend(failed);
            if let Some(progress) = progress {
                progress.increment(chunk.len());
            }
        }
        result
    }

    /// Sends every request of a chunk at once and waits for all of them
    /// under one deadline. Failed requests are retried with a longer deadline,
    /// restarting the analyzer first when the failure left it unusable.
    async fn execute_chunk(
        &mut self,
        kind: QueryKind,
        chunk: &[DefinitionNode],
    ) -> (Vec<(String, Vec<Reference>)>, Vec<String>) {
        let stats = Arc::clone(&self.ctx.stats);
        let mut resolved = Vec::with_capacity(chunk.len());
        let mut remaining: Vec<&DefinitionNode> = chunk.iter().collect();

        if self.health.is_dead() {
            self.health = ConnectionHealth::Healthy;
            if let Err(e) = self.restart().await {
                warn!("{} connection {} could not be revived: {}", self.language, self.id, e);
                self.health = ConnectionHealth::Dead;
                stats.record_failed_nodes(remaining.len());
                return (resolved, remaining.iter().map(|n| n.id.clone()).collect());
            }
        }

        loop {
            if self.session.is_none() {
                if let Err(e) = self.restart().await {
                    warn!("{} connection {} restart failed: {}", self.language, self.id, e);
                    self.health = self.health.next(AttemptOutcome::Failure, self.ctx.max_attempts);
                    if self.health.is_dead() {
                        break;
                    }
                    continue;
                }
            }
            let Some(session) = self.session.as_ref() else {
                break;
            };

            let attempt = self.health.failed_attempts();
            let timeout = self.ctx.timeouts.for_attempt(remaining.len(), attempt);
            let deadline = Instant::now() + timeout;
            stats.record_requests(remaining.len());

            let answers = join_all(remaining.iter().map(|node| async move {
                let answer = tokio::time::timeout_at(deadline, session.query(kind, node)).await;
                (*node, answer)
            }))
            .await;

            let mut failed = Vec::new();
            let mut needs_restart = false;
            for (node, answer) in answers {
                match answer {
                    Ok(Ok(references)) => resolved.push((node.id.clone(), references)),
                    Ok(Err(e)) => {
                        debug!("{} query for {} failed: {}", self.language, node.id, e);
                        needs_restart |= e.is_connection_failure();
                        failed.push(node);
                    }
                    Err(_) => {
                        needs_restart = true;
                        failed.push(node);
                    }
                }
            }

            if failed.is_empty() {
                self.health = self.health.next(AttemptOutcome::Success, self.ctx.max_attempts);
                remaining.clear();
                break;
            }

            stats.record_failures(failed.len());
            self.health = self.health.next(AttemptOutcome::Failure, self.ctx.max_attempts);
            remaining = failed;
            if self.health.is_dead() {
                warn!(
                    "{} connection {}: giving up on {} node(s) after {} attempts",
                    self.language,
                    self.id,
                    remaining.len(),
                    self.ctx.max_attempts
                );
                break;
            }

            stats.record_retry();
            if needs_restart {
                debug!(
                    "{} connection {}: attempt {} timed out or lost the analyzer after {:?}",
                    self.language,
                    self.id,
                    self.health.failed_attempts(),
                    timeout
                );
                if let Some(session) = self.session.take() {
                    session.kill().await;
                }
            }
        }

        stats.record_resolved_nodes(resolved.len());
        stats.record_failed_nodes(remaining.len());
        (resolved, remaining.iter().map(|n| n.id.clone()).collect())
    }

    /// Replaces the current session with a fresh analyzer, after the backoff
    /// for the current number of failed attempts.
    async fn restart(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            session.kill().await;
        }
        self.pid.store(0, Ordering::SeqCst);

        let delay = restart_backoff(self.ctx.restart_backoff, self.health.failed_attempts());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let session = AnalyzerSession::start(
            self.ctx.launcher.as_ref(),
            self.language,
            &self.ctx.project_root,
            self.ctx.timeouts.max,
        )
        .await?;
        self.pid.store(session.pid().unwrap_or(0), Ordering::SeqCst);
        self.session = Some(session);
        self.launches += 1;

        if self.launches == 1 {
            self.ctx.stats.record_connection_started();
        } else {
            self.ctx.stats.record_restart();
            info!("{} connection {} restarted", self.language, self.id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oversized_shard_is_chunked() {
        let chunks = plan_chunks(120, 50);
        assert_eq!(chunks, vec![0..50, 50..100, 100..120]);
        assert!(chunks.iter().all(|c| c.len() <= 50));
    }

    #[test]
    fn test_small_shard_is_one_chunk() {
        assert_eq!(plan_chunks(7, 50), vec![0..7]);
        assert!(plan_chunks(0, 50).is_empty());
        assert_eq!(plan_chunks(3, 0).len(), 3);
    }

    #[test]
    fn test_each_chunk_gets_its_own_deadline() {
        let timeouts = TimeoutPolicy {
            base: Duration::from_secs(30),
            per_request: Duration::from_secs(1),
            max: Duration::from_secs(300),
        };
        let deadlines: Vec<Duration> = plan_chunks(120, 50)
            .into_iter()
            .map(|c| timeouts.for_batch(c.len()))
            .collect();
        assert_eq!(
            deadlines,
            vec![Duration::from_secs(80), Duration::from_secs(80), Duration::from_secs(50)]
        );
        assert_eq!(timeouts.for_batch(120), Duration::from_secs(150));
    }
}
