use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::tier::{decide_tier, ResolverTier};
use crate::config::ResolverConfig;
use crate::errors::{Result, SymrefError};
use crate::index::{generate_if_stale, GenerateOptions, IndexResolver, IndexStats};
use crate::languages::{detect_project_language, LanguageRegistry};
use crate::live::{AnalyzerLauncher, HostResources, LiveQueryPool, LiveStatsSnapshot, ProcessLauncher};
use crate::types::{empty_resolution_map, DefinitionNode, Language, ResolutionMap, ResolverMode};

/// Diagnostic view of a resolver.
#[derive(Debug, Clone, Serialize)]
pub struct ResolverInfo {
    pub mode: ResolverMode,
    pub effective_tier: ResolverTier,
    pub detected_language: Option<Language>,
    pub index_enabled: bool,
    pub live_enabled: bool,
    pub index_stats: Option<IndexStats>,
    pub live_stats: Option<LiveStatsSnapshot>,
    pub batches: u64,
    /// Times the index was unavailable and live analyzers answered instead.
    pub index_fallbacks: u64,
}

/// Single entry point for reference resolution.
///
/// The project language is detected once at construction. On the first batch
/// the resolver settles on a tier (index, live, or index with live fallback)
/// and keeps it for its lifetime.
pub struct HybridResolver {
    project_root: PathBuf,
    config: ResolverConfig,
    registry: Arc<LanguageRegistry>,
    language: Option<Language>,
    index: Option<IndexResolver>,
    live: Option<LiveQueryPool>,
    tier: OnceLock<ResolverTier>,
    batches: AtomicU64,
    index_fallbacks: AtomicU64,
}

impl HybridResolver {
    /// Creates a resolver that launches real analyzer processes.
    ///
    /// Fails only on invalid configuration, including `IndexOnly` for a
    /// project whose language has no index tier.
    pub fn new(project_root: &Path, config: ResolverConfig) -> Result<Self> {
        let registry = Arc::new(LanguageRegistry::from_config(&config));
        let launcher = Arc::new(ProcessLauncher::new(Arc::clone(&registry)));
        Self::build(project_root, config, registry, launcher)
    }

    /// Creates a resolver whose live tier uses `launcher` to start analyzers.
    pub fn with_launcher(
        project_root: &Path,
        config: ResolverConfig,
        launcher: Arc<dyn AnalyzerLauncher>,
    ) -> Result<Self> {
        let registry = Arc::new(LanguageRegistry::from_config(&config));
        Self::build(project_root, config, registry, launcher)
    }

    fn build(
        project_root: &Path,
        config: ResolverConfig,
        registry: Arc<LanguageRegistry>,
        launcher: Arc<dyn AnalyzerLauncher>,
    ) -> Result<Self> {
        config.validate()?;
        let language = detect_project_language(project_root, &registry);
        let index_supported = language.is_some_and(|l| registry.supports_index(l));

        if config.mode == ResolverMode::IndexOnly && !index_supported {
            return Err(SymrefError::Config {
                message: format!(
                    "index_only mode needs an index tier, but the project language ({}) has none",
                    language.map(|l| l.as_str()).unwrap_or("undetected")
                ),
            });
        }

        let index = match language {
            Some(l) if index_supported && config.mode.allows_index() => Some(IndexResolver::new(
                project_root,
                &config.index_path_for(project_root),
                registry.role_policy(l),
            )),
            _ => None,
        };

        let live = if config.mode.allows_live() {
            Some(LiveQueryPool::with_launcher(
                project_root,
                &config,
                Arc::clone(&registry),
                launcher,
                HostResources::detect(),
            ))
        } else {
            None
        };

        info!(
            "resolver for {}: mode {}, language {}",
            project_root.display(),
            config.mode.as_str(),
            language.map(|l| l.as_str()).unwrap_or("undetected")
        );

        Ok(Self {
            project_root: project_root.to_path_buf(),
            config,
            registry,
            language,
            index,
            live,
            tier: OnceLock::new(),
            batches: AtomicU64::new(0),
            index_fallbacks: AtomicU64::new(0),
        })
    }

    pub fn detected_language(&self) -> Option<Language> {
        self.language
    }

    pub fn live_pool(&self) -> Option<&LiveQueryPool> {
        self.live.as_ref()
    }

    /// The tier in use, deciding it now if no batch has run yet.
    pub fn tier(&self) -> ResolverTier {
        *self.tier.get_or_init(|| self.decide())
    }

    fn decide(&self) -> ResolverTier {
        let index_loaded = match &self.index {
            Some(index) => {
                self.generate_index_if_needed(index);
                match index.load() {
                    Ok(_) => true,
                    Err(e) => {
                        warn!("index unavailable: {}", e);
                        false
                    }
                }
            }
            None => false,
        };

        let tier = decide_tier(self.config.mode, self.index.is_some(), index_loaded);
        if self.index.is_some() && !index_loaded && tier == ResolverTier::LiveOnly {
            self.index_fallbacks.fetch_add(1, Ordering::Relaxed);
            info!("falling back to live analyzers");
        }
        info!("resolution tier: {}", tier);
        tier
    }

    fn generate_index_if_needed(&self, index: &IndexResolver) {
        let Some(language) = self.language else {
            return;
        };
        if !self.config.generate_index {
            return;
        }
        let project_name = self
            .project_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "project".to_string());
        let options = GenerateOptions {
            timeout: self.config.generation_timeout(),
            memory_mb: self.config.generation_memory_mb,
        };
        match generate_if_stale(
            &self.project_root,
            index.index_path(),
            &project_name,
            language,
            &self.registry,
            &options,
        ) {
            Ok(true) => info!("index regenerated"),
            Ok(false) => debug!("index is up to date"),
            Err(e) => warn!("index generation failed: {}", e),
        }
    }

    /// Whether a node belongs to the project language (and so to its index).
    fn index_eligible(&self, node: &DefinitionNode) -> bool {
        let node_language = node
            .language
            .or_else(|| self.registry.language_for_path(&node.file_path));
        match node_language {
            Some(l) => Some(l) == self.language,
            None => true,
        }
    }

    fn resolve_live(&self, nodes: &[DefinitionNode], results: &mut ResolutionMap) {
        if nodes.is_empty() {
            return;
        }
        match &self.live {
            Some(live) => results.extend(live.resolve_batch(nodes)),
            None => debug!("{} node(s) left empty: live tier disabled", nodes.len()),
        }
    }

    /// Resolves every node to its references.
    ///
    /// Never fails: nodes that no tier could resolve map to empty lists, and
    /// the returned map holds exactly one entry per distinct input id.
    pub fn resolve_batch(&self, nodes: &[DefinitionNode]) -> ResolutionMap {
        self.batches.fetch_add(1, Ordering::Relaxed);
        let mut results = empty_resolution_map(nodes);
        if nodes.is_empty() {
            return results;
        }

        let tier = self.tier();
        if tier == ResolverTier::LiveOnly {
            self.resolve_live(nodes, &mut results);
            return results;
        }

        let (eligible, others): (Vec<DefinitionNode>, Vec<DefinitionNode>) =
            nodes.iter().cloned().partition(|n| self.index_eligible(n));
        let mut for_live = others;

        if let Some(index) = &self.index {
            match index.resolve_batch(&eligible) {
                Ok(batch) => {
                    if tier == ResolverTier::IndexWithFallback && !batch.unmatched.is_empty() {
                        debug!(
                            "{} node(s) not in the index; asking live analyzers",
                            batch.unmatched.len()
                        );
                        let unmatched: std::collections::HashSet<&str> =
                            batch.unmatched.iter().map(String::as_str).collect();
                        for_live.extend(
                            eligible
                                .iter()
                                .filter(|n| unmatched.contains(n.id.as_str()))
                                .cloned(),
                        );
                    }
                    results.extend(batch.references);
                }
                Err(e) if tier.uses_live() => {
                    warn!("index query failed, using live analyzers: {}", e);
                    self.index_fallbacks.fetch_add(1, Ordering::Relaxed);
                    for_live.extend(eligible);
                }
                Err(e) => warn!("index query failed: {}", e),
            }
        }

        self.resolve_live(&for_live, &mut results);
        results
    }

    pub fn info(&self) -> ResolverInfo {
        let tier = self.tier.get().copied().unwrap_or_default();
        ResolverInfo {
            mode: self.config.mode,
            effective_tier: tier,
            detected_language: self.language,
            index_enabled: self.index.is_some() && tier != ResolverTier::LiveOnly,
            live_enabled: self.live.is_some(),
            index_stats: self.index.as_ref().and_then(|i| i.stats()),
            live_stats: self.live.as_ref().map(|l| l.stats()),
            batches: self.batches.load(Ordering::Relaxed),
            index_fallbacks: self.index_fallbacks.load(Ordering::Relaxed),
        }
    }

    /// Stops all live analyzers. Best-effort; never fails.
    pub fn shutdown(&self) {
        if let Some(live) = &self.live {
            live.shutdown();
        }
    }
}
