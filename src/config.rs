use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SymrefError};
use crate::languages::Framing;
use crate::types::ResolverMode;

/// Name of the configuration file stored inside the `.symref` directory.
pub const CONFIG_FILENAME: &str = "config.json";

/// Name of the hidden directory used to store resolver metadata.
pub const SYMREF_DIR: &str = ".symref";

/// Default file name of the SCIP index inside the project root.
pub const DEFAULT_INDEX_FILENAME: &str = "index.scip";

/// Command used to start an analyzer, overriding the built-in one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerOverride {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// `lines` or `content_length`; keeps the built-in framing when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framing: Option<Framing>,
}

/// Construction-time configuration of a resolver.
///
/// Nothing here can be changed once a resolver is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Which tiers may be used.
    pub mode: ResolverMode,
    /// Explicit index location; defaults to `<root>/index.scip`.
    pub index_path: Option<PathBuf>,
    /// Fixed number of analyzer connections per language. Disables auto-sizing.
    pub pool_size: Option<usize>,
    /// Fixed part of the per-batch timeout.
    pub base_timeout_ms: u64,
    /// Added to the batch timeout for every request in the batch.
    pub per_request_timeout_ms: u64,
    /// Upper bound for any batch timeout.
    pub max_timeout_ms: u64,
    /// Shards larger than this are split into sequential chunks.
    pub max_chunk_size: usize,
    /// Attempts per chunk before the remaining nodes resolve to nothing.
    pub max_attempts: u32,
    /// Delay before the first restart of a failed analyzer; doubles per attempt.
    pub restart_backoff_ms: u64,
    /// How long a connection may take to stop before it is killed.
    pub shutdown_grace_ms: u64,
    /// Run the language's index generator when the index is missing or stale.
    pub generate_index: bool,
    /// Time limit for index generation.
    pub generation_timeout_ms: u64,
    /// Heap budget handed to the index generator.
    pub generation_memory_mb: u64,
    /// Memory kept free for the rest of the system when sizing pools.
    pub reserved_memory_mb: u64,
    /// Global cap on connections per language.
    pub max_pool_size: usize,
    /// Per-language analyzer command overrides, keyed by language name.
    pub analyzers: HashMap<String, AnalyzerOverride>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            mode: ResolverMode::Automatic,
            index_path: None,
            pool_size: None,
            base_timeout_ms: 30_000,
            per_request_timeout_ms: 1_000,
            max_timeout_ms: 300_000,
            max_chunk_size: 50,
            max_attempts: 3,
            restart_backoff_ms: 250,
            shutdown_grace_ms: 5_000,
            generate_index: true,
            generation_timeout_ms: 1_800_000,
            generation_memory_mb: 8_192,
            reserved_memory_mb: 2_048,
            max_pool_size: 16,
            analyzers: HashMap::new(),
        }
    }
}

impl ResolverConfig {
    /// Rejects configurations no resolver can run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_size == 0 {
            return Err(config_error("max_chunk_size must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(config_error("max_attempts must be at least 1"));
        }
        if self.pool_size == Some(0) {
            return Err(config_error("pool_size must be at least 1 when set"));
        }
        if self.max_pool_size == 0 {
            return Err(config_error("max_pool_size must be at least 1"));
        }
        if self.max_timeout_ms == 0 {
            return Err(config_error("max_timeout_ms must be positive"));
        }
        if self.base_timeout_ms > self.max_timeout_ms {
            return Err(config_error(&format!(
                "base_timeout_ms ({}) exceeds max_timeout_ms ({})",
                self.base_timeout_ms, self.max_timeout_ms
            )));
        }
        for (language, cmd) in &self.analyzers {
            if cmd.program.trim().is_empty() {
                return Err(config_error(&format!(
                    "analyzer override for '{}' has an empty program",
                    language
                )));
            }
        }
        Ok(())
    }

    /// The index location for a project rooted at `project_root`.
    pub fn index_path_for(&self, project_root: &Path) -> PathBuf {
        match &self.index_path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => project_root.join(p),
            None => project_root.join(DEFAULT_INDEX_FILENAME),
        }
    }

    pub fn timeouts(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            base: Duration::from_millis(self.base_timeout_ms),
            per_request: Duration::from_millis(self.per_request_timeout_ms),
            max: Duration::from_millis(self.max_timeout_ms),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }
}

fn config_error(message: &str) -> SymrefError {
    SymrefError::Config {
        message: message.to_string(),
    }
}

/// Dynamic timeout computation for batches of live requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub base: Duration,
    pub per_request: Duration,
    pub max: Duration,
}

impl TimeoutPolicy {
    /// `base + per_request * size`, capped at `max`.
    pub fn for_batch(&self, size: usize) -> Duration {
        let size = u32::try_from(size).unwrap_or(u32::MAX);
        self.base
            .saturating_add(self.per_request.saturating_mul(size))
            .min(self.max)
    }

    /// The batch timeout doubled once per failed attempt, still capped at `max`.
    pub fn for_attempt(&self, size: usize, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.for_batch(size).saturating_mul(factor).min(self.max)
    }
}

/// Returns the path to the `.symref` directory within the given project root.
pub fn get_symref_dir(project_root: &Path) -> PathBuf {
    project_root.join(SYMREF_DIR)
}

/// Returns the path to the configuration file within the `.symref` directory.
pub fn get_config_path(project_root: &Path) -> PathBuf {
    get_symref_dir(project_root).join(CONFIG_FILENAME)
}

/// Loads `.symref/config.json`, falling back to defaults when it is absent.
///
/// Fields missing from the file take their default values. The result is
/// not validated; resolvers validate at construction.
pub fn load_config(project_root: &Path) -> Result<ResolverConfig> {
    let path = get_config_path(project_root);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ResolverConfig::default()),
        Err(e) => return Err(config_error(&format!("cannot read {}: {}", path.display(), e))),
    };
    serde_json::from_str(&contents)
        .map_err(|e| config_error(&format!("invalid config {}: {}", path.display(), e)))
}

/// Writes the configuration next to the project's other resolver state.
///
/// The file is replaced through a temporary sibling and a rename.
pub fn save_config(project_root: &Path, config: &ResolverConfig) -> Result<()> {
    let dir = get_symref_dir(project_root);
    fs::create_dir_all(&dir)
        .map_err(|e| config_error(&format!("cannot create {}: {}", dir.display(), e)))?;

    let path = get_config_path(project_root);
    let staged = path.with_extension("tmp");
    let json = serde_json::to_string_pretty(config)?;
    fs::write(&staged, json)
        .and_then(|_| fs::rename(&staged, &path))
        .map_err(|e| config_error(&format!("cannot write {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_timeout_formula() {
        let policy = TimeoutPolicy {
            base: Duration::from_secs(30),
            per_request: Duration::from_secs(1),
            max: Duration::from_secs(300),
        };
        assert_eq!(policy.for_batch(0), Duration::from_secs(30));
        assert_eq!(policy.for_batch(20), Duration::from_secs(50));
        assert_eq!(policy.for_batch(10_000), Duration::from_secs(300));
    }

    #[test]
    fn test_attempt_timeout_doubles_and_caps() {
        let policy = TimeoutPolicy {
            base: Duration::from_secs(10),
            per_request: Duration::from_secs(1),
            max: Duration::from_secs(100),
        };
        assert_eq!(policy.for_attempt(10, 0), Duration::from_secs(20));
        assert_eq!(policy.for_attempt(10, 1), Duration::from_secs(40));
        assert_eq!(policy.for_attempt(10, 2), Duration::from_secs(80));
        assert_eq!(policy.for_attempt(10, 3), Duration::from_secs(100));
    }
}
