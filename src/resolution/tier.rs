use serde::Serialize;

use crate::types::ResolverMode;

/// Which tiers a resolver consults, decided once per resolver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverTier {
    /// Not decided yet; becomes one of the others on the first batch.
    #[default]
    Unconfigured,
    /// Only the index is consulted. Nodes it cannot resolve stay empty.
    IndexOnly,
    /// Only live analyzers are consulted.
    LiveOnly,
    /// Index first; whatever it cannot resolve goes to live analyzers.
    IndexWithFallback,
}

impl ResolverTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolverTier::Unconfigured => "unconfigured",
            ResolverTier::IndexOnly => "index_only",
            ResolverTier::LiveOnly => "live_only",
            ResolverTier::IndexWithFallback => "index_with_fallback",
        }
    }

    pub fn uses_index(&self) -> bool {
        matches!(self, ResolverTier::IndexOnly | ResolverTier::IndexWithFallback)
    }

    pub fn uses_live(&self) -> bool {
        matches!(self, ResolverTier::LiveOnly | ResolverTier::IndexWithFallback)
    }
}

impl std::fmt::Display for ResolverTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The tier for a configured mode, given whether the project language has an
/// index tier at all and whether its index loaded.
///
/// An explicit `IndexOnly` mode stays index-only even when the index failed
/// to load; every other mode falls back to live analyzers.
pub fn decide_tier(mode: ResolverMode, index_supported: bool, index_loaded: bool) -> ResolverTier {
    let index_ready = index_supported && index_loaded;
    match mode {
        ResolverMode::IndexOnly => ResolverTier::IndexOnly,
        ResolverMode::LiveOnly => ResolverTier::LiveOnly,
        ResolverMode::IndexWithLiveFallback if index_ready => ResolverTier::IndexWithFallback,
        ResolverMode::Automatic if index_ready => ResolverTier::IndexOnly,
        ResolverMode::IndexWithLiveFallback | ResolverMode::Automatic => ResolverTier::LiveOnly,
    }
}
