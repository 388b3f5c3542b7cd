mod common;

use std::sync::Arc;

use common::*;
use symref::config::ResolverConfig;
use symref::languages::{LanguageRegistry, ResourceProfile};
use symref::live::{compute_pool_size, HostResources, LiveQueryPool, PoolSizer};
use symref::types::Language;

fn pool_with(config: &ResolverConfig, host: HostResources) -> LiveQueryPool {
    let dir = project(&[]);
    LiveQueryPool::with_launcher(
        dir.path(),
        config,
        Arc::new(LanguageRegistry::builtin()),
        Arc::new(ScriptedLauncher::new(Script::default())),
        host,
    )
}

#[test]
fn test_reference_host_and_profile() {
    let host = HostResources {
        cpu_cores: 8,
        available_memory_mb: 16 * 1024,
    };
    let profile = ResourceProfile {
        memory_per_instance_mb: 300,
        cpu_efficiency: 0.8,
        hard_cap: 8,
    };
    assert_eq!(compute_pool_size(&host, &profile, 2048, 16), 6);
}

#[test]
fn test_sizes_follow_language_profiles() {
    let auto = ResolverConfig {
        pool_size: None,
        ..test_config()
    };
    let pool = pool_with(&auto, test_host());
    assert_eq!(pool.pool_size_for(Language::Python), 6);
    assert_eq!(pool.pool_size_for(Language::Go), 6);
    // Heavier analyzers get fewer instances on the same host.
    assert!(pool.pool_size_for(Language::Rust) < pool.pool_size_for(Language::Python));
    assert!(pool.pool_size_for(Language::Java) <= 4);
}

#[test]
fn test_fixed_pool_size_wins() {
    let fixed = ResolverConfig {
        pool_size: Some(2),
        ..test_config()
    };
    let huge = HostResources {
        cpu_cores: 64,
        available_memory_mb: 256 * 1024,
    };
    let pool = pool_with(&fixed, huge);
    for language in [Language::Python, Language::Rust, Language::Java] {
        assert_eq!(pool.pool_size_for(language), 2);
    }
}

#[test]
fn test_global_cap_applies() {
    let huge = HostResources {
        cpu_cores: 256,
        available_memory_mb: 1024 * 1024,
    };
    let profile = ResourceProfile {
        memory_per_instance_mb: 64,
        cpu_efficiency: 1.0,
        hard_cap: 100,
    };
    let sizer = PoolSizer::new(huge, None, 2048, 16);
    assert_eq!(sizer.size_for(&profile), 16);
}

#[test]
fn test_detected_host_is_usable() {
    let host = HostResources::detect();
    assert!(host.cpu_cores >= 1);
    let sizer = PoolSizer::new(host, None, 2048, 16);
    let size = sizer.size_for(&ResourceProfile {
        memory_per_instance_mb: 300,
        cpu_efficiency: 0.8,
        hard_cap: 8,
    });
    assert!((1..=8).contains(&size));
}
