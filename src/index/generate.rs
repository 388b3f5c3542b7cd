use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use tracing::{info, warn};

use crate::errors::{Result, SymrefError};
use crate::languages::{oldest_source_mtime, LanguageRegistry};
use crate::types::Language;

/// Options for one index generation run.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub timeout: Duration,
    pub memory_mb: u64,
}

/// Whether the index at `index_path` must be rebuilt.
///
/// Stale when the file is missing or unreadable, or when every source file
/// of `language` has been modified since it was written. An index that
/// predates only some of the sources is kept.
pub fn index_is_stale(
    project_root: &Path,
    index_path: &Path,
    language: Language,
    registry: &LanguageRegistry,
) -> bool {
    let index_mtime = match std::fs::metadata(index_path).and_then(|m| m.modified()) {
        Ok(t) => t,
        Err(_) => return true,
    };
    oldest_source_mtime(project_root, language, registry)
        .is_some_and(|oldest| oldest > index_mtime)
}

/// Runs the language's index generator if the index is missing or stale.
///
/// Returns `Ok(true)` when a fresh index was written, `Ok(false)` when the
/// existing one is current. Any failure to run the generator is an error;
/// callers treat it as "index unavailable".
pub fn generate_if_stale(
    project_root: &Path,
    index_path: &Path,
    project_name: &str,
    language: Language,
    registry: &LanguageRegistry,
    options: &GenerateOptions,
) -> Result<bool> {
    if !index_is_stale(project_root, index_path, language, registry) {
        return Ok(false);
    }

    let support = registry
        .index_support(language)
        .ok_or_else(|| SymrefError::UnsupportedLanguage {
            language: language.to_string(),
        })?;

    let output = index_path.to_string_lossy().to_string();
    let args = support.generate.render_args(&output, project_name);
    info!(
        "generating {} index for '{}': {} {}",
        language,
        project_name,
        support.generate.program,
        args.join(" ")
    );

    let mut cmd = tokio::process::Command::new(&support.generate.program);
    cmd.args(&args)
        .current_dir(project_root)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some((var, template)) = &support.generate.heap_env {
        cmd.env(var, template.replace("{mb}", &options.memory_mb.to_string()));
    }

    let generation_error = |message: String| SymrefError::IndexGeneration {
        language: language.to_string(),
        message,
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let started = SystemTime::now();

    let output = runtime.block_on(async {
        let child = cmd
            .spawn()
            .map_err(|e| generation_error(format!("failed to start '{}': {}", support.generate.program, e)))?;
        match tokio::time::timeout(options.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| generation_error(e.to_string())),
            Err(_) => Err(generation_error(format!(
                "timed out after {}s",
                options.timeout.as_secs()
            ))),
        }
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
        warn!("{} index generation failed ({}): {}", language, output.status, tail);
        return Err(generation_error(format!("exited with {}: {}", output.status, tail)));
    }

    if !index_path.exists() {
        return Err(generation_error(format!(
            "generator succeeded but wrote no index at {}",
            index_path.display()
        )));
    }

    let elapsed = started.elapsed().unwrap_or_default();
    info!(
        "{} index generated in {:.1}s at {}",
        language,
        elapsed.as_secs_f64(),
        index_path.display()
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_index_is_stale() {
        let dir = TempDir::new().unwrap();
        let registry = LanguageRegistry::builtin();
        assert!(index_is_stale(
            dir.path(),
            &dir.path().join("index.scip"),
            Language::Python,
            &registry
        ));
    }

    #[test]
    fn test_fresh_index_is_not_stale() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        fs::write(dir.path().join("index.scip"), b"").unwrap();
        let registry = LanguageRegistry::builtin();
        assert!(!index_is_stale(
            dir.path(),
            &dir.path().join("index.scip"),
            Language::Python,
            &registry
        ));
    }

    fn touch(path: &Path, at: SystemTime) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(at).unwrap();
    }

    #[test]
    fn test_partially_outdated_index_is_kept() {
        let dir = TempDir::new().unwrap();
        let base = SystemTime::now() - Duration::from_secs(3_600);
        for name in ["a.py", "b.py", "index.scip"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        touch(&dir.path().join("a.py"), base);
        touch(&dir.path().join("index.scip"), base + Duration::from_secs(60));
        touch(&dir.path().join("b.py"), base + Duration::from_secs(120));

        let registry = LanguageRegistry::builtin();
        let index = dir.path().join("index.scip");
        assert!(!index_is_stale(dir.path(), &index, Language::Python, &registry));

        touch(&dir.path().join("a.py"), base + Duration::from_secs(90));
        assert!(index_is_stale(dir.path(), &index, Language::Python, &registry));
    }

    #[test]
    fn test_missing_generator_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut registry = LanguageRegistry::builtin();
        let mut caps = registry.get(Language::Python).unwrap().clone();
        if let Some(support) = caps.index.as_mut() {
            support.generate.program = "symref-no-such-indexer".to_string();
        }
        registry.register(caps);

        let result = generate_if_stale(
            dir.path(),
            &dir.path().join("index.scip"),
            "demo",
            Language::Python,
            &registry,
            &GenerateOptions {
                timeout: Duration::from_secs(5),
                memory_mb: 512,
            },
        );
        let err = result.unwrap_err();
        assert!(err.is_index_unavailable());
    }
}
