use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::{DirEntry, WalkDir};

use super::registry::LanguageRegistry;
use crate::live::transport::uri_to_path;
use crate::types::Language;

/// Directories never worth scanning for source files.
const SKIPPED_DIRS: &[&str] = &[
    "target",
    "node_modules",
    "vendor",
    "build",
    "dist",
    "out",
    "__pycache__",
    "venv",
];

fn is_scannable(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return false;
    }
    !(entry.file_type().is_dir() && SKIPPED_DIRS.contains(&name.as_ref()))
}

fn source_files(project_root: &Path) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(project_root)
        .into_iter()
        .filter_entry(is_scannable)
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
}

/// Counts source files per registered language under `project_root`.
pub fn count_languages(project_root: &Path, registry: &LanguageRegistry) -> HashMap<Language, usize> {
    let mut counts: HashMap<Language, usize> = HashMap::new();
    for entry in source_files(project_root) {
        let path = entry.path().to_string_lossy();
        if let Some(language) = registry.language_for_path(&path) {
            *counts.entry(language).or_insert(0) += 1;
        }
    }
    counts
}

/// Returns the language with the most source files in the project.
///
/// Ties are broken by registry order. Returns `None` when no file of a
/// registered language exists.
pub fn detect_project_language(project_root: &Path, registry: &LanguageRegistry) -> Option<Language> {
    let counts = count_languages(project_root, registry);
    let mut best: Option<(Language, usize)> = None;
    for language in registry.languages() {
        let Some(&count) = counts.get(&language) else {
            continue;
        };
        match best {
            Some((_, c)) if c >= count => {}
            _ => best = Some((language, count)),
        }
    }
    best.map(|(l, _)| l)
}

/// Modification time of the oldest source file of `language`, if any.
pub fn oldest_source_mtime(
    project_root: &Path,
    language: Language,
    registry: &LanguageRegistry,
) -> Option<SystemTime> {
    source_files(project_root)
        .filter(|e| registry.language_for_path(&e.path().to_string_lossy()) == Some(language))
        .filter_map(|e| e.metadata().ok().and_then(|m| m.modified().ok()))
        .min()
}

/// Converts an absolute or `file://` location into a path relative to the
/// project root, using forward slashes.
pub fn relative_path(project_root: &Path, location: &str) -> String {
    let path = uri_to_path(location).unwrap_or_else(|| PathBuf::from(location));
    let relative = path.strip_prefix(project_root).unwrap_or(&path);
    relative
        .to_string_lossy()
        .replace('\\', "/")
        .trim_start_matches("./")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_detects_dominant_language() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg/a.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("pkg/b.py"), "y = 2\n").unwrap();
        fs::write(dir.path().join("main.go"), "package main\n").unwrap();

        let registry = LanguageRegistry::builtin();
        assert_eq!(
            detect_project_language(dir.path(), &registry),
            Some(Language::Python)
        );
    }

    #[test]
    fn test_skips_dependency_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("node_modules/lib")).unwrap();
        for i in 0..5 {
            fs::write(dir.path().join(format!("node_modules/lib/{i}.js")), "").unwrap();
        }
        fs::write(dir.path().join("app.ts"), "").unwrap();

        let registry = LanguageRegistry::builtin();
        assert_eq!(
            detect_project_language(dir.path(), &registry),
            Some(Language::TypeScript)
        );
    }

    #[test]
    fn test_no_sources_detects_nothing() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("README.md"), "# hi").unwrap();
        assert_eq!(
            detect_project_language(dir.path(), &LanguageRegistry::builtin()),
            None
        );
    }

    #[test]
    fn test_relative_path_from_uri() {
        let root = Path::new("/work/repo");
        assert_eq!(relative_path(root, "file:///work/repo/src/a.py"), "src/a.py");
        assert_eq!(relative_path(root, "src/b.py"), "src/b.py");
    }

    #[test]
    fn test_relative_path_decodes_escapes() {
        let root = Path::new("/work/r\u{e9}po");
        assert_eq!(
            relative_path(root, "file:///work/r%C3%A9po/src/a.py"),
            "src/a.py"
        );
        assert_eq!(
            relative_path(root, "file:///work/r%C3%A9po/node_modules/%40types/node/index.d.ts"),
            "node_modules/@types/node/index.d.ts"
        );
        assert_eq!(relative_path(root, "/work/r\u{e9}po/lib/b c.py"), "lib/b c.py");
    }
}
