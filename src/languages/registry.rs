use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::ResolverConfig;
use crate::types::Language;

/// SCIP symbol role bits.
pub mod roles {
    pub const DEFINITION: i32 = 0x1;
    pub const IMPORT: i32 = 0x2;
    pub const WRITE_ACCESS: i32 = 0x4;
    pub const READ_ACCESS: i32 = 0x8;
    pub const GENERATED: i32 = 0x10;
    pub const TEST: i32 = 0x20;
    pub const FORWARD_DEFINITION: i32 = 0x40;

    /// Bits that explicitly mark an occurrence as a usage.
    pub const ACCESS: i32 = IMPORT | WRITE_ACCESS | READ_ACCESS;
}

/// How an indexer marks reference occurrences.
///
/// Indexers disagree: some set an access bit on every usage, others leave
/// the role bits at zero for plain references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolePolicy {
    /// Only occurrences with a read, write or import bit are references.
    AccessFlags,
    /// Occurrences with no role bits at all are references too.
    ZeroFlags,
}

impl RolePolicy {
    pub fn is_reference(&self, symbol_roles: i32) -> bool {
        if symbol_roles & roles::DEFINITION != 0 {
            return false;
        }
        let has_access = symbol_roles & roles::ACCESS != 0;
        match self {
            RolePolicy::AccessFlags => has_access,
            RolePolicy::ZeroFlags => has_access || symbol_roles == 0,
        }
    }
}

/// Wire framing used when writing to an analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// One JSON message per line.
    Lines,
    /// LSP base protocol: `Content-Length` header followed by the body.
    ContentLength,
}

/// How to start a live analyzer for a language.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub framing: Framing,
}

/// How to build a SCIP index for a language.
///
/// `{output}` and `{project}` in `args` are replaced with the index path and
/// project name.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Environment variable carrying the heap budget, with `{mb}` placeholder.
    pub heap_env: Option<(String, String)>,
}

impl GenerateCommand {
    pub fn render_args(&self, output: &str, project: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace("{output}", output).replace("{project}", project))
            .collect()
    }
}

/// Index-tier support for a language.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSupport {
    pub generate: GenerateCommand,
    pub role_policy: RolePolicy,
}

/// Resource cost of one analyzer instance, used to size pools.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceProfile {
    pub memory_per_instance_mb: u64,
    pub cpu_efficiency: f64,
    pub hard_cap: usize,
}

/// Everything the resolver needs to know about one language.
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageCapabilities {
    pub language: Language,
    pub extensions: &'static [&'static str],
    pub index: Option<IndexSupport>,
    pub analyzer: AnalyzerCommand,
    pub profile: ResourceProfile,
}

impl LanguageCapabilities {
    pub fn index_supported(&self) -> bool {
        self.index.is_some()
    }
}

/// Lookup table from language to its capabilities.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    entries: HashMap<Language, LanguageCapabilities>,
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LanguageRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// The registry populated with every built-in language.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for caps in builtin_capabilities() {
            registry.register(caps);
        }
        registry
    }

    /// The built-in registry with the analyzer overrides from `config` applied.
    pub fn from_config(config: &ResolverConfig) -> Self {
        let mut registry = Self::builtin();
        for (name, cmd) in &config.analyzers {
            let Some(language) = Language::from_str(name) else {
                tracing::warn!("ignoring analyzer override for unknown language '{}'", name);
                continue;
            };
            if let Some(caps) = registry.entries.get_mut(&language) {
                caps.analyzer.program = cmd.program.clone();
                caps.analyzer.args = cmd.args.clone();
                if let Some(framing) = cmd.framing {
                    caps.analyzer.framing = framing;
                }
            }
        }
        registry
    }

    /// Adds or replaces the capabilities of a language.
    pub fn register(&mut self, caps: LanguageCapabilities) {
        self.entries.insert(caps.language, caps);
    }

    pub fn get(&self, language: Language) -> Option<&LanguageCapabilities> {
        self.entries.get(&language)
    }

    pub fn index_support(&self, language: Language) -> Option<&IndexSupport> {
        self.get(language).and_then(|c| c.index.as_ref())
    }

    pub fn supports_index(&self, language: Language) -> bool {
        self.index_support(language).is_some()
    }

    /// Role policy for a language; defaults to `AccessFlags`.
    pub fn role_policy(&self, language: Language) -> RolePolicy {
        self.index_support(language)
            .map(|s| s.role_policy)
            .unwrap_or(RolePolicy::AccessFlags)
    }

    /// Registered languages in registry order.
    pub fn languages(&self) -> Vec<Language> {
        Language::ALL
            .iter()
            .copied()
            .filter(|l| self.entries.contains_key(l))
            .collect()
    }

    /// The registered language a file belongs to, by extension.
    pub fn language_for_path(&self, path: &str) -> Option<Language> {
        let ext = std::path::Path::new(path)
            .extension()
            .and_then(|e| e.to_str())?
            .to_ascii_lowercase();
        self.languages().into_iter().find(|l| {
            self.entries
                .get(l)
                .is_some_and(|c| c.extensions.contains(&ext.as_str()))
        })
    }
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn node_heap() -> Option<(String, String)> {
    Some((
        "NODE_OPTIONS".to_string(),
        "--max-old-space-size={mb}".to_string(),
    ))
}

fn jvm_heap() -> Option<(String, String)> {
    Some(("JAVA_TOOL_OPTIONS".to_string(), "-Xmx{mb}m".to_string()))
}

fn lsp(program: &str, a: &[&str]) -> AnalyzerCommand {
    AnalyzerCommand {
        program: program.to_string(),
        args: args(a),
        framing: Framing::ContentLength,
    }
}

fn profile(memory_per_instance_mb: u64, cpu_efficiency: f64, hard_cap: usize) -> ResourceProfile {
    ResourceProfile {
        memory_per_instance_mb,
        cpu_efficiency,
        hard_cap,
    }
}

fn builtin_capabilities() -> Vec<LanguageCapabilities> {
    vec![
        LanguageCapabilities {
            language: Language::Python,
            extensions: &["py", "pyi"],
            index: Some(IndexSupport {
                generate: GenerateCommand {
                    program: "scip-python".to_string(),
                    args: args(&["index", ".", "--project-name", "{project}", "--output", "{output}"]),
                    heap_env: node_heap(),
                },
                role_policy: RolePolicy::ZeroFlags,
            }),
            analyzer: lsp("pyright-langserver", &["--stdio"]),
            profile: profile(400, 0.8, 8),
        },
        LanguageCapabilities {
            language: Language::TypeScript,
            extensions: &["ts", "tsx", "mts", "cts"],
            index: Some(IndexSupport {
                generate: GenerateCommand {
                    program: "scip-typescript".to_string(),
                    args: args(&["index", "--output", "{output}"]),
                    heap_env: node_heap(),
                },
                role_policy: RolePolicy::AccessFlags,
            }),
            analyzer: lsp("typescript-language-server", &["--stdio"]),
            profile: profile(500, 0.75, 6),
        },
        LanguageCapabilities {
            language: Language::JavaScript,
            extensions: &["js", "jsx", "mjs", "cjs"],
            index: Some(IndexSupport {
                generate: GenerateCommand {
                    program: "scip-typescript".to_string(),
                    args: args(&["index", "--infer-tsconfig", "--output", "{output}"]),
                    heap_env: node_heap(),
                },
                role_policy: RolePolicy::AccessFlags,
            }),
            analyzer: lsp("typescript-language-server", &["--stdio"]),
            profile: profile(500, 0.75, 6),
        },
        LanguageCapabilities {
            language: Language::Java,
            extensions: &["java"],
            index: Some(IndexSupport {
                generate: GenerateCommand {
                    program: "scip-java".to_string(),
                    args: args(&["index", "--output", "{output}"]),
                    heap_env: jvm_heap(),
                },
                role_policy: RolePolicy::AccessFlags,
            }),
            analyzer: lsp("jdtls", &[]),
            profile: profile(1024, 0.5, 4),
        },
        LanguageCapabilities {
            language: Language::Go,
            extensions: &["go"],
            index: Some(IndexSupport {
                generate: GenerateCommand {
                    program: "scip-go".to_string(),
                    args: args(&["--output", "{output}"]),
                    heap_env: None,
                },
                role_policy: RolePolicy::AccessFlags,
            }),
            analyzer: lsp("gopls", &["serve"]),
            profile: profile(300, 0.8, 8),
        },
        LanguageCapabilities {
            language: Language::Rust,
            extensions: &["rs"],
            index: Some(IndexSupport {
                generate: GenerateCommand {
                    program: "rust-analyzer".to_string(),
                    args: args(&["scip", ".", "--output", "{output}"]),
                    heap_env: None,
                },
                role_policy: RolePolicy::AccessFlags,
            }),
            analyzer: lsp("rust-analyzer", &[]),
            profile: profile(1536, 0.5, 3),
        },
        LanguageCapabilities {
            language: Language::CSharp,
            extensions: &["cs"],
            index: None,
            analyzer: lsp("csharp-ls", &[]),
            profile: profile(800, 0.5, 4),
        },
        LanguageCapabilities {
            language: Language::Ruby,
            extensions: &["rb"],
            index: None,
            analyzer: lsp("solargraph", &["stdio"]),
            profile: profile(300, 0.8, 8),
        },
        LanguageCapabilities {
            language: Language::Php,
            extensions: &["php"],
            index: None,
            analyzer: lsp("intelephense", &["--stdio"]),
            profile: profile(300, 0.8, 8),
        },
        LanguageCapabilities {
            language: Language::C,
            extensions: &["c", "h"],
            index: None,
            analyzer: lsp("clangd", &[]),
            profile: profile(600, 0.7, 6),
        },
        LanguageCapabilities {
            language: Language::Cpp,
            extensions: &["cc", "cpp", "cxx", "hpp", "hh", "hxx"],
            index: None,
            analyzer: lsp("clangd", &[]),
            profile: profile(600, 0.7, 6),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_policies_differ_on_zero_flags() {
        assert!(RolePolicy::ZeroFlags.is_reference(0));
        assert!(!RolePolicy::AccessFlags.is_reference(0));
        assert!(RolePolicy::AccessFlags.is_reference(roles::READ_ACCESS));
        assert!(RolePolicy::ZeroFlags.is_reference(roles::IMPORT));
    }

    #[test]
    fn test_definitions_are_never_references() {
        let def_with_write = roles::DEFINITION | roles::WRITE_ACCESS;
        assert!(!RolePolicy::AccessFlags.is_reference(def_with_write));
        assert!(!RolePolicy::ZeroFlags.is_reference(roles::DEFINITION));
    }

    #[test]
    fn test_builtin_registry_index_support() {
        let registry = LanguageRegistry::builtin();
        assert!(registry.supports_index(Language::Python));
        assert!(registry.supports_index(Language::TypeScript));
        assert!(!registry.supports_index(Language::Ruby));
        assert_eq!(registry.role_policy(Language::Python), RolePolicy::ZeroFlags);
        assert_eq!(registry.role_policy(Language::Go), RolePolicy::AccessFlags);
    }

    #[test]
    fn test_language_for_path() {
        let registry = LanguageRegistry::builtin();
        assert_eq!(registry.language_for_path("a/b.py"), Some(Language::Python));
        assert_eq!(registry.language_for_path("a/b.HPP"), Some(Language::Cpp));
        assert_eq!(registry.language_for_path("README.md"), None);
    }

    #[test]
    fn test_generate_args_are_rendered() {
        let registry = LanguageRegistry::builtin();
        let support = registry.index_support(Language::Python).unwrap();
        let rendered = support.generate.render_args("/tmp/index.scip", "demo");
        assert!(rendered.contains(&"demo".to_string()));
        assert!(rendered.contains(&"/tmp/index.scip".to_string()));
    }
}
