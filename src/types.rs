use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

/// Languages the resolver knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    TypeScript,
    JavaScript,
    Java,
    Go,
    Rust,
    CSharp,
    Ruby,
    Php,
    C,
    Cpp,
}

#[allow(clippy::should_implement_trait)]
impl Language {
    /// All languages in registry order. Detection ties are broken by this order.
    pub const ALL: [Language; 11] = [
        Language::Python,
        Language::TypeScript,
        Language::JavaScript,
        Language::Java,
        Language::Go,
        Language::Rust,
        Language::CSharp,
        Language::Ruby,
        Language::Php,
        Language::C,
        Language::Cpp,
    ];

    /// Returns the string representation of this language.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Java => "java",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::CSharp => "csharp",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::C => "c",
            Language::Cpp => "cpp",
        }
    }

    /// Parses a language name, returning `None` for unrecognized values.
    pub fn from_str(s: &str) -> Option<Language> {
        match s.to_ascii_lowercase().as_str() {
            "python" | "py" => Some(Language::Python),
            "typescript" | "ts" => Some(Language::TypeScript),
            "javascript" | "js" => Some(Language::JavaScript),
            "java" => Some(Language::Java),
            "go" | "golang" => Some(Language::Go),
            "rust" | "rs" => Some(Language::Rust),
            "csharp" | "c#" | "cs" => Some(Language::CSharp),
            "ruby" | "rb" => Some(Language::Ruby),
            "php" => Some(Language::Php),
            "c" => Some(Language::C),
            "cpp" | "c++" => Some(Language::Cpp),
            _ => None,
        }
    }

    /// Maps a file extension (without the dot) to a language.
    pub fn from_extension(ext: &str) -> Option<Language> {
        match ext.to_ascii_lowercase().as_str() {
            "py" | "pyi" => Some(Language::Python),
            "ts" | "tsx" | "mts" | "cts" => Some(Language::TypeScript),
            "js" | "jsx" | "mjs" | "cjs" => Some(Language::JavaScript),
            "java" => Some(Language::Java),
            "go" => Some(Language::Go),
            "rs" => Some(Language::Rust),
            "cs" => Some(Language::CSharp),
            "rb" => Some(Language::Ruby),
            "php" => Some(Language::Php),
            "c" | "h" => Some(Language::C),
            "cc" | "cpp" | "cxx" | "hpp" | "hh" | "hxx" => Some(Language::Cpp),
            _ => None,
        }
    }

    /// Detects the language of a file from its extension.
    pub fn from_path(path: &str) -> Option<Language> {
        Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Language::from_extension)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a resolver chooses between the index tier and the live tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverMode {
    IndexOnly,
    LiveOnly,
    IndexWithLiveFallback,
    #[default]
    Automatic,
}

#[allow(clippy::should_implement_trait)]
impl ResolverMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolverMode::IndexOnly => "index_only",
            ResolverMode::LiveOnly => "live_only",
            ResolverMode::IndexWithLiveFallback => "index_with_live_fallback",
            ResolverMode::Automatic => "automatic",
        }
    }

    pub fn from_str(s: &str) -> Option<ResolverMode> {
        match s {
            "index_only" | "index" | "scip" => Some(ResolverMode::IndexOnly),
            "live_only" | "live" | "lsp" => Some(ResolverMode::LiveOnly),
            "index_with_live_fallback" | "fallback" => Some(ResolverMode::IndexWithLiveFallback),
            "automatic" | "auto" => Some(ResolverMode::Automatic),
            _ => None,
        }
    }

    /// Whether this mode may ever consult the index tier.
    pub fn allows_index(&self) -> bool {
        !matches!(self, ResolverMode::LiveOnly)
    }

    /// Whether this mode may ever consult the live tier.
    pub fn allows_live(&self) -> bool {
        !matches!(self, ResolverMode::IndexOnly)
    }
}

/// A symbol definition supplied by the upstream graph builder.
///
/// Positions are zero-based. `id` is the stable identity used as the key of
/// every result map; nodes read without one get an id from
/// [`assign_missing_ids`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DefinitionNode {
    #[serde(default)]
    pub id: String,
    pub file_path: String,
    pub line: u32,
    pub column: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl DefinitionNode {
    /// Creates a node whose language is derived from the file extension.
    pub fn new(id: impl Into<String>, file_path: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            id: id.into(),
            file_path: file_path.into(),
            line,
            column,
            language: None,
            name: None,
        }
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The explicit language if set, otherwise the one implied by the extension.
    pub fn detected_language(&self) -> Option<Language> {
        self.language.or_else(|| Language::from_path(&self.file_path))
    }
}

/// A zero-based span inside a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl Span {
    pub fn new(start_line: u32, start_column: u32, end_line: u32, end_column: u32) -> Self {
        Self {
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

    pub fn starts_at(&self, line: u32, column: u32) -> bool {
        self.start_line == line && self.start_column == column
    }
}

/// One usage site of a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    pub file_path: String,
    #[serde(flatten)]
    pub span: Span,
}

impl Reference {
    pub fn new(file_path: impl Into<String>, span: Span) -> Self {
        Self {
            file_path: file_path.into(),
            span,
        }
    }
}

/// Result of a batch resolution: node id to its references.
///
/// Every input node id appears exactly once, with an empty list when
/// resolution failed for it.
pub type ResolutionMap = HashMap<String, Vec<Reference>>;

/// Builds a result map pre-populated with an empty entry for every node.
pub fn empty_resolution_map(nodes: &[DefinitionNode]) -> ResolutionMap {
    nodes.iter().map(|n| (n.id.clone(), Vec::new())).collect()
}

/// Removes repeated node ids, keeping the first occurrence of each.
pub fn dedup_nodes(nodes: &[DefinitionNode]) -> Vec<DefinitionNode> {
    let mut seen = std::collections::HashSet::new();
    nodes
        .iter()
        .filter(|n| seen.insert(n.id.as_str()))
        .cloned()
        .collect()
}

/// Generates a deterministic node ID from file path, position and name.
///
/// The ID format is `"def:32hexchars"` where the hex portion is the first 32
/// characters of the SHA-256 hash of the input components.
pub fn generate_node_id(file_path: &str, line: u32, column: u32, name: &str) -> String {
    let input = format!("{}:{}:{}:{}", file_path, line, column, name);
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let hash = hasher.finalize();
    let hex_str = hex::encode(hash);
    format!("def:{}", &hex_str[..32])
}

/// Gives every node with an empty id one derived from its position and name.
///
/// Nodes at the same site with the same name get the same id and are later
/// resolved once.
pub fn assign_missing_ids(nodes: &mut [DefinitionNode]) {
    for node in nodes.iter_mut().filter(|n| n.id.is_empty()) {
        node.id = generate_node_id(
            &node.file_path,
            node.line,
            node.column,
            node.name.as_deref().unwrap_or_default(),
        );
    }
}
