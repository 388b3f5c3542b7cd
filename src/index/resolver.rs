use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use prost::Message;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::proto;
use crate::errors::{Result, SymrefError};
use crate::languages::{relative_path, roles, RolePolicy};
use crate::progress::ProgressTracker;
use crate::types::{DefinitionNode, Reference, ResolutionMap, Span};

/// Interned SCIP symbol inside one loaded index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(u32);

/// Position of an occurrence in the document arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OccurrenceRef {
    pub document: u32,
    pub occurrence: u32,
}

#[derive(Debug)]
struct IndexedOccurrence {
    symbol: SymbolId,
    roles: i32,
    span: Span,
}

#[derive(Debug)]
struct IndexedDocument {
    relative_path: String,
    occurrences: Vec<IndexedOccurrence>,
}

/// Counters describing a loaded index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub documents: usize,
    pub occurrences: usize,
    pub symbols: usize,
    pub skipped_occurrences: usize,
    pub load_ms: u64,
    pub tool: Option<String>,
}

/// In-memory lookup tables built from one SCIP index.
///
/// Read-only after construction, so it can be shared across threads freely.
#[derive(Debug)]
pub struct IndexTables {
    documents: Vec<IndexedDocument>,
    symbols: Vec<String>,
    symbol_ids: HashMap<String, SymbolId>,
    symbol_occurrences: Vec<Vec<OccurrenceRef>>,
    /// Indexers may emit several documents for one path (one per shard or
    /// per target); all of them are kept.
    path_to_document: HashMap<String, Vec<u32>>,
    stats: IndexStats,
}

/// Converts a SCIP range into a span. Returns `None` for malformed ranges.
pub fn parse_range(range: &[i32]) -> Option<Span> {
    if range.iter().any(|v| *v < 0) {
        return None;
    }
    let r: Vec<u32> = range.iter().map(|v| *v as u32).collect();
    match r.as_slice() {
        [line, start, end] => Some(Span::new(*line, *start, *line, *end)),
        [start_line, start, end_line, end] => Some(Span::new(*start_line, *start, *end_line, *end)),
        _ => None,
    }
}

impl IndexTables {
    /// Builds the arena and lookup maps from a decoded index.
    pub fn from_index(index: proto::Index) -> Self {
        let mut tables = IndexTables {
            documents: Vec::with_capacity(index.documents.len()),
            symbols: Vec::new(),
            symbol_ids: HashMap::new(),
            symbol_occurrences: Vec::new(),
            path_to_document: HashMap::new(),
            stats: IndexStats {
                tool: index
                    .metadata
                    .as_ref()
                    .and_then(|m| m.tool_info.as_ref())
                    .map(|t| format!("{} {}", t.name, t.version).trim().to_string()),
                ..IndexStats::default()
            },
        };

        for document in index.documents {
            let doc_idx = tables.documents.len() as u32;
            let path = document.relative_path.replace('\\', "/");
            let mut occurrences = Vec::with_capacity(document.occurrences.len());

            for occ in document.occurrences {
                if occ.symbol.is_empty() {
                    tables.stats.skipped_occurrences += 1;
                    continue;
                }
                let Some(span) = parse_range(&occ.range) else {
                    debug!(
                        "skipping occurrence of {} in {} with malformed range {:?}",
                        occ.symbol, path, occ.range
                    );
                    tables.stats.skipped_occurrences += 1;
                    continue;
                };
                let symbol = tables.intern(doc_idx, &occ.symbol);
                let occ_idx = occurrences.len() as u32;
                tables.symbol_occurrences[symbol.0 as usize].push(OccurrenceRef {
                    document: doc_idx,
                    occurrence: occ_idx,
                });
                occurrences.push(IndexedOccurrence {
                    symbol,
                    roles: occ.symbol_roles,
                    span,
                });
            }

            tables.stats.occurrences += occurrences.len();
            let same_path = tables.path_to_document.entry(path.clone()).or_default();
            if !same_path.is_empty() {
                debug!("{} appears in {} documents; merging", path, same_path.len() + 1);
            }
            same_path.push(doc_idx);
            tables.documents.push(IndexedDocument {
                relative_path: path,
                occurrences,
            });
        }

        tables.stats.documents = tables.documents.len();
        tables.stats.symbols = tables.symbols.len();
        tables
    }

    /// Document-local symbols (`local N`) are only unique within a document,
    /// so they are interned under a key that includes the document index.
    fn intern(&mut self, doc_idx: u32, symbol: &str) -> SymbolId {
        let key = if symbol.starts_with("local ") {
            format!("{}\u{0}{}", doc_idx, symbol)
        } else {
            symbol.to_string()
        };
        if let Some(id) = self.symbol_ids.get(&key) {
            return *id;
        }
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(symbol.to_string());
        self.symbol_occurrences.push(Vec::new());
        self.symbol_ids.insert(key, id);
        id
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    pub fn symbol_name(&self, symbol: SymbolId) -> Option<&str> {
        self.symbols.get(symbol.0 as usize).map(|s| s.as_str())
    }

    /// Looks up a non-local symbol by its SCIP name.
    pub fn symbol_by_name(&self, name: &str) -> Option<SymbolId> {
        self.symbol_ids.get(name).copied()
    }

    pub fn has_document(&self, relative_path: &str) -> bool {
        self.path_to_document.contains_key(relative_path)
    }

    /// Every occurrence of a symbol, as arena positions.
    pub fn occurrences_of(&self, symbol: SymbolId) -> &[OccurrenceRef] {
        self.symbol_occurrences
            .get(symbol.0 as usize)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// The document owning an occurrence.
    pub fn document_path(&self, occ: OccurrenceRef) -> Option<&str> {
        self.documents
            .get(occ.document as usize)
            .map(|d| d.relative_path.as_str())
    }

    fn occurrence(&self, occ: OccurrenceRef) -> Option<&IndexedOccurrence> {
        self.documents
            .get(occ.document as usize)
            .and_then(|d| d.occurrences.get(occ.occurrence as usize))
    }

    fn documents_at<'a>(&'a self, relative_path: &str) -> impl Iterator<Item = &'a IndexedDocument> + 'a {
        self.path_to_document
            .get(relative_path)
            .into_iter()
            .flatten()
            .filter_map(|idx| self.documents.get(*idx as usize))
    }

    /// Finds the symbol defined at exactly `(line, column)` in a document.
    pub fn find_definition(&self, relative_path: &str, line: u32, column: u32) -> Option<SymbolId> {
        self.documents_at(relative_path)
            .flat_map(|d| d.occurrences.iter())
            .find(|o| o.roles & roles::DEFINITION != 0 && o.span.starts_at(line, column))
            .map(|o| o.symbol)
    }

    /// Position → symbol table of every definition in a document, built in
    /// one pass over its occurrences.
    pub fn definition_positions(&self, relative_path: &str) -> HashMap<(u32, u32), SymbolId> {
        let mut positions = HashMap::new();
        for occ in self.documents_at(relative_path).flat_map(|d| d.occurrences.iter()) {
            if occ.roles & roles::DEFINITION != 0 {
                positions
                    .entry((occ.span.start_line, occ.span.start_column))
                    .or_insert(occ.symbol);
            }
        }
        positions
    }

    /// The reference occurrences of a symbol under the given role policy.
    pub fn references_for(&self, symbol: SymbolId, policy: RolePolicy) -> Vec<Reference> {
        self.occurrences_of(symbol)
            .iter()
            .filter_map(|r| {
                let occ = self.occurrence(*r)?;
                if !policy.is_reference(occ.roles) {
                    return None;
                }
                let path = self.document_path(*r)?;
                Some(Reference::new(path, occ.span))
            })
            .collect()
    }
}

/// References resolved through the index for one batch.
#[derive(Debug, Clone, Default)]
pub struct IndexBatch {
    /// One entry per input node.
    pub references: ResolutionMap,
    /// Ids of nodes for which no definition was found in the index.
    pub unmatched: Vec<String>,
}

/// Answers reference queries from a pre-built SCIP index.
pub struct IndexResolver {
    project_root: PathBuf,
    index_path: PathBuf,
    policy: RolePolicy,
    tables: OnceLock<Arc<IndexTables>>,
}

impl IndexResolver {
    pub fn new(project_root: &Path, index_path: &Path, policy: RolePolicy) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            index_path: index_path.to_path_buf(),
            policy,
            tables: OnceLock::new(),
        }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn role_policy(&self) -> RolePolicy {
        self.policy
    }

    pub fn is_loaded(&self) -> bool {
        self.tables.get().is_some()
    }

    /// Reads and decodes the index once. Later calls return the cached tables.
    pub fn load(&self) -> Result<Arc<IndexTables>> {
        if let Some(tables) = self.tables.get() {
            return Ok(Arc::clone(tables));
        }

        let start = Instant::now();
        let bytes = std::fs::read(&self.index_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SymrefError::IndexNotFound {
                path: self.index_path.display().to_string(),
            },
            _ => SymrefError::IndexParse {
                message: format!("failed to read index: {}", e),
                path: self.index_path.display().to_string(),
            },
        })?;

        let index = proto::Index::decode(bytes.as_slice()).map_err(|e| SymrefError::IndexParse {
            message: e.to_string(),
            path: self.index_path.display().to_string(),
        })?;

        let mut tables = IndexTables::from_index(index);
        tables.stats.load_ms = start.elapsed().as_millis() as u64;
        info!(
            "loaded index {}: {} documents, {} symbols, {} occurrences in {}ms",
            self.index_path.display(),
            tables.stats.documents,
            tables.stats.symbols,
            tables.stats.occurrences,
            tables.stats.load_ms
        );

        let tables = Arc::new(tables);
        let _ = self.tables.set(Arc::clone(&tables));
        Ok(self.tables.get().cloned().unwrap_or(tables))
    }

    pub fn stats(&self) -> Option<IndexStats> {
        self.tables.get().map(|t| t.stats().clone())
    }

    fn node_path(&self, node: &DefinitionNode) -> String {
        relative_path(&self.project_root, &node.file_path)
    }

    /// Maps a definition node to its index symbol. `None` if the index is not
    /// loaded or has no definition at that exact position.
    pub fn find_symbol_for_node(&self, node: &DefinitionNode) -> Option<SymbolId> {
        let tables = self.tables.get()?;
        tables.find_definition(&self.node_path(node), node.line, node.column)
    }

    /// Reference occurrences of a symbol, definitions excluded.
    pub fn references_for(&self, symbol: SymbolId) -> Vec<Reference> {
        match self.tables.get() {
            Some(tables) => tables.references_for(symbol, self.policy),
            None => Vec::new(),
        }
    }

    /// Resolves a batch through the index, loading it first if needed.
    ///
    /// Nodes are grouped by file so each document's occurrences are scanned
    /// once, however many nodes point into it.
    pub fn resolve_batch(&self, nodes: &[DefinitionNode]) -> Result<IndexBatch> {
        let tables = self.load()?;
        let progress = ProgressTracker::new("index references", nodes.len());

        let mut by_file: HashMap<String, Vec<&DefinitionNode>> = HashMap::new();
        for node in nodes {
            by_file.entry(self.node_path(node)).or_default().push(node);
        }

        let mut batch = IndexBatch::default();
        let mut memo: HashMap<SymbolId, Vec<Reference>> = HashMap::new();

        for (path, file_nodes) in by_file {
            let positions = tables.definition_positions(&path);
            for node in &file_nodes {
                let refs = match positions.get(&(node.line, node.column)) {
                    Some(symbol) => memo
                        .entry(*symbol)
                        .or_insert_with(|| tables.references_for(*symbol, self.policy))
                        .clone(),
                    None => {
                        batch.unmatched.push(node.id.clone());
                        Vec::new()
                    }
                };
                batch.references.entry(node.id.clone()).or_insert(refs);
            }
            progress.increment(file_nodes.len());
        }

        debug!(
            "index batch: {} nodes, {} without a definition in the index",
            nodes.len(),
            batch.unmatched.len()
        );
        Ok(batch)
    }
}
