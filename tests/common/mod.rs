//! Shared fixtures: an in-memory analyzer that follows a script, and SCIP
//! index builders.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use prost::Message;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncWriteExt, DuplexStream};

use symref::config::ResolverConfig;
use symref::errors::Result;
use symref::index::proto;
use symref::languages::{relative_path, Framing};
use symref::live::transport::{
    encode_message, path_to_uri, JsonRpcRequest, JsonRpcResponse, MessageKind, MessageReader,
};
use symref::live::{AnalyzerIo, AnalyzerLauncher, HostResources};
use symref::types::Language;

/// `(relative file, line, column)` of a query.
pub type Position = (String, u32, u32);
/// `(relative file, line, start column, end column)` of an answer.
pub type Site = (String, u32, u32, u32);

pub fn pos(file: &str, line: u32, column: u32) -> Position {
    (file.to_string(), line, column)
}

pub fn site(file: &str, line: u32, start: u32, end: u32) -> Site {
    (file.to_string(), line, start, end)
}

/// What the fake analyzer answers.
///
/// `fail_first` and `crash_first` count queries across every launch of the
/// same launcher: the first `crash_first` queries close the stream, the
/// first `fail_first` get a JSON-RPC error.
#[derive(Debug, Default)]
pub struct Script {
    pub references: HashMap<Position, Vec<Site>>,
    pub definitions: HashMap<Position, Site>,
    pub fail_first: usize,
    pub crash_first: usize,
    pub hang_on: HashSet<Position>,
}

impl Script {
    pub fn with_references(mut self, at: Position, sites: Vec<Site>) -> Self {
        self.references.insert(at, sites);
        self
    }
}

/// Launches in-process analyzers over `tokio::io::duplex`.
#[derive(Clone)]
pub struct ScriptedLauncher {
    script: Arc<Script>,
    launches: Arc<AtomicUsize>,
    queries: Arc<AtomicUsize>,
    methods: Arc<Mutex<Vec<String>>>,
}

impl ScriptedLauncher {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
            launches: Arc::new(AtomicUsize::new(0)),
            queries: Arc::new(AtomicUsize::new(0)),
            methods: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// References and definition queries received, failed ones included.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Methods of every client message, in arrival order, across launches.
    pub fn methods(&self) -> Vec<String> {
        self.methods.lock().unwrap().clone()
    }
}

impl AnalyzerLauncher for ScriptedLauncher {
    fn launch(&self, _language: Language, project_root: &Path) -> Result<AnalyzerIo> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let (client, server) = tokio::io::duplex(1 << 16);
        let (reader, writer) = tokio::io::split(client);
        tokio::spawn(serve(
            server,
            Arc::clone(&self.script),
            Arc::clone(&self.queries),
            Arc::clone(&self.methods),
            project_root.to_path_buf(),
        ));
        Ok(AnalyzerIo {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
            framing: Framing::Lines,
        })
    }
}

fn location(root: &Path, site: &Site) -> Value {
    let (file, line, start, end) = site;
    json!({
        "uri": path_to_uri(&root.join(file)).unwrap(),
        "range": {
            "start": {"line": line, "character": start},
            "end": {"line": line, "character": end}
        }
    })
}

fn query_position(params: &Option<Value>, root: &Path) -> Position {
    let params = params.clone().unwrap_or(Value::Null);
    let uri = params["textDocument"]["uri"].as_str().unwrap_or_default();
    let line = params["position"]["line"].as_u64().unwrap_or_default() as u32;
    let column = params["position"]["character"].as_u64().unwrap_or_default() as u32;
    (relative_path(root, uri), line, column)
}

async fn serve(
    stream: DuplexStream,
    script: Arc<Script>,
    queries: Arc<AtomicUsize>,
    methods: Arc<Mutex<Vec<String>>>,
    root: PathBuf,
) {
    let (read, mut write) = tokio::io::split(stream);
    let mut reader = MessageReader::new(read);

    while let Ok(Some(message)) = reader.next_message().await {
        let method = message.method.clone().unwrap_or_default();
        if !method.is_empty() {
            methods.lock().unwrap().push(method.clone());
        }
        let id = match message.kind() {
            MessageKind::ServerRequest => message.id.clone(),
            _ => None,
        };

        let reply: Option<Value> = match (method.as_str(), id) {
            ("initialize", Some(id)) => Some(json!(JsonRpcResponse::success(
                id,
                json!({"capabilities": {"referencesProvider": true, "definitionProvider": true}})
            ))),
            ("initialized", None) => Some(json!(JsonRpcRequest::new(
                9000,
                "workspace/configuration",
                json!({"items": [{"section": "analysis"}]})
            ))),
            ("shutdown", Some(id)) => Some(json!(JsonRpcResponse::success(id, Value::Null))),
            ("exit", _) => return,
            (kind @ ("textDocument/references" | "textDocument/definition"), Some(id)) => {
                let n = queries.fetch_add(1, Ordering::SeqCst);
                let at = query_position(&message.params, &root);
                if n < script.crash_first {
                    return;
                }
                if n < script.fail_first {
                    Some(json!(JsonRpcResponse::error(id, -32603, "analyzer busy".to_string())))
                } else if script.hang_on.contains(&at) {
                    None
                } else if kind == "textDocument/references" {
                    let sites = script.references.get(&at).cloned().unwrap_or_default();
                    let result: Vec<Value> = sites.iter().map(|s| location(&root, s)).collect();
                    Some(json!(JsonRpcResponse::success(id, Value::Array(result))))
                } else {
                    let result = script
                        .definitions
                        .get(&at)
                        .map(|s| location(&root, s))
                        .unwrap_or(Value::Null);
                    Some(json!(JsonRpcResponse::success(id, result)))
                }
            }
            _ => None,
        };

        if let Some(reply) = reply {
            let Ok(bytes) = encode_message(&reply, Framing::Lines) else {
                return;
            };
            if write.write_all(&bytes).await.is_err() || write.flush().await.is_err() {
                return;
            }
        }
    }
}

/// Small timeouts and no restart delay, so failure paths run fast.
pub fn test_config() -> ResolverConfig {
    ResolverConfig {
        pool_size: Some(1),
        base_timeout_ms: 2_000,
        per_request_timeout_ms: 100,
        max_timeout_ms: 5_000,
        restart_backoff_ms: 0,
        shutdown_grace_ms: 1_000,
        generate_index: false,
        ..Default::default()
    }
}

pub fn test_host() -> HostResources {
    HostResources {
        cpu_cores: 8,
        available_memory_mb: 16 * 1024,
    }
}

/// A temp project containing the given files.
pub fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (path, content) in files {
        let full = dir.path().join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }
    dir
}

pub fn occurrence(line: i32, start: i32, end: i32, symbol: &str, roles: i32) -> proto::Occurrence {
    proto::Occurrence {
        range: vec![line, start, end],
        symbol: symbol.to_string(),
        symbol_roles: roles,
    }
}

pub fn document(path: &str, occurrences: Vec<proto::Occurrence>) -> proto::Document {
    proto::Document {
        relative_path: path.to_string(),
        occurrences,
        ..Default::default()
    }
}

/// Encodes documents as a SCIP index at `path`.
pub fn write_index(path: &Path, documents: Vec<proto::Document>) {
    let index = proto::Index {
        metadata: Some(proto::Metadata {
            version: 0,
            tool_info: Some(proto::ToolInfo {
                name: "fixture".to_string(),
                version: "1.0".to_string(),
                arguments: Vec::new(),
            }),
            project_root: "file:///fixture".to_string(),
            text_document_encoding: 1,
        }),
        documents,
    };
    fs::write(path, index.encode_to_vec()).unwrap();
}
