use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lsp_types::notification::{DidOpenTextDocument, Exit, Initialized, Notification};
use lsp_types::request::{GotoDefinition, Initialize, References, Request, Shutdown};
use lsp_types::Uri;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::{oneshot, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::launcher::{kill_process_tree, AnalyzerLauncher};
use super::transport::{
    definition_params, did_open_params, encode_message, initialize_params, parse_locations,
    path_to_uri, references_params, IncomingMessage, JsonRpcError, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, MessageKind, MessageReader,
};
use crate::errors::{Result, SymrefError};
use crate::languages::{relative_path, Framing};
use crate::types::{DefinitionNode, Language, Reference, Span};

/// Which question to ask the analyzer about a definition node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    References,
    Definition,
}

impl QueryKind {
    pub fn method(&self) -> &'static str {
        match self {
            QueryKind::References => References::METHOD,
            QueryKind::Definition => GotoDefinition::METHOD,
        }
    }
}

enum RpcFailure {
    Remote(JsonRpcError),
    Disconnected,
}

type Reply = std::result::Result<Value, RpcFailure>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;
type SharedWriter = Arc<tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Removes a pending request when its caller stops waiting.
struct PendingGuard {
    id: u64,
    pending: PendingMap,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.id);
        }
    }
}

/// One running analyzer: its process, its request channel and the task
/// routing its responses.
///
/// Many requests may be in flight at once; responses are matched by id.
pub struct AnalyzerSession {
    language: Language,
    project_root: PathBuf,
    framing: Framing,
    writer: SharedWriter,
    pending: PendingMap,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    /// Files announced with `didOpen`, keyed by relative path. Queries for a
    /// file wait on its cell until the notification has been written.
    opened: Mutex<HashMap<String, Arc<OnceCell<()>>>>,
    reader_task: JoinHandle<()>,
    child: Option<Child>,
}

impl AnalyzerSession {
    /// Launches an analyzer and completes the `initialize` handshake.
    pub async fn start(
        launcher: &dyn AnalyzerLauncher,
        language: Language,
        project_root: &Path,
        init_timeout: Duration,
    ) -> Result<Self> {
        let io = launcher.launch(language, project_root)?;
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(io.writer));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let reader_task = tokio::spawn(read_loop(
            io.reader,
            Arc::clone(&pending),
            Arc::clone(&writer),
            io.framing,
            Arc::clone(&alive),
            language,
        ));

        let session = Self {
            language,
            project_root: project_root.to_path_buf(),
            framing: io.framing,
            writer,
            pending,
            next_id: AtomicU64::new(1),
            alive,
            opened: Mutex::new(HashMap::new()),
            reader_task,
            child: io.child,
        };

        let handshake = session.request(Initialize::METHOD, initialize_params(project_root)?);
        match tokio::time::timeout(init_timeout, handshake).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                session.kill().await;
                return Err(e);
            }
            Err(_) => {
                session.kill().await;
                return Err(SymrefError::Timeout {
                    operation: format!("{} analyzer initialize", language),
                    elapsed_ms: init_timeout.as_millis() as u64,
                });
            }
        }
        session.notify(Initialized::METHOD, json!({})).await?;
        debug!("{} analyzer ready (pid {:?})", language, session.pid());
        Ok(session)
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn connection_error(&self, message: impl Into<String>) -> SymrefError {
        SymrefError::Connection {
            message: message.into(),
            language: self.language.to_string(),
        }
    }

    async fn send<T: serde::Serialize>(&self, message: &T) -> Result<()> {
        let bytes = encode_message(message, self.framing)?;
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&bytes)
            .await
            .map_err(|e| self.connection_error(format!("write failed: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| self.connection_error(format!("flush failed: {}", e)))
    }

    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.send(&JsonRpcNotification::new(method, params)).await
    }

    /// Sends a request and waits for its response. No timeout is applied
    /// here; callers bound the wait.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| self.connection_error("pending request table poisoned"))?;
            pending.insert(id, tx);
        }
        let _guard = PendingGuard {
            id,
            pending: Arc::clone(&self.pending),
        };
        if !self.is_alive() {
            return Err(self.connection_error("analyzer has exited"));
        }

        self.send(&JsonRpcRequest::new(id, method, params)).await?;

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(RpcFailure::Remote(e))) => Err(SymrefError::Protocol {
                message: format!("{} failed ({}): {}", method, e.code, e.message),
            }),
            Ok(Err(RpcFailure::Disconnected)) | Err(_) => {
                Err(self.connection_error(format!("analyzer exited during {}", method)))
            }
        }
    }

    /// Sends `didOpen` for a file the first time it is queried.
    ///
    /// Concurrent queries for the same file all wait until the notification
    /// is on the wire. A failed send leaves the file unopened for the next
    /// caller to retry.
    async fn ensure_open(&self, relative: &str, uri: &Uri) -> Result<()> {
        let cell = match self.opened.lock() {
            Ok(mut opened) => Arc::clone(opened.entry(relative.to_string()).or_default()),
            Err(_) => return Ok(()),
        };
        cell.get_or_try_init(|| async {
            match tokio::fs::read_to_string(self.project_root.join(relative)).await {
                Ok(text) => {
                    let params = did_open_params(uri.clone(), self.language.as_str(), text)?;
                    self.notify(DidOpenTextDocument::METHOD, params).await
                }
                Err(e) => {
                    trace!("not opening {}: {}", relative, e);
                    Ok(())
                }
            }
        })
        .await?;
        Ok(())
    }

    /// Asks the analyzer about one definition node.
    ///
    /// For references, the definition site itself is dropped from the answer.
    pub async fn query(&self, kind: QueryKind, node: &DefinitionNode) -> Result<Vec<Reference>> {
        let relative = relative_path(&self.project_root, &node.file_path);
        let uri = path_to_uri(&self.project_root.join(&relative))?;
        self.ensure_open(&relative, &uri).await?;

        let params = match kind {
            QueryKind::References => references_params(uri, node.line, node.column)?,
            QueryKind::Definition => definition_params(uri, node.line, node.column)?,
        };
        let result = self.request(kind.method(), params).await?;

        let references = parse_locations(&result)
            .into_iter()
            .map(|loc| {
                Reference::new(
                    relative_path(&self.project_root, loc.uri.as_str()),
                    Span::new(
                        loc.range.start.line,
                        loc.range.start.character,
                        loc.range.end.line,
                        loc.range.end.character,
                    ),
                )
            })
            .filter(|r| {
                kind == QueryKind::Definition
                    || !(r.file_path == relative && r.span.starts_at(node.line, node.column))
            })
            .collect();
        Ok(references)
    }

    /// Polite shutdown: `shutdown` + `exit`, then a hard kill if the process
    /// is still running when `grace` runs out.
    pub async fn shutdown(mut self, grace: Duration) {
        let half = grace / 2;
        if self.is_alive() {
            let _ = tokio::time::timeout(half, self.request(Shutdown::METHOD, Value::Null)).await;
            let _ = self.notify(Exit::METHOD, Value::Null).await;
        }
        if let Some(child) = self.child.as_mut() {
            match tokio::time::timeout(half, child.wait()).await {
                Ok(Ok(status)) => debug!("{} analyzer exited with {}", self.language, status),
                _ => {
                    warn!(
                        "{} analyzer did not exit within {:?}; killing it",
                        self.language, grace
                    );
                }
            }
        }
        self.kill().await;
    }

    /// Kills the analyzer and its process group immediately.
    pub async fn kill(mut self) {
        self.reader_task.abort();
        if let Some(mut child) = self.child.take() {
            if let Some(pid) = child.id() {
                kill_process_tree(pid);
            }
            let _ = child.start_kill();
            let _ = tokio::time::timeout(Duration::from_secs(1), child.wait()).await;
        }
        self.alive.store(false, Ordering::SeqCst);
    }
}

impl Drop for AnalyzerSession {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Routes analyzer output: responses to their waiters, server requests to a
/// `null` reply. Fails every waiter when the stream ends.
async fn read_loop(
    reader: Box<dyn AsyncRead + Send + Unpin>,
    pending: PendingMap,
    writer: SharedWriter,
    framing: Framing,
    alive: Arc<AtomicBool>,
    language: Language,
) {
    let mut reader = MessageReader::new(reader);
    loop {
        let message = match reader.next_message().await {
            Ok(Some(m)) => m,
            Ok(None) => {
                debug!("{} analyzer closed its output", language);
                break;
            }
            Err(e) => {
                debug!("{} analyzer stream error: {}", language, e);
                break;
            }
        };

        match message.kind() {
            MessageKind::Response(id) => {
                let waiter = pending.lock().ok().and_then(|mut p| p.remove(&id));
                if let Some(tx) = waiter {
                    let reply = match message.error {
                        Some(e) => Err(RpcFailure::Remote(e)),
                        None => Ok(message.result.unwrap_or(Value::Null)),
                    };
                    let _ = tx.send(reply);
                }
            }
            MessageKind::ServerRequest => {
                let response = server_request_reply(&message);
                if let Ok(bytes) = encode_message(&response, framing) {
                    let mut w = writer.lock().await;
                    if w.write_all(&bytes).await.is_err() || w.flush().await.is_err() {
                        break;
                    }
                }
            }
            MessageKind::Notification | MessageKind::Unknown => {
                trace!("{} analyzer: {:?}", language, message.method);
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    let waiters: Vec<_> = match pending.lock() {
        Ok(mut p) => p.drain().collect(),
        Err(_) => Vec::new(),
    };
    for (_, tx) in waiters {
        let _ = tx.send(Err(RpcFailure::Disconnected));
    }
}

/// `workspace/configuration` expects one entry per requested item; every
/// other server request gets `null`.
fn server_request_reply(message: &IncomingMessage) -> JsonRpcResponse {
    let id = message.id.clone().unwrap_or(Value::Null);
    let result = match message.method.as_deref() {
        Some("workspace/configuration") => {
            let items = message
                .params
                .as_ref()
                .and_then(|p| p.get("items"))
                .and_then(|i| i.as_array())
                .map(|a| a.len())
                .unwrap_or(0);
            Value::Array(vec![Value::Null; items])
        }
        _ => Value::Null,
    };
    JsonRpcResponse::success(id, result)
}
