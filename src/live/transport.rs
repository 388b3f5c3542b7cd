//! JSON-RPC 2.0 messages exchanged with analyzer processes.
//!
//! Outgoing messages are written with the analyzer's framing: one JSON
//! document per line, or the LSP `Content-Length` header format. The reader
//! accepts both so a single codec serves every analyzer.

use std::path::{Path, PathBuf};

use lsp_types::{
    ClientCapabilities, DidOpenTextDocumentParams, DynamicRegistrationClientCapabilities,
    GotoCapability, GotoDefinitionParams, GotoDefinitionResponse, InitializeParams, Location,
    LocationLink, Position, ReferenceContext, ReferenceParams, TextDocumentClientCapabilities,
    TextDocumentIdentifier, TextDocumentItem, TextDocumentPositionParams, Uri,
    WorkspaceClientCapabilities, WorkspaceFolder,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tracing::{debug, warn};

use crate::errors::{Result, SymrefError};
use crate::languages::Framing;

/// A JSON-RPC 2.0 request sent to an analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version; always `"2.0"`.
    pub jsonrpc: String,
    /// Request identifier, unique per session.
    pub id: u64,
    /// The RPC method name.
    pub method: String,
    /// Parameters for the method.
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification (a request without an id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Creates a successful JSON-RPC response.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Creates an error JSON-RPC response.
    pub fn error(id: Value, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Any message received from an analyzer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// What an incoming message is, from the client's point of view.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    /// Answer to one of our requests.
    Response(u64),
    /// A request the analyzer expects us to answer.
    ServerRequest,
    Notification,
    Unknown,
}

impl IncomingMessage {
    pub fn kind(&self) -> MessageKind {
        match (&self.id, &self.method) {
            (Some(_), Some(_)) => MessageKind::ServerRequest,
            (None, Some(_)) => MessageKind::Notification,
            (Some(id), None) => match id_as_u64(id) {
                Some(id) => MessageKind::Response(id),
                None => MessageKind::Unknown,
            },
            (None, None) => MessageKind::Unknown,
        }
    }
}

fn id_as_u64(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Serializes a message with the given framing.
pub fn encode_message<T: Serialize>(message: &T, framing: Framing) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(message)?;
    let mut out = Vec::with_capacity(body.len() + 32);
    match framing {
        Framing::Lines => {
            out.extend_from_slice(&body);
            out.push(b'\n');
        }
        Framing::ContentLength => {
            out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
            out.extend_from_slice(&body);
        }
    }
    Ok(out)
}

/// Reads framed messages from an analyzer's output stream.
pub struct MessageReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
        }
    }

    /// Returns the next well-formed message, or `None` at end of stream.
    ///
    /// Lines that are neither a header nor a JSON object are skipped, as are
    /// bodies that fail to parse.
    pub async fn next_message(&mut self) -> Result<Option<IncomingMessage>> {
        loop {
            let mut line = String::new();
            if self.inner.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if let Some(length) = parse_content_length(trimmed) {
                let length = length?;
                loop {
                    let mut header = String::new();
                    if self.inner.read_line(&mut header).await? == 0 {
                        return Ok(None);
                    }
                    if header.trim().is_empty() {
                        break;
                    }
                }
                let mut body = vec![0u8; length];
                self.inner.read_exact(&mut body).await?;
                match serde_json::from_slice::<IncomingMessage>(&body) {
                    Ok(msg) => return Ok(Some(msg)),
                    Err(e) => {
                        warn!("skipping malformed analyzer message: {}", e);
                        continue;
                    }
                }
            }

            if trimmed.starts_with('{') {
                match serde_json::from_str::<IncomingMessage>(trimmed) {
                    Ok(msg) => return Ok(Some(msg)),
                    Err(e) => warn!("skipping malformed analyzer line: {}", e),
                }
            } else {
                debug!("ignoring non-protocol analyzer output: {}", trimmed);
            }
        }
    }
}

fn parse_content_length(line: &str) -> Option<Result<usize>> {
    let (name, value) = line.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case("content-length") {
        return None;
    }
    Some(value.trim().parse::<usize>().map_err(|e| SymrefError::Protocol {
        message: format!("invalid Content-Length '{}': {}", value.trim(), e),
    }))
}

/// Parses a `references` or `definition` result: `null`, a `Location`, a
/// `Location[]` or a `LocationLink[]`.
///
/// A result that does not match any of these shapes is salvaged entry by
/// entry; entries without a usable uri or range are dropped.
pub fn parse_locations(value: &Value) -> Vec<Location> {
    match Option::<GotoDefinitionResponse>::deserialize(value) {
        Ok(Some(GotoDefinitionResponse::Scalar(location))) => vec![location],
        Ok(Some(GotoDefinitionResponse::Array(locations))) => locations,
        Ok(Some(GotoDefinitionResponse::Link(links))) => links.into_iter().map(link_target).collect(),
        Ok(None) => Vec::new(),
        Err(e) => {
            debug!("salvaging locations from a malformed result: {}", e);
            match value {
                Value::Array(items) => items.iter().filter_map(parse_location).collect(),
                _ => Vec::new(),
            }
        }
    }
}

fn parse_location(item: &Value) -> Option<Location> {
    if let Ok(location) = Location::deserialize(item) {
        return Some(location);
    }
    LocationLink::deserialize(item).ok().map(link_target)
}

fn link_target(link: LocationLink) -> Location {
    Location {
        uri: link.target_uri,
        range: link.target_selection_range,
    }
}

/// Converts a filesystem path into a `file://` uri. Every path segment is
/// percent-encoded.
pub fn path_to_uri(path: &Path) -> Result<Uri> {
    let normalized = path.to_string_lossy().replace('\\', "/");
    let encoded = normalized
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    let text = if encoded.starts_with('/') {
        format!("file://{}", encoded)
    } else {
        format!("file:///{}", encoded)
    };
    text.parse::<Uri>().map_err(|_| SymrefError::Protocol {
        message: format!("cannot express '{}' as a file uri", path.display()),
    })
}

/// Converts a `file://` uri back into a filesystem path.
///
/// Returns `None` for other schemes and for uris that do not decode to UTF-8.
pub fn uri_to_path(uri: &str) -> Option<PathBuf> {
    let rest = uri.strip_prefix("file://")?;
    // Skip the authority ("" or "localhost").
    let path = &rest[rest.find('/')?..];
    let decoded = urlencoding::decode(path).ok()?;
    #[cfg(windows)]
    {
        let bytes = decoded.as_bytes();
        if bytes.len() > 2 && bytes[2] == b':' {
            return Some(PathBuf::from(&decoded[1..]));
        }
    }
    Some(PathBuf::from(decoded.into_owned()))
}

pub fn initialize_params(root: &Path) -> Result<Value> {
    let root_uri = path_to_uri(root)?;
    let capabilities = ClientCapabilities {
        text_document: Some(TextDocumentClientCapabilities {
            references: Some(DynamicRegistrationClientCapabilities {
                dynamic_registration: Some(false),
            }),
            definition: Some(GotoCapability {
                dynamic_registration: Some(false),
                link_support: Some(true),
            }),
            ..Default::default()
        }),
        workspace: Some(WorkspaceClientCapabilities {
            configuration: Some(true),
            workspace_folders: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    };
    // Older analyzers only read rootUri.
    #[allow(deprecated)]
    let params = InitializeParams {
        process_id: Some(std::process::id()),
        root_uri: Some(root_uri.clone()),
        capabilities,
        workspace_folders: Some(vec![WorkspaceFolder {
            uri: root_uri,
            name: "root".to_string(),
        }]),
        ..Default::default()
    };
    Ok(serde_json::to_value(params)?)
}

pub fn did_open_params(uri: Uri, language_id: &str, text: String) -> Result<Value> {
    let params = DidOpenTextDocumentParams {
        text_document: TextDocumentItem::new(uri, language_id.to_string(), 1, text),
    };
    Ok(serde_json::to_value(params)?)
}

fn position_params(uri: Uri, line: u32, character: u32) -> TextDocumentPositionParams {
    TextDocumentPositionParams::new(TextDocumentIdentifier::new(uri), Position::new(line, character))
}

/// `textDocument/references` params; the declaration itself is excluded.
pub fn references_params(uri: Uri, line: u32, character: u32) -> Result<Value> {
    let params = ReferenceParams {
        text_document_position: position_params(uri, line, character),
        work_done_progress_params: Default::default(),
        partial_result_params: Default::default(),
        context: ReferenceContext {
            include_declaration: false,
        },
    };
    Ok(serde_json::to_value(params)?)
}

pub fn definition_params(uri: Uri, line: u32, character: u32) -> Result<Value> {
    let params = GotoDefinitionParams {
        text_document_position_params: position_params(uri, line, character),
        work_done_progress_params: Default::default(),
        partial_result_params: Default::default(),
    };
    Ok(serde_json::to_value(params)?)
}
