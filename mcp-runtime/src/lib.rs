//! Nightscout MCP runtime: configuration, HTTP client, range fetching,
//! period aggregation, report rendering and the JSON-RPC stdio server.

use std::sync::Arc;

use clap::{Args, Subcommand};
use serde_json::{Map, Value, json};
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub mod aggregate;
pub mod client;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod render;
pub mod tools;
mod util;

use config::{ConnectionArgs, NightscoutConfig};
use error::NightscoutError;
use tools::{NightscoutTools, tool_definitions};
use util::to_pretty_json;

const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const MCP_SERVER_NAME: &str = "nightscout-mcp";
const SERVER_INSTRUCTIONS: &str = "Read-only access to a Nightscout CGM site. Use glucose_current for the latest reading, glucose_history for recent hours, analyze for any date range (7d, 2w, 3m, 1y, YYYY-MM, YYYY-MM-DD) and analyze_monthly for a month-by-month yearly review.";

#[derive(Subcommand)]
pub enum McpCommands {
    /// Run the Nightscout MCP server over stdio
    Serve,
    /// Check connectivity to the configured Nightscout site
    Diagnose,
    /// Run a single tool and print its report
    Call(CallArgs),
}

#[derive(Args, Clone, Debug)]
pub struct CallArgs {
    /// Tool name, e.g. glucose_current or analyze_monthly
    pub tool: String,
    /// Tool arguments as a JSON object
    #[arg(long, default_value = "{}")]
    pub args: String,
}

pub async fn run(connection: ConnectionArgs, command: McpCommands, shutdown: CancellationToken) -> i32 {
    let config = match NightscoutConfig::from_args(&connection) {
        Ok(config) => Arc::new(config),
        Err(err) => return print_fatal(&ToolError::from(err)),
    };
    let tools = match NightscoutTools::new(config.clone()) {
        Ok(tools) => tools,
        Err(err) => return print_fatal(&ToolError::from(err)),
    };

    match command {
        McpCommands::Serve => {
            if let Err(err) = config.require_base_url() {
                return print_fatal(&ToolError::from(err));
            }
            let server = McpServer::new(tools, shutdown);
            let reader = BufReader::new(io::stdin());
            let mut writer = io::stdout();
            match server.serve(reader, &mut writer).await {
                Ok(()) => 0,
                Err(err) => {
                    let payload = json!({
                        "error": "mcp_server_error",
                        "message": err,
                    });
                    eprintln!("{}", to_pretty_json(&payload));
                    1
                }
            }
        }
        McpCommands::Diagnose => match diagnose(&tools, &shutdown).await {
            Ok(report) => {
                println!("{}", to_pretty_json(&report));
                if report
                    .get("status")
                    .and_then(Value::as_str)
                    .is_some_and(|status| status == "ready")
                {
                    0
                } else {
                    2
                }
            }
            Err(err) => print_fatal(&err),
        },
        McpCommands::Call(args) => {
            let parsed = match serde_json::from_str::<Value>(&args.args) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    return print_fatal(
                        &ToolError::new("validation_failed", "--args must be a JSON object")
                            .with_field("args"),
                    );
                }
            };
            match tools.call(&args.tool, &parsed, &shutdown.child_token()).await {
                Ok(output) => {
                    println!("{}", output.text);
                    0
                }
                Err(err) => {
                    println!("{}", tools.error_text(&err));
                    print_fatal(&err)
                }
            }
        }
    }
}

fn print_fatal(err: &ToolError) -> i32 {
    eprintln!("{}", to_pretty_json(&err.to_value()));
    1
}

/// Readiness report: server status plus the age of the newest entry.
async fn diagnose(tools: &NightscoutTools, shutdown: &CancellationToken) -> Result<Value, ToolError> {
    let client = tools.client();
    let config = client.config();
    let base_url = config.require_base_url()?.to_string();
    let cancel = shutdown.child_token();

    let status_check = match client.status(&cancel).await {
        Ok(status) => json!({
            "ok": true,
            "name": status.name,
            "version": status.version,
        }),
        Err(err) if err.is_cancelled() => return Err(err.into()),
        Err(err) => json!({ "ok": false, "error": ToolError::from(err).to_value() }),
    };
    let entry_check = match client.latest_entries(1, &cancel).await {
        Ok(entries) => {
            let newest = entries.first().map(|e| e.date);
            json!({
                "ok": newest.is_some(),
                "newest_date": newest,
                "age_minutes": newest.map(|date| (tools::system_clock() - date) / 60_000),
            })
        }
        Err(err) if err.is_cancelled() => return Err(err.into()),
        Err(err) => json!({ "ok": false, "error": ToolError::from(err).to_value() }),
    };

    let ready = [&status_check, &entry_check]
        .iter()
        .all(|check| check["ok"].as_bool().unwrap_or(false));
    Ok(json!({
        "status": if ready { "ready" } else { "degraded" },
        "server": MCP_SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "base_url": base_url,
        "token_configured": config.token.is_some(),
        "api_secret_header": config.api_secret_header().is_some(),
        "units": config.units,
        "locale": config.locale,
        "target_mgdl": config.target,
        "checks": {
            "status": status_check,
            "latest_entry": entry_check,
        }
    }))
}

/// How a message arrived on stdio; replies use the same framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    ContentLength,
    Line,
}

#[derive(Debug)]
enum Incoming {
    Message(Value),
    /// A line that was not valid JSON
    Malformed(String),
}

struct McpServer {
    tools: NightscoutTools,
    shutdown: CancellationToken,
    session_id: String,
}

impl McpServer {
    fn new(tools: NightscoutTools, shutdown: CancellationToken) -> Self {
        Self {
            tools,
            shutdown,
            session_id: format!("stdio-{}", Uuid::now_v7()),
        }
    }

    async fn serve<R, W>(&self, mut reader: R, writer: &mut W) -> Result<(), String>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!(
            server = MCP_SERVER_NAME,
            version = env!("CARGO_PKG_VERSION"),
            session = %self.session_id,
            "MCP server listening on stdio"
        );

        loop {
            let incoming = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    tracing::info!(session = %self.session_id, "shutdown requested");
                    break;
                }
                incoming = read_framed_json(&mut reader) => incoming
                    .map_err(|e| format!("Failed to read MCP message: {e}"))?,
            };
            let Some((incoming, framing)) = incoming else {
                break;
            };

            let responses = match incoming {
                Incoming::Message(message) => self.handle_incoming_message(message).await,
                Incoming::Malformed(reason) => {
                    vec![error_response(Value::Null, RpcError::parse_error(reason))]
                }
            };
            for response in responses {
                write_framed_json(writer, &response, framing)
                    .await
                    .map_err(|e| format!("Failed to write MCP response: {e}"))?;
            }
        }

        tracing::info!(session = %self.session_id, "MCP server stopped");
        Ok(())
    }

    async fn handle_incoming_message(&self, incoming: Value) -> Vec<Value> {
        let mut responses = Vec::new();

        if let Some(batch) = incoming.as_array() {
            if batch.is_empty() {
                responses.push(error_response(
                    Value::Null,
                    RpcError::invalid_request("Batch request must not be empty"),
                ));
                return responses;
            }
            for item in batch {
                if let Some(response) = self.handle_single_message(item.clone()).await {
                    responses.push(response);
                }
            }
            return responses;
        }

        if let Some(response) = self.handle_single_message(incoming).await {
            responses.push(response);
        }
        responses
    }

    async fn handle_single_message(&self, incoming: Value) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            // Responses from the client; the server never sends requests.
            return None;
        };

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        if let Some(id) = obj.get("id").cloned() {
            let result = self.handle_request(method, params).await;
            Some(match result {
                Ok(payload) => success_response(id, payload),
                Err(err) => error_response(id, err),
            })
        } else {
            self.handle_notification(method);
            None
        }
    }

    fn handle_notification(&self, method: &str) {
        tracing::debug!(method, "notification");
    }

    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize_payload()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.tools_list_payload()),
            "tools/call" => self.handle_tools_call(params).await,
            "resources/list" => Ok(json!({ "resources": [] })),
            "prompts/list" => Ok(json!({ "prompts": [] })),
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    fn initialize_payload(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": {
                    "listChanged": false
                },
                "resources": {
                    "listChanged": false
                },
                "prompts": {
                    "listChanged": false
                }
            },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            },
            "instructions": SERVER_INSTRUCTIONS
        })
    }

    fn tools_list_payload(&self) -> Value {
        let tools: Vec<Value> = tool_definitions()
            .into_iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    async fn handle_tools_call(&self, params: Value) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;

        let args = match params.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(
                    "tools/call 'arguments' must be an object",
                ));
            }
        };

        let cancel = self.shutdown.child_token();
        match self.tools.call(name, &args, &cancel).await {
            Ok(output) => {
                let envelope = json!({
                    "status": "complete",
                    "tool": name,
                    "data": output.data,
                });
                Ok(build_tool_call_response(output.text, envelope, false))
            }
            Err(err) => {
                tracing::debug!(tool = name, code = %err.code, "tool call failed");
                let envelope = json!({
                    "status": "error",
                    "tool": name,
                    "error": err.to_value(),
                });
                Ok(build_tool_call_response(self.tools.error_text(&err), envelope, true))
            }
        }
    }
}

fn build_tool_call_response(text: String, envelope: Value, is_error: bool) -> Value {
    if is_error {
        json!({
            "isError": true,
            "content": [{ "type": "text", "text": text }],
            "structuredContent": envelope
        })
    } else {
        json!({
            "content": [{ "type": "text", "text": text }],
            "structuredContent": envelope
        })
    }
}

#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
    data: Option<Value>,
}

impl RpcError {
    fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: message.into(),
            data: None,
        }
    }

    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
            data: Some(json!({ "method": method })),
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }
}

/// A tool-level failure, reported inside a successful JSON-RPC response.
#[derive(Debug, Clone)]
pub struct ToolError {
    code: String,
    message: String,
    field: Option<String>,
    docs_hint: Option<String>,
}

impl ToolError {
    fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            field: None,
            docs_hint: None,
        }
    }

    fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    fn with_docs_hint(mut self, docs_hint: impl Into<String>) -> Self {
        self.docs_hint = Some(docs_hint.into());
        self
    }

    fn to_value(&self) -> Value {
        let mut payload = json!({
            "error": self.code,
            "message": self.message
        });
        if let Some(field) = &self.field {
            payload["field"] = Value::String(field.clone());
        }
        if let Some(docs_hint) = &self.docs_hint {
            payload["docs_hint"] = Value::String(docs_hint.clone());
        }
        payload
    }
}

impl From<NightscoutError> for ToolError {
    fn from(err: NightscoutError) -> Self {
        let mut tool_error = ToolError::new(err.code(), err.to_string());
        if let Some(hint) = err.docs_hint() {
            tool_error = tool_error.with_docs_hint(hint);
        }
        tool_error
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, error: RpcError) -> Value {
    let mut payload = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    });
    if let Some(data) = error.data {
        payload["error"]["data"] = data;
    }
    payload
}

/// Read one message framed either with `Content-Length` headers or as a
/// single JSON line. Returns `None` on clean EOF.
async fn read_framed_json<R>(reader: &mut R) -> Result<Option<(Incoming, Framing)>, std::io::Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut in_headers = false;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            if !in_headers {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Unexpected EOF while reading MCP headers",
            ));
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            if in_headers {
                break;
            }
            continue;
        }

        if !in_headers && (trimmed.starts_with('{') || trimmed.starts_with('[')) {
            let incoming = match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => Incoming::Message(value),
                Err(e) => Incoming::Malformed(format!("Invalid JSON payload: {e}")),
            };
            return Ok(Some((incoming, Framing::Line)));
        }

        in_headers = true;
        if trimmed.to_ascii_lowercase().starts_with("content-length:") {
            let raw_len = trimmed
                .split_once(':')
                .map(|(_, right)| right.trim())
                .unwrap_or_default();
            let parsed = raw_len.parse::<usize>().map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "Invalid Content-Length header",
                )
            })?;
            content_length = Some(parsed);
        }
    }

    let content_length = content_length.ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Missing Content-Length header",
        )
    })?;
    let mut payload = vec![0_u8; content_length];
    reader.read_exact(&mut payload).await?;

    let incoming = match serde_json::from_slice::<Value>(&payload) {
        Ok(value) => Incoming::Message(value),
        Err(e) => Incoming::Malformed(format!("Invalid JSON payload: {e}")),
    };
    Ok(Some((incoming, Framing::ContentLength)))
}

async fn write_framed_json<W>(writer: &mut W, value: &Value, framing: Framing) -> Result<(), std::io::Error>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to serialize JSON: {e}"),
        )
    })?;
    match framing {
        Framing::ContentLength => {
            let header = format!(
                "Content-Length: {}\r\nContent-Type: application/json\r\n\r\n",
                body.len()
            );
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(&body).await?;
        }
        Framing::Line => {
            writer.write_all(&body).await?;
            writer.write_all(b"\n").await?;
        }
    }
    writer.flush().await?;
    Ok(())
}
