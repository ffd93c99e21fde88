//! Byte-level links to MCP servers.
//!
//! A local server is a child process exchanging one JSON-RPC message per line
//! on its standard streams. A remote server receives each message as an HTTP
//! POST and replies with a JSON body or a `text/event-stream` whose events
//! carry the reply.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::Duration;

use muster_config::McpServerEntry;
use url::Url;

use crate::error::{McpError, Result};
use crate::protocol::{Incoming, Outgoing};

/// Per-request timeout when an entry leaves `timeout_secs` unset.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Retries for HTTP requests that never reach the server.
pub const DEFAULT_RETRIES: u32 = 3;

const SESSION_HEADER: &str = "mcp-session-id";
const RETRY_PAUSE: Duration = Duration::from_millis(100);

// ─────────────────────────────────────────────────────────────────────────────
// Endpoint
// ─────────────────────────────────────────────────────────────────────────────

/// Where and how to reach a remote server.
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    pub url: Url,
    pub timeout: Duration,
    pub retries: u32,
    pub headers: Vec<(String, String)>,
}

impl HttpEndpoint {
    pub fn parse(url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| McpError::transport(format!("invalid URL '{}': {}", url, e)))?;
        Ok(Self {
            url,
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            headers: Vec::new(),
        })
    }

    pub fn from_entry(entry: &McpServerEntry) -> Result<Self> {
        let url = entry
            .url
            .as_deref()
            .ok_or_else(|| McpError::transport(format!("server '{}': HTTP transport requires a URL", entry.name)))?;
        let mut endpoint = Self::parse(url)?;
        if let Some(secs) = entry.timeout_secs {
            endpoint.timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = entry.retries {
            endpoint.retries = retries;
        }
        endpoint.headers = entry.header_tuples();
        Ok(endpoint)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

pub enum Transport {
    Child(ChildPipe),
    Http(HttpSession),
}

impl Transport {
    /// Launch `command` with its standard streams piped to us.
    pub fn spawn(command: &str, args: &[String], env: &[(String, String)]) -> Result<Self> {
        ChildPipe::spawn(command, args, env).map(Self::Child)
    }

    /// Prepare an HTTP session. Nothing is sent until the first message.
    pub fn http(endpoint: HttpEndpoint) -> Result<Self> {
        HttpSession::new(endpoint).map(Self::Http)
    }

    /// Write `message`. A request blocks until its reply arrives; a
    /// notification returns `None` right away.
    pub fn send(&mut self, message: &Outgoing) -> Result<Option<Incoming>> {
        match self {
            Self::Child(pipe) => {
                pipe.write(message)?;
                message.id.map(|id| pipe.read_reply(id)).transpose()
            }
            Self::Http(session) => session.post(message),
        }
    }

    /// Kill the child process, or forget the HTTP session.
    pub fn close(&mut self) {
        match self {
            Self::Child(pipe) => pipe.kill(),
            Self::Http(session) => session.session_id = None,
        }
    }

    /// False once the child has exited. HTTP has no persistent link and is
    /// always considered alive.
    pub fn is_alive(&mut self) -> bool {
        match self {
            Self::Child(pipe) => matches!(pipe.process.try_wait(), Ok(None)),
            Self::Http(_) => true,
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Child process
// ─────────────────────────────────────────────────────────────────────────────

pub struct ChildPipe {
    process: Child,
    writer: BufWriter<ChildStdin>,
    reader: BufReader<ChildStdout>,
}

impl ChildPipe {
    fn spawn(command: &str, args: &[String], env: &[(String, String)]) -> Result<Self> {
        let mut process = Command::new(command)
            .args(args)
            .envs(env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| McpError::launch(format!("'{}': {}", command, e)))?;

        let (Some(stdin), Some(stdout)) = (process.stdin.take(), process.stdout.take()) else {
            let _ = process.kill();
            return Err(McpError::launch(format!("'{}': standard streams not captured", command)));
        };

        Ok(Self {
            process,
            writer: BufWriter::new(stdin),
            reader: BufReader::new(stdout),
        })
    }

    fn write(&mut self, message: &Outgoing) -> Result<()> {
        let line = serde_json::to_string(message)?;
        tracing::trace!(json = %line, "MCP send");
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Read until the reply to `id`. Server-initiated messages and non-JSON
    /// lines (some servers log to stdout) are skipped.
    fn read_reply(&mut self, id: u64) -> Result<Incoming> {
        let mut buf = String::new();
        loop {
            buf.clear();
            if self.reader.read_line(&mut buf)? == 0 {
                return Err(McpError::Closed);
            }
            let line = buf.trim();
            if line.is_empty() {
                continue;
            }
            tracing::trace!(json = %line, "MCP recv");

            match serde_json::from_str::<Incoming>(line) {
                Ok(msg) if msg.answers(id) => return Ok(msg),
                Ok(msg) => tracing::debug!(method = ?msg.method, "skipping unsolicited MCP message"),
                Err(e) => tracing::debug!(error = %e, "skipping non-JSON line from MCP server"),
            }
        }
    }

    fn kill(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP
// ─────────────────────────────────────────────────────────────────────────────

pub struct HttpSession {
    client: reqwest::blocking::Client,
    endpoint: HttpEndpoint,
    /// Assigned by the server on `initialize` and echoed afterwards.
    session_id: Option<String>,
}

impl HttpSession {
    fn new(endpoint: HttpEndpoint) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(endpoint.timeout)
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| McpError::transport(format!("HTTP client: {}", e)))?;
        tracing::debug!(url = %endpoint.url, timeout_secs = endpoint.timeout.as_secs(), "HTTP transport ready");
        Ok(Self {
            client,
            endpoint,
            session_id: None,
        })
    }

    fn post(&mut self, message: &Outgoing) -> Result<Option<Incoming>> {
        let body = serde_json::to_string(message)?;
        let response = self.deliver(body)?;

        if let Some(id) = response.headers().get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
            self.session_id = Some(id.to_string());
        }
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(McpError::transport(format!("HTTP {}: {}", status, detail)));
        }

        let Some(id) = message.id else {
            return Ok(None);
        };
        let streamed = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let text = response
            .text()
            .map_err(|e| McpError::transport(format!("reading HTTP body: {}", e)))?;
        tracing::trace!(json = %text, "MCP recv");

        let reply = if streamed {
            sse_payloads(&text)
                .filter_map(|data| serde_json::from_str::<Incoming>(&data).ok())
                .find(|msg| msg.answers(id))
        } else {
            Some(serde_json::from_str::<Incoming>(&text)?).filter(|msg| msg.answers(id))
        };
        reply
            .map(Some)
            .ok_or_else(|| McpError::protocol(format!("no reply to request {}", id)))
    }

    /// POST `body`, retrying only failures that never reached the server.
    fn deliver(&self, body: String) -> Result<reqwest::blocking::Response> {
        let mut retries_left = self.endpoint.retries;
        loop {
            let mut request = self
                .client
                .post(self.endpoint.url.clone())
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
                .body(body.clone());
            for (name, value) in &self.endpoint.headers {
                request = request.header(name.as_str(), value.as_str());
            }
            if let Some(ref session) = self.session_id {
                request = request.header(SESSION_HEADER, session.as_str());
            }

            match request.send() {
                Ok(response) => return Ok(response),
                Err(e) if retries_left > 0 => {
                    retries_left -= 1;
                    tracing::warn!(url = %self.endpoint.url, error = %e, retries_left, "HTTP request failed, retrying");
                    std::thread::sleep(RETRY_PAUSE);
                }
                Err(e) => return Err(McpError::transport(format!("HTTP request to {}: {}", self.endpoint.url, e))),
            }
        }
    }
}

/// `data:` payloads of each event in a server-sent event stream.
fn sse_payloads(body: &str) -> impl Iterator<Item = String> + '_ {
    body.split("\n\n").filter_map(|event| {
        let data: Vec<&str> = event
            .lines()
            .filter_map(|l| l.strip_prefix("data:"))
            .map(str::trim_start)
            .collect();
        (!data.is_empty()).then(|| data.join("\n"))
    })
}
