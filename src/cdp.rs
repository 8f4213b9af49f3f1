//! [`RemoteChannel`] over the Chrome DevTools Protocol.
//!
//! One websocket to the browser endpoint; a dedicated page target is created and
//! attached in flat-session mode, and every page command carries its `sessionId`.

use crate::error::BridgeError;
use crate::sandbox::{Evaluation, RemoteChannel};
use crate::{t, t_args};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use regex::Regex;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};
use uuid::Uuid;

pub const BLANK_PAGE: &str = "about:blank";

/// How long a launched browser gets to print its DevTools endpoint.
pub const LAUNCH_TIMEOUT: Duration = Duration::from_secs(30);

const BROWSER_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
    "msedge",
];

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// First Chromium-family browser found on `PATH`.
pub fn find_browser() -> Option<PathBuf> {
    BROWSER_CANDIDATES
        .iter()
        .find_map(|name| which::which(name).ok())
}

fn endpoint_line() -> Option<&'static Regex> {
    static RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"DevTools listening on (ws://\S+)"))
        .as_ref()
        .ok()
}

/// Pull the websocket endpoint out of a browser stderr line.
pub fn parse_endpoint(line: &str) -> Option<String> {
    endpoint_line()?
        .captures(line)
        .map(|caps| caps[1].to_string())
}

/// A headless browser started for the duration of a run.
pub struct BrowserProcess {
    child: Child,
    profile_dir: PathBuf,
    endpoint: String,
}

impl BrowserProcess {
    pub async fn launch(command: &Path) -> Result<Self, BridgeError> {
        let profile_dir = std::env::temp_dir().join(format!("pagerun-{}", Uuid::new_v4()));
        let mut child = Command::new(command)
            .arg("--headless=new")
            .arg("--remote-debugging-port=0")
            .arg(format!("--user-data-dir={}", profile_dir.display()))
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg(BLANK_PAGE)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BridgeError::Launch {
                command: command.display().to_string(),
                source,
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BridgeError::NoEndpoint(t!("cdp-no-stderr")))?;
        let mut lines = BufReader::new(stderr).lines();

        let found = tokio::time::timeout(LAUNCH_TIMEOUT, async {
            while let Ok(Some(line)) = lines.next_line().await {
                trace!(target: "pagerun::browser", "{line}");
                if let Some(endpoint) = parse_endpoint(&line) {
                    return Some(endpoint);
                }
            }
            None
        })
        .await;

        let endpoint = match found {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => return Err(BridgeError::NoEndpoint(t!("cdp-browser-exited"))),
            Err(_) => {
                return Err(BridgeError::NoEndpoint(t_args!(
                    "cdp-launch-timeout",
                    "seconds" => LAUNCH_TIMEOUT.as_secs()
                )));
            }
        };

        // The rest of stderr goes to trace; an undrained pipe stalls the browser.
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                trace!(target: "pagerun::browser", "{line}");
            }
        });

        debug!("{}", t_args!("debug-browser-endpoint", "endpoint" => &endpoint));
        Ok(Self {
            child,
            profile_dir,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Drop for BrowserProcess {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
        let _ = std::fs::remove_dir_all(&self.profile_dir);
    }
}

pub struct CdpChannel {
    socket: Socket,
    next_id: u64,
    session_id: Option<String>,
    // Dropped after the socket, taking the browser down with the channel.
    _browser: Option<BrowserProcess>,
}

impl CdpChannel {
    /// Connect to a DevTools websocket. A browser endpoint gets its own fresh page
    /// target; a page endpoint (`/devtools/page/...`) is driven directly.
    pub async fn connect(endpoint: &str) -> Result<Self, BridgeError> {
        let (socket, _) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| BridgeError::Connect {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;
        let mut channel = Self {
            socket,
            next_id: 0,
            session_id: None,
            _browser: None,
        };

        if !endpoint.contains("/devtools/page/") {
            let target = channel
                .call("Target.createTarget", json!({ "url": BLANK_PAGE }))
                .await?;
            let target_id = string_field(&target, "targetId", "Target.createTarget")?;
            let attached = channel
                .call(
                    "Target.attachToTarget",
                    json!({ "targetId": target_id, "flatten": true }),
                )
                .await?;
            channel.session_id = Some(string_field(
                &attached,
                "sessionId",
                "Target.attachToTarget",
            )?);
        }
        channel.call("Page.enable", json!({})).await?;
        Ok(channel)
    }

    /// Start `browser` headless and connect to it.
    pub async fn launch(browser: &Path) -> Result<Self, BridgeError> {
        let process = BrowserProcess::launch(browser).await?;
        let mut channel = Self::connect(process.endpoint()).await?;
        channel._browser = Some(process);
        Ok(channel)
    }

    async fn call(&mut self, method: &str, params: Value) -> Result<Value, BridgeError> {
        self.next_id += 1;
        let id = self.next_id;
        let mut request = json!({ "id": id, "method": method, "params": params });
        if let Some(session) = &self.session_id {
            request["sessionId"] = json!(session);
        }
        debug!("{}", t_args!("debug-cdp-call", "id" => id, "method" => method));

        self.socket
            .send(Message::Text(request.to_string().into()))
            .await
            .map_err(|_| BridgeError::Disconnected)?;

        while let Some(frame) = self.socket.next().await {
            let text = match frame.map_err(|_| BridgeError::Disconnected)? {
                Message::Text(text) => text,
                Message::Close(_) => return Err(BridgeError::Disconnected),
                _ => continue,
            };
            let reply: Value = match serde_json::from_str(&text) {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("{}", t_args!("cdp-bad-frame", "error" => e));
                    continue;
                }
            };
            // Events and replies to other requests share the socket.
            if reply.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }
            if let Some(error) = reply.get("error") {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .unwrap_or_else(|| error.to_string());
                return Err(BridgeError::Protocol {
                    method: method.to_string(),
                    message,
                });
            }
            return Ok(reply.get("result").cloned().unwrap_or(Value::Null));
        }
        Err(BridgeError::Disconnected)
    }
}

fn string_field(value: &Value, field: &str, method: &str) -> Result<String, BridgeError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| BridgeError::Protocol {
            method: method.to_string(),
            message: t_args!("cdp-missing-field", "field" => field),
        })
}

/// Best description of a `Runtime.evaluate` exception.
pub fn describe_exception(details: &Value) -> String {
    details
        .pointer("/exception/description")
        .and_then(Value::as_str)
        .or_else(|| details.get("text").and_then(Value::as_str))
        .unwrap_or("evaluation threw")
        .to_string()
}

#[async_trait]
impl RemoteChannel for CdpChannel {
    async fn reset(&mut self) -> Result<(), BridgeError> {
        let result = self
            .call("Page.navigate", json!({ "url": BLANK_PAGE }))
            .await?;
        if let Some(error) = result.get("errorText").and_then(Value::as_str) {
            return Err(BridgeError::Navigation {
                url: BLANK_PAGE.to_string(),
                message: error.to_string(),
            });
        }
        Ok(())
    }

    async fn inject_script(&mut self, name: &str, source: &str) -> Result<(), BridgeError> {
        let expression = format!("{source}\n//# sourceURL={name}");
        let result = self
            .call(
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": false }),
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            return Err(BridgeError::Inject {
                name: name.to_string(),
                message: describe_exception(details),
            });
        }
        Ok(())
    }

    async fn evaluate(&mut self, expression: &str) -> Result<Evaluation, BridgeError> {
        let result = self
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": true,
                    "returnByValue": true,
                }),
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            return Ok(Evaluation::Threw(describe_exception(details)));
        }
        Ok(Evaluation::Value(
            result
                .pointer("/result/value")
                .cloned()
                .unwrap_or(Value::Null),
        ))
    }
}
