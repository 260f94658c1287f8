//! Low-level Chrome DevTools Protocol (CDP) client over WebSocket.
//!
//! One client per debugging target (the browser itself or a single page).
//! Commands are correlated with responses by id; events fan out to every
//! subscriber of their method in the order the browser emitted them.

use headless_test_core::{Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// A CDP event as delivered to subscribers.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

type Listeners = Arc<Mutex<HashMap<String, Vec<mpsc::UnboundedSender<CdpEvent>>>>>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// A CDP WebSocket client that can send commands and receive responses/events.
pub struct CdpClient {
    /// Sender to write messages to the WebSocket.
    ws_tx: mpsc::Sender<String>,
    /// Pending command responses, keyed by request ID.
    pending: Pending,
    next_id: AtomicU64,
    /// Event listeners (domain.event -> channels).
    event_listeners: Listeners,
    _reader_handle: tokio::task::JoinHandle<()>,
    _writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a Chrome CDP WebSocket endpoint.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| Error::Cdp(format!("failed to connect to {}: {}", ws_url, e)))?;

        let (mut ws_sink, mut ws_stream_read) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let pending_clone = pending.clone();

        let event_listeners: Listeners = Arc::new(Mutex::new(HashMap::new()));
        let events_clone = event_listeners.clone();

        // Writer task: owns the sink, forwards messages from channel
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
        });

        // Reader task: dispatches responses by id and events by method
        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_stream_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        let Ok(val) = serde_json::from_str::<Value>(&text) else {
                            warn!("Discarding malformed CDP frame");
                            continue;
                        };
                        if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                            if let Some(tx) = pending_clone.lock().await.remove(&id) {
                                let _ = tx.send(val);
                            }
                        } else if let Some(method) = val.get("method").and_then(|v| v.as_str()) {
                            let mut listeners = events_clone.lock().await;
                            if let Some(senders) = listeners.get_mut(method) {
                                let event = CdpEvent {
                                    method: method.to_string(),
                                    params: val.get("params").cloned().unwrap_or(Value::Null),
                                };
                                senders.retain(|tx| tx.send(event.clone()).is_ok());
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by remote");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            // Closing every channel lets waiters observe the disconnect.
            events_clone.lock().await.clear();
            pending_clone.lock().await.clear();
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            event_listeners,
            _reader_handle: reader_handle,
            _writer_handle: writer_handle,
        })
    }

    /// Send a CDP command and wait for the response.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        self.ws_tx
            .send(msg.to_string())
            .await
            .map_err(|e| Error::Cdp(format!("failed to send {}: {}", method, e)))?;

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.get("error") {
                    Err(Error::Cdp(format!("{} failed: {}", method, error)))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err(Error::Cdp(format!("connection closed during {}", method))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Cdp(format!(
                    "{} timed out after {}s",
                    method,
                    COMMAND_TIMEOUT.as_secs()
                )))
            }
        }
    }

    /// Subscribe to several CDP events through one ordered channel.
    ///
    /// Events of different methods keep their relative order because the
    /// reader task delivers them one frame at a time.
    pub async fn subscribe(&self, methods: &[&str]) -> mpsc::UnboundedReceiver<CdpEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut listeners = self.event_listeners.lock().await;
        for method in methods {
            listeners
                .entry((*method).to_string())
                .or_default()
                .push(tx.clone());
        }
        rx
    }

    /// Enable a CDP domain (e.g., "Page", "Runtime", "Log").
    pub async fn enable_domain(&self, domain: &str) -> Result<()> {
        self.send_command(&format!("{}.enable", domain), json!({}))
            .await?;
        Ok(())
    }

    /// Start navigating. The result carries `errorText` when the load failed outright.
    pub async fn navigate(&self, url: &str) -> Result<Value> {
        self.send_command("Page.navigate", json!({"url": url}))
            .await
    }

    /// Register a script evaluated before any page script on every new document.
    pub async fn add_script_on_new_document(&self, source: &str) -> Result<String> {
        let result = self
            .send_command(
                "Page.addScriptToEvaluateOnNewDocument",
                json!({"source": source}),
            )
            .await?;
        Ok(result
            .get("identifier")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    /// Install `window.<name>(payload)`; calls arrive as `Runtime.bindingCalled`.
    pub async fn add_binding(&self, name: &str) -> Result<()> {
        self.send_command("Runtime.addBinding", json!({"name": name}))
            .await?;
        Ok(())
    }

    /// Call a function on a remote object, returning its value by JSON.
    pub async fn call_function_on(
        &self,
        object_id: &str,
        function_declaration: &str,
    ) -> Result<Value> {
        self.send_command(
            "Runtime.callFunctionOn",
            json!({
                "objectId": object_id,
                "functionDeclaration": function_declaration,
                "returnByValue": true,
            }),
        )
        .await
    }

    // ─── Target management ────────────────────────────────────────────

    /// Create a new page target (tab) with the given URL.
    pub async fn create_target(&self, url: &str) -> Result<String> {
        let result = self
            .send_command("Target.createTarget", json!({"url": url}))
            .await?;
        result
            .get("targetId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Cdp("no targetId returned from createTarget".to_string()))
    }

    /// Close the browser this client is attached to (browser-level clients only).
    pub async fn close_browser(&self) -> Result<()> {
        self.send_command("Browser.close", json!({})).await?;
        Ok(())
    }

    // ─── Dialog handling ──────────────────────────────────────────────

    /// Handle a JavaScript dialog (alert/confirm/prompt/beforeunload).
    pub async fn handle_dialog(&self, accept: bool, prompt_text: Option<&str>) -> Result<()> {
        let mut params = json!({"accept": accept});
        if let Some(text) = prompt_text {
            params["promptText"] = json!(text);
        }
        self.send_command("Page.handleJavaScriptDialog", params).await?;
        Ok(())
    }

    // ─── Network interception (Fetch domain) ──────────────────────────

    /// Enable the Fetch domain for network interception.
    /// `patterns` is an array of RequestPattern objects, e.g.:
    /// [{"urlPattern": "*", "requestStage": "Request"}]
    pub async fn enable_fetch(&self, patterns: Vec<Value>) -> Result<()> {
        self.send_command(
            "Fetch.enable",
            json!({"patterns": patterns, "handleAuthRequests": false}),
        )
        .await?;
        Ok(())
    }

    /// Let a paused request proceed unmodified.
    pub async fn fetch_continue(&self, request_id: &str) -> Result<()> {
        self.send_command("Fetch.continueRequest", json!({"requestId": request_id}))
            .await?;
        Ok(())
    }

    /// Fulfill a paused request with a custom response.
    pub async fn fetch_fulfill(
        &self,
        request_id: &str,
        response_code: u16,
        headers: Vec<Value>,
        body: &str,
    ) -> Result<()> {
        use base64::Engine;
        // Body must be base64-encoded
        let encoded = base64::engine::general_purpose::STANDARD.encode(body.as_bytes());
        self.send_command(
            "Fetch.fulfillRequest",
            json!({
                "requestId": request_id,
                "responseCode": response_code,
                "responseHeaders": headers,
                "body": encoded,
            }),
        )
        .await?;
        Ok(())
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self._reader_handle.abort();
        self._writer_handle.abort();
    }
}
