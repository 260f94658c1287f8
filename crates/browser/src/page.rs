//! A single page target driven over its own CDP connection.

use async_trait::async_trait;
use headless_test_core::{Error, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cdp::{CdpClient, CdpEvent};
use crate::driver::{ConsoleMessage, Interception, Page, PageEvent, PageException, RequestHandler};

const CONSOLE_API_CALLED: &str = "Runtime.consoleAPICalled";
const EXCEPTION_THROWN: &str = "Runtime.exceptionThrown";
const BINDING_CALLED: &str = "Runtime.bindingCalled";
const DIALOG_OPENING: &str = "Page.javascriptDialogOpening";
const LOG_ENTRY_ADDED: &str = "Log.entryAdded";
const TARGET_CRASHED: &str = "Inspector.targetCrashed";
const REQUEST_PAUSED: &str = "Fetch.requestPaused";

const RETURN_THIS: &str = "function() { return this; }";

pub struct ChromePage {
    cdp: Arc<CdpClient>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ChromePage {
    /// Connect to a page target and enable the domains the harness listens on.
    pub async fn attach(ws_url: &str) -> Result<Self> {
        let cdp = CdpClient::connect(ws_url).await?;
        cdp.enable_domain("Page").await?;
        cdp.enable_domain("Runtime").await?;
        cdp.enable_domain("Log").await?;
        // optional, not every build exposes it
        cdp.enable_domain("Inspector").await.ok();
        debug!(ws_url, "Attached to page target");
        Ok(Self {
            cdp: Arc::new(cdp),
            tasks: std::sync::Mutex::new(Vec::new()),
        })
    }

    fn track(&self, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(handle);
        }
    }

    fn abort_tasks(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

#[async_trait]
impl Page for ChromePage {
    async fn events(&self) -> Result<mpsc::UnboundedReceiver<PageEvent>> {
        let mut raw = self
            .cdp
            .subscribe(&[
                CONSOLE_API_CALLED,
                EXCEPTION_THROWN,
                BINDING_CALLED,
                DIALOG_OPENING,
                LOG_ENTRY_ADDED,
                TARGET_CRASHED,
            ])
            .await;
        let (tx, rx) = mpsc::unbounded_channel();
        self.track(tokio::spawn(async move {
            while let Some(event) = raw.recv().await {
                if let Some(mapped) = map_event(&event) {
                    if tx.send(mapped).is_err() {
                        break;
                    }
                }
            }
        }));
        Ok(rx)
    }

    async fn console_values(&self, message: &ConsoleMessage) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(message.args.len());
        for arg in &message.args {
            values.push(self.remote_value(arg).await);
        }
        Ok(values)
    }

    async fn expose_binding(&self, name: &str) -> Result<()> {
        self.cdp.add_binding(name).await
    }

    async fn add_init_script(&self, source: &str) -> Result<()> {
        let id = self.cdp.add_script_on_new_document(source).await?;
        debug!(identifier = %id, bytes = source.len(), "Installed init script");
        Ok(())
    }

    async fn intercept(&self, handler: Arc<dyn RequestHandler>) -> Result<()> {
        let mut paused = self.cdp.subscribe(&[REQUEST_PAUSED]).await;
        let cdp = self.cdp.clone();
        self.track(tokio::spawn(async move {
            while let Some(event) = paused.recv().await {
                let request_id = event.params["requestId"].as_str().unwrap_or_default();
                let url = event.params["request"]["url"].as_str().unwrap_or_default();
                let outcome = match handler.handle(url) {
                    Interception::Continue => cdp.fetch_continue(request_id).await,
                    Interception::Fulfill {
                        status,
                        content_type,
                        body,
                    } => {
                        debug!(url, status, "Fulfilling intercepted request");
                        let headers = vec![json!({"name": "Content-Type", "value": content_type})];
                        cdp.fetch_fulfill(request_id, status, headers, &body).await
                    }
                };
                if let Err(e) = outcome {
                    warn!(url, "Failed to resolve intercepted request: {}", e);
                }
            }
        }));
        self.cdp
            .enable_fetch(vec![json!({"urlPattern": "*", "requestStage": "Request"})])
            .await
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        let result = self
            .cdp
            .navigate(url)
            .await
            .map_err(|e| Error::Navigation(format!("{}: {}", url, e)))?;
        if let Some(error_text) = result.get("errorText").and_then(|v| v.as_str()) {
            return Err(Error::Navigation(format!("{}: {}", url, error_text)));
        }
        Ok(())
    }

    async fn dismiss_dialog(&self) -> Result<()> {
        self.cdp.handle_dialog(false, None).await
    }

    async fn close(&self) -> Result<()> {
        self.abort_tasks();
        self.cdp.send_command("Page.close", json!({})).await?;
        Ok(())
    }
}

impl ChromePage {
    /// Resolve one remote object to JSON. Objects need an extra round-trip;
    /// values that cannot be serialized fall back to their description.
    async fn remote_value(&self, arg: &Value) -> Value {
        if let Some(value) = arg.get("value") {
            return value.clone();
        }
        if let Some(unserializable) = arg.get("unserializableValue").and_then(|v| v.as_str()) {
            return Value::String(unserializable.to_string());
        }
        let description = arg
            .get("description")
            .and_then(|v| v.as_str())
            .map(|s| Value::String(s.to_string()));
        if let Some(object_id) = arg.get("objectId").and_then(|v| v.as_str()) {
            match self.cdp.call_function_on(object_id, RETURN_THIS).await {
                Ok(result) => {
                    if let Some(value) = result.get("result").and_then(|r| r.get("value")) {
                        return value.clone();
                    }
                }
                Err(e) => debug!("Could not fetch console argument by value: {}", e),
            }
        }
        match arg.get("type").and_then(|v| v.as_str()) {
            Some("undefined") => Value::String("undefined".to_string()),
            _ => description.unwrap_or(Value::Null),
        }
    }
}

impl Drop for ChromePage {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

/// Translate a raw CDP event into a page event; unrelated payloads map to `None`.
fn map_event(event: &CdpEvent) -> Option<PageEvent> {
    let params = &event.params;
    match event.method.as_str() {
        CONSOLE_API_CALLED => Some(PageEvent::Console(ConsoleMessage {
            kind: params["type"].as_str().unwrap_or("log").to_string(),
            args: params["args"].as_array().cloned().unwrap_or_default(),
        })),
        EXCEPTION_THROWN => Some(PageEvent::Exception(PageException::from_details(
            &params["exceptionDetails"],
        ))),
        BINDING_CALLED => Some(PageEvent::Binding {
            name: params["name"].as_str()?.to_string(),
            payload: params["payload"].as_str().unwrap_or_default().to_string(),
        }),
        DIALOG_OPENING => Some(PageEvent::Dialog {
            kind: params["type"].as_str().unwrap_or_default().to_string(),
            message: params["message"].as_str().unwrap_or_default().to_string(),
        }),
        LOG_ENTRY_ADDED => Some(PageEvent::Log {
            level: params["entry"]["level"].as_str().unwrap_or("info").to_string(),
            text: params["entry"]["text"].as_str().unwrap_or_default().to_string(),
        }),
        TARGET_CRASHED => Some(PageEvent::Crashed),
        _ => None,
    }
}
