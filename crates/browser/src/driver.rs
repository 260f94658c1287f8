//! Capabilities the harness needs from a browser, independent of the wire protocol.

use async_trait::async_trait;
use headless_test_core::Result;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub args: Vec<String>,
    pub headless: bool,
    /// Explicit browser executable; discovered on the system when absent.
    pub binary: Option<PathBuf>,
}

#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> Result<Arc<dyn Browser>>;
}

#[async_trait]
pub trait Browser: Send + Sync {
    /// The first open page, or a freshly created one.
    async fn page(&self) -> Result<Arc<dyn Page>>;

    /// Disconnect and terminate the browser process.
    async fn close(&self) -> Result<()>;
}

/// A `console.*` call. Arguments are still remote handles; see [`Page::console_values`].
#[derive(Debug, Clone)]
pub struct ConsoleMessage {
    pub kind: String,
    pub args: Vec<Value>,
}

/// An exception nobody in the page caught.
#[derive(Debug, Clone, PartialEq)]
pub struct PageException {
    /// Error class name (`TypeError`, `TestFailureError`, ...) when an Error object was thrown.
    pub name: Option<String>,
    pub message: String,
    pub stack: Option<String>,
}

impl PageException {
    /// Build from CDP `Runtime.exceptionThrown` `exceptionDetails`.
    pub fn from_details(details: &Value) -> Self {
        let exception = details.get("exception");
        let is_error = exception
            .and_then(|e| e.get("subtype"))
            .and_then(|v| v.as_str())
            == Some("error");
        let name = if is_error {
            exception
                .and_then(|e| e.get("className"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        } else {
            None
        };
        let description = exception
            .and_then(|e| e.get("description"))
            .and_then(|v| v.as_str());

        let message = match (description, exception.and_then(|e| e.get("value"))) {
            (Some(desc), _) if is_error => {
                let first = desc.lines().next().unwrap_or_default();
                match name.as_deref().and_then(|n| first.strip_prefix(n)) {
                    Some(rest) => rest.trim_start_matches(':').trim().to_string(),
                    None => first.to_string(),
                }
            }
            (Some(desc), _) => desc.to_string(),
            (None, Some(Value::String(s))) => s.clone(),
            (None, Some(v)) if !v.is_null() => v.to_string(),
            _ => details
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown page error")
                .to_string(),
        };

        Self {
            name,
            message,
            stack: if is_error {
                description.map(|s| s.to_string())
            } else {
                None
            },
        }
    }
}

impl std::fmt::Display for PageException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}: {}", name, self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PageEvent {
    Console(ConsoleMessage),
    Dialog { kind: String, message: String },
    Exception(PageException),
    Binding { name: String, payload: String },
    /// Browser-side log entry (network failures, violations, ...).
    Log { level: String, text: String },
    Crashed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Interception {
    Continue,
    Fulfill {
        status: u16,
        content_type: &'static str,
        body: Arc<str>,
    },
}

/// Decides, per request, whether to answer it locally or let it through.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, url: &str) -> Interception;
}

#[async_trait]
pub trait Page: Send + Sync {
    /// Ordered stream of page events. Subscribe before navigating.
    async fn events(&self) -> Result<mpsc::UnboundedReceiver<PageEvent>>;

    /// Fetch the JSON values behind a console message's arguments.
    async fn console_values(&self, message: &ConsoleMessage) -> Result<Vec<Value>>;

    /// Expose `window.<name>()`; invocations arrive as [`PageEvent::Binding`].
    async fn expose_binding(&self, name: &str) -> Result<()>;

    /// Run `source` before any page script on every subsequent navigation.
    async fn add_init_script(&self, source: &str) -> Result<()>;

    async fn intercept(&self, handler: Arc<dyn RequestHandler>) -> Result<()>;

    async fn navigate(&self, url: &str) -> Result<()>;

    async fn dismiss_dialog(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exception_from_error_object() {
        let details = json!({
            "text": "Uncaught",
            "exception": {
                "type": "object",
                "subtype": "error",
                "className": "TestFailureError",
                "description": "TestFailureError: 2 tests failed\n    at runner (preload.js:120:11)"
            }
        });
        let ex = PageException::from_details(&details);
        assert_eq!(ex.name.as_deref(), Some("TestFailureError"));
        assert_eq!(ex.message, "2 tests failed");
        assert!(ex.stack.unwrap().contains("preload.js"));
    }

    #[test]
    fn test_exception_from_thrown_string() {
        let details = json!({
            "text": "Uncaught",
            "exception": {"type": "string", "value": "boom"}
        });
        let ex = PageException::from_details(&details);
        assert_eq!(ex.name, None);
        assert_eq!(ex.message, "boom");
        assert_eq!(ex.to_string(), "boom");
    }

    #[test]
    fn test_exception_without_payload_uses_text() {
        let details = json!({"text": "Script error."});
        let ex = PageException::from_details(&details);
        assert_eq!(ex.message, "Script error.");
    }
}
