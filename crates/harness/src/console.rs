//! Page console forwarding.
//!
//! Messages are resolved one at a time by a single worker, so lines reach the
//! output in the order the page logged them even when argument lookups finish
//! out of order.

use headless_test_browser::{ConsoleMessage, Page};
use serde_json::Value;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct ConsoleQueue {
    tx: Option<mpsc::UnboundedSender<ConsoleMessage>>,
    worker: Option<JoinHandle<()>>,
}

impl ConsoleQueue {
    pub fn spawn(page: Arc<dyn Page>, mut out: Box<dyn Write + Send>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ConsoleMessage>();
        let worker = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let values = match page.console_values(&message).await {
                    Ok(values) => values,
                    Err(e) => {
                        debug!(kind = %message.kind, "Console arguments unavailable: {}", e);
                        message.args.clone()
                    }
                };
                let line = format_console(&values);
                if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
                    warn!("Failed to write console output: {}", e);
                }
            }
        });
        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    /// A handle for producers; the worker stops once every handle and the queue are gone.
    pub fn sender(&self) -> Option<ConsoleSender> {
        self.tx.clone().map(ConsoleSender)
    }

    /// Stop accepting messages and wait until every queued line is written.
    pub async fn finish(mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!("Console worker ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for ConsoleQueue {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

#[derive(Clone)]
pub struct ConsoleSender(mpsc::UnboundedSender<ConsoleMessage>);

impl ConsoleSender {
    pub fn push(&self, message: ConsoleMessage) {
        if self.0.send(message).is_err() {
            debug!("Console worker stopped; dropping message");
        }
    }
}

/// printf-style rendering of console arguments: `%s %d %i %f %j %o %O %c %%`
/// in a leading string, remaining arguments appended with spaces.
pub fn format_console(values: &[Value]) -> String {
    let Some((first, rest)) = values.split_first() else {
        return String::new();
    };
    let Value::String(template) = first else {
        return values.iter().map(display).collect::<Vec<_>>().join(" ");
    };

    let mut args = rest.iter();
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let Some(&spec) = chars.peek() else {
            out.push('%');
            break;
        };
        if spec == '%' {
            chars.next();
            out.push('%');
            continue;
        }
        if !matches!(spec, 's' | 'd' | 'i' | 'f' | 'j' | 'o' | 'O' | 'c') {
            out.push('%');
            continue;
        }
        let Some(arg) = args.next() else {
            out.push('%');
            continue;
        };
        chars.next();
        match spec {
            's' => out.push_str(&display(arg)),
            'd' => out.push_str(&number(arg, false)),
            'i' => out.push_str(&number(arg, true)),
            'f' => out.push_str(&number(arg, false)),
            'j' | 'o' | 'O' => out.push_str(&arg.to_string()),
            _ => {}
        }
    }

    for arg in args {
        out.push(' ');
        out.push_str(&display(arg));
    }
    out
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn number(value: &Value, integer: bool) -> String {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    match parsed {
        Some(n) if integer => format!("{}", n.trunc()),
        Some(n) => format!("{}", n),
        None => "NaN".to_string(),
    }
}
