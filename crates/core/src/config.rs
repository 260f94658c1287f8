use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Hook run once when a run settles, before any resource is released.
pub type DoneHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// A resource injected into the harness page, in declaration order.
///
/// Serialized as a bare string for paths and `{"code": "..."}` for inline modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Resource {
    Path(String),
    InlineCode { code: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Script,
    Stylesheet,
    Inline,
    Unknown,
}

impl Resource {
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path(path.into())
    }

    pub fn inline(code: impl Into<String>) -> Self {
        Self::InlineCode { code: code.into() }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::InlineCode { .. } => ResourceKind::Inline,
            Self::Path(p) if p.ends_with(".js") => ResourceKind::Script,
            Self::Path(p) if p.ends_with(".css") => ResourceKind::Stylesheet,
            Self::Path(_) => ResourceKind::Unknown,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(p) => f.write_str(p),
            Self::InlineCode { code } => write!(f, "<inline {} bytes>", code.len()),
        }
    }
}

/// Options for a single test run.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    /// Extra browser launch arguments.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default, alias = "resources")]
    pub load: Vec<Resource>,
    /// Merged verbatim into `mocha.setup`.
    #[serde(default)]
    pub driver: Map<String, Value>,
    /// Per-test timeout in milliseconds, forwarded to the framework.
    #[serde(default)]
    pub timeout: Option<i64>,
    /// Upper bound in milliseconds on the whole run; unbounded when absent.
    #[serde(default)]
    pub deadline: Option<u64>,
    /// Forward page console output to stdout.
    #[serde(default = "default_log")]
    pub log: bool,
    #[serde(default)]
    pub browser: Option<PathBuf>,
    /// Directory containing `mocha/` and `chai/`.
    #[serde(default)]
    pub node_modules: Option<PathBuf>,
    /// Project directory; its `node_modules` chain is searched before the working directory's.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(skip)]
    pub done: Option<DoneHook>,
}

fn default_headless() -> bool {
    true
}

fn default_log() -> bool {
    true
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            headless: default_headless(),
            load: Vec::new(),
            driver: Map::new(),
            timeout: None,
            deadline: None,
            log: default_log(),
            browser: None,
            node_modules: None,
            root: None,
            done: None,
        }
    }
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("args", &self.args)
            .field("headless", &self.headless)
            .field("load", &self.load)
            .field("driver", &self.driver)
            .field("timeout", &self.timeout)
            .field("deadline", &self.deadline)
            .field("log", &self.log)
            .field("browser", &self.browser)
            .field("node_modules", &self.node_modules)
            .field("root", &self.root)
            .field("done", &self.done.as_ref().map(|_| "<hook>"))
            .finish()
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RunConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn with_done<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.done = Some(Box::new(move || Box::pin(hook())));
        self
    }

    /// Rejects options the page could never honour, before anything is launched.
    pub fn validate(&self) -> Result<()> {
        for resource in &self.load {
            if resource.kind() == ResourceKind::Unknown {
                return Err(Error::Config(format!(
                    "unknown resource type (expected .js or .css): {}",
                    resource
                )));
            }
        }
        if self.deadline == Some(0) {
            return Err(Error::Config("deadline must be greater than zero".to_string()));
        }
        Ok(())
    }

    /// Positive framework timeout, if any. Zero or negative values defer to the framework default.
    pub fn framework_timeout(&self) -> Option<i64> {
        self.timeout.filter(|t| *t > 0)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline.map(Duration::from_millis)
    }

    pub fn take_done(&mut self) -> Option<DoneHook> {
        self.done.take()
    }
}
