//! Orchestrates one test run: acquire a browser and page, wire the observers,
//! navigate to the harness document and wait for the page to settle.

use headless_test_browser::{LaunchOptions, Launcher, Page, PageEvent};
use headless_test_core::{Result, RunConfig, TestResult};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cleanup::CleanupStack;
use crate::completion::{self, CompletionSender};
use crate::console::{ConsoleQueue, ConsoleSender};
use crate::deps::{ModuleResolver, VendoredDeps};
use crate::interceptor::Interceptor;
use crate::nonce::Nonce;
use crate::preload::{PreloadScript, DONE_BINDING, REPORT_BINDING};
use crate::server::HttpServer;

const SANDBOX_ARGS: [&str; 2] = ["--no-sandbox", "--disable-setuid-sandbox"];

/// Where the page should be served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerRef {
    Address(SocketAddr),
    Url(Url),
    Str(String),
    /// Start an internal server that answers 404 for everything.
    None,
}

impl From<SocketAddr> for ServerRef {
    fn from(addr: SocketAddr) -> Self {
        Self::Address(addr)
    }
}

impl From<Url> for ServerRef {
    fn from(url: Url) -> Self {
        Self::Url(url)
    }
}

impl From<&str> for ServerRef {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for ServerRef {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Option<SocketAddr>> for ServerRef {
    fn from(addr: Option<SocketAddr>) -> Self {
        addr.map_or(Self::None, Self::Address)
    }
}

pub struct Controller {
    launcher: Arc<dyn Launcher>,
}

impl Controller {
    pub fn new(launcher: Arc<dyn Launcher>) -> Self {
        Self { launcher }
    }

    /// Run the configured resources in a fresh browser page.
    ///
    /// The done-hook runs once the run has settled and before any resource is
    /// released; cleanup failures are logged and never replace the outcome.
    pub async fn run(&self, server: impl Into<ServerRef>, mut config: RunConfig) -> Result<TestResult> {
        let done = config.take_done();
        let mut cleanup = CleanupStack::new();

        let outcome = self.drive(server.into(), &config, &mut cleanup).await;

        match &outcome {
            Ok(result) => info!(
                passed = result.passed().count(),
                pending = result.pending().count(),
                "Tests completed"
            ),
            Err(e) => warn!("Run failed: {}", e),
        }

        if let Some(hook) = done {
            hook().await;
        }
        cleanup.unwind().await;
        outcome
    }

    pub(crate) async fn drive(
        &self,
        server: ServerRef,
        config: &RunConfig,
        cleanup: &mut CleanupStack,
    ) -> Result<TestResult> {
        config.validate()?;
        let deps = VendoredDeps::load(&ModuleResolver::from_config(config)?).await?;

        let origin = resolve_origin(server, cleanup).await?;
        let nonce = Nonce::generate();
        let interceptor = Arc::new(Interceptor::new(&origin, &nonce, &deps)?);
        let preload = PreloadScript::new(config)?;

        let options = LaunchOptions {
            args: launch_args(&config.args, |key| std::env::var(key).ok()),
            headless: config.headless,
            binary: config.browser.clone(),
        };
        debug!(args = ?options.args, headless = options.headless, "Launching browser");
        let browser = self.launcher.launch(&options).await?;
        {
            let browser = browser.clone();
            cleanup.push("browser", move || async move { browser.close().await });
        }

        let page = browser.page().await?;
        {
            let page = page.clone();
            cleanup.push("page", move || async move { page.close().await });
        }

        let events = page.events().await?;
        let (completion, settlement) = completion::channel();
        let console = config
            .log
            .then(|| ConsoleQueue::spawn(page.clone(), Box::new(std::io::stdout())));
        let dispatcher = AbortOnDrop(Some(tokio::spawn(dispatch(
            page.clone(),
            events,
            completion,
            console.as_ref().and_then(|c| c.sender()),
        ))));

        page.expose_binding(DONE_BINDING).await?;
        page.expose_binding(REPORT_BINDING).await?;
        page.add_init_script(preload.source()).await?;
        page.intercept(interceptor.clone()).await?;

        info!(url = %interceptor.harness_url(), "Opening harness");
        page.navigate(interceptor.harness_url().as_str()).await?;

        let outcome = settlement.wait(config.deadline()).await;

        dispatcher.stop().await;
        if let Some(console) = console {
            console.finish().await;
        }
        outcome
    }
}

/// Route page events to the completion channel and the console queue.
async fn dispatch(
    page: Arc<dyn Page>,
    mut events: mpsc::UnboundedReceiver<PageEvent>,
    mut completion: CompletionSender,
    console: Option<ConsoleSender>,
) {
    while let Some(event) = events.recv().await {
        match event {
            PageEvent::Console(message) => {
                if let Some(console) = &console {
                    console.push(message);
                }
            }
            PageEvent::Dialog { kind, message } => {
                debug!(%kind, %message, "Dismissing dialog");
                let page = page.clone();
                tokio::spawn(async move {
                    if let Err(e) = page.dismiss_dialog().await {
                        warn!("Failed to dismiss dialog: {}", e);
                    }
                });
            }
            PageEvent::Exception(exception) => completion.fail(exception),
            PageEvent::Binding { name, payload } => match name.as_str() {
                DONE_BINDING => completion.complete(),
                REPORT_BINDING => completion.report(&payload),
                other => debug!(binding = other, "Ignoring unknown binding"),
            },
            PageEvent::Log { level, text } => {
                if level == "error" {
                    warn!(target: "page", "{}", text);
                } else {
                    debug!(target: "page", %level, "{}", text);
                }
            }
            PageEvent::Crashed => error!("Page crashed"),
        }
    }
    debug!("Page event stream closed");
}

struct AbortOnDrop(Option<JoinHandle<()>>);

impl AbortOnDrop {
    /// Abort and wait, so nothing the task held outlives this call.
    async fn stop(mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = &self.0 {
            handle.abort();
        }
    }
}

/// Base URL the harness is rooted at. Without a server, starts a 404-only one
/// and registers its shutdown.
pub(crate) async fn resolve_origin(server: ServerRef, cleanup: &mut CleanupStack) -> Result<Url> {
    let url = match server {
        ServerRef::Address(addr) => address_url(addr)?,
        ServerRef::Url(url) => url,
        ServerRef::Str(s) if s.contains("://") => Url::parse(&s)?,
        ServerRef::Str(s) => Url::parse(&format!("http://{}", s))?,
        ServerRef::None => {
            let server = HttpServer::noop().await?;
            let url = server.url()?;
            cleanup.push("server", move || server.shutdown());
            url
        }
    };
    Ok(with_trailing_slash(url))
}

fn address_url(addr: SocketAddr) -> Result<Url> {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    Ok(Url::parse(&format!("http://{}/", SocketAddr::new(ip, addr.port())))?)
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Launch arguments, plus the sandbox switches when running under CI.
pub fn launch_args(args: &[String], env: impl Fn(&str) -> Option<String>) -> Vec<String> {
    let mut resolved = args.to_vec();
    if env("CI").is_some() || env("TRAVIS").is_some() {
        for flag in SANDBOX_ARGS {
            if !resolved.iter().any(|a| a == flag) {
                resolved.push(flag.to_string());
            }
        }
    }
    resolved
}
