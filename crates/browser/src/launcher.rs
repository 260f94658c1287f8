//! Chrome/Chromium process management.
//!
//! Launches a browser with a private profile and a remote debugging port,
//! then connects CDP clients to the browser and to its first page target.

use async_trait::async_trait;
use headless_test_core::{Error, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cdp::CdpClient;
use crate::driver::{Browser, LaunchOptions, Launcher, Page};
use crate::page::ChromePage;

/// Environment variable naming an explicit browser executable.
pub const BROWSER_ENV: &str = "HEADLESS_TEST_BROWSER";

const CDP_READY_TIMEOUT: Duration = Duration::from_secs(15);

/// Launches local Chromium-family browsers.
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    ready_timeout: Duration,
}

impl Default for ChromeLauncher {
    fn default() -> Self {
        Self {
            ready_timeout: CDP_READY_TIMEOUT,
        }
    }
}

impl ChromeLauncher {
    /// How long to wait for the DevTools endpoint after spawning.
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    fn resolve_binary(&self, options: &LaunchOptions) -> Result<PathBuf> {
        if let Some(path) = &options.binary {
            return Ok(path.clone());
        }
        if let Some(path) = std::env::var_os(BROWSER_ENV).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(path));
        }
        find_browser_binary()
            .map(PathBuf::from)
            .ok_or_else(|| {
                Error::Launch(format!(
                    "no Chrome or Chromium found; install one or set {}",
                    BROWSER_ENV
                ))
            })
    }
}

#[async_trait]
impl Launcher for ChromeLauncher {
    async fn launch(&self, options: &LaunchOptions) -> Result<Arc<dyn Browser>> {
        let browser_path = self.resolve_binary(options)?;

        let debug_port = find_free_port().await?;
        let user_data_dir = std::env::temp_dir().join(format!(
            "headless-test-{}-{}",
            std::process::id(),
            debug_port
        ));
        std::fs::create_dir_all(&user_data_dir)
            .map_err(|e| Error::Launch(format!("failed to create user data dir: {}", e)))?;

        let args = build_browser_args(debug_port, &user_data_dir, options);

        info!(
            port = debug_port,
            headless = options.headless,
            browser = %browser_path.display(),
            "Launching browser"
        );
        debug!(?args, "Browser arguments");

        let spawned = Command::new(&browser_path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                remove_profile(&user_data_dir).await;
                return Err(Error::Launch(format!(
                    "failed to start {}: {}",
                    browser_path.display(),
                    e
                )));
            }
        };

        let connected = async {
            let ws_url = wait_for_cdp_ready(debug_port, self.ready_timeout).await?;
            let cdp = CdpClient::connect(&ws_url).await?;
            Ok::<_, Error>((ws_url, cdp))
        }
        .await;
        let (browser_ws_url, cdp) = match connected {
            Ok(connected) => connected,
            Err(e) => {
                let _ = child.kill().await;
                remove_profile(&user_data_dir).await;
                return Err(Error::Launch(e.to_string()));
            }
        };

        info!(ws_url = %browser_ws_url, "CDP connection established (browser target)");

        Ok(Arc::new(ChromeBrowser {
            debug_port,
            cdp,
            process: Mutex::new(Some(child)),
            user_data_dir,
        }))
    }
}

/// A running browser process with its browser-level CDP connection.
pub struct ChromeBrowser {
    debug_port: u16,
    cdp: CdpClient,
    process: Mutex<Option<Child>>,
    user_data_dir: PathBuf,
}

#[async_trait]
impl Browser for ChromeBrowser {
    async fn page(&self) -> Result<Arc<dyn Page>> {
        let ws_url = match get_page_ws_url(self.debug_port).await {
            Ok(url) => url,
            Err(e) => {
                debug!("No existing page target ({}), creating one", e);
                let target_id = self.cdp.create_target("about:blank").await?;
                get_target_ws_url(self.debug_port, &target_id).await?
            }
        };
        let page = ChromePage::attach(&ws_url).await?;
        Ok(Arc::new(page))
    }

    async fn close(&self) -> Result<()> {
        let Some(mut child) = self.process.lock().await.take() else {
            return Ok(());
        };
        // Try graceful close via CDP first
        if let Err(e) = self.cdp.close_browser().await {
            debug!("CDP Browser.close failed (may already be closed): {}", e);
        }
        if tokio::time::timeout(Duration::from_secs(5), child.wait()).await.is_err() {
            warn!("Browser did not exit after Browser.close, killing it");
            let _ = child.kill().await;
        }
        remove_profile(&self.user_data_dir).await;
        Ok(())
    }
}

impl Drop for ChromeBrowser {
    fn drop(&mut self) {
        // Best-effort kill on drop
        if let Some(child) = self.process.get_mut().as_mut() {
            let _ = child.start_kill();
        }
    }
}

async fn remove_profile(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        debug!(dir = %dir.display(), "Failed to remove profile dir: {}", e);
    }
}

/// Build the command line for a Chromium-family browser.
fn build_browser_args(debug_port: u16, user_data_dir: &Path, options: &LaunchOptions) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--metrics-recording-only".to_string(),
        "--safebrowsing-disable-auto-update".to_string(),
        "--password-store=basic".to_string(),
    ];
    if options.headless {
        args.push("--headless=new".to_string());
    }
    args.extend(options.args.iter().cloned());
    args.push("about:blank".to_string());
    args
}

/// Find a Chrome or Chromium binary on the system.
pub fn find_browser_binary() -> Option<String> {
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        &[
            "google-chrome", "google-chrome-stable",
            "chromium", "chromium-browser",
            "/usr/bin/google-chrome", "/usr/bin/chromium",
        ]
    } else {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    };

    for &candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok() {
            return Some(candidate.to_string());
        }
    }
    None
}

/// Find a free TCP port.
async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

/// Wait for the CDP endpoint to come up. Polls /json/version until it
/// reports the browser WebSocket URL.
async fn wait_for_cdp_ready(port: u16, timeout: Duration) -> Result<String> {
    let start = std::time::Instant::now();
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if start.elapsed() > timeout {
            return Err(Error::Launch(format!(
                "CDP not ready after {}s on port {}",
                timeout.as_secs(),
                port
            )));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

async fn list_targets(port: u16) -> Option<Vec<Value>> {
    let url = format!("http://127.0.0.1:{}/json/list", port);
    let resp = reqwest::get(&url).await.ok()?;
    resp.json().await.ok()
}

/// WebSocket URL of the first "page" target.
/// Retries a few times since the page target may not appear immediately.
pub async fn get_page_ws_url(port: u16) -> Result<String> {
    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        let Some(targets) = list_targets(port).await else {
            continue;
        };
        if let Some(ws_url) = first_page_ws_url(&targets) {
            return Ok(ws_url);
        }
    }

    Err(Error::Cdp("no page target found after retries".to_string()))
}

/// Resolve a targetId to its WebSocket debugger URL via /json/list.
pub async fn get_target_ws_url(port: u16, target_id: &str) -> Result<String> {
    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        let Some(targets) = list_targets(port).await else {
            continue;
        };
        let found = targets
            .iter()
            .filter(|t| t.get("id").or_else(|| t.get("targetId")).and_then(|v| v.as_str()) == Some(target_id))
            .find_map(|t| t.get("webSocketDebuggerUrl").and_then(|v| v.as_str()));
        if let Some(ws_url) = found {
            return Ok(ws_url.to_string());
        }
    }

    Err(Error::Cdp(format!(
        "no WebSocket URL found for target '{}' after retries",
        target_id
    )))
}

fn first_page_ws_url(targets: &[Value]) -> Option<String> {
    targets
        .iter()
        .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
        .find_map(|t| t.get("webSocketDebuggerUrl").and_then(|v| v.as_str()))
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_headless_args() {
        let options = LaunchOptions {
            args: vec!["--no-sandbox".to_string()],
            headless: true,
            binary: None,
        };
        let args = build_browser_args(9222, Path::new("/tmp/profile"), &options);
        assert_eq!(args[0], "--remote-debugging-port=9222");
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("about:blank"));
    }

    #[test]
    fn test_headed_args_omit_headless() {
        let options = LaunchOptions {
            headless: false,
            ..Default::default()
        };
        let args = build_browser_args(9222, Path::new("/tmp/profile"), &options);
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
    }

    #[test]
    fn test_first_page_skips_other_targets() {
        let targets = vec![
            json!({"type": "service_worker", "webSocketDebuggerUrl": "ws://sw"}),
            json!({"type": "page", "webSocketDebuggerUrl": "ws://page"}),
        ];
        assert_eq!(first_page_ws_url(&targets).as_deref(), Some("ws://page"));
        assert_eq!(first_page_ws_url(&[]), None);
    }

    fn leftover_profiles() -> Vec<PathBuf> {
        let prefix = format!("headless-test-{}-", std::process::id());
        std::fs::read_dir(std::env::temp_dir())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
            .map(|entry| entry.path())
            .collect()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_launch_removes_profile() {
        let launcher = ChromeLauncher::default().with_ready_timeout(Duration::from_millis(300));
        for binary in ["/nonexistent/chrome", "true"] {
            let options = LaunchOptions {
                binary: Some(PathBuf::from(binary)),
                ..Default::default()
            };
            let err = launcher.launch(&options).await.err().unwrap();
            assert!(matches!(err, Error::Launch(_)), "{}", binary);
        }
        assert!(leftover_profiles().is_empty(), "{:?}", leftover_profiles());
    }

    #[test]
    fn test_explicit_binary_wins() {
        let launcher = ChromeLauncher::default();
        let options = LaunchOptions {
            binary: Some(PathBuf::from("/opt/chrome/chrome")),
            ..Default::default()
        };
        assert_eq!(launcher.resolve_binary(&options).unwrap(), PathBuf::from("/opt/chrome/chrome"));
    }
}
