//! End-to-end runs against a real Chrome/Chromium with the real mocha and chai.
//!
//! Marked ignored because they need a browser (found on the system or via
//! `HEADLESS_TEST_BROWSER`) and `mocha/mocha.js` plus `chai/chai.js` in a
//! `node_modules` directory (`HEADLESS_TEST_NODE_MODULES` or any ancestor of
//! the working directory). Run with `cargo test -- --ignored`.

use async_trait::async_trait;
use axum::http::{header, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Router;
use headless_test_browser::launcher::{find_browser_binary, BROWSER_ENV};
use headless_test_browser::{
    Browser, ChromeLauncher, ConsoleMessage, LaunchOptions, Launcher, Page, PageEvent,
    RequestHandler,
};
use headless_test_core::{Error, Resource, Result, RunConfig};
use headless_test_harness::{Controller, HttpServer, ModuleResolver, ServerRef};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const NODE_MODULES_ENV: &str = "HEADLESS_TEST_NODE_MODULES";

/// `node_modules` holding both dependencies, or `None` when the run should be skipped.
fn environment() -> Option<PathBuf> {
    let has_browser = std::env::var_os(BROWSER_ENV).is_some() || find_browser_binary().is_some();
    if !has_browser {
        eprintln!("Skipping: no browser found");
        return None;
    }
    let cwd = std::env::current_dir().ok()?;
    let resolver = ModuleResolver::new(std::env::var_os(NODE_MODULES_ENV).map(PathBuf::from), &cwd);
    let (Some(mocha), Some(_)) = (resolver.resolve("mocha/mocha.js"), resolver.resolve("chai/chai.js")) else {
        eprintln!("Skipping: mocha/chai not found in node_modules");
        return None;
    };
    mocha.parent()?.parent().map(|p| p.to_path_buf())
}

fn config(node_modules: PathBuf, load: Vec<Resource>) -> RunConfig {
    RunConfig {
        load,
        node_modules: Some(node_modules),
        args: vec!["--no-sandbox".to_string()],
        deadline: Some(30_000),
        log: false,
        ..RunConfig::default()
    }
}

type Requests = Arc<Mutex<Vec<String>>>;

/// Serves `files` as JavaScript and records every requested path.
async fn fixture_server(files: &[(&str, &str)]) -> (HttpServer, Requests) {
    let files: Arc<HashMap<String, String>> = Arc::new(
        files
            .iter()
            .map(|(path, body)| (format!("/{}", path), body.to_string()))
            .collect(),
    );
    let requests: Requests = Arc::new(Mutex::new(Vec::new()));
    let seen = requests.clone();
    let app = Router::new().fallback(move |uri: Uri| {
        let files = files.clone();
        let seen = seen.clone();
        async move {
            seen.lock().unwrap().push(uri.path().to_string());
            match files.get(uri.path()) {
                Some(body) => ([(header::CONTENT_TYPE, "text/javascript")], body.clone()).into_response(),
                None => StatusCode::NOT_FOUND.into_response(),
            }
        }
    });
    (HttpServer::spawn(app).await.unwrap(), requests)
}

/// Wraps the real launcher and keeps the raw arguments of every console call.
struct RecordingLauncher {
    console: Arc<Mutex<Vec<Vec<Value>>>>,
}

struct RecordingBrowser {
    inner: Arc<dyn Browser>,
    console: Arc<Mutex<Vec<Vec<Value>>>>,
}

struct RecordingPage {
    inner: Arc<dyn Page>,
    console: Arc<Mutex<Vec<Vec<Value>>>>,
}

#[async_trait]
impl Launcher for RecordingLauncher {
    async fn launch(&self, options: &LaunchOptions) -> Result<Arc<dyn Browser>> {
        let inner = ChromeLauncher::default().launch(options).await?;
        Ok(Arc::new(RecordingBrowser {
            inner,
            console: self.console.clone(),
        }))
    }
}

#[async_trait]
impl Browser for RecordingBrowser {
    async fn page(&self) -> Result<Arc<dyn Page>> {
        Ok(Arc::new(RecordingPage {
            inner: self.inner.page().await?,
            console: self.console.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

#[async_trait]
impl Page for RecordingPage {
    async fn events(&self) -> Result<mpsc::UnboundedReceiver<PageEvent>> {
        let mut inner = self.inner.events().await?;
        let console = self.console.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(event) = inner.recv().await {
                if let PageEvent::Console(message) = &event {
                    console.lock().unwrap().push(message.args.clone());
                }
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn console_values(&self, message: &ConsoleMessage) -> Result<Vec<Value>> {
        self.inner.console_values(message).await
    }

    async fn expose_binding(&self, name: &str) -> Result<()> {
        self.inner.expose_binding(name).await
    }

    async fn add_init_script(&self, source: &str) -> Result<()> {
        self.inner.add_init_script(source).await
    }

    async fn intercept(&self, handler: Arc<dyn RequestHandler>) -> Result<()> {
        self.inner.intercept(handler).await
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.inner.navigate(url).await
    }

    async fn dismiss_dialog(&self) -> Result<()> {
        self.inner.dismiss_dialog().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

const FIRST_JS: &str = "window.order = (window.order || []).concat('first');";
const SECOND_JS: &str = "window.order = (window.order || []).concat('second');";

const SUITE_PASS_JS: &str = r#"
suite('harness', function () {
  test('resources load in declared order', function () {
    assert.deepEqual(window.order, ['first', 'second']);
  });

  test('framework hooks fire once', function () {
    const before = window.assert;
    window.__headlessRegistry.attach('chai', {assert: null});
    window.__headlessRegistry.attach('mocha', mocha);
    assert.strictEqual(window.assert, before);
  });

  test('empty log prints a blank line', function () {
    console.log('before-blank');
    console.log();
    console.log('after-blank');
  });
});
"#;

const SUITE_FAIL_JS: &str = r#"
suite('failing', function () {
  test('one', function () { assert.equal(1, 2); });
  test('two', function () { assert.isTrue(false); });
  test('three', function () { assert.ok(true); });
});
"#;

#[tokio::test]
#[ignore]
async fn passing_suite_resolves_with_results() {
    let Some(node_modules) = environment() else { return };
    let (server, _requests) = fixture_server(&[
        ("first.js", FIRST_JS),
        ("second.js", SECOND_JS),
        ("suite-pass.js", SUITE_PASS_JS),
    ])
    .await;
    let console = Arc::new(Mutex::new(Vec::new()));
    let controller = Controller::new(Arc::new(RecordingLauncher {
        console: console.clone(),
    }));

    let load = vec![
        Resource::path("first.js"),
        Resource::path("second.js"),
        Resource::path("suite-pass.js"),
    ];
    let result = controller
        .run(server.addr(), config(node_modules, load))
        .await
        .unwrap();
    server.shutdown().await.unwrap();

    assert_eq!(result.passed().count(), 3);
    assert_eq!(result.failure_count(), 0);

    let console = console.lock().unwrap();
    let value = |args: &Vec<Value>| args.first().and_then(|a| a.get("value")).cloned();
    let before = console
        .iter()
        .position(|args| value(args) == Some(json!("before-blank")))
        .expect("marker logged");
    assert_eq!(value(&console[before + 1]), Some(json!("")));
    assert_eq!(value(&console[before + 2]), Some(json!("after-blank")));
}

#[tokio::test]
#[ignore]
async fn failing_suite_reports_failure_count() {
    let Some(node_modules) = environment() else { return };
    let (server, _requests) = fixture_server(&[("suite-fail.js", SUITE_FAIL_JS)]).await;
    let controller = Controller::new(Arc::new(ChromeLauncher::default()));

    let err = controller
        .run(server.addr(), config(node_modules, vec![Resource::path("suite-fail.js")]))
        .await
        .unwrap_err();
    server.shutdown().await.unwrap();

    assert!(matches!(err, Error::TestFailure { count: 2 }), "{}", err);
}

#[tokio::test]
#[ignore]
async fn inline_bdd_code_runs_without_server() {
    let Some(node_modules) = environment() else { return };
    let code = r#"
describe('Tests', () => {
  it('works', () => {
    assert(true);
  });
});
"#;
    let mut config = config(node_modules, vec![Resource::inline(code)]);
    config.driver.insert("ui".to_string(), json!("bdd"));

    let controller = Controller::new(Arc::new(ChromeLauncher::default()));
    let result = controller.run(ServerRef::None, config).await.unwrap();
    assert_eq!(result.passed().count(), 1);
}

#[tokio::test]
#[ignore]
async fn failed_resource_stops_loading() {
    let Some(node_modules) = environment() else { return };
    let (server, requests) = fixture_server(&[
        ("first.js", FIRST_JS),
        ("third.js", SECOND_JS),
    ])
    .await;
    let controller = Controller::new(Arc::new(ChromeLauncher::default()));

    let load = vec![
        Resource::path("first.js"),
        Resource::path("missing.js"),
        Resource::path("third.js"),
    ];
    let err = controller
        .run(server.addr(), config(node_modules, load))
        .await
        .unwrap_err();
    server.shutdown().await.unwrap();

    assert!(matches!(err, Error::ResourceLoad(ref m) if m.starts_with("missing.js")), "{}", err);
    let requests = requests.lock().unwrap();
    assert!(requests.contains(&"/first.js".to_string()));
    assert!(requests.contains(&"/missing.js".to_string()));
    assert!(!requests.contains(&"/third.js".to_string()), "{:?}", requests);
}

#[tokio::test]
#[ignore]
async fn calling_run_directly_is_protocol_misuse() {
    let Some(node_modules) = environment() else { return };
    let (server, _requests) = fixture_server(&[(
        "misuse.js",
        "suite('s', function () { test('t', function () {}); });\nmocha.run();",
    )])
    .await;
    let controller = Controller::new(Arc::new(ChromeLauncher::default()));

    let err = controller
        .run(server.addr(), config(node_modules, vec![Resource::path("misuse.js")]))
        .await
        .unwrap_err();
    server.shutdown().await.unwrap();

    assert!(matches!(err, Error::ProtocolMisuse(_)), "{}", err);
}
