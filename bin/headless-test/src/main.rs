use clap::{CommandFactory, Parser};
use headless_test_browser::ChromeLauncher;
use headless_test_core::{Resource, ResourceKind, RunConfig};
use headless_test_harness::{Controller, HttpServer};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "headless-test")]
#[command(about = "Run browser test suites in a headless browser", long_about = None)]
#[command(version)]
struct Cli {
    /// Scripts and stylesheets to load, in order (paths relative to --root)
    resources: Vec<String>,

    /// Show the browser window and wait for ENTER before closing it
    #[arg(short, long)]
    debug: bool,

    /// Use the BDD interface (describe/it) instead of TDD (suite/test)
    #[arg(short, long)]
    bdd: bool,

    /// Directory served as the page origin; also searched for node_modules
    #[arg(long)]
    root: Option<PathBuf>,

    /// Per-test timeout in milliseconds
    #[arg(long)]
    timeout: Option<i64>,

    /// Give up on the whole run after this many milliseconds
    #[arg(long)]
    deadline: Option<u64>,

    /// JSON file with run options; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Browser executable to launch
    #[arg(long)]
    browser: Option<PathBuf>,

    /// Do not forward page console output
    #[arg(long)]
    no_log: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load(path)?,
            None => RunConfig::default(),
        };

        config.load.extend(self.resources.into_iter().map(Resource::Path));
        if self.bdd {
            config
                .driver
                .insert("ui".to_string(), serde_json::Value::String("bdd".to_string()));
        }
        if self.timeout.is_some() {
            config.timeout = self.timeout;
        }
        if self.deadline.is_some() {
            config.deadline = self.deadline;
        }
        if self.root.is_some() {
            config.root = self.root;
        }
        if self.browser.is_some() {
            config.browser = self.browser;
        }
        if self.no_log {
            config.log = false;
        }
        if self.debug {
            config.headless = false;
            config = config.with_done(wait_for_enter);
        }
        Ok(config)
    }
}

async fn wait_for_enter() {
    eprintln!("Press ENTER to close the browser");
    let mut line = String::new();
    if let Err(e) = BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
        debug!("Could not read from stdin: {}", e);
    }
}

fn has_script(config: &RunConfig) -> bool {
    config.load.iter().any(|r| r.kind() == ResourceKind::Script)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = cli.into_config()?;
    let root = match &config.root {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };
    config.root = Some(root.clone());
    if !has_script(&config) {
        Cli::command().print_help()?;
        anyhow::bail!("no test scripts given");
    }

    let server = HttpServer::static_dir(&root).await?;
    let controller = Controller::new(Arc::new(ChromeLauncher::default()));
    let outcome = controller.run(server.addr(), config).await;
    if let Err(e) = server.shutdown().await {
        debug!("Static server shutdown failed: {}", e);
    }

    let result = outcome?;
    debug!(
        passed = result.passed().count(),
        pending = result.pending().count(),
        "Run finished"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, r#"{"load": ["setup.js"], "timeout": 100, "log": true}"#).unwrap();

        let cli = Cli::parse_from([
            "headless-test",
            "--config",
            path.to_str().unwrap(),
            "--timeout",
            "2000",
            "--no-log",
            "-b",
            "--root",
            "web",
            "suite.js",
        ]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.load, vec![Resource::path("setup.js"), Resource::path("suite.js")]);
        assert_eq!(config.timeout, Some(2000));
        assert!(!config.log);
        assert_eq!(config.driver["ui"], "bdd");
        assert!(config.headless);
        assert_eq!(config.root, Some(PathBuf::from("web")));
    }

    #[test]
    fn test_debug_is_headed_with_hook() {
        let cli = Cli::parse_from(["headless-test", "-d", "suite.js"]);
        let config = cli.into_config().unwrap();
        assert!(!config.headless);
        assert!(config.done.is_some());
    }

    #[test]
    fn test_requires_a_script() {
        let cli = Cli::parse_from(["headless-test", "style.css"]);
        assert!(!has_script(&cli.into_config().unwrap()));
    }
}
