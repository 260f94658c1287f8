//! Vendored test framework sources served under the run's nonce.

use headless_test_core::{Error, Result, RunConfig};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Sequence that would end an inline `<script>` element early.
pub const CLOSING_SCRIPT_TAG: &str = "</script>";

/// A dependency the harness document loads before any test code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    /// Registry slot the preload script hooks.
    pub slot: &'static str,
    /// Global the dependency defines once evaluated.
    pub global: &'static str,
    /// Path below `node_modules`.
    pub module: &'static str,
}

/// Exactly the test framework and the assertion library, in load order.
pub const REQUIRED: [Dependency; 2] = [
    Dependency {
        slot: "mocha",
        global: "mocha",
        module: "mocha/mocha.js",
    },
    Dependency {
        slot: "chai",
        global: "chai",
        module: "chai/chai.js",
    },
];

#[derive(Debug, Clone)]
pub struct VendoredSource {
    pub dependency: Dependency,
    pub source: String,
}

/// Dependency sources that passed the embed guard.
#[derive(Debug, Clone, Default)]
pub struct VendoredDeps {
    sources: Vec<VendoredSource>,
}

impl VendoredDeps {
    pub fn from_sources(sources: Vec<(Dependency, String)>) -> Result<Self> {
        let mut checked = Vec::with_capacity(sources.len());
        for (dependency, source) in sources {
            if source.contains(CLOSING_SCRIPT_TAG) {
                return Err(Error::EmbedGuard(dependency.module.to_string()));
            }
            checked.push(VendoredSource { dependency, source });
        }
        Ok(Self { sources: checked })
    }

    /// Read every required dependency. Missing ones are skipped with a warning;
    /// the page reports the absent framework once it loads.
    pub async fn load(resolver: &ModuleResolver) -> Result<Self> {
        let mut sources = Vec::with_capacity(REQUIRED.len());
        for dependency in REQUIRED {
            let Some(path) = resolver.resolve(dependency.module) else {
                warn!(module = dependency.module, "Could not find dependency");
                continue;
            };
            debug!(module = dependency.module, path = %path.display(), "Reading dependency");
            let source = tokio::fs::read_to_string(&path).await?;
            sources.push((dependency, source));
        }
        Self::from_sources(sources)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VendoredSource> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Node-style lookup of `node_modules/<module>`.
#[derive(Debug, Clone)]
pub struct ModuleResolver {
    roots: Vec<PathBuf>,
}

impl ModuleResolver {
    /// Search `node_modules` first when given, then `start/node_modules` and
    /// every ancestor's `node_modules`.
    pub fn new(node_modules: Option<PathBuf>, start: &Path) -> Self {
        let mut roots: Vec<PathBuf> = node_modules.into_iter().collect();
        roots.extend(start.ancestors().map(|dir| dir.join("node_modules")));
        Self { roots }
    }

    /// Also search from `start` and its ancestors, after the existing roots.
    pub fn with_start(mut self, start: &Path) -> Self {
        self.roots
            .extend(start.ancestors().map(|dir| dir.join("node_modules")));
        self
    }

    /// Explicit `nodeModules`, then the project root chain, then the working directory chain.
    pub fn from_config(config: &RunConfig) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let resolver = match &config.root {
            Some(root) => Self::new(config.node_modules.clone(), root).with_start(&cwd),
            None => Self::new(config.node_modules.clone(), &cwd),
        };
        Ok(resolver)
    }

    pub fn resolve(&self, module: &str) -> Option<PathBuf> {
        self.roots
            .iter()
            .map(|root| root.join(module))
            .find(|candidate| candidate.is_file())
    }
}
