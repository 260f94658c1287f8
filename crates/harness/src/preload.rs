//! The script installed into the page ahead of every document.
//!
//! The JavaScript lives in `assets/preload.js` as a single function
//! expression; it is invoked with the run options serialized to JSON.

use headless_test_core::{Resource, Result, RunConfig};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::interceptor::REGISTRY_GLOBAL;

const PRELOAD_JS: &str = include_str!("../assets/preload.js");

/// Called by the page, with no meaningful payload, when every test passed.
pub const DONE_BINDING: &str = "__headlessDone";
/// Called by the page with the serialized `TestResult` just before it settles.
pub const REPORT_BINDING: &str = "__headlessReport";

#[derive(Serialize)]
struct Bindings {
    done: &'static str,
    report: &'static str,
}

#[derive(Serialize)]
struct PreloadOptions<'a> {
    load: &'a [Resource],
    driver: &'a Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<i64>,
    registry: &'static str,
    bindings: Bindings,
}

#[derive(Debug, Clone)]
pub struct PreloadScript {
    source: String,
}

impl PreloadScript {
    pub fn new(config: &RunConfig) -> Result<Self> {
        let options = PreloadOptions {
            load: &config.load,
            driver: &config.driver,
            timeout: config.framework_timeout(),
            registry: REGISTRY_GLOBAL,
            bindings: Bindings {
                done: DONE_BINDING,
                report: REPORT_BINDING,
            },
        };
        let options = serde_json::to_string(&options)?;
        Ok(Self {
            source: format!("{}({});\n", PRELOAD_JS.trim_end(), options),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}
