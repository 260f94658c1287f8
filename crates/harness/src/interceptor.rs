//! Virtual origin: answers the harness document and vendored dependencies
//! for one run's nonce, and lets every other request through untouched.

use headless_test_browser::{Interception, RequestHandler};
use headless_test_core::Result;
use std::collections::HashMap;
use std::sync::Arc;
use url::{Origin, Url};

use crate::deps::{VendoredDeps, VendoredSource};
use crate::nonce::Nonce;

/// Page global holding the registration object created by the preload script.
pub const REGISTRY_GLOBAL: &str = "__headlessRegistry";

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
pub const SCRIPT_CONTENT_TYPE: &str = "text/javascript";

/// Immutable once built: the harness path plus one route per dependency.
#[derive(Debug)]
pub struct Interceptor {
    origin: Origin,
    harness_url: Url,
    harness_html: Arc<str>,
    routes: HashMap<String, Arc<str>>,
}

impl Interceptor {
    pub fn new(base: &Url, nonce: &Nonce, deps: &VendoredDeps) -> Result<Self> {
        let harness_url = base.join(nonce.as_str())?;
        let mut routes = HashMap::with_capacity(deps.len());
        let mut head = String::new();

        for dep in deps.iter() {
            let path = format!("{}/node_modules/{}", harness_url.path(), dep.dependency.module);
            head.push_str(&format!("<script src=\"{}\"></script>\n", path));
            routes.insert(path, Arc::from(with_registration(dep)));
        }

        let harness_html = format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n{}</head>\n<body></body>\n</html>\n",
            head
        );

        Ok(Self {
            origin: base.origin(),
            harness_url,
            harness_html: Arc::from(harness_html),
            routes,
        })
    }

    pub fn harness_url(&self) -> &Url {
        &self.harness_url
    }

    pub fn harness_html(&self) -> &str {
        &self.harness_html
    }

    pub fn intercept(&self, url: &str) -> Interception {
        let Ok(parsed) = Url::parse(url) else {
            return Interception::Continue;
        };
        if parsed.origin() != self.origin {
            return Interception::Continue;
        }

        let path = parsed.path();
        if path == self.harness_url.path() {
            return Interception::Fulfill {
                status: 200,
                content_type: HTML_CONTENT_TYPE,
                body: self.harness_html.clone(),
            };
        }
        match self.routes.get(path) {
            Some(body) => Interception::Fulfill {
                status: 200,
                content_type: SCRIPT_CONTENT_TYPE,
                body: body.clone(),
            },
            None => Interception::Continue,
        }
    }
}

impl RequestHandler for Interceptor {
    fn handle(&self, url: &str) -> Interception {
        self.intercept(url)
    }
}

/// Dependency source followed by its one-time registration call.
fn with_registration(dep: &VendoredSource) -> String {
    format!(
        "{source}\n;(function (registry) {{ if (registry) {{ registry.attach({slot:?}, window.{global}); }} }})(window.{registry});\n",
        source = dep.source,
        slot = dep.dependency.slot,
        global = dep.dependency.global,
        registry = REGISTRY_GLOBAL,
    )
}
