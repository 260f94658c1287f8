//! Runs browser-side test suites in a real browser page.
//!
//! A run synthesizes a harness document under a per-run nonce on the target
//! origin, installs a preload script that loads the test framework and the
//! configured resources, and waits for the page to report completion.

pub mod cleanup;
pub mod completion;
pub mod console;
pub mod controller;
pub mod deps;
pub mod interceptor;
pub mod nonce;
pub mod preload;
pub mod server;

pub use cleanup::CleanupStack;
pub use console::format_console;
pub use controller::{launch_args, Controller, ServerRef};
pub use deps::{ModuleResolver, VendoredDeps};
pub use interceptor::Interceptor;
pub use nonce::Nonce;
pub use preload::PreloadScript;
pub use server::HttpServer;
