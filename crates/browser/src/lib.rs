//! CDP-based browser driver.
//!
//! - `cdp`: raw Chrome DevTools Protocol client over WebSocket
//! - `launcher`: browser process discovery, launch and teardown
//! - `page`: page target with event mapping, bindings and request interception
//! - `driver`: protocol-independent traits the harness is written against

pub mod cdp;
pub mod driver;
pub mod launcher;
pub mod page;

pub use driver::{
    Browser, ConsoleMessage, Interception, LaunchOptions, Launcher, Page, PageEvent,
    PageException, RequestHandler,
};
pub use launcher::ChromeLauncher;
pub use page::ChromePage;
