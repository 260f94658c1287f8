pub mod config;
pub mod error;
pub mod result;

pub use config::{DoneHook, Resource, ResourceKind, RunConfig};
pub use error::{Error, Result};
pub use result::{TestEntry, TestError, TestResult, TestState};
