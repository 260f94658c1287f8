//! One-shot settlement of a run: the page either completes or raises first.

use headless_test_browser::PageException;
use headless_test_core::{Error, Result, TestResult};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// How the page settled.
#[derive(Debug)]
enum Outcome {
    Done,
    Failed(PageException),
}

/// Create a connected sender/settlement pair for one run.
pub fn channel() -> (CompletionSender, Settlement) {
    let (tx, rx) = oneshot::channel();
    let report = Arc::new(Mutex::new(None));
    (
        CompletionSender {
            outcome: Some(tx),
            report: report.clone(),
        },
        Settlement { outcome: rx, report },
    )
}

/// Owned by the event dispatcher. The first of `complete` and `fail` decides
/// the outcome; later calls are only logged.
pub struct CompletionSender {
    outcome: Option<oneshot::Sender<Outcome>>,
    report: Arc<Mutex<Option<TestResult>>>,
}

impl CompletionSender {
    pub fn complete(&mut self) {
        match self.outcome.take() {
            Some(tx) => {
                let _ = tx.send(Outcome::Done);
            }
            None => warn!("Completion signalled after the run settled; ignoring"),
        }
    }

    pub fn fail(&mut self, exception: PageException) {
        match self.outcome.take() {
            Some(tx) => {
                let _ = tx.send(Outcome::Failed(exception));
            }
            None => debug!(error = %exception, "Page error after the run settled"),
        }
    }

    /// Keep the latest result the page reported.
    pub fn report(&mut self, payload: &str) {
        match TestResult::from_json(payload) {
            Ok(result) => {
                if let Ok(mut slot) = self.report.lock() {
                    *slot = Some(result);
                }
            }
            Err(e) => warn!("Ignoring malformed test report: {}", e),
        }
    }
}

/// Owned by the controller; resolves exactly once.
pub struct Settlement {
    outcome: oneshot::Receiver<Outcome>,
    report: Arc<Mutex<Option<TestResult>>>,
}

impl Settlement {
    /// Wait for the outcome, optionally bounded by `deadline`.
    pub async fn wait(self, deadline: Option<Duration>) -> Result<TestResult> {
        let Settlement { outcome, report } = self;

        let received = match deadline {
            Some(limit) => tokio::time::timeout(limit, outcome)
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => outcome.await,
        };

        match received {
            Ok(Outcome::Done) => {
                let result = report.lock().ok().and_then(|mut slot| slot.take());
                Ok(result.unwrap_or_default())
            }
            Ok(Outcome::Failed(exception)) => Err(classify(exception)),
            Err(_) => Err(Error::Disconnected(
                "page event stream closed before tests completed".to_string(),
            )),
        }
    }
}

/// Map an uncaught page exception onto the error taxonomy by its class name.
pub fn classify(exception: PageException) -> Error {
    match exception.name.as_deref() {
        Some("ResourceLoadError") => Error::ResourceLoad(exception.message),
        Some("TestFailureError") => match failure_count(&exception.message) {
            Some(count) => Error::TestFailure { count },
            None => Error::Page(exception.to_string()),
        },
        Some("ConfigurationError") => Error::FrameworkMissing(exception.message),
        Some("ProtocolMisuseError") => Error::ProtocolMisuse(exception.message),
        _ => Error::Page(exception.to_string()),
    }
}

/// Leading integer of "<k> tests failed".
fn failure_count(message: &str) -> Option<usize> {
    message.split_whitespace().next()?.parse().ok()
}
