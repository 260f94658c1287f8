use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestState {
    Passed,
    Failed,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestEntry {
    pub title: String,
    #[serde(default)]
    pub full_title: Option<String>,
    /// Milliseconds, when the framework measured it.
    #[serde(default)]
    pub duration: Option<f64>,
    pub state: TestState,
    #[serde(default)]
    pub err: Option<TestError>,
}

/// Outcome of a suite, in the order the framework reported each test.
///
/// Categories are views over `all`, so an entry can never be counted twice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub all: Vec<TestEntry>,
}

impl TestResult {
    pub fn from_json(payload: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    pub fn push(&mut self, entry: TestEntry) {
        self.all.push(entry);
    }

    pub fn passed(&self) -> impl Iterator<Item = &TestEntry> {
        self.with_state(TestState::Passed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &TestEntry> {
        self.with_state(TestState::Failed)
    }

    pub fn pending(&self) -> impl Iterator<Item = &TestEntry> {
        self.with_state(TestState::Pending)
    }

    pub fn failure_count(&self) -> usize {
        self.failed().count()
    }

    pub fn is_success(&self) -> bool {
        self.failure_count() == 0
    }

    fn with_state(&self, state: TestState) -> impl Iterator<Item = &TestEntry> {
        self.all.iter().filter(move |e| e.state == state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page_report() {
        let json = r#"{"all":[
            {"title":"adds","fullTitle":"math adds","duration":3,"state":"passed","err":null},
            {"title":"divides","state":"failed","err":{"message":"expected 1 to equal 2","stack":"AssertionError"}},
            {"title":"later","state":"pending"}
        ]}"#;
        let result = TestResult::from_json(json).unwrap();
        assert_eq!(result.all.len(), 3);
        assert_eq!(result.passed().count(), 1);
        assert_eq!(result.pending().count(), 1);
        assert_eq!(result.failure_count(), 1);
        let failed = result.failed().next().unwrap();
        assert_eq!(failed.err.as_ref().unwrap().message, "expected 1 to equal 2");
        assert!(!result.is_success());
    }

    #[test]
    fn test_each_entry_in_exactly_one_category() {
        let mut result = TestResult::default();
        for (i, state) in [TestState::Passed, TestState::Failed, TestState::Pending, TestState::Passed]
            .into_iter()
            .enumerate()
        {
            result.push(TestEntry {
                title: format!("t{}", i),
                full_title: None,
                duration: None,
                state,
                err: None,
            });
        }
        let categorized = result.passed().count() + result.failed().count() + result.pending().count();
        assert_eq!(categorized, result.all.len());
    }
}
