use std::collections::BTreeMap;
use std::time::Duration;

use url::Url;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of HTTP calls in flight.
    pub concurrency: usize,
    /// Per-call timeout.
    pub timeout: Duration,
    pub max_response_bytes: usize,
    /// Keep scheduling independent units after a failure.
    pub keep_going: bool,
    /// Prefix for request targets that are not absolute URLs.
    pub base_url: Option<Url>,
    /// Lowest-precedence variables; file variables and `set` override them.
    pub variables: BTreeMap<String, String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout: Duration::from_secs(30),
            max_response_bytes: 10 * 1024 * 1024,
            keep_going: false,
            base_url: None,
            variables: BTreeMap::new(),
        }
    }
}
