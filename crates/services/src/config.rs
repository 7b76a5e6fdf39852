use std::env;

/// Connection settings for the remote assessment API.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub base_url: String,
}

impl ApiConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// Reads `ASSESS_API_BASE_URL`; returns `None` when unset or blank.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("ASSESS_API_BASE_URL").ok()?;
        if base_url.trim().is_empty() {
            return None;
        }
        Some(Self { base_url })
    }

    /// Base URL without a trailing slash.
    #[must_use]
    pub fn trimmed_base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}
