//! Error types for collator construction.
//!
//! Only configuration problems surface as errors. Runtime anomalies (missing
//! timestamps, unavailable sinks, failed publishes) are absorbed and logged by
//! the component that hits them.

use thiserror::Error;

/// Errors raised while building a [`Collator`](crate::Collator) from configuration.
#[derive(Debug, Error)]
pub enum CollatorError {
    /// The collation interval must be between one second and one year.
    #[error("collation interval must be between 1 and 31536000 seconds (got {0})")]
    InvalidInterval(u64),

    /// A rule was configured without a `when` condition.
    #[error("rule '{rule_id}' has no `when` condition")]
    NoCondition { rule_id: String },

    /// A condition operator was given nothing to test.
    #[error("`{operator}` condition must not be empty")]
    EmptyCondition { operator: &'static str },

    /// A `regexp` condition carried a pattern that does not compile.
    #[error("invalid regexp for field '{field}': {source}")]
    InvalidRegex {
        field: String,
        #[source]
        source: regex::Error,
    },

    /// An `equals` condition compared against a value that is not a string, integer or bool.
    #[error("`equals` on field '{field}' supports only string, integer or bool values")]
    UnsupportedEqualsValue { field: String },

    /// Two rules were registered under the same id.
    #[error("rule '{0}' is defined more than once")]
    DuplicateRule(String),

    /// Rule ids must be non-empty.
    #[error("rule id must not be empty")]
    EmptyRuleId,

    /// Sink connection retry settings were unusable.
    #[error("sink connect policy: {0}")]
    InvalidConnectPolicy(String),

    /// Configuration text could not be decoded.
    #[error("config json: {0}")]
    Json(#[from] serde_json::Error),
}

impl CollatorError {
    pub(crate) fn no_condition(rule_id: &str) -> Self {
        Self::NoCondition { rule_id: rule_id.to_string() }
    }

    /// Check if this error came from a malformed condition.
    pub fn is_condition_error(&self) -> bool {
        matches!(
            self,
            Self::NoCondition { .. }
                | Self::EmptyCondition { .. }
                | Self::InvalidRegex { .. }
                | Self::UnsupportedEqualsValue { .. }
        )
    }
}
