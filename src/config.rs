//! Deserializable collator configuration.
//!
//! ```rust
//! use event_collator::CollatorConfig;
//!
//! let config = CollatorConfig::from_json_str(r#"{
//!     "collation_interval_sec": 30,
//!     "rules": {
//!         "rule0": { "when": { "equals": { "type": "process" } } }
//!     }
//! }"#).unwrap();
//! assert_eq!(config.interval_secs, 30);
//! assert_eq!(config.sink_connect.attempts, 10);
//! ```

use crate::bootstrap::{ConnectPolicy, DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_INTERVAL};
use crate::error::CollatorError;
use crate::event::{DEFAULT_SOURCE_LABEL_FIELD, REALTIME_TIMESTAMP_FIELD};
use crate::filter::FieldPaths;
use crate::predicate::{Condition, ConditionSpec};
use crate::scheduler::check_interval;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Top-level collator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollatorConfig {
    /// Flush period in seconds.
    #[serde(rename = "collation_interval_sec")]
    pub interval_secs: u64,
    /// Rule id to rule definition.
    #[serde(default)]
    pub rules: BTreeMap<String, RuleConfig>,
    /// Field used to detect rules that match several sources.
    #[serde(default = "default_source_label_field")]
    pub source_label_field: String,
    /// Field holding the event time as epoch nanoseconds.
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
    #[serde(default)]
    pub sink_connect: SinkConnectConfig,
}

/// One rule: the condition an event must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    #[serde(default)]
    pub when: Option<ConditionSpec>,
}

/// Bounded wait for a late sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SinkConnectConfig {
    #[serde(default = "default_connect_attempts")]
    pub attempts: u32,
    #[serde(default = "default_connect_interval_ms")]
    pub retry_interval_ms: u64,
}

impl Default for SinkConnectConfig {
    fn default() -> Self {
        Self { attempts: default_connect_attempts(), retry_interval_ms: default_connect_interval_ms() }
    }
}

fn default_source_label_field() -> String {
    DEFAULT_SOURCE_LABEL_FIELD.to_string()
}

fn default_timestamp_field() -> String {
    REALTIME_TIMESTAMP_FIELD.to_string()
}

fn default_connect_attempts() -> u32 {
    DEFAULT_CONNECT_ATTEMPTS
}

fn default_connect_interval_ms() -> u64 {
    u64::try_from(DEFAULT_CONNECT_INTERVAL.as_millis()).unwrap_or(1_000)
}

impl CollatorConfig {
    /// A config with no rules and default field paths.
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval_secs,
            rules: BTreeMap::new(),
            source_label_field: default_source_label_field(),
            timestamp_field: default_timestamp_field(),
            sink_connect: SinkConnectConfig::default(),
        }
    }

    /// Add a rule, replacing any rule with the same id.
    pub fn with_rule(mut self, rule_id: impl Into<String>, when: ConditionSpec) -> Self {
        self.rules.insert(rule_id.into(), RuleConfig { when: Some(when) });
        self
    }

    pub fn from_json_str(text: &str) -> Result<Self, CollatorError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_value(value: serde_json::Value) -> Result<Self, CollatorError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn field_paths(&self) -> FieldPaths {
        FieldPaths {
            timestamp: self.timestamp_field.clone(),
            source_label: self.source_label_field.clone(),
        }
    }

    pub fn connect_policy(&self) -> Result<ConnectPolicy, CollatorError> {
        ConnectPolicy::new(
            self.sink_connect.attempts,
            Duration::from_millis(self.sink_connect.retry_interval_ms),
        )
    }

    /// Compile every rule's condition, in rule-id order.
    pub fn compile_rules(&self) -> Result<Vec<(String, Condition)>, CollatorError> {
        self.rules
            .iter()
            .map(|(rule_id, rule)| {
                if rule_id.is_empty() {
                    return Err(CollatorError::EmptyRuleId);
                }
                let spec = rule.when.as_ref().ok_or_else(|| CollatorError::no_condition(rule_id))?;
                Ok((rule_id.clone(), spec.compile()?))
            })
            .collect()
    }

    /// Check everything a collator build would check.
    pub fn validate(&self) -> Result<(), CollatorError> {
        check_interval(self.interval_secs)?;
        self.connect_policy()?;
        self.compile_rules()?;
        Ok(())
    }
}
