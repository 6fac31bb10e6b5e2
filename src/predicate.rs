//! Rule predicates and the condition language used to build them.
//!
//! The collator only needs the [`Predicate`] capability. [`ConditionSpec`] is
//! the deserializable form found in configuration; [`ConditionSpec::compile`]
//! validates it once (including regex compilation) and produces a
//! [`Condition`] that is cheap to evaluate on the hot path.
//!
//! ```rust
//! use event_collator::predicate::{ConditionSpec, Predicate};
//! use event_collator::Event;
//! use serde_json::json;
//!
//! let spec: ConditionSpec = serde_json::from_value(json!({
//!     "and": [
//!         { "contains": { "proc.name": "test" } },
//!         { "regexp": { "proc.cmdline": "^/sbin" } }
//!     ]
//! }))
//! .unwrap();
//! let condition = spec.compile().unwrap();
//!
//! let event = Event::from_value(json!({
//!     "proc": { "name": "test-1", "cmdline": "/sbin/launchd" }
//! }))
//! .unwrap();
//! assert!(condition.matches(&event));
//! ```

use crate::error::CollatorError;
use crate::event::Event;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Boolean test deciding whether an event belongs to a rule.
pub trait Predicate: Send + Sync + fmt::Debug {
    fn matches(&self, event: &Event) -> bool;
}

/// Condition as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionSpec {
    /// Every listed field equals the given string, integer or bool.
    Equals(BTreeMap<String, Value>),
    /// Every listed string field contains the given substring.
    Contains(BTreeMap<String, String>),
    /// Every listed string field matches the given pattern.
    Regexp(BTreeMap<String, String>),
    /// Every listed field exists.
    HasFields(Vec<String>),
    And(Vec<ConditionSpec>),
    Or(Vec<ConditionSpec>),
    Not(Box<ConditionSpec>),
}

impl ConditionSpec {
    /// Validate and compile into an evaluable [`Condition`].
    pub fn compile(&self) -> Result<Condition, CollatorError> {
        match self {
            ConditionSpec::Equals(fields) => {
                non_empty(fields.is_empty(), "equals")?;
                let compiled = fields
                    .iter()
                    .map(|(field, value)| -> Result<_, CollatorError> {
                        let expected = EqualsValue::from_json(value).ok_or_else(|| {
                            CollatorError::UnsupportedEqualsValue { field: field.clone() }
                        })?;
                        Ok((field.clone(), expected))
                    })
                    .collect::<Result<_, CollatorError>>()?;
                Ok(Condition::Equals(compiled))
            }
            ConditionSpec::Contains(fields) => {
                non_empty(fields.is_empty(), "contains")?;
                Ok(Condition::Contains(
                    fields.iter().map(|(f, s)| (f.clone(), s.clone())).collect(),
                ))
            }
            ConditionSpec::Regexp(fields) => {
                non_empty(fields.is_empty(), "regexp")?;
                let compiled = fields
                    .iter()
                    .map(|(field, pattern)| {
                        Regex::new(pattern)
                            .map(|re| (field.clone(), re))
                            .map_err(|source| CollatorError::InvalidRegex {
                                field: field.clone(),
                                source,
                            })
                    })
                    .collect::<Result<_, CollatorError>>()?;
                Ok(Condition::Regexp(compiled))
            }
            ConditionSpec::HasFields(fields) => {
                non_empty(fields.is_empty(), "has_fields")?;
                Ok(Condition::HasFields(fields.clone()))
            }
            ConditionSpec::And(children) => {
                non_empty(children.is_empty(), "and")?;
                Ok(Condition::And(compile_all(children)?))
            }
            ConditionSpec::Or(children) => {
                non_empty(children.is_empty(), "or")?;
                Ok(Condition::Or(compile_all(children)?))
            }
            ConditionSpec::Not(child) => Ok(Condition::Not(Box::new(child.compile()?))),
        }
    }
}

fn non_empty(is_empty: bool, operator: &'static str) -> Result<(), CollatorError> {
    if is_empty {
        Err(CollatorError::EmptyCondition { operator })
    } else {
        Ok(())
    }
}

fn compile_all(children: &[ConditionSpec]) -> Result<Vec<Condition>, CollatorError> {
    children.iter().map(ConditionSpec::compile).collect()
}

/// Scalar accepted on the right-hand side of `equals`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EqualsValue {
    Str(String),
    Int(i128),
    Bool(bool),
}

impl EqualsValue {
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::Str(s.clone())),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(_) => as_int(value).map(Self::Int),
            _ => None,
        }
    }

    fn matches(&self, actual: &Value) -> bool {
        match self {
            Self::Str(expected) => actual.as_str() == Some(expected.as_str()),
            Self::Int(expected) => as_int(actual) == Some(*expected),
            Self::Bool(expected) => actual.as_bool() == Some(*expected),
        }
    }
}

fn as_int(value: &Value) -> Option<i128> {
    value.as_i64().map(i128::from).or_else(|| value.as_u64().map(i128::from))
}

/// Compiled condition tree.
#[derive(Debug, Clone)]
pub enum Condition {
    Equals(Vec<(String, EqualsValue)>),
    Contains(Vec<(String, String)>),
    Regexp(Vec<(String, Regex)>),
    HasFields(Vec<String>),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Predicate for Condition {
    fn matches(&self, event: &Event) -> bool {
        match self {
            Condition::Equals(fields) => fields
                .iter()
                .all(|(field, expected)| event.get(field).is_some_and(|v| expected.matches(v))),
            Condition::Contains(fields) => fields.iter().all(|(field, needle)| {
                event.get_str(field).is_some_and(|s| s.contains(needle.as_str()))
            }),
            Condition::Regexp(fields) => fields
                .iter()
                .all(|(field, re)| event.get_str(field).is_some_and(|s| re.is_match(s))),
            Condition::HasFields(fields) => fields.iter().all(|field| event.has_field(field)),
            Condition::And(children) => children.iter().all(|c| c.matches(event)),
            Condition::Or(children) => children.iter().any(|c| c.matches(event)),
            Condition::Not(child) => !child.matches(event),
        }
    }
}

/// Adapter turning a closure into a [`Predicate`].
pub struct FnPredicate<F> {
    f: F,
}

/// Build a predicate from a closure.
pub fn predicate_fn<F>(f: F) -> FnPredicate<F>
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    FnPredicate { f }
}

impl<F> fmt::Debug for FnPredicate<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPredicate").field("f", &"<closure>").finish()
    }
}

impl<F> Predicate for FnPredicate<F>
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    fn matches(&self, event: &Event) -> bool {
        (self.f)(event)
    }
}
