//! Per-rule collation state and the table that owns it.
//!
//! Each rule has its own lock. The event path locks exactly one rule per
//! matched event; the flush path locks each rule once to swap its state for an
//! empty one. Neither path holds a lock while doing anything else.

use crate::event::Event;
use crate::predicate::Predicate;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Repeat matches closer together than this are collapsed.
pub const SUPPRESSION_WINDOW_NANOS: u64 = 1_000_000_000;

/// Mutable collation counters for one rule.
///
/// `hits` counts every match in the current window, including the
/// window-opening one that was passed through. A fresh (or just flushed)
/// state has `hits == 0`, no labels and no retained event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleState {
    hits: u64,
    last_match_nanos: u64,
    source_labels: BTreeMap<String, u64>,
    retained: Option<Event>,
}

/// What a match did to a rule's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Opened a new window; the event goes downstream.
    Opened,
    /// Fell inside the current window; the event is dropped.
    Collapsed,
}

impl RuleState {
    /// Record a match at `at_nanos` from `label`, retaining `event` when it
    /// opens a new window.
    pub fn admit(&mut self, at_nanos: u64, label: &str, event: &Event) -> Admission {
        // Out-of-order timestamps saturate to zero and count as in-window.
        let gap = at_nanos.saturating_sub(self.last_match_nanos);
        if self.hits == 0 || gap > SUPPRESSION_WINDOW_NANOS {
            self.hits = 1;
            self.last_match_nanos = at_nanos;
            self.source_labels.clear();
            self.source_labels.insert(label.to_string(), 1);
            self.retained = Some(event.clone());
            Admission::Opened
        } else {
            self.hits += 1;
            self.last_match_nanos = at_nanos;
            *self.source_labels.entry(label.to_string()).or_insert(0) += 1;
            Admission::Collapsed
        }
    }

    /// Matches seen in the current window, the opening one included.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Matches that were dropped instead of passed through.
    pub fn suppressed(&self) -> u64 {
        self.hits.saturating_sub(1)
    }

    pub fn last_match_nanos(&self) -> u64 {
        self.last_match_nanos
    }

    pub fn source_labels(&self) -> &BTreeMap<String, u64> {
        &self.source_labels
    }

    pub fn retained(&self) -> Option<&Event> {
        self.retained.as_ref()
    }

    pub(crate) fn take_retained(&mut self) -> Option<Event> {
        self.retained.take()
    }

    /// True when nothing has matched since the last reset.
    pub fn is_empty(&self) -> bool {
        self.hits == 0
    }
}

/// A named rule: immutable identity and predicate.
#[derive(Debug, Clone)]
pub struct Rule {
    id: String,
    predicate: Arc<dyn Predicate>,
}

impl Rule {
    pub fn new(id: impl Into<String>, predicate: Arc<dyn Predicate>) -> Self {
        Self { id: id.into(), predicate }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.predicate.matches(event)
    }
}

#[derive(Debug)]
pub(crate) struct RuleEntry {
    pub(crate) rule: Rule,
    state: Mutex<RuleState>,
}

impl RuleEntry {
    /// Lock this rule's state. A poisoned lock is recovered: the state is
    /// plain counters and stays usable.
    pub(crate) fn lock(&self) -> MutexGuard<'_, RuleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One rule's state as captured by [`CollationTable::snapshot_and_reset`].
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSnapshot {
    pub rule_id: String,
    pub state: RuleState,
}

/// Authoritative store of all rule state, in rule-id order.
#[derive(Debug)]
pub struct CollationTable {
    entries: Vec<RuleEntry>,
}

impl CollationTable {
    /// Build a table; rules are evaluated in ascending id order.
    pub fn new(mut rules: Vec<Rule>) -> Self {
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        let entries = rules
            .into_iter()
            .map(|rule| RuleEntry { rule, state: Mutex::new(RuleState::default()) })
            .collect();
        Self { entries }
    }

    pub(crate) fn entries(&self) -> &[RuleEntry] {
        &self.entries
    }

    /// Rule ids in evaluation order.
    pub fn rule_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.rule.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of one rule's current state.
    pub fn state(&self, rule_id: &str) -> Option<RuleState> {
        self.entries.iter().find(|e| e.rule.id == rule_id).map(|e| e.lock().clone())
    }

    /// Swap every rule's state for an empty one and return what was there.
    ///
    /// Each swap happens under that rule's lock, so a concurrent match lands
    /// either in the returned snapshot or in the fresh state, never both.
    pub fn snapshot_and_reset(&self) -> Vec<RuleSnapshot> {
        self.entries
            .iter()
            .map(|entry| RuleSnapshot {
                rule_id: entry.rule.id.clone(),
                state: std::mem::take(&mut *entry.lock()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::predicate_fn;
    use serde_json::json;

    const MS: u64 = 1_000_000;

    fn event(msg: &str) -> Event {
        Event::from_value(json!({ "message": msg })).unwrap()
    }

    fn always() -> Arc<dyn Predicate> {
        Arc::new(predicate_fn(|_| true))
    }

    #[test]
    fn first_match_opens_window() {
        let mut state = RuleState::default();
        assert!(state.is_empty());
        assert_eq!(state.admit(5 * MS, "sshd", &event("a")), Admission::Opened);
        assert_eq!(state.hits(), 1);
        assert_eq!(state.suppressed(), 0);
        assert_eq!(state.source_labels().get("sshd"), Some(&1));
        assert_eq!(state.retained(), Some(&event("a")));
    }

    #[test]
    fn matches_within_window_collapse() {
        let mut state = RuleState::default();
        state.admit(0, "sshd", &event("a"));
        for i in 1..=10 {
            assert_eq!(state.admit(i * 10 * MS, "sshd", &event("b")), Admission::Collapsed);
        }
        assert_eq!(state.hits(), 11);
        assert_eq!(state.suppressed(), 10);
        assert_eq!(state.last_match_nanos(), 100 * MS);
        assert_eq!(state.source_labels().get("sshd"), Some(&11));
        // the opening event stays the representative
        assert_eq!(state.retained(), Some(&event("a")));
    }

    #[test]
    fn window_is_measured_from_latest_match() {
        let mut state = RuleState::default();
        state.admit(0, "-", &event("a"));
        assert_eq!(state.admit(900 * MS, "-", &event("b")), Admission::Collapsed);
        // exactly one second later is still inside the window
        assert_eq!(state.admit(1_900 * MS, "-", &event("c")), Admission::Collapsed);
        assert_eq!(state.admit(2_901 * MS, "-", &event("d")), Admission::Opened);
        assert_eq!(state.hits(), 1);
        assert_eq!(state.source_labels().len(), 1);
        assert_eq!(state.retained(), Some(&event("d")));
    }

    #[test]
    fn out_of_order_match_counts_as_in_window() {
        let mut state = RuleState::default();
        state.admit(10_000 * MS, "-", &event("a"));
        assert_eq!(state.admit(1_000 * MS, "-", &event("b")), Admission::Collapsed);
    }

    #[test]
    fn labels_are_tallied_separately() {
        let mut state = RuleState::default();
        state.admit(0, "a.service", &event("x"));
        state.admit(1, "b.service", &event("x"));
        state.admit(2, "b.service", &event("x"));
        assert_eq!(state.source_labels().get("a.service"), Some(&1));
        assert_eq!(state.source_labels().get("b.service"), Some(&2));
    }

    #[test]
    fn table_orders_rules_by_id() {
        let table = CollationTable::new(vec![
            Rule::new("rule2", always()),
            Rule::new("rule0", always()),
            Rule::new("rule1", always()),
        ]);
        assert_eq!(table.rule_ids(), vec!["rule0", "rule1", "rule2"]);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn snapshot_and_reset_empties_every_rule() {
        let table = CollationTable::new(vec![Rule::new("a", always()), Rule::new("b", always())]);
        table.entries()[0].lock().admit(0, "-", &event("x"));
        table.entries()[0].lock().admit(1, "-", &event("x"));

        let snapshot = table.snapshot_and_reset();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].rule_id, "a");
        assert_eq!(snapshot[0].state.hits(), 2);
        assert!(snapshot[1].state.is_empty());

        assert!(table.state("a").unwrap().is_empty());
        assert!(table.state("a").unwrap().retained().is_none());
        assert!(table.state("missing").is_none());
    }

    #[test]
    fn poisoned_rule_lock_is_recovered() {
        let table = Arc::new(CollationTable::new(vec![Rule::new("a", always())]));
        let clone = table.clone();
        let _ = std::thread::spawn(move || {
            let _guard = clone.entries()[0].lock();
            panic!("poison");
        })
        .join();
        table.entries()[0].lock().admit(0, "-", &event("x"));
        assert_eq!(table.state("a").unwrap().hits(), 1);
    }
}
