//! Per-event entry point: decide whether an event goes downstream.

use crate::event::{Event, DEFAULT_SOURCE_LABEL_FIELD, REALTIME_TIMESTAMP_FIELD};
use crate::table::{Admission, CollationTable};
use std::sync::Arc;
use tracing::trace;

/// Outcome of running one event through the filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Emit the event downstream.
    PassThrough,
    /// Drop the event; it was collapsed into `rule_id`'s current window.
    Suppressed { rule_id: String },
}

impl Verdict {
    pub fn is_suppressed(&self) -> bool {
        matches!(self, Verdict::Suppressed { .. })
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, Verdict::PassThrough)
    }
}

/// Field paths the filter reads from every matching event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPaths {
    /// Epoch-nanosecond timestamp.
    pub timestamp: String,
    /// Source classification used to spot over-broad rules.
    pub source_label: String,
}

impl Default for FieldPaths {
    fn default() -> Self {
        Self {
            timestamp: REALTIME_TIMESTAMP_FIELD.to_string(),
            source_label: DEFAULT_SOURCE_LABEL_FIELD.to_string(),
        }
    }
}

/// Matches events against rules and updates the shared table.
#[derive(Debug, Clone)]
pub struct EventFilter {
    table: Arc<CollationTable>,
    fields: FieldPaths,
}

impl EventFilter {
    pub fn new(table: Arc<CollationTable>, fields: FieldPaths) -> Self {
        Self { table, fields }
    }

    pub fn fields(&self) -> &FieldPaths {
        &self.fields
    }

    /// Run `event` through every rule in id order; the first rule that
    /// matches (and can read the event's timestamp) decides the verdict.
    ///
    /// Summaries always pass. A rule whose predicate matches but which cannot
    /// read a timestamp is skipped for this event only.
    pub fn process(&self, event: &Event) -> Verdict {
        if event.is_summary() {
            return Verdict::PassThrough;
        }
        for entry in self.table.entries() {
            if !entry.rule.matches(event) {
                continue;
            }
            let Some(at_nanos) = event.timestamp_nanos(&self.fields.timestamp) else {
                trace!(
                    target: "event_collator::filter",
                    rule_id = %entry.rule.id(),
                    field = %self.fields.timestamp,
                    "matching event has no usable timestamp; rule skipped"
                );
                continue;
            };
            let label = event.source_label(&self.fields.source_label);
            return match entry.lock().admit(at_nanos, label, event) {
                Admission::Opened => Verdict::PassThrough,
                Admission::Collapsed => {
                    Verdict::Suppressed { rule_id: entry.rule.id().to_string() }
                }
            };
        }
        Verdict::PassThrough
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::COLLATED_FIELD;
    use crate::predicate::{predicate_fn, Predicate};
    use crate::table::Rule;
    use serde_json::json;

    const MS: u64 = 1_000_000;

    fn rule<P: Predicate + 'static>(id: &str, p: P) -> Rule {
        Rule::new(id, Arc::new(p))
    }

    fn setup(rules: Vec<Rule>) -> (EventFilter, Arc<CollationTable>) {
        let table = Arc::new(CollationTable::new(rules));
        (EventFilter::new(table.clone(), FieldPaths::default()), table)
    }

    fn process_event(at_nanos: u64) -> Event {
        Event::from_value(json!({
            "type": "process",
            "@realtime_timestamp": at_nanos,
            "journal": { "systemd_unit": "sshd.service" },
        }))
        .unwrap()
    }

    fn is_process() -> impl Predicate {
        predicate_fn(|e: &Event| e.get_str("type") == Some("process"))
    }

    #[test]
    fn unmatched_events_pass() {
        let (filter, table) = setup(vec![rule("rule0", predicate_fn(|_: &Event| false))]);
        assert_eq!(filter.process(&process_event(0)), Verdict::PassThrough);
        assert!(table.state("rule0").unwrap().is_empty());
    }

    #[test]
    fn burst_passes_first_and_suppresses_rest() {
        let (filter, table) = setup(vec![rule("rule0", is_process())]);
        assert!(filter.process(&process_event(0)).is_pass_through());
        for i in 1..=10 {
            assert_eq!(
                filter.process(&process_event(i * 10 * MS)),
                Verdict::Suppressed { rule_id: "rule0".into() }
            );
        }
        assert_eq!(table.state("rule0").unwrap().suppressed(), 10);
    }

    #[test]
    fn spaced_events_all_pass() {
        let (filter, table) = setup(vec![rule("rule0", is_process())]);
        for i in 0..100 {
            assert!(filter.process(&process_event(i * 2_000 * MS)).is_pass_through());
        }
        assert_eq!(table.state("rule0").unwrap().suppressed(), 0);
    }

    #[test]
    fn first_matching_rule_owns_the_event() {
        let (filter, table) =
            setup(vec![rule("b_second", is_process()), rule("a_first", is_process())]);
        filter.process(&process_event(0));
        assert_eq!(
            filter.process(&process_event(MS)),
            Verdict::Suppressed { rule_id: "a_first".into() }
        );
        assert_eq!(table.state("a_first").unwrap().hits(), 2);
        assert!(table.state("b_second").unwrap().is_empty());
    }

    #[test]
    fn missing_timestamp_skips_only_that_rule() {
        let (filter, table) = setup(vec![rule("rule0", is_process())]);
        let mut event = process_event(0);
        event.remove("@realtime_timestamp");
        assert!(filter.process(&event).is_pass_through());
        assert!(filter.process(&event).is_pass_through());
        assert!(table.state("rule0").unwrap().is_empty());
    }

    #[test]
    fn unreadable_timestamp_leaves_state_untouched() {
        let (filter, table) = setup(vec![rule("a", is_process()), rule("b", is_process())]);
        let custom = EventFilter::new(
            table.clone(),
            FieldPaths { timestamp: "ts".into(), source_label: "unit".into() },
        );
        let mut event = process_event(0);
        event.put("ts", "not-a-number");
        assert!(custom.process(&event).is_pass_through());
        assert!(table.state("a").unwrap().is_empty());
        // the default paths still read the event fine
        assert!(filter.process(&event).is_pass_through());
        assert_eq!(table.state("a").unwrap().hits(), 1);
    }

    #[test]
    fn summaries_always_pass() {
        let (filter, table) = setup(vec![rule("rule0", predicate_fn(|_: &Event| true))]);
        let mut summary = process_event(0);
        summary.put(COLLATED_FIELD, true);
        for _ in 0..5 {
            assert!(filter.process(&summary).is_pass_through());
        }
        assert!(table.state("rule0").unwrap().is_empty());
    }

    #[test]
    fn missing_label_is_tallied_as_dash() {
        let (filter, table) = setup(vec![rule("rule0", is_process())]);
        let mut event = process_event(0);
        event.remove("journal");
        filter.process(&event);
        assert_eq!(table.state("rule0").unwrap().source_labels().get("-"), Some(&1));
    }

    #[test]
    fn concurrent_callers_lose_no_matches() {
        let (filter, table) = setup(vec![rule("rule0", is_process())]);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let filter = filter.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        filter.process(&process_event(0));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(table.state("rule0").unwrap().hits(), 1_000);
    }
}
