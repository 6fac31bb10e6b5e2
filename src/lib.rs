#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Event Collator
//!
//! Suppresses bursts of repeated events in a processing pipeline and reports
//! them periodically as one summary event per rule.
//!
//! ## Features
//!
//! - **Rules** backed by declarative conditions or any [`Predicate`]
//! - **One-second suppression window** per rule, safe under concurrent callers
//! - **Periodic summaries** published in one batch per tick to a tower-based sink
//! - **Late sink bootstrap** with a bounded wait and prompt cancellation
//!
//! ## Quick Start
//!
//! ```rust
//! use event_collator::{Collator, CollatorConfig, Event, MemorySink, SinkSlot};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = CollatorConfig::from_json_value(json!({
//!         "collation_interval_sec": 30,
//!         "rules": { "oom": { "when": { "contains": { "message": "out of memory" } } } }
//!     }))
//!     .unwrap();
//!     let collator = Collator::from_config(&config).unwrap();
//!
//!     let sink = MemorySink::new();
//!     let handle = collator.start(SinkSlot::with_sink(sink.clone()));
//!
//!     let event = Event::from_value(json!({
//!         "message": "kernel: out of memory",
//!         "@realtime_timestamp": 1_700_000_000_000_000_000u64,
//!     }))
//!     .unwrap();
//!     assert!(collator.filter(event.clone()).is_some());
//!     assert!(collator.filter(event).is_none());
//!
//!     handle.shutdown().await;
//! }
//! ```

pub mod bootstrap;
pub mod clock;
pub mod collator;
pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod predicate;
pub mod prelude;
pub mod scheduler;
pub mod sink;
pub mod sleeper;
pub mod summary;
pub mod table;

// Re-exports
pub use bootstrap::{await_sink, ConnectPolicy, SinkConnection, SinkSlot};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collator::{Collator, CollatorBuilder, CollatorHandle};
pub use config::{CollatorConfig, RuleConfig, SinkConnectConfig};
pub use error::CollatorError;
pub use event::Event;
pub use filter::{EventFilter, FieldPaths, Verdict};
pub use predicate::{predicate_fn, Condition, ConditionSpec, FnPredicate, Predicate};
pub use scheduler::{FlushReport, FlushScheduler, Flusher, MAX_COLLATION_INTERVAL};
pub use sink::{
    publish, BoxSinkFuture, ChannelSink, ChannelSinkError, LogSink, MemorySink, NullSink,
    SummaryBatch, SummarySink,
};
pub use sleeper::{RecordingSleeper, Sleeper, TokioSleeper};
pub use summary::{summary_message, Collation, SummaryBuilder, SummaryRecord};
pub use table::{CollationTable, Rule, RuleSnapshot, RuleState, SUPPRESSION_WINDOW_NANOS};
