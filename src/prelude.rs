//! Convenient re-exports for embedding the collator in a pipeline.
pub use crate::{
    bootstrap::{ConnectPolicy, SinkSlot},
    collator::{Collator, CollatorBuilder, CollatorHandle},
    config::CollatorConfig,
    error::CollatorError,
    event::Event,
    filter::Verdict,
    predicate::{predicate_fn, ConditionSpec, Predicate},
    sink::{LogSink, MemorySink, SummaryBatch, SummarySink},
};
