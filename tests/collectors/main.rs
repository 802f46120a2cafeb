//! Integration tests for the built-in collectors
//! These tests need a live PostgreSQL; they return early when it is unreachable.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

#[path = "../common/mod.rs"]
mod common;

mod database;
mod locks;
mod namespace;
mod orchestrator;
mod postmaster;
mod replication;
mod stat_statements;

use postgres_exporter::collectors::{
    Collector, CollectorError, Instance, MetricSink, Sample, ScrapeContext,
};

/// Runs one collector against `instance` and returns what it emitted.
pub async fn run(
    collector: &dyn Collector,
    instance: &Instance,
) -> (Result<(), CollectorError>, Vec<Sample>) {
    let sink = MetricSink::new();
    let result = collector
        .update(&ScrapeContext::new(), instance, &sink)
        .await;
    (result, sink.drain())
}

pub fn names(samples: &[Sample]) -> Vec<&str> {
    samples.iter().map(|s| s.name.as_str()).collect()
}
