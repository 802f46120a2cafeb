//! Prometheus exporter for PostgreSQL.
//!
//! Collectors are registered in a [`collectors::CollectorRegistry`], fanned
//! out concurrently per scrape by [`collectors::ScrapeOrchestrator`], and
//! version-aware SQL-to-metric mapping lives in [`mapping`].

pub mod cli;
pub mod collectors;
pub mod dsn;
pub mod exporter;
pub mod mapping;
pub mod version;
