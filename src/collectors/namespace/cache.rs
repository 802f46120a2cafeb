//! Results of namespaces with `cache_seconds`, kept per target DSN.

use crate::collectors::Sample;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Entry {
    stored: Instant,
    ttl: Duration,
    samples: Vec<Sample>,
}

#[derive(Debug, Default)]
pub struct ResultCache {
    entries: HashMap<(String, String), Entry>,
}

impl ResultCache {
    /// Samples stored for `(target, namespace)` that are still fresh.
    pub fn get(&self, target: &str, namespace: &str) -> Option<Vec<Sample>> {
        self.entries
            .get(&(target.to_owned(), namespace.to_owned()))
            .filter(|e| e.stored.elapsed() < e.ttl)
            .map(|e| e.samples.clone())
    }

    /// Stores samples for `cache_seconds`; zero stores nothing.
    pub fn put(&mut self, target: &str, namespace: &str, cache_seconds: u64, samples: Vec<Sample>) {
        if cache_seconds == 0 {
            return;
        }
        self.entries.retain(|_, e| e.stored.elapsed() < e.ttl);
        self.entries.insert(
            (target.to_owned(), namespace.to_owned()),
            Entry {
                stored: Instant::now(),
                ttl: Duration::from_secs(cache_seconds),
                samples,
            },
        );
    }
}
