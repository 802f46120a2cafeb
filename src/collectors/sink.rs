//! Typed metric samples produced by collectors during one scrape.
//!
//! Collectors never hold on to metric state between scrapes: everything they
//! report goes into the [`MetricSink`] handed to them for the current request,
//! and the HTTP layer turns the drained samples into Prometheus text.

use prometheus::proto::{
    Bucket, Counter, Gauge, Histogram, LabelPair, Metric, MetricFamily, MetricType,
};
use prometheus::{Encoder, TextEncoder};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Value and type of one sample.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    Counter(f64),
    Gauge(f64),
    /// Value of a column with no declared usage. Exposed as a gauge, since
    /// the text encoder cannot write untyped families.
    Untyped(f64),
    Histogram {
        count: u64,
        sum: f64,
        /// `(upper_bound, cumulative_count)` pairs.
        buckets: Vec<(f64, u64)>,
    },
}

impl SampleValue {
    const fn metric_type(&self) -> MetricType {
        match self {
            Self::Counter(_) => MetricType::COUNTER,
            Self::Gauge(_) | Self::Untyped(_) => MetricType::GAUGE,
            Self::Histogram { .. } => MetricType::HISTOGRAM,
        }
    }

    /// Scalar value, `None` for histograms.
    #[must_use]
    pub const fn scalar(&self) -> Option<f64> {
        match self {
            Self::Counter(v) | Self::Gauge(v) | Self::Untyped(v) => Some(*v),
            Self::Histogram { .. } => None,
        }
    }
}

/// One series value with its name, help text and labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub help: String,
    pub labels: Vec<(String, String)>,
    pub value: SampleValue,
}

impl Sample {
    pub fn new(name: impl Into<String>, help: impl Into<String>, value: SampleValue) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            labels: Vec::new(),
            value,
        }
    }

    pub fn gauge(name: impl Into<String>, help: impl Into<String>, value: f64) -> Self {
        Self::new(name, help, SampleValue::Gauge(value))
    }

    pub fn counter(name: impl Into<String>, help: impl Into<String>, value: f64) -> Self {
        Self::new(name, help, SampleValue::Counter(value))
    }

    #[must_use]
    pub fn label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn label_value(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Thread-safe accumulator shared by every collector task of one scrape.
#[derive(Clone, Default, Debug)]
pub struct MetricSink {
    samples: Arc<Mutex<Vec<Sample>>>,
}

impl MetricSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Sample>> {
        match self.samples.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("MetricSink lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn emit(&self, sample: Sample) {
        self.lock().push(sample);
    }

    pub fn extend(&self, samples: impl IntoIterator<Item = Sample>) {
        self.lock().extend(samples);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the samples gathered so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Sample> {
        self.lock().clone()
    }

    /// Takes every sample out of the sink.
    #[must_use]
    pub fn drain(&self) -> Vec<Sample> {
        std::mem::take(&mut *self.lock())
    }
}

fn to_metric(sample: &Sample) -> Metric {
    let mut metric = Metric::default();

    for (name, value) in &sample.labels {
        let mut pair = LabelPair::default();
        pair.set_name(name.clone());
        pair.set_value(value.clone());
        metric.label.push(pair);
    }

    match &sample.value {
        SampleValue::Counter(v) => {
            let mut counter = Counter::default();
            counter.set_value(*v);
            metric.set_counter(counter);
        }
        SampleValue::Gauge(v) | SampleValue::Untyped(v) => {
            let mut gauge = Gauge::default();
            gauge.set_value(*v);
            metric.set_gauge(gauge);
        }
        SampleValue::Histogram {
            count,
            sum,
            buckets,
        } => {
            let mut histogram = Histogram::default();
            histogram.set_sample_count(*count);
            histogram.set_sample_sum(*sum);
            for (upper_bound, cumulative) in buckets {
                let mut bucket = Bucket::default();
                bucket.set_upper_bound(*upper_bound);
                bucket.set_cumulative_count(*cumulative);
                histogram.bucket.push(bucket);
            }
            metric.set_histogram(histogram);
        }
    }

    metric
}

/// Groups samples into metric families, sorted by name. The first sample of a
/// family decides its help text and type; later samples of a different type are
/// dropped with a warning.
#[must_use]
pub fn to_families(samples: &[Sample]) -> Vec<MetricFamily> {
    let mut families: BTreeMap<&str, MetricFamily> = BTreeMap::new();

    for sample in samples {
        let family = families.entry(sample.name.as_str()).or_insert_with(|| {
            let mut family = MetricFamily::default();
            family.set_name(sample.name.clone());
            family.set_help(sample.help.clone());
            family.set_field_type(sample.value.metric_type());
            family
        });

        if family.get_field_type() != sample.value.metric_type() {
            tracing::warn!(
                metric = %sample.name,
                "dropping sample whose type differs from its metric family"
            );
            continue;
        }

        family.metric.push(to_metric(sample));
    }

    families.into_values().collect()
}

/// Renders samples in the Prometheus text exposition format.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_text(samples: &[Sample]) -> anyhow::Result<String> {
    let families = to_families(samples);
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
