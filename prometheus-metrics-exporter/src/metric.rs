//! Metric kinds, samples and the value accessor contract.
//!
//! The exporter never stores metric values. Each registered metric hands over
//! a [`MetricSource`] which is asked for a fresh [`Sample`] on every scrape.

use std::fmt;

use parking_lot::Mutex;
use thiserror::Error;

/// The kind of a metric as reported by the originating metric library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Gauge,
    Counter,
    Histogram,
    Meter,
    Timer,
}

impl MetricKind {
    /// The exposition kind this metric is exported as.
    pub fn wire_kind(&self) -> WireKind {
        match self {
            MetricKind::Gauge => WireKind::Gauge,
            MetricKind::Counter | MetricKind::Meter => WireKind::Counter,
            MetricKind::Histogram | MetricKind::Timer => WireKind::Summary,
        }
    }
}

/// The shape of a metric family on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireKind {
    Gauge,
    Counter,
    Summary,
}

impl WireKind {
    /// Get the TYPE comment string for the text exposition format.
    pub fn as_str(&self) -> &'static str {
        match self {
            WireKind::Gauge => "gauge",
            WireKind::Counter => "counter",
            WireKind::Summary => "summary",
        }
    }
}

impl fmt::Display for WireKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Count, sum and quantiles of a histogram or timer at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct SummarySnapshot {
    pub count: u64,
    pub sum: f64,
    /// `(quantile level, value)` pairs, in the order they should be exported.
    pub quantiles: Vec<(f64, f64)>,
}

impl SummarySnapshot {
    /// Quantile levels exported for histograms and timers.
    pub const DEFAULT_QUANTILES: [f64; 6] = [0.5, 0.75, 0.95, 0.98, 0.99, 0.999];

    /// Build a snapshot from raw values, computing the default quantiles.
    ///
    /// Quantiles use the nearest-rank method on the sorted values; an empty
    /// input yields zero for every level.
    pub fn from_values(values: &[f64]) -> Self {
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let quantiles = Self::DEFAULT_QUANTILES
            .iter()
            .map(|&q| {
                if sorted.is_empty() {
                    return (q, 0.0);
                }
                let rank = (q * sorted.len() as f64).ceil() as usize;
                let idx = rank.clamp(1, sorted.len()) - 1;
                (q, sorted[idx])
            })
            .collect();

        Self {
            count: sorted.len() as u64,
            sum: sorted.iter().sum(),
            quantiles,
        }
    }
}

/// A live reading taken from a [`MetricSource`].
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    /// Point value of a gauge or cumulative value of a counter/meter.
    Value(f64),
    /// Histogram or timer snapshot.
    Summary(SummarySnapshot),
}

impl Sample {
    fn shape(&self) -> &'static str {
        match self {
            Sample::Value(_) => "value",
            Sample::Summary(_) => "summary",
        }
    }

    /// Check that this sample can be exported as a family of `kind`.
    pub fn check_kind(&self, kind: WireKind) -> Result<(), SampleError> {
        let ok = matches!(
            (kind, self),
            (WireKind::Gauge | WireKind::Counter, Sample::Value(_))
                | (WireKind::Summary, Sample::Summary(_))
        );
        if ok {
            Ok(())
        } else {
            Err(SampleError::KindMismatch {
                expected: kind,
                actual: self.shape(),
            })
        }
    }
}

/// Failure to read a metric value.
#[derive(Debug, Error)]
pub enum SampleError {
    /// The underlying value could not be read.
    #[error("value unavailable: {0}")]
    Unavailable(String),

    /// The accessor returned a sample that does not fit its family.
    #[error("expected a {expected} sample, got a {actual}")]
    KindMismatch {
        expected: WireKind,
        actual: &'static str,
    },
}

/// Live value accessor of one registered metric.
///
/// `sample` is called once per scrape and must not cache. Implementations may
/// keep state between calls (see [`ReadoutGauge`]).
pub trait MetricSource: Send + Sync {
    fn sample(&self) -> Result<Sample, SampleError>;
}

impl<F> MetricSource for F
where
    F: Fn() -> Result<Sample, SampleError> + Send + Sync,
{
    fn sample(&self) -> Result<Sample, SampleError> {
        self()
    }
}

/// Gauge that reports the value of a closure.
pub struct FnGauge<F>(F);

impl<F> FnGauge<F>
where
    F: Fn() -> f64 + Send + Sync,
{
    pub fn new(read: F) -> Self {
        Self(read)
    }
}

impl<F> MetricSource for FnGauge<F>
where
    F: Fn() -> f64 + Send + Sync,
{
    fn sample(&self) -> Result<Sample, SampleError> {
        Ok(Sample::Value((self.0)()))
    }
}

/// Gauge that reports the change of a cumulative value since its previous
/// reading.
///
/// Reading it moves the baseline forward. Two scrapes overlapping on the same
/// instance split the delta between them; each instance is expected to be
/// polled by one scraper.
pub struct ReadoutGauge<F> {
    read: F,
    last: Mutex<u64>,
}

impl<F> ReadoutGauge<F>
where
    F: Fn() -> u64 + Send + Sync,
{
    pub fn new(read: F) -> Self {
        Self {
            read,
            last: Mutex::new(0),
        }
    }
}

impl<F> MetricSource for ReadoutGauge<F>
where
    F: Fn() -> u64 + Send + Sync,
{
    fn sample(&self) -> Result<Sample, SampleError> {
        let current = (self.read)();
        let mut last = self.last.lock();
        let delta = current as f64 - *last as f64;
        *last = current;
        Ok(Sample::Value(delta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_wire_kind_mapping() {
        assert_eq!(MetricKind::Gauge.wire_kind(), WireKind::Gauge);
        assert_eq!(MetricKind::Counter.wire_kind(), WireKind::Counter);
        assert_eq!(MetricKind::Meter.wire_kind(), WireKind::Counter);
        assert_eq!(MetricKind::Histogram.wire_kind(), WireKind::Summary);
        assert_eq!(MetricKind::Timer.wire_kind(), WireKind::Summary);
    }

    #[test]
    fn test_check_kind() {
        assert!(Sample::Value(1.0).check_kind(WireKind::Gauge).is_ok());
        assert!(Sample::Value(1.0).check_kind(WireKind::Counter).is_ok());

        let err = Sample::Value(1.0)
            .check_kind(WireKind::Summary)
            .unwrap_err();
        assert_eq!(err.to_string(), "expected a summary sample, got a value");

        let summary = Sample::Summary(SummarySnapshot::from_values(&[1.0]));
        assert!(summary.check_kind(WireKind::Summary).is_ok());
        assert!(summary.check_kind(WireKind::Gauge).is_err());
    }

    #[test]
    fn test_summary_from_single_value() {
        let snapshot = SummarySnapshot::from_values(&[1.0]);

        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.sum, 1.0);
        assert_eq!(snapshot.quantiles.len(), 6);
        assert!(snapshot.quantiles.iter().all(|&(_, v)| v == 1.0));
    }

    #[test]
    fn test_summary_quantiles_nearest_rank() {
        let values: Vec<f64> = (1..=100).rev().map(f64::from).collect();
        let snapshot = SummarySnapshot::from_values(&values);

        assert_eq!(snapshot.count, 100);
        assert_eq!(snapshot.sum, 5050.0);
        assert_eq!(snapshot.quantiles[0], (0.5, 50.0));
        assert_eq!(snapshot.quantiles[2], (0.95, 95.0));
        assert_eq!(snapshot.quantiles[5], (0.999, 100.0));
    }

    #[test]
    fn test_summary_empty() {
        let snapshot = SummarySnapshot::from_values(&[]);
        assert_eq!(snapshot.count, 0);
        assert_eq!(snapshot.sum, 0.0);
        assert!(snapshot.quantiles.iter().all(|&(_, v)| v == 0.0));
    }

    #[test]
    fn test_closure_is_a_source() {
        let source: Arc<dyn MetricSource> =
            Arc::new(|| -> Result<Sample, SampleError> { Ok(Sample::Value(7.0)) });
        assert_eq!(source.sample().unwrap(), Sample::Value(7.0));

        let failing: Arc<dyn MetricSource> = Arc::new(|| -> Result<Sample, SampleError> {
            Err(SampleError::Unavailable("gone".into()))
        });
        assert!(failing.sample().is_err());
    }

    #[test]
    fn test_fn_gauge() {
        let gauge = FnGauge::new(|| 42.5);
        assert_eq!(gauge.sample().unwrap(), Sample::Value(42.5));
    }

    #[test]
    fn test_readout_gauge_reports_deltas() {
        let total = Arc::new(AtomicU64::new(10));
        let reader = total.clone();
        let gauge = ReadoutGauge::new(move || reader.load(Ordering::SeqCst));

        assert_eq!(gauge.sample().unwrap(), Sample::Value(10.0));
        assert_eq!(gauge.sample().unwrap(), Sample::Value(0.0));

        total.store(25, Ordering::SeqCst);
        assert_eq!(gauge.sample().unwrap(), Sample::Value(15.0));
    }
}
