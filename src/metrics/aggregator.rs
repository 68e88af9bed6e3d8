//! Combines individual data points into one metric per identity per window.
//!
//! A single mutex guards the identity map. Handles compute their identity
//! once at creation, so recording a value only costs a lock and a hash
//! lookup. Draining swaps the map out under the lock and converts entries
//! after releasing it.

use crate::core::attributes::{canonical_json, Attributes};
use crate::harvester::{BeforeHarvestHook, Harvester};
use crate::metrics::types::{Count, Gauge, Metric, MetricKind, Summary};
use ahash::AHashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Aggregation key: name, kind and canonical attribute JSON.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MetricIdentity {
    name: Arc<str>,
    kind: MetricKind,
    attributes_json: Arc<str>,
}

type MetricMap = AHashMap<MetricIdentity, Metric>;

#[derive(Debug, Default)]
struct Shared {
    metrics: Mutex<MetricMap>,
}

/// Identity plus a reference to the aggregator it records into.
#[derive(Debug, Clone)]
struct Binding {
    identity: MetricIdentity,
    attributes: Arc<Attributes>,
    shared: Arc<Shared>,
}

impl Binding {
    /// Runs `update` on the entry for this identity, creating it with `create`
    /// on first use in the window.
    fn update<C, U>(&self, create: C, update: U)
    where
        C: FnOnce(&Self) -> Metric,
        U: FnOnce(&mut Metric),
    {
        let mut metrics = self.shared.metrics.lock();
        match metrics.get_mut(&self.identity) {
            Some(metric) => update(metric),
            None => {
                metrics.insert(self.identity.clone(), create(self));
            },
        }
    }

    fn name(&self) -> String {
        self.identity.name.to_string()
    }

    fn attributes(&self) -> Attributes {
        Attributes::clone(&self.attributes)
    }
}

/// Combines individual data points into metrics.
///
/// Cloning is cheap; clones record into the same map. A disabled aggregator
/// hands out handles that ignore every call.
#[derive(Debug, Clone, Default)]
pub struct MetricAggregator {
    shared: Option<Arc<Shared>>,
}

impl MetricAggregator {
    /// Create a new aggregator
    pub fn new() -> Self {
        Self {
            shared: Some(Arc::new(Shared::default())),
        }
    }

    /// An aggregator whose handles do nothing.
    pub fn disabled() -> Self {
        Self { shared: None }
    }

    /// Whether this aggregator records anything.
    pub fn is_enabled(&self) -> bool {
        self.shared.is_some()
    }

    fn bind(&self, name: &str, kind: MetricKind, attributes: Attributes) -> Option<Binding> {
        let shared = self.shared.as_ref()?;
        Some(Binding {
            identity: MetricIdentity {
                name: Arc::from(name),
                kind,
                attributes_json: Arc::from(canonical_json(&attributes)),
            },
            attributes: Arc::new(attributes),
            shared: Arc::clone(shared),
        })
    }

    /// Creates a new Count handle.
    pub fn new_count(&self, name: &str, attributes: Attributes) -> CountHandle {
        CountHandle {
            binding: self.bind(name, MetricKind::Count, attributes),
        }
    }

    /// Creates a new Gauge handle.
    pub fn new_gauge(&self, name: &str, attributes: Attributes) -> GaugeHandle {
        GaugeHandle {
            binding: self.bind(name, MetricKind::Gauge, attributes),
        }
    }

    /// Creates a new Summary handle.
    pub fn new_summary(&self, name: &str, attributes: Attributes) -> SummaryHandle {
        SummaryHandle {
            binding: self.bind(name, MetricKind::Summary, attributes),
        }
    }

    /// Returns the metrics aggregated since the last call and starts a new
    /// window.
    pub fn metrics(&self) -> Vec<Metric> {
        let Some(shared) = &self.shared else {
            return Vec::new();
        };

        let drained = {
            let mut metrics = shared.metrics.lock();
            let capacity = metrics.len();
            std::mem::replace(&mut *metrics, MetricMap::with_capacity(capacity))
        };

        drained.into_values().collect()
    }

    /// Number of identities recorded in the current window.
    pub fn len(&self) -> usize {
        self.shared
            .as_ref()
            .map_or(0, |shared| shared.metrics.lock().len())
    }

    /// Returns true when nothing was recorded in the current window.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pre-harvest hook that moves the aggregated metrics into the
    /// harvester right before its buffers are swapped.
    pub fn harvest_hook(&self) -> BeforeHarvestHook {
        let aggregator = self.clone();
        Arc::new(move |harvester: &Harvester| {
            for metric in aggregator.metrics() {
                harvester.record_metric(metric);
            }
        })
    }
}

/// Counts the number of times an event occurred.
///
/// The aggregated value is reset every harvest, so the reported value is the
/// increase over the window.
#[derive(Debug, Clone, Default)]
pub struct CountHandle {
    binding: Option<Binding>,
}

impl CountHandle {
    /// Increases the count by one.
    pub fn increment(&self) {
        self.increase(1.0);
    }

    /// Increases the count by `value`. Negative values are ignored.
    pub fn increase(&self, value: f64) {
        let Some(binding) = &self.binding else {
            return;
        };
        if value.is_nan() || value < 0.0 {
            return;
        }

        binding.update(
            |b| {
                Metric::Count(Count {
                    name: b.name(),
                    attributes: b.attributes(),
                    value,
                    timestamp: None,
                    interval: None,
                })
            },
            |metric| {
                if let Metric::Count(count) = metric {
                    count.value += value;
                }
            },
        );
    }
}

/// Records a value that can go up and down. Only the most recent value of a
/// window is reported.
#[derive(Debug, Clone, Default)]
pub struct GaugeHandle {
    binding: Option<Binding>,
}

impl GaugeHandle {
    /// Records the value with the current time.
    pub fn value(&self, value: f64) {
        self.value_at(value, SystemTime::now());
    }

    /// Records the value with an explicit timestamp.
    pub fn value_at(&self, value: f64, timestamp: SystemTime) {
        let Some(binding) = &self.binding else {
            return;
        };

        binding.update(
            |b| {
                Metric::Gauge(Gauge {
                    name: b.name(),
                    attributes: b.attributes(),
                    value,
                    timestamp,
                })
            },
            |metric| {
                if let Metric::Gauge(gauge) = metric {
                    gauge.value = value;
                    gauge.timestamp = timestamp;
                }
            },
        );
    }
}

/// Reports count, sum, min and max of the observations in a window.
#[derive(Debug, Clone, Default)]
pub struct SummaryHandle {
    binding: Option<Binding>,
}

impl SummaryHandle {
    /// Adds an observation.
    pub fn record(&self, value: f64) {
        let Some(binding) = &self.binding else {
            return;
        };

        binding.update(
            |b| {
                Metric::Summary(Summary {
                    name: b.name(),
                    attributes: b.attributes(),
                    count: 1.0,
                    sum: value,
                    min: value,
                    max: value,
                    timestamp: None,
                    interval: None,
                })
            },
            |metric| {
                if let Metric::Summary(summary) = metric {
                    summary.count += 1.0;
                    summary.sum += value;
                    if value < summary.min {
                        summary.min = value;
                    }
                    if value > summary.max {
                        summary.max = value;
                    }
                }
            },
        );
    }

    /// Adds a duration observation in milliseconds.
    pub fn record_duration(&self, duration: Duration) {
        self.record(duration.as_secs_f64() * 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::attributes::{attributes, AttributeValue};
    use std::time::UNIX_EPOCH;

    fn nov_28_2014() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_417_136_460)
    }

    fn sorted(mut metrics: Vec<Metric>) -> Vec<Metric> {
        metrics.sort_by(|a, b| {
            (a.name(), a.kind(), canonical_json(a.attributes()))
                .cmp(&(b.name(), b.kind(), canonical_json(b.attributes())))
        });
        metrics
    }

    #[test]
    fn test_count_sums_increases() {
        let ag = MetricAggregator::new();
        let count = ag.new_count("requests", Attributes::new());
        count.increment();
        count.increase(2.5);
        count.increase(0.0);

        let metrics = ag.metrics();
        assert_eq!(metrics.len(), 1);
        match &metrics[0] {
            Metric::Count(c) => {
                assert_eq!(c.value, 3.5);
                assert!(c.timestamp.is_none());
                assert!(c.interval.is_none());
            },
            other => panic!("Expected count, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_increase_ignored() {
        let ag = MetricAggregator::new();
        let count = ag.new_count("requests", Attributes::new());
        count.increase(-1.0);
        assert!(ag.is_empty());

        count.increase(4.0);
        count.increase(-10.0);
        count.increase(f64::NAN);
        match &ag.metrics()[0] {
            Metric::Count(c) => assert_eq!(c.value, 4.0),
            other => panic!("Expected count, got {:?}", other),
        }
    }

    #[test]
    fn test_gauge_last_write_wins() {
        let ag = MetricAggregator::new();
        let gauge = ag.new_gauge("temp", Attributes::new());
        let later = nov_28_2014() + Duration::from_secs(1);
        gauge.value_at(1.0, nov_28_2014());
        gauge.value_at(7.0, later);

        match &ag.metrics()[0] {
            Metric::Gauge(g) => {
                assert_eq!(g.value, 7.0);
                assert_eq!(g.timestamp, later);
            },
            other => panic!("Expected gauge, got {:?}", other),
        }
    }

    #[test]
    fn test_summary_statistics() {
        let ag = MetricAggregator::new();
        let summary = ag.new_summary("latency", Attributes::new());
        for v in [5.0, 2.0, 9.0, 4.0] {
            summary.record(v);
        }

        match &ag.metrics()[0] {
            Metric::Summary(s) => {
                assert_eq!(s.count, 4.0);
                assert_eq!(s.sum, 20.0);
                assert_eq!(s.min, 2.0);
                assert_eq!(s.max, 9.0);
            },
            other => panic!("Expected summary, got {:?}", other),
        }
    }

    #[test]
    fn test_summary_min_max_from_first_observation() {
        let ag = MetricAggregator::new();
        let summary = ag.new_summary("positive", Attributes::new());
        summary.record(3.0);
        summary.record(8.0);

        match &ag.metrics()[0] {
            Metric::Summary(s) => {
                assert_eq!(s.min, 3.0);
                assert_eq!(s.max, 8.0);
            },
            other => panic!("Expected summary, got {:?}", other),
        }
    }

    #[test]
    fn test_record_duration_in_millis() {
        let ag = MetricAggregator::new();
        ag.new_summary("d", Attributes::new())
            .record_duration(Duration::from_millis(1500));

        match &ag.metrics()[0] {
            Metric::Summary(s) => assert_eq!(s.sum, 1500.0),
            other => panic!("Expected summary, got {:?}", other),
        }
    }

    #[test]
    fn test_different_attributes() {
        let ag = MetricAggregator::new();
        ag.new_gauge("myGauge", attributes([("zip", "zap")]))
            .value_at(1.0, nov_28_2014());
        ag.new_gauge("myGauge", attributes([("zip", "zup")]))
            .value_at(2.0, nov_28_2014());

        let metrics = sorted(ag.metrics());
        assert_eq!(metrics.len(), 2);
        assert_eq!(
            metrics[0].attributes().get("zip"),
            Some(&AttributeValue::from("zap"))
        );
        assert_eq!(
            metrics[1].attributes().get("zip"),
            Some(&AttributeValue::from("zup"))
        );
    }

    #[test]
    fn test_same_name_different_types() {
        let ag = MetricAggregator::new();
        let attrs = attributes([("zip", "zap")]);
        ag.new_gauge("metric", attrs.clone()).value_at(1.0, nov_28_2014());
        ag.new_count("metric", attrs.clone()).increment();
        ag.new_summary("metric", attrs).record(1.0);

        let kinds: Vec<MetricKind> = sorted(ag.metrics()).iter().map(Metric::kind).collect();
        assert_eq!(
            kinds,
            vec![MetricKind::Count, MetricKind::Gauge, MetricKind::Summary]
        );
    }

    #[test]
    fn test_attribute_order_does_not_matter() {
        let ag = MetricAggregator::new();
        let mut first = Attributes::new();
        first.insert("b".to_string(), 2i64.into());
        first.insert("a".to_string(), 1i64.into());
        let mut second = Attributes::new();
        second.insert("a".to_string(), 1i64.into());
        second.insert("b".to_string(), 2i64.into());

        ag.new_count("c", first).increment();
        ag.new_count("c", second).increment();

        let metrics = ag.metrics();
        assert_eq!(metrics.len(), 1);
        match &metrics[0] {
            Metric::Count(c) => assert_eq!(c.value, 2.0),
            other => panic!("Expected count, got {:?}", other),
        }
    }

    #[test]
    fn test_many_attributes() {
        let ag = MetricAggregator::new();
        let attrs: Attributes = (0..100)
            .map(|i| (i.to_string(), AttributeValue::Int(i)))
            .collect();
        ag.new_gauge("myGauge", attrs.clone()).value_at(1.0, nov_28_2014());
        ag.new_gauge("myGauge", attrs).value_at(2.0, nov_28_2014());
        assert_eq!(ag.len(), 1);
    }

    #[test]
    fn test_drain_resets() {
        let ag = MetricAggregator::new();
        ag.new_count("x", Attributes::new()).increment();

        assert_eq!(ag.metrics().len(), 1);
        assert!(ag.metrics().is_empty());

        ag.new_count("x", Attributes::new()).increment();
        match &ag.metrics()[0] {
            Metric::Count(c) => assert_eq!(c.value, 1.0),
            other => panic!("Expected count, got {:?}", other),
        }
    }

    #[test]
    fn test_disabled_aggregator_is_noop() {
        let ag = MetricAggregator::disabled();
        assert!(!ag.is_enabled());
        ag.new_count("x", Attributes::new()).increment();
        ag.new_gauge("y", Attributes::new()).value(1.0);
        ag.new_summary("z", Attributes::new()).record(1.0);
        assert!(ag.metrics().is_empty());
        assert!(ag.is_empty());
    }

    #[test]
    fn test_default_handles_are_noop() {
        CountHandle::default().increment();
        GaugeHandle::default().value(1.0);
        SummaryHandle::default().record_duration(Duration::from_secs(1));
    }

    #[test]
    fn test_concurrent_increments() {
        let ag = MetricAggregator::new();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let count = ag.new_count("hits", attributes([("route", "/")]));
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        count.increment();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        match &ag.metrics()[0] {
            Metric::Count(c) => assert_eq!(c.value, 8000.0),
            other => panic!("Expected count, got {:?}", other),
        }
    }
}
