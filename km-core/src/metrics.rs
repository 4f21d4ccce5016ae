use std::fmt::Write;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use metrics::{
    Counter,
    Gauge,
    Histogram,
    Key,
    KeyName,
    Metadata,
    Recorder,
    SharedString,
    Unit,
};
use metrics_util::registry::{
    AtomicStorage,
    Registry,
};

/// In-process metrics store that renders itself in the Prometheus text exposition format.
/// Histograms are accepted but not exported.
#[derive(Clone)]
pub struct PrometheusRecorder {
    registry: Arc<Registry<Key, AtomicStorage>>,
}

fn render_key(key: &Key) -> String {
    let labels: Vec<_> = key.labels().map(|l| format!("{}=\"{}\"", l.key(), l.value())).collect();
    if labels.is_empty() {
        key.name().into()
    } else {
        format!("{}{{{}}}", key.name(), labels.join(","))
    }
}

impl PrometheusRecorder {
    pub fn new() -> PrometheusRecorder {
        PrometheusRecorder { registry: Arc::new(Registry::atomic()) }
    }

    pub fn install(&self) -> anyhow::Result<()> {
        metrics::set_global_recorder(self.clone())?;
        Ok(())
    }

    // Lines are sorted so that scrapes are stable
    pub fn render(&self) -> String {
        let mut lines = vec![];
        self.registry.visit_counters(|key, counter| {
            lines.push(format!("{} {}", render_key(key), counter.load(Ordering::Relaxed)));
        });
        self.registry.visit_gauges(|key, gauge| {
            lines.push(format!("{} {}", render_key(key), f64::from_bits(gauge.load(Ordering::Relaxed))));
        });
        lines.sort();

        lines.into_iter().fold(String::new(), |mut out, line| {
            let _ = writeln!(out, "{line}");
            out
        })
    }
}

impl Default for PrometheusRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Recorder for PrometheusRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        self.registry.get_or_create_counter(key, |c| Counter::from_arc(c.clone()))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        self.registry.get_or_create_gauge(key, |g| Gauge::from_arc(g.clone()))
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        self.registry.get_or_create_histogram(key, |h| Histogram::from_arc(h.clone()))
    }
}
