use prometheus::{Encoder, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub order_transitions_total: IntCounterVec,
    pub matching_runs_total: IntCounterVec,
    pub matching_latency_seconds: HistogramVec,
    pub refund_instructions_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let order_transitions_total = IntCounterVec::new(
            Opts::new(
                "order_transitions_total",
                "Order state transitions by transition and outcome",
            ),
            &["transition", "outcome"],
        )
        .expect("valid order_transitions_total metric");

        let matching_runs_total = IntCounterVec::new(
            Opts::new("matching_runs_total", "Matching runs by demand type and outcome"),
            &["demand_type", "outcome"],
        )
        .expect("valid matching_runs_total metric");

        let matching_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "matching_latency_seconds",
                "Latency of a matching run in seconds",
            ),
            &["demand_type"],
        )
        .expect("valid matching_latency_seconds metric");

        let refund_instructions_total = IntCounterVec::new(
            Opts::new(
                "refund_instructions_total",
                "Refund instructions issued on cancellation, by policy tier",
            ),
            &["policy"],
        )
        .expect("valid refund_instructions_total metric");

        registry
            .register(Box::new(order_transitions_total.clone()))
            .expect("register order_transitions_total");
        registry
            .register(Box::new(matching_runs_total.clone()))
            .expect("register matching_runs_total");
        registry
            .register(Box::new(matching_latency_seconds.clone()))
            .expect("register matching_latency_seconds");
        registry
            .register(Box::new(refund_instructions_total.clone()))
            .expect("register refund_instructions_total");

        Self {
            registry,
            order_transitions_total,
            matching_runs_total,
            matching_latency_seconds,
            refund_instructions_total,
        }
    }

    pub fn record_transition(&self, transition: &str, ok: bool) {
        let outcome = if ok { "success" } else { "rejected" };
        self.order_transitions_total
            .with_label_values(&[transition, outcome])
            .inc();
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
