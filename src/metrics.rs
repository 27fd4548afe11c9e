use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and describe the pipeline series.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
        describe();
        Ok(Self { handle })
    }

    /// Current exposition text.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

fn describe() {
    describe_counter!("predictions_total", "Submissions that produced a prediction.");
    describe_counter!(
        "predictions_blocked_total",
        "Submissions stopped by the zero-field rule."
    );
    describe_counter!(
        "predictions_rejected_busy_total",
        "Submissions refused while an inference was running."
    );
    describe_counter!(
        "validation_warnings_total",
        "Warnings emitted, labelled by rule."
    );
    describe_counter!("inference_failures_total", "Model evaluations that failed.");
    describe_counter!(
        "persistence_failures_total",
        "Predictions that could not be written to the log."
    );
    describe_histogram!(
        "inference_duration_ms",
        Unit::Milliseconds,
        "Wall time of the three model evaluations."
    );
}
