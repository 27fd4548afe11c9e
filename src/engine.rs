//! # Prediction Engine
//! The caller-facing operation: validate → estimate → log → report.
//!
//! Inference and the log insert run on a blocking worker so an async front end
//! stays responsive. At most one inference is in flight; what happens to a
//! second submission is decided by [`BusyPolicy`].
//!
//! There is no cancellation. Dropping the future returned by
//! [`Engine::submit`] does not stop a started job: the worker keeps the
//! in-flight slot until the models have run and the row is written.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::error::{InferenceError, PredictError};
use crate::features::MixInput;
use crate::history::PredictionSink;
use crate::model::StrengthEstimator;
use crate::prediction::{Prediction, Report};
use crate::rules;

/// What to do with a submission while another inference is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Fail fast with [`PredictError::Busy`].
    #[default]
    Reject,
    /// Wait for the running inference to finish.
    Queue,
}

#[derive(Debug, Error)]
#[error("unknown busy policy {0:?} (expected \"reject\" or \"queue\")")]
pub struct UnknownPolicy(String);

impl FromStr for BusyPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(BusyPolicy::Reject),
            "queue" => Ok(BusyPolicy::Queue),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

#[derive(Clone)]
pub struct Engine {
    estimator: Arc<StrengthEstimator>,
    sink: Option<Arc<dyn PredictionSink>>,
    policy: BusyPolicy,
    in_flight: Arc<Semaphore>,
}

impl Engine {
    pub fn new(estimator: StrengthEstimator, policy: BusyPolicy) -> Self {
        Self {
            estimator: Arc::new(estimator),
            sink: None,
            policy,
            in_flight: Arc::new(Semaphore::new(1)),
        }
    }

    /// Log every finished prediction to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn PredictionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn estimator(&self) -> &StrengthEstimator {
        &self.estimator
    }

    pub fn policy(&self) -> BusyPolicy {
        self.policy
    }

    /// True while an inference holds the slot.
    pub fn is_busy(&self) -> bool {
        self.in_flight.available_permits() == 0
    }

    /// Run one submission end to end.
    ///
    /// Blocking rule → [`PredictError::Blocked`], nothing evaluated or logged.
    /// Advisory warnings ride along in the [`Report`]. A failed log insert is
    /// logged and leaves `log_id` empty; the prediction is still returned.
    pub async fn submit(&self, input: MixInput) -> Result<Report, PredictError> {
        let warnings = rules::check_inputs(&input);
        for w in &warnings {
            counter!("validation_warnings_total", "rule" => w.kind.as_str()).increment(1);
        }
        if let Some(b) = rules::blocking(&warnings) {
            counter!("predictions_blocked_total").increment(1);
            info!(target: "engine", reason = %b.message, "submission blocked");
            return Err(PredictError::Blocked(b.clone()));
        }

        let slot = Arc::clone(&self.in_flight);
        let permit = match self.policy {
            BusyPolicy::Reject => slot.try_acquire_owned().map_err(|_| {
                counter!("predictions_rejected_busy_total").increment(1);
                PredictError::Busy
            })?,
            // The semaphore is never closed, so this cannot fail in practice.
            BusyPolicy::Queue => slot
                .acquire_owned()
                .await
                .map_err(|_| PredictError::Busy)?,
        };

        let estimator = Arc::clone(&self.estimator);
        let sink = self.sink.clone();
        let job = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            run_job(&estimator, sink.as_deref(), &input)
        });
        let (prediction, log_id) = job
            .await
            .map_err(|e| InferenceError::Worker(e.to_string()))??;

        counter!("predictions_total").increment(1);
        if !prediction.is_ordered() {
            warn!(
                target: "engine",
                mean = prediction.mean,
                q10 = prediction.q10,
                q90 = prediction.q90,
                "quantile interval does not bracket the mean"
            );
        }

        Ok(Report::new(input, prediction)
            .with_warnings(warnings)
            .logged_as(log_id))
    }
}

/// Worker body: evaluate, then log. Only inference errors propagate.
fn run_job(
    estimator: &StrengthEstimator,
    sink: Option<&dyn PredictionSink>,
    input: &MixInput,
) -> Result<(Prediction, Option<i64>), InferenceError> {
    let started = Instant::now();
    let prediction = estimator.predict(input).inspect_err(|e| {
        counter!("inference_failures_total").increment(1);
        error!(target: "engine", error = %e, "inference failed");
    })?;
    histogram!("inference_duration_ms").record(started.elapsed().as_secs_f64() * 1000.0);

    let log_id = match sink {
        Some(s) => match s.append(input, &prediction) {
            Ok(id) => Some(id),
            Err(e) => {
                counter!("persistence_failures_total").increment(1);
                error!(target: "engine", error = %e, "could not log prediction");
                None
            }
        },
        None => None,
    };
    Ok((prediction, log_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersistenceError;
    use crate::history::PredictionLog;
    use crate::model::{ModelInfo, Regressor};
    use crate::rules::WarningKind;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Fixed(f64);

    impl Regressor for Fixed {
        fn predict(&self, _x: &[f64]) -> Result<f64, InferenceError> {
            Ok(self.0)
        }
        fn info(&self) -> ModelInfo {
            ModelInfo {
                source: "fixed".into(),
                objective: "test".into(),
                trees: 0,
                base_score: self.0,
                quantile_alpha: None,
            }
        }
    }

    /// Blocks inside `predict` until the test sends on the channel.
    struct Gate {
        open: Mutex<mpsc::Receiver<()>>,
    }

    impl Regressor for Gate {
        fn predict(&self, _x: &[f64]) -> Result<f64, InferenceError> {
            let rx = self.open.lock().unwrap();
            let _ = rx.recv_timeout(Duration::from_secs(5));
            Ok(1.0)
        }
        fn info(&self) -> ModelInfo {
            Fixed(1.0).info()
        }
    }

    struct Failing;

    impl Regressor for Failing {
        fn predict(&self, _x: &[f64]) -> Result<f64, InferenceError> {
            Err(InferenceError::FeatureCount {
                expected: 9,
                got: 8,
            })
        }
        fn info(&self) -> ModelInfo {
            Fixed(0.0).info()
        }
    }

    struct Panicking;

    impl Regressor for Panicking {
        fn predict(&self, _x: &[f64]) -> Result<f64, InferenceError> {
            panic!("boom")
        }
        fn info(&self) -> ModelInfo {
            Fixed(0.0).info()
        }
    }

    struct FailingSink;

    impl PredictionSink for FailingSink {
        fn append(&self, _i: &MixInput, _r: &Prediction) -> Result<i64, PersistenceError> {
            Err(PersistenceError::Closed)
        }
    }

    fn fixed_estimator() -> StrengthEstimator {
        StrengthEstimator::new(
            Arc::new(Fixed(40.0)),
            Arc::new(Fixed(30.0)),
            Arc::new(Fixed(50.0)),
        )
    }

    fn good_mix() -> MixInput {
        MixInput {
            cement: 300.0,
            slag: 0.0,
            flyash: 0.0,
            water: 150.0,
            superplasticizer: 5.0,
            coarseagg: 1000.0,
            fineagg: 700.0,
            age: 28.0,
        }
    }

    fn gated_engine(policy: BusyPolicy) -> (Engine, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let gate = Arc::new(Gate {
            open: Mutex::new(rx),
        });
        let est = StrengthEstimator::new(gate, Arc::new(Fixed(0.0)), Arc::new(Fixed(2.0)));
        (Engine::new(est, policy), tx)
    }

    async fn wait_until_busy(engine: &Engine) {
        for _ in 0..200 {
            if engine.is_busy() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("engine never became busy");
    }

    #[test]
    fn policy_parses_case_insensitively() {
        assert_eq!("Queue".parse::<BusyPolicy>().unwrap(), BusyPolicy::Queue);
        assert_eq!(" reject ".parse::<BusyPolicy>().unwrap(), BusyPolicy::Reject);
        assert!("later".parse::<BusyPolicy>().is_err());
    }

    #[tokio::test]
    async fn clean_submission_is_predicted_and_logged() {
        let log = Arc::new(PredictionLog::open_in_memory().unwrap());
        log.ensure_schema().unwrap();
        let engine =
            Engine::new(fixed_estimator(), BusyPolicy::Reject).with_sink(log.clone());

        let r = engine.submit(good_mix()).await.unwrap();
        assert_eq!(r.prediction.mean, 40.0);
        assert!(r.warnings.is_empty());
        assert!(r.interval_ordered);
        let id = r.log_id.expect("logged");
        assert_eq!(log.fetch(id).unwrap().unwrap().input, good_mix());
    }

    #[tokio::test]
    async fn blocked_submission_skips_models_and_log() {
        let log = Arc::new(PredictionLog::open_in_memory().unwrap());
        log.ensure_schema().unwrap();
        let engine =
            Engine::new(fixed_estimator(), BusyPolicy::Reject).with_sink(log.clone());

        let err = engine
            .submit(MixInput {
                age: 0.0,
                ..good_mix()
            })
            .await
            .unwrap_err();
        match err {
            PredictError::Blocked(w) => assert_eq!(w.kind, WarningKind::ZeroCritical),
            other => panic!("expected Blocked, got {other:?}"),
        }
        assert_eq!(log.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn advisory_warnings_do_not_stop_prediction() {
        let engine = Engine::new(fixed_estimator(), BusyPolicy::Reject);
        let r = engine
            .submit(MixInput {
                superplasticizer: 25.0,
                ..good_mix()
            })
            .await
            .unwrap();
        assert_eq!(r.warnings.len(), 1);
        assert_eq!(r.prediction.q90, 50.0);
        assert_eq!(r.log_id, None);
    }

    #[tokio::test]
    async fn log_failure_keeps_the_prediction() {
        let engine =
            Engine::new(fixed_estimator(), BusyPolicy::Reject).with_sink(Arc::new(FailingSink));
        let r = engine.submit(good_mix()).await.unwrap();
        assert_eq!(r.prediction.q10, 30.0);
        assert_eq!(r.log_id, None);
    }

    fn logged_engine(mean: Arc<dyn Regressor>) -> (Engine, Arc<PredictionLog>) {
        let log = Arc::new(PredictionLog::open_in_memory().unwrap());
        log.ensure_schema().unwrap();
        let est = StrengthEstimator::new(mean, Arc::new(Fixed(30.0)), Arc::new(Fixed(50.0)));
        (
            Engine::new(est, BusyPolicy::Reject).with_sink(log.clone()),
            log,
        )
    }

    #[tokio::test]
    async fn inference_failure_writes_no_row_and_frees_slot() {
        let (engine, log) = logged_engine(Arc::new(Failing));
        for _ in 0..2 {
            let err = engine.submit(good_mix()).await.unwrap_err();
            assert!(matches!(
                err,
                PredictError::Inference(InferenceError::FeatureCount { .. })
            ));
        }
        assert_eq!(log.count().unwrap(), 0);
        assert!(!engine.is_busy());
    }

    #[tokio::test]
    async fn worker_panic_is_an_inference_error() {
        let (engine, log) = logged_engine(Arc::new(Panicking));
        let err = engine.submit(good_mix()).await.unwrap_err();
        match err {
            PredictError::Inference(InferenceError::Worker(msg)) => {
                assert!(msg.contains("panic"), "{msg}")
            }
            other => panic!("expected Worker error, got {other:?}"),
        }
        assert_eq!(log.count().unwrap(), 0);
        assert!(!engine.is_busy());

        // The next submission reaches the models again instead of hitting Busy.
        assert!(matches!(
            engine.submit(good_mix()).await,
            Err(PredictError::Inference(InferenceError::Worker(_)))
        ));
    }

    #[tokio::test]
    async fn nan_output_is_refused_before_logging() {
        let (engine, log) = logged_engine(Arc::new(Fixed(f64::NAN)));
        let err = engine.submit(good_mix()).await.unwrap_err();
        assert!(matches!(
            err,
            PredictError::Inference(InferenceError::NonFinite { role: "mean", .. })
        ));
        assert_eq!(log.count().unwrap(), 0);
        assert!(!engine.is_busy());
    }

    #[tokio::test]
    async fn reject_policy_refuses_overlap() {
        let (engine, open) = gated_engine(BusyPolicy::Reject);
        let first = {
            let e = engine.clone();
            tokio::spawn(async move { e.submit(good_mix()).await })
        };
        wait_until_busy(&engine).await;

        assert!(matches!(
            engine.submit(good_mix()).await,
            Err(PredictError::Busy)
        ));

        open.send(()).unwrap();
        assert!(first.await.unwrap().is_ok());
        assert!(!engine.is_busy());
    }

    #[tokio::test]
    async fn queue_policy_waits_for_the_running_job() {
        let (engine, open) = gated_engine(BusyPolicy::Queue);
        let first = {
            let e = engine.clone();
            tokio::spawn(async move { e.submit(good_mix()).await })
        };
        wait_until_busy(&engine).await;

        let second = {
            let e = engine.clone();
            tokio::spawn(async move { e.submit(good_mix()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());

        open.send(()).unwrap();
        open.send(()).unwrap();
        assert!(first.await.unwrap().is_ok());
        assert!(second.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn dropped_caller_keeps_slot_until_job_ends() {
        let (engine, open) = gated_engine(BusyPolicy::Reject);
        let first = {
            let e = engine.clone();
            tokio::spawn(async move { e.submit(good_mix()).await })
        };
        wait_until_busy(&engine).await;
        first.abort();
        let _ = first.await;
        assert!(engine.is_busy());

        open.send(()).unwrap();
        for _ in 0..200 {
            if !engine.is_busy() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("slot was never released");
    }
}
