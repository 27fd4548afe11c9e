// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod form;
pub mod history;
pub mod metrics;
pub mod model;
pub mod prediction;
pub mod rules;

// ---- Re-exports for stable public API ----
pub use crate::engine::{BusyPolicy, Engine};
pub use crate::error::{InferenceError, InputFormatError, ModelLoadError, PersistenceError, PredictError};
pub use crate::features::{Feature, MixInput};
pub use crate::history::{PredictionLog, PredictionSink};
pub use crate::model::{ModelPaths, Regressor, StrengthEstimator};
pub use crate::prediction::{Prediction, Report};
pub use crate::rules::{check_inputs, Warning, WarningKind};

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::AppConfig;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "concrete_strength_predictor=info,warn";

/// Install the global subscriber. Logs go to stderr so stdout stays clean
/// for results. `json` switches to one JSON object per line.
pub fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let registry = tracing_subscriber::registry().with(filter);
    // try_init: a subscriber may already be installed (tests, embedding).
    let _ = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init()
    };
}

/// Everything a front end needs, wired from config.
pub struct App {
    pub engine: Engine,
    pub log: Option<Arc<PredictionLog>>,
}

impl App {
    /// Load the models (fatal on failure) and open the prediction log.
    ///
    /// A log that cannot be opened or prepared is reported and skipped: the
    /// app still predicts, it just does not record.
    pub fn start(cfg: &AppConfig) -> anyhow::Result<Self> {
        let estimator = StrengthEstimator::load(&cfg.models).context("loading models")?;
        let mut engine = Engine::new(estimator, cfg.engine.busy_policy);

        let log = if cfg.database.enabled {
            open_log(cfg)
        } else {
            info!(target: "history", "prediction log disabled by config");
            None
        };
        if let Some(l) = &log {
            engine = engine.with_sink(l.clone());
        }

        info!(policy = ?engine.policy(), logging = log.is_some(), "predictor ready");
        Ok(Self { engine, log })
    }

    /// Close the log connection, if any.
    pub fn shutdown(&self) {
        if let Some(l) = &self.log {
            if let Err(e) = l.close() {
                error!(target: "history", error = %e, "closing prediction log failed");
            }
        }
    }
}

fn open_log(cfg: &AppConfig) -> Option<Arc<PredictionLog>> {
    let log = match PredictionLog::open(&cfg.database.path) {
        Ok(l) => l,
        Err(e) => {
            error!(
                target: "history",
                path = %cfg.database.path.display(),
                error = %e,
                "could not open prediction log; continuing without it"
            );
            return None;
        }
    };
    // Keep the connection even if this fails; inserts will report their own errors.
    if let Err(e) = log.ensure_schema() {
        error!(target: "history", error = %e, "could not create predictions table");
    }
    Some(Arc::new(log))
}
