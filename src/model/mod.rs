//! # Strength Estimator
//! Three independently trained regressors (mean, 10th and 90th percentile)
//! evaluated on the same feature vector. Loaded once, immutable afterwards.

pub mod xgboost;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{InferenceError, ModelLoadError};
use crate::features::{Feature, MixInput, FEATURE_COUNT};
use crate::prediction::Prediction;

pub use xgboost::XgbRegressor;

/// A pre-trained model mapping one feature vector to one scalar.
pub trait Regressor: Send + Sync {
    fn predict(&self, x: &[f64]) -> Result<f64, InferenceError>;

    /// Metadata for diagnostics.
    fn info(&self) -> ModelInfo;
}

/// What a loaded model reports about itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub source: String,
    pub objective: String,
    pub trees: usize,
    pub base_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantile_alpha: Option<f64>,
}

/// Locations of the three model artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPaths {
    pub mean: PathBuf,
    pub q10: PathBuf,
    pub q90: PathBuf,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            mean: PathBuf::from("models/xgboost_model_strength.json"),
            q10: PathBuf::from("models/xgb_quantile_model_10.json"),
            q90: PathBuf::from("models/xgb_quantile_model_90.json"),
        }
    }
}

/// The three models behind one prediction.
#[derive(Clone)]
pub struct StrengthEstimator {
    mean: Arc<dyn Regressor>,
    q10: Arc<dyn Regressor>,
    q90: Arc<dyn Regressor>,
}

impl std::fmt::Debug for StrengthEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrengthEstimator")
            .field("mean", &self.mean.info())
            .field("q10", &self.q10.info())
            .field("q90", &self.q90.info())
            .finish()
    }
}

impl StrengthEstimator {
    pub fn new(
        mean: Arc<dyn Regressor>,
        q10: Arc<dyn Regressor>,
        q90: Arc<dyn Regressor>,
    ) -> Self {
        Self { mean, q10, q90 }
    }

    /// Load all three XGBoost artifacts. Any failure aborts startup.
    pub fn load(paths: &ModelPaths) -> Result<Self, ModelLoadError> {
        let mean = XgbRegressor::load(&paths.mean)?;
        let q10 = XgbRegressor::load(&paths.q10)?;
        let q90 = XgbRegressor::load(&paths.q90)?;

        for m in [&mean, &q10, &q90] {
            if m.num_feature() != FEATURE_COUNT {
                return Err(ModelLoadError::Invalid {
                    path: m.path().to_path_buf(),
                    reason: format!(
                        "expects {} features, the form has {FEATURE_COUNT}",
                        m.num_feature()
                    ),
                });
            }
            check_feature_names(m);
        }
        check_alpha(&q10, 0.1);
        check_alpha(&q90, 0.9);

        let est = Self::new(Arc::new(mean), Arc::new(q10), Arc::new(q90));
        for (role, mi) in est.inspect() {
            info!(
                target: "estimator",
                role,
                source = %mi.source,
                objective = %mi.objective,
                trees = mi.trees,
                "model loaded"
            );
        }
        Ok(est)
    }

    /// Evaluate the three models on the same vector. No clamping or reordering;
    /// a NaN or infinite output fails the whole request.
    pub fn predict(&self, input: &MixInput) -> Result<Prediction, InferenceError> {
        let x = input.to_vector();
        Ok(Prediction {
            mean: finite("mean", self.mean.predict(&x)?)?,
            q10: finite("q10", self.q10.predict(&x)?)?,
            q90: finite("q90", self.q90.predict(&x)?)?,
        })
    }

    /// [`inspect`](Self::inspect) keyed by role, in a stable order.
    pub fn inspect_by_role(&self) -> BTreeMap<&'static str, ModelInfo> {
        self.inspect().into_iter().collect()
    }

    pub fn inspect(&self) -> [(&'static str, ModelInfo); 3] {
        [
            ("mean", self.mean.info()),
            ("q10", self.q10.info()),
            ("q90", self.q90.info()),
        ]
    }
}

fn finite(role: &'static str, value: f64) -> Result<f64, InferenceError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(InferenceError::NonFinite { role, value })
    }
}

fn check_feature_names(m: &XgbRegressor) {
    let names = m.feature_names();
    if names.is_empty() {
        return;
    }
    let expected = Feature::ALL.map(Feature::key);
    if names.iter().map(String::as_str).ne(expected.iter().copied()) {
        warn!(
            target: "estimator",
            path = %m.path().display(),
            names = ?names,
            "model feature names differ from form order; inputs are passed positionally"
        );
    }
}

fn check_alpha(m: &XgbRegressor, expected: f64) {
    if let Some(alpha) = m.info().quantile_alpha {
        if (alpha - expected).abs() > 1e-9 {
            warn!(
                target: "estimator",
                path = %m.path().display(),
                alpha,
                expected,
                "quantile model trained for a different quantile"
            );
        }
    }
}
