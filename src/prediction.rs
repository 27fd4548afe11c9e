//! Prediction output shapes: the three model numbers and the report a front
//! end renders after a submission.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::features::MixInput;
use crate::rules::Warning;

/// Outputs of the mean, 10th-percentile and 90th-percentile models, unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Prediction {
    pub mean: f64,
    pub q10: f64,
    pub q90: f64,
}

impl Prediction {
    /// `q10 <= mean <= q90`. Quantile models are trained independently, so this
    /// can fail on unusual inputs; callers only flag it.
    pub fn is_ordered(&self) -> bool {
        self.q10 <= self.mean && self.mean <= self.q90
    }

    /// Two-decimal rendering used by every front end.
    pub fn display_text(&self) -> String {
        format!(
            "Predicted Mean Strength: {:.2} MPa\n\n\
             80% Probability Strength Range:\n   \
             Lower Bound (10th percentile): {:.2} MPa\n   \
             Upper Bound (90th percentile): {:.2} MPa",
            self.mean, self.q10, self.q90
        )
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_text())
    }
}

/// Result of one successful submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub input: MixInput,
    pub prediction: Prediction,
    /// Advisory warnings; never blocking here.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
    /// Row id in the prediction log, `None` when logging is off or failed.
    pub log_id: Option<i64>,
    /// False when the quantile interval does not bracket the mean.
    pub interval_ordered: bool,
}

impl Report {
    pub fn new(input: MixInput, prediction: Prediction) -> Self {
        Self {
            input,
            prediction,
            warnings: Vec::new(),
            log_id: None,
            interval_ordered: prediction.is_ordered(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<Warning>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn logged_as(mut self, id: Option<i64>) -> Self {
        self.log_id = id;
        self
    }
}
