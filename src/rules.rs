//! Mix-design rules checked before any model is consulted.
//!
//! Evaluation order:
//! 1. `cement`, `water` and `age` must be non-zero. If any is zero a single
//!    blocking warning names them and nothing else is checked.
//! 2. Water-cement ratio within `[0.4, 0.6]`.
//! 3. Coarse share of total aggregate within `[0.5, 0.7]`; skipped when both
//!    aggregates are zero.
//! 4. Superplasticizer at most 20 kg/m³.
//!
//! All bounds are inclusive. Only rule 1 blocks a prediction.

use serde::Serialize;

use crate::features::MixInput;

pub const WATER_CEMENT_RANGE: (f64, f64) = (0.4, 0.6);
pub const COARSE_SHARE_RANGE: (f64, f64) = (0.5, 0.7);
pub const SUPERPLASTICIZER_MAX: f64 = 20.0;

/// Which rule produced a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    ZeroCritical,
    WaterCementRatio,
    AggregateRatio,
    SuperplasticizerDosage,
}

impl WarningKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WarningKind::ZeroCritical => "zero_critical",
            WarningKind::WaterCementRatio => "water_cement_ratio",
            WarningKind::AggregateRatio => "aggregate_ratio",
            WarningKind::SuperplasticizerDosage => "superplasticizer_dosage",
        }
    }
}

/// One finding, shown to the user as `message`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
    /// Ratio that fell outside its range, for the ratio rules.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Warning {
    pub fn is_blocking(&self) -> bool {
        self.kind == WarningKind::ZeroCritical
    }
}

/// Run every rule against `input` and collect the warnings.
pub fn check_inputs(input: &MixInput) -> Vec<Warning> {
    let mut warnings = Vec::new();

    let zero_fields: Vec<&str> = [
        ("Cement", input.cement),
        ("Water", input.water),
        ("Age", input.age),
    ]
    .into_iter()
    .filter(|(_, v)| *v == 0.0)
    .map(|(name, _)| name)
    .collect();

    if !zero_fields.is_empty() {
        warnings.push(Warning {
            kind: WarningKind::ZeroCritical,
            message: format!(
                "The following fields must not be zero for a valid prediction: {}.",
                zero_fields.join(", ")
            ),
            value: None,
        });
        return warnings;
    }

    // cement != 0 past this point
    let wc = input.water / input.cement;
    if !in_range(wc, WATER_CEMENT_RANGE) {
        warnings.push(Warning {
            kind: WarningKind::WaterCementRatio,
            message: format!(
                "Warning: The water-cement ratio ({wc:.2}) is outside the typical range of 0.4 to 0.6."
            ),
            value: Some(wc),
        });
    }

    // Both aggregates zero: nothing meaningful to compare, skip without a warning.
    let total_agg = input.coarseagg + input.fineagg;
    if total_agg > 0.0 {
        let share = input.coarseagg / total_agg;
        if !in_range(share, COARSE_SHARE_RANGE) {
            warnings.push(Warning {
                kind: WarningKind::AggregateRatio,
                message: format!(
                    "Warning: The coarse aggregate to total aggregate ratio ({share:.2}) is outside the typical range of 0.5 to 0.7."
                ),
                value: Some(share),
            });
        }
    }

    if input.superplasticizer > SUPERPLASTICIZER_MAX {
        warnings.push(Warning {
            kind: WarningKind::SuperplasticizerDosage,
            message:
                "Warning: The superplasticizer dosage is higher than the typical maximum of 20 kg/m³."
                    .to_string(),
            value: None,
        });
    }

    warnings
}

/// First blocking warning, if any.
pub fn blocking(warnings: &[Warning]) -> Option<&Warning> {
    warnings.iter().find(|w| w.is_blocking())
}

fn in_range(x: f64, (lo, hi): (f64, f64)) -> bool {
    (lo..=hi).contains(&x)
}
