//! # Mix features
//! The eight concrete-mix quantities, in the exact order the models were
//! trained on, plus parsing from raw form strings and name/value maps.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::InputFormatError;

/// Number of model inputs.
pub const FEATURE_COUNT: usize = 8;

/// One model input. Declaration order is the model's column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    Cement,
    Slag,
    Flyash,
    Water,
    Superplasticizer,
    Coarseagg,
    Fineagg,
    Age,
}

impl Feature {
    pub const ALL: [Feature; FEATURE_COUNT] = [
        Feature::Cement,
        Feature::Slag,
        Feature::Flyash,
        Feature::Water,
        Feature::Superplasticizer,
        Feature::Coarseagg,
        Feature::Fineagg,
        Feature::Age,
    ];

    /// Key used in maps, CLI flags and model `feature_names`.
    pub fn key(self) -> &'static str {
        match self {
            Feature::Cement => "cement",
            Feature::Slag => "slag",
            Feature::Flyash => "flyash",
            Feature::Water => "water",
            Feature::Superplasticizer => "superplasticizer",
            Feature::Coarseagg => "coarseagg",
            Feature::Fineagg => "fineagg",
            Feature::Age => "age",
        }
    }

    /// Form label with units.
    pub fn label(self) -> &'static str {
        match self {
            Feature::Cement => "Cement (kg/m³)",
            Feature::Slag => "Blast Furnace Slag (kg/m³)",
            Feature::Flyash => "Fly Ash (kg/m³)",
            Feature::Water => "Water (kg/m³)",
            Feature::Superplasticizer => "Superplasticizer (kg/m³)",
            Feature::Coarseagg => "Coarse Aggregate (kg/m³)",
            Feature::Fineagg => "Fine Aggregate (kg/m³)",
            Feature::Age => "Age (days)",
        }
    }

    pub fn from_key(key: &str) -> Option<Feature> {
        Feature::ALL.into_iter().find(|f| f.key() == key)
    }
}

/// One submission of the form. All eight values are required.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MixInput {
    pub cement: f64,
    pub slag: f64,
    pub flyash: f64,
    pub water: f64,
    pub superplasticizer: f64,
    pub coarseagg: f64,
    pub fineagg: f64,
    pub age: f64,
}

impl MixInput {
    pub fn get(&self, f: Feature) -> f64 {
        match f {
            Feature::Cement => self.cement,
            Feature::Slag => self.slag,
            Feature::Flyash => self.flyash,
            Feature::Water => self.water,
            Feature::Superplasticizer => self.superplasticizer,
            Feature::Coarseagg => self.coarseagg,
            Feature::Fineagg => self.fineagg,
            Feature::Age => self.age,
        }
    }

    pub fn set(&mut self, f: Feature, value: f64) {
        let slot = match f {
            Feature::Cement => &mut self.cement,
            Feature::Slag => &mut self.slag,
            Feature::Flyash => &mut self.flyash,
            Feature::Water => &mut self.water,
            Feature::Superplasticizer => &mut self.superplasticizer,
            Feature::Coarseagg => &mut self.coarseagg,
            Feature::Fineagg => &mut self.fineagg,
            Feature::Age => &mut self.age,
        };
        *slot = value;
    }

    /// Model input vector in training column order.
    pub fn to_vector(&self) -> [f64; FEATURE_COUNT] {
        Feature::ALL.map(|f| self.get(f))
    }

    /// Build from a name → value map. Every feature must be present and no
    /// unknown names are accepted.
    pub fn from_map(values: &HashMap<String, f64>) -> Result<Self, InputFormatError> {
        if let Some(unknown) = values.keys().find(|k| Feature::from_key(k).is_none()) {
            return Err(InputFormatError::Unknown(unknown.clone()));
        }
        let mut input = MixInput::default();
        for f in Feature::ALL {
            let v = values
                .get(f.key())
                .copied()
                .ok_or(InputFormatError::Missing(f.key()))?;
            input.set(f, ensure_finite(f, v, &v.to_string())?);
        }
        Ok(input)
    }

    /// Build from raw form strings, one per feature. Missing entries are an
    /// error; the caller supplies `"0"` explicitly when it wants the sentinel.
    pub fn from_raw<S: AsRef<str>>(raw: &HashMap<Feature, S>) -> Result<Self, InputFormatError> {
        let mut input = MixInput::default();
        for f in Feature::ALL {
            let s = raw.get(&f).ok_or(InputFormatError::Missing(f.key()))?;
            input.set(f, parse_field(f, s.as_ref())?);
        }
        Ok(input)
    }
}

/// Parse one form entry. Surrounding whitespace is ignored.
pub fn parse_field(f: Feature, raw: &str) -> Result<f64, InputFormatError> {
    let t = raw.trim();
    let v: f64 = t.parse().map_err(|_| InputFormatError::NotANumber {
        field: f.key(),
        raw: raw.to_string(),
    })?;
    ensure_finite(f, v, raw)
}

fn ensure_finite(f: Feature, v: f64, raw: &str) -> Result<f64, InputFormatError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(InputFormatError::NotFinite {
            field: f.key(),
            raw: raw.to_string(),
        })
    }
}
