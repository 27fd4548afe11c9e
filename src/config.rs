// src/config.rs
//! Runtime configuration from `config/predictor.toml` plus env overrides.
//!
//! ```toml
//! [models]
//! mean = "models/xgboost_model_strength.json"
//! q10  = "models/xgb_quantile_model_10.json"
//! q90  = "models/xgb_quantile_model_90.json"
//!
//! [database]
//! path = "data/predictions.db"   # set `enabled = false` to skip logging
//!
//! [engine]
//! busy_policy = "reject"         # or "queue"
//! ```

use std::path::{Path, PathBuf};
use std::{env, fs};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::engine::BusyPolicy;
use crate::model::ModelPaths;

pub const DEFAULT_CONFIG_PATH: &str = "config/predictor.toml";
pub const ENV_CONFIG_PATH: &str = "PREDICTOR_CONFIG_PATH";
pub const ENV_DB_PATH: &str = "PREDICTOR_DB_PATH";
pub const ENV_BUSY_POLICY: &str = "PREDICTOR_BUSY_POLICY";

fn default_db_path() -> PathBuf {
    PathBuf::from("data/predictions.db")
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub busy_policy: BusyPolicy,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub models: ModelPaths,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Load from an explicit file. A missing file is an error here.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// Resolve the config the binary runs with:
    /// 1) `explicit` path (CLI flag), must exist
    /// 2) $PREDICTOR_CONFIG_PATH, must exist
    /// 3) config/predictor.toml if present, else built-in defaults
    ///
    /// Env overrides for the database path and busy policy are applied last.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let mut cfg = if let Some(p) = explicit {
            Self::load_from_file(p)?
        } else if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("{ENV_CONFIG_PATH} points to non-existent path {}", pb.display());
            }
            Self::load_from_file(&pb)?
        } else {
            let pb = PathBuf::from(DEFAULT_CONFIG_PATH);
            if pb.exists() {
                Self::load_from_file(&pb)?
            } else {
                info!(target: "config", "no {DEFAULT_CONFIG_PATH}; using defaults");
                Self::default()
            }
        };
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(p) = env::var(ENV_DB_PATH) {
            if !p.trim().is_empty() {
                self.database.path = PathBuf::from(p.trim());
            }
        }
        if let Ok(raw) = env::var(ENV_BUSY_POLICY) {
            self.engine.busy_policy = raw
                .parse()
                .with_context(|| format!("invalid {ENV_BUSY_POLICY}"))?;
        }
        Ok(())
    }
}
