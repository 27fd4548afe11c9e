//! Gradient-boosted tree ensembles read from XGBoost's JSON model format
//! (`Booster.save_model("model.json")`).
//!
//! Only what inference needs is parsed:
//! - `learner.learner_model_param`: `base_score`, `num_feature`
//! - `learner.objective.name` (identity-link regression objectives only)
//! - `learner.gradient_booster`: must be `gbtree`
//! - per tree: children, split feature, split condition, default direction
//!
//! A leaf is a node whose left child is `-1`; its value lives in
//! `split_conditions`. The prediction is `base_score` plus the sum of the leaf
//! reached in every kept tree. Inputs are compared as `f32`, as XGBoost does.
//!
//! A booster saved after early stopping carries `best_iteration` in
//! `learner.attributes`; trees past that round are dropped at load, matching
//! the scikit-learn wrapper's `predict`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::error::{InferenceError, ModelLoadError};
use crate::model::{ModelInfo, Regressor};

/// Objectives whose prediction is the raw margin.
const IDENTITY_OBJECTIVES: [&str; 4] = [
    "reg:squarederror",
    "reg:absoluteerror",
    "reg:quantileerror",
    "reg:pseudohubererror",
];

const LEAF: i32 = -1;

/* ----------------------------
On-disk schema (subset)
---------------------------- */

#[derive(Debug, Deserialize)]
struct ModelFile {
    learner: LearnerJson,
}

#[derive(Debug, Deserialize)]
struct LearnerJson {
    #[serde(default)]
    feature_names: Vec<String>,
    #[serde(default)]
    attributes: serde_json::Map<String, Value>,
    gradient_booster: BoosterJson,
    learner_model_param: LearnerParamJson,
    objective: Value,
}

#[derive(Debug, Deserialize)]
struct LearnerParamJson {
    base_score: String,
    num_feature: String,
}

#[derive(Debug, Deserialize)]
struct BoosterJson {
    name: String,
    #[serde(default)]
    model: Option<GbTreeJson>,
}

#[derive(Debug, Deserialize)]
struct GbTreeJson {
    #[serde(default)]
    gbtree_model_param: Option<GbTreeParamJson>,
    trees: Vec<TreeJson>,
}

#[derive(Debug, Deserialize)]
struct GbTreeParamJson {
    #[serde(default)]
    num_parallel_tree: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TreeJson {
    left_children: Vec<i32>,
    right_children: Vec<i32>,
    split_indices: Vec<u32>,
    split_conditions: Vec<f32>,
    default_left: Vec<Flag>,
    #[serde(default)]
    split_type: Vec<u8>,
}

/// `default_left` is written as 0/1 by some XGBoost versions and as booleans by others.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(u8),
}

impl Flag {
    fn is_set(self) -> bool {
        match self {
            Flag::Bool(b) => b,
            Flag::Int(i) => i != 0,
        }
    }
}

/* ----------------------------
Compiled ensemble
---------------------------- */

#[derive(Debug, Clone, Copy)]
struct Node {
    left: i32,
    right: i32,
    feature: usize,
    /// Split threshold for inner nodes, leaf value for leaves.
    value: f32,
    default_left: bool,
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn leaf_value(&self, tree_idx: usize, x: &[f32]) -> Result<f32, InferenceError> {
        let mut idx = 0usize;
        // Each step moves to a strictly new node in a well-formed tree.
        for _ in 0..=self.nodes.len() {
            let node = self.nodes.get(idx).ok_or(InferenceError::CorruptTree {
                tree: tree_idx,
                node: idx,
            })?;
            if node.left == LEAF {
                return Ok(node.value);
            }
            let fv = x[node.feature];
            let go_left = if fv.is_nan() {
                node.default_left
            } else {
                fv < node.value
            };
            let next = if go_left { node.left } else { node.right };
            idx = next as usize;
        }
        Err(InferenceError::CorruptTree {
            tree: tree_idx,
            node: idx,
        })
    }
}

/// A loaded XGBoost regression ensemble.
#[derive(Debug, Clone)]
pub struct XgbRegressor {
    path: PathBuf,
    objective: String,
    base_score: f32,
    num_feature: usize,
    quantile_alpha: Option<f64>,
    feature_names: Vec<String>,
    trees: Vec<Tree>,
}

impl XgbRegressor {
    /// Read and validate a model file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ModelLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text, path)
    }

    /// Parse a model from JSON text. `origin` is only used in error messages.
    pub fn from_json_str(text: &str, origin: &Path) -> Result<Self, ModelLoadError> {
        let file: ModelFile =
            serde_json::from_str(text).map_err(|source| ModelLoadError::Parse {
                path: origin.to_path_buf(),
                source,
            })?;
        let invalid = |reason: String| ModelLoadError::Invalid {
            path: origin.to_path_buf(),
            reason,
        };

        let learner = file.learner;

        let objective = learner
            .objective
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if !IDENTITY_OBJECTIVES.contains(&objective.as_str()) {
            return Err(invalid(format!("unsupported objective '{objective}'")));
        }
        let quantile_alpha = find_quantile_alpha(&learner.objective);

        let base_score = parse_xgb_number(&learner.learner_model_param.base_score)
            .ok_or_else(|| {
                invalid(format!(
                    "bad base_score {:?}",
                    learner.learner_model_param.base_score
                ))
            })? as f32;
        let num_feature: usize = learner
            .learner_model_param
            .num_feature
            .trim()
            .parse()
            .map_err(|_| {
                invalid(format!(
                    "bad num_feature {:?}",
                    learner.learner_model_param.num_feature
                ))
            })?;

        if !learner.feature_names.is_empty() && learner.feature_names.len() != num_feature {
            return Err(invalid(format!(
                "{} feature names for {num_feature} features",
                learner.feature_names.len()
            )));
        }

        if learner.gradient_booster.name != "gbtree" {
            return Err(invalid(format!(
                "unsupported booster '{}'",
                learner.gradient_booster.name
            )));
        }
        let gbtree = learner
            .gradient_booster
            .model
            .ok_or_else(|| invalid("gbtree without model".to_string()))?;
        let per_round = gbtree
            .gbtree_model_param
            .as_ref()
            .and_then(|p| p.num_parallel_tree.as_deref())
            .and_then(|n| n.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(1);
        let mut raw_trees = gbtree.trees;
        if let Some(best) = best_iteration(&learner.attributes) {
            raw_trees.truncate(best.saturating_add(1).saturating_mul(per_round));
        }

        let trees = raw_trees
            .into_iter()
            .enumerate()
            .map(|(i, t)| compile_tree(t, num_feature).map_err(|r| invalid(format!("tree {i}: {r}"))))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            path: origin.to_path_buf(),
            objective,
            base_score,
            num_feature,
            quantile_alpha,
            feature_names: learner.feature_names,
            trees,
        })
    }

    pub fn num_feature(&self) -> usize {
        self.num_feature
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Regressor for XgbRegressor {
    fn predict(&self, x: &[f64]) -> Result<f64, InferenceError> {
        if x.len() != self.num_feature {
            return Err(InferenceError::FeatureCount {
                expected: self.num_feature,
                got: x.len(),
            });
        }
        let xf: Vec<f32> = x.iter().map(|&v| v as f32).collect();
        let mut margin = self.base_score;
        for (i, tree) in self.trees.iter().enumerate() {
            margin += tree.leaf_value(i, &xf)?;
        }
        Ok(f64::from(margin))
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            source: self.path.display().to_string(),
            objective: self.objective.clone(),
            trees: self.trees.len(),
            base_score: f64::from(self.base_score),
            quantile_alpha: self.quantile_alpha,
        }
    }
}

fn compile_tree(t: TreeJson, num_feature: usize) -> Result<Tree, String> {
    let n = t.left_children.len();
    if n == 0 {
        return Err("no nodes".to_string());
    }
    if t.right_children.len() != n
        || t.split_indices.len() != n
        || t.split_conditions.len() != n
        || t.default_left.len() != n
    {
        return Err("node arrays differ in length".to_string());
    }
    if t.split_type.iter().any(|&s| s != 0) {
        return Err("categorical splits are not supported".to_string());
    }

    let mut nodes = Vec::with_capacity(n);
    for i in 0..n {
        let (left, right) = (t.left_children[i], t.right_children[i]);
        let feature = t.split_indices[i] as usize;
        if left != LEAF {
            let in_range = |c: i32| c > 0 && (c as usize) < n && c as usize != i;
            if !in_range(left) || !in_range(right) {
                return Err(format!("node {i} has children out of range"));
            }
            if feature >= num_feature {
                return Err(format!("node {i} splits on feature {feature}"));
            }
        }
        nodes.push(Node {
            left,
            right,
            feature,
            value: t.split_conditions[i],
            default_left: t.default_left[i].is_set(),
        });
    }
    Ok(Tree { nodes })
}

/// XGBoost stores scalars as strings, newer versions as a bracketed list (`"[3.5E1]"`).
fn parse_xgb_number(raw: &str) -> Option<f64> {
    let t = raw.trim().trim_start_matches('[').trim_end_matches(']');
    let first = t.split(',').next()?.trim();
    first.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `best_iteration` as written by early stopping (a string, or a number in some writers).
fn best_iteration(attributes: &serde_json::Map<String, Value>) -> Option<usize> {
    match attributes.get("best_iteration")? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        _ => None,
    }
}

/// Look for `quantile_alpha` anywhere under the objective's parameter blocks.
fn find_quantile_alpha(objective: &Value) -> Option<f64> {
    match objective {
        Value::Object(map) => map.iter().find_map(|(k, v)| {
            if k == "quantile_alpha" {
                match v {
                    Value::String(s) => parse_xgb_number(s),
                    Value::Number(n) => n.as_f64(),
                    _ => None,
                }
            } else {
                find_quantile_alpha(v)
            }
        }),
        _ => None,
    }
}
