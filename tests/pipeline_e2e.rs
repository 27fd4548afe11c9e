// tests/pipeline_e2e.rs
//
// Whole pipeline through `App::start`: config → models → SQLite log → submit.

use std::path::{Path, PathBuf};

use concrete_strength_predictor::config::{AppConfig, DatabaseConfig, EngineConfig};
use concrete_strength_predictor::{
    App, BusyPolicy, MixInput, ModelPaths, PredictError, PredictionLog, WarningKind,
};

fn fixture_models() -> ModelPaths {
    let dir = PathBuf::from("tests/fixtures");
    ModelPaths {
        mean: dir.join("xgboost_model_strength.json"),
        q10: dir.join("xgb_quantile_model_10.json"),
        q90: dir.join("xgb_quantile_model_90.json"),
    }
}

fn config(db: &Path) -> AppConfig {
    AppConfig {
        models: fixture_models(),
        database: DatabaseConfig {
            path: db.to_path_buf(),
            enabled: true,
        },
        engine: EngineConfig {
            busy_policy: BusyPolicy::Reject,
        },
    }
}

fn standard_mix() -> MixInput {
    MixInput {
        cement: 350.0,
        slag: 0.0,
        flyash: 0.0,
        water: 175.0,
        superplasticizer: 4.0,
        coarseagg: 1000.0,
        fineagg: 700.0,
        age: 28.0,
    }
}

#[tokio::test]
async fn submit_predicts_and_persists_eleven_values() {
    let tmp = tempfile::tempdir().unwrap();
    let db = tmp.path().join("predictions.db");
    let app = App::start(&config(&db)).expect("app starts");

    let report = app.engine.submit(standard_mix()).await.expect("prediction");
    assert!(report.warnings.is_empty());
    assert!((report.prediction.mean - 44.5).abs() < 1e-4);
    let id = report.log_id.expect("row written");
    app.shutdown();

    // Re-open the file to make sure the insert was committed.
    let log = PredictionLog::open(&db).unwrap();
    let rec = log.fetch(id).unwrap().expect("row present");
    assert_eq!(rec.input, standard_mix());
    assert_eq!(rec.prediction, report.prediction);
}

#[tokio::test]
async fn blocked_submission_writes_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let db = tmp.path().join("predictions.db");
    let app = App::start(&config(&db)).unwrap();

    let err = app
        .engine
        .submit(MixInput {
            cement: 0.0,
            water: 0.0,
            ..standard_mix()
        })
        .await
        .unwrap_err();
    match err {
        PredictError::Blocked(w) => {
            assert_eq!(w.kind, WarningKind::ZeroCritical);
            assert!(w.message.contains("Cement, Water."));
        }
        other => panic!("expected Blocked, got {other:?}"),
    }
    assert_eq!(app.log.as_ref().unwrap().count().unwrap(), 0);
}

#[tokio::test]
async fn advisory_warnings_are_returned_with_prediction() {
    let tmp = tempfile::tempdir().unwrap();
    let app = App::start(&config(&tmp.path().join("p.db"))).unwrap();

    let report = app
        .engine
        .submit(MixInput {
            water: 105.0, // w/c 0.30
            ..standard_mix()
        })
        .await
        .unwrap();
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].message.contains("0.30"));
    assert!(report.log_id.is_some());
}

#[tokio::test]
async fn unusable_database_does_not_stop_predictions() {
    let tmp = tempfile::tempdir().unwrap();
    // A directory cannot be opened as an SQLite file.
    let app = App::start(&config(tmp.path())).expect("models still load");

    let report = app.engine.submit(standard_mix()).await.unwrap();
    assert_eq!(report.log_id, None);
    assert!((report.prediction.q90 - 52.0).abs() < 1e-4);
}

#[tokio::test]
async fn disabled_database_skips_logging() {
    let tmp = tempfile::tempdir().unwrap();
    let db = tmp.path().join("never.db");
    let mut cfg = config(&db);
    cfg.database.enabled = false;

    let app = App::start(&cfg).unwrap();
    let report = app.engine.submit(standard_mix()).await.unwrap();
    assert_eq!(report.log_id, None);
    assert!(!db.exists());
}

#[test]
fn missing_model_is_fatal_at_startup() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = config(&tmp.path().join("p.db"));
    cfg.models.mean = tmp.path().join("absent.json");
    let err = App::start(&cfg).err().expect("startup must fail");
    assert!(format!("{err:#}").contains("loading models"));
}
