//! concrete-strength: command-line front end.
//!
//! Usage:
//!   concrete-strength predict --cement 540 --water 162 --age 28 ...
//!   concrete-strength form                # interactive, fields pre-filled with 0
//!   concrete-strength init-db             # create the predictions table
//!   concrete-strength inspect-models      # show what was loaded
//!
//! Config: `config/predictor.toml` (or `--config`, or $PREDICTOR_CONFIG_PATH).

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::error;

use concrete_strength_predictor::config::AppConfig;
use concrete_strength_predictor::form::{render_outcome, run_session};
use concrete_strength_predictor::metrics::Metrics;
use concrete_strength_predictor::{
    init_tracing, App, Feature, MixInput, PredictError, PredictionLog, StrengthEstimator,
};

/// Concrete compressive-strength estimates with an 80% range.
#[derive(Parser)]
#[command(name = "concrete-strength")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    /// Print Prometheus metrics to stderr before exiting
    #[arg(long, global = true)]
    print_metrics: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate one mix, predict its strength and log the result
    Predict(MixArgs),

    /// Interactive form session
    Form,

    /// Open the database and create the predictions table if needed
    InitDb,

    /// Show metadata of the three models
    InspectModels,
}

/// Every field defaults to the "0" the form starts with.
#[derive(Args)]
struct MixArgs {
    /// Cement (kg/m³)
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    cement: String,
    /// Blast Furnace Slag (kg/m³)
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    slag: String,
    /// Fly Ash (kg/m³)
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    flyash: String,
    /// Water (kg/m³)
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    water: String,
    /// Superplasticizer (kg/m³)
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    superplasticizer: String,
    /// Coarse Aggregate (kg/m³)
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    coarseagg: String,
    /// Fine Aggregate (kg/m³)
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    fineagg: String,
    /// Age (days)
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    age: String,
}

impl MixArgs {
    fn raw(&self) -> HashMap<Feature, &str> {
        HashMap::from([
            (Feature::Cement, self.cement.as_str()),
            (Feature::Slag, self.slag.as_str()),
            (Feature::Flyash, self.flyash.as_str()),
            (Feature::Water, self.water.as_str()),
            (Feature::Superplasticizer, self.superplasticizer.as_str()),
            (Feature::Coarseagg, self.coarseagg.as_str()),
            (Feature::Fineagg, self.fineagg.as_str()),
            (Feature::Age, self.age.as_str()),
        ])
    }
}

mod exit {
    pub const INPUT: u8 = 3;
    pub const BLOCKED: u8 = 4;
    pub const BUSY: u8 = 5;
    pub const STARTUP: u8 = 6;
    pub const INFERENCE: u8 = 7;
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; missing file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let metrics = if cli.print_metrics {
        match Metrics::init() {
            Ok(m) => Some(m),
            Err(e) => {
                error!(error = %e, "metrics disabled");
                None
            }
        }
    } else {
        None
    };

    let code = match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = ?e, "startup failed");
            eprintln!("error: {e:#}");
            ExitCode::from(exit::STARTUP)
        }
    };

    if let Some(m) = metrics {
        eprintln!("{}", m.render());
    }
    code
}

async fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    let cfg = AppConfig::resolve(cli.config.as_deref())?;

    match &cli.command {
        Commands::InitDb => {
            let log = PredictionLog::open(&cfg.database.path)
                .with_context(|| format!("opening {}", cfg.database.path.display()))?;
            log.ensure_schema()?;
            log.close()?;
            println!("predictions table ready in {}", cfg.database.path.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::InspectModels => {
            let est = StrengthEstimator::load(&cfg.models)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&est.inspect_by_role())?);
            } else {
                for (role, mi) in est.inspect() {
                    print!("{role:>4}: {} ({}, {} trees, base {})", mi.source, mi.objective, mi.trees, mi.base_score);
                    match mi.quantile_alpha {
                        Some(a) => println!(", alpha {a}"),
                        None => println!(),
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Predict(args) => {
            let mix = match MixInput::from_raw(&args.raw()) {
                Ok(m) => m,
                Err(e) => {
                    eprintln!("Input Error: Please enter valid numbers for all fields! ({e})");
                    return Ok(ExitCode::from(exit::INPUT));
                }
            };
            let app = App::start(&cfg)?;
            let outcome = app.engine.submit(mix).await;
            if cli.json {
                print_json(&outcome)?;
            } else {
                println!("{}", render_outcome(&outcome));
            }
            app.shutdown();
            Ok(match outcome {
                Ok(_) => ExitCode::SUCCESS,
                Err(PredictError::Blocked(_)) => ExitCode::from(exit::BLOCKED),
                Err(PredictError::Busy) => ExitCode::from(exit::BUSY),
                Err(PredictError::Inference(_)) => ExitCode::from(exit::INFERENCE),
            })
        }
        Commands::Form => {
            let app = App::start(&cfg)?;
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let mut stdout = std::io::stdout();
            let summary = run_session(&app.engine, stdin, &mut stdout).await?;
            tracing::info!(
                submitted = summary.submitted,
                predicted = summary.predicted,
                "form session ended"
            );
            app.shutdown();
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_json(
    outcome: &Result<concrete_strength_predictor::Report, PredictError>,
) -> anyhow::Result<()> {
    let v = match outcome {
        Ok(report) => serde_json::json!({ "status": "ok", "report": report }),
        Err(PredictError::Blocked(w)) => serde_json::json!({ "status": "blocked", "warning": w }),
        Err(e) => serde_json::json!({ "status": "error", "error": e.to_string() }),
    };
    println!("{}", serde_json::to_string_pretty(&v)?);
    Ok(())
}
