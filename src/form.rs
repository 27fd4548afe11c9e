//! Interactive form session on the terminal.
//!
//! Each round prompts the eight fields in model order. An empty line keeps the
//! shown value (every field starts at the `0` sentinel), `clear` resets all
//! fields, `quit` or end of input ends the session. Values are kept between
//! rounds.

use std::collections::HashMap;
use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::engine::Engine;
use crate::error::PredictError;
use crate::features::{Feature, MixInput};
use crate::prediction::{Prediction, Report};

const SENTINEL: &str = "0";

/// Counters returned when the session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub submitted: usize,
    pub predicted: usize,
}

enum Step {
    Filled,
    Cleared,
    Quit,
}

/// Text shown after a submission.
pub fn render_outcome(outcome: &Result<Report, PredictError>) -> String {
    match outcome {
        Ok(report) => {
            let mut out = String::new();
            if !report.warnings.is_empty() {
                out.push_str("Input Warning:\n");
                for w in &report.warnings {
                    out.push_str(&w.message);
                    out.push('\n');
                }
                out.push('\n');
            }
            out.push_str(&report.prediction.display_text());
            if !report.interval_ordered {
                out.push_str("\n\nNote: the 80% range does not contain the mean estimate.");
            }
            out
        }
        Err(PredictError::Blocked(w)) => {
            format!(
                "Input Warning:\n{}\n\n{}",
                w.message,
                Prediction::default().display_text()
            )
        }
        Err(PredictError::Busy) => {
            "A prediction is already running; try again when it finishes.".to_string()
        }
        Err(PredictError::Inference(e)) => {
            format!("Prediction Error: An unexpected error occurred: {e}")
        }
    }
}

/// Drive a form session until `quit` or end of input.
pub async fn run_session<R, W>(engine: &Engine, input: R, out: &mut W) -> std::io::Result<SessionSummary>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    let mut values: Vec<String> = vec![SENTINEL.to_string(); Feature::ALL.len()];
    let mut summary = SessionSummary::default();

    writeln!(out, "Concrete Strength Predictor")?;
    writeln!(
        out,
        "Press Enter to keep a value, 'clear' to reset all fields, 'quit' to exit."
    )?;

    loop {
        writeln!(out)?;
        let mut step = Step::Filled;
        for (i, f) in Feature::ALL.iter().enumerate() {
            write!(out, "{} [{}]: ", f.label(), values[i])?;
            out.flush()?;
            let Some(line) = lines.next_line().await? else {
                writeln!(out)?;
                return Ok(summary);
            };
            match line.trim() {
                "" => {}
                "quit" | "exit" => {
                    step = Step::Quit;
                    break;
                }
                "clear" => {
                    step = Step::Cleared;
                    break;
                }
                v => values[i] = v.to_string(),
            }
        }

        match step {
            Step::Quit => return Ok(summary),
            Step::Cleared => {
                values.iter_mut().for_each(|v| *v = SENTINEL.to_string());
                writeln!(out, "Fields cleared.")?;
                continue;
            }
            Step::Filled => {}
        }

        let raw: HashMap<Feature, &str> = Feature::ALL
            .iter()
            .zip(values.iter())
            .map(|(f, v)| (*f, v.as_str()))
            .collect();
        let mix = match MixInput::from_raw(&raw) {
            Ok(m) => m,
            Err(e) => {
                writeln!(
                    out,
                    "Input Error: Please enter valid numbers for all fields! ({e})"
                )?;
                continue;
            }
        };

        summary.submitted += 1;
        writeln!(out, "Predicting...")?;
        let outcome = engine.submit(mix).await;
        if outcome.is_ok() {
            summary.predicted += 1;
        }
        writeln!(out, "{}", render_outcome(&outcome))?;
    }
}
