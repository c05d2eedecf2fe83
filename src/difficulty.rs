use std::collections::HashMap;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::util::upper_quantile;

/// How the next text to type gets picked
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum SelectMethod {
    Random,
    /// Deterministic successor of the last-typed text, by insertion order
    InOrder,
    /// Lowest predicted WPM among a random sample
    Difficult,
    /// Highest predicted WPM among a random sample
    Easy,
}

/// What InOrder does after the last text is exhausted
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapPolicy {
    /// Continue from the first text again
    Restart,
    /// Yield no text and let the caller fall back
    Stop,
}

/// Trigram cost model predicting how fast a candidate text will be typed.
///
/// Built from historical trigram statistics over a trailing window. The
/// `expect` fallback prices never-seen trigrams at a slow quantile of the
/// observed costs, so unknown content scores pessimistically.
#[derive(Clone, Debug)]
pub struct DifficultyModel {
    costs: HashMap<String, f64>,
    expect: f64,
}

impl DifficultyModel {
    /// Build from historical trigram -> median seconds-per-char costs.
    /// `quantile_denom = 4` takes the top-quartile (slow) cost as the
    /// fallback. Returns None when there is no history to learn from.
    pub fn build(costs: HashMap<String, f64>, quantile_denom: usize) -> Option<Self> {
        let observed: Vec<f64> = costs.values().copied().collect();
        let expect = upper_quantile(&observed, quantile_denom)?;
        Some(Self { costs, expect })
    }

    pub fn with_expect(costs: HashMap<String, f64>, expect: f64) -> Self {
        Self { costs, expect }
    }

    pub fn expect(&self) -> f64 {
        self.expect
    }

    /// Mean cost over every trigram window of `text`, pricing unseen
    /// windows at `expect`. Texts too short for a window cost `expect`.
    pub fn predicted_spc(&self, text: &str) -> f64 {
        let chars: Vec<char> = text.chars().collect();
        if chars.len() < 3 {
            return self.expect;
        }

        let mut sum = 0.0;
        let windows = chars.len() - 2;
        for i in 0..windows {
            let tri: String = chars[i..i + 3].iter().collect();
            sum += self.costs.get(&tri).copied().unwrap_or(self.expect);
        }
        sum / windows as f64
    }

    pub fn predicted_wpm(&self, text: &str) -> f64 {
        12.0 / self.predicted_spc(text)
    }
}

/// Index of the chosen candidate within an already-random sample.
///
/// Difficult takes the slowest predicted text, Easy the fastest. Random
/// (and InOrder, whose successor lookup happens upstream) takes the first.
/// With no model, every candidate scores alike and the first wins.
pub fn pick<T: AsRef<str>>(
    sample: &[T],
    method: SelectMethod,
    model: Option<&DifficultyModel>,
) -> Option<usize> {
    if sample.is_empty() {
        return None;
    }

    let model = match (method, model) {
        (SelectMethod::Difficult, Some(m)) | (SelectMethod::Easy, Some(m)) => m,
        _ => return Some(0),
    };

    let scored = sample
        .iter()
        .enumerate()
        .map(|(i, text)| (i, model.predicted_wpm(text.as_ref())));

    let best = match method {
        SelectMethod::Difficult => scored.reduce(|a, b| if b.1 < a.1 { b } else { a }),
        _ => scored.reduce(|a, b| if b.1 > a.1 { b } else { a }),
    };
    best.map(|(i, _)| i)
}
