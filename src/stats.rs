use std::collections::HashMap;
use std::ops::Range;

use chrono::{DateTime, Local};
use itertools::Itertools;
use tracing::warn;

use crate::recorder::{Run, Slice};
use crate::util::median;

/// Granularity of a statistic item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum ItemKind {
    Char,
    Trigram,
    Word,
}

impl ItemKind {
    /// Integer code used by the store's statistic table
    pub fn code(&self) -> i64 {
        match self {
            ItemKind::Char => 0,
            ItemKind::Trigram => 1,
            ItemKind::Word => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<ItemKind> {
        match code {
            0 => Some(ItemKind::Char),
            1 => Some(ItemKind::Trigram),
            2 => Some(ItemKind::Word),
            _ => None,
        }
    }
}

/// Aggregated performance of one item (char, trigram or word) within a
/// single run. The store accumulates these across runs over time.
#[derive(Clone, Debug, PartialEq)]
pub struct StatisticRecord {
    pub item: String,
    pub kind: ItemKind,
    /// Median seconds-per-char across this run's occurrences
    pub time: f64,
    /// Median viscosity across this run's occurrences
    pub viscosity: f64,
    pub count: usize,
    pub mistakes: usize,
    pub flawed: bool,
    pub timestamp: DateTime<Local>,
}

impl StatisticRecord {
    /// Display-only composite ranking score; never persisted
    pub fn damage(&self) -> f64 {
        let count = self.count as f64;
        count * self.time * self.time * (1.0 + self.mistakes as f64 / count)
    }
}

/// One distinct (target, mistyped) pair observed in a run
#[derive(Clone, Debug, PartialEq)]
pub struct MistakeRecord {
    pub target: char,
    pub typed: char,
    pub count: usize,
    pub timestamp: DateTime<Local>,
}

/// Whole-run measurements: the same formulas as a full-length slice
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub wpm: f64,
    pub accuracy: f64,
    pub viscosity: f64,
}

impl RunSummary {
    /// A run whose timing is numerically unusable (effectively zero
    /// duration, or nothing timed at all)
    pub fn is_degenerate(&self) -> bool {
        !self.wpm.is_finite() || !self.viscosity.is_finite()
    }
}

/// Everything the persistence sink receives for one completed run
#[derive(Clone, Debug)]
pub struct RunStatistics {
    pub records: Vec<StatisticRecord>,
    pub mistakes: Vec<MistakeRecord>,
    pub summary: RunSummary,
}

impl RunStatistics {
    pub fn records_of_kind(&self, kind: ItemKind) -> impl Iterator<Item = &StatisticRecord> {
        self.records.iter().filter(move |r| r.kind == kind)
    }
}

/// Whole-run summary over every visited position. Positions skipped while
/// blocked (lenient + overwrite) carry no timing and are left out.
pub fn summarize(run: &Run) -> RunSummary {
    let deltas: Vec<f64> = (0..run.len())
        .filter_map(|i| run.outcome(i).and_then(|o| o.delta_secs))
        .collect();
    let mistakes: usize = (0..run.len())
        .filter_map(|i| run.outcome(i).map(|o| o.mistakes()))
        .sum();

    let spc = match deltas.len() {
        0 => 0.0,
        n => deltas.iter().sum::<f64>() / n as f64,
    };
    let viscosity = if spc > 0.0 {
        deltas
            .iter()
            .map(|d| {
                let rel = d / spc - 1.0;
                rel * rel
            })
            .sum::<f64>()
            / deltas.len() as f64
    } else {
        f64::INFINITY
    };

    RunSummary {
        wpm: 12.0 / spc,
        accuracy: 1.0 - mistakes as f64 / run.len().max(1) as f64,
        viscosity,
    }
}

/// Decompose a finished run into statistic and mistake rows.
///
/// Returns None for a degenerate run, which is logged and must not be
/// persisted. Slices containing an untimed position are skipped.
pub fn extract(run: &Run, now: DateTime<Local>) -> Option<RunStatistics> {
    let summary = summarize(run);
    if summary.is_degenerate() {
        warn!(len = run.len(), "discarding run with unusable timing");
        return None;
    }

    let mut records = Vec::new();
    collect_group(
        run,
        (0..run.len()).map(|i| i..i + 1),
        ItemKind::Char,
        now,
        &mut records,
    );
    if run.len() >= 3 {
        collect_group(
            run,
            (0..=run.len() - 3).map(|i| i..i + 3),
            ItemKind::Trigram,
            now,
            &mut records,
        );
    }
    collect_group(
        run,
        word_spans(run.text()).into_iter().filter(|r| r.len() > 3),
        ItemKind::Word,
        now,
        &mut records,
    );

    Some(RunStatistics {
        records,
        mistakes: mistake_records(run, now),
        summary,
    })
}

fn collect_group<I>(
    run: &Run,
    ranges: I,
    kind: ItemKind,
    now: DateTime<Local>,
    records: &mut Vec<StatisticRecord>,
) where
    I: Iterator<Item = Range<usize>>,
{
    let mut groups: HashMap<String, Vec<Slice>> = HashMap::new();
    for range in ranges {
        if let Some(slice) = run.slice(range) {
            groups.entry(slice.text.clone()).or_default().push(slice);
        }
    }

    for (item, slices) in groups.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)) {
        let times: Vec<f64> = slices.iter().map(|s| s.seconds_per_char).collect();
        let viscosities: Vec<f64> = slices.iter().map(|s| s.viscosity).collect();
        let mistakes = slices.iter().map(|s| s.mistakes).sum();
        records.push(StatisticRecord {
            item,
            kind,
            time: median(&times).unwrap_or(0.0),
            viscosity: median(&viscosities).unwrap_or(0.0),
            count: slices.len(),
            mistakes,
            flawed: slices.iter().any(|s| s.flawed),
            timestamp: now,
        });
    }
}

fn mistake_records(run: &Run, now: DateTime<Local>) -> Vec<MistakeRecord> {
    let mut counts: HashMap<(char, char), usize> = HashMap::new();
    for i in 0..run.len() {
        if let Some(outcome) = run.outcome(i) {
            for &typed in &outcome.errors {
                *counts.entry((outcome.target, typed)).or_insert(0) += 1;
            }
        }
    }

    counts
        .into_iter()
        .sorted()
        .map(|((target, typed), count)| MistakeRecord {
            target,
            typed,
            count,
            timestamp: now,
        })
        .collect()
}

/// Weak words for an immediate review lesson: every flawed word of this
/// run plus the slowest quarter of the flawless ones, ordered worst first.
pub fn review_candidates(records: &[StatisticRecord]) -> Vec<String> {
    let mut words: Vec<&StatisticRecord> = records
        .iter()
        .filter(|r| r.kind == ItemKind::Word)
        .collect();
    if words.is_empty() {
        return Vec::new();
    }

    words.sort_by(|a, b| {
        (b.flawed, b.time)
            .partial_cmp(&(a.flawed, a.time))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut cut = words.iter().take_while(|r| r.flawed).count();
    cut += (words.len() - cut) / 4;
    words[..cut].iter().map(|r| r.item.clone()).collect()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Word boundaries over the target text, as char-index ranges.
///
/// A word is a run of word characters, allowing internal apostrophes not
/// followed by an uppercase letter and single hyphens joining two runs.
pub fn word_spans(text: &str) -> Vec<Range<usize>> {
    let chars: Vec<char> = text.chars().collect();
    let mut spans = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if !is_word_char(chars[i]) {
            i += 1;
            continue;
        }
        let start = i;
        i = word_run_end(&chars, i);
        while i < chars.len() && chars[i] == '-' && i + 1 < chars.len() && is_word_char(chars[i + 1])
        {
            i = word_run_end(&chars, i + 1);
        }
        spans.push(start..i);
    }

    spans
}

fn word_run_end(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() {
        let c = chars[i];
        if is_word_char(c) {
            i += 1;
        } else if c == '\''
            && i + 1 < chars.len()
            && is_word_char(chars[i + 1])
            && !chars[i + 1].is_uppercase()
        {
            i += 1;
        } else {
            break;
        }
    }
    i
}
