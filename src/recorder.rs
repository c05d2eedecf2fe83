use std::ops::Range;
use std::time::Instant;

/// Line terminator glyph used after sanitization. Renders as a visible
/// character while still marking a line break for the presentation layer.
pub const RETURN_CHAR: char = '⏎';

/// Normalize line endings to [`RETURN_CHAR`] so the target is a single
/// logical line of comparable characters.
pub fn sanitize(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\n', &RETURN_CHAR.to_string())
}

/// One target position of a run: what should have been typed, what was
/// mistyped before it matched, and when it was first reached.
#[derive(Clone, Debug)]
pub struct CharOutcome {
    pub target: char,
    /// Wrong characters typed while this position was current, in order.
    pub errors: Vec<char>,
    /// Seconds since the previous visited position (run start for position
    /// 0). Stamped on the first visit only.
    pub delta_secs: Option<f64>,
    /// Whether the first keystroke at this position matched.
    pub first_try: Option<bool>,
    correct: bool,
    /// Uncommitted characters typed here in insert mode, most recent last.
    pending: Vec<char>,
}

impl CharOutcome {
    fn new(target: char) -> Self {
        Self {
            target,
            errors: Vec::new(),
            delta_secs: None,
            first_try: None,
            correct: false,
            pending: Vec::new(),
        }
    }

    pub fn is_correct(&self) -> bool {
        self.correct
    }

    pub fn mistakes(&self) -> usize {
        self.errors.len()
    }

    pub fn visited(&self) -> bool {
        self.delta_secs.is_some()
    }
}

/// Read-only aggregate view over a contiguous range of a completed run
#[derive(Clone, Debug, PartialEq)]
pub struct Slice {
    pub text: String,
    pub len: usize,
    pub seconds_per_char: f64,
    pub viscosity: f64,
    pub mistakes: usize,
    pub flawed: bool,
}

/// Records one typing attempt: per-position outcomes against a fixed
/// target, a cursor over committed positions, and keystroke timing.
///
/// The cursor stays within `[0, len]`. Positions behind the cursor carry a
/// definitive correct/incorrect classification; backspace un-commits them
/// and a later visit re-classifies, but timing is stamped once and kept.
#[derive(Debug)]
pub struct Run {
    text: String,
    outcomes: Vec<CharOutcome>,
    index: usize,
    started: Instant,
    last_visit: Instant,
}

impl Run {
    /// `target` must already be sanitized; see [`sanitize`].
    pub fn new(target: &str, started: Instant) -> Self {
        Self {
            text: target.to_string(),
            outcomes: target.chars().map(CharOutcome::new).collect(),
            index: 0,
            started,
            last_visit: started,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn outcome(&self, pos: usize) -> Option<&CharOutcome> {
        self.outcomes.get(pos)
    }

    /// Outcome at the cursor, if the cursor is not past the end
    pub fn current(&self) -> Option<&CharOutcome> {
        self.outcomes.get(self.index)
    }

    /// Stamp timing and correctness onto the outcome at the cursor.
    ///
    /// The inter-keystroke delta and the first-try flag are recorded on the
    /// first visit only; the correct/incorrect classification always tracks
    /// the latest visit so a backspaced position can be re-typed.
    pub fn visit(&mut self, correct: bool, now: Instant) {
        let index = self.index;
        let delta = now.duration_since(self.last_visit).as_secs_f64();
        if let Some(outcome) = self.outcomes.get_mut(index) {
            if outcome.delta_secs.is_none() {
                outcome.delta_secs = Some(delta);
            }
            if outcome.first_try.is_none() {
                outcome.first_try = Some(correct);
            }
            outcome.correct = correct;
        }
        self.last_visit = now;
    }

    /// Classify the outcome at the cursor without stamping timing.
    ///
    /// The first keystroke of a cold-started run has no preceding
    /// keystroke to measure an interval from; it establishes the timing
    /// baseline for the next position instead. An untimed position counts
    /// as unvisited for slicing.
    pub fn visit_untimed(&mut self, correct: bool, now: Instant) {
        let index = self.index;
        if let Some(outcome) = self.outcomes.get_mut(index) {
            if outcome.first_try.is_none() {
                outcome.first_try = Some(correct);
            }
            outcome.correct = correct;
        }
        self.last_visit = now;
    }

    /// Append a mistyped character to the outcome at the cursor
    pub fn record_error(&mut self, typed: char) {
        let index = self.index;
        if let Some(outcome) = self.outcomes.get_mut(index) {
            outcome.errors.push(typed);
        }
    }

    /// Buffer an uncommitted insert-mode character at the cursor
    pub fn buffer(&mut self, typed: char) {
        let index = self.index;
        if let Some(outcome) = self.outcomes.get_mut(index) {
            outcome.pending.push(typed);
        }
    }

    /// Remove and return the most recently buffered character at the
    /// cursor, or None if nothing is buffered there
    pub fn pop_char(&mut self) -> Option<char> {
        let index = self.index;
        self.outcomes.get_mut(index).and_then(|o| o.pending.pop())
    }

    /// Move the cursor forward one position if `should_advance`
    pub fn advance(&mut self, should_advance: bool) {
        if should_advance && self.index < self.outcomes.len() {
            self.index += 1;
        }
    }

    /// Move the cursor back one position (backspace over committed input)
    pub fn retreat(&mut self) {
        if self.index > 0 {
            self.index -= 1;
        }
    }

    /// Whether the position just before the cursor is classified incorrect
    pub fn last_was_error(&self) -> bool {
        self.index
            .checked_sub(1)
            .and_then(|i| self.outcomes.get(i))
            .map(|o| !o.correct)
            .unwrap_or(false)
    }

    /// Terminal condition: cursor at the end with the final character correct
    pub fn is_complete(&self) -> bool {
        self.index == self.outcomes.len()
            && self.outcomes.last().map(|o| o.correct).unwrap_or(false)
    }

    /// Aggregate view over `range`. Returns None for an empty range or one
    /// containing a position that was never visited (no timing available).
    pub fn slice(&self, range: Range<usize>) -> Option<Slice> {
        if range.is_empty() || range.end > self.outcomes.len() {
            return None;
        }

        let outcomes = &self.outcomes[range.clone()];
        let mut deltas = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            deltas.push(outcome.delta_secs?);
        }

        let len = outcomes.len();
        let seconds_per_char = deltas.iter().sum::<f64>() / len as f64;
        let viscosity = if seconds_per_char > 0.0 {
            deltas
                .iter()
                .map(|d| {
                    let rel = d / seconds_per_char - 1.0;
                    rel * rel
                })
                .sum::<f64>()
                / len as f64
        } else {
            0.0
        };
        let mistakes = outcomes.iter().map(|o| o.errors.len()).sum();

        Some(Slice {
            text: self.text.chars().skip(range.start).take(len).collect(),
            len,
            seconds_per_char,
            viscosity,
            mistakes,
            flawed: mistakes > 0,
        })
    }
}
