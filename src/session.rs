use std::collections::VecDeque;

use tracing::debug;

use crate::config::Config;
use crate::recorder::{sanitize, Run};
use crate::runtime::{Clock, MonotonicClock};
use crate::stats::{summarize, RunSummary};

/// Input-mode toggles for a session, fixed at construction
#[derive(Clone, Copy, Debug)]
pub struct InputOptions {
    /// Typed characters overwrite the target position whether or not they
    /// match. Off means insert mode: wrong keys pile up without advancing.
    pub overwrite_mode: bool,
    /// Errors never block progress and do not have to be corrected
    pub lenient_mode: bool,
    /// Consume a leading space to start the run instead of typing it
    pub require_space: bool,
    /// Backspace refuses to erase confirmed-correct input
    pub protected_backspace: bool,
}

impl Default for InputOptions {
    fn default() -> Self {
        Self {
            overwrite_mode: true,
            lenient_mode: false,
            require_space: true,
            protected_backspace: false,
        }
    }
}

impl From<&Config> for InputOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            overwrite_mode: cfg.overwrite_mode,
            lenient_mode: cfg.lenient_mode,
            require_space: cfg.require_space,
            protected_backspace: cfg.protected_backspace,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Ready,
    Running,
    Finished,
}

/// Lifecycle and progress notifications, drained by the presentation
/// layer. Within one keystroke, Progress is queued before Completed.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// A fresh target is in place and typing may begin
    Ready(String),
    Started,
    /// Cursor advanced to this index by a correct, unblocked keystroke
    Progress(usize),
    Completed(RunSummary),
}

/// State machine reconciling keystrokes against a target text.
///
/// READY until an explicit `start` (warm) or a first insertion (cold),
/// RUNNING while typing, FINISHED once the cursor reaches the end with the
/// final character correct. FINISHED is terminal for the run; `reset`
/// returns to READY with a fresh recorder.
pub struct Session {
    target: String,
    options: InputOptions,
    clock: Box<dyn Clock>,
    state: SessionState,
    run: Option<Run>,
    /// Position of the oldest uncorrected error, when error-blocking is
    /// active. Typing at other positions is gated until this clears.
    pending_error: Option<usize>,
    events: VecDeque<SessionEvent>,
}

impl Session {
    pub fn new(text: &str, options: InputOptions) -> Self {
        Self::with_clock(text, options, Box::new(MonotonicClock))
    }

    pub fn with_clock(text: &str, options: InputOptions, clock: Box<dyn Clock>) -> Self {
        let target = sanitize(text);
        let mut session = Self {
            target,
            options,
            clock,
            state: SessionState::Ready,
            run: None,
            pending_error: None,
            events: VecDeque::new(),
        };
        session.events.push_back(SessionEvent::Ready(session.target.clone()));
        session
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn run(&self) -> Option<&Run> {
        self.run.as_ref()
    }

    /// The completed run, once the session is FINISHED
    pub fn finished_run(&self) -> Option<&Run> {
        match self.state {
            SessionState::Finished => self.run.as_ref(),
            _ => None,
        }
    }

    pub fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    /// Replace the target text and return to READY
    pub fn set_text(&mut self, text: &str) {
        self.target = sanitize(text);
        self.reset();
    }

    /// Discard any in-progress run and return to READY over the same
    /// target. No persistence side effects.
    pub fn reset(&mut self) {
        self.state = SessionState::Ready;
        self.run = None;
        self.pending_error = None;
        self.events.push_back(SessionEvent::Ready(self.target.clone()));
    }

    /// Warm start: switch to RUNNING before any character is typed
    pub fn start(&mut self) {
        if self.state != SessionState::Ready {
            debug!(state = ?self.state, "ignoring start outside READY");
            return;
        }
        self.run = Some(Run::new(&self.target, self.clock.now()));
        self.state = SessionState::Running;
        self.events.push_back(SessionEvent::Started);
    }

    /// Feed one typed character through the overwrite/lenient/blocking
    /// policy. In READY this performs a cold start (or, with wait-for-space
    /// enabled, consumes a space as the warm-start trigger without timing
    /// it).
    pub fn insert(&mut self, ch: char) {
        let mut cold_start = false;
        match self.state {
            SessionState::Finished => {
                debug!("ignoring insert into finished session");
                return;
            }
            SessionState::Ready => {
                if self.options.require_space {
                    if ch == ' ' {
                        self.start();
                    }
                    return;
                }
                self.start();
                cold_start = true;
            }
            SessionState::Running => {}
        }

        let now = self.clock.now();
        let options = self.options;
        let pending = self.pending_error;
        let Some(run) = self.run.as_mut() else {
            return;
        };
        let Some(target_char) = run.current().map(|o| o.target) else {
            return;
        };

        let correct = ch == target_char;
        let should_advance = correct || options.overwrite_mode;

        // Blocking gates every position except the offending one, where a
        // keystroke is an attempt to correct it.
        let blocked = matches!(pending, Some(p) if p != run.index());
        if blocked {
            if !correct {
                run.record_error(ch);
            }
            if should_advance {
                run.advance(true);
            } else {
                run.buffer(ch);
            }
            return;
        }

        // A cold start has no prior keystroke to time against: the first
        // keystroke is classified but untimed and anchors the next delta.
        if cold_start {
            run.visit_untimed(correct, now);
        } else {
            run.visit(correct, now);
        }

        if correct {
            if pending == Some(run.index()) {
                self.pending_error = None;
            }
            run.advance(true);
            let index = run.index();
            self.events.push_back(SessionEvent::Progress(index));
        } else {
            run.record_error(ch);
            if !options.lenient_mode && pending.is_none() {
                self.pending_error = Some(run.index());
            }
            if options.overwrite_mode {
                run.advance(true);
            } else {
                run.buffer(ch);
            }
        }

        if run.is_complete() {
            self.state = SessionState::Finished;
            let summary = summarize(run);
            self.events.push_back(SessionEvent::Completed(summary));
        }
    }

    /// Erase one character (or one word) of typed input. Uncommitted
    /// insert-mode characters at the cursor go first; protected mode stops
    /// as soon as it would erase a confirmed-correct position.
    pub fn backspace(&mut self, by_word: bool) {
        if self.state != SessionState::Running {
            return;
        }
        let protected = self.options.protected_backspace;
        let target: Vec<char> = self.target.chars().collect();
        let Some(run) = self.run.as_mut() else {
            return;
        };

        if by_word {
            let mark = prev_word_boundary(&target, run.index());
            while run.pop_char().is_some() {}
            while run.index() > mark {
                if protected && !run.last_was_error() {
                    break;
                }
                run.retreat();
                while run.pop_char().is_some() {}
            }
        } else if run.pop_char().is_none() && run.index() > 0 && !(protected && !run.last_was_error())
        {
            run.retreat();
        }

        if let Some(p) = self.pending_error {
            if p >= run.index() {
                self.pending_error = None;
            }
        }
    }
}

/// Start of the word preceding `from` in `target`, clamped to 0
fn prev_word_boundary(target: &[char], from: usize) -> usize {
    let mut i = from.min(target.len());
    while i > 0 && !target[i - 1].is_alphanumeric() {
        i -= 1;
    }
    while i > 0 && target[i - 1].is_alphanumeric() {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ManualClock;
    use std::rc::Rc;
    use std::time::Duration;

    struct SharedClock(Rc<ManualClock>);

    impl Clock for SharedClock {
        fn now(&self) -> std::time::Instant {
            self.0.now()
        }
    }

    fn session_with_clock(text: &str, options: InputOptions) -> (Session, Rc<ManualClock>) {
        let clock = Rc::new(ManualClock::new());
        let session = Session::with_clock(text, options, Box::new(SharedClock(clock.clone())));
        (session, clock)
    }

    fn cold_options() -> InputOptions {
        InputOptions {
            require_space: false,
            ..InputOptions::default()
        }
    }

    fn type_all(session: &mut Session, clock: &ManualClock, text: &str, delta: Duration) {
        for ch in text.chars() {
            clock.advance(delta);
            session.insert(ch);
        }
    }

    fn drain(session: &mut Session) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Some(ev) = session.poll_event() {
            events.push(ev);
        }
        events
    }

    #[test]
    fn test_ready_event_on_construction() {
        let mut session = Session::new("hi", InputOptions::default());
        assert_eq!(session.poll_event(), Some(SessionEvent::Ready("hi".into())));
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn test_cold_start_on_first_insert() {
        let (mut session, clock) = session_with_clock("hi", cold_options());
        drain(&mut session);
        clock.advance(Duration::from_millis(100));
        session.insert('h');
        assert_eq!(session.state(), SessionState::Running);
        let events = drain(&mut session);
        assert_eq!(events[0], SessionEvent::Started);
        assert_eq!(events[1], SessionEvent::Progress(1));
    }

    #[test]
    fn test_wait_for_space_consumes_space_untimed() {
        let (mut session, clock) = session_with_clock("hi", InputOptions::default());
        drain(&mut session);

        // Any non-space key in READY is ignored
        session.insert('h');
        assert_eq!(session.state(), SessionState::Ready);

        session.insert(' ');
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(drain(&mut session), vec![SessionEvent::Started]);

        // The consumed space was not recorded as a keystroke
        assert_eq!(session.run().unwrap().index(), 0);

        type_all(&mut session, &clock, "hi", Duration::from_millis(200));
        assert_eq!(session.state(), SessionState::Finished);
    }

    #[test]
    fn test_perfect_run_summary() {
        let (mut session, clock) = session_with_clock("hello", cold_options());
        type_all(&mut session, &clock, "hello", Duration::from_millis(200));

        assert_eq!(session.state(), SessionState::Finished);
        let events = drain(&mut session);
        let completed = events.last().unwrap();
        match completed {
            SessionEvent::Completed(summary) => {
                assert!((summary.wpm - 60.0).abs() < 1e-9);
                assert_eq!(summary.accuracy, 1.0);
                assert!(summary.viscosity < 1e-12);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[test]
    fn test_cold_start_first_keystroke_untimed() {
        let (mut session, clock) = session_with_clock("hello", cold_options());
        type_all(&mut session, &clock, "hello", Duration::from_millis(200));
        assert_eq!(session.state(), SessionState::Finished);

        // Position 0 is classified but carries no interval
        let run = session.finished_run().unwrap();
        assert!(run.outcome(0).unwrap().is_correct());
        assert_eq!(run.outcome(0).unwrap().delta_secs, None);
        assert_eq!(run.outcome(0).unwrap().first_try, Some(true));
        // The remaining uniform intervals give the exact pace
        for i in 1..5 {
            assert_eq!(run.outcome(i).unwrap().delta_secs, Some(0.2));
        }
    }

    #[test]
    fn test_warm_start_times_every_position() {
        let (mut session, clock) = session_with_clock("hi", cold_options());
        session.start();
        type_all(&mut session, &clock, "hi", Duration::from_millis(200));

        let run = session.finished_run().unwrap();
        assert_eq!(run.outcome(0).unwrap().delta_secs, Some(0.2));
        assert_eq!(run.outcome(1).unwrap().delta_secs, Some(0.2));
    }

    #[test]
    fn test_progress_precedes_completed() {
        let (mut session, clock) = session_with_clock("ab", cold_options());
        type_all(&mut session, &clock, "ab", Duration::from_millis(100));

        let events = drain(&mut session);
        let progress_idx = events
            .iter()
            .position(|e| matches!(e, SessionEvent::Progress(2)))
            .unwrap();
        let completed_idx = events
            .iter()
            .position(|e| matches!(e, SessionEvent::Completed(_)))
            .unwrap();
        assert!(progress_idx < completed_idx);
    }

    #[test]
    fn test_insert_after_finish_is_noop() {
        let (mut session, clock) = session_with_clock("ab", cold_options());
        type_all(&mut session, &clock, "ab", Duration::from_millis(100));
        session.insert('x');
        assert_eq!(session.state(), SessionState::Finished);
        assert_eq!(session.run().unwrap().index(), 2);
    }

    #[test]
    fn test_error_blocking_insert_mode() {
        // Target "cat", insert mode: the x stays at position 1 and the
        // following correct 'a' resolves the block.
        let options = InputOptions {
            overwrite_mode: false,
            require_space: false,
            ..InputOptions::default()
        };
        let (mut session, clock) = session_with_clock("cat", options);

        type_all(&mut session, &clock, "cx", Duration::from_millis(100));
        let run = session.run().unwrap();
        assert_eq!(run.index(), 1);
        assert_eq!(run.outcome(1).unwrap().mistakes(), 1);

        clock.advance(Duration::from_millis(100));
        session.insert('a');
        let run = session.run().unwrap();
        assert_eq!(run.index(), 2);
        assert!(run.outcome(1).unwrap().is_correct());

        clock.advance(Duration::from_millis(100));
        session.insert('t');
        assert_eq!(session.state(), SessionState::Finished);
    }

    #[test]
    fn test_error_blocking_overwrite_mode_gates_statistics() {
        let (mut session, clock) = session_with_clock("cat", cold_options());
        type_all(&mut session, &clock, "cxt", Duration::from_millis(100));

        // The wrong x advanced the cursor (overwrite), the following t was
        // typed while blocked: no timing was stamped for position 2.
        let run = session.run().unwrap();
        assert_eq!(run.index(), 3);
        assert!(!run.outcome(2).unwrap().visited());
        // Blocked means no completion even at the end of the target
        assert_eq!(session.state(), SessionState::Running);

        // Backspace to the error clears the block; retyping completes
        session.backspace(false);
        session.backspace(false);
        type_all(&mut session, &clock, "at", Duration::from_millis(100));
        assert_eq!(session.state(), SessionState::Finished);
    }

    #[test]
    fn test_lenient_mode_never_blocks() {
        let options = InputOptions {
            lenient_mode: true,
            require_space: false,
            ..InputOptions::default()
        };
        let (mut session, clock) = session_with_clock("cat", options);
        type_all(&mut session, &clock, "cxt", Duration::from_millis(100));

        // Mistyped middle letter, but the run still completes
        assert_eq!(session.state(), SessionState::Finished);
        let run = session.finished_run().unwrap();
        assert_eq!(run.outcome(1).unwrap().mistakes(), 1);
    }

    #[test]
    fn test_lenient_last_char_must_still_match() {
        let options = InputOptions {
            lenient_mode: true,
            require_space: false,
            ..InputOptions::default()
        };
        let (mut session, clock) = session_with_clock("cat", options);
        type_all(&mut session, &clock, "cax", Duration::from_millis(100));
        assert_eq!(session.state(), SessionState::Running);
    }

    #[test]
    fn test_protected_backspace_stops_at_correct_input() {
        let options = InputOptions {
            protected_backspace: true,
            require_space: false,
            ..InputOptions::default()
        };
        let (mut session, clock) = session_with_clock("word", options);
        type_all(&mut session, &clock, "worx", Duration::from_millis(100));

        // Erases the wrong character only
        session.backspace(false);
        assert_eq!(session.run().unwrap().index(), 3);

        // A second backspace refuses to touch the correct prefix
        session.backspace(false);
        assert_eq!(session.run().unwrap().index(), 3);
        assert!(session.run().unwrap().outcome(2).unwrap().is_correct());
    }

    #[test]
    fn test_backspace_pops_insert_mode_junk_first() {
        let options = InputOptions {
            overwrite_mode: false,
            require_space: false,
            ..InputOptions::default()
        };
        let (mut session, clock) = session_with_clock("cat", options);
        type_all(&mut session, &clock, "cx", Duration::from_millis(100));

        // The buffered x is removed without moving the cursor
        session.backspace(false);
        assert_eq!(session.run().unwrap().index(), 1);

        session.backspace(false);
        assert_eq!(session.run().unwrap().index(), 0);
    }

    #[test]
    fn test_backspace_by_word() {
        let (mut session, clock) = session_with_clock("one two", cold_options());
        type_all(&mut session, &clock, "one tw", Duration::from_millis(100));
        session.backspace(true);
        // Back to the start of "two"
        assert_eq!(session.run().unwrap().index(), 4);
        session.backspace(true);
        assert_eq!(session.run().unwrap().index(), 0);
    }

    #[test]
    fn test_backspace_clamps_at_start() {
        let (mut session, clock) = session_with_clock("ab", cold_options());
        clock.advance(Duration::from_millis(50));
        session.insert('a');
        session.backspace(false);
        session.backspace(false);
        assert_eq!(session.run().unwrap().index(), 0);
    }

    #[test]
    fn test_backspace_clears_block() {
        let (mut session, clock) = session_with_clock("cat", cold_options());
        type_all(&mut session, &clock, "cx", Duration::from_millis(100));
        session.backspace(false);

        // Retype correctly and finish
        type_all(&mut session, &clock, "at", Duration::from_millis(100));
        assert_eq!(session.state(), SessionState::Finished);
    }

    #[test]
    fn test_reset_returns_to_ready() {
        let (mut session, clock) = session_with_clock("cat", cold_options());
        type_all(&mut session, &clock, "cat", Duration::from_millis(100));
        assert_eq!(session.state(), SessionState::Finished);

        session.reset();
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.run().is_none());

        // Fully typable again after reset
        drain(&mut session);
        type_all(&mut session, &clock, "cat", Duration::from_millis(100));
        assert_eq!(session.state(), SessionState::Finished);
    }

    #[test]
    fn test_cursor_stays_in_bounds() {
        let (mut session, clock) = session_with_clock("ab", cold_options());
        for ch in "axbxb".chars() {
            clock.advance(Duration::from_millis(50));
            session.insert(ch);
            let idx = session.run().unwrap().index();
            assert!(idx <= 2);
        }
        for _ in 0..5 {
            session.backspace(false);
            if let Some(run) = session.run() {
                assert!(run.index() <= 2);
            }
        }
    }

    #[test]
    fn test_set_text_sanitizes() {
        let mut session = Session::new("a\r\nb", InputOptions::default());
        assert_eq!(session.target(), "a⏎b");
        session.set_text("x\ny");
        assert_eq!(session.target(), "x⏎y");
    }

    #[test]
    fn test_prev_word_boundary() {
        let chars: Vec<char> = "one two".chars().collect();
        assert_eq!(prev_word_boundary(&chars, 7), 4);
        assert_eq!(prev_word_boundary(&chars, 4), 0);
        assert_eq!(prev_word_boundary(&chars, 0), 0);
    }
}
