use std::rc::Rc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use cadenza::runtime::{Clock, InputEvent, ManualClock, Runner, TestEventSource};
use cadenza::session::{InputOptions, Session, SessionEvent, SessionState};

// Headless integration using the internal runtime + Session without a TTY.
// Verifies that a minimal typing flow completes via Runner/TestEventSource.

#[derive(Clone)]
struct SharedClock(Rc<ManualClock>);

impl Clock for SharedClock {
    fn now(&self) -> Instant {
        self.0.now()
    }
}

fn no_wait() -> InputOptions {
    InputOptions {
        require_space: false,
        ..InputOptions::default()
    }
}

#[test]
fn headless_typing_flow_completes() {
    let clock = Rc::new(ManualClock::new());
    let mut session = Session::with_clock("hi", no_wait(), Box::new(SharedClock(clock.clone())));

    // Warm start so the first keystroke is timed against the start instant
    session.start();

    let (tx, rx) = mpsc::channel();
    let es = TestEventSource::new(rx);
    let runner = Runner::new(es, Duration::from_millis(5));

    for c in ['h', 'i'] {
        tx.send(InputEvent::Key(KeyEvent::new(
            KeyCode::Char(c),
            KeyModifiers::NONE,
        )))
        .unwrap();
    }

    // Drive a tiny event loop until finished (or bounded steps)
    for _ in 0..100u32 {
        match runner.step() {
            InputEvent::Key(key) => {
                if let KeyCode::Char(c) = key.code {
                    clock.advance(Duration::from_millis(200));
                    session.insert(c);
                    if session.state() == SessionState::Finished {
                        break;
                    }
                }
            }
            InputEvent::Resize | InputEvent::Tick => {}
        }
    }

    assert_eq!(session.state(), SessionState::Finished);

    // Progress is queued strictly before completion
    let mut saw_completed = false;
    let mut last_progress = None;
    while let Some(event) = session.poll_event() {
        match event {
            SessionEvent::Progress(i) => {
                assert!(!saw_completed);
                last_progress = Some(i);
            }
            SessionEvent::Completed(summary) => {
                saw_completed = true;
                assert!((summary.wpm - 60.0).abs() < 1e-9);
                assert_eq!(summary.accuracy, 1.0);
            }
            SessionEvent::Ready(_) | SessionEvent::Started => {}
        }
    }
    assert!(saw_completed);
    assert_eq!(last_progress, Some(2));
}

#[test]
fn headless_insert_mode_blocks_on_error() {
    let options = InputOptions {
        overwrite_mode: false,
        require_space: false,
        ..InputOptions::default()
    };
    let mut session = Session::new("ab", options);

    // Wrong char does not advance the cursor
    session.insert('x');
    assert_eq!(session.run().unwrap().index(), 0);

    // Clearing the junk and retyping correctly completes the run
    session.backspace(false);
    session.insert('a');
    session.insert('b');
    assert_eq!(session.state(), SessionState::Finished);
}

#[test]
fn headless_reset_returns_to_ready() {
    let mut session = Session::new("abc", no_wait());
    session.insert('a');
    assert_eq!(session.state(), SessionState::Running);

    session.reset();
    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.run().is_none());
}
