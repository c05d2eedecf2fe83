use std::error::Error;
use std::io::{self, stdin, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Duration as Days, Local};
use clap::{error::ErrorKind, CommandFactory, Parser};
use crossterm::{
    cursor::MoveToColumn,
    event::{KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, Clear, ClearType},
    tty::IsTty,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cadenza::config::{Config, ConfigStore, FileConfigStore};
use cadenza::difficulty::{self, DifficultyModel, SelectMethod};
use cadenza::lesson::{self, Corpus, WeakItem};
use cadenza::recorder::RETURN_CHAR;
use cadenza::results_log::ResultsLog;
use cadenza::runtime::{CrosstermEventSource, InputEvent, Runner};
use cadenza::session::{InputOptions, Session, SessionEvent, SessionState};
use cadenza::stats::{self, ItemKind, RunStatistics, StatisticRecord};
use cadenza::store::{StatsDb, TextRow};

const TICK_RATE_MS: u64 = 100;
const SEED_WORDS: usize = 20;

/// terminal typing trainer that measures, ranks and drills your weak spots
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "A terminal typing trainer that times every keystroke, aggregates per-character, per-trigram and per-word statistics, picks the next text by predicted difficulty, and synthesizes review lessons from whatever you type worst."
)]
pub struct Cli {
    /// import a text file into the catalog (blank-line separated sections)
    #[clap(short = 'i', long)]
    import: Option<PathBuf>,

    /// type this prompt instead of a stored text
    #[clap(short = 'p', long)]
    prompt: Option<String>,

    /// how the next text is picked
    #[clap(short = 's', long, value_enum)]
    select: Option<SelectMethod>,

    /// print the most recent results and exit
    #[clap(long, value_name = "N")]
    history: Option<usize>,

    /// errors never block progress and need no correction
    #[clap(long)]
    lenient: bool,

    /// insert mode: wrong keys pile up without advancing until corrected
    #[clap(long)]
    insert_mode: bool,

    /// backspace refuses to erase confirmed-correct input
    #[clap(long)]
    protected: bool,

    /// start timing on the first keystroke instead of waiting for space
    #[clap(long)]
    no_wait: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if self.lenient {
            config.lenient_mode = true;
        }
        if self.insert_mode {
            config.overwrite_mode = false;
        }
        if self.protected {
            config.protected_backspace = true;
        }
        if self.no_wait {
            config.require_space = false;
        }
        if let Some(method) = self.select {
            config.select_method = method;
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = FileConfigStore::new().load();
    cli.apply(&mut config);

    let mut db = StatsDb::new()?;

    if let Some(n) = cli.history {
        return show_history(&db, n);
    }
    if let Some(path) = &cli.import {
        let count = import_file(&db, path)?;
        println!("imported {} sections from {}", count, path.display());
        return Ok(());
    }

    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    let corpus = Corpus::embedded();
    let first = first_text(&db, &cli, &config, &corpus)?;

    enable_raw_mode()?;
    let outcome = run_loop(&mut db, &config, &corpus, first);
    disable_raw_mode()?;
    println!();
    outcome
}

fn show_history(db: &StatsDb, limit: usize) -> Result<(), Box<dyn Error>> {
    let results = db.recent_results(limit)?;
    if results.is_empty() {
        println!("no results yet");
        return Ok(());
    }
    for row in results {
        println!(
            "{}  text {:>4}  {:>6.1} wpm  {:>5.1}% acc  {:.3} visc",
            row.timestamp.format("%Y-%m-%d %H:%M"),
            row.text_id,
            row.wpm,
            row.accuracy * 100.0,
            row.viscosity,
        );
    }
    Ok(())
}

/// Split an imported file on blank lines and store each section as one
/// text under a source named after the file.
fn import_file(db: &StatsDb, path: &Path) -> Result<usize, Box<dyn Error>> {
    let contents = std::fs::read_to_string(path)?;
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("import");
    let source = db.add_source(name, None)?;

    let mut count = 0;
    for section in contents.split("\n\n") {
        let section = section.trim();
        if section.is_empty() {
            continue;
        }
        db.add_text(source, section)?;
        count += 1;
    }
    Ok(count)
}

fn first_text(
    db: &StatsDb,
    cli: &Cli,
    config: &Config,
    corpus: &Corpus,
) -> Result<TextRow, Box<dyn Error>> {
    if let Some(prompt) = &cli.prompt {
        let source = db.add_source("<custom>", None)?;
        let id = db.add_text(source, prompt)?;
        return Ok(TextRow {
            id,
            source,
            body: prompt.clone(),
        });
    }

    if let Some(text) = select_next(db, config)? {
        return Ok(text);
    }
    // Empty catalog: seed a drill from the embedded word lists
    let source = db.add_source("<generated>", None)?;
    let body = corpus.sample(SEED_WORDS).join(" ");
    let id = db.add_text(source, &body)?;
    Ok(TextRow { id, source, body })
}

/// Pick the next text per the configured selection policy. In-order walks
/// the catalog by insertion; the other policies score a random sample.
fn select_next(db: &StatsDb, config: &Config) -> Result<Option<TextRow>, rusqlite::Error> {
    if config.select_method == SelectMethod::InOrder {
        return db.next_in_order(db.last_typed_text()?, config.wrap_policy);
    }

    let sample = db.random_texts(config.difficulty_sample_size)?;
    let since = Local::now() - Days::days(config.history_window_days);
    let model = DifficultyModel::build(db.median_costs(ItemKind::Trigram, since)?, 4);
    let bodies: Vec<&str> = sample.iter().map(|t| t.body.as_str()).collect();
    let picked = difficulty::pick(&bodies, config.select_method, model.as_ref())
        .map(|i| sample[i].clone());
    if let Some(text) = &picked {
        info!(method = %config.select_method, text_id = text.id, "selected next text");
    }
    Ok(picked)
}

fn run_loop(
    db: &mut StatsDb,
    config: &Config,
    corpus: &Corpus,
    first: TextRow,
) -> Result<(), Box<dyn Error>> {
    let results_log = ResultsLog::new();
    let runner = Runner::new(
        CrosstermEventSource::new(),
        Duration::from_millis(TICK_RATE_MS),
    );
    let options = InputOptions::from(config);

    let mut current = first;
    let mut session = Session::new(&current.body, options);
    let mut target_len = session.target().chars().count();

    loop {
        while let Some(event) = session.poll_event() {
            match event {
                SessionEvent::Ready(target) => {
                    print!("\r\n{}\r\n", target.replace(RETURN_CHAR, "⏎\r\n"));
                    if config.require_space {
                        print!("press space to begin\r\n");
                    }
                    io::stdout().flush()?;
                }
                SessionEvent::Started => {}
                SessionEvent::Progress(index) => draw_progress(index, target_len)?,
                SessionEvent::Completed(_) => {}
            }
        }

        if session.state() == SessionState::Finished {
            match next_text(db, config, corpus, &session, &current, results_log.as_ref())? {
                Some(text) => {
                    current = text;
                    session.set_text(&current.body);
                    target_len = session.target().chars().count();
                }
                None => break,
            }
            continue;
        }

        match runner.step() {
            InputEvent::Key(key) => {
                if key.kind == KeyEventKind::Release {
                    continue;
                }
                match key.code {
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break,
                    KeyCode::Esc => session.reset(),
                    KeyCode::Enter => session.insert(RETURN_CHAR),
                    KeyCode::Backspace => session.backspace(
                        key.modifiers
                            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT),
                    ),
                    KeyCode::Char(c) => session.insert(c),
                    _ => {}
                }
            }
            InputEvent::Resize | InputEvent::Tick => {}
        }
    }

    Ok(())
}

fn draw_progress(index: usize, len: usize) -> io::Result<()> {
    let mut stdout = io::stdout();
    execute!(stdout, MoveToColumn(0), Clear(ClearType::CurrentLine))?;
    write!(stdout, "{}/{}", index, len)?;
    stdout.flush()
}

/// Everything that happens after a run finishes: persist, log, gate on
/// the WPM/accuracy floors, queue a review lesson, select what's next.
/// Returning None ends the program.
fn next_text(
    db: &mut StatsDb,
    config: &Config,
    corpus: &Corpus,
    session: &Session,
    current: &TextRow,
    results_log: Option<&ResultsLog>,
) -> Result<Option<TextRow>, Box<dyn Error>> {
    let Some(run) = session.finished_run() else {
        return Ok(select_next(db, config)?);
    };

    let now = Local::now();
    let Some(run_stats) = stats::extract(run, now) else {
        print!("\r\nrun too fast to measure, going again\r\n");
        return Ok(Some(current.clone()));
    };
    let summary = run_stats.summary.clone();

    let discount = db.source_discount(current.source)?;
    let is_lesson = discount.is_some();

    // Lesson runs only contribute statistics when configured to
    let persisted = if is_lesson && !config.use_lesson_stats {
        RunStatistics {
            records: Vec::new(),
            mistakes: Vec::new(),
            summary: summary.clone(),
        }
    } else {
        run_stats.clone()
    };
    db.persist_run(current.id, current.source, &persisted, now)?;

    if let Some(log) = results_log {
        if let Err(e) = log.append(now, current.id, current.source, &summary) {
            warn!(error = %e, "could not append to results log");
        }
    }

    print!(
        "\r\n{:.1} wpm  {:.1}% accuracy  {:.3} viscosity\r\n",
        summary.wpm,
        summary.accuracy * 100.0,
        summary.viscosity,
    );
    io::stdout().flush()?;

    let (min_wpm, min_accuracy) = if is_lesson {
        (config.min_lesson_wpm, config.min_lesson_accuracy)
    } else {
        (config.min_wpm, config.min_accuracy)
    };
    if summary.wpm < min_wpm || summary.accuracy < min_accuracy {
        print!("below target, going again\r\n");
        return Ok(Some(current.clone()));
    }

    if let Some(body) = review_lesson(config, corpus, is_lesson, &run_stats.records) {
        let lesson = db.add_lesson(&body)?;
        print!("review lesson queued\r\n");
        return Ok(Some(lesson));
    }

    Ok(select_next(db, config)?)
}

/// Body of the remedial lesson a finished run should queue, if any.
/// Only ordinary texts spawn reviews; a finished lesson run goes back to
/// the catalog even when weak words remain.
fn review_lesson(
    config: &Config,
    corpus: &Corpus,
    is_lesson: bool,
    records: &[StatisticRecord],
) -> Option<String> {
    if !config.auto_review || is_lesson {
        return None;
    }
    let weak: Vec<WeakItem> = stats::review_candidates(records)
        .iter()
        .map(|w| WeakItem::named(w))
        .collect();
    let words = lesson::synthesize(&weak, corpus);
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn flawed_word(item: &str) -> StatisticRecord {
        StatisticRecord {
            item: item.into(),
            kind: ItemKind::Word,
            time: 0.5,
            viscosity: 0.0,
            count: 1,
            mistakes: 1,
            flawed: true,
            timestamp: Local::now(),
        }
    }

    fn review_config() -> Config {
        Config {
            auto_review: true,
            ..Config::default()
        }
    }

    #[test]
    fn test_review_lesson_from_ordinary_run() {
        let corpus = Corpus::from_lists(&["category\ncats\ndog"]);
        let body =
            review_lesson(&review_config(), &corpus, false, &[flawed_word("cat")]).unwrap();
        assert!(body.contains("category"));
        assert!(body.contains("cats"));
    }

    #[test]
    fn test_finished_lesson_run_returns_to_the_catalog() {
        // A lesson run never queues another lesson, even with weak words
        let corpus = Corpus::from_lists(&["category\ncats"]);
        let queued = review_lesson(&review_config(), &corpus, true, &[flawed_word("cat")]);
        assert!(queued.is_none());
    }

    #[test]
    fn test_no_review_when_disabled() {
        let corpus = Corpus::from_lists(&["category"]);
        let queued = review_lesson(&Config::default(), &corpus, false, &[flawed_word("cat")]);
        assert!(queued.is_none());
    }

    #[test]
    fn test_no_review_without_weak_words() {
        let corpus = Corpus::from_lists(&["category"]);
        assert!(review_lesson(&review_config(), &corpus, false, &[]).is_none());
    }
}
