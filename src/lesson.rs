use std::collections::HashSet;

use include_dir::{include_dir, Dir};
use rand::seq::SliceRandom;
use rand::thread_rng;
use tracing::debug;

use crate::stats::ItemKind;

static CORPUS_DIR: Dir = include_dir!("src/corpus");

/// One item the typist struggles with, ranked ascending by viscosity
/// upstream so the least-fluid items drive the lesson first.
#[derive(Clone, Debug)]
pub struct WeakItem {
    pub item: String,
    pub kind: ItemKind,
    pub speed: f64,
    pub accuracy: f64,
    pub viscosity: f64,
    pub count: u32,
    pub mistakes: u32,
    pub impact: f64,
}

impl WeakItem {
    pub fn named(item: &str) -> Self {
        Self {
            item: item.to_string(),
            kind: ItemKind::Word,
            speed: 0.0,
            accuracy: 0.0,
            viscosity: 0.0,
            count: 0,
            mistakes: 0,
            impact: 0.0,
        }
    }
}

/// Flat word lists partitioned by word length, one word per line.
pub struct Corpus {
    buckets: Vec<Vec<String>>,
}

impl Corpus {
    /// The word lists compiled into the binary.
    pub fn embedded() -> Self {
        let lists: Vec<&str> = ["short.txt", "medium.txt"]
            .iter()
            .map(|name| {
                CORPUS_DIR
                    .get_file(name)
                    .expect("corpus file not found")
                    .contents_utf8()
                    .expect("corpus file is not utf-8")
            })
            .collect();
        Self::from_lists(&lists)
    }

    pub fn from_lists(lists: &[&str]) -> Self {
        let buckets = lists
            .iter()
            .map(|list| {
                list.lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .collect();
        Self { buckets }
    }

    /// Random words drawn across every bucket, for seeding a drill
    pub fn sample(&self, n: usize) -> Vec<String> {
        let all: Vec<&str> = self.words().collect();
        all.choose_multiple(&mut thread_rng(), n)
            .map(|w| w.to_string())
            .collect()
    }

    fn words(&self) -> impl Iterator<Item = &str> {
        self.buckets.iter().flatten().map(String::as_str)
    }
}

/// Collect every corpus word containing a weak item as a case-insensitive
/// substring, collapse duplicates across items, and shuffle the result.
/// Items with no matches contribute nothing; empty input yields an empty
/// lesson.
pub fn synthesize(weak: &[WeakItem], corpus: &Corpus) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut words = Vec::new();

    for item in weak {
        let needle = item.item.trim().to_lowercase();
        if needle.is_empty() {
            continue;
        }
        for word in corpus.words() {
            if word.to_lowercase().contains(&needle) && seen.insert(word.to_string()) {
                words.push(word.to_string());
            }
        }
    }

    debug!(items = weak.len(), words = words.len(), "synthesized lesson");
    words.shuffle(&mut thread_rng());
    words
}
