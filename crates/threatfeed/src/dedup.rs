//! Duplicate-title classification.
//!
//! Two titles describe the same story when they share a "significant" word:
//! longer than five characters and not a generic security term. Generic terms
//! co-occur across unrelated stories, product and campaign names do not.

use std::collections::{BTreeSet, HashSet};

use crate::models::Article;

/// Words must be longer than this to be compared at all.
const MIN_CANDIDATE_LEN: usize = 3;
/// Shared words must be longer than this to count as significant.
const MIN_SIGNIFICANT_LEN: usize = 5;

/// Generic security vocabulary that never marks two titles as the same story.
pub const DEFAULT_STOPWORDS: &[&str] = &[
    "vulnerability",
    "exploited",
    "hackers",
    "attack",
    "security",
    "critical",
    "breach",
    "update",
    "patch",
    "released",
    "active",
    "confirmed",
    "severe",
    "severity",
    "under",
    "groups",
    "target",
    "addresses",
    "vulnerable",
    "added",
    "after",
    "started",
    "newly",
    "disclosed",
    "remote",
    "execution",
    "code",
    "bypass",
    "zero-day",
    "authentication",
    "injection",
    "service",
    "denial",
    "issues",
];

fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

/// Lowercased words of a title with punctuation stripped, keeping words longer than 3 chars.
pub fn candidate_words(title: &str) -> BTreeSet<String> {
    normalize(title)
        .split_whitespace()
        .filter(|word| word.len() > MIN_CANDIDATE_LEN)
        .map(str::to_string)
        .collect()
}

/// Closed set of generic terms excluded from significant matches.
///
/// Entries go through the same normalization as titles, so `zero-day`
/// matches the `zeroday` produced by stripping the hyphen from a title.
/// A stoplist compared verbatim would never match hyphenated entries and
/// would leave `zeroday` significant: "New zero-day in Foo" and "Another
/// zero-day in Bar" are duplicates there but not here.
#[derive(Debug, Clone)]
pub struct Stoplist {
    words: HashSet<String>,
}

impl Stoplist {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut stoplist = Self {
            words: HashSet::new(),
        };
        stoplist.extend(words);
        stoplist
    }

    pub fn extend<I, S>(&mut self, words: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for word in words {
            let normalized: String = normalize(word.as_ref()).split_whitespace().collect();
            if !normalized.is_empty() {
                self.words.insert(normalized);
            }
        }
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl Default for Stoplist {
    fn default() -> Self {
        Self::new(DEFAULT_STOPWORDS)
    }
}

/// Result of comparing two titles. Computed on demand, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct TitleComparison {
    pub shared_words: BTreeSet<String>,
    pub significant_words: BTreeSet<String>,
    /// Jaccard similarity of the two candidate word sets
    pub similarity: f64,
    pub duplicate: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TitleClassifier {
    stoplist: Stoplist,
    /// When set, titles above this Jaccard similarity, or where one title
    /// contains the other, are also duplicates.
    similarity_threshold: Option<f64>,
}

impl TitleClassifier {
    pub fn new(stoplist: Stoplist) -> Self {
        Self {
            stoplist,
            similarity_threshold: None,
        }
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = Some(threshold);
        self
    }

    pub fn stoplist(&self) -> &Stoplist {
        &self.stoplist
    }

    pub fn is_significant(&self, word: &str) -> bool {
        word.len() > MIN_SIGNIFICANT_LEN && !self.stoplist.contains(word)
    }

    pub fn compare(&self, a: &str, b: &str) -> TitleComparison {
        let words_a = candidate_words(a);
        let words_b = candidate_words(b);

        let shared_words: BTreeSet<String> = words_a.intersection(&words_b).cloned().collect();
        let significant_words: BTreeSet<String> = shared_words
            .iter()
            .filter(|word| self.is_significant(word))
            .cloned()
            .collect();

        let union = words_a.union(&words_b).count();
        let similarity = if union == 0 {
            0.0
        } else {
            shared_words.len() as f64 / union as f64
        };

        let duplicate = !significant_words.is_empty()
            || self.similarity_threshold.is_some_and(|threshold| {
                similarity > threshold || contains_either(a, b)
            });

        TitleComparison {
            shared_words,
            significant_words,
            similarity,
            duplicate,
        }
    }

    pub fn is_duplicate(&self, a: &str, b: &str) -> bool {
        self.compare(a, b).duplicate
    }
}

fn contains_either(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}

/// A pair of articles classified as the same story.
#[derive(Debug, Clone)]
pub struct DuplicatePair<'a> {
    pub first: &'a Article,
    pub second: &'a Article,
    pub comparison: TitleComparison,
}

/// Compares every pair of articles. Quadratic, meant for small same-week batches.
pub fn find_duplicate_pairs<'a>(
    classifier: &TitleClassifier,
    articles: &'a [Article],
) -> Vec<DuplicatePair<'a>> {
    let mut pairs = Vec::new();
    for (i, first) in articles.iter().enumerate() {
        for second in &articles[i + 1..] {
            let comparison = classifier.compare(&first.title, &second.title);
            if comparison.duplicate {
                pairs.push(DuplicatePair {
                    first,
                    second,
                    comparison,
                });
            }
        }
    }
    pairs
}
