use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::dedup::TitleClassifier;
use crate::models::Article;
use crate::store::DigestStore;

pub const DEFAULT_WINDOW_DAYS: i64 = 7;
pub const DEFAULT_CAP: usize = 5;
pub const DEFAULT_CANDIDATE_POOL: usize = 100;

/// A window of `days` days. Negative or out-of-range values are configuration errors.
pub fn window_from_days(days: i64) -> Result<Duration> {
    if days < 0 {
        bail!("Digest window must not be negative, got {days} days");
    }
    Duration::try_days(days).with_context(|| format!("Digest window of {days} days is out of range"))
}

/// The earliest publish time inside a window ending at `now`.
pub fn window_start(now: DateTime<Utc>, window: Duration) -> Result<DateTime<Utc>> {
    now.checked_sub_signed(window).with_context(|| {
        format!(
            "Digest window of {} days reaches before the earliest supported date",
            window.num_days()
        )
    })
}

/// Severity ascending, then newest first.
pub fn compare_articles(a: &Article, b: &Article) -> Ordering {
    a.severity_rank()
        .cmp(&b.severity_rank())
        .then_with(|| b.published_at.cmp(&a.published_at))
}

/// Stable sort by [`compare_articles`], truncated to `cap`.
pub fn rank_articles(mut articles: Vec<Article>, cap: usize) -> Vec<Article> {
    articles.sort_by(compare_articles);
    articles.truncate(cap);
    articles
}

/// Selects the articles a digest is built from.
#[derive(Debug, Clone)]
pub struct ContentRanker {
    window: Duration,
    cap: usize,
    candidate_pool: usize,
    priority_sources: HashSet<String>,
    dedupe: Option<TitleClassifier>,
}

impl Default for ContentRanker {
    fn default() -> Self {
        Self {
            window: Duration::days(DEFAULT_WINDOW_DAYS),
            cap: DEFAULT_CAP,
            candidate_pool: DEFAULT_CANDIDATE_POOL,
            priority_sources: HashSet::new(),
            dedupe: None,
        }
    }
}

impl ContentRanker {
    pub fn new(window: Duration, cap: usize) -> Self {
        Self {
            window,
            cap,
            ..Self::default()
        }
    }

    pub fn with_candidate_pool(mut self, candidate_pool: usize) -> Self {
        self.candidate_pool = candidate_pool;
        self
    }

    /// Articles from these sources sort ahead of everything else.
    pub fn with_priority_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.priority_sources = sources.into_iter().map(Into::into).collect();
        self
    }

    /// Skip candidates that the classifier considers the same story as an
    /// article already selected.
    pub fn with_dedupe(mut self, classifier: TitleClassifier) -> Self {
        self.dedupe = Some(classifier);
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    fn compare(&self, a: &Article, b: &Article) -> Ordering {
        let a_priority = self.priority_sources.contains(&a.source);
        let b_priority = self.priority_sources.contains(&b.source);
        b_priority
            .cmp(&a_priority)
            .then_with(|| compare_articles(a, b))
    }

    fn fetch_limit(&self) -> usize {
        if self.dedupe.is_some() || !self.priority_sources.is_empty() {
            self.candidate_pool.max(self.cap)
        } else {
            self.cap
        }
    }

    /// Reads candidates published in the window ending at `now` and returns
    /// at most `cap` of them in digest order.
    pub fn select<S: DigestStore + ?Sized>(&self, store: &S, now: DateTime<Utc>) -> Result<Vec<Article>> {
        let since = window_start(now, self.window)?;
        let candidates = store
            .articles_published_since(since, self.fetch_limit())
            .context("Failed to load candidate articles")?;

        info!(
            candidates = candidates.len(),
            since = %since,
            "prioritizing candidate articles"
        );

        let selected = self.order(candidates);
        info!(selected = selected.len(), cap = self.cap, "selected digest articles");
        Ok(selected)
    }

    /// Orders an already-loaded candidate list and applies the cap and dedupe.
    pub fn order(&self, mut candidates: Vec<Article>) -> Vec<Article> {
        candidates.sort_by(|a, b| self.compare(a, b));

        let Some(classifier) = &self.dedupe else {
            candidates.truncate(self.cap);
            return candidates;
        };

        let mut selected: Vec<Article> = Vec::with_capacity(self.cap);
        for candidate in candidates {
            if selected.len() >= self.cap {
                break;
            }

            let duplicate_of = selected
                .iter()
                .find(|existing| classifier.is_duplicate(&candidate.title, &existing.title));

            match duplicate_of {
                Some(existing) => {
                    debug!(
                        title = %candidate.title,
                        matches = %existing.title,
                        "skipping duplicate story"
                    );
                }
                None => selected.push(candidate),
            }
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ThreatLevel;
    use chrono::TimeZone;

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 8, 12, 0, 0).unwrap()
    }

    fn article(id: &str, level: Option<ThreatLevel>, hours_ago: i64) -> Article {
        Article {
            id: id.to_string(),
            title: format!("Story {id}"),
            summary: None,
            url: format!("https://example.com/{id}"),
            source: "Feed".to_string(),
            published_at: base_time() - Duration::hours(hours_ago),
            threat_level: level,
            read_time: None,
        }
    }

    fn ids(articles: &[Article]) -> Vec<&str> {
        articles.iter().map(|a| a.id.as_str()).collect()
    }

    #[test]
    fn test_rank_orders_by_severity_then_recency() {
        let ranked = rank_articles(
            vec![
                article("low", Some(ThreatLevel::Low), 1),
                article("unset", None, 2),
                article("high", Some(ThreatLevel::High), 50),
                article("crit-old", Some(ThreatLevel::Critical), 40),
                article("medium", Some(ThreatLevel::Medium), 3),
                article("crit-new", Some(ThreatLevel::Critical), 10),
            ],
            10,
        );
        assert_eq!(
            ids(&ranked),
            vec!["crit-new", "crit-old", "high", "medium", "low", "unset"]
        );
    }

    #[test]
    fn test_rank_truncates_to_cap_without_padding() {
        let articles = vec![
            article("a", None, 1),
            article("b", None, 2),
            article("c", None, 3),
        ];
        assert_eq!(rank_articles(articles.clone(), 2).len(), 2);
        assert_eq!(rank_articles(articles, 5).len(), 3);
        assert!(rank_articles(Vec::new(), 5).is_empty());
    }

    #[test]
    fn test_low_and_unset_share_a_bucket() {
        let ranked = rank_articles(
            vec![
                article("low-old", Some(ThreatLevel::Low), 20),
                article("unset-new", None, 1),
            ],
            5,
        );
        assert_eq!(ids(&ranked), vec!["unset-new", "low-old"]);
    }

    #[test]
    fn test_priority_sources_sort_first() {
        let mut priority = article("priority-low", Some(ThreatLevel::Low), 5);
        priority.source = "Unit 42".to_string();
        let ranker = ContentRanker::default().with_priority_sources(["Unit 42"]);

        let ordered = ranker.order(vec![
            article("crit", Some(ThreatLevel::Critical), 1),
            priority,
        ]);
        assert_eq!(ids(&ordered), vec!["priority-low", "crit"]);
    }

    #[test]
    fn test_dedupe_keeps_highest_ranked_copy_and_backfills() {
        let mut first = article("first", Some(ThreatLevel::Critical), 2);
        first.title = "React2Shell exploited in the wild".to_string();
        let mut copy = article("copy", Some(ThreatLevel::High), 1);
        copy.title = "CISA adds React2Shell to KEV".to_string();
        let other = article("other", Some(ThreatLevel::Low), 1);

        let ranker = ContentRanker::new(Duration::days(7), 2).with_dedupe(TitleClassifier::default());
        let ordered = ranker.order(vec![copy, other, first]);
        assert_eq!(ids(&ordered), vec!["first", "other"]);
    }

    #[test]
    fn test_window_from_days_rejects_out_of_range_values() {
        assert_eq!(window_from_days(7).unwrap(), Duration::days(7));
        assert!(window_from_days(-1).is_err());
        assert!(window_from_days(i64::MAX).is_err());
    }

    #[test]
    fn test_select_with_window_before_earliest_date_is_an_error() {
        let store = crate::store::SqliteStore::open_in_memory().unwrap();
        let ranker = ContentRanker::new(Duration::days(365 * 300_000), 5);
        let err = ranker.select(&store, base_time()).unwrap_err();
        assert!(err.to_string().contains("earliest supported date"));
    }

    #[test]
    fn test_fetch_limit_uses_pool_only_when_reordering() {
        let plain = ContentRanker::new(Duration::days(7), 5).with_candidate_pool(100);
        assert_eq!(plain.fetch_limit(), 5);

        let deduped = plain.clone().with_dedupe(TitleClassifier::default());
        assert_eq!(deduped.fetch_limit(), 100);
    }
}
