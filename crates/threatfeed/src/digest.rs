//! Weekly digest pipeline.
//!
//! One run selects eligible recipients, ranks the week's articles and sends
//! one email per recipient. A failed send is counted and logged, never
//! propagated; only store errors abort a run. Nothing about a run is
//! persisted, so a later run may resend to the same people.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use tracing::{error, info, warn};

use crate::mailer::DigestMailer;
use crate::models::{Article, DigestStats, Recipient};
use crate::ranking::ContentRanker;
use crate::store::{DigestStore, RecipientFilter};

const DEFAULT_SEND_CONCURRENCY: usize = 2;

/// Caller-supplied targeting for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestOptions {
    /// Only these addresses, still subject to eligibility
    pub limit_to_emails: Option<Vec<String>>,
    /// Never these addresses (e.g. already sent today)
    pub exclude_emails: Vec<String>,
}

impl DigestOptions {
    fn filter(&self) -> RecipientFilter {
        RecipientFilter {
            limit_to: self.limit_to_emails.clone(),
            exclude: self.exclude_emails.clone(),
        }
    }
}

/// What happened for a single recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientOutcome {
    pub email: String,
    pub result: Result<(), String>,
}

/// Everything one invocation selected and did. Lives only for the call.
#[derive(Debug, Clone, Default)]
pub struct DigestRun {
    pub recipients: Vec<Recipient>,
    pub articles: Vec<Article>,
    pub outcomes: Vec<RecipientOutcome>,
}

impl DigestRun {
    pub fn stats(&self) -> DigestStats {
        let total = self.recipients.len();
        if total == 0 {
            return DigestStats::default();
        }
        if self.articles.is_empty() {
            return DigestStats {
                sent: 0,
                errors: 0,
                skipped: total,
                total,
            };
        }

        let sent = self.outcomes.iter().filter(|o| o.result.is_ok()).count();
        DigestStats {
            sent,
            errors: self.outcomes.len() - sent,
            skipped: 0,
            total,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|outcome| match &outcome.result {
            Ok(()) => None,
            Err(reason) => Some((outcome.email.as_str(), reason.as_str())),
        })
    }
}

pub struct DigestService<S, M> {
    store: S,
    mailer: M,
    ranker: ContentRanker,
    send_concurrency: usize,
}

impl<S, M> DigestService<S, M>
where
    S: DigestStore,
    M: DigestMailer,
{
    pub fn new(store: S, mailer: M, ranker: ContentRanker) -> Self {
        Self {
            store,
            mailer,
            ranker,
            send_concurrency: DEFAULT_SEND_CONCURRENCY,
        }
    }

    /// Maximum number of sends in flight at once.
    pub fn with_send_concurrency(mut self, send_concurrency: usize) -> Self {
        self.send_concurrency = send_concurrency.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn mailer(&self) -> &M {
        &self.mailer
    }

    pub fn ranker(&self) -> &ContentRanker {
        &self.ranker
    }

    pub async fn generate_weekly_digest(&self, options: &DigestOptions) -> Result<DigestStats> {
        self.generate_weekly_digest_at(options, Utc::now()).await
    }

    pub async fn generate_weekly_digest_at(
        &self,
        options: &DigestOptions,
        now: DateTime<Utc>,
    ) -> Result<DigestStats> {
        let run = self.run_at(options, now).await?;
        let stats = run.stats();
        info!(
            sent = stats.sent,
            errors = stats.errors,
            skipped = stats.skipped,
            total = stats.total,
            "weekly digest generation completed"
        );
        Ok(stats)
    }

    /// Executes one run and returns the full per-recipient record.
    pub async fn run_at(&self, options: &DigestOptions, now: DateTime<Utc>) -> Result<DigestRun> {
        info!("starting weekly digest generation");

        let recipients = self.select_recipients(options)?;
        info!(count = recipients.len(), "found recipients for weekly digest");

        if recipients.is_empty() {
            return Ok(DigestRun::default());
        }

        let articles = self.ranker.select(&self.store, now)?;
        if articles.is_empty() {
            warn!(
                recipients = recipients.len(),
                "no articles in the digest window, skipping digest"
            );
            return Ok(DigestRun {
                recipients,
                articles,
                outcomes: Vec::new(),
            });
        }

        let outcomes = self.dispatch(&recipients, &articles).await;
        Ok(DigestRun {
            recipients,
            articles,
            outcomes,
        })
    }

    /// Eligible recipients for `options`, one per address.
    pub fn select_recipients(&self, options: &DigestOptions) -> Result<Vec<Recipient>> {
        let recipients = self
            .store
            .eligible_recipients(&options.filter())
            .context("Failed to load digest recipients")?;

        // Addresses differing only in ASCII case are one person.
        let mut seen = HashSet::new();
        Ok(recipients
            .into_iter()
            .filter(|recipient| seen.insert(recipient.email.to_ascii_lowercase()))
            .collect())
    }

    fn dispatch<'a>(
        &'a self,
        recipients: &'a [Recipient],
        articles: &'a [Article],
    ) -> BoxFuture<'a, Vec<RecipientOutcome>> {
        let mailer = &self.mailer;
        let send_concurrency = self.send_concurrency;
        Box::pin(stream::iter(recipients)
            .map(move |recipient| async move {
                let result = match mailer.send_digest(recipient, articles).await {
                    Ok(()) => {
                        info!(email = %recipient.email, "sent weekly digest");
                        Ok(())
                    }
                    Err(e) => {
                        error!(email = %recipient.email, error = %format!("{e:#}"), "failed to send digest");
                        Err(format!("{e:#}"))
                    }
                };
                RecipientOutcome {
                    email: recipient.email.clone(),
                    result,
                }
            })
            .buffer_unordered(send_concurrency)
            .collect())
    }

    /// Sends the current digest to one address, bypassing the eligibility gate.
    pub async fn send_test_digest(
        &self,
        recipient: &Recipient,
        now: DateTime<Utc>,
    ) -> Result<Vec<Article>> {
        let articles = self.ranker.select(&self.store, now)?;
        if articles.is_empty() {
            warn!(email = %recipient.email, "no articles to send in test digest");
            return Ok(articles);
        }

        self.mailer
            .send_digest(recipient, &articles)
            .await
            .with_context(|| format!("Failed to send test digest to {}", recipient.email))?;
        info!(email = %recipient.email, articles = articles.len(), "test digest sent");
        Ok(articles)
    }
}
