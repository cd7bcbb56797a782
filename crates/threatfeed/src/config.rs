use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::dedup::{Stoplist, TitleClassifier};
use crate::ranking::{
    window_from_days, ContentRanker, DEFAULT_CANDIDATE_POOL, DEFAULT_CAP, DEFAULT_WINDOW_DAYS,
};

const DEFAULT_SENDER: &str = "WhatCyber <contact@whatcyber.com>";
const DEFAULT_BASE_URL: &str = "http://localhost:5173";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_SEND_CONCURRENCY: usize = 2;
/// Jaccard threshold used when title dedupe is on and none is configured.
const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.4;

/// Tuning for article selection and dispatch.
#[derive(Debug, Clone)]
pub struct DigestSettings {
    pub window_days: i64,
    pub cap: usize,
    pub candidate_pool: usize,
    pub send_concurrency: usize,
    pub dedupe_titles: bool,
    pub similarity_threshold: Option<f64>,
    pub priority_sources: Vec<String>,
    pub extra_stopwords: Vec<String>,
}

impl Default for DigestSettings {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            cap: DEFAULT_CAP,
            candidate_pool: DEFAULT_CANDIDATE_POOL,
            send_concurrency: DEFAULT_SEND_CONCURRENCY,
            dedupe_titles: false,
            similarity_threshold: None,
            priority_sources: Vec::new(),
            extra_stopwords: Vec::new(),
        }
    }
}

impl DigestSettings {
    pub fn classifier(&self) -> TitleClassifier {
        let mut stoplist = Stoplist::default();
        stoplist.extend(&self.extra_stopwords);
        let classifier = TitleClassifier::new(stoplist);
        match self.similarity_threshold {
            Some(threshold) => classifier.with_similarity_threshold(threshold),
            None => classifier,
        }
    }

    pub fn ranker(&self) -> Result<ContentRanker> {
        let window = window_from_days(self.window_days)?;
        let ranker = ContentRanker::new(window, self.cap)
            .with_candidate_pool(self.candidate_pool)
            .with_priority_sources(self.priority_sources.iter().cloned());

        if self.dedupe_titles {
            Ok(ranker.with_dedupe(self.classifier()))
        } else {
            Ok(ranker)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub resend_api_key: Option<String>,
    pub sender: String,
    pub base_url: String,
    pub cron_secret: Option<String>,
    pub bind_addr: String,
    pub digest: DigestSettings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Try to load .env from multiple locations
        Self::try_load_dotenv();

        let database_path = match non_empty_var("THREATFEED_DB") {
            Some(path) => PathBuf::from(path),
            None => default_database_path()?,
        };

        let base_url = non_empty_var("BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        url::Url::parse(&base_url)
            .with_context(|| format!("BASE_URL is not a valid URL: {base_url}"))?;

        let dedupe_titles = parse_var("DIGEST_DEDUPE_TITLES")?.unwrap_or(false);
        let similarity_threshold = match parse_var::<f64>("DIGEST_SIMILARITY_THRESHOLD")? {
            Some(threshold) => Some(threshold),
            None if dedupe_titles => Some(DEFAULT_SIMILARITY_THRESHOLD),
            None => None,
        };

        let digest = DigestSettings {
            window_days: parse_var("DIGEST_WINDOW_DAYS")?.unwrap_or(DEFAULT_WINDOW_DAYS),
            cap: parse_var("DIGEST_CAP")?.unwrap_or(DEFAULT_CAP),
            candidate_pool: parse_var("DIGEST_CANDIDATE_POOL")?.unwrap_or(DEFAULT_CANDIDATE_POOL),
            send_concurrency: parse_var::<usize>("DIGEST_SEND_CONCURRENCY")?
                .unwrap_or(DEFAULT_SEND_CONCURRENCY)
                .max(1),
            dedupe_titles,
            similarity_threshold,
            priority_sources: list_var("DIGEST_PRIORITY_SOURCES"),
            extra_stopwords: list_var("DIGEST_EXTRA_STOPWORDS"),
        };

        Ok(Self {
            database_path,
            resend_api_key: non_empty_var("RESEND_API_KEY"),
            sender: non_empty_var("DIGEST_FROM").unwrap_or_else(|| DEFAULT_SENDER.to_string()),
            base_url,
            cron_secret: non_empty_var("CRON_SECRET"),
            bind_addr: non_empty_var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            digest,
        })
    }

    /// The email API key, required by anything that actually sends mail.
    pub fn require_resend_api_key(&self) -> Result<&str> {
        self.resend_api_key.as_deref().context(
            "RESEND_API_KEY not found.\n\n\
            To fix this, create ~/.config/threatfeed/.env with:\n  \
            RESEND_API_KEY=your_key_here\n\n\
            Get a Resend API key from: https://resend.com/api-keys",
        )
    }

    fn try_load_dotenv() {
        // 1. Current directory (for development)
        if dotenvy::dotenv().is_ok() {
            return;
        }

        // 2. ~/.config/threatfeed/.env
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("threatfeed").join(".env");
            if config_path.exists() && dotenvy::from_path(&config_path).is_ok() {
                return;
            }
        }

        // 3. ~/.env
        if let Some(home_dir) = dirs::home_dir() {
            let home_path = home_dir.join(".env");
            if home_path.exists() {
                let _ = dotenvy::from_path(&home_path);
            }
        }

        // If none found, that's okay - environment variables might be set system-wide
    }
}

fn default_database_path() -> Result<PathBuf> {
    let data_dir = dirs::data_local_dir()
        .context("Could not determine local data directory; set THREATFEED_DB")?;
    Ok(data_dir.join("threatfeed").join("threatfeed.db"))
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    non_empty_var(name)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("{name} has an invalid value: {value}"))
        })
        .transpose()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn list_var(name: &str) -> Vec<String> {
    non_empty_var(name)
        .map(|value| split_list(&value))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_split_list_trims_and_drops_empty_items() {
        assert_eq!(
            split_list(" Unit 42, Bleeping Computer ,,McAfee Labs"),
            vec!["Unit 42", "Bleeping Computer", "McAfee Labs"]
        );
        assert!(split_list(" , ").is_empty());
    }

    #[test]
    fn test_default_settings_match_digest_contract() {
        let settings = DigestSettings::default();
        assert_eq!(settings.window_days, 7);
        assert_eq!(settings.cap, 5);
        assert!(!settings.dedupe_titles);

        let ranker = settings.ranker().unwrap();
        assert_eq!(ranker.cap(), 5);
        assert_eq!(ranker.window(), Duration::days(7));
    }

    #[test]
    fn test_out_of_range_window_is_a_config_error() {
        let settings = DigestSettings {
            window_days: i64::MAX,
            ..DigestSettings::default()
        };
        let err = settings.ranker().unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_extra_stopwords_reach_classifier() {
        let settings = DigestSettings {
            extra_stopwords: vec!["Microsoft".to_string()],
            ..DigestSettings::default()
        };
        let classifier = settings.classifier();
        assert!(classifier.stoplist().contains("microsoft"));
        assert!(classifier.stoplist().contains("vulnerability"));
    }

    #[test]
    fn test_missing_api_key_explains_fix() {
        let config = Config {
            database_path: PathBuf::from("threatfeed.db"),
            resend_api_key: None,
            sender: DEFAULT_SENDER.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            cron_secret: None,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            digest: DigestSettings::default(),
        };
        let err = config.require_resend_api_key().unwrap_err();
        assert!(err.to_string().contains("RESEND_API_KEY"));
    }
}
