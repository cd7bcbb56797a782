// Public modules
pub mod config;
pub mod dedup;
pub mod digest;
pub mod email;
pub mod io;
pub mod logging;
pub mod mailer;
pub mod models;
pub mod ranking;
pub mod store;

// Re-export commonly used types
pub use config::{Config, DigestSettings};
pub use dedup::{find_duplicate_pairs, DuplicatePair, Stoplist, TitleClassifier, TitleComparison};
pub use digest::{DigestOptions, DigestRun, DigestService, RecipientOutcome};
pub use email::{DigestEmail, RenderedEmail};
pub use io::{get_default_previews_dir, preview_filename, save_preview, save_preview_in};
pub use logging::init_tracing;
pub use mailer::{DigestMailer, DryRunMailer, ResendMailer};
pub use models::{Article, DigestStats, Recipient, ThreatLevel};
pub use ranking::{rank_articles, window_from_days, window_start, ContentRanker};
pub use store::{DigestStore, RecipientFilter, SqliteStore};
