use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use threatfeed::{
    Config, DigestEmail, DigestMailer, DigestOptions, DigestService, DryRunMailer, Recipient,
    ResendMailer, SqliteStore,
};

#[derive(Parser)]
#[command(name = "send-digest")]
#[command(about = "Send the weekly threat digest to opted-in users")]
struct Args {
    /// Only send to these addresses (comma separated); they must still be eligible
    #[arg(long, value_delimiter = ',')]
    limit_to: Option<Vec<String>>,

    /// Never send to these addresses (comma separated)
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,

    /// Render every email but do not send anything
    #[arg(long)]
    dry_run: bool,

    /// Write each recipient's rendered email to the previews directory instead of sending
    #[arg(long, conflicts_with = "to")]
    preview: bool,

    /// Send one test digest to this address, ignoring preferences
    #[arg(long)]
    to: Option<String>,

    /// Number of days of articles to consider
    #[arg(short, long)]
    days: Option<i64>,

    /// Maximum number of articles per digest
    #[arg(long)]
    cap: Option<usize>,
}

fn build_mailer(config: &Config, dry_run: bool) -> Result<Box<dyn DigestMailer>> {
    if dry_run {
        return Ok(Box::new(DryRunMailer::new(config.base_url.clone())));
    }
    let api_key = config.require_resend_api_key()?.to_string();
    let mailer = ResendMailer::new(api_key, config.sender.clone(), config.base_url.clone())?;
    Ok(Box::new(mailer))
}

type Service = DigestService<SqliteStore, Box<dyn DigestMailer>>;

fn write_previews(config: &Config, service: &Service, options: &DigestOptions) -> Result<()> {
    let now = Utc::now();
    let articles = service.ranker().select(service.store(), now)?;
    if articles.is_empty() {
        println!("No articles in the past {} days.", config.digest.window_days);
        return Ok(());
    }

    let recipients = service.select_recipients(options)?;
    println!(
        "📝 Rendering {} previews with {} articles...",
        recipients.len(),
        articles.len()
    );

    for recipient in &recipients {
        let email = DigestEmail::render(recipient, &articles, &config.base_url, now);
        let filename = threatfeed::preview_filename(&recipient.email, now);
        let path = threatfeed::save_preview(&filename, &email.html)
            .with_context(|| format!("Failed to save preview for {}", recipient.email))?;
        println!("  ✓ {}", path.display());
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    threatfeed::init_tracing();
    let args = Args::parse();
    let mut config = Config::from_env()?;

    if let Some(days) = args.days {
        config.digest.window_days = days;
    }
    if let Some(cap) = args.cap {
        config.digest.cap = cap;
    }

    let store = SqliteStore::open(&config.database_path)?;

    // Previews never send, so they need no API key
    let mailer = build_mailer(&config, args.dry_run || args.preview)?;
    let service = DigestService::new(store, mailer, config.digest.ranker()?)
        .with_send_concurrency(config.digest.send_concurrency);

    let options = DigestOptions {
        limit_to_emails: args.limit_to.clone(),
        exclude_emails: args.exclude.clone(),
    };

    if args.preview {
        return write_previews(&config, &service, &options);
    }

    if let Some(email) = &args.to {
        println!("\n📧 Sending test digest to {email}...");
        let recipient = match service.store().get_user(email)? {
            Some(user) => Recipient::new(user.email, user.name),
            None => Recipient::new(email.clone(), ""),
        };
        let articles = service.send_test_digest(&recipient, Utc::now()).await?;
        if articles.is_empty() {
            println!(
                "No articles in the past {} days; nothing sent.",
                config.digest.window_days
            );
        } else {
            println!("✅ Sent {} articles to {}", articles.len(), recipient.email);
        }
        return Ok(());
    }

    println!("\n📬 Generating weekly digest...");
    let run = service.run_at(&options, Utc::now()).await?;
    let stats = run.stats();

    if stats.skipped > 0 {
        println!(
            "No articles in the past {} days; skipped {} recipients.",
            config.digest.window_days, stats.skipped
        );
        return Ok(());
    }

    println!(
        "✓ Sent {}/{} digests ({} errors)",
        stats.sent, stats.total, stats.errors
    );
    let failures: Vec<_> = run.failures().collect();
    if !failures.is_empty() {
        println!("\n⚠ Failed to send {} digests:", failures.len());
        for (email, reason) in failures {
            println!("  ✗ {email}");
            println!("    {reason}");
        }
    }

    Ok(())
}
