use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use threatfeed::{
    find_duplicate_pairs, window_from_days, window_start, Config, DigestStore, SqliteStore,
};

#[derive(Parser)]
#[command(name = "find-duplicates")]
#[command(about = "Report recent articles whose titles cover the same story")]
struct Args {
    /// Number of days to look back for articles
    #[arg(short, long, default_value = "7")]
    days: i64,

    /// Maximum number of articles to compare
    #[arg(short, long, default_value = "200")]
    limit: usize,

    /// Also flag pairs whose Jaccard score over title words longer than 3 characters
    /// exceeds this value, or where one title contains the other
    #[arg(long)]
    similarity: Option<f64>,
}

fn main() -> Result<()> {
    threatfeed::init_tracing();
    let args = Args::parse();
    let config = Config::from_env()?;

    let mut classifier = config.digest.classifier();
    if let Some(threshold) = args.similarity {
        classifier = classifier.with_similarity_threshold(threshold);
    }

    let store = SqliteStore::open(&config.database_path)?;
    let since = window_start(Utc::now(), window_from_days(args.days)?)?;
    let articles = store.articles_published_since(since, args.limit)?;

    if articles.is_empty() {
        println!("No articles found in the past {} days.", args.days);
        return Ok(());
    }

    println!(
        "🔍 Comparing {} articles from the past {} days...",
        articles.len(),
        args.days
    );

    let pairs = find_duplicate_pairs(&classifier, &articles);
    if pairs.is_empty() {
        println!("✓ No duplicate stories found");
        return Ok(());
    }

    println!("\n⚠ Found {} likely duplicate pairs:\n", pairs.len());
    for pair in &pairs {
        println!("  • \"{}\" ({})", pair.first.title, pair.first.source);
        println!("    \"{}\" ({})", pair.second.title, pair.second.source);

        let shared: Vec<&str> = pair.comparison.shared_words.iter().map(String::as_str).collect();
        let significant: Vec<&str> = pair
            .comparison
            .significant_words
            .iter()
            .map(String::as_str)
            .collect();
        println!("    shared: {}", shared.join(", "));
        println!("    significant: {}", significant.join(", "));
        println!("    similarity: {:.2}\n", pair.comparison.similarity);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_similarity_help_describes_fallback_rule() {
        let mut command = Args::command();
        command.clone().debug_assert();
        let help = command.render_long_help().to_string();
        assert!(help.contains("exceeds this value"));
        assert!(help.contains("one title contains the other"));
    }

    #[test]
    fn test_out_of_range_days_is_an_error() {
        assert!(window_from_days(i64::MAX).is_err());
        assert!(window_start(Utc::now(), window_from_days(7).unwrap()).is_ok());
    }
}
