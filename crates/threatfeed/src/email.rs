use chrono::{DateTime, Utc};

use crate::models::{Article, Recipient, ThreatLevel};

/// Subject, HTML and plain-text parts of one digest email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

pub struct DigestEmail;

impl DigestEmail {
    pub fn subject(generated_at: DateTime<Utc>) -> String {
        format!(
            "Your Weekly Threat Digest - {}",
            generated_at.format("%-d %B %Y")
        )
    }

    pub fn render(
        recipient: &Recipient,
        articles: &[Article],
        base_url: &str,
        generated_at: DateTime<Utc>,
    ) -> RenderedEmail {
        let html = Self::render_html(recipient, articles, base_url, generated_at);
        let text = html2text::from_read(html.as_bytes(), 80);

        RenderedEmail {
            subject: Self::subject(generated_at),
            html,
            text,
        }
    }

    fn greeting(recipient: &Recipient) -> String {
        match recipient.greeting_name() {
            Some(name) => format!("Hi {},", Self::escape_html(name)),
            None => "Hi there,".to_string(),
        }
    }

    fn badge_color(level: Option<ThreatLevel>) -> &'static str {
        match level {
            Some(ThreatLevel::Critical) => "#c0392b",
            Some(ThreatLevel::High) => "#e67e22",
            Some(ThreatLevel::Medium) => "#f1c40f",
            Some(ThreatLevel::Low) => "#27ae60",
            None => "#7f8c8d",
        }
    }

    fn render_html(
        recipient: &Recipient,
        articles: &[Article],
        base_url: &str,
        generated_at: DateTime<Utc>,
    ) -> String {
        let base_url = base_url.trim_end_matches('/');
        let mut html = String::new();

        html.push_str("<!DOCTYPE html>\n<html>\n<head>\n");
        html.push_str("  <meta charset=\"utf-8\">\n");
        html.push_str(
            "  <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
        );
        html.push_str("</head>\n");
        html.push_str("<body style=\"font-family: Arial, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;\">\n");

        html.push_str("<div style=\"background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); padding: 30px; text-align: center; border-radius: 10px 10px 0 0;\">\n");
        html.push_str("  <h1 style=\"color: white; margin: 0; font-size: 26px;\">Weekly Threat Digest</h1>\n");
        html.push_str(&format!(
            "  <p style=\"color: #eee; margin: 5px 0 0 0;\">Week ending {}</p>\n",
            generated_at.format("%A, %-d %B %Y")
        ));
        html.push_str("</div>\n");

        html.push_str("<div style=\"background: #f9f9f9; padding: 30px; border-radius: 0 0 10px 10px;\">\n");
        html.push_str(&format!(
            "  <h2 style=\"color: #333; margin-top: 0;\">{}</h2>\n",
            Self::greeting(recipient)
        ));
        html.push_str(&format!(
            "  <p>Here are the top {} stories from the past week, most severe first.</p>\n",
            articles.len()
        ));

        for (index, article) in articles.iter().enumerate() {
            let level = article
                .threat_level
                .map(|l| l.as_str())
                .unwrap_or("UNRATED");

            html.push_str("  <div style=\"background: white; padding: 15px; margin: 15px 0; border-radius: 5px;\">\n");
            html.push_str(&format!(
                "    <span style=\"background: {}; color: white; font-size: 11px; font-weight: bold; padding: 2px 8px; border-radius: 3px;\">{}</span>\n",
                Self::badge_color(article.threat_level),
                level
            ));
            html.push_str(&format!(
                "    <h3 style=\"margin: 8px 0;\">{}. <a href=\"{}\" style=\"color: #2c3e50; text-decoration: none;\">{}</a></h3>\n",
                index + 1,
                Self::escape_html(&article.url),
                Self::escape_html(&article.title)
            ));

            let mut meta = format!(
                "{} &middot; {}",
                Self::escape_html(&article.source),
                article.published_at.format("%-d %b %Y")
            );
            if let Some(minutes) = article.read_time {
                meta.push_str(&format!(" &middot; {minutes} min read"));
            }
            html.push_str(&format!(
                "    <div style=\"color: #7f8c8d; font-size: 13px;\">{meta}</div>\n"
            ));

            if let Some(summary) = article.summary.as_deref().filter(|s| !s.trim().is_empty()) {
                html.push_str(&format!(
                    "    <p style=\"font-size: 14px;\">{}</p>\n",
                    Self::escape_html(summary.trim())
                ));
            }
            html.push_str("  </div>\n");
        }

        html.push_str(&format!(
            "  <div style=\"text-align: center; margin: 30px 0;\"><a href=\"{base_url}\" style=\"background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); color: white; padding: 12px 26px; text-decoration: none; border-radius: 5px; font-weight: bold;\">Read more on the threat feed</a></div>\n"
        ));
        html.push_str("  <hr style=\"border: none; border-top: 1px solid #ddd; margin: 30px 0;\">\n");
        html.push_str(&format!(
            "  <p style=\"font-size: 12px; color: #999; text-align: center;\">You are receiving this because you enabled the weekly digest. <a href=\"{base_url}/settings\">Manage email preferences</a>.</p>\n"
        ));
        html.push_str("</div>\n");
        html.push_str("</body>\n</html>");
        html
    }

    fn escape_html(text: &str) -> String {
        text.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;")
            .replace('\'', "&#39;")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_article() -> Article {
        Article {
            id: "a1".to_string(),
            title: "Fortinet <FortiOS> flaw".to_string(),
            summary: Some("Attackers chain two bugs & pivot.".to_string()),
            url: "https://example.com/fortios?a=1&b=2".to_string(),
            source: "Bleeping Computer".to_string(),
            published_at: Utc.with_ymd_and_hms(2026, 2, 5, 9, 0, 0).unwrap(),
            threat_level: Some(ThreatLevel::Critical),
            read_time: Some(4),
        }
    }

    fn generated_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 8, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_subject_includes_date() {
        assert_eq!(
            DigestEmail::subject(generated_at()),
            "Your Weekly Threat Digest - 8 February 2026"
        );
    }

    #[test]
    fn test_render_escapes_article_fields() {
        let email = DigestEmail::render(
            &Recipient::new("a@example.com", "Ada"),
            &[sample_article()],
            "https://threatfeed.example.com/",
            generated_at(),
        );

        assert!(email.html.contains("Fortinet &lt;FortiOS&gt; flaw"));
        assert!(email.html.contains("two bugs &amp; pivot"));
        assert!(email.html.contains("https://example.com/fortios?a=1&amp;b=2"));
        assert!(email.html.contains("CRITICAL"));
        assert!(email.html.contains("4 min read"));
        assert!(email.html.contains("https://threatfeed.example.com/settings"));
    }

    #[test]
    fn test_render_greets_by_name_or_generically() {
        let named = DigestEmail::render(
            &Recipient::new("a@example.com", "Ada"),
            &[sample_article()],
            "https://threatfeed.example.com",
            generated_at(),
        );
        assert!(named.html.contains("Hi Ada,"));

        let anonymous = DigestEmail::render(
            &Recipient::new("b@example.com", ""),
            &[sample_article()],
            "https://threatfeed.example.com",
            generated_at(),
        );
        assert!(anonymous.html.contains("Hi there,"));
    }

    #[test]
    fn test_text_part_mentions_every_title() {
        let mut second = sample_article();
        second.title = "Ivanti Connect Secure campaign".to_string();
        second.threat_level = None;

        let email = DigestEmail::render(
            &Recipient::new("a@example.com", "Ada"),
            &[sample_article(), second],
            "https://threatfeed.example.com",
            generated_at(),
        );
        assert!(email.text.contains("Ivanti"));
        assert!(email.html.contains("UNRATED"));
    }
}
