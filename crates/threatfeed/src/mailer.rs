use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::email::DigestEmail;
use crate::models::{Article, Recipient};

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// Delivers one digest email. An `Err` carries the failure reason.
#[async_trait]
pub trait DigestMailer: Send + Sync {
    async fn send_digest(&self, recipient: &Recipient, articles: &[Article]) -> Result<()>;
}

#[async_trait]
impl<T: DigestMailer + ?Sized> DigestMailer for Box<T> {
    async fn send_digest(&self, recipient: &Recipient, articles: &[Article]) -> Result<()> {
        (**self).send_digest(recipient, articles).await
    }
}

#[derive(Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct ResendResponse {
    id: String,
}

/// Sends digests through the Resend HTTP API.
pub struct ResendMailer {
    client: Client,
    api_key: String,
    from: String,
    base_url: String,
    endpoint: String,
}

impl ResendMailer {
    pub fn new(api_key: String, from: String, base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_key,
            from,
            base_url,
            endpoint: RESEND_API_URL.to_string(),
        })
    }

    /// Points the mailer at a different API endpoint (self-hosted relay, tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl DigestMailer for ResendMailer {
    async fn send_digest(&self, recipient: &Recipient, articles: &[Article]) -> Result<()> {
        let email = DigestEmail::render(recipient, articles, &self.base_url, Utc::now());

        let request = ResendRequest {
            from: &self.from,
            to: vec![recipient.email.as_str()],
            subject: &email.subject,
            html: &email.html,
            text: &email.text,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .context("Failed to send request to email API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            anyhow::bail!("Email API returned error: {} - {}", status, error_text);
        }

        let sent = response
            .json::<ResendResponse>()
            .await
            .context("Failed to parse email API response")?;

        debug!(email = %recipient.email, message_id = %sent.id, "digest email accepted");
        Ok(())
    }
}

/// Renders every digest but never sends it.
pub struct DryRunMailer {
    base_url: String,
}

impl DryRunMailer {
    pub fn new(base_url: String) -> Self {
        Self { base_url }
    }
}

#[async_trait]
impl DigestMailer for DryRunMailer {
    async fn send_digest(&self, recipient: &Recipient, articles: &[Article]) -> Result<()> {
        let email = DigestEmail::render(recipient, articles, &self.base_url, Utc::now());
        info!(
            email = %recipient.email,
            subject = %email.subject,
            articles = articles.len(),
            html_bytes = email.html.len(),
            "dry run: digest not sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resend_request_shape() {
        let request = ResendRequest {
            from: "Threat Feed <digest@example.com>",
            to: vec!["a@example.com"],
            subject: "Subject",
            html: "<p>hi</p>",
            text: "hi",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["to"][0], "a@example.com");
        assert_eq!(json["from"], "Threat Feed <digest@example.com>");
        assert_eq!(json["html"], "<p>hi</p>");
    }

    #[tokio::test]
    async fn test_dry_run_mailer_always_succeeds() {
        let mailer = DryRunMailer::new("https://threatfeed.example.com".to_string());
        mailer
            .send_digest(&Recipient::new("a@example.com", ""), &[])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() {
        let mailer = ResendMailer::new(
            "key".to_string(),
            "digest@example.com".to_string(),
            "https://threatfeed.example.com".to_string(),
        )
        .unwrap()
        .with_endpoint("http://127.0.0.1:9/emails");

        let result = mailer
            .send_digest(&Recipient::new("a@example.com", "A"), &[])
            .await;
        assert!(result.is_err());
    }
}
