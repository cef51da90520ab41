//! Channel transports. Each delivers one rendered message and reports
//! success or a `Transport` error; retries are the caller's business (there
//! are none).

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{ChannelsConfig, EmailConfig, SlackConfig, SmsConfig, WebhookConfig};
use crate::error::{Result, WatchpostError};

use super::Channel;

/// A template rendered for one channel, ready to deliver.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedMessage {
    pub channel: Channel,
    #[serde(rename = "type")]
    pub notification_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
    pub recipients: Vec<String>,
    pub data: Value,
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn channel(&self) -> Channel;

    async fn deliver(&self, message: &RenderedMessage) -> Result<()>;
}

fn transport_error(channel: Channel, message: impl Into<String>) -> WatchpostError {
    WatchpostError::Transport {
        channel: channel.as_str().to_string(),
        message: message.into(),
    }
}

async fn post_json(
    client: &reqwest::Client,
    channel: Channel,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
) -> Result<()> {
    let mut req = client.post(url).json(body);
    if let Some(token) = bearer {
        req = req.bearer_auth(token);
    }
    let resp = req
        .send()
        .await
        .map_err(|e| transport_error(channel, e.to_string()))?;
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(transport_error(
            channel,
            format!("HTTP {status}: {}", text.trim()),
        ));
    }
    Ok(())
}

fn recipients_or<'a>(message: &'a RenderedMessage, defaults: &'a [String]) -> &'a [String] {
    if message.recipients.is_empty() {
        defaults
    } else {
        &message.recipients
    }
}

// ---------------------------------------------------------------------------
// Slack
// ---------------------------------------------------------------------------

pub struct SlackTransport {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackTransport {
    pub fn new(client: reqwest::Client, cfg: &SlackConfig) -> Self {
        Self {
            client,
            webhook_url: cfg.webhook_url.clone(),
        }
    }
}

#[async_trait]
impl Transport for SlackTransport {
    fn channel(&self) -> Channel {
        Channel::Slack
    }

    async fn deliver(&self, message: &RenderedMessage) -> Result<()> {
        let text = match &message.subject {
            Some(subject) => format!("*{subject}*\n{}", message.body),
            None => message.body.clone(),
        };
        post_json(
            &self.client,
            Channel::Slack,
            &self.webhook_url,
            None,
            &json!({ "text": text }),
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Webhook
// ---------------------------------------------------------------------------

pub struct WebhookTransport {
    client: reqwest::Client,
    url: String,
    headers: Vec<(String, String)>,
}

impl WebhookTransport {
    pub fn new(client: reqwest::Client, cfg: &WebhookConfig) -> Self {
        let mut headers: Vec<(String, String)> = cfg
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        headers.sort();
        Self {
            client,
            url: cfg.url.clone(),
            headers,
        }
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    fn channel(&self) -> Channel {
        Channel::Webhook
    }

    async fn deliver(&self, message: &RenderedMessage) -> Result<()> {
        let mut req = self.client.post(&self.url).json(message);
        for (name, value) in &self.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        let resp = req
            .send()
            .await
            .map_err(|e| transport_error(Channel::Webhook, e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(transport_error(Channel::Webhook, format!("HTTP {status}")));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Email (HTTP relay)
// ---------------------------------------------------------------------------

pub struct EmailTransport {
    client: reqwest::Client,
    cfg: EmailConfig,
}

impl EmailTransport {
    pub fn new(client: reqwest::Client, cfg: &EmailConfig) -> Self {
        Self {
            client,
            cfg: cfg.clone(),
        }
    }
}

#[async_trait]
impl Transport for EmailTransport {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn deliver(&self, message: &RenderedMessage) -> Result<()> {
        let to = recipients_or(message, &self.cfg.to);
        if to.is_empty() {
            return Err(transport_error(Channel::Email, "no recipients"));
        }
        let body = json!({
            "from": self.cfg.from,
            "to": to,
            "subject": message.subject.clone().unwrap_or_default(),
            "text": message.body,
        });
        post_json(
            &self.client,
            Channel::Email,
            &self.cfg.api_url,
            self.cfg.api_key.as_deref(),
            &body,
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// SMS (HTTP gateway)
// ---------------------------------------------------------------------------

pub struct SmsTransport {
    client: reqwest::Client,
    cfg: SmsConfig,
}

impl SmsTransport {
    pub fn new(client: reqwest::Client, cfg: &SmsConfig) -> Self {
        Self {
            client,
            cfg: cfg.clone(),
        }
    }
}

#[async_trait]
impl Transport for SmsTransport {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn deliver(&self, message: &RenderedMessage) -> Result<()> {
        let to = recipients_or(message, &self.cfg.to);
        if to.is_empty() {
            return Err(transport_error(Channel::Sms, "no recipients"));
        }
        // One gateway call per number; the first failure aborts the rest.
        for number in to {
            post_json(
                &self.client,
                Channel::Sms,
                &self.cfg.api_url,
                self.cfg.api_key.as_deref(),
                &json!({ "to": number, "body": message.body }),
            )
            .await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingTransport
// ---------------------------------------------------------------------------

/// Keeps delivered messages in memory. Backs `channels.dry_run`.
pub struct RecordingTransport {
    channel: Channel,
    sent: Mutex<Vec<RenderedMessage>>,
    fail_with: Option<String>,
}

impl RecordingTransport {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            sent: Mutex::new(Vec::new()),
            fail_with: None,
        }
    }

    /// A transport whose every delivery fails with `message`.
    pub fn failing(channel: Channel, message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::new(channel)
        }
    }

    pub fn sent(&self) -> Vec<RenderedMessage> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn deliver(&self, message: &RenderedMessage) -> Result<()> {
        if let Some(err) = &self.fail_with {
            return Err(transport_error(self.channel, err.clone()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.clone());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Construction from config
// ---------------------------------------------------------------------------

/// One transport per configured channel, or a recording transport for every
/// channel in dry-run mode.
pub fn from_config(cfg: &ChannelsConfig) -> Result<Vec<Arc<dyn Transport>>> {
    if cfg.dry_run {
        return Ok(Channel::all()
            .iter()
            .map(|c| Arc::new(RecordingTransport::new(*c)) as Arc<dyn Transport>)
            .collect());
    }
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.timeout_secs))
        .build()
        .map_err(|e| WatchpostError::validation(format!("http client: {e}")))?;

    let mut out: Vec<Arc<dyn Transport>> = Vec::new();
    if let Some(email) = &cfg.email {
        out.push(Arc::new(EmailTransport::new(client.clone(), email)));
    }
    if let Some(slack) = &cfg.slack {
        out.push(Arc::new(SlackTransport::new(client.clone(), slack)));
    }
    if let Some(webhook) = &cfg.webhook {
        out.push(Arc::new(WebhookTransport::new(client.clone(), webhook)));
    }
    if let Some(sms) = &cfg.sms {
        out.push(Arc::new(SmsTransport::new(client, sms)));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(channel: Channel) -> RenderedMessage {
        RenderedMessage {
            channel,
            notification_type: "alert".into(),
            subject: Some("Alert for a.com".into()),
            body: "score 60".into(),
            recipients: vec![],
            data: json!({"target": "a.com"}),
        }
    }

    #[tokio::test]
    async fn slack_posts_text_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_body(mockito::Matcher::Json(
                json!({"text": "*Alert for a.com*\nscore 60"}),
            ))
            .with_status(200)
            .create_async()
            .await;

        let t = SlackTransport::new(
            reqwest::Client::new(),
            &SlackConfig {
                webhook_url: format!("{}/hook", server.url()),
            },
        );
        t.deliver(&message(Channel::Slack)).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_transport_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/hook")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let t = SlackTransport::new(
            reqwest::Client::new(),
            &SlackConfig {
                webhook_url: format!("{}/hook", server.url()),
            },
        );
        let err = t.deliver(&message(Channel::Slack)).await.unwrap_err();
        match err {
            WatchpostError::Transport { channel, message } => {
                assert_eq!(channel, "slack");
                assert!(message.contains("500"));
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn email_uses_default_recipients_and_bearer_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/send")
            .match_header("authorization", "Bearer k123")
            .match_body(mockito::Matcher::PartialJson(json!({
                "from": "alerts@example.com",
                "to": ["sec@example.com"],
                "subject": "Alert for a.com"
            })))
            .with_status(202)
            .create_async()
            .await;

        let t = EmailTransport::new(
            reqwest::Client::new(),
            &EmailConfig {
                api_url: format!("{}/send", server.url()),
                from: "alerts@example.com".into(),
                to: vec!["sec@example.com".into()],
                api_key: Some("k123".into()),
            },
        );
        t.deliver(&message(Channel::Email)).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn email_without_recipients_fails_before_sending() {
        let t = EmailTransport::new(
            reqwest::Client::new(),
            &EmailConfig {
                api_url: "http://127.0.0.1:9/send".into(),
                from: "alerts@example.com".into(),
                to: vec![],
                api_key: None,
            },
        );
        let err = t.deliver(&message(Channel::Email)).await.unwrap_err();
        assert!(err.to_string().contains("no recipients"));
    }

    #[tokio::test]
    async fn sms_sends_one_request_per_number() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/sms")
            .with_status(200)
            .expect(2)
            .create_async()
            .await;

        let t = SmsTransport::new(
            reqwest::Client::new(),
            &SmsConfig {
                api_url: format!("{}/sms", server.url()),
                to: vec![],
                api_key: None,
            },
        );
        let mut msg = message(Channel::Sms);
        msg.recipients = vec!["+15550001".into(), "+15550002".into()];
        t.deliver(&msg).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn webhook_sends_envelope_with_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/events")
            .match_header("x-token", "abc")
            .match_body(mockito::Matcher::PartialJson(
                json!({"type": "alert", "channel": "webhook", "body": "score 60"}),
            ))
            .with_status(204)
            .create_async()
            .await;

        let mut headers = std::collections::HashMap::new();
        headers.insert("x-token".to_string(), "abc".to_string());
        let t = WebhookTransport::new(
            reqwest::Client::new(),
            &WebhookConfig {
                url: format!("{}/events", server.url()),
                headers,
            },
        );
        t.deliver(&message(Channel::Webhook)).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn recording_transport_keeps_messages() {
        let t = RecordingTransport::new(Channel::Email);
        t.deliver(&message(Channel::Email)).await.unwrap();
        assert_eq!(t.sent().len(), 1);

        let failing = RecordingTransport::failing(Channel::Email, "down");
        assert!(failing.deliver(&message(Channel::Email)).await.is_err());
        assert!(failing.sent().is_empty());
    }

    #[test]
    fn dry_run_builds_a_transport_per_channel() {
        let cfg = ChannelsConfig {
            dry_run: true,
            ..ChannelsConfig::default()
        };
        let transports = from_config(&cfg).unwrap();
        assert_eq!(transports.len(), Channel::all().len());
    }

    #[test]
    fn only_configured_channels_get_transports() {
        let cfg = ChannelsConfig {
            slack: Some(SlackConfig {
                webhook_url: "http://localhost/hook".into(),
            }),
            ..ChannelsConfig::default()
        };
        let transports = from_config(&cfg).unwrap();
        assert_eq!(transports.len(), 1);
        assert_eq!(transports[0].channel(), Channel::Slack);
    }
}
