use crate::output::print_json;
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::Subcommand;
use serde_json::{json, Value};
use std::path::Path;
use watchpost_core::config::Config;
use watchpost_core::notify::dispatcher::render_with;
use watchpost_core::notify::transport::{self, RenderedMessage};
use watchpost_core::notify::{Channel, SendOptions};

#[derive(Subcommand)]
pub enum NotifySubcommand {
    /// Render a template offline with the given data
    Render {
        /// email, slack, webhook or sms
        channel: Channel,
        /// Notification type, e.g. scan_complete or alert
        notification_type: String,
        /// Template data as a JSON object
        #[arg(long, default_value = "{}")]
        data: String,
        /// Recipient to address (repeatable)
        #[arg(long = "to")]
        recipients: Vec<String>,
    },

    /// Deliver the built-in test message through a configured channel
    Test {
        channel: Channel,
        /// Recipient to address (repeatable)
        #[arg(long = "to")]
        recipients: Vec<String>,
    },
}

pub fn run(path: &Path, subcmd: NotifySubcommand, json: bool) -> Result<()> {
    let config = Config::load_or_default(path).context("failed to load config")?;
    match subcmd {
        NotifySubcommand::Render {
            channel,
            notification_type,
            data,
            recipients,
        } => render(&config, channel, &notification_type, &data, recipients, json),
        NotifySubcommand::Test {
            channel,
            recipients,
        } => test(&config, channel, recipients, json),
    }
}

fn render(
    config: &Config,
    channel: Channel,
    notification_type: &str,
    data: &str,
    recipients: Vec<String>,
    json: bool,
) -> Result<()> {
    let data: Value = serde_json::from_str(data).context("--data is not valid JSON")?;
    if !data.is_object() {
        anyhow::bail!("--data must be a JSON object");
    }
    let templates = config.template_set()?;
    let message = render_with(
        &templates,
        notification_type,
        channel,
        &data,
        &SendOptions::to(recipients),
    )?;
    print_message(&message, json)
}

fn test(config: &Config, channel: Channel, recipients: Vec<String>, json: bool) -> Result<()> {
    let templates = config.template_set()?;
    let data = json!({ "channel": channel.as_str(), "sent_at": Utc::now().to_rfc3339() });
    let message = render_with(&templates, "test", channel, &data, &SendOptions::to(recipients))?;

    let transports = transport::from_config(&config.channels)?;
    let transport = transports
        .into_iter()
        .find(|t| t.channel() == channel)
        .ok_or_else(|| anyhow!("channel '{channel}' is not configured"))?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(transport.deliver(&message))?;

    if json {
        print_json(&json!({ "channel": channel, "status": "sent" }))
    } else {
        println!("Test notification sent on {channel}.");
        Ok(())
    }
}

fn print_message(message: &RenderedMessage, json: bool) -> Result<()> {
    if json {
        return print_json(message);
    }
    if let Some(subject) = &message.subject {
        println!("Subject: {subject}");
    }
    if !message.recipients.is_empty() {
        println!("To: {}", message.recipients.join(", "));
    }
    if message.subject.is_some() || !message.recipients.is_empty() {
        println!();
    }
    println!("{}", message.body);
    Ok(())
}
