use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::condition::all_match;
use crate::error::{Result, WatchpostError};
use crate::events::{EngineEvent, EventBus};
use crate::history::HistoryStore;
use crate::store::ConfigStore;

use super::template::TemplateSet;
use super::transport::{RenderedMessage, Transport};
use super::{Channel, Notification, NotificationStatus, SendOptions};

/// Counts over the notification history.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStats {
    pub total: usize,
    pub by_channel: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
}

/// What one satisfied notification rule produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerDispatch {
    pub rule_id: String,
    pub rule_name: String,
    pub notifications: Vec<Notification>,
    pub errors: Vec<String>,
}

pub struct NotificationDispatcher {
    templates: TemplateSet,
    transports: HashMap<Channel, Arc<dyn Transport>>,
    store: Arc<dyn ConfigStore>,
    history: Arc<dyn HistoryStore>,
    events: EventBus,
}

impl NotificationDispatcher {
    pub fn new(
        templates: TemplateSet,
        transports: Vec<Arc<dyn Transport>>,
        store: Arc<dyn ConfigStore>,
        history: Arc<dyn HistoryStore>,
        events: EventBus,
    ) -> Self {
        let transports = transports.into_iter().map(|t| (t.channel(), t)).collect();
        Self {
            templates,
            transports,
            store,
            history,
            events,
        }
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    pub fn render(
        &self,
        notification_type: &str,
        channel: Channel,
        data: &Value,
        options: &SendOptions,
    ) -> Result<RenderedMessage> {
        render_with(&self.templates, notification_type, channel, data, options)
    }

    /// Render and deliver one message. Every attempt lands in history.
    ///
    /// A missing template is an error for the caller; a transport failure is
    /// not: it comes back as a `Failed` notification.
    pub async fn send(
        &self,
        notification_type: &str,
        channel: Channel,
        data: &Value,
        options: &SendOptions,
    ) -> Result<Notification> {
        let created_at = Utc::now();
        let mut notification = Notification {
            id: Uuid::new_v4().to_string(),
            notification_type: notification_type.to_string(),
            channel,
            payload: json!({ "data": data }),
            status: NotificationStatus::Pending,
            error: None,
            created_at,
            sent_at: None,
            failed_at: None,
        };

        let message = match self.render(notification_type, channel, data, options) {
            Ok(m) => m,
            Err(e) => {
                warn!(channel = %channel, notification_type, error = %e, "notification not rendered");
                self.fail(&mut notification, &e);
                self.record(&notification);
                return Err(e);
            }
        };
        notification.payload = json!({
            "subject": message.subject,
            "body": message.body,
            "recipients": message.recipients,
            "data": data,
        });

        let outcome = match self.transports.get(&channel) {
            Some(transport) => transport.deliver(&message).await,
            None => Err(WatchpostError::Transport {
                channel: channel.as_str().to_string(),
                message: "channel not configured".into(),
            }),
        };
        match outcome {
            Ok(()) => {
                notification.status = NotificationStatus::Sent;
                notification.sent_at = Some(Utc::now());
                debug!(channel = %channel, notification_type, id = %notification.id, "notification sent");
            }
            Err(e) => {
                warn!(channel = %channel, notification_type, error = %e, "notification delivery failed");
                self.fail(&mut notification, &e);
            }
        }
        self.record(&notification);
        Ok(notification)
    }

    /// `send` on every channel; failures stay per channel.
    pub async fn send_all(
        &self,
        notification_type: &str,
        channels: &[Channel],
        data: &Value,
        options: &SendOptions,
    ) -> Vec<Result<Notification>> {
        let mut out = Vec::with_capacity(channels.len());
        for channel in channels {
            out.push(self.send(notification_type, *channel, data, options).await);
        }
        out
    }

    /// Run every enabled notification rule registered for `trigger` whose
    /// conditions hold on `data`. Each satisfied rule sends once per channel
    /// and its trigger count goes up by one.
    pub async fn process_trigger(&self, trigger: &str, data: &Value) -> Result<Vec<TriggerDispatch>> {
        let rules = self.store.list_notification_rules()?;
        let mut dispatched = Vec::new();
        for rule in rules
            .iter()
            .filter(|r| r.enabled && r.trigger == trigger)
        {
            if !all_match(&rule.conditions, data) {
                continue;
            }
            if let Err(e) = self.store.record_notification_trigger(&rule.id) {
                warn!(rule_id = %rule.id, error = %e, "could not bump notification rule counter");
            }
            let options = SendOptions::to(rule.recipients.clone());
            let mut dispatch = TriggerDispatch {
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                notifications: Vec::new(),
                errors: Vec::new(),
            };
            for result in self
                .send_all(rule.template_type(), &rule.channels, data, &options)
                .await
            {
                match result {
                    Ok(n) => dispatch.notifications.push(n),
                    Err(e) => dispatch.errors.push(e.to_string()),
                }
            }
            dispatched.push(dispatch);
        }
        if !dispatched.is_empty() {
            info!(trigger, rules = dispatched.len(), "notification trigger processed");
        }
        Ok(dispatched)
    }

    /// Send the built-in `test` template on `channel`.
    pub async fn test_channel(&self, channel: Channel, options: &SendOptions) -> Result<Notification> {
        let data = json!({
            "channel": channel.as_str(),
            "sent_at": Utc::now().to_rfc3339(),
        });
        self.send("test", channel, &data, options).await
    }

    pub fn history(&self, limit: usize) -> Result<Vec<Notification>> {
        self.history.notifications(limit)
    }

    pub fn stats(&self) -> Result<NotificationStats> {
        let all = self.history.notifications(usize::MAX)?;
        let mut stats = NotificationStats {
            total: all.len(),
            ..NotificationStats::default()
        };
        for n in &all {
            *stats
                .by_channel
                .entry(n.channel.as_str().to_string())
                .or_default() += 1;
            *stats.by_type.entry(n.notification_type.clone()).or_default() += 1;
            *stats
                .by_status
                .entry(n.status.as_str().to_string())
                .or_default() += 1;
        }
        Ok(stats)
    }

    fn fail(&self, notification: &mut Notification, error: &WatchpostError) {
        notification.status = NotificationStatus::Failed;
        notification.error = Some(error.to_string());
        notification.failed_at = Some(Utc::now());
    }

    fn record(&self, notification: &Notification) {
        if let Err(e) = self.history.append_notification(notification) {
            warn!(id = %notification.id, error = %e, "failed to record notification");
        }
        self.events.publish(EngineEvent::NotificationRecorded {
            notification_id: notification.id.clone(),
            channel: notification.channel,
            notification_type: notification.notification_type.clone(),
            status: notification.status,
        });
    }
}

/// Render `${channel}_${type}` from `templates` without a dispatcher.
pub fn render_with(
    templates: &TemplateSet,
    notification_type: &str,
    channel: Channel,
    data: &Value,
    options: &SendOptions,
) -> Result<RenderedMessage> {
    let template = templates.get(channel, notification_type)?;
    Ok(RenderedMessage {
        channel,
        notification_type: notification_type.to_string(),
        subject: template.subject.as_ref().map(|t| t.render(data)),
        body: template.body.render(data),
        recipients: options.recipients.clone(),
        data: data.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, Operator};
    use crate::history::MemoryHistory;
    use crate::notify::transport::RecordingTransport;
    use crate::notify::NotificationRule;
    use crate::store::MemoryConfigStore;

    struct Fixture {
        dispatcher: NotificationDispatcher,
        store: Arc<MemoryConfigStore>,
        email: Arc<RecordingTransport>,
        slack: Arc<RecordingTransport>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryConfigStore::new());
        let email = Arc::new(RecordingTransport::new(Channel::Email));
        let slack = Arc::new(RecordingTransport::new(Channel::Slack));
        let sms = Arc::new(RecordingTransport::failing(Channel::Sms, "gateway down"));
        let dispatcher = NotificationDispatcher::new(
            TemplateSet::with_defaults(),
            vec![
                email.clone() as Arc<dyn Transport>,
                slack.clone() as Arc<dyn Transport>,
                sms as Arc<dyn Transport>,
            ],
            store.clone(),
            Arc::new(MemoryHistory::default()),
            EventBus::default(),
        );
        Fixture {
            dispatcher,
            store,
            email,
            slack,
        }
    }

    fn scan_data(score: u8, critical: u32) -> Value {
        json!({
            "target": "a.com",
            "security_score": score,
            "risk_level": "medium",
            "total_findings": 4,
            "critical_findings": critical,
        })
    }

    #[tokio::test]
    async fn send_renders_and_delivers() {
        let f = fixture();
        let n = f
            .dispatcher
            .send("scan_complete", Channel::Email, &scan_data(72, 0), &SendOptions::default())
            .await
            .unwrap();
        assert_eq!(n.status, NotificationStatus::Sent);
        assert!(n.sent_at.is_some());
        let sent = f.email.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject.as_deref(), Some("Scan complete: a.com"));
        assert!(sent[0].body.contains("Security score: 72"));
    }

    #[tokio::test]
    async fn missing_template_fails_only_that_send() {
        let f = fixture();
        let err = f
            .dispatcher
            .send("weekly_digest", Channel::Email, &json!({}), &SendOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WatchpostError::Template(_)));

        let ok = f
            .dispatcher
            .send("alert", Channel::Email, &json!({}), &SendOptions::default())
            .await
            .unwrap();
        assert_eq!(ok.status, NotificationStatus::Sent);

        let history = f.dispatcher.history(10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].status, NotificationStatus::Failed);
    }

    #[tokio::test]
    async fn transport_failure_is_recorded_not_raised() {
        let f = fixture();
        let n = f
            .dispatcher
            .send("alert", Channel::Sms, &json!({}), &SendOptions::default())
            .await
            .unwrap();
        assert_eq!(n.status, NotificationStatus::Failed);
        assert!(n.error.unwrap().contains("gateway down"));
        assert!(n.failed_at.is_some());
    }

    #[tokio::test]
    async fn unconfigured_channel_is_recorded_as_failed() {
        let f = fixture();
        let n = f
            .dispatcher
            .send("alert", Channel::Webhook, &json!({}), &SendOptions::default())
            .await
            .unwrap();
        assert_eq!(n.status, NotificationStatus::Failed);
        assert!(n.error.unwrap().contains("not configured"));
    }

    #[tokio::test]
    async fn process_trigger_sends_once_per_channel_and_counts_once() {
        let f = fixture();
        let rule = f
            .store
            .put_notification_rule(NotificationRule {
                id: String::new(),
                name: "critical".into(),
                trigger: "scan_completed".into(),
                conditions: vec![Condition::new(
                    "critical_findings",
                    Operator::GreaterThan,
                    0,
                )],
                channels: vec![Channel::Email, Channel::Slack],
                notification_type: Some("critical_finding".into()),
                recipients: vec!["sec@example.com".into()],
                enabled: true,
                triggered_count: 0,
            })
            .unwrap();

        let dispatched = f
            .dispatcher
            .process_trigger("scan_completed", &scan_data(40, 2))
            .await
            .unwrap();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].notifications.len(), 2);
        assert_eq!(f.email.sent().len(), 1);
        assert_eq!(f.email.sent()[0].recipients, vec!["sec@example.com"]);
        assert_eq!(f.slack.sent().len(), 1);

        let stored = f.store.list_notification_rules().unwrap();
        assert_eq!(stored[0].id, rule.id);
        assert_eq!(stored[0].triggered_count, 1);
    }

    #[tokio::test]
    async fn process_trigger_skips_unsatisfied_disabled_and_other_triggers() {
        let f = fixture();
        let base = NotificationRule {
            id: String::new(),
            name: "r".into(),
            trigger: "scan_completed".into(),
            conditions: vec![Condition::new("critical_findings", Operator::GreaterThan, 0)],
            channels: vec![Channel::Email],
            notification_type: None,
            recipients: vec![],
            enabled: true,
            triggered_count: 0,
        };
        f.store.put_notification_rule(base.clone()).unwrap();
        f.store
            .put_notification_rule(NotificationRule {
                enabled: false,
                conditions: vec![],
                ..base.clone()
            })
            .unwrap();
        f.store
            .put_notification_rule(NotificationRule {
                trigger: "workflow_failed".into(),
                conditions: vec![],
                ..base
            })
            .unwrap();

        let dispatched = f
            .dispatcher
            .process_trigger("scan_completed", &scan_data(90, 0))
            .await
            .unwrap();
        assert!(dispatched.is_empty());
        assert!(f.email.sent().is_empty());
    }

    #[tokio::test]
    async fn stats_group_by_channel_type_and_status() {
        let f = fixture();
        let opts = SendOptions::default();
        f.dispatcher.send("alert", Channel::Email, &json!({}), &opts).await.unwrap();
        f.dispatcher.send("alert", Channel::Sms, &json!({}), &opts).await.unwrap();
        f.dispatcher.test_channel(Channel::Slack, &opts).await.unwrap();

        let stats = f.dispatcher.stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_type["alert"], 2);
        assert_eq!(stats.by_type["test"], 1);
        assert_eq!(stats.by_status["sent"], 2);
        assert_eq!(stats.by_status["failed"], 1);
        assert_eq!(stats.by_channel["sms"], 1);
    }

    #[tokio::test]
    async fn test_channel_mentions_channel() {
        let f = fixture();
        f.dispatcher
            .test_channel(Channel::Slack, &SendOptions::default())
            .await
            .unwrap();
        assert!(f.slack.sent()[0].body.contains("slack"));
    }
}
