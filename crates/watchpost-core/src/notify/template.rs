//! `{{placeholder}}` templates, parsed once into literal and placeholder
//! segments.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::condition::FieldSource;
use crate::error::{Result, WatchpostError};

use super::Channel;

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").unwrap())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Placeholder(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Unclosed or malformed braces stay literal text.
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut last = 0;
        for caps in placeholder_re().captures_iter(source) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() > last {
                segments.push(Segment::Literal(source[last..whole.start()].to_string()));
            }
            segments.push(Segment::Placeholder(name.as_str().to_string()));
            last = whole.end();
        }
        if last < source.len() {
            segments.push(Segment::Literal(source[last..].to_string()));
        }
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Missing values render as the empty string.
    pub fn render(&self, data: &dyn FieldSource) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    if let Some(v) = data.field(name) {
                        out.push_str(&display_value(&v));
                    }
                }
            }
        }
        out
    }
}

/// Strings unquoted, null as empty, everything else as compact JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Render every string leaf of `value` as a template against `data`.
pub fn render_value(value: &Value, data: &dyn FieldSource) -> Value {
    match value {
        Value::String(s) if s.contains("{{") => Value::String(Template::parse(s).render(data)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, data)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, data)))
                .collect::<Map<String, Value>>(),
        ),
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// TemplateSet
// ---------------------------------------------------------------------------

/// Template source as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct MessageTemplate {
    pub subject: Option<Template>,
    pub body: Template,
}

impl MessageTemplate {
    fn from_source(src: &TemplateSource) -> Self {
        Self {
            subject: src.subject.as_deref().map(Template::parse),
            body: Template::parse(&src.body),
        }
    }
}

/// Templates keyed `${channel}_${type}`.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: HashMap<String, MessageTemplate>,
}

pub fn template_key(channel: Channel, notification_type: &str) -> String {
    format!("{}_{}", channel.as_str(), notification_type)
}

const DEFAULT_TEMPLATES: &[(&str, &str, &str)] = &[
    (
        "scan_complete",
        "Scan complete: {{target}}",
        "Scan for {{target}} completed. Security score: {{security_score}} ({{risk_level}} risk), {{total_findings}} findings.",
    ),
    (
        "scan_failed",
        "Scan failed: {{target}}",
        "Scan for {{target}} failed: {{error}}",
    ),
    (
        "alert",
        "[{{severity}}] Alert for {{target}}",
        "Rule '{{rule_name}}' matched {{target}}. Security score: {{security_score}}, critical findings: {{critical_findings}}.",
    ),
    (
        "critical_finding",
        "Critical findings on {{target}}",
        "{{critical_findings}} critical findings detected on {{target}} (score {{security_score}}).",
    ),
    (
        "incident",
        "Incident opened: {{title}}",
        "Incident {{incident_id}} ({{severity}}) opened for {{target}}.",
    ),
    (
        "test",
        "Watchpost test notification",
        "Test notification from watchpost on {{channel}}.",
    ),
];

impl TemplateSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in templates for every channel. SMS and Slack drop the subject.
    pub fn with_defaults() -> Self {
        let mut set = Self::empty();
        for channel in Channel::all() {
            for (ty, subject, body) in DEFAULT_TEMPLATES {
                let subject = match channel {
                    Channel::Email | Channel::Webhook => Some(subject.to_string()),
                    Channel::Slack | Channel::Sms => None,
                };
                set.insert(
                    *channel,
                    ty,
                    &TemplateSource {
                        subject,
                        body: body.to_string(),
                    },
                );
            }
        }
        set
    }

    pub fn insert(&mut self, channel: Channel, notification_type: &str, src: &TemplateSource) {
        self.templates.insert(
            template_key(channel, notification_type),
            MessageTemplate::from_source(src),
        );
    }

    /// Register overrides keyed `${channel}_${type}`.
    pub fn extend_from(&mut self, overrides: &HashMap<String, TemplateSource>) -> Result<()> {
        for (key, src) in overrides {
            let (channel, ty) = key.split_once('_').ok_or_else(|| {
                WatchpostError::validation(format!(
                    "template key '{key}' must look like <channel>_<type>"
                ))
            })?;
            let channel: Channel = channel.parse()?;
            self.insert(channel, ty, src);
        }
        Ok(())
    }

    pub fn get(&self, channel: Channel, notification_type: &str) -> Result<&MessageTemplate> {
        let key = template_key(channel, notification_type);
        self.templates
            .get(&key)
            .ok_or(WatchpostError::Template(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_score_line() {
        let t = Template::parse("Score for {{target}}: {{security_score}}");
        let data = json!({"target": "example.com", "security_score": 72});
        assert_eq!(t.render(&data), "Score for example.com: 72");
    }

    #[test]
    fn missing_placeholder_renders_empty() {
        let t = Template::parse("[{{missing}}]");
        assert_eq!(t.render(&json!({})), "[]");
    }

    #[test]
    fn parse_splits_literals_and_placeholders() {
        let t = Template::parse("a {{ x }} b{{y.z}}");
        assert_eq!(
            t.segments(),
            &[
                Segment::Literal("a ".into()),
                Segment::Placeholder("x".into()),
                Segment::Literal(" b".into()),
                Segment::Placeholder("y.z".into()),
            ]
        );
    }

    #[test]
    fn unclosed_braces_are_literal() {
        let t = Template::parse("hello {{name");
        assert_eq!(t.placeholders().count(), 0);
        assert_eq!(t.render(&json!({"name": "x"})), "hello {{name");
    }

    #[test]
    fn dotted_placeholders_walk_nested_data() {
        let t = Template::parse("{{scan.summary.riskLevel}}");
        let data = json!({"scan": {"summary": {"riskLevel": "high"}}});
        assert_eq!(t.render(&data), "high");
    }

    #[test]
    fn non_scalar_values_render_as_json() {
        let t = Template::parse("{{ips}} {{flag}} {{nothing}}");
        let data = json!({"ips": ["1.1.1.1"], "flag": true, "nothing": null});
        assert_eq!(t.render(&data), "[\"1.1.1.1\"] true ");
    }

    #[test]
    fn render_value_only_touches_strings() {
        let v = json!({"target": "{{host}}", "depth": 2, "tags": ["{{host}}-x"]});
        let out = render_value(&v, &json!({"host": "a.com"}));
        assert_eq!(out, json!({"target": "a.com", "depth": 2, "tags": ["a.com-x"]}));
    }

    #[test]
    fn defaults_cover_every_channel() {
        let set = TemplateSet::with_defaults();
        for c in Channel::all() {
            assert!(set.get(*c, "alert").is_ok());
            assert!(set.get(*c, "test").is_ok());
        }
        assert!(set.get(Channel::Email, "alert").unwrap().subject.is_some());
        assert!(set.get(Channel::Sms, "alert").unwrap().subject.is_none());
    }

    #[test]
    fn missing_template_is_template_error() {
        let set = TemplateSet::with_defaults();
        let err = set.get(Channel::Slack, "weekly_digest").unwrap_err();
        assert!(matches!(err, WatchpostError::Template(k) if k == "slack_weekly_digest"));
    }

    #[test]
    fn overrides_replace_defaults() {
        let mut set = TemplateSet::with_defaults();
        let mut overrides = HashMap::new();
        overrides.insert(
            "slack_alert".to_string(),
            TemplateSource {
                subject: None,
                body: "ALERT {{target}}".into(),
            },
        );
        set.extend_from(&overrides).unwrap();
        let t = set.get(Channel::Slack, "alert").unwrap();
        assert_eq!(t.body.render(&json!({"target": "a.com"})), "ALERT a.com");
    }

    #[test]
    fn override_with_bad_channel_is_rejected() {
        let mut set = TemplateSet::empty();
        let mut overrides = HashMap::new();
        overrides.insert(
            "pager_alert".to_string(),
            TemplateSource {
                subject: None,
                body: "x".into(),
            },
        );
        assert!(set.extend_from(&overrides).is_err());
    }
}
