use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{Result, WatchpostError};

// ---------------------------------------------------------------------------
// RiskLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = WatchpostError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            _ => Err(WatchpostError::validation(format!("unknown risk level '{s}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// ScanResult
// ---------------------------------------------------------------------------

/// Normalized summary every scan provider must produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub security_score: u8,
    pub risk_level: RiskLevel,
    pub total_findings: u32,
    pub critical_findings: u32,
    pub high_findings: u32,
    pub medium_findings: u32,
    pub low_findings: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub target: String,
    pub summary: ScanSummary,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Provider-specific detail; carried through untouched.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl ScanResult {
    /// Reject documents that do not match the normalized shape.
    pub fn validate(&self) -> Result<()> {
        if self.summary.security_score > 100 {
            return Err(WatchpostError::Provider {
                target: self.target.clone(),
                message: format!(
                    "securityScore {} is outside 0..=100",
                    self.summary.security_score
                ),
            });
        }
        if self.completed_at < self.started_at {
            return Err(WatchpostError::Provider {
                target: self.target.clone(),
                message: "completedAt precedes startedAt".into(),
            });
        }
        Ok(())
    }

    /// Flat snake_case view used as template and trigger data.
    pub fn template_data(&self) -> Map<String, Value> {
        let s = &self.summary;
        let mut data = Map::new();
        data.insert("target".into(), Value::from(self.target.clone()));
        data.insert("security_score".into(), Value::from(s.security_score));
        data.insert("risk_level".into(), Value::from(s.risk_level.as_str()));
        data.insert("total_findings".into(), Value::from(s.total_findings));
        data.insert("critical_findings".into(), Value::from(s.critical_findings));
        data.insert("high_findings".into(), Value::from(s.high_findings));
        data.insert("medium_findings".into(), Value::from(s.medium_findings));
        data.insert("low_findings".into(), Value::from(s.low_findings));
        data.insert(
            "completed_at".into(),
            Value::from(self.completed_at.to_rfc3339()),
        );
        data
    }
}

// ---------------------------------------------------------------------------
// ScanOptions
// ---------------------------------------------------------------------------

/// Opaque provider options. The engine only merges and forwards them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanOptions(pub Map<String, Value>);

impl ScanOptions {
    /// Keys in `overrides` replace keys in `self`.
    pub fn merged_with(&self, overrides: &ScanOptions) -> ScanOptions {
        let mut out = self.0.clone();
        for (k, v) in &overrides.0 {
            out.insert(k.clone(), v.clone());
        }
        ScanOptions(out)
    }
}

// ---------------------------------------------------------------------------
// TargetResult
// ---------------------------------------------------------------------------

/// One entry per target in a job run batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetResult {
    pub target: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ScanResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Name of the exclusion list that suppressed this target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded_by: Option<String>,
}

impl TargetResult {
    pub fn succeeded(result: ScanResult) -> Self {
        Self {
            target: result.target.clone(),
            success: true,
            result: Some(result),
            error: None,
            excluded_by: None,
        }
    }

    pub fn failed(target: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            success: false,
            result: None,
            error: Some(error.into()),
            excluded_by: None,
        }
    }

    pub fn excluded(target: impl Into<String>, list: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            success: false,
            result: None,
            error: None,
            excluded_by: Some(list.into()),
        }
    }
}
