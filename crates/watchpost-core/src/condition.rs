//! Condition vocabulary shared by automation rules, detection rules,
//! notification rules and workflow `condition` steps.
//!
//! Evaluation never fails and never mutates anything: a missing field, a
//! type mismatch or an unknown operator all evaluate to `false`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{Result, WatchpostError};
use crate::types::ScanResult;

// ---------------------------------------------------------------------------
// Operator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    Equals,
    GreaterThan,
    LessThan,
    Contains,
    In,
    /// Preserved verbatim so a stored rule round-trips unchanged.
    Unknown(String),
}

impl Operator {
    pub fn as_str(&self) -> &str {
        match self {
            Operator::Equals => "equals",
            Operator::GreaterThan => "greater_than",
            Operator::LessThan => "less_than",
            Operator::Contains => "contains",
            Operator::In => "in",
            Operator::Unknown(s) => s,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Operator::Unknown(_))
    }
}

impl From<String> for Operator {
    fn from(s: String) -> Self {
        match s.as_str() {
            "equals" => Operator::Equals,
            "greater_than" => Operator::GreaterThan,
            "less_than" => Operator::LessThan,
            "contains" => Operator::Contains,
            "in" => Operator::In,
            _ => Operator::Unknown(s),
        }
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.as_str().to_string()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ScanField: closed schema for scan result lookups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanField {
    Target,
    SecurityScore,
    RiskLevel,
    TotalFindings,
    CriticalFindings,
    HighFindings,
    MediumFindings,
    LowFindings,
}

impl ScanField {
    /// Accepts the camelCase wire paths and their snake_case spellings.
    pub fn parse(path: &str) -> Option<ScanField> {
        let field = match path {
            "target" => ScanField::Target,
            "summary.securityScore" | "summary.security_score" => ScanField::SecurityScore,
            "summary.riskLevel" | "summary.risk_level" => ScanField::RiskLevel,
            "summary.totalFindings" | "summary.total_findings" => ScanField::TotalFindings,
            "summary.criticalFindings" | "summary.critical_findings" => {
                ScanField::CriticalFindings
            }
            "summary.highFindings" | "summary.high_findings" => ScanField::HighFindings,
            "summary.mediumFindings" | "summary.medium_findings" => ScanField::MediumFindings,
            "summary.lowFindings" | "summary.low_findings" => ScanField::LowFindings,
            _ => return None,
        };
        Some(field)
    }

    /// Flat key carrying this field in scan trigger payloads.
    pub fn data_key(self) -> &'static str {
        match self {
            ScanField::Target => "target",
            ScanField::SecurityScore => "security_score",
            ScanField::RiskLevel => "risk_level",
            ScanField::TotalFindings => "total_findings",
            ScanField::CriticalFindings => "critical_findings",
            ScanField::HighFindings => "high_findings",
            ScanField::MediumFindings => "medium_findings",
            ScanField::LowFindings => "low_findings",
        }
    }

    fn from_data_key(key: &str) -> Option<ScanField> {
        ScanField::parse(key).or_else(|| ScanField::parse(&format!("summary.{key}")))
    }

    pub fn read(self, result: &ScanResult) -> Value {
        let s = &result.summary;
        match self {
            ScanField::Target => Value::from(result.target.clone()),
            ScanField::SecurityScore => Value::from(s.security_score),
            ScanField::RiskLevel => Value::from(s.risk_level.as_str()),
            ScanField::TotalFindings => Value::from(s.total_findings),
            ScanField::CriticalFindings => Value::from(s.critical_findings),
            ScanField::HighFindings => Value::from(s.high_findings),
            ScanField::MediumFindings => Value::from(s.medium_findings),
            ScanField::LowFindings => Value::from(s.low_findings),
        }
    }
}

// ---------------------------------------------------------------------------
// FieldSource
// ---------------------------------------------------------------------------

/// Anything a condition can be evaluated against.
pub trait FieldSource {
    fn field(&self, path: &str) -> Option<Value>;
}

impl FieldSource for ScanResult {
    fn field(&self, path: &str) -> Option<Value> {
        ScanField::parse(path).map(|f| f.read(self))
    }
}

/// Keys scan trigger payloads carry besides the summary fields.
const SCAN_PAYLOAD_KEYS: &[&str] = &["job_id", "job_name", "completed_at", "error"];

/// Scan field paths fall back to their flat payload key, so a condition
/// written for scan results also matches scan trigger data.
impl FieldSource for Value {
    fn field(&self, path: &str) -> Option<Value> {
        lookup_path(self, path)
            .or_else(|| ScanField::parse(path).and_then(|f| self.get(f.data_key())))
            .cloned()
    }
}

impl FieldSource for Map<String, Value> {
    fn field(&self, path: &str) -> Option<Value> {
        let (head, rest) = match path.split_once('.') {
            Some((h, r)) => (h, Some(r)),
            None => (path, None),
        };
        let found = self.get(head).and_then(|first| match rest {
            Some(rest) => lookup_path(first, rest).cloned(),
            None => Some(first.clone()),
        });
        found.or_else(|| {
            ScanField::parse(path).and_then(|f| self.get(f.data_key()).cloned())
        })
    }
}

/// Walk a dotted path through objects; numeric segments index arrays.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    let mut cur = root;
    for seg in path.split('.') {
        cur = match cur {
            Value::Object(map) => map.get(seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub threshold: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, threshold: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            threshold: threshold.into(),
        }
    }

    /// Validation for conditions evaluated against scan results: the field
    /// must belong to the closed schema and the operator must be known.
    pub fn validate_for_scan(&self) -> Result<()> {
        if ScanField::parse(&self.field).is_none() {
            return Err(WatchpostError::validation(format!(
                "unknown scan result field '{}'",
                self.field
            )));
        }
        self.validate_operator()
    }

    /// Validation for conditions on scan trigger payloads: a scan field in
    /// either spelling, its flat payload key, or a job key.
    pub fn validate_for_scan_payload(&self) -> Result<()> {
        let known = ScanField::from_data_key(&self.field).is_some()
            || SCAN_PAYLOAD_KEYS.contains(&self.field.as_str());
        if !known {
            return Err(WatchpostError::validation(format!(
                "unknown scan trigger field '{}'",
                self.field
            )));
        }
        self.validate_operator()
    }

    pub fn validate_operator(&self) -> Result<()> {
        if !self.operator.is_known() {
            return Err(WatchpostError::validation(format!(
                "unknown operator '{}'",
                self.operator
            )));
        }
        if self.field.trim().is_empty() {
            return Err(WatchpostError::validation("condition field is empty"));
        }
        Ok(())
    }

    pub fn evaluate(&self, source: &dyn FieldSource) -> bool {
        if let Operator::Unknown(op) = &self.operator {
            tracing::warn!(operator = %op, field = %self.field, "unknown condition operator");
            return false;
        }
        let Some(value) = source.field(&self.field) else {
            return false;
        };
        compare(&self.operator, &value, &self.threshold)
    }
}

/// All conditions must hold; an empty list holds trivially.
pub fn all_match(conditions: &[Condition], source: &dyn FieldSource) -> bool {
    conditions.iter().all(|c| c.evaluate(source))
}

fn compare(op: &Operator, value: &Value, threshold: &Value) -> bool {
    match op {
        Operator::Equals => values_equal(value, threshold),
        Operator::GreaterThan => match (as_number(value), as_number(threshold)) {
            (Some(v), Some(t)) => v > t,
            _ => false,
        },
        Operator::LessThan => match (as_number(value), as_number(threshold)) {
            (Some(v), Some(t)) => v < t,
            _ => false,
        },
        Operator::Contains => match value {
            Value::String(s) => threshold_text(threshold).is_some_and(|t| s.contains(&t)),
            Value::Array(items) => items.iter().any(|i| values_equal(i, threshold)),
            _ => false,
        },
        Operator::In => match threshold {
            Value::Array(items) => items.iter().any(|i| values_equal(value, i)),
            Value::String(s) => threshold_text(value).is_some_and(|v| s.contains(&v)),
            _ => false,
        },
        Operator::Unknown(_) => false,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => as_number(a) == as_number(b),
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            threshold_text(a) == threshold_text(b)
        }
        _ => a == b,
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn threshold_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
