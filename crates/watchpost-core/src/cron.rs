//! Standard 5-field cron expressions (`minute hour day month weekday`).

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

use crate::error::{Result, WatchpostError};

#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let trimmed = expr.trim();
        let fields = trimmed.split_whitespace().count();
        if fields != 5 {
            return Err(WatchpostError::validation(format!(
                "invalid cron expression '{expr}': expected 5 fields, found {fields}"
            )));
        }
        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        let weekday = translate_weekday(parts[4]).map_err(|e| {
            WatchpostError::validation(format!("invalid cron expression '{expr}': {e}"))
        })?;
        // The cron crate expects a leading seconds field.
        let full = format!("0 {} {weekday}", parts[..4].join(" "));
        let schedule = Schedule::from_str(&full).map_err(|e| {
            WatchpostError::validation(format!("invalid cron expression '{expr}': {e}"))
        })?;
        // An expression that can never fire (e.g. Feb 30) is as useless as a typo.
        if schedule.after(&Utc::now()).next().is_none() {
            return Err(WatchpostError::validation(format!(
                "cron expression '{expr}' never fires"
            )));
        }
        Ok(Self {
            expression: trimmed.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&after).take(count).collect()
    }
}

/// Standard cron numbers weekdays 0-6 from Sunday (7 is also Sunday); the
/// cron crate numbers them 1-7 from Sunday. Names pass through unchanged.
fn translate_weekday(field: &str) -> std::result::Result<String, String> {
    let shift = |n: &str| -> std::result::Result<u32, String> {
        let v: u32 = n.parse().map_err(|_| format!("bad weekday '{n}'"))?;
        if v > 7 {
            return Err(format!("weekday {v} out of range 0-7"));
        }
        Ok(v % 7 + 1)
    };
    let is_numeric = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());

    let mut out = Vec::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((r, s)) => (r, Some(s)),
            None => (part, None),
        };
        let suffix = step.map(|s| format!("/{s}")).unwrap_or_default();
        match range.split_once('-') {
            Some((a, b)) if is_numeric(a) && is_numeric(b) => {
                let (a, b) = (shift(a)?, shift(b)?);
                if a <= b {
                    out.push(format!("{a}-{b}{suffix}"));
                } else if step.is_none() {
                    // e.g. 5-7 becomes Fri..Sat plus Sunday
                    out.push(format!("{a}-7"));
                    out.push(if b == 1 { "1".to_string() } else { format!("1-{b}") });
                } else {
                    return Err(format!("unsupported weekday range '{part}'"));
                }
            }
            None if is_numeric(range) => out.push(format!("{}{suffix}", shift(range)?)),
            _ => out.push(part.to_string()),
        }
    }
    Ok(out.join(","))
}
