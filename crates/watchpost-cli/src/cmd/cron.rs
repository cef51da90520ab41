use crate::output::{print_json, print_table};
use anyhow::Result;
use chrono::Utc;
use clap::Subcommand;
use watchpost_core::cron::CronSchedule;

#[derive(Subcommand)]
pub enum CronSubcommand {
    /// Show the next fire times of a 5-field cron expression (UTC)
    Next {
        /// Expression, e.g. "0 */6 * * *"
        expression: String,
        /// How many fire times to list
        #[arg(long, short = 'n', default_value = "5")]
        count: usize,
    },
}

pub fn run(subcmd: CronSubcommand, json: bool) -> Result<()> {
    match subcmd {
        CronSubcommand::Next { expression, count } => next(&expression, count, json),
    }
}

fn next(expression: &str, count: usize, json: bool) -> Result<()> {
    let schedule = CronSchedule::parse(expression)?;
    let times = schedule.upcoming(Utc::now(), count);

    if json {
        return print_json(&serde_json::json!({
            "expression": schedule.expression(),
            "next": times,
        }));
    }
    let rows = times
        .iter()
        .enumerate()
        .map(|(i, t)| vec![(i + 1).to_string(), t.format("%Y-%m-%d %H:%M UTC").to_string()])
        .collect();
    print_table(&["#", "FIRES AT"], rows);
    Ok(())
}
