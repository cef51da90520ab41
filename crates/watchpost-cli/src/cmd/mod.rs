pub mod config;
pub mod cron;
pub mod notify;
pub mod serve;
