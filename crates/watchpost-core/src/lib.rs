pub mod condition;
pub mod config;
pub mod controls;
pub mod cron;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod io;
pub mod notify;
pub mod provider;
pub mod rules;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod workflow;

pub use engine::Engine;
pub use error::{Result, WatchpostError};
