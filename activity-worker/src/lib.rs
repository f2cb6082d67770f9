pub mod batcher;
pub mod config;
pub mod error;
pub mod notifier;
pub mod pipeline;
pub mod poller;
