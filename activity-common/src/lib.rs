pub mod classifier;
pub mod dedup;
pub mod event;
pub mod metrics;
pub mod skills;
pub mod state;
pub mod window;
