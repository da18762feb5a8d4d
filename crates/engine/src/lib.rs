pub mod alert;
pub mod api;
pub mod config;
pub mod datasource;
pub mod engine;
pub mod metrics;
pub mod notifier;
pub mod result_handler;
pub mod rule_reader;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod ticker;
