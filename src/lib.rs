pub mod config;
pub mod engine;
pub mod errors;
pub mod idempotency;
pub mod ledger;
pub mod notifier;
pub mod observability;
pub mod payments;
pub mod poller;
pub mod pricing;
pub mod render_api;
pub mod retry;
pub mod task_registry;
pub mod types;
