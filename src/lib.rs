pub mod app;
pub mod callback;
pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod intent;
pub mod pipeline;
pub mod prompting;
pub mod providers;
pub mod retry;
pub mod signing;
pub mod store;
pub mod sweeper;
pub mod types;
