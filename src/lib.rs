pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod locate;
pub mod orchestrator;
pub mod output;
pub mod platform;
pub mod reconcile;
pub mod resolver;
