pub mod api;
pub mod auth;
pub mod cluster;
pub mod config;
pub mod controllers;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod models;
pub mod retry;

pub use cluster::{ClusterApi, SharedCluster};
pub use config::Config;
