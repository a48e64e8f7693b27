pub mod classifier;
pub mod config;
pub mod dataset;
pub mod export;
pub mod features;
pub mod models;
pub mod pipeline;
pub mod popularity;
pub mod similarity;
pub mod standardize;

/// Application name for XDG paths
pub const APP_NAME: &str = "popscale";
