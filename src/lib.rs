// Core modules
pub mod analyzer;
pub mod api;
pub mod audit;
pub mod config;
pub mod fanout;
pub mod indicators;
pub mod lifecycle;
pub mod models;
pub mod notify;
pub mod persistence;
pub mod retry;
pub mod sizing;

// Re-export commonly used types
pub use analyzer::PatternRule;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
