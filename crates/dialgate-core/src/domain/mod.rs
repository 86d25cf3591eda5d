//! Domain layer: sessions, flow graphs, API configurations, repositories

/// External API configuration records
pub mod api_config;

/// Flow graph definitions
pub mod flow;

/// Repository traits and in-memory test implementations
pub mod repository;

/// Session aggregate
pub mod session;

/// Per-step audit entries
pub mod session_log;
