//! Application services: the state machine and its rendering helpers

/// Session-state context resolution
pub mod context;

/// Service definition publishing
pub mod definition_service;

/// The session state machine
pub mod engine;

/// Dynamic-menu pagination
pub mod paginator;

/// Template rendering
pub mod render;

/// Gateway response framing
pub mod response;
