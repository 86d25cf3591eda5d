//!
//! Dialgate Invoker - HTTP implementation of the external API boundary
//!
//! Executes `ExternalApiConfig` records against real endpoints: auth
//! injection, request/response mapping, bounded retry, success criteria,
//! and usage-counter upkeep.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod http;

pub use http::HttpInvoker;
