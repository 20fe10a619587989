//! Vitals Portal - Core Module
//!
//! Canonical wire formats, the error taxonomy, payload envelope, configuration
//! and counters shared by the producer and consumer sides of the transport.

pub mod binary_protocol;
pub mod config;
pub mod error;
pub mod metrics;
pub mod payload;

pub use binary_protocol::*;
pub use config::*;
pub use error::*;
pub use metrics::*;
pub use payload::*;
