//! Vitals Portal - Network Module
//!
//! Local control channel: a Unix stream socket over which the producer hands
//! each consumer the ring buffer descriptor and its geometry.

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::{Bootstrap, ControlClient};
pub use error::*;
pub use protocol::{recv_with_descriptor, send_with_descriptor};
pub use server::{ControlServer, ServerEvent};
