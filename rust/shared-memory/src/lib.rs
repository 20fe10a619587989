//! Vitals Portal - Shared Memory Module
//!
//! Anonymous shared-memory ring buffer: region allocation, the single
//! producer frame writer and lock-free readers.

#[cfg(target_endian = "big")]
compile_error!("the ring buffer overlay assumes a little-endian target");

pub mod error;
#[cfg(unix)]
pub mod platform;
#[cfg(unix)]
pub mod protocol;
#[cfg(unix)]
pub mod reader;
#[cfg(unix)]
pub mod region;
#[cfg(unix)]
pub mod writer;

pub use error::*;
#[cfg(unix)]
pub use platform::*;
#[cfg(unix)]
pub use protocol::*;
#[cfg(unix)]
pub use reader::*;
#[cfg(unix)]
pub use region::*;
#[cfg(unix)]
pub use writer::*;
