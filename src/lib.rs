//! Vitals Portal
//!
//! Low-latency transport for physiological sensor data between a producer
//! and local consumers. Frames travel through a shared-memory ring buffer;
//! a Unix socket is used once per consumer to hand over the region descriptor.
//!
//! ```no_run
//! use vitals_portal::{SensorDataSource, SensorProducer, SourceEvent, TransportConfig, VitalsRecord};
//!
//! # async fn demo() -> vitals_portal::Result<()> {
//! let config = TransportConfig::default();
//! let mut producer = SensorProducer::start(config.clone()).await?;
//! producer.write_vitals(vitals_portal::wall_clock_millis(), &VitalsRecord::new(72, 98, 16))?;
//!
//! let mut source = SensorDataSource::new(config);
//! let mut events = source.start()?;
//! while let Some(event) = events.recv().await {
//!     if let SourceEvent::Record { record, .. } = event {
//!         println!("{:?}", record);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod producer;
pub mod source;

pub use vitals_portal_core::*;

pub use vitals_portal_shared_memory::{
    map_read_only, monotonic_millis, Frame, FrameWriter, HeartbeatHandle, LivenessState,
    PollSummary, ReaderEvent, ReaderOptions, RingBufferHeader, RingBufferReader, SharedMemoryError,
    SharedRegion, SpinBackoff,
};

pub use vitals_portal_network::{Bootstrap, ControlChannelError, ControlClient, ControlServer, ServerEvent};

pub use producer::{wall_clock_millis, ProducerStats, SensorProducer};
pub use source::{ConnectionState, SensorDataSource, SourceEvent};
