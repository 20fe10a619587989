//! Producer facade
//!
//! Owns the shared region, the frame writer, the control server and an idle
//! heartbeat ticker.

use crate::{
    ControlServer, FrameType, FrameWriter, Result, ServerEvent, ServerStats, SharedRegion,
    TransportConfig, TransportError, VitalsRecord, WaveformRecord, WriterStats,
};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use vitals_portal_core::SensorRecord;

/// Milliseconds since the Unix epoch, used as frame event time
pub fn wall_clock_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Producer-side statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProducerStats {
    pub writer: WriterStats,
    pub server: ServerStats,
}

/// Sensor data producer
pub struct SensorProducer {
    writer: FrameWriter,
    server: ControlServer,
    ticker: Option<JoinHandle<()>>,
    heartbeat_paused: Arc<AtomicBool>,
    config: TransportConfig,
}

impl SensorProducer {
    /// Create and initialize the region, then start serving it
    pub async fn start(config: TransportConfig) -> Result<Self> {
        config.validate()?;
        let geometry = config.geometry()?;

        let region = SharedRegion::create(geometry.region_size()).map_err(TransportError::from)?;
        let writer = FrameWriter::initialize(&region, geometry).map_err(TransportError::from)?;
        let descriptor = Arc::new(region.share_descriptor().map_err(TransportError::from)?);

        let server = ControlServer::start(&config.socket_path, descriptor, geometry.region_size() as u64).await?;

        let heartbeat_paused = Arc::new(AtomicBool::new(false));
        let ticker = tokio::spawn(heartbeat_ticker(
            writer.heartbeat_handle(),
            config.heartbeat_interval(),
            Arc::clone(&heartbeat_paused),
        ));

        info!(
            "Sensor producer ready on {:?} ({} x {} byte frames)",
            config.socket_path, geometry.frame_count, geometry.frame_size
        );

        Ok(Self {
            writer,
            server,
            ticker: Some(ticker),
            heartbeat_paused,
            config,
        })
    }

    /// Write a vitals snapshot stamped with `timestamp_ms`
    pub fn write_vitals(&mut self, timestamp_ms: u64, vitals: &VitalsRecord) -> Result<u64> {
        self.writer
            .write_record(timestamp_ms, &SensorRecord::Vitals(vitals.clone()))
    }

    /// Write a waveform chunk stamped with its first sample time
    pub fn write_waveform(&mut self, waveform: &WaveformRecord) -> Result<u64> {
        let timestamp = waveform.start_timestamp_ms.max(0) as u64;
        self.writer
            .write_record(timestamp, &SensorRecord::Waveform(waveform.clone()))
    }

    /// Write a raw frame
    pub fn write_frame(&mut self, frame_type: FrameType, timestamp_ms: u64, payload: &[u8]) -> Result<u64> {
        Ok(self.writer.write_frame(frame_type, timestamp_ms, payload)?)
    }

    /// Stamp liveness immediately
    pub fn heartbeat(&self) {
        self.writer.heartbeat();
    }

    /// Suspend or resume the idle ticker; written frames still stamp liveness
    pub fn set_heartbeat_paused(&self, paused: bool) {
        self.heartbeat_paused.store(paused, Ordering::Relaxed);
        debug!("Idle heartbeat {}", if paused { "paused" } else { "resumed" });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.server.subscribe()
    }

    pub fn socket_path(&self) -> &Path {
        self.server.socket_path()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn stats(&self) -> ProducerStats {
        ProducerStats {
            writer: self.writer.stats(),
            server: self.server.stats(),
        }
    }

    /// Stop the ticker and the control server.
    ///
    /// Mapped consumers keep their view of the region and notice the missing
    /// heartbeat.
    pub fn shutdown(mut self) {
        self.stop_tasks();
        info!("Sensor producer shut down");
    }

    fn stop_tasks(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        self.server.stop();
    }
}

impl Drop for SensorProducer {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}

async fn heartbeat_ticker(
    handle: crate::HeartbeatHandle,
    period: std::time::Duration,
    paused: Arc<AtomicBool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        if !paused.load(Ordering::Relaxed) {
            handle.beat();
        }
    }
}
