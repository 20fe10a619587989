//! Payload envelope carried inside frames
//!
//! Frames carry compact JSON objects. Vitals frames hold one snapshot of
//! heart rate, SpO2 and respiration rate; waveform frames hold a chunk of
//! consecutive samples from one channel.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::binary_protocol::FrameType;
use crate::error::{Result, TransportError};

fn default_signal_quality() -> u8 {
    100
}

/// One vitals snapshot, e.g. `{"hr":72,"spo2":98,"rr":16}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VitalsRecord {
    pub hr: i32,
    pub spo2: i32,
    pub rr: i32,
    #[serde(default = "default_signal_quality")]
    pub signal_quality: u8,
}

impl VitalsRecord {
    pub fn new(hr: i32, spo2: i32, rr: i32) -> Self {
        Self {
            hr,
            spo2,
            rr,
            signal_quality: default_signal_quality(),
        }
    }
}

/// A chunk of waveform samples from a single channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveformRecord {
    pub channel: String,
    pub sample_rate: i32,
    pub start_timestamp_ms: i64,
    pub values: Vec<i32>,
}

/// Decoded frame payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorRecord {
    Vitals(VitalsRecord),
    Waveform(WaveformRecord),
}

impl SensorRecord {
    /// Frame type this record is written as
    pub fn frame_type(&self) -> FrameType {
        match self {
            SensorRecord::Vitals(_) => FrameType::Vitals,
            SensorRecord::Waveform(_) => FrameType::Waveform,
        }
    }

    /// Serialize to the JSON envelope
    pub fn encode(&self) -> Result<Bytes> {
        let encoded = match self {
            SensorRecord::Vitals(vitals) => serde_json::to_vec(vitals)?,
            SensorRecord::Waveform(waveform) => serde_json::to_vec(waveform)?,
        };
        Ok(Bytes::from(encoded))
    }

    /// Parse a frame payload according to its frame type
    pub fn decode(frame_type: FrameType, payload: &[u8]) -> Result<Self> {
        match frame_type {
            FrameType::Vitals => Ok(SensorRecord::Vitals(serde_json::from_slice(payload)?)),
            FrameType::Waveform => Ok(SensorRecord::Waveform(serde_json::from_slice(payload)?)),
            FrameType::Invalid => Err(TransportError::Serialization(
                "invalid frames carry no payload".to_string(),
            )),
        }
    }
}

/// Vital sign parameters carried in a vitals record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VitalParameter {
    #[serde(rename = "HR")]
    HeartRate,
    #[serde(rename = "SPO2")]
    Spo2,
    #[serde(rename = "RR")]
    RespirationRate,
}

impl VitalParameter {
    pub fn as_str(&self) -> &'static str {
        match self {
            VitalParameter::HeartRate => "HR",
            VitalParameter::Spo2 => "SPO2",
            VitalParameter::RespirationRate => "RR",
        }
    }
}

impl std::fmt::Display for VitalParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single vital measurement handed to collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VitalReading {
    pub parameter: VitalParameter,
    pub value: i32,
    pub timestamp_ms: u64,
    pub signal_quality: u8,
}

/// A single waveform sample handed to collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveformSample {
    pub channel: String,
    pub value: i32,
    pub timestamp_ms: i64,
}

impl VitalsRecord {
    /// Split into one reading per parameter, stamped with the frame time
    pub fn readings(&self, timestamp_ms: u64) -> [VitalReading; 3] {
        let reading = |parameter, value| VitalReading {
            parameter,
            value,
            timestamp_ms,
            signal_quality: self.signal_quality,
        };
        [
            reading(VitalParameter::HeartRate, self.hr),
            reading(VitalParameter::Spo2, self.spo2),
            reading(VitalParameter::RespirationRate, self.rr),
        ]
    }
}

impl WaveformRecord {
    /// Expand into samples spaced `1000 / sample_rate` ms apart.
    ///
    /// A non-positive sample rate stamps every sample with the start time.
    pub fn samples(&self) -> Vec<WaveformSample> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let offset = if self.sample_rate > 0 {
                    i as i64 * 1000 / self.sample_rate as i64
                } else {
                    0
                };
                WaveformSample {
                    channel: self.channel.clone(),
                    value: *value,
                    timestamp_ms: self.start_timestamp_ms.saturating_add(offset),
                }
            })
            .collect()
    }
}
