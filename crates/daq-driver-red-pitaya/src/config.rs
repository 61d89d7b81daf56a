//! Session configuration.
//!
//! Defaults reproduce the reference test setup: a Red Pitaya at
//! `192.168.1.100:1001`, 10 MHz sample rate, a 131072-record waveform and
//! 524288-record (8 MiB) bursts.

use crate::command::MAX_VALUE;
use crate::continuity::DEFAULT_THRESHOLD;
use crate::error::{StreamError, StreamResult};
use crate::waveform::{payload_bytes, RECORD_BYTES};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default streaming port of the radar firmware.
pub const DEFAULT_PORT: u16 = 1001;

pub const DEFAULT_HOST: &str = "192.168.1.100";

pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 10_000_000;

/// Records in the uploaded waveform (a quarter of the burst).
pub const DEFAULT_WAVEFORM_RECORDS: usize = 131_072;

/// Records per receive burst; at least the firmware's largest single burst.
pub const DEFAULT_FRAME_RECORDS: usize = 524_288;

/// Largest accepted burst buffer (1 GiB).
pub const MAX_FRAME_RECORDS: usize = (1 << 30) / RECORD_BYTES;

/// Where the device lives and how long to wait for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Hostname or IP address of the Red Pitaya
    pub host: String,

    /// Streaming port (default: 1001)
    pub port: u16,

    /// Upper bound on the TCP connect attempt
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Talk to the in-process emulator instead of hardware
    pub mock: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(5),
            mock: false,
        }
    }
}

impl DeviceConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// What gets uploaded and how large each burst is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub sample_rate_hz: u32,
    pub waveform_records: usize,
    pub frame_records: usize,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            waveform_records: DEFAULT_WAVEFORM_RECORDS,
            frame_records: DEFAULT_FRAME_RECORDS,
        }
    }
}

impl AcquisitionConfig {
    /// Payload length announced in the configure command.
    pub fn payload_bytes(&self) -> usize {
        payload_bytes(self.waveform_records)
    }
}

/// Monitor loop tuning. Both limits are off by default: the monitor runs forever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Bursts whose `dmax` exceeds this are reported
    pub threshold: u64,

    /// Log running totals every this many bursts (0 disables)
    pub summary_interval: u64,

    /// Stop after this long in the monitor loop
    #[serde(with = "humantime_serde")]
    pub run_for: Option<Duration>,

    /// Stop after this many bursts
    pub max_bursts: Option<u64>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            summary_interval: 64,
            run_for: None,
            max_bursts: None,
        }
    }
}

/// Everything a [`crate::Session`] needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub device: DeviceConfig,
    pub acquisition: AcquisitionConfig,
    pub monitor: MonitorConfig,
}

impl SessionConfig {
    /// Check the values against the protocol's field widths and buffer sizes.
    pub fn validate(&self) -> StreamResult<()> {
        let bail = |msg: String| Err(StreamError::Configuration(msg));

        if self.device.host.is_empty() {
            return bail("'host' field cannot be empty".into());
        }
        if self.device.port == 0 {
            return bail("'port' field cannot be 0".into());
        }

        let acq = &self.acquisition;
        if acq.waveform_records == 0 {
            return bail("'waveform_records' must be at least 1".into());
        }
        if acq.frame_records < 2 {
            return bail("'frame_records' must be at least 2".into());
        }
        if acq.frame_records > MAX_FRAME_RECORDS {
            return bail(format!(
                "'frame_records' ({}) exceeds the {} record limit",
                acq.frame_records, MAX_FRAME_RECORDS
            ));
        }
        if acq.waveform_records > acq.frame_records {
            return bail(format!(
                "'waveform_records' ({}) exceeds 'frame_records' ({})",
                acq.waveform_records, acq.frame_records
            ));
        }
        if acq.sample_rate_hz > MAX_VALUE {
            return bail(format!(
                "'sample_rate_hz' ({}) does not fit in 28 bits",
                acq.sample_rate_hz
            ));
        }
        if acq.payload_bytes() > MAX_VALUE as usize {
            return bail(format!(
                "payload of {} bytes does not fit in 28 bits",
                acq.payload_bytes()
            ));
        }

        Ok(())
    }
}
