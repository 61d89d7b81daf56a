//! Red Pitaya radar streaming driver
//!
//! This crate talks to a Red Pitaya running the radar/IQ streaming firmware
//! and checks the returned sample stream for discontinuities.
//!
//! # Communication
//!
//! Raw binary command words over TCP (default port 1001). A session
//! uploads a reference waveform, triggers continuous streaming and then
//! receives fixed-size bursts of 16-byte IQ records forever.
//!
//! # Usage
//!
//! ```rust,ignore
//! use daq_driver_red_pitaya::{Session, SessionConfig, StopSignal};
//!
//! let mut session = Session::connect(SessionConfig::default()).await?;
//! session.start().await?;
//! session
//!     .run_monitor(StopSignal::never(), |report| {
//!         if report.anomaly {
//!             println!("{}", report.dmax);
//!         }
//!     })
//!     .await?;
//! ```
//!
//! # Mock Mode
//!
//! [`MockRadar`] emulates the firmware side of the protocol, either on an
//! in-memory stream or on a local TCP listener.

pub mod command;
pub mod config;
pub mod continuity;
pub mod error;
pub mod frame;
pub mod mock;
pub mod session;
pub mod stop;
pub mod waveform;

pub use command::{Command, CommandWord, Tag};
pub use config::{AcquisitionConfig, DeviceConfig, MonitorConfig, SessionConfig};
pub use continuity::{BurstReport, ContinuityChecker};
pub use error::{CommandError, Stage, StreamError, StreamResult};
pub use frame::FrameBuffer;
pub use mock::{MockDeviceConfig, MockRadar, MockStats};
pub use session::{MonitorSummary, Session, SessionState, StopReason};
pub use stop::{StopHandle, StopSignal};
pub use waveform::SampleRecord;
