//! Signal continuity monitor for the Red Pitaya radar streaming link.
//!
//! The protocol, waveform and monitor live in `daq-driver-red-pitaya`; this
//! crate adds configuration loading, logging setup and the run loop used by
//! the `rp-continuity` binary.

pub mod config;
pub mod logging;
pub mod run;

pub use daq_driver_red_pitaya as driver;
