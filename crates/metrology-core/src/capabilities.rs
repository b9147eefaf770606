//! Instrument capabilities.
//!
//! Procedures are written against small capability traits rather than
//! concrete instruments, so the same harmonic measurement runs on any
//! analyzer and the same sweep drives any generator:
//!
//! - a signal generator implements `SignalSource` (and so `OutputControl`)
//! - a multimeter or counter implements `Readable`
//! - a power meter implements `PowerSensor`
//! - a spectrum analyzer implements `SpectrumAnalyzer`
//!
//! Each trait is async, `Send + Sync`, and returns `anyhow::Result`.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn level_check<S, M>(source: &S, meter: &M) -> Result<f64>
//! where
//!     S: SignalSource,
//!     M: Readable,
//! {
//!     source.set_output(-10.0, 1e6).await?;
//!     let value = meter.read().await?;
//!     source.silence().await?;
//!     Ok(value)
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Instrument category, used for grouping in listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentCategory {
    /// RF and audio signal generators, function generators
    SignalGenerator,
    /// Digital multimeters
    Multimeter,
    /// RF power meters
    PowerMeter,
    /// Spectrum analyzers
    SpectrumAnalyzer,
    /// Multifunction and RF calibrators
    Calibrator,
    /// Frequency counters
    Counter,
    /// Audio and modulation analyzers
    AudioAnalyzer,
    /// Anything else
    #[default]
    Other,
}

/// Capability a device can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Returns a scalar reading. See [`Readable`]
    Readable,
    /// Can switch its output off. See [`OutputControl`]
    OutputControl,
    /// Programmable level and frequency. See [`SignalSource`]
    SignalSource,
    /// Frequency-compensated RF power. See [`PowerSensor`]
    PowerSensor,
    /// Windowed peak search. See [`SpectrumAnalyzer`]
    SpectrumAnalyzer,
}

impl Capability {
    /// Every capability.
    pub const ALL: [Capability; 5] = [
        Capability::Readable,
        Capability::OutputControl,
        Capability::SignalSource,
        Capability::PowerSensor,
        Capability::SpectrumAnalyzer,
    ];

    /// Trait methods that make up this capability.
    pub fn methods(&self) -> &'static [&'static str] {
        match self {
            Capability::Readable => &["read"],
            Capability::OutputControl => &["silence"],
            Capability::SignalSource => &["set_output"],
            Capability::PowerSensor => &["measure_power", "measure_power_with_correction"],
            Capability::SpectrumAnalyzer => &["set_window", "peak_power", "sweep_time"],
        }
    }

    /// Capability that owns `method`, if any.
    pub fn for_method(method: &str) -> Option<Capability> {
        Self::ALL
            .into_iter()
            .find(|capability| capability.methods().contains(&method))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Readable => "readable",
            Capability::OutputControl => "output_control",
            Capability::SignalSource => "signal_source",
            Capability::PowerSensor => "power_sensor",
            Capability::SpectrumAnalyzer => "spectrum_analyzer",
        };
        f.write_str(name)
    }
}

/// Takes a single scalar reading (DMM voltage, counter frequency, ...).
#[async_trait]
pub trait Readable: Send + Sync {
    /// Trigger or fetch one reading.
    async fn read(&self) -> Result<f64>;
}

/// Can put its output into a safe state.
#[async_trait]
pub trait OutputControl: Send + Sync {
    /// Switch the output off (or to standby).
    async fn silence(&self) -> Result<()>;
}

/// Programmable source of a signal at a given level and frequency.
///
/// The level unit depends on the instrument (dBm for RF generators,
/// volts for calibrators and function generators).
#[async_trait]
pub trait SignalSource: OutputControl {
    /// Program level and frequency and enable the output.
    async fn set_output(&self, level: f64, frequency_hz: f64) -> Result<()>;
}

/// RF power sensor with frequency-dependent calibration.
#[async_trait]
pub trait PowerSensor: Send + Sync {
    /// Measure power (dBm) using the sensor's built-in calibration at `frequency_hz`.
    async fn measure_power(&self, frequency_hz: f64) -> Result<f64>;

    /// Measure power (dBm) with an explicit calibration factor in percent.
    async fn measure_power_with_correction(&self, factor_pct: f64) -> Result<f64>;
}

/// Spectrum analyzer capable of a windowed peak search.
#[async_trait]
pub trait SpectrumAnalyzer: Send + Sync {
    /// Configure span, center frequency, resolution bandwidth (Hz) and reference level (dBm).
    async fn set_window(
        &self,
        span_hz: f64,
        center_hz: f64,
        rbw_hz: f64,
        ref_level_dbm: f64,
    ) -> Result<()>;

    /// Peak level (dBm) in the current window.
    async fn peak_power(&self) -> Result<f64>;

    /// Duration of one sweep in seconds.
    async fn sweep_time(&self) -> Result<f64>;
}
