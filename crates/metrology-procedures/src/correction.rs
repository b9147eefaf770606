//! Power sensor calibration factor tables.
//!
//! A sensor's calibration report lists a calibration factor (percent) at a
//! set of frequencies. Between listed frequencies the factor is linearly
//! interpolated; outside the listed range there is no calibration and the
//! lookup fails.
//!
//! ```toml
//! sensor = "HP 8482A SN 12345"
//!
//! [[points]]
//! frequency_mhz = 0.1
//! factor = 97.9
//!
//! [[points]]
//! frequency_mhz = 50
//! factor = 100.0
//! ```

use anyhow::{Context, Result};
use figment::{
    providers::{Format, Toml},
    Figment,
};
use metrology_core::{InstrumentError, PowerSensor};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One calibration point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CorrectionPoint {
    /// Frequency in Hz
    pub frequency_hz: f64,
    /// Calibration factor in percent
    pub factor_pct: f64,
}

/// Frequency-sorted calibration factors for one sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrectionTable {
    sensor: Option<String>,
    points: Vec<CorrectionPoint>,
}

#[derive(Debug, Deserialize)]
struct TableFile {
    sensor: Option<String>,
    points: Vec<PointEntry>,
}

#[derive(Debug, Deserialize)]
struct PointEntry {
    frequency_mhz: Option<f64>,
    frequency_hz: Option<f64>,
    factor: f64,
}

impl PointEntry {
    fn into_point(self, index: usize) -> Result<CorrectionPoint, InstrumentError> {
        let frequency_hz = match (self.frequency_hz, self.frequency_mhz) {
            (Some(hz), None) => hz,
            (None, Some(mhz)) => mhz * 1e6,
            _ => {
                return Err(InstrumentError::Configuration(format!(
                    "correction point {} needs exactly one of frequency_hz or frequency_mhz",
                    index + 1
                )))
            }
        };
        Ok(CorrectionPoint {
            frequency_hz,
            factor_pct: self.factor,
        })
    }
}

impl CorrectionTable {
    /// Build a table from `(frequency_hz, factor_pct)` pairs in any order.
    ///
    /// Needs at least two points; duplicate frequencies and non-finite
    /// values are rejected.
    pub fn new(points: impl IntoIterator<Item = (f64, f64)>) -> Result<Self, InstrumentError> {
        let points = points
            .into_iter()
            .map(|(frequency_hz, factor_pct)| CorrectionPoint {
                frequency_hz,
                factor_pct,
            })
            .collect();
        Self::from_points(None, points)
    }

    fn from_points(
        sensor: Option<String>,
        mut points: Vec<CorrectionPoint>,
    ) -> Result<Self, InstrumentError> {
        if let Some(bad) = points
            .iter()
            .find(|p| !p.frequency_hz.is_finite() || !p.factor_pct.is_finite())
        {
            return Err(InstrumentError::Configuration(format!(
                "non-finite correction point ({}, {})",
                bad.frequency_hz, bad.factor_pct
            )));
        }
        if points.len() < 2 {
            return Err(InstrumentError::Configuration(format!(
                "a correction table needs at least two points, got {}",
                points.len()
            )));
        }

        points.sort_by(|a, b| a.frequency_hz.total_cmp(&b.frequency_hz));
        if let Some(pair) = points
            .windows(2)
            .find(|pair| pair[0].frequency_hz == pair[1].frequency_hz)
        {
            return Err(InstrumentError::Configuration(format!(
                "duplicate correction frequency {} Hz",
                pair[0].frequency_hz
            )));
        }

        Ok(Self { sensor, points })
    }

    /// Parse a table from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TableFile = toml::from_str(content).context("Failed to parse correction table")?;
        Ok(Self::from_file(file)?)
    }

    /// Load a table from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let file: TableFile = Figment::new()
            .merge(Toml::file(path))
            .extract()
            .with_context(|| format!("Failed to load correction table {}", path.display()))?;
        let table = Self::from_file(file)
            .with_context(|| format!("Invalid correction table {}", path.display()))?;
        tracing::info!(
            "Loaded {} correction points from {} ({:.0} Hz to {:.0} Hz)",
            table.points.len(),
            path.display(),
            table.min_frequency(),
            table.max_frequency()
        );
        Ok(table)
    }

    fn from_file(file: TableFile) -> Result<Self, InstrumentError> {
        let points = file
            .points
            .into_iter()
            .enumerate()
            .map(|(i, entry)| entry.into_point(i))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_points(file.sensor, points)
    }

    /// Sensor description, if the table names one.
    pub fn sensor(&self) -> Option<&str> {
        self.sensor.as_deref()
    }

    /// Points in ascending frequency order.
    pub fn points(&self) -> &[CorrectionPoint] {
        &self.points
    }

    /// Lowest calibrated frequency.
    pub fn min_frequency(&self) -> f64 {
        self.points[0].frequency_hz
    }

    /// Highest calibrated frequency.
    pub fn max_frequency(&self) -> f64 {
        self.points[self.points.len() - 1].frequency_hz
    }

    /// Calibration factor (percent) at `frequency_hz`.
    pub fn factor_at(&self, frequency_hz: f64) -> Result<f64, InstrumentError> {
        let (min, max) = (self.min_frequency(), self.max_frequency());
        if !(min..=max).contains(&frequency_hz) {
            return Err(InstrumentError::OutOfRange {
                value: frequency_hz,
                min,
                max,
            });
        }

        // First point at or above the frequency; never 0 unless it is the minimum.
        let upper = self
            .points
            .partition_point(|p| p.frequency_hz < frequency_hz);
        let hi = self.points[upper];
        if hi.frequency_hz == frequency_hz {
            return Ok(hi.factor_pct);
        }
        let lo = self.points[upper - 1];

        let t = (frequency_hz - lo.frequency_hz) / (hi.frequency_hz - lo.frequency_hz);
        Ok(lo.factor_pct + t * (hi.factor_pct - lo.factor_pct))
    }
}

/// Measure power at `frequency_hz` using the table's calibration factor.
pub async fn measure_corrected(
    sensor: &dyn PowerSensor,
    table: &CorrectionTable,
    frequency_hz: f64,
) -> Result<f64> {
    let factor = table.factor_at(frequency_hz)?;
    tracing::debug!(frequency_hz, factor, "applying calibration factor");
    sensor.measure_power_with_correction(factor).await
}
