//! Level/frequency sweeps.
//!
//! A sweep programs a [`SignalSource`] at every point of a [`SweepGrid`],
//! waits for it to settle and optionally takes a reading. The source is
//! always silenced afterwards, whether or not the sweep completed.

use crate::correction::{measure_corrected, CorrectionTable};
use anyhow::{Context, Result};
use figment::{
    providers::{Format, Toml},
    Figment,
};
use metrology_core::{PowerSensor, Readable, SignalSource};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default settle time after programming the source.
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(3);

/// Output levels and frequencies to visit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepGrid {
    powers: Vec<f64>,
    frequencies: Vec<f64>,
}

impl SweepGrid {
    /// Non-finite entries are dropped.
    pub fn new(powers: Vec<f64>, frequencies: Vec<f64>) -> Self {
        let finite = |values: Vec<f64>, axis: &str| -> Vec<f64> {
            let before = values.len();
            let kept: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
            if kept.len() != before {
                tracing::warn!(
                    "Dropped {} non-finite {} from sweep grid",
                    before - kept.len(),
                    axis
                );
            }
            kept
        };
        Self {
            powers: finite(powers, "powers"),
            frequencies: finite(frequencies, "frequencies"),
        }
    }

    /// Parse `powers = [...]` / `frequencies = [...]` TOML.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: SweepGrid = toml::from_str(content).context("Failed to parse sweep grid")?;
        Ok(Self::new(raw.powers, raw.frequencies))
    }

    /// Load a grid file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw: SweepGrid = Figment::new()
            .merge(Toml::file(path))
            .extract()
            .with_context(|| format!("Failed to load sweep grid {}", path.display()))?;
        let grid = Self::new(raw.powers, raw.frequencies);
        tracing::info!(
            "Loaded sweep grid from {}: {} powers x {} frequencies",
            path.display(),
            grid.powers.len(),
            grid.frequencies.len()
        );
        Ok(grid)
    }

    /// Source levels.
    pub fn powers(&self) -> &[f64] {
        &self.powers
    }

    /// Frequencies in Hz.
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    /// Number of grid points.
    pub fn len(&self) -> usize {
        self.powers.len() * self.frequencies.len()
    }

    /// True when either axis is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(level, frequency)` pairs, every frequency for the first power first.
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.powers
            .iter()
            .flat_map(move |&p| self.frequencies.iter().map(move |&f| (p, f)))
    }
}

/// Sweep timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepOptions {
    /// Wait after programming each point, before reading
    pub settle: Duration,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            settle: DEFAULT_SETTLE,
        }
    }
}

/// What to read at each sweep point.
#[derive(Clone, Copy)]
pub enum SweepMeter<'a> {
    /// Only program the source
    None,
    /// Plain reading (DMM, counter)
    Reading(&'a dyn Readable),
    /// Power at the point's frequency
    Power(&'a dyn PowerSensor),
    /// Power with the calibration factor interpolated at the point's frequency
    CorrectedPower(&'a dyn PowerSensor, &'a CorrectionTable),
}

impl SweepMeter<'_> {
    async fn take(&self, frequency_hz: f64) -> Result<Option<f64>> {
        Ok(match self {
            SweepMeter::None => None,
            SweepMeter::Reading(meter) => Some(meter.read().await?),
            SweepMeter::Power(sensor) => Some(sensor.measure_power(frequency_hz).await?),
            SweepMeter::CorrectedPower(sensor, table) => {
                Some(measure_corrected(*sensor, table, frequency_hz).await?)
            }
        })
    }
}

/// One visited grid point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SweepPoint {
    /// Programmed source level
    pub level: f64,
    /// Programmed frequency
    pub frequency_hz: f64,
    /// Meter reading, if a meter was given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reading: Option<f64>,
}

/// Visit every grid point, then silence the source.
///
/// If a step fails the source is still silenced and the step error is
/// returned.
pub async fn run_sweep(
    source: &dyn SignalSource,
    grid: &SweepGrid,
    options: &SweepOptions,
    meter: SweepMeter<'_>,
) -> Result<Vec<SweepPoint>> {
    tracing::info!(points = grid.len(), settle = ?options.settle, "starting sweep");

    let outcome = visit(source, grid, options, meter).await;
    let silenced = source.silence().await;

    match (outcome, silenced) {
        (Ok(points), Ok(())) => {
            tracing::info!(points = points.len(), "sweep complete");
            Ok(points)
        }
        (Ok(_), Err(e)) => Err(e.context("Failed to silence source after sweep")),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(silence_err)) => {
            tracing::warn!("Failed to silence source after aborted sweep: {:#}", silence_err);
            Err(e)
        }
    }
}

async fn visit(
    source: &dyn SignalSource,
    grid: &SweepGrid,
    options: &SweepOptions,
    meter: SweepMeter<'_>,
) -> Result<Vec<SweepPoint>> {
    let mut results = Vec::with_capacity(grid.len());
    for (level, frequency_hz) in grid.points() {
        source
            .set_output(level, frequency_hz)
            .await
            .with_context(|| format!("Failed to set output {} at {} Hz", level, frequency_hz))?;
        tokio::time::sleep(options.settle).await;
        let reading = meter
            .take(frequency_hz)
            .await
            .with_context(|| format!("Failed to read at {} / {} Hz", level, frequency_hz))?;
        tracing::debug!(level, frequency_hz, ?reading, "sweep point");
        results.push(SweepPoint {
            level,
            frequency_hz,
            reading,
        });
    }
    Ok(results)
}
