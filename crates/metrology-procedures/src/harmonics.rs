//! Harmonic distortion measured with a spectrum analyzer.
//!
//! The carrier is measured in a narrow window around the fundamental, then
//! each harmonic `2f, 3f, ...` in a window sized for the fundamental. The
//! result is the worst harmonic relative to the carrier, in dBc.

use anyhow::{bail, Context, Result};
use metrology_core::SpectrumAnalyzer;
use serde::Serialize;
use std::time::Duration;

/// Carrier window span.
pub const CARRIER_SPAN_HZ: f64 = 10e3;
/// Carrier window resolution bandwidth.
pub const CARRIER_RBW_HZ: f64 = 100.0;
/// Added to the sweep time before reading the peak.
pub const SWEEP_MARGIN: Duration = Duration::from_millis(500);
/// Most harmonics one measurement takes.
pub const MAX_HARMONICS: u32 = 50;
/// Reference level headroom above the expected carrier power.
const REF_HEADROOM_DB: f64 = 1.0;

/// Analyzer window for one measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Window {
    /// Frequency span
    pub span_hz: f64,
    /// Center frequency
    pub center_hz: f64,
    /// Resolution bandwidth
    pub rbw_hz: f64,
}

/// Window for the `harmonic`-th multiple of `fundamental_hz` (2 = second harmonic).
///
/// Span and RBW depend only on the fundamental: low audio fundamentals need a
/// narrow window to separate the harmonics.
pub fn harmonic_window(fundamental_hz: f64, harmonic: u32) -> Window {
    let (span_hz, rbw_hz) = if fundamental_hz <= 100.0 {
        (50.0, 10.0)
    } else if fundamental_hz < 5000.0 {
        (1000.0, 100.0)
    } else {
        (10e3, 100.0)
    };
    Window {
        span_hz,
        center_hz: f64::from(harmonic) * fundamental_hz,
        rbw_hz,
    }
}

/// Worst harmonic in dBc (negative means below the carrier).
///
/// `None` when no harmonics were measured.
pub fn worst_harmonic_dbc(carrier_dbm: f64, harmonics_dbm: &[f64]) -> Option<f64> {
    harmonics_dbm
        .iter()
        .map(|h| carrier_dbm - h)
        .reduce(f64::min)
        .map(|rejection| -rejection)
}

/// One measured harmonic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Harmonic {
    /// Multiple of the fundamental (2 = second harmonic)
    pub order: u32,
    /// Window center
    pub frequency_hz: f64,
    /// Peak power in the window
    pub power_dbm: f64,
}

/// Result of [`measure_harmonics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarmonicReport {
    /// Fundamental frequency
    pub fundamental_hz: f64,
    /// Measured carrier peak
    pub carrier_dbm: f64,
    /// Harmonics in order
    pub harmonics: Vec<Harmonic>,
    /// Worst harmonic relative to the carrier
    pub worst_dbc: f64,
}

/// Measure the carrier and `count` harmonics.
///
/// `fundamental_dbm` is the expected carrier power; the reference level is
/// set just above it for every window.
pub async fn measure_harmonics(
    analyzer: &dyn SpectrumAnalyzer,
    fundamental_hz: f64,
    fundamental_dbm: f64,
    count: u32,
) -> Result<HarmonicReport> {
    if count == 0 {
        bail!("at least one harmonic must be measured");
    }
    if count > MAX_HARMONICS {
        bail!("{} harmonics requested, at most {} supported", count, MAX_HARMONICS);
    }
    if !(fundamental_hz.is_finite() && fundamental_hz > 0.0) {
        bail!("invalid fundamental frequency {}", fundamental_hz);
    }
    let ref_level = fundamental_dbm + REF_HEADROOM_DB;

    let carrier = Window {
        span_hz: CARRIER_SPAN_HZ,
        center_hz: fundamental_hz,
        rbw_hz: CARRIER_RBW_HZ,
    };
    let carrier_dbm = peak_in(analyzer, carrier, ref_level)
        .await
        .context("Failed to measure carrier")?;
    tracing::info!(fundamental_hz, carrier_dbm, "carrier measured");

    let mut harmonics = Vec::with_capacity(count as usize);
    for order in 2..=count + 1 {
        let window = harmonic_window(fundamental_hz, order);
        let power_dbm = peak_in(analyzer, window, ref_level)
            .await
            .with_context(|| format!("Failed to measure harmonic {}", order))?;
        tracing::debug!(order, frequency_hz = window.center_hz, power_dbm, "harmonic");
        harmonics.push(Harmonic {
            order,
            frequency_hz: window.center_hz,
            power_dbm,
        });
    }

    let powers: Vec<f64> = harmonics.iter().map(|h| h.power_dbm).collect();
    let worst_dbc = worst_harmonic_dbc(carrier_dbm, &powers)
        .context("no harmonics measured")?;
    tracing::info!(worst_dbc, "harmonic distortion");

    Ok(HarmonicReport {
        fundamental_hz,
        carrier_dbm,
        harmonics,
        worst_dbc,
    })
}

async fn peak_in(analyzer: &dyn SpectrumAnalyzer, window: Window, ref_level: f64) -> Result<f64> {
    analyzer
        .set_window(window.span_hz, window.center_hz, window.rbw_hz, ref_level)
        .await?;
    let sweep = analyzer.sweep_time().await?;
    let sweep = Duration::try_from_secs_f64(sweep)
        .with_context(|| format!("analyzer reported invalid sweep time {}", sweep))?;
    tokio::time::sleep(sweep + SWEEP_MARGIN).await;
    analyzer.peak_power().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Analyzer whose peak follows the window center.
    struct FakeAnalyzer {
        center: Mutex<f64>,
        windows: Mutex<Vec<(f64, f64, f64, f64)>>,
        sweep_time: f64,
    }

    impl FakeAnalyzer {
        fn new(sweep_time: f64) -> Self {
            Self {
                center: Mutex::new(0.0),
                windows: Mutex::new(Vec::new()),
                sweep_time,
            }
        }
    }

    #[async_trait]
    impl SpectrumAnalyzer for FakeAnalyzer {
        async fn set_window(
            &self,
            span_hz: f64,
            center_hz: f64,
            rbw_hz: f64,
            ref_level_dbm: f64,
        ) -> Result<()> {
            *self.center.lock() = center_hz;
            self.windows
                .lock()
                .push((span_hz, center_hz, rbw_hz, ref_level_dbm));
            Ok(())
        }

        async fn peak_power(&self) -> Result<f64> {
            // carrier at 1 kHz is 0 dBm, 2 kHz -60, 3 kHz -55, 4 kHz -70
            Ok(match *self.center.lock() as u32 {
                1000 => 0.0,
                2000 => -60.0,
                3000 => -55.0,
                _ => -70.0,
            })
        }

        async fn sweep_time(&self) -> Result<f64> {
            Ok(self.sweep_time)
        }
    }

    #[test]
    fn window_by_fundamental() {
        assert_eq!(
            harmonic_window(60.0, 2),
            Window {
                span_hz: 50.0,
                center_hz: 120.0,
                rbw_hz: 10.0
            }
        );
        assert_eq!(harmonic_window(100.0, 3).span_hz, 50.0);
        assert_eq!(harmonic_window(1000.0, 2).span_hz, 1000.0);
        assert_eq!(harmonic_window(4999.0, 2).rbw_hz, 100.0);
        let high = harmonic_window(5000.0, 4);
        assert_eq!(high.span_hz, 10e3);
        assert_eq!(high.center_hz, 20e3);
    }

    #[test]
    fn worst_is_closest_to_carrier() {
        assert_eq!(worst_harmonic_dbc(0.0, &[-60.0, -55.0, -70.0]), Some(-55.0));
        assert_eq!(worst_harmonic_dbc(10.0, &[-40.0]), Some(-50.0));
        assert_eq!(worst_harmonic_dbc(0.0, &[]), None);
    }

    #[tokio::test(start_paused = true)]
    async fn measures_carrier_then_harmonics() {
        let analyzer = FakeAnalyzer::new(0.1);
        let start = tokio::time::Instant::now();

        let report = measure_harmonics(&analyzer, 1000.0, 0.0, 3).await.unwrap();

        assert_eq!(report.carrier_dbm, 0.0);
        assert_eq!(report.worst_dbc, -55.0);
        let orders: Vec<_> = report.harmonics.iter().map(|h| h.order).collect();
        assert_eq!(orders, vec![2, 3, 4]);

        let windows = analyzer.windows.lock().clone();
        assert_eq!(windows[0], (10e3, 1000.0, 100.0, 1.0));
        assert_eq!(windows[1], (1000.0, 2000.0, 100.0, 1.0));
        assert_eq!(windows.len(), 4);
        assert!(start.elapsed() >= Duration::from_millis(4 * 600));
    }

    #[tokio::test]
    async fn rejects_zero_count_and_bad_sweep_time() {
        let analyzer = FakeAnalyzer::new(0.1);
        assert!(measure_harmonics(&analyzer, 1000.0, 0.0, 0).await.is_err());

        let broken = FakeAnalyzer::new(-1.0);
        let err = measure_harmonics(&broken, 1000.0, 0.0, 1)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("invalid sweep time"));
    }

    #[tokio::test]
    async fn rejects_excessive_count_before_touching_the_analyzer() {
        let analyzer = FakeAnalyzer::new(0.1);
        for count in [MAX_HARMONICS + 1, u32::MAX] {
            let err = measure_harmonics(&analyzer, 1000.0, 0.0, count)
                .await
                .unwrap_err();
            assert!(format!("{:#}", err).contains("at most 50 supported"));
        }
        assert!(analyzer.windows.lock().is_empty());
    }
}
