//! Measurement procedures built on the capability traits.
//!
//! - [`correction`] - power sensor calibration factor tables
//! - [`sweep`] - level/frequency sweeps of a signal source
//! - [`harmonics`] - harmonic distortion with a spectrum analyzer
//!
//! Procedures take `&dyn` capability objects, so they run the same against a
//! profile-driven instrument or a test double.

pub mod correction;
pub mod harmonics;
pub mod sweep;

pub use correction::{measure_corrected, CorrectionPoint, CorrectionTable};
pub use harmonics::{
    harmonic_window, measure_harmonics, worst_harmonic_dbc, Harmonic, HarmonicReport, Window,
    MAX_HARMONICS,
};
pub use sweep::{run_sweep, SweepGrid, SweepMeter, SweepOptions, SweepPoint, DEFAULT_SETTLE};
