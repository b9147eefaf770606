//! Profile-driven instrument driver.
//!
//! Instrument command dialects are described in TOML device profiles rather
//! than code. A profile names commands (sequences of templated writes, delays
//! and an optional query) and maps capability methods onto them, so a new
//! instrument model is a new file under `config/devices/`.
//!
//! - [`schema`] - profile types
//! - [`template`] - placeholder rendering and `when` conditions
//! - [`loader`] - loading and validation
//! - [`driver`] - [`ProfiledInstrument`]

pub mod driver;
pub mod loader;
pub mod schema;
pub mod template;

pub use driver::ProfiledInstrument;
pub use loader::{find_profile, load_profile, load_profile_from_str, load_profiles, ProfileLoadError};
pub use schema::{parse_key_value, CommandProfile, DeviceProfile, ParamMap, ParamValue, Step};
