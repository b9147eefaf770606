//! Device profile loading and validation.
//!
//! ```rust,ignore
//! use metrology_driver_generic::loader::{load_profile, load_profiles};
//! use std::path::Path;
//!
//! let fsp = load_profile(Path::new("config/devices/rs_fsp.toml"))?;
//! let all = load_profiles(Path::new("config/devices"))?;
//! ```

use crate::schema::{DeviceProfile, Step};
use crate::template::{check_condition, check_template, placeholders};
use anyhow::{Context, Result};
use figment::{
    providers::{Format, Toml},
    Figment,
};
use metrology_core::Capability;
use std::path::Path;
use tracing::{debug, info, warn};

/// Profile loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ProfileLoadError {
    /// File or directory does not exist
    #[error("Profile path not found: {0}")]
    NotFound(String),

    /// Not valid TOML, or does not match the schema
    #[error("Failed to parse profile: {0}")]
    ParseError(String),

    /// Parsed, but internally inconsistent
    #[error("Profile '{name}' is invalid:\n{problems}")]
    ValidationError {
        /// Device name
        name: String,
        /// One problem per line
        problems: String,
    },
}

/// Load and validate a profile from a TOML file.
pub fn load_profile(path: &Path) -> Result<DeviceProfile> {
    if !path.exists() {
        return Err(ProfileLoadError::NotFound(path.display().to_string()).into());
    }

    debug!("Loading device profile from: {}", path.display());

    let profile: DeviceProfile = Figment::new()
        .merge(Toml::file(path))
        .extract()
        .map_err(|e| ProfileLoadError::ParseError(e.to_string()))
        .with_context(|| format!("Failed to load profile {}", path.display()))?;

    validate_profile(&profile)?;

    info!(
        "Loaded device profile: {} ({} commands)",
        profile.device.name,
        profile.commands.len()
    );
    Ok(profile)
}

/// Load and validate a profile from TOML text.
pub fn load_profile_from_str(toml_content: &str) -> Result<DeviceProfile> {
    let profile: DeviceProfile = toml::from_str(toml_content)
        .map_err(|e| ProfileLoadError::ParseError(e.to_string()))?;
    validate_profile(&profile)?;
    Ok(profile)
}

/// Load every `*.toml` profile in `dir`.
///
/// Files that fail to load are logged and skipped.
pub fn load_profiles(dir: &Path) -> Result<Vec<DeviceProfile>> {
    if !dir.is_dir() {
        return Err(ProfileLoadError::NotFound(dir.display().to_string()).into());
    }

    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.path()),
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                None
            }
        })
        .filter(|path| path.extension().and_then(|s| s.to_str()) == Some("toml"))
        .collect();
    paths.sort();

    let mut profiles = Vec::new();
    for path in paths {
        match load_profile(&path) {
            Ok(profile) => profiles.push(profile),
            Err(e) => warn!("Failed to load profile {}: {:#}", path.display(), e),
        }
    }

    info!(
        "Loaded {} device profiles from {}",
        profiles.len(),
        dir.display()
    );
    Ok(profiles)
}

/// Find a profile in `dir` by device name or file stem (case-insensitive).
pub fn find_profile(dir: &Path, name: &str) -> Result<DeviceProfile> {
    let by_file = dir.join(format!("{}.toml", name));
    if by_file.is_file() {
        return load_profile(&by_file);
    }
    load_profiles(dir)?
        .into_iter()
        .find(|p| p.device.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| {
            ProfileLoadError::NotFound(format!("{} (no profile named '{}')", dir.display(), name))
                .into()
        })
}

/// Cross-field checks serde cannot express.
pub fn validate_profile(profile: &DeviceProfile) -> Result<(), ProfileLoadError> {
    let mut problems = Vec::new();

    if profile.device.name.trim().is_empty() {
        problems.push("device.name must not be empty".to_string());
    }
    if profile.connection.read_terminator.is_empty() {
        problems.push("connection.read_terminator must not be empty".to_string());
    }

    check_steps("init", &profile.init, &mut problems);
    // init runs before any call arguments exist
    for step in &profile.init {
        for template in step.templates() {
            for name in placeholders(template) {
                if !profile.parameters.contains_key(&name) {
                    problems.push(format!(
                        "init: '{}' needs parameter '{}', which [parameters] does not set",
                        template, name
                    ));
                }
            }
        }
    }

    for (name, command) in &profile.commands {
        if command.steps.is_empty() && command.query.is_none() && !command.fetch {
            problems.push(format!("command '{}' has neither steps nor a query", name));
        }
        if command.reply.is_some() && command.query.is_none() && !command.fetch {
            problems.push(format!("command '{}' sets reply without a query or fetch", name));
        }
        if command.fetch && command.query.is_some() {
            problems.push(format!("command '{}' sets both query and fetch", name));
        }
        if let Some(query) = &command.query {
            if let Err(e) = check_template(query) {
                problems.push(format!("command '{}': {}", name, e));
            }
        }
        check_steps(&format!("command '{}'", name), &command.steps, &mut problems);
    }

    for (method, target) in &profile.capabilities {
        if Capability::for_method(method).is_none() {
            problems.push(format!("unknown capability method '{}'", method));
        }
        if !profile.commands.contains_key(target) {
            problems.push(format!(
                "capability '{}' maps to missing command '{}'",
                method, target
            ));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ProfileLoadError::ValidationError {
            name: profile.device.name.clone(),
            problems: problems.join("\n"),
        })
    }
}

fn check_steps(owner: &str, steps: &[Step], problems: &mut Vec<String>) {
    for step in steps {
        for template in step.templates() {
            if let Err(e) = check_template(template) {
                problems.push(format!("{}: {}", owner, e));
            }
        }
        if let Step::Guarded {
            when,
            unless_query,
            equals,
            ..
        } = step
        {
            if let Some(expression) = when {
                if let Err(e) = check_condition(expression) {
                    problems.push(format!("{}: {}", owner, e));
                }
            }
            if unless_query.is_some() != equals.is_some() {
                problems.push(format!(
                    "{}: unless_query and equals must be given together",
                    owner
                ));
            }
        }
    }
}
