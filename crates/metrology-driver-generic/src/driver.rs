//! Profile-driven instrument.
//!
//! [`ProfiledInstrument`] executes the named commands of a
//! [`DeviceProfile`] over any transport and exposes the capability traits
//! the profile maps.
//!
//! Running a command:
//!
//! 1. merge parameters: device `[parameters]` < command `defaults` < call arguments
//! 2. execute the steps in order (writes, guarded writes, sleeps)
//! 3. wait `settle_ms`
//! 4. send the query (or read, for `fetch` commands) and decode the reply

use crate::schema::{CommandProfile, DeviceProfile, ParamMap, ParamValue, Step};
use crate::template::{evaluate_condition, render};
use anyhow::{Context, Result};
use async_trait::async_trait;
use metrology_core::{
    parse_reading, Instrument, InstrumentError, OutputControl, PowerSensor, Readable, Reading,
    SignalSource, SpectrumAnalyzer, Transport,
};
use std::sync::Arc;
use std::time::Duration;

/// A step with its templates rendered.
enum Resolved {
    Write(String),
    Sleep(Duration),
    /// Sent unless the query already answers the expected reply.
    Guarded {
        write: String,
        unless: Option<(String, String)>,
    },
}

/// An instrument whose command dialect comes from a profile.
pub struct ProfiledInstrument {
    profile: Arc<DeviceProfile>,
    instrument: Instrument,
}

impl ProfiledInstrument {
    /// Connect to `resource` and run the profile's init sequence.
    pub async fn open(resource: &str, profile: DeviceProfile) -> Result<Self> {
        let options = profile.connect_options()?;
        let instrument = Instrument::open(resource, &options).await?;
        Self::initialise(profile, instrument).await
    }

    /// Use an existing transport (simulated instruments, tests).
    pub async fn with_transport(profile: DeviceProfile, transport: Box<dyn Transport>) -> Result<Self> {
        let instrument = Instrument::new(profile.device.name.clone(), transport);
        Self::initialise(profile, instrument).await
    }

    async fn initialise(profile: DeviceProfile, instrument: Instrument) -> Result<Self> {
        let driver = Self {
            profile: Arc::new(profile),
            instrument,
        };
        if !driver.profile.init.is_empty() {
            let steps = driver
                .resolve_steps("init", &driver.profile.init, &driver.profile.parameters)
                .with_context(|| format!("{}: init sequence failed", driver.name()))?;
            driver
                .execute_steps(steps)
                .await
                .with_context(|| format!("{}: init sequence failed", driver.name()))?;
        }
        tracing::info!(
            "Opened {} via {}",
            driver.name(),
            driver.instrument.transport().describe()
        );
        Ok(driver)
    }

    /// Device name from the profile.
    pub fn name(&self) -> &str {
        &self.profile.device.name
    }

    /// The profile in use.
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// The underlying instrument session, for raw commands.
    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    /// Run a named command.
    ///
    /// Returns the decoded reply when the command has a query or fetches.
    pub async fn run(&self, name: &str, args: &ParamMap) -> Result<Option<Reading>> {
        let command = self.command(name)?;
        let params = self.merge_params(command, args);

        let steps = self.resolve_steps(name, &command.steps, &params)?;
        let query = command
            .query
            .as_deref()
            .map(|query| render(query, &params, name))
            .transpose()?;

        tracing::debug!(device = %self.name(), command = name, "running command");
        self.execute_steps(steps).await?;

        if command.settle_ms > 0 {
            self.instrument
                .settle(Duration::from_millis(command.settle_ms))
                .await;
        }

        let (reply, source) = match query {
            Some(query) => (self.instrument.query(&query).await?, query),
            None if command.fetch => (self.instrument.read().await?, "read".to_string()),
            None => return Ok(None),
        };
        let reading = parse_reading(&reply, command.reply_format())
            .with_context(|| format!("{}: reply to '{}'", self.name(), source))?;
        Ok(Some(reading))
    }

    /// Render a command without sending it.
    ///
    /// Returns the writes whose `when` condition holds, followed by the
    /// query. Writes guarded by `unless_query` are included.
    pub fn format_command(&self, name: &str, args: &ParamMap) -> Result<Vec<String>> {
        let command = self.command(name)?;
        let params = self.merge_params(command, args);
        let mut rendered: Vec<String> = self
            .resolve_steps(name, &command.steps, &params)?
            .into_iter()
            .filter_map(|step| match step {
                Resolved::Write(write) | Resolved::Guarded { write, .. } => Some(write),
                Resolved::Sleep(_) => None,
            })
            .collect();
        if let Some(query) = &command.query {
            rendered.push(render(query, &params, name)?);
        }
        Ok(rendered)
    }

    fn command(&self, name: &str) -> Result<&CommandProfile, InstrumentError> {
        self.profile
            .commands
            .get(name)
            .ok_or_else(|| InstrumentError::UnknownCommand {
                instrument: self.name().to_string(),
                command: name.to_string(),
            })
    }

    fn merge_params(&self, command: &CommandProfile, args: &ParamMap) -> ParamMap {
        let mut params = self.profile.parameters.clone();
        params.extend(command.defaults.clone());
        params.extend(args.clone());
        params
    }

    fn condition_holds(&self, when: Option<&str>, params: &ParamMap) -> Result<bool, InstrumentError> {
        match when {
            Some(expression) => evaluate_condition(expression, params),
            None => Ok(true),
        }
    }

    /// Render every template of `steps` and drop writes whose `when` is false.
    ///
    /// Nothing reaches the bus until the whole sequence has rendered.
    fn resolve_steps(
        &self,
        owner: &str,
        steps: &[Step],
        params: &ParamMap,
    ) -> Result<Vec<Resolved>, InstrumentError> {
        let mut resolved = Vec::with_capacity(steps.len());
        for step in steps {
            match step {
                Step::Write(template) => {
                    resolved.push(Resolved::Write(render(template, params, owner)?));
                }
                Step::Sleep { sleep_ms } => {
                    resolved.push(Resolved::Sleep(Duration::from_millis(*sleep_ms)));
                }
                Step::Guarded {
                    write,
                    when,
                    unless_query,
                    equals,
                } => {
                    if !self.condition_holds(when.as_deref(), params)? {
                        tracing::trace!(device = %self.name(), "skipping '{}': condition false", write);
                        continue;
                    }
                    let unless = match (unless_query, equals) {
                        (Some(query), Some(expected)) => {
                            Some((render(query, params, owner)?, expected.trim().to_string()))
                        }
                        _ => None,
                    };
                    resolved.push(Resolved::Guarded {
                        write: render(write, params, owner)?,
                        unless,
                    });
                }
            }
        }
        Ok(resolved)
    }

    async fn execute_steps(&self, steps: Vec<Resolved>) -> Result<()> {
        for step in steps {
            match step {
                Resolved::Write(command) => self.instrument.command(&command).await?,
                Resolved::Sleep(duration) => self.instrument.settle(duration).await,
                Resolved::Guarded { write, unless } => {
                    if let Some((query, expected)) = unless {
                        let reply = self.instrument.query(&query).await?;
                        if reply.trim().eq_ignore_ascii_case(&expected) {
                            tracing::debug!(
                                device = %self.name(),
                                "'{}' already answers '{}', skipping '{}'",
                                query,
                                reply,
                                write
                            );
                            continue;
                        }
                    }
                    self.instrument.command(&write).await?;
                }
            }
        }
        Ok(())
    }

    /// Run the command mapped to a capability method.
    async fn run_capability(&self, method: &str, args: ParamMap) -> Result<Option<Reading>> {
        let command = self.profile.capability_command(method).ok_or_else(|| {
            InstrumentError::UnknownCommand {
                instrument: self.name().to_string(),
                command: method.to_string(),
            }
        })?;
        self.run(command, &args).await
    }

    /// Run a capability method that must return a number.
    async fn measure(&self, method: &str, args: ParamMap) -> Result<f64> {
        let reading = self.run_capability(method, args).await?.ok_or_else(|| {
            InstrumentError::Configuration(format!(
                "{}: command for '{}' has no query",
                self.name(),
                method
            ))
        })?;
        reading.as_f64().ok_or_else(|| {
            InstrumentError::parse(reading.to_string(), "number").into()
        })
    }
}

fn args<const N: usize>(pairs: [(&str, f64); N]) -> ParamMap {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), ParamValue::Number(value)))
        .collect()
}

#[async_trait]
impl Readable for ProfiledInstrument {
    #[tracing::instrument(skip(self), fields(device = %self.name()))]
    async fn read(&self) -> Result<f64> {
        self.measure("read", ParamMap::new()).await
    }
}

#[async_trait]
impl OutputControl for ProfiledInstrument {
    #[tracing::instrument(skip(self), fields(device = %self.name()))]
    async fn silence(&self) -> Result<()> {
        self.run_capability("silence", ParamMap::new()).await?;
        Ok(())
    }
}

#[async_trait]
impl SignalSource for ProfiledInstrument {
    #[tracing::instrument(skip(self), fields(device = %self.name()))]
    async fn set_output(&self, level: f64, frequency_hz: f64) -> Result<()> {
        self.run_capability(
            "set_output",
            args([("level", level), ("frequency", frequency_hz)]),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PowerSensor for ProfiledInstrument {
    #[tracing::instrument(skip(self), fields(device = %self.name()))]
    async fn measure_power(&self, frequency_hz: f64) -> Result<f64> {
        self.measure("measure_power", args([("frequency", frequency_hz)]))
            .await
    }

    #[tracing::instrument(skip(self), fields(device = %self.name()))]
    async fn measure_power_with_correction(&self, factor_pct: f64) -> Result<f64> {
        self.measure(
            "measure_power_with_correction",
            args([("factor", factor_pct)]),
        )
        .await
    }
}

#[async_trait]
impl SpectrumAnalyzer for ProfiledInstrument {
    #[tracing::instrument(skip(self), fields(device = %self.name()))]
    async fn set_window(
        &self,
        span_hz: f64,
        center_hz: f64,
        rbw_hz: f64,
        ref_level_dbm: f64,
    ) -> Result<()> {
        self.run_capability(
            "set_window",
            args([
                ("span", span_hz),
                ("center", center_hz),
                ("rbw", rbw_hz),
                ("ref_level", ref_level_dbm),
            ]),
        )
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(device = %self.name()))]
    async fn peak_power(&self) -> Result<f64> {
        self.measure("peak_power", ParamMap::new()).await
    }

    #[tracing::instrument(skip(self), fields(device = %self.name()))]
    async fn sweep_time(&self) -> Result<f64> {
        self.measure("sweep_time", ParamMap::new()).await
    }
}
