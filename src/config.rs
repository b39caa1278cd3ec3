//! Simulation configuration.

use crate::error::ConfigError;
use crate::time::SimTime;

/// How resource capacity is divided among the actions using it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sharing {
    /// Every resource is split among its actions in proportion to their weight.
    FairShare,
    /// Weighted max-min fairness computed by progressive filling.
    #[default]
    MaxMin,
}

/// Tunables of a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Events closer together than this many seconds are handled in the same time step.
    pub precision: f64,
    /// The run stops once simulated time would pass this instant.
    pub max_time: Option<SimTime>,
    pub sharing: Sharing,
    /// When set, simcalls are handled in an order drawn from this seed instead of by actor id.
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            precision: 1e-9,
            max_time: None,
            sharing: Sharing::default(),
            seed: None,
        }
    }
}

impl SimConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_precision(mut self, precision: f64) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_max_time(mut self, secs: f64) -> Self {
        self.max_time = Some(SimTime::from_secs(secs));
        self
    }

    pub fn with_sharing(mut self, sharing: Sharing) -> Self {
        self.sharing = sharing;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// The default configuration with overrides from `SIMKERNEL_MAX_TIME`,
    /// `SIMKERNEL_PRECISION` and `SIMKERNEL_SEED`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env(|var| std::env::var(var).ok())
    }

    fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(value) = lookup("SIMKERNEL_MAX_TIME") {
            let secs = parse_seconds("SIMKERNEL_MAX_TIME", &value)?;
            self.max_time = Some(SimTime::from_secs(secs));
        }
        if let Some(value) = lookup("SIMKERNEL_PRECISION") {
            self.precision = parse_seconds("SIMKERNEL_PRECISION", &value)?;
        }
        if let Some(value) = lookup("SIMKERNEL_SEED") {
            let seed = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                var: "SIMKERNEL_SEED",
                value,
            })?;
            self.seed = Some(seed);
        }
        Ok(self)
    }
}

fn parse_seconds(var: &'static str, value: &str) -> Result<f64, ConfigError> {
    match value.trim().parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => Ok(secs),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: value.to_owned(),
        }),
    }
}
