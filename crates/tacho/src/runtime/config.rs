use clap::{ArgGroup, Parser, ValueEnum};
use tacho_core::plan::MAX_CHANNELS;
use tacho_core::{ChannelConfig, EdgePolarity, MeasurePlan, PlanError, RunMode};
use tacho_io::OutputMode;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("--simulate needs a positive speed in RPM, got {0}")]
    Simulation(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EdgeArg {
    Rising,
    Falling,
    Both,
}

impl From<EdgeArg> for EdgePolarity {
    fn from(edge: EdgeArg) -> Self {
        match edge {
            EdgeArg::Rising => EdgePolarity::Rising,
            EdgeArg::Falling => EdgePolarity::Falling,
            EdgeArg::Both => EdgePolarity::Both,
        }
    }
}

/// Measure fan speed from GPIO tachometer signals.
#[derive(Debug, Clone, Parser)]
#[command(name = "tacho", version, about)]
#[command(group(ArgGroup::new("format").args(["numeric", "json", "collectd"])))]
pub struct RuntimeConfig {
    /// GPIO line to measure; repeat for several fans
    #[arg(
        short = 'g',
        long = "gpio",
        value_name = "N",
        required = true,
        value_parser = clap::value_parser!(u32).range(0..=999)
    )]
    pub gpio: Vec<u32>,

    /// GPIO chip name (default: auto-detect)
    #[arg(short, long, value_name = "NAME")]
    pub chip: Option<String>,

    /// Total sampling time per reading, warmup included
    #[arg(
        short,
        long,
        value_name = "SEC",
        env = "GPIO_FAN_RPM_DURATION",
        default_value_t = 2,
        value_parser = clap::value_parser!(u64).range(1..=3600)
    )]
    pub duration: u64,

    /// Tachometer pulses per revolution
    #[arg(
        short,
        long,
        value_name = "N",
        env = "GPIO_FAN_RPM_PULSES",
        default_value_t = 4,
        value_parser = clap::value_parser!(u32).range(1..=100)
    )]
    pub pulses: u32,

    /// Seconds of edges ignored before counting starts
    #[arg(
        long,
        value_name = "SEC",
        env = "GPIO_FAN_RPM_WARMUP",
        default_value_t = 1,
        value_parser = clap::value_parser!(u64).range(0..=60)
    )]
    pub warmup: u64,

    /// Edges to count
    #[arg(short, long, value_enum, default_value_t = EdgeArg::Both)]
    pub edge: EdgeArg,

    /// Keep measuring until 'q' or Ctrl+C
    #[arg(short, long)]
    pub watch: bool,

    /// Print the bare RPM value
    #[arg(short, long)]
    pub numeric: bool,

    /// Print JSON records
    #[arg(short, long)]
    pub json: bool,

    /// Print collectd PUTVAL lines
    #[arg(long)]
    pub collectd: bool,

    /// Verbose diagnostics on stderr
    #[arg(long, env = "DEBUG")]
    pub debug: bool,

    /// Structured JSON logs on stderr
    #[arg(long)]
    pub json_logs: bool,

    /// Serve Prometheus metrics on this address
    #[arg(long, value_name = "ADDR")]
    pub metrics_addr: Option<String>,

    /// Replace GPIO hardware by a fan spinning at this speed on every line
    #[arg(long, value_name = "RPM")]
    pub simulate: Option<f64>,
}

impl RuntimeConfig {
    pub fn output_mode(&self) -> OutputMode {
        if self.numeric {
            OutputMode::Numeric
        } else if self.json {
            OutputMode::Json
        } else if self.collectd {
            OutputMode::Collectd
        } else {
            OutputMode::Human
        }
    }

    pub fn run_mode(&self) -> RunMode {
        if self.watch {
            RunMode::Watch
        } else {
            RunMode::SingleShot
        }
    }

    /// Lines to measure. Entries past the channel limit are dropped.
    pub fn lines(&self) -> &[u32] {
        if self.gpio.len() > MAX_CHANNELS {
            warn!(
                requested = self.gpio.len(),
                limit = MAX_CHANNELS,
                "too many GPIO lines, ignoring the extra ones"
            );
            &self.gpio[..MAX_CHANNELS]
        } else {
            &self.gpio
        }
    }

    pub fn measure_plan(&self) -> Result<MeasurePlan, ConfigError> {
        let config =
            ChannelConfig::from_secs(self.duration, self.pulses, self.warmup, self.edge.into())?;
        Ok(MeasurePlan::uniform(self.lines(), config, self.run_mode())?)
    }

    pub fn simulated_rpm(&self) -> Result<Option<f64>, ConfigError> {
        match self.simulate {
            Some(rpm) if !(rpm.is_finite() && rpm > 0.0) => Err(ConfigError::Simulation(rpm)),
            other => Ok(other),
        }
    }
}
