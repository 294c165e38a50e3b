use crate::runtime::config::{ConfigError, RuntimeConfig};
use crate::runtime::keyboard::{self, TerminalGuard};
use crate::runtime::logging::init_tracing;
use crate::runtime::signals::spawn_signal_listener;
use crate::runtime::telemetry;
use clap::Parser;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use tacho_core::{
    Coordinator, LineProvider, MeasurePlan, RunError, RunMode, RunOutcome, RunReport, Session,
    SimulatedBank, StopFlag,
};
use tacho_io::{auto_detect, GpioBank, GpioError, TextFormatter};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Single-shot run where only some channels reported.
const EXIT_PARTIAL: u8 = 3;

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Gpio(#[from] GpioError),

    #[error(transparent)]
    Run(#[from] RunError),
}

pub fn run_from_args() -> ExitCode {
    run(RuntimeConfig::parse())
}

pub fn run(config: RuntimeConfig) -> ExitCode {
    let _log_guard = init_tracing(config.json_logs, config.debug);

    let result = execute(&config);
    keyboard::restore_terminal();

    match result {
        Ok(report) => exit_code(&report),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn execute(config: &RuntimeConfig) -> Result<RunReport, AppError> {
    let plan = config.measure_plan()?;
    let provider = line_provider(config, &plan)?;

    let _metrics_handle = telemetry::start_metrics_server(&config.metrics_addr);
    let stop = StopFlag::new();
    if let Err(e) = spawn_signal_listener(stop.clone()) {
        warn!(error = %e, "cannot install signal handlers");
    }

    let session = Session {
        provider,
        observer: telemetry::observer(config.metrics_addr.is_some()),
        stop: stop.clone(),
    };
    let formatter = TextFormatter::new(config.output_mode(), config.duration);

    info!(
        lines = ?plan.lines(),
        duration_s = config.duration,
        warmup_s = config.warmup,
        pulses = config.pulses,
        edge = ?config.edge,
        "Starting measurement"
    );

    let (terminal, keys) = if plan.mode() == RunMode::Watch {
        eprintln!("Watch mode started. Press 'q' to quit or Ctrl+C to interrupt.");
        start_key_watcher(&stop)
    } else {
        (None, None)
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let report = Coordinator::new(&plan, session, &formatter).run(&mut out);

    // Ends the key watcher once the run is over for any other reason.
    stop.trigger();
    if let Some(handle) = keys {
        let _ = handle.join();
    }
    drop(terminal);

    let report = report?;
    info!(
        rounds = report.rounds,
        reported = report.reported,
        failed = ?report.failed_lines,
        "Run complete"
    );
    Ok(report)
}

fn line_provider(
    config: &RuntimeConfig,
    plan: &MeasurePlan,
) -> Result<Arc<dyn LineProvider>, AppError> {
    if let Some(rpm) = config.simulated_rpm()? {
        info!(rpm, "Simulating fans");
        // the configured pulse count is the edge count per revolution
        return Ok(Arc::new(SimulatedBank::uniform(&plan.lines(), rpm, config.pulses)));
    }
    let chip = match &config.chip {
        Some(chip) => chip.clone(),
        None => {
            let first = plan.lines().first().copied().unwrap_or_default();
            let chip = auto_detect(first)?;
            info!(chip = %chip, line = first, "Auto-detected GPIO chip");
            chip
        }
    };
    Ok(Arc::new(GpioBank::new(chip)))
}

fn start_key_watcher(
    stop: &StopFlag,
) -> (Option<TerminalGuard>, Option<std::thread::JoinHandle<()>>) {
    match TerminalGuard::enter() {
        Ok(Some(guard)) => match keyboard::spawn_key_watcher(stop.clone()) {
            Ok(handle) => (Some(guard), Some(handle)),
            Err(e) => {
                warn!(error = %e, "cannot start keyboard monitor, use Ctrl+C to quit watch mode");
                (None, None)
            }
        },
        Ok(None) => {
            debug!("stdin is not a terminal, keyboard quit disabled");
            (None, None)
        }
        Err(e) => {
            warn!(error = %e, "cannot set up terminal, use Ctrl+C to quit watch mode");
            (None, None)
        }
    }
}

fn exit_code(report: &RunReport) -> ExitCode {
    match report.outcome() {
        RunOutcome::Complete => ExitCode::SUCCESS,
        RunOutcome::Partial => ExitCode::from(EXIT_PARTIAL),
        RunOutcome::Empty => ExitCode::FAILURE,
    }
}
