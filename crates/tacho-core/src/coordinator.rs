//! Round coordination for single-shot and watch runs.
//!
//! Both variants start one worker per declared channel. Single-shot joins
//! every worker and prints whatever was published; watch waits on the round
//! barrier, updates statistics, prints, resets the round and repeats until
//! the stop flag is set or no live channel remains.

use crate::output::{render_round, OutputFormatter, Reading};
use crate::plan::{MeasurePlan, RunMode};
use crate::round::{RoundState, RoundWait};
use crate::stats::RpmStats;
use crate::worker::{ChannelWorker, Session, WorkerExit};
use log::{debug, error, info, warn};
use std::io::{self, Write};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("cannot start worker for line {line}: {source}")]
    Spawn {
        line: u32,
        #[source]
        source: io::Error,
    },

    #[error("cannot write output: {0}")]
    Output(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every declared channel produced output (watch: the session ended with
    /// at least one live channel).
    Complete,
    /// Some, but not all, channels produced output.
    Partial,
    /// Nothing was produced, or every channel dropped out.
    Empty,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub mode: RunMode,
    pub declared: usize,
    /// Channels that appeared in output at least once.
    pub reported: usize,
    pub rounds: u64,
    /// Lines whose worker could not acquire or lost its edge source.
    pub failed_lines: Vec<u32>,
    /// Watch mode ended because every channel was retired.
    pub exhausted: bool,
}

impl RunReport {
    pub fn outcome(&self) -> RunOutcome {
        match self.mode {
            RunMode::Watch if self.exhausted => RunOutcome::Empty,
            RunMode::Watch => RunOutcome::Complete,
            RunMode::SingleShot if self.reported == 0 => RunOutcome::Empty,
            RunMode::SingleShot if self.reported < self.declared => RunOutcome::Partial,
            RunMode::SingleShot => RunOutcome::Complete,
        }
    }
}

/// Runs a validated plan against a session and writes formatted rounds.
pub struct Coordinator<'a> {
    plan: &'a MeasurePlan,
    session: Session,
    formatter: &'a dyn OutputFormatter,
}

impl<'a> Coordinator<'a> {
    pub fn new(plan: &'a MeasurePlan, session: Session, formatter: &'a dyn OutputFormatter) -> Self {
        Self {
            plan,
            session,
            formatter,
        }
    }

    pub fn run<W: Write>(&self, out: &mut W) -> Result<RunReport, RunError> {
        match self.plan.mode() {
            RunMode::SingleShot => self.run_single_shot(out),
            RunMode::Watch => self.run_watch(out),
        }
    }

    pub fn run_single_shot<W: Write>(&self, out: &mut W) -> Result<RunReport, RunError> {
        let round = Arc::new(RoundState::new(self.plan.len()));
        let handles = self.spawn_workers(RunMode::SingleShot, &round)?;
        let failed_lines = self.join_workers(handles);

        let readings: Vec<Reading> = self
            .plan
            .channels()
            .iter()
            .zip(round.latest())
            .filter_map(|(channel, rate)| {
                rate.map(|rpm| Reading {
                    line: channel.line,
                    rpm,
                    stats: None,
                })
            })
            .collect();

        self.emit(out, &readings)?;

        Ok(RunReport {
            mode: RunMode::SingleShot,
            declared: self.plan.len(),
            reported: readings.len(),
            rounds: u64::from(!readings.is_empty()),
            failed_lines,
            exhausted: false,
        })
    }

    pub fn run_watch<W: Write>(&self, out: &mut W) -> Result<RunReport, RunError> {
        let round = Arc::new(RoundState::new(self.plan.len()));
        let handles = self.spawn_workers(RunMode::Watch, &round)?;
        let channels = self.plan.channels();
        let mut stats = vec![RpmStats::new(); channels.len()];
        let mut seen = vec![false; channels.len()];
        let mut rounds = 0u64;
        let mut exhausted = false;

        let result = loop {
            match round.await_round(&self.session.stop) {
                RoundWait::Complete(completed) => {
                    let readings: Vec<Reading> = completed
                        .rates()
                        .into_iter()
                        .map(|(slot, rpm)| {
                            stats[slot].update(rpm);
                            seen[slot] = true;
                            Reading {
                                line: channels[slot].line,
                                rpm,
                                stats: Some(stats[slot]),
                            }
                        })
                        .collect();
                    if let Err(e) = self.emit(out, &readings) {
                        break Err(e);
                    }
                    completed.reset();
                    rounds += 1;
                    debug!("round {} emitted ({} channels)", rounds, readings.len());
                }
                RoundWait::Cancelled => break Ok(()),
                RoundWait::Exhausted => {
                    warn!("no channel left to measure, ending watch");
                    exhausted = true;
                    break Ok(());
                }
            }
        };

        if result.is_err() {
            // Output is gone; nothing left to report to.
            self.session.stop.trigger();
        }
        let failed_lines = self.join_workers(handles);
        result?;

        info!("watch finished after {} rounds", rounds);
        Ok(RunReport {
            mode: RunMode::Watch,
            declared: channels.len(),
            reported: seen.iter().filter(|s| **s).count(),
            rounds,
            failed_lines,
            exhausted,
        })
    }

    fn emit<W: Write>(&self, out: &mut W, readings: &[Reading]) -> Result<(), RunError> {
        let text = render_round(self.formatter, self.plan.len(), readings);
        if !text.is_empty() {
            out.write_all(text.as_bytes())?;
            out.flush()?;
        }
        self.session.observer.round_emitted(readings);
        Ok(())
    }

    fn spawn_workers(
        &self,
        mode: RunMode,
        round: &Arc<RoundState>,
    ) -> Result<Vec<(u32, JoinHandle<WorkerExit>)>, RunError> {
        let mut handles = Vec::with_capacity(self.plan.len());
        for (slot, channel) in self.plan.channels().iter().enumerate() {
            let worker = ChannelWorker::new(
                slot,
                *channel,
                mode,
                self.session.clone(),
                Arc::clone(round),
            );
            match worker.spawn() {
                Ok(handle) => handles.push((channel.line, handle)),
                Err(source) => {
                    error!("line {}: cannot start worker: {}", channel.line, source);
                    self.session.stop.trigger();
                    self.join_workers(handles);
                    return Err(RunError::Spawn {
                        line: channel.line,
                        source,
                    });
                }
            }
        }
        Ok(handles)
    }

    fn join_workers(&self, handles: Vec<(u32, JoinHandle<WorkerExit>)>) -> Vec<u32> {
        let mut failed = Vec::new();
        for (line, handle) in handles {
            match handle.join() {
                Ok(exit) => {
                    debug!("line {}: worker exited: {:?}", line, exit);
                    if exit.is_failure() {
                        failed.push(line);
                    }
                }
                Err(_) => {
                    error!("line {}: worker panicked", line);
                    failed.push(line);
                }
            }
        }
        failed
    }
}
