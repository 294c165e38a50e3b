use crate::cancel::StopFlag;
use crate::edge::{EdgeError, LineProvider};
use crate::observer::RunObserver;
use crate::plan::{Channel, RunMode};
use crate::round::RoundState;
use crate::sampler::{Sample, TimedSampler};
use log::{debug, error, warn};
use std::io;
use std::sync::Arc;
use std::thread;

/// Everything a worker shares with the rest of the run.
#[derive(Clone)]
pub struct Session {
    pub provider: Arc<dyn LineProvider>,
    pub observer: Arc<dyn RunObserver>,
    pub stop: StopFlag,
}

/// How a channel worker ended.
#[derive(Debug)]
pub enum WorkerExit {
    /// Published every sample it took and stopped normally.
    Finished,
    /// Cancellation was observed mid-sample; the partial sample was dropped.
    Interrupted,
    /// The line could not be acquired.
    AcquireFailed(EdgeError),
    /// Waiting for or reading edges failed after acquisition.
    Faulted(EdgeError),
}

impl WorkerExit {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::AcquireFailed(_) | Self::Faulted(_))
    }
}

/// Owns one channel's edge source for its whole lifetime.
pub struct ChannelWorker {
    slot: usize,
    channel: Channel,
    mode: RunMode,
    session: Session,
    round: Arc<RoundState>,
}

impl ChannelWorker {
    pub fn new(
        slot: usize,
        channel: Channel,
        mode: RunMode,
        session: Session,
        round: Arc<RoundState>,
    ) -> Self {
        Self {
            slot,
            channel,
            mode,
            session,
            round,
        }
    }

    /// Run on a dedicated named thread. The worker moves into the thread.
    pub fn spawn(self) -> io::Result<thread::JoinHandle<WorkerExit>> {
        thread::Builder::new()
            .name(format!("tacho-line{}", self.channel.line))
            .spawn(move || self.run())
    }

    /// Run to completion on the current thread. The slot is retired on every
    /// exit that can no longer publish, including a panic.
    pub fn run(self) -> WorkerExit {
        let retire = RetireOnExit {
            round: Arc::clone(&self.round),
            slot: self.slot,
            armed: true,
        };
        let exit = self.measure();
        if !exit.is_failure() {
            retire.disarm();
        }
        exit
    }

    fn measure(&self) -> WorkerExit {
        let line = self.channel.line;
        let config = self.channel.config;
        let stop = &self.session.stop;

        let mut source = match self.session.provider.open(line, config.polarity()) {
            Ok(source) => source,
            Err(e) => {
                error!("line {}: cannot acquire: {}", line, e);
                self.session.observer.acquisition_failed(line, &e);
                return WorkerExit::AcquireFailed(e);
            }
        };

        let mut sampler = TimedSampler::new(config, self.session.provider.phase_wait());
        debug!(
            "line {}: acquired ({} edges, {} wait)",
            line,
            config.polarity(),
            sampler.strategy()
        );

        // The first reading after a cold start runs low; take it and drop it.
        if self.mode == RunMode::Watch {
            match sampler.sample(source.as_mut(), stop) {
                Ok(Sample::Rate(rpm)) => debug!("line {}: priming sample {:.1} rpm discarded", line, rpm),
                Ok(Sample::Interrupted) => return self.interrupted(),
                Err(e) => return self.faulted(e),
            }
        }

        loop {
            match sampler.sample(source.as_mut(), stop) {
                Ok(Sample::Rate(rpm)) => {
                    self.round.publish(self.slot, rpm);
                    self.session
                        .observer
                        .sample_completed(line, rpm, sampler.last_edges());
                }
                Ok(Sample::Interrupted) => return self.interrupted(),
                Err(e) => return self.faulted(e),
            }
            if self.mode == RunMode::SingleShot || stop.is_set() {
                return WorkerExit::Finished;
            }
        }
    }

    fn interrupted(&self) -> WorkerExit {
        debug!("line {}: interrupted", self.channel.line);
        self.session.observer.sample_interrupted(self.channel.line);
        WorkerExit::Interrupted
    }

    fn faulted(&self, e: EdgeError) -> WorkerExit {
        warn!("line {}: dropped after edge fault: {}", self.channel.line, e);
        self.session.observer.channel_faulted(self.channel.line, &e);
        WorkerExit::Faulted(e)
    }
}

/// Takes a worker's slot out of the barrier when dropped while armed.
struct RetireOnExit {
    round: Arc<RoundState>,
    slot: usize,
    armed: bool,
}

impl RetireOnExit {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RetireOnExit {
    fn drop(&mut self) {
        if self.armed {
            self.round.retire(self.slot);
        }
    }
}
