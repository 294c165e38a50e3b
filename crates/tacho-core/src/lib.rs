pub mod cancel;
pub mod coordinator;
pub mod edge;
#[cfg(any(test, feature = "simulation"))]
pub mod edge_sim;
pub mod observer;
pub mod output;
pub mod plan;
pub mod round;
pub mod sampler;
pub mod stats;
pub mod timebase;
pub mod worker;

pub use cancel::{StopFlag, CANCEL_POLL};
pub use coordinator::{Coordinator, RunError, RunOutcome, RunReport};
pub use edge::{EdgeError, EdgePolarity, EdgeSource, EdgeWait, LineProvider};
#[cfg(any(test, feature = "simulation"))]
pub use edge_sim::{SimulatedBank, SimulatedFan};
pub use observer::{NoopObserver, RunObserver};
pub use output::{render_round, OutputFormatter, Reading};
pub use plan::{Channel, ChannelConfig, MeasurePlan, PlanError, RunMode};
pub use round::{RoundState, RoundWait};
pub use sampler::{rpm_from_edges, PhaseOutcome, PhaseWait, PollingWait, Sample, TimedSampler};
pub use stats::RpmStats;
pub use timebase::TimeBase;
pub use worker::{ChannelWorker, Session, WorkerExit};
