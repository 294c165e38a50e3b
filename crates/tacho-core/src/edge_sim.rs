use crate::edge::{EdgeError, EdgePolarity, EdgeSource, EdgeWait, LineProvider};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Schedule {
    Periodic { period: Option<Duration> },
    Scripted(VecDeque<Duration>),
}

/// Simulated tachometer output.
///
/// Edges are due at fixed offsets from the moment the source was created,
/// either periodically for a constant speed or from an explicit script.
#[derive(Debug, Clone)]
pub struct SimulatedFan {
    epoch: Instant,
    schedule: Schedule,
    emitted: u64,
    fault_after: Option<u64>,
}

impl SimulatedFan {
    /// Fan spinning at `rpm` with `edges_per_rev` edges per revolution.
    pub fn new(rpm: f64, edges_per_rev: u32) -> Self {
        let edges_per_sec = rpm * edges_per_rev as f64 / 60.0;
        // Speeds too slow for a representable period count as a stopped fan.
        let period = (edges_per_sec.is_finite() && edges_per_sec > 0.0)
            .then(|| Duration::try_from_secs_f64(1.0 / edges_per_sec).ok())
            .flatten();
        Self {
            epoch: Instant::now(),
            schedule: Schedule::Periodic { period },
            emitted: 0,
            fault_after: None,
        }
    }

    /// Edges at the given offsets from creation, in any order.
    pub fn scripted(mut offsets: Vec<Duration>) -> Self {
        offsets.sort();
        Self {
            epoch: Instant::now(),
            schedule: Schedule::Scripted(offsets.into()),
            emitted: 0,
            fault_after: None,
        }
    }

    /// Fail every read once `edges` edges have been delivered.
    pub fn with_fault_after(mut self, edges: u64) -> Self {
        self.fault_after = Some(edges);
        self
    }

    fn next_due(&self) -> Option<Instant> {
        match &self.schedule {
            Schedule::Periodic { period } => {
                let period = (*period)?;
                let index = u32::try_from(self.emitted + 1).ok()?;
                Some(self.epoch + period * index)
            }
            Schedule::Scripted(offsets) => offsets.front().map(|offset| self.epoch + *offset),
        }
    }

    fn advance(&mut self) {
        if let Schedule::Scripted(offsets) = &mut self.schedule {
            offsets.pop_front();
        }
        self.emitted += 1;
    }
}

impl EdgeSource for SimulatedFan {
    fn wait_for_edge(&mut self, timeout: Duration) -> Result<EdgeWait, EdgeError> {
        let Some(due) = self.next_due() else {
            std::thread::sleep(timeout);
            return Ok(EdgeWait::Timeout);
        };
        let now = Instant::now();
        if due <= now {
            return Ok(EdgeWait::Ready);
        }
        let until_due = due - now;
        if until_due <= timeout {
            std::thread::sleep(until_due);
            Ok(EdgeWait::Ready)
        } else {
            std::thread::sleep(timeout);
            Ok(EdgeWait::Timeout)
        }
    }

    fn consume_edge(&mut self) -> Result<u64, EdgeError> {
        if self.fault_after.is_some_and(|limit| self.emitted >= limit) {
            return Err(EdgeError::Read(io::Error::other("simulated line fault")));
        }
        match self.next_due() {
            Some(due) if due <= Instant::now() => {
                self.advance();
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

#[derive(Debug, Clone)]
enum SimLine {
    Constant { rpm: f64 },
    Faulty { rpm: f64, after: u64 },
}

/// In-memory line provider backed by simulated fans.
///
/// `edges_per_rev` is the edge count per revolution when both polarities are
/// counted; a single polarity sees half of them.
#[derive(Debug, Clone)]
pub struct SimulatedBank {
    edges_per_rev: u32,
    lines: HashMap<u32, SimLine>,
}

impl SimulatedBank {
    pub fn new(edges_per_rev: u32) -> Self {
        Self {
            edges_per_rev,
            lines: HashMap::new(),
        }
    }

    /// Every listed line spins at the same speed.
    pub fn uniform(lines: &[u32], rpm: f64, edges_per_rev: u32) -> Self {
        lines
            .iter()
            .fold(Self::new(edges_per_rev), |bank, &line| bank.with_fan(line, rpm))
    }

    pub fn with_fan(mut self, line: u32, rpm: f64) -> Self {
        self.lines.insert(line, SimLine::Constant { rpm });
        self
    }

    pub fn with_fault(mut self, line: u32, rpm: f64, after: u64) -> Self {
        self.lines.insert(line, SimLine::Faulty { rpm, after });
        self
    }

    fn edges_for(&self, polarity: EdgePolarity) -> u32 {
        match polarity {
            EdgePolarity::Both => self.edges_per_rev,
            EdgePolarity::Rising | EdgePolarity::Falling => (self.edges_per_rev / 2).max(1),
        }
    }
}

impl LineProvider for SimulatedBank {
    fn open(&self, line: u32, polarity: EdgePolarity) -> Result<Box<dyn EdgeSource>, EdgeError> {
        let edges = self.edges_for(polarity);
        let fan = match self.lines.get(&line) {
            Some(SimLine::Constant { rpm }) => SimulatedFan::new(*rpm, edges),
            Some(SimLine::Faulty { rpm, after }) => {
                SimulatedFan::new(*rpm, edges).with_fault_after(*after)
            }
            None => {
                return Err(EdgeError::Unavailable {
                    line,
                    reason: "no simulated fan on this line".to_string(),
                })
            }
        };
        Ok(Box::new(fan))
    }
}
