//! Shared per-round slots and the barrier the coordinator waits on.
//!
//! Workers publish into their own slot; the coordinator waits until every
//! live slot has published, reads all values in declaration order, and
//! clears the flags while still holding the lock so no publish for the next
//! round can interleave with output.

use crate::cancel::{StopFlag, CANCEL_POLL};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    rate: Option<f64>,
    done: bool,
    retired: bool,
}

#[derive(Debug)]
struct Slots {
    slots: Vec<Slot>,
    arrived: usize,
    live: usize,
}

impl Slots {
    fn round_complete(&self) -> bool {
        self.live > 0 && self.arrived == self.live
    }
}

/// Outcome of [`RoundState::await_round`].
pub enum RoundWait<'a> {
    Complete(CompletedRound<'a>),
    Cancelled,
    /// Every channel has been retired; no round can complete any more.
    Exhausted,
}

/// A full round, read under the round lock.
pub struct CompletedRound<'a> {
    guard: MutexGuard<'a, Slots>,
}

impl CompletedRound<'_> {
    /// `(slot index, rate)` for every live slot, in declaration order.
    pub fn rates(&self) -> Vec<(usize, f64)> {
        self.guard
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.retired)
            .filter_map(|(index, slot)| slot.rate.map(|rate| (index, rate)))
            .collect()
    }

    /// Clear all flags and release the lock.
    pub fn reset(mut self) {
        clear_flags(&mut self.guard);
    }
}

fn clear_flags(slots: &mut Slots) {
    for slot in &mut slots.slots {
        slot.done = false;
    }
    slots.arrived = 0;
}

/// One slot per channel guarded by a mutex, plus an arrival count compared
/// against the number of live channels.
#[derive(Debug)]
pub struct RoundState {
    inner: Mutex<Slots>,
    all_done: Condvar,
    recheck: Duration,
}

impl RoundState {
    pub fn new(channels: usize) -> Self {
        Self::with_recheck(channels, CANCEL_POLL)
    }

    /// `recheck` bounds how long [`await_round`](Self::await_round) sleeps
    /// between looks at the stop flag.
    pub fn with_recheck(channels: usize, recheck: Duration) -> Self {
        Self {
            inner: Mutex::new(Slots {
                slots: vec![Slot::default(); channels],
                arrived: 0,
                live: channels,
            }),
            all_done: Condvar::new(),
            recheck,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn live_channels(&self) -> usize {
        self.lock().live
    }

    /// Store a sample for `index` and mark it done. Signals the barrier when
    /// this completes the round. A repeated publish within one round only
    /// replaces the value.
    pub fn publish(&self, index: usize, rate: f64) {
        let mut slots = self.lock();
        let Some(slot) = slots.slots.get_mut(index) else {
            return;
        };
        if slot.retired {
            return;
        }
        slot.rate = Some(rate);
        if !slot.done {
            slot.done = true;
            slots.arrived += 1;
            if slots.round_complete() {
                self.all_done.notify_all();
            }
        }
    }

    /// Permanently remove `index` from the barrier. Used when a channel's
    /// worker exits without being able to publish any more.
    pub fn retire(&self, index: usize) {
        let mut slots = self.lock();
        let Some(slot) = slots.slots.get_mut(index) else {
            return;
        };
        if slot.retired {
            return;
        }
        let was_done = slot.done;
        slot.retired = true;
        slot.done = false;
        slot.rate = None;
        if was_done {
            slots.arrived -= 1;
        }
        slots.live -= 1;
        if slots.live == 0 || slots.round_complete() {
            self.all_done.notify_all();
        }
    }

    /// Block until every live channel has published, the stop flag is set,
    /// or no live channel remains. The stop flag is re-checked at least every
    /// `recheck` interval even if the condition is never signalled.
    pub fn await_round(&self, stop: &StopFlag) -> RoundWait<'_> {
        let mut slots = self.lock();
        loop {
            if stop.is_set() {
                return RoundWait::Cancelled;
            }
            if slots.live == 0 {
                return RoundWait::Exhausted;
            }
            if slots.round_complete() {
                return RoundWait::Complete(CompletedRound { guard: slots });
            }
            slots = self
                .all_done
                .wait_timeout(slots, self.recheck)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Last published value per slot, regardless of flags. For single-shot
    /// runs after every worker has been joined.
    pub fn latest(&self) -> Vec<Option<f64>> {
        self.lock()
            .slots
            .iter()
            .map(|slot| if slot.retired { None } else { slot.rate })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn complete(wait: RoundWait<'_>) -> CompletedRound<'_> {
        match wait {
            RoundWait::Complete(round) => round,
            RoundWait::Cancelled => panic!("unexpected cancellation"),
            RoundWait::Exhausted => panic!("unexpected exhaustion"),
        }
    }

    #[test]
    fn round_completes_in_declaration_order() {
        let state = Arc::new(RoundState::new(3));
        let stop = StopFlag::new();
        let mut handles = Vec::new();
        for (index, delay_ms) in [(0usize, 60u64), (1, 10), (2, 30)] {
            let state = Arc::clone(&state);
            handles.push(thread::spawn(move || {
                thread::sleep(Duration::from_millis(delay_ms));
                state.publish(index, index as f64 * 100.0);
            }));
        }
        let round = complete(state.await_round(&stop));
        assert_eq!(round.rates(), vec![(0, 0.0), (1, 100.0), (2, 200.0)]);
        round.reset();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn reset_leaves_no_residual_flags() {
        let state = RoundState::new(2);
        let stop = StopFlag::new();
        state.publish(0, 1.0);
        state.publish(1, 2.0);
        complete(state.await_round(&stop)).reset();

        // only one channel published: the round must not complete
        state.publish(0, 3.0);
        let stopper = stop.clone();
        let timer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            stopper.trigger();
        });
        assert!(matches!(state.await_round(&stop), RoundWait::Cancelled));
        timer.join().unwrap();
    }

    #[test]
    fn second_round_behaves_like_first() {
        let state = RoundState::new(2);
        let stop = StopFlag::new();
        for round_no in 0..3 {
            state.publish(1, 20.0 + round_no as f64);
            state.publish(0, 10.0 + round_no as f64);
            let round = complete(state.await_round(&stop));
            assert_eq!(
                round.rates(),
                vec![(0, 10.0 + round_no as f64), (1, 20.0 + round_no as f64)]
            );
            round.reset();
        }
    }

    #[test]
    fn repeated_publish_replaces_value_without_double_arrival() {
        let state = RoundState::with_recheck(2, Duration::from_millis(10));
        let stop = StopFlag::new();
        state.publish(0, 1.0);
        state.publish(0, 5.0);
        stop.trigger();
        assert!(matches!(state.await_round(&stop), RoundWait::Cancelled));
        assert_eq!(state.latest(), vec![Some(5.0), None]);
    }

    #[test]
    fn cancellation_is_observed_without_signal() {
        let state = RoundState::new(1);
        let stop = StopFlag::new();
        let stopper = stop.clone();
        let start = Instant::now();
        let timer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            stopper.trigger();
        });
        assert!(matches!(state.await_round(&stop), RoundWait::Cancelled));
        assert!(start.elapsed() < Duration::from_millis(50) + CANCEL_POLL * 2);
        timer.join().unwrap();
    }

    #[test]
    fn stop_is_seen_within_poll_interval_in_nearly_every_trial() {
        let p99 = crate::cancel::stop_latency_p99(100, |stop: &StopFlag| {
            let state = RoundState::new(1);
            assert!(matches!(state.await_round(stop), RoundWait::Cancelled));
        });
        assert!(p99 <= CANCEL_POLL + Duration::from_millis(10), "p99 = {p99:?}");
    }

    #[test]
    fn retired_channel_no_longer_blocks_round() {
        let state = Arc::new(RoundState::new(2));
        let stop = StopFlag::new();
        state.publish(1, 42.0);
        let retirer = Arc::clone(&state);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            retirer.retire(0);
        });
        let round = complete(state.await_round(&stop));
        assert_eq!(round.rates(), vec![(1, 42.0)]);
        round.reset();
        handle.join().unwrap();
        assert_eq!(state.live_channels(), 1);
    }

    #[test]
    fn all_retired_is_exhausted() {
        let state = RoundState::new(2);
        state.retire(0);
        state.retire(1);
        state.retire(1);
        assert!(matches!(
            state.await_round(&StopFlag::new()),
            RoundWait::Exhausted
        ));
    }
}
