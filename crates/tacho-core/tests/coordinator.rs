use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tacho_core::{
    Channel, ChannelConfig, Coordinator, EdgeError, EdgePolarity, EdgeSource, LineProvider,
    MeasurePlan, NoopObserver, OutputFormatter, Reading, RunMode, RunObserver, RunOutcome,
    Session, SimulatedBank, StopFlag,
};

/// `<line> <rpm> <count>` per reading; count is 0 without stats.
struct Plain;

impl OutputFormatter for Plain {
    fn format(&self, reading: &Reading) -> String {
        let count = reading.stats.map(|s| s.count()).unwrap_or(0);
        format!("{} {:.0} {}\n", reading.line, reading.rpm, count)
    }
}

#[derive(Default)]
struct CountingObserver {
    rounds: AtomicU64,
    samples: AtomicU64,
}

impl RunObserver for CountingObserver {
    fn sample_completed(&self, _line: u32, _rpm: f64, _edges: u64) {
        self.samples.fetch_add(1, Ordering::SeqCst);
    }

    fn round_emitted(&self, _readings: &[Reading]) {
        self.rounds.fetch_add(1, Ordering::SeqCst);
    }
}

fn channel(line: u32, window_ms: u64) -> Channel {
    Channel {
        line,
        config: ChannelConfig::with_timing(
            Duration::ZERO,
            Duration::from_millis(window_ms),
            2,
            EdgePolarity::Both,
            Duration::ZERO,
        )
        .unwrap(),
    }
}

fn session(bank: SimulatedBank) -> Session {
    Session {
        provider: Arc::new(bank),
        observer: Arc::new(NoopObserver),
        stop: StopFlag::new(),
    }
}

fn stop_after(stop: &StopFlag, after: Duration) -> thread::JoinHandle<()> {
    let stop = stop.clone();
    thread::spawn(move || {
        thread::sleep(after);
        stop.trigger();
    })
}

fn records(out: &[u8]) -> Vec<(u32, f64, u64)> {
    String::from_utf8(out.to_vec())
        .unwrap()
        .lines()
        .map(|line| {
            let mut parts = line.split_whitespace();
            (
                parts.next().unwrap().parse().unwrap(),
                parts.next().unwrap().parse().unwrap(),
                parts.next().unwrap().parse().unwrap(),
            )
        })
        .collect()
}

#[test]
fn single_shot_reports_in_declaration_order() {
    // the slow channel is declared first and must still print first
    let plan = MeasurePlan::new(vec![channel(7, 400), channel(3, 100)], RunMode::SingleShot).unwrap();
    let bank = SimulatedBank::uniform(&[3, 7], 1200.0, 2);
    let mut out = Vec::new();

    let report = Coordinator::new(&plan, session(bank), &Plain).run(&mut out).unwrap();

    let lines: Vec<u32> = records(&out).iter().map(|r| r.0).collect();
    assert_eq!(lines, vec![7, 3]);
    assert_eq!(report.outcome(), RunOutcome::Complete);
    assert_eq!(report.reported, 2);
    assert!(report.failed_lines.is_empty());
}

#[test]
fn unavailable_line_gives_partial_result() {
    let plan = MeasurePlan::new(vec![channel(1, 200), channel(2, 200)], RunMode::SingleShot).unwrap();
    let bank = SimulatedBank::new(2).with_fan(1, 600.0);
    let mut out = Vec::new();

    let report = Coordinator::new(&plan, session(bank), &Plain).run(&mut out).unwrap();

    let recs = records(&out);
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].0, 1);
    assert!(recs[0].1 > 400.0 && recs[0].1 < 800.0, "rpm = {}", recs[0].1);
    assert_eq!(report.outcome(), RunOutcome::Partial);
    assert_eq!(report.failed_lines, vec![2]);
}

#[test]
fn no_line_available_prints_nothing() {
    let plan = MeasurePlan::new(vec![channel(1, 200)], RunMode::SingleShot).unwrap();
    let mut out = Vec::new();

    let report = Coordinator::new(&plan, session(SimulatedBank::new(2)), &Plain)
        .run(&mut out)
        .unwrap();

    assert!(out.is_empty());
    assert_eq!(report.outcome(), RunOutcome::Empty);
}

#[test]
fn interrupt_drops_unfinished_channel_only() {
    let plan = MeasurePlan::new(vec![channel(1, 150), channel(2, 3000)], RunMode::SingleShot).unwrap();
    let session = session(SimulatedBank::uniform(&[1, 2], 900.0, 2));
    let timer = stop_after(&session.stop, Duration::from_millis(500));
    let start = Instant::now();
    let mut out = Vec::new();

    let report = Coordinator::new(&plan, session, &Plain).run(&mut out).unwrap();

    assert!(start.elapsed() < Duration::from_millis(1200), "took {:?}", start.elapsed());
    let lines: Vec<u32> = records(&out).iter().map(|r| r.0).collect();
    assert_eq!(lines, vec![1]);
    assert_eq!(report.outcome(), RunOutcome::Partial);
    // interruption is not a channel failure
    assert!(report.failed_lines.is_empty());
    timer.join().unwrap();
}

#[test]
fn watch_accumulates_statistics_per_round() {
    let plan = MeasurePlan::new(vec![channel(4, 150), channel(5, 150)], RunMode::Watch).unwrap();
    let observer = Arc::new(CountingObserver::default());
    let session = Session {
        provider: Arc::new(SimulatedBank::uniform(&[4, 5], 1200.0, 2)),
        observer: observer.clone(),
        stop: StopFlag::new(),
    };
    let timer = stop_after(&session.stop, Duration::from_millis(1100));
    let mut out = Vec::new();

    let report = Coordinator::new(&plan, session, &Plain).run(&mut out).unwrap();
    timer.join().unwrap();

    assert!(report.rounds >= 3, "rounds = {}", report.rounds);
    assert_eq!(report.outcome(), RunOutcome::Complete);
    assert_eq!(observer.rounds.load(Ordering::SeqCst), report.rounds);

    let recs = records(&out);
    assert_eq!(recs.len() as u64, report.rounds * 2);
    for (round, pair) in recs.chunks(2).enumerate() {
        assert_eq!(pair[0].0, 4);
        assert_eq!(pair[1].0, 5);
        assert_eq!(pair[0].2, round as u64 + 1);
        assert_eq!(pair[1].2, round as u64 + 1);
    }
    assert!(observer.samples.load(Ordering::SeqCst) >= report.rounds * 2);
}

#[test]
fn watch_continues_after_one_channel_faults() {
    let plan = MeasurePlan::new(vec![channel(1, 150), channel(2, 150)], RunMode::Watch).unwrap();
    let bank = SimulatedBank::new(2).with_fault(1, 600.0, 2).with_fan(2, 600.0);
    let session = session(bank);
    let timer = stop_after(&session.stop, Duration::from_millis(900));
    let mut out = Vec::new();

    let report = Coordinator::new(&plan, session, &Plain).run(&mut out).unwrap();
    timer.join().unwrap();

    assert!(report.rounds >= 2, "rounds = {}", report.rounds);
    assert!(records(&out).iter().all(|r| r.0 == 2));
    assert_eq!(report.failed_lines, vec![1]);
    assert_eq!(report.outcome(), RunOutcome::Complete);
}

#[test]
fn watch_ends_when_every_channel_is_gone() {
    let plan = MeasurePlan::new(vec![channel(1, 150), channel(2, 150)], RunMode::Watch).unwrap();
    let start = Instant::now();
    let mut out = Vec::new();

    let report = Coordinator::new(&plan, session(SimulatedBank::new(2)), &Plain)
        .run(&mut out)
        .unwrap();

    assert!(start.elapsed() < Duration::from_millis(500));
    assert!(report.exhausted);
    assert_eq!(report.outcome(), RunOutcome::Empty);
    assert_eq!(report.failed_lines, vec![1, 2]);
}

/// Panics when line 2 is opened, otherwise defers to the bank.
struct PanicsOnLine2(SimulatedBank);

impl LineProvider for PanicsOnLine2 {
    fn open(&self, line: u32, polarity: EdgePolarity) -> Result<Box<dyn EdgeSource>, EdgeError> {
        assert_ne!(line, 2, "line 2 driver crashed");
        self.0.open(line, polarity)
    }
}

#[test]
fn watch_ends_when_every_worker_panicked() {
    struct AlwaysPanics;

    impl LineProvider for AlwaysPanics {
        fn open(&self, line: u32, _polarity: EdgePolarity) -> Result<Box<dyn EdgeSource>, EdgeError> {
            panic!("line {line} driver crashed");
        }
    }

    let plan = MeasurePlan::new(vec![channel(1, 150), channel(2, 150)], RunMode::Watch).unwrap();
    let session = Session {
        provider: Arc::new(AlwaysPanics),
        observer: Arc::new(NoopObserver),
        stop: StopFlag::new(),
    };
    let start = Instant::now();
    let mut out = Vec::new();

    let report = Coordinator::new(&plan, session, &Plain).run(&mut out).unwrap();

    assert!(start.elapsed() < Duration::from_millis(500), "took {:?}", start.elapsed());
    assert!(report.exhausted);
    assert_eq!(report.outcome(), RunOutcome::Empty);
    assert_eq!(report.failed_lines, vec![1, 2]);
    assert!(out.is_empty());
}

#[test]
fn watch_continues_after_one_worker_panicked() {
    let plan = MeasurePlan::new(vec![channel(1, 150), channel(2, 150)], RunMode::Watch).unwrap();
    let session = Session {
        provider: Arc::new(PanicsOnLine2(SimulatedBank::uniform(&[1], 600.0, 2))),
        observer: Arc::new(NoopObserver),
        stop: StopFlag::new(),
    };
    let timer = stop_after(&session.stop, Duration::from_millis(800));
    let mut out = Vec::new();

    let report = Coordinator::new(&plan, session, &Plain).run(&mut out).unwrap();
    timer.join().unwrap();

    assert!(!report.exhausted);
    assert!(report.rounds >= 2, "rounds = {}", report.rounds);
    assert_eq!(report.failed_lines, vec![2]);
    assert!(records(&out).iter().all(|(line, _, _)| *line == 1));
}

#[test]
fn watch_cancellation_is_prompt_with_long_windows() {
    let plan = MeasurePlan::new(vec![channel(1, 5000)], RunMode::Watch).unwrap();
    let session = session(SimulatedBank::uniform(&[1], 300.0, 2));
    let timer = stop_after(&session.stop, Duration::from_millis(200));
    let start = Instant::now();
    let mut out = Vec::new();

    let report = Coordinator::new(&plan, session, &Plain).run(&mut out).unwrap();
    timer.join().unwrap();

    assert!(start.elapsed() < Duration::from_millis(700), "took {:?}", start.elapsed());
    assert_eq!(report.rounds, 0);
    assert!(out.is_empty());
}
