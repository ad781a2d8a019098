//! The two scheduling disciplines
//!
//! Both are ordinary [`Workload`]s that own their children, so arbitrary
//! scheduling trees are built purely by nesting:
//!
//! - [`SequencedGroup`] ticks every child once per group tick, in declaration
//!   order, on the caller's thread.
//! - [`SyncedGroup`] gives every child its own worker thread and rate; the
//!   group tick is the barrier at which children dispatched this period are
//!   awaited.

use crate::core::{GroupAttachment, TickContext, Workload, WorkloadMetrics};
use crate::error::{TickError, TickResult};
use crate::scheduling::runner::WorkloadRunner;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

// ============================================================================
// SequencedGroup
// ============================================================================

/// Deterministic, single-threaded group: child N's published outputs are
/// visible to child N+1 within the same tick.
#[derive(Debug, Default)]
pub struct SequencedGroup {
    scope: String,
    max_consecutive_failures: u32,
    children: Vec<WorkloadRunner>,
}

impl SequencedGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn children(&self) -> &[WorkloadRunner] {
        &self.children
    }
}

impl Workload for SequencedGroup {
    fn attach_children(&mut self, attachment: GroupAttachment) -> TickResult<()> {
        self.scope = format!("SequencedGroup:{}", attachment.group_name);
        self.max_consecutive_failures = attachment.max_consecutive_failures;
        for child in &attachment.children {
            if child.tick_rate_hz() < attachment.tick_rate_hz {
                log::warn!(
                    "[{}] '{}' asks for {} Hz but is ticked at the group's {} Hz",
                    self.scope,
                    child.name(),
                    child.tick_rate_hz(),
                    attachment.tick_rate_hz
                );
            }
        }
        self.children = attachment.children;
        Ok(())
    }

    fn start(&mut self) -> TickResult<()> {
        for child in &mut self.children {
            child.start()?;
        }
        Ok(())
    }

    fn tick(&mut self, _ctx: &mut TickContext<'_>) -> TickResult<()> {
        for child in &mut self.children {
            child.tick_contained(self.max_consecutive_failures, &self.scope)?;
        }
        Ok(())
    }

    fn stop(&mut self) {
        for child in self.children.iter_mut().rev() {
            child.stop();
        }
    }

    fn teardown(&mut self) -> TickResult<()> {
        for child in self.children.iter_mut().rev() {
            child.teardown();
        }
        Ok(())
    }
}

// ============================================================================
// SyncedGroup
// ============================================================================

enum Command {
    Tick,
    Stop,
}

enum Report {
    Started(TickResult<()>),
    Ticked(TickResult<()>),
}

struct Worker {
    commands: Sender<Command>,
    reports: Receiver<Report>,
    handle: JoinHandle<WorkloadRunner>,
}

enum Slot {
    Idle(WorkloadRunner),
    Active(Worker),
    Lost,
}

struct Child {
    name: String,
    period: Duration,
    metrics: Arc<WorkloadMetrics>,
    next_due: Option<Instant>,
    in_flight: bool,
    overrun_flagged: bool,
    slot: Slot,
}

/// Rate-decoupled group. Each child ticks at its own rate on a dedicated
/// thread; a slow child never delays its siblings, it is simply left in
/// flight and skipped until it finishes.
#[derive(Default)]
pub struct SyncedGroup {
    scope: String,
    period: Duration,
    max_consecutive_failures: u32,
    children: Vec<Child>,
}

impl std::fmt::Debug for SyncedGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncedGroup")
            .field("scope", &self.scope)
            .field("period", &self.period)
            .field(
                "children",
                &self.children.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl SyncedGroup {
    pub fn new() -> Self {
        Self::default()
    }

    fn spawn_worker(&self, mut runner: WorkloadRunner) -> TickResult<Worker> {
        let (command_tx, command_rx) = channel::bounded::<Command>(2);
        let (report_tx, report_rx) = channel::bounded::<Report>(2);
        let threshold = self.max_consecutive_failures;
        let scope = self.scope.clone();
        let handle = std::thread::Builder::new()
            .name(format!("tg-{}", runner.name()))
            .spawn(move || {
                let started = runner.start();
                let ok = started.is_ok();
                if report_tx.send(Report::Started(started)).is_ok() && ok {
                    while let Ok(Command::Tick) = command_rx.recv() {
                        let result = runner.tick_contained(threshold, &scope);
                        if report_tx.send(Report::Ticked(result)).is_err() {
                            break;
                        }
                    }
                }
                runner.stop();
                runner
            })?;
        Ok(Worker {
            commands: command_tx,
            reports: report_rx,
            handle,
        })
    }

    fn stop_workers(&mut self) {
        for child in &mut self.children {
            let slot = std::mem::replace(&mut child.slot, Slot::Lost);
            child.slot = match slot {
                Slot::Active(worker) => {
                    let _ = worker.commands.send(Command::Stop);
                    drop(worker.commands);
                    match worker.handle.join() {
                        Ok(runner) => Slot::Idle(runner),
                        Err(_) => {
                            log::error!("[{}] worker for '{}' panicked", self.scope, child.name);
                            Slot::Lost
                        }
                    }
                }
                other => other,
            };
            child.in_flight = false;
            child.next_due = None;
        }
    }

    fn lost_worker(&self, name: &str) -> TickError {
        TickError::workload(name, format!("{} worker thread exited", self.scope))
    }
}

impl Child {
    fn settle(&mut self, report: Report, fatal: &mut Option<TickError>) {
        if let Report::Ticked(result) = report {
            self.in_flight = false;
            if let Err(e) = result {
                fatal.get_or_insert(e);
            }
        }
    }

    fn advance_due(&mut self, now: Instant) {
        let next = self.next_due.unwrap_or(now) + self.period;
        // Fell more than a period behind: re-anchor rather than burst
        self.next_due = Some(if next + self.period < now {
            now + self.period
        } else {
            next
        });
    }
}

impl Workload for SyncedGroup {
    fn attach_children(&mut self, attachment: GroupAttachment) -> TickResult<()> {
        self.scope = format!("SyncedGroup:{}", attachment.group_name);
        self.period = crate::scheduling::clock::period_from_hz(attachment.tick_rate_hz);
        self.max_consecutive_failures = attachment.max_consecutive_failures;
        self.children = attachment
            .children
            .into_iter()
            .map(|runner| Child {
                name: runner.name().to_string(),
                period: runner.period(),
                metrics: runner.metrics(),
                next_due: None,
                in_flight: false,
                overrun_flagged: false,
                slot: Slot::Idle(runner),
            })
            .collect();
        Ok(())
    }

    fn start(&mut self) -> TickResult<()> {
        for i in 0..self.children.len() {
            let slot = std::mem::replace(&mut self.children[i].slot, Slot::Lost);
            let worker = match slot {
                Slot::Idle(runner) => self.spawn_worker(runner)?,
                other => {
                    self.children[i].slot = other;
                    continue;
                }
            };
            let started = worker.reports.recv();
            self.children[i].slot = Slot::Active(worker);
            match started {
                Ok(Report::Started(Ok(()))) => {}
                Ok(Report::Started(Err(e))) => return Err(e),
                _ => return Err(self.lost_worker(&self.children[i].name)),
            }
        }
        log::debug!(
            "[{}] started {} worker threads",
            self.scope,
            self.children.len()
        );
        Ok(())
    }

    fn tick(&mut self, _ctx: &mut TickContext<'_>) -> TickResult<()> {
        let now = Instant::now();
        let barrier = now + self.period;
        let tolerance = self.period / 2;
        let mut fatal: Option<TickError> = None;

        // Completions left over from earlier periods
        for child in &mut self.children {
            if !child.in_flight {
                continue;
            }
            if let Slot::Active(worker) = &child.slot {
                match worker.reports.try_recv() {
                    Ok(report) => child.settle(report, &mut fatal),
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => {
                        fatal.get_or_insert(TickError::workload(&child.name, "worker thread exited"));
                    }
                }
            }
        }

        let mut dispatched = Vec::new();
        for (i, child) in self.children.iter_mut().enumerate() {
            let due = child.next_due.map_or(true, |d| now + tolerance >= d);
            if !due {
                continue;
            }
            if child.in_flight {
                // Still busy with a tick from an earlier period
                if !child.overrun_flagged {
                    child.overrun_flagged = true;
                    child.metrics.record_overrun();
                    log::debug!("[{}] '{}' overran its period", self.scope, child.name);
                }
                continue;
            }
            let Slot::Active(worker) = &child.slot else {
                return Err(TickError::EngineState(format!(
                    "{} ticked before start",
                    self.scope
                )));
            };
            if worker.commands.send(Command::Tick).is_err() {
                fatal.get_or_insert(TickError::workload(&child.name, "worker thread exited"));
                continue;
            }
            child.in_flight = true;
            child.overrun_flagged = false;
            child.advance_due(now);
            dispatched.push(i);
        }

        // Barrier: wait for this period's dispatches, up to the period end
        for i in dispatched {
            let child = &mut self.children[i];
            if let Slot::Active(worker) = &child.slot {
                match worker.reports.recv_deadline(barrier) {
                    Ok(report) => child.settle(report, &mut fatal),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        fatal.get_or_insert(TickError::workload(&child.name, "worker thread exited"));
                    }
                }
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn stop(&mut self) {
        self.stop_workers();
    }

    fn teardown(&mut self) -> TickResult<()> {
        self.stop_workers();
        for child in self.children.iter_mut().rev() {
            if let Slot::Idle(runner) = &mut child.slot {
                runner.teardown();
            }
        }
        Ok(())
    }
}

impl Drop for SyncedGroup {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PortSchema, TickContext};
    use crate::scheduling::runner::test_support::runner;
    use crate::scheduling::stop::StopFlag;
    use parking_lot::Mutex;

    struct Recorder {
        id: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        sleep: Duration,
        fail: bool,
    }

    impl Workload for Recorder {
        fn tick(&mut self, _ctx: &mut TickContext<'_>) -> TickResult<()> {
            if !self.sleep.is_zero() {
                std::thread::sleep(self.sleep);
            }
            self.log.lock().push(self.id);
            if self.fail {
                return Err(TickError::workload(self.id, "boom"));
            }
            Ok(())
        }
    }

    fn recorder(
        id: &'static str,
        hz: f64,
        log: &Arc<Mutex<Vec<&'static str>>>,
        sleep: Duration,
        fail: bool,
    ) -> WorkloadRunner {
        runner(
            id,
            hz,
            PortSchema::new(),
            Box::new(Recorder {
                id,
                log: Arc::clone(log),
                sleep,
                fail,
            }),
        )
    }

    fn attach(group: &mut dyn Workload, hz: f64, threshold: u32, children: Vec<WorkloadRunner>) {
        group
            .attach_children(GroupAttachment {
                group_name: "g".to_string(),
                tick_rate_hz: hz,
                max_consecutive_failures: threshold,
                children,
            })
            .unwrap();
    }

    fn group_runner(hz: f64, group: Box<dyn Workload>) -> WorkloadRunner {
        runner("g", hz, PortSchema::new(), group)
    }

    #[test]
    fn test_sequenced_preserves_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut group = SequencedGroup::new();
        attach(
            &mut group,
            1000.0,
            5,
            vec![
                recorder("a", 1000.0, &log, Duration::ZERO, false),
                recorder("b", 1000.0, &log, Duration::ZERO, false),
            ],
        );
        let mut g = group_runner(1000.0, Box::new(group));
        g.start().unwrap();
        for _ in 0..1000 {
            g.tick().unwrap();
        }
        let log = log.lock();
        assert_eq!(log.len(), 2000);
        assert!(log.chunks(2).all(|pair| pair == ["a", "b"]));
    }

    #[test]
    fn test_sequenced_contains_failures_then_escalates() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut group = SequencedGroup::new();
        attach(
            &mut group,
            100.0,
            3,
            vec![
                recorder("bad", 100.0, &log, Duration::ZERO, true),
                recorder("good", 100.0, &log, Duration::ZERO, false),
            ],
        );
        let mut g = group_runner(100.0, Box::new(group));
        g.start().unwrap();
        g.tick().unwrap();
        g.tick().unwrap();
        let err = g.tick().unwrap_err();
        assert!(matches!(err, TickError::FaultThreshold { ref workload, failures: 3 } if workload == "bad"));
        // sibling kept ticking for the two contained failures
        assert_eq!(log.lock().iter().filter(|id| **id == "good").count(), 2);
    }

    #[test]
    fn test_synced_rates_are_decoupled() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut group = SyncedGroup::new();
        attach(
            &mut group,
            50.0,
            5,
            vec![
                recorder("fast", 50.0, &log, Duration::ZERO, false),
                // slow child whose tick takes longer than the group period
                recorder("slow", 5.0, &log, Duration::from_millis(60), false),
            ],
        );
        let mut g = group_runner(50.0, Box::new(group));
        g.start().unwrap();

        let stop = StopFlag::new();
        let mut clock = crate::scheduling::clock::TickClock::new(50.0, 3);
        let started = Instant::now();
        while started.elapsed() < Duration::from_secs(1) {
            clock.begin_tick();
            g.tick().unwrap();
            clock.wait_next(&stop, Duration::from_millis(2));
        }
        g.stop();
        g.teardown();

        let log = log.lock();
        let fast = log.iter().filter(|id| **id == "fast").count();
        let slow = log.iter().filter(|id| **id == "slow").count();
        assert!((40..=55).contains(&fast), "fast ticked {}", fast);
        assert!((4..=6).contains(&slow), "slow ticked {}", slow);
    }

    #[test]
    fn test_synced_escalates_fatal_child() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut group = SyncedGroup::new();
        attach(
            &mut group,
            200.0,
            2,
            vec![recorder("bad", 200.0, &log, Duration::ZERO, true)],
        );
        let mut g = group_runner(200.0, Box::new(group));
        g.start().unwrap();
        let mut escalated = false;
        for _ in 0..20 {
            std::thread::sleep(Duration::from_millis(5));
            if let Err(e) = g.tick() {
                assert!(e.is_fatal());
                escalated = true;
                break;
            }
        }
        assert!(escalated);
        g.stop();
    }

    #[test]
    fn test_empty_groups_are_inert() {
        let mut seq = group_runner(10.0, Box::new(SequencedGroup::new()));
        seq.start().unwrap();
        seq.tick().unwrap();

        let mut synced = SyncedGroup::new();
        attach(&mut synced, 10.0, 5, Vec::new());
        let mut synced = group_runner(10.0, Box::new(synced));
        synced.start().unwrap();
        synced.tick().unwrap();
        synced.stop();
    }
}
