//! Self-rescheduling tick loop.
//!
//! The scheduler owns the [`Simulation`] and drives it one tick at a time on
//! the simulation thread. Host integrations (world update, victory rules,
//! observer broadcast) plug in through [`TickHost`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    budget::{BudgetDirective, PerfMetrics},
    combat::CombatReport,
    governor::{CleanupSummary, PopulationStats},
    runtime::{SimCommand, Simulation},
    world::World,
};

#[derive(Debug, Error)]
pub enum TickError {
    #[error("world update failed at tick {tick}: {reason}")]
    WorldUpdate { tick: u64, reason: String },
    #[error("victory check failed at tick {tick}: {reason}")]
    Victory { tick: u64, reason: String },
    #[error("broadcast failed at tick {tick}: {reason}")]
    Broadcast { tick: u64, reason: String },
}

/// Snapshot handed to observers on broadcast ticks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub combat: CombatReport,
    pub perf: PerfMetrics,
    pub population: PopulationStats,
}

/// Host integration points invoked from inside a tick.
///
/// Hooks report failures through `TickError`. A panic is not contained at the
/// tick boundary and takes down the simulation thread.
pub trait TickHost {
    /// External world and economy update; runs first in every tick.
    fn update_world(&mut self, _world: &mut World, _tick: u64) -> Result<(), TickError> {
        Ok(())
    }

    fn check_victory(&mut self, _world: &World, _tick: u64) -> Result<(), TickError> {
        Ok(())
    }

    fn broadcast(&mut self, _world: &World, _report: &TickReport) -> Result<(), TickError> {
        Ok(())
    }

    /// Suspension point before the victory check and before the broadcast.
    fn yield_point(&mut self) {
        std::thread::yield_now();
    }
}

/// Host that does nothing beyond the core passes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl TickHost for NullHost {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TickMetrics {
    pub max_duration: Duration,
    pub slow_ticks: u64,
    pub total_duration: Duration,
    pub total_ticks: u64,
    pub failed_ticks: u64,
}

/// What a completed tick did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickSummary {
    pub tick: u64,
    pub duration: Duration,
    pub destroyed: usize,
    pub victory_checked: bool,
    pub broadcast: bool,
    pub cleanup: Option<CleanupSummary>,
    pub directive: BudgetDirective,
}

#[derive(Debug)]
pub enum TickOutcome {
    Completed(TickSummary),
    Failed { tick: u64, error: TickError },
    /// Another tick held the gate; nothing ran.
    Skipped,
}

/// Shared running flag. Cloning hands out another view of the same gate.
#[derive(Debug, Clone, Default)]
pub struct TickGate {
    running: Arc<AtomicBool>,
}

impl TickGate {
    pub fn try_enter(&self) -> Option<TickGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TickGuard {
                running: Arc::clone(&self.running),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Holds the gate in the RUNNING state until dropped.
#[derive(Debug)]
pub struct TickGuard {
    running: Arc<AtomicBool>,
}

impl Drop for TickGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Delay before the next tick: whatever remains of the target interval.
pub fn next_delay(target: Duration, last_duration: Duration) -> Duration {
    target.saturating_sub(last_duration)
}

pub struct TickScheduler<H: TickHost> {
    sim: Simulation,
    host: H,
    gate: TickGate,
    tick_index: u64,
    last_duration: Duration,
    last_directive: BudgetDirective,
    metrics: TickMetrics,
}

impl<H: TickHost> TickScheduler<H> {
    pub fn new(sim: Simulation, host: H) -> Self {
        Self {
            sim,
            host,
            gate: TickGate::default(),
            tick_index: 0,
            last_duration: Duration::ZERO,
            last_directive: BudgetDirective::default(),
            metrics: TickMetrics::default(),
        }
    }

    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    pub fn simulation_mut(&mut self) -> &mut Simulation {
        &mut self.sim
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn gate(&self) -> TickGate {
        self.gate.clone()
    }

    pub fn metrics(&self) -> TickMetrics {
        self.metrics
    }

    pub fn last_directive(&self) -> BudgetDirective {
        self.last_directive
    }

    pub fn next_delay(&self) -> Duration {
        let target = Duration::from_millis(self.sim.config().tick_budget.target_ms);
        next_delay(target, self.last_duration)
    }

    /// Runs one tick unless one is already in progress.
    pub fn tick(&mut self) -> TickOutcome {
        let Some(_guard) = self.gate.try_enter() else {
            warn!(
                target: "galaxy::scheduler",
                tick = self.tick_index,
                "tick.skipped=overlap"
            );
            return TickOutcome::Skipped;
        };

        self.tick_index += 1;
        let tick = self.tick_index;
        self.sim.set_clock(tick);
        let started = Instant::now();
        let body = self.run_body(tick);
        let duration = started.elapsed();

        self.last_duration = duration;
        self.metrics.total_ticks += 1;
        self.metrics.total_duration += duration;
        self.metrics.max_duration = self.metrics.max_duration.max(duration);
        let duration_ms = duration.as_secs_f64() * 1000.0;
        if duration_ms > self.sim.config().tick_budget.warning_ms {
            self.metrics.slow_ticks += 1;
        }
        let directive = self.sim.record_tick(duration_ms, tick);
        self.last_directive = directive;

        match body {
            Ok(mut summary) => {
                summary.duration = duration;
                summary.directive = directive;
                debug!(
                    target: "galaxy::scheduler",
                    tick,
                    duration_ms,
                    destroyed = summary.destroyed,
                    population = self.sim.population(),
                    "tick.completed"
                );
                TickOutcome::Completed(summary)
            }
            Err(err) => {
                self.metrics.failed_ticks += 1;
                error!(
                    target: "galaxy::scheduler",
                    tick,
                    error = %err,
                    failed_ticks = self.metrics.failed_ticks,
                    "tick.failed"
                );
                TickOutcome::Failed { tick, error: err }
            }
        }
    }

    fn run_body(&mut self, tick: u64) -> Result<TickSummary, TickError> {
        let cadence = self.sim.config().scheduler.clone();
        let hard_cap = self.sim.config().entity_limits.hard_cap;
        let warning_threshold = self.sim.config().entity_limits.warning_threshold;
        let heavy_ops_skipped = self.last_directive.skip_heavy_ops;

        self.host.update_world(self.sim.world_mut(), tick)?;

        let combat = self.sim.run_combat();
        let destroyed = combat.destroyed_count();

        let mut victory_checked = false;
        if !heavy_ops_skipped && tick % cadence.victory_check_interval.max(1) == 0 {
            self.host.yield_point();
            let population = self.sim.population();
            if population > warning_threshold {
                let health = self.sim.governor().health(population);
                warn!(
                    target: "galaxy::scheduler",
                    tick,
                    population,
                    health = health.as_str(),
                    "population.warning"
                );
            }
            self.host.check_victory(self.sim.world(), tick)?;
            victory_checked = true;
        }

        let broadcast_interval = if heavy_ops_skipped {
            cadence.broadcast_interval.max(1) * 2
        } else {
            cadence.broadcast_interval.max(1)
        };
        let mut broadcast = false;
        if tick % broadcast_interval == 0 {
            self.host.yield_point();
            let report = TickReport {
                tick,
                combat,
                perf: self.sim.monitor().metrics(),
                population: self.sim.stats(),
            };
            self.host.broadcast(self.sim.world(), &report)?;
            broadcast = true;
        }

        let population = self.sim.population();
        let cleanup = if self.last_directive.should_cleanup || population > hard_cap {
            let summary = self.sim.run_governance();
            if summary.removed_count > 0 {
                info!(
                    target: "galaxy::scheduler",
                    tick,
                    removed = summary.removed_count,
                    population = self.sim.population(),
                    "tick.governance"
                );
            }
            Some(summary)
        } else {
            None
        };

        Ok(TickSummary {
            tick,
            duration: Duration::ZERO,
            destroyed,
            victory_checked,
            broadcast,
            cleanup,
            directive: BudgetDirective::default(),
        })
    }

    /// Simulation thread loop. Commands are applied between ticks while
    /// waiting out the computed delay; `Shutdown` or a closed inbox stops it.
    pub fn run(&mut self, inbox: &Receiver<SimCommand>) -> TickMetrics {
        info!(
            target: "galaxy::scheduler",
            target_ms = self.sim.config().tick_budget.target_ms,
            "scheduler.started"
        );
        loop {
            let timer = crossbeam_channel::at(Instant::now() + self.next_delay());
            loop {
                select! {
                    recv(inbox) -> message => match message {
                        Ok(SimCommand::Shutdown) | Err(_) => {
                            info!(
                                target: "galaxy::scheduler",
                                ticks = self.metrics.total_ticks,
                                failed = self.metrics.failed_ticks,
                                "scheduler.stopped"
                            );
                            return self.metrics;
                        }
                        Ok(command) => self.sim.apply(command),
                    },
                    recv(timer) -> _ => break,
                }
            }
            self.tick();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::RuntimeConfig;
    use crate::entity::{EmpireId, EntitySpec, PlanetId};
    use crate::world::{Empire, EmpireRoster, Planet, StarMap, StarSystem, SystemId};

    #[derive(Default)]
    struct RecordingHost {
        updates: Vec<u64>,
        victory_checks: Vec<u64>,
        broadcasts: Vec<u64>,
        yields: usize,
        fail_on: Option<u64>,
        stall_on: Option<(u64, Duration)>,
    }

    impl TickHost for RecordingHost {
        fn update_world(&mut self, _world: &mut World, tick: u64) -> Result<(), TickError> {
            self.updates.push(tick);
            if let Some((stall_tick, pause)) = self.stall_on {
                if stall_tick == tick {
                    std::thread::sleep(pause);
                }
            }
            if self.fail_on == Some(tick) {
                return Err(TickError::WorldUpdate {
                    tick,
                    reason: "economy offline".to_string(),
                });
            }
            Ok(())
        }

        fn check_victory(&mut self, _world: &World, tick: u64) -> Result<(), TickError> {
            self.victory_checks.push(tick);
            Ok(())
        }

        fn broadcast(&mut self, _world: &World, report: &TickReport) -> Result<(), TickError> {
            self.broadcasts.push(report.tick);
            Ok(())
        }

        fn yield_point(&mut self) {
            self.yields += 1;
        }
    }

    fn simulation() -> Simulation {
        let mut map = StarMap::new();
        map.add_system(StarSystem {
            id: SystemId(1),
            name: "Sol".to_string(),
            position: (0.0, 0.0),
            terrain: Default::default(),
        });
        map.add_planet(Planet {
            id: PlanetId(1),
            name: "Terra".to_string(),
            system: SystemId(1),
            owner: Some(EmpireId(1)),
        });
        let empires = EmpireRoster::new([Empire {
            id: EmpireId(1),
            name: "Aurora".to_string(),
            defeated: false,
        }]);
        Simulation::new(
            Arc::new(RuntimeConfig::default()),
            World::new(map, empires),
        )
    }

    #[test]
    fn next_delay_never_negative() {
        let target = Duration::from_millis(1000);
        assert_eq!(
            next_delay(target, Duration::from_millis(300)),
            Duration::from_millis(700)
        );
        assert_eq!(next_delay(target, Duration::from_millis(1500)), Duration::ZERO);
    }

    #[test]
    fn held_gate_skips_tick() {
        let mut scheduler = TickScheduler::new(simulation(), RecordingHost::default());
        let gate = scheduler.gate();
        let guard = gate.try_enter().expect("gate idle");
        assert!(matches!(scheduler.tick(), TickOutcome::Skipped));
        assert!(scheduler.host().updates.is_empty());
        assert_eq!(scheduler.metrics().total_ticks, 0);

        drop(guard);
        assert!(matches!(scheduler.tick(), TickOutcome::Completed(_)));
        assert!(!gate.is_running());
    }

    #[test]
    fn periodic_work_follows_cadence() {
        let mut scheduler = TickScheduler::new(simulation(), RecordingHost::default());
        for _ in 0..20 {
            scheduler.tick();
        }
        let host = scheduler.host();
        assert_eq!(host.updates.len(), 20);
        assert_eq!(host.victory_checks, vec![10, 20]);
        assert_eq!(host.broadcasts, vec![5, 10, 15, 20]);
        assert_eq!(host.yields, 6);
    }

    #[test]
    fn host_failure_is_counted_and_scheduling_continues() {
        let host = RecordingHost {
            fail_on: Some(2),
            ..Default::default()
        };
        let mut scheduler = TickScheduler::new(simulation(), host);
        assert!(matches!(scheduler.tick(), TickOutcome::Completed(_)));
        match scheduler.tick() {
            TickOutcome::Failed { tick, error } => {
                assert_eq!(tick, 2);
                assert!(matches!(error, TickError::WorldUpdate { .. }));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(matches!(scheduler.tick(), TickOutcome::Completed(_)));
        let metrics = scheduler.metrics();
        assert_eq!(metrics.total_ticks, 3);
        assert_eq!(metrics.failed_ticks, 1);
    }

    #[test]
    fn critical_tick_skips_heavy_work_and_slows_broadcasts() {
        let host = RecordingHost {
            stall_on: Some((1, Duration::from_millis(250))),
            ..Default::default()
        };
        let mut scheduler = TickScheduler::new(simulation(), host);
        scheduler.tick();
        assert!(scheduler.last_directive().panic_mode);
        assert!(scheduler.metrics().slow_ticks >= 1);
        for _ in 0..19 {
            scheduler.tick();
        }
        let host = scheduler.host();
        assert!(host.victory_checks.is_empty());
        assert_eq!(host.broadcasts, vec![10, 20]);
    }

    #[test]
    fn panic_cadence_runs_governance() {
        let host = RecordingHost {
            stall_on: Some((1, Duration::from_millis(250))),
            ..Default::default()
        };
        let mut scheduler = TickScheduler::new(simulation(), host);
        scheduler
            .simulation_mut()
            .spawn(EntitySpec::unit("fighter", EmpireId(1), PlanetId(1)))
            .expect("spawn");
        scheduler
            .simulation_mut()
            .world_mut()
            .empires
            .mark_defeated(EmpireId(1));

        let mut cleanups = Vec::new();
        for _ in 0..21 {
            if let TickOutcome::Completed(summary) = scheduler.tick() {
                if let Some(cleanup) = summary.cleanup {
                    cleanups.push((summary.tick, cleanup.removed_count));
                }
            }
        }
        // Directive recorded at tick 10 triggers governance on tick 11.
        assert_eq!(cleanups, vec![(11, 1), (21, 0)]);
        assert_eq!(scheduler.simulation().population(), 0);
    }

    #[test]
    fn run_applies_commands_until_shutdown() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut config = RuntimeConfig::default();
        config.tick_budget.target_ms = 5;
        let sim = Simulation::new(Arc::new(config), simulation().world().clone());
        let mut scheduler = TickScheduler::new(sim, NullHost);

        tx.send(SimCommand::Spawn(EntitySpec::unit(
            "fighter",
            EmpireId(1),
            PlanetId(1),
        )))
        .expect("send spawn");
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        tx.send(SimCommand::Stats { reply: reply_tx })
            .expect("send stats");
        tx.send(SimCommand::Shutdown).expect("send shutdown");

        scheduler.run(&rx);
        let stats = reply_rx.recv().expect("stats reply");
        assert_eq!(stats.total, 1);
        assert_eq!(scheduler.simulation().population(), 1);
    }
}
