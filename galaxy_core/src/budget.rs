//! Tick latency monitoring.
//!
//! [`TickBudgetMonitor`] turns the stream of measured tick durations into a
//! [`BudgetDirective`] that the scheduler and governor consult every tick.

use std::collections::VecDeque;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::TickBudget;

const RECENT_HISTORY_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TickSample {
    pub tick: u64,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningLevel {
    #[default]
    Normal,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BudgetDirective {
    pub panic_mode: bool,
    pub should_cleanup: bool,
    pub skip_heavy_ops: bool,
    pub warning_level: WarningLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerfMetrics {
    pub max_duration_ms: f64,
    pub avg_duration_ms: f64,
    pub slow_ticks: u64,
    pub critical_ticks: u64,
    pub total_ticks: u64,
    pub panic_mode: bool,
    pub recent_history: Vec<TickSample>,
}

#[derive(Debug, Clone)]
pub struct TickBudgetMonitor {
    budget: TickBudget,
    history: VecDeque<TickSample>,
    max_duration_ms: f64,
    slow_ticks: u64,
    critical_ticks: u64,
    total_ticks: u64,
    panic_mode: bool,
    recovery_remaining: u32,
    slow_streak: u32,
}

impl TickBudgetMonitor {
    pub fn new(budget: TickBudget) -> Self {
        let capacity = budget.history_len.max(1);
        Self {
            budget,
            history: VecDeque::with_capacity(capacity),
            max_duration_ms: 0.0,
            slow_ticks: 0,
            critical_ticks: 0,
            total_ticks: 0,
            panic_mode: false,
            recovery_remaining: 0,
            slow_streak: 0,
        }
    }

    pub fn budget(&self) -> &TickBudget {
        &self.budget
    }

    pub fn in_panic(&self) -> bool {
        self.panic_mode
    }

    pub fn record_tick(&mut self, duration_ms: f64, tick: u64) -> BudgetDirective {
        let duration_ms = if duration_ms.is_finite() {
            duration_ms.max(0.0)
        } else {
            0.0
        };

        if self.history.len() >= self.budget.history_len.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(TickSample { tick, duration_ms });
        self.total_ticks += 1;
        self.max_duration_ms = self.max_duration_ms.max(duration_ms);

        let slow = duration_ms > self.budget.warning_ms;
        let critical = duration_ms > self.budget.critical_ms;
        if slow {
            self.slow_ticks += 1;
            self.slow_streak += 1;
        } else {
            self.slow_streak = 0;
        }

        if critical {
            self.critical_ticks += 1;
            if !self.panic_mode {
                warn!(
                    target: "galaxy::budget",
                    tick,
                    duration_ms,
                    critical_ms = self.budget.critical_ms,
                    "budget.panic.entered"
                );
            }
            self.panic_mode = true;
            self.recovery_remaining = self.budget.recovery_ticks;
        } else if self.panic_mode {
            self.recovery_remaining = self.recovery_remaining.saturating_sub(1);
            if self.recovery_remaining == 0 {
                self.panic_mode = false;
                info!(
                    target: "galaxy::budget",
                    tick,
                    avg_ms = self.average_ms(),
                    "budget.panic.exited"
                );
            }
        }

        if slow && !critical {
            warn!(
                target: "galaxy::budget",
                tick,
                duration_ms,
                streak = self.slow_streak,
                "budget.tick.slow"
            );
        }

        let streak_exceeded = self.slow_streak >= self.budget.slow_streak_threshold;
        let cleanup_freq = if self.panic_mode {
            self.budget.panic_cleanup_freq
        } else {
            self.budget.cleanup_freq
        };

        let warning_level = if self.panic_mode {
            WarningLevel::Critical
        } else if slow || streak_exceeded {
            WarningLevel::Warning
        } else {
            WarningLevel::Normal
        };

        BudgetDirective {
            panic_mode: self.panic_mode,
            should_cleanup: tick % cleanup_freq.max(1) == 0,
            skip_heavy_ops: self.panic_mode || streak_exceeded,
            warning_level,
        }
    }

    pub fn average_ms(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        self.history.iter().map(|s| s.duration_ms).sum::<f64>() / self.history.len() as f64
    }

    pub fn history(&self) -> impl Iterator<Item = &TickSample> {
        self.history.iter()
    }

    pub fn metrics(&self) -> PerfMetrics {
        let skip = self.history.len().saturating_sub(RECENT_HISTORY_LEN);
        PerfMetrics {
            max_duration_ms: self.max_duration_ms,
            avg_duration_ms: self.average_ms(),
            slow_ticks: self.slow_ticks,
            critical_ticks: self.critical_ticks,
            total_ticks: self.total_ticks,
            panic_mode: self.panic_mode,
            recent_history: self.history.iter().skip(skip).copied().collect(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.budget.clone());
    }
}
