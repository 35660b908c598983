use super::operator::OperatorTimings;
use super::solver::SolveReport;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// Counters and stage timers accumulated over the lifetime of an engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefitStatistics {
    pub events_seen: usize,
    pub events_refit: usize,
    pub events_passed_through: usize,
    pub events_dropped: usize,
    pub convergence_failures: usize,
    pub channel_set_rebuilds: usize,
    pub iterations: usize,
    pub wire_iterations: usize,
    pub light_iterations: usize,
    pub breakdowns: usize,
    pub operator_applications: usize,
    pub timers: StageTimers,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StageTimers {
    pub noise_load: Duration,
    pub initial_guess: Duration,
    pub solve: Duration,
    pub operator: Duration,
    pub noise_gemm: Duration,
    pub event: Duration,
}

impl RefitStatistics {
    pub fn record_solve(&mut self, report: &SolveReport) {
        self.events_refit += 1;
        self.iterations += report.iterations;
        self.wire_iterations += report.wire_iterations;
        self.light_iterations += report.light_iterations;
        self.breakdowns += report.breakdowns;
        if !report.converged {
            self.convergence_failures += 1;
        }
    }

    pub fn record_operator(&mut self, timings: OperatorTimings) {
        self.operator_applications += timings.applications;
        self.timers.operator += timings.total;
        self.timers.noise_gemm += timings.noise_gemm;
    }

    fn per_refit(&self, value: f64) -> f64 {
        if self.events_refit == 0 {
            0.0
        } else {
            value / self.events_refit as f64
        }
    }

    pub fn average_iterations(&self) -> f64 {
        self.per_refit(self.iterations as f64)
    }

    pub fn log_summary(&self) {
        info!(
            seen = self.events_seen,
            refit = self.events_refit,
            passed_through = self.events_passed_through,
            dropped = self.events_dropped,
            convergence_failures = self.convergence_failures,
            channel_set_rebuilds = self.channel_set_rebuilds,
            "refit signals summary"
        );
        info!(
            average = self.average_iterations(),
            average_wire = self.per_refit(self.wire_iterations as f64),
            average_light = self.per_refit(self.light_iterations as f64),
            breakdowns = self.breakdowns,
            "solver iterations per refit event"
        );
        let timers = &self.timers;
        for (stage, elapsed) in [
            ("noise_load", timers.noise_load),
            ("initial_guess", timers.initial_guess),
            ("solve", timers.solve),
            ("operator", timers.operator),
            ("noise_gemm", timers.noise_gemm),
            ("event", timers.event),
        ] {
            info!(
                stage,
                total_s = elapsed.as_secs_f64(),
                per_event_s = self.per_refit(elapsed.as_secs_f64()),
                "stage timer"
            );
        }
    }
}
