//! Gate outcome counters

use callgate_telemetry::{Counter, Gauge, Histogram, HistogramSnapshot};
use serde::Serialize;

use crate::gate::GateStatus;

#[derive(Clone)]
pub struct GateMetrics {
    pub dials: Counter,
    pub answered: Counter,
    pub no_answer: Counter,
    pub busy: Counter,
    pub errors: Counter,
    pub hangups_requested: Counter,
    pub webhooks_sent: Counter,
    pub active_calls: Gauge,
    pub ring_time_ms: Histogram,
}

#[derive(Debug, Serialize)]
pub struct GateStats {
    pub dials: u64,
    pub answered: u64,
    pub no_answer: u64,
    pub busy: u64,
    pub errors: u64,
    pub hangups_requested: u64,
    pub webhooks_sent: u64,
    pub active_calls: u64,
    /// Share of dials that were answered, 0.0 to 1.0
    pub answer_ratio: f64,
    pub ring_time_ms: HistogramSnapshot,
}

impl GateMetrics {
    pub fn new() -> Self {
        Self {
            dials: Counter::new("gate_dials_total"),
            answered: Counter::new("gate_answered_total"),
            no_answer: Counter::new("gate_no_answer_total"),
            busy: Counter::new("gate_busy_total"),
            errors: Counter::new("gate_errors_total"),
            hangups_requested: Counter::new("gate_hangups_requested_total"),
            webhooks_sent: Counter::new("gate_webhooks_sent_total"),
            active_calls: Gauge::new("gate_active_calls"),
            ring_time_ms: Histogram::with_capacity("gate_ring_time_ms", 4096),
        }
    }

    /// Count a finished gate operation
    pub fn record(&self, status: GateStatus, elapsed_ms: u64) {
        self.dials.inc();
        match status {
            GateStatus::Answered => {
                self.answered.inc();
                self.ring_time_ms.record(elapsed_ms as f64);
            }
            GateStatus::NoAnswer => self.no_answer.inc(),
            GateStatus::Busy => self.busy.inc(),
            GateStatus::Error => self.errors.inc(),
        }
    }

    pub fn snapshot(&self) -> GateStats {
        let dials = self.dials.get();
        let answered = self.answered.get();
        GateStats {
            dials,
            answered,
            no_answer: self.no_answer.get(),
            busy: self.busy.get(),
            errors: self.errors.get(),
            hangups_requested: self.hangups_requested.get(),
            webhooks_sent: self.webhooks_sent.get(),
            active_calls: self.active_calls.get(),
            answer_ratio: if dials == 0 {
                0.0
            } else {
                answered as f64 / dials as f64
            },
            ring_time_ms: self.ring_time_ms.snapshot(),
        }
    }
}

impl Default for GateMetrics {
    fn default() -> Self {
        Self::new()
    }
}
